//! Scan configuration sidecar (XML) reader.
//!
//! The lidar software writes its scan definitions to an XML file next to the
//! data. Only the attributes of a single scan element are of interest; they
//! end up as `scan_*` attributes on the lidar dataset.

use std::fs;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Errors that can occur while reading scan configuration.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to read scan file: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed XML: {0}")]
    Malformed(String),

    #[error("Scan element not found: {0}")]
    ScanNotFound(String),
}

/// Result type for scan operations.
pub type Result<T> = std::result::Result<T, ScanError>;

/// A parsed XML element with its attributes (in document order) and children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ScanError::Malformed(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    /// Attribute value by name.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Follow a path of child indices starting from this element.
    pub fn descend(&self, path: &[usize]) -> Option<&XmlElement> {
        path.iter().try_fold(self, |el, &i| el.children.get(i))
    }

    /// First element (pre-order, self included) whose `key` attribute equals `value`.
    pub fn find_by_attribute(&self, key: &str, value: &str) -> Option<&XmlElement> {
        if self.attribute(key) == Some(value) {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find_by_attribute(key, value))
    }
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(ScanError::Malformed("multiple root elements".to_string())),
    }
    Ok(())
}

/// Parse an XML document into an element tree. Text content is ignored.
pub fn parse_xml_tree(text: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(XmlElement::from_start(&start)?),
            Event::Empty(start) => {
                let element = XmlElement::from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ScanError::Malformed("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ScanError::Malformed(format!(
            "{} unclosed element(s)",
            stack.len()
        )));
    }
    root.ok_or_else(|| ScanError::Malformed("no root element".to_string()))
}

/// Read the attributes of one scan element from a scan configuration file.
///
/// # Arguments
///
/// * `path` - Path to the XML file
/// * `scan_id` - When given, the first element whose `id` attribute matches is used
/// * `scan_path` - Child-index path from the root used when `scan_id` is `None`
///
/// # Returns
///
/// The scan element's attributes in document order.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if no element
/// matches.
pub fn read_scan_attributes<P: AsRef<Path>>(
    path: P,
    scan_id: Option<&str>,
    scan_path: &[usize],
) -> Result<Vec<(String, String)>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let tree = parse_xml_tree(&text)?;

    let element = match scan_id {
        Some(id) => tree
            .find_by_attribute("id", id)
            .ok_or_else(|| ScanError::ScanNotFound(format!("id '{}' in {}", id, path.display())))?,
        None => tree.descend(scan_path).ok_or_else(|| {
            ScanError::ScanNotFound(format!("path {:?} in {}", scan_path, path.display()))
        })?,
    };

    log::debug!(
        "Using <{}> with {} attribute(s) from {}",
        element.name,
        element.attributes.len(),
        path.display()
    );
    Ok(element.attributes.clone())
}
