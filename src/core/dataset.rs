//! Labeled n-dimensional dataset container.
//!
//! A [`Dataset`] holds named dimensions, coordinate variables and data
//! variables. Every variable is an `ndarray` array tagged with the names of
//! its dimensions and its own attribute dictionary (units, long names, ...).
//! The importers in [`crate::processors`] each produce one of these.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use ndarray::{ArrayD, ArrayView2, Axis, Ix2};
use thiserror::Error;

/// Errors raised while assembling or reshaping a dataset.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Unknown dimension: {0}")]
    UnknownDimension(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Name already in use: {0}")]
    NameInUse(String),

    #[error("Variable '{name}' has shape {shape:?}, which does not fit dimensions {dims:?}")]
    ShapeMismatch {
        name: String,
        dims: Vec<String>,
        shape: Vec<usize>,
    },

    #[error("Index {index} out of bounds for dimension '{dim}' of length {len}")]
    IndexOutOfBounds { dim: String, index: usize, len: usize },

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Result type for dataset operations.
pub type Result<T> = std::result::Result<T, DatasetError>;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Float(f64),
    /// Per-name mapping, e.g. units for each record type.
    Map(BTreeMap<String, String>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            AttrValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<BTreeMap<String, String>> for AttrValue {
    fn from(value: BTreeMap<String, String>) -> Self {
        AttrValue::Map(value)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => write!(f, "{}", s),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Map(m) => {
                let parts: Vec<String> = m.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Attribute dictionary.
pub type Attrs = BTreeMap<String, AttrValue>;

/// Typed array storage for a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    /// Floating point data; missing cells are NaN.
    Float(ArrayD<f64>),
    Int(ArrayD<i64>),
    /// Boolean flags; missing cells are false.
    Bool(ArrayD<bool>),
    /// Timestamps; missing cells are `None`.
    Time(ArrayD<Option<NaiveDateTime>>),
    Text(ArrayD<String>),
}

impl Values {
    /// Returns the array shape.
    pub fn shape(&self) -> &[usize] {
        match self {
            Values::Float(a) => a.shape(),
            Values::Int(a) => a.shape(),
            Values::Bool(a) => a.shape(),
            Values::Time(a) => a.shape(),
            Values::Text(a) => a.shape(),
        }
    }

    /// Short type name used in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Values::Float(_) => "float64",
            Values::Int(_) => "int64",
            Values::Bool(_) => "bool",
            Values::Time(_) => "datetime",
            Values::Text(_) => "text",
        }
    }

    pub fn as_float(&self) -> Option<&ArrayD<f64>> {
        match self {
            Values::Float(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&ArrayD<i64>> {
        match self {
            Values::Int(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&ArrayD<bool>> {
        match self {
            Values::Bool(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&ArrayD<Option<NaiveDateTime>>> {
        match self {
            Values::Time(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&ArrayD<String>> {
        match self {
            Values::Text(a) => Some(a),
            _ => None,
        }
    }

    /// Format one element for text output. Missing values format as an empty string.
    ///
    /// Panics if `index` is out of bounds, like ndarray indexing.
    pub fn format_at(&self, index: &[usize]) -> String {
        match self {
            Values::Float(a) => {
                let v = a[index];
                if v.is_nan() {
                    String::new()
                } else {
                    v.to_string()
                }
            }
            Values::Int(a) => a[index].to_string(),
            Values::Bool(a) => a[index].to_string(),
            Values::Time(a) => a[index]
                .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                .unwrap_or_default(),
            Values::Text(a) => a[index].clone(),
        }
    }

    /// Take the sub-array at `index` along `axis`, dropping that axis.
    pub fn index_axis(&self, axis: usize, index: usize) -> Values {
        let ax = Axis(axis);
        match self {
            Values::Float(a) => Values::Float(a.index_axis(ax, index).to_owned()),
            Values::Int(a) => Values::Int(a.index_axis(ax, index).to_owned()),
            Values::Bool(a) => Values::Bool(a.index_axis(ax, index).to_owned()),
            Values::Time(a) => Values::Time(a.index_axis(ax, index).to_owned()),
            Values::Text(a) => Values::Text(a.index_axis(ax, index).to_owned()),
        }
    }
}

/// A named-dimension array with attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub values: Values,
    pub attrs: Attrs,
}

impl Variable {
    pub fn new<S: Into<String>>(dims: impl IntoIterator<Item = S>, values: Values) -> Self {
        Self {
            dims: dims.into_iter().map(Into::into).collect(),
            values,
            attrs: Attrs::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.attrs.insert(key.to_string(), value.into());
    }

    /// Text attribute lookup.
    pub fn attr_text(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_text)
    }

    /// Position of `dim` in this variable's dimensions.
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Two-dimensional float view, if the variable is a 2-D float array.
    pub fn float_2d(&self) -> Option<ArrayView2<'_, f64>> {
        self.values
            .as_float()?
            .view()
            .into_dimensionality::<Ix2>()
            .ok()
    }
}

/// A collection of variables sharing named dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    dims: Vec<(String, usize)>,
    coords: BTreeMap<String, Variable>,
    data_vars: BTreeMap<String, Variable>,
    pub attrs: Attrs,
}

impl Dataset {
    /// Creates an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty dataset carrying the given attributes.
    pub fn with_attrs(attrs: Attrs) -> Self {
        Self {
            attrs,
            ..Self::default()
        }
    }

    /// Dimensions in the order they were first registered.
    pub fn dims(&self) -> &[(String, usize)] {
        &self.dims
    }

    pub fn dim_len(&self, name: &str) -> Option<usize> {
        self.dims.iter().find(|(d, _)| d == name).map(|(_, len)| *len)
    }

    pub fn coords(&self) -> &BTreeMap<String, Variable> {
        &self.coords
    }

    pub fn data_vars(&self) -> &BTreeMap<String, Variable> {
        &self.data_vars
    }

    pub fn coord(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name)
    }

    pub fn var(&self, name: &str) -> Option<&Variable> {
        self.data_vars.get(name)
    }

    /// Whether a coordinate or data variable with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.coords.contains_key(name) || self.data_vars.contains_key(name)
    }

    /// Add or replace a coordinate variable.
    ///
    /// Dimensions not yet known are registered from the variable's shape.
    pub fn set_coord(&mut self, name: &str, var: Variable) -> Result<()> {
        if self.data_vars.contains_key(name) {
            return Err(DatasetError::NameInUse(name.to_string()));
        }
        self.register_dims(name, &var)?;
        self.coords.insert(name.to_string(), var);
        Ok(())
    }

    /// Add or replace a data variable.
    ///
    /// Dimensions not yet known are registered from the variable's shape.
    pub fn set_var(&mut self, name: &str, var: Variable) -> Result<()> {
        if self.coords.contains_key(name) {
            return Err(DatasetError::NameInUse(name.to_string()));
        }
        self.register_dims(name, &var)?;
        self.data_vars.insert(name.to_string(), var);
        Ok(())
    }

    fn register_dims(&mut self, name: &str, var: &Variable) -> Result<()> {
        let shape = var.values.shape();
        let mismatch = || DatasetError::ShapeMismatch {
            name: name.to_string(),
            dims: var.dims.clone(),
            shape: shape.to_vec(),
        };

        if shape.len() != var.dims.len() {
            return Err(mismatch());
        }

        let mut new_dims = Vec::new();
        for (dim, &len) in var.dims.iter().zip(shape) {
            match self.dim_len(dim) {
                Some(existing) if existing != len => return Err(mismatch()),
                Some(_) => {}
                None => new_dims.push((dim.clone(), len)),
            }
        }
        self.dims.extend(new_dims);
        Ok(())
    }

    /// Select a single position along `dim`, dropping that dimension.
    pub fn isel(&self, dim: &str, index: usize) -> Result<Dataset> {
        let len = self
            .dim_len(dim)
            .ok_or_else(|| DatasetError::UnknownDimension(dim.to_string()))?;
        if index >= len {
            return Err(DatasetError::IndexOutOfBounds {
                dim: dim.to_string(),
                index,
                len,
            });
        }

        let select = |var: &Variable| -> Variable {
            match var.axis_of(dim) {
                Some(axis) => Variable {
                    dims: var.dims.iter().filter(|d| *d != dim).cloned().collect(),
                    values: var.values.index_axis(axis, index),
                    attrs: var.attrs.clone(),
                },
                None => var.clone(),
            }
        };

        Ok(Dataset {
            dims: self.dims.iter().filter(|(d, _)| d != dim).cloned().collect(),
            coords: self.coords.iter().map(|(k, v)| (k.clone(), select(v))).collect(),
            data_vars: self.data_vars.iter().map(|(k, v)| (k.clone(), select(v))).collect(),
            attrs: self.attrs.clone(),
        })
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self
            .dims
            .iter()
            .map(|(name, len)| format!("{}: {}", name, len))
            .collect();
        writeln!(f, "Dimensions: ({})", dims.join(", "))?;

        let describe = |f: &mut fmt::Formatter<'_>, name: &str, var: &Variable| {
            writeln!(f, "    {:<24} ({}) {}", name, var.dims.join(", "), var.values.kind())
        };

        writeln!(f, "Coordinates:")?;
        for (name, var) in &self.coords {
            describe(f, name, var)?;
        }
        writeln!(f, "Data variables:")?;
        for (name, var) in &self.data_vars {
            describe(f, name, var)?;
        }
        if !self.attrs.is_empty() {
            writeln!(f, "Attributes:")?;
            for (key, value) in &self.attrs {
                writeln!(f, "    {}: {}", key, value)?;
            }
        }
        Ok(())
    }
}
