//! Long-form CSV export of dataset variables.
//!
//! A dataset is written one row per array element: one column per dimension
//! (labelled by the index coordinate when there is one) followed by the value
//! columns. Missing values are written as empty cells.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use ndarray::{indices, Dimension, IxDyn};
use thiserror::Error;

use super::dataset::{Dataset, Variable};

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// The requested variable is not in the dataset.
    #[error("no data variable named '{0}'")]
    UnknownVariable(String),
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a CSV writer for the given path.
fn create_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

/// Label for position `index` along `dim`: the index coordinate value, or the index itself.
fn dim_label(ds: &Dataset, dim: &str, index: usize) -> String {
    match ds.coord(dim) {
        Some(coord) if coord.dims.len() == 1 && coord.dims[0] == dim => {
            coord.values.format_at(&[index])
        }
        _ => index.to_string(),
    }
}

/// Write every data variable that shares the dimensions of `reference` as
/// columns of one long-form CSV.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `ds` - Dataset to export
/// * `reference` - Data variable whose dimensions select the exported columns
///
/// # Returns
///
/// The number of data rows written.
///
/// # Errors
///
/// Returns an error if `reference` is not a data variable or the file cannot
/// be written.
pub fn write_dataset_csv(path: &Path, ds: &Dataset, reference: &str) -> Result<usize> {
    let reference_var = ds
        .var(reference)
        .ok_or_else(|| WriteError::UnknownVariable(reference.to_string()))?;

    let columns: Vec<(&String, &Variable)> = ds
        .data_vars()
        .iter()
        .filter(|(_, var)| var.dims == reference_var.dims)
        .collect();

    let skipped = ds.data_vars().len() - columns.len();
    if skipped > 0 {
        log::debug!(
            "{} variable(s) not on dimensions {:?} left out of {}",
            skipped,
            reference_var.dims,
            path.display()
        );
    }

    let path_str = path.display().to_string();
    let mut writer = create_csv_writer(path)?;

    let header: Vec<&str> = reference_var
        .dims
        .iter()
        .map(String::as_str)
        .chain(columns.iter().map(|(name, _)| name.as_str()))
        .collect();
    writer.write_record(&header).map_err(|e| WriteError::CsvError {
        path: path_str.clone(),
        source: e,
    })?;

    let mut rows = 0;
    for index in indices(IxDyn(reference_var.values.shape())) {
        let index = index.slice();
        let record: Vec<String> = reference_var
            .dims
            .iter()
            .zip(index)
            .map(|(dim, &i)| dim_label(ds, dim, i))
            .chain(columns.iter().map(|(_, var)| var.values.format_at(index)))
            .collect();

        writer.write_record(&record).map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;
        rows += 1;
    }

    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(rows)
}
