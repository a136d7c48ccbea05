//! Core data types and I/O operations.

pub mod dataset;
pub mod loaders;
pub mod transforms;
pub mod writers;

pub use dataset::{AttrValue, Attrs, Dataset, DatasetError, Values, Variable};
pub use loaders::{LoaderError, Table};
pub use writers::{write_dataset_csv, WriteError};
