//! Instrument importers and derived products.

pub mod balloon;
pub mod lidar;
pub mod mwr;
pub mod regression;
pub mod rrs;
pub mod scan;

// Re-export key types for convenience
pub use balloon::{weather_balloon, BalloonError};
pub use lidar::{lidar_from_csv, LidarError, LidarOptions};
pub use mwr::{mwr_from_csv, MwrError, MwrOptions};
pub use regression::{wind_regression, wind_regression_dataset, RegressionError, WindEstimate, WindFit};
pub use rrs::{decode_rrs, DecodeReport, DecoderError};
pub use scan::{read_scan_attributes, ScanError};
