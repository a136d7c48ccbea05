//! Importers for atmospheric profiling instruments.
//!
//! This crate provides tools for:
//! - Loading scanning wind lidar CSV exports into labelled (Time × Range) datasets
//! - Splitting microwave radiometer multi-table CSVs into profile cubes, with optional resampling
//! - Reconstructing wind vectors from lidar radial velocities (parallel OLS per range gate)
//! - Reading weather balloon telemetry with its flight metadata
//! - Drawing skew-T diagrams and running the external RRS BUFR decoder
//!
//! # Example
//!
//! ```no_run
//! use wxprofilers::processors::{lidar_from_csv, wind_regression_dataset, LidarOptions};
//!
//! let lidar = lidar_from_csv("radial_wind.csv", &LidarOptions::default(), None).unwrap();
//! let wind = wind_regression_dataset(&lidar, None, None).unwrap();
//! println!("{}", wind);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{
    DecoderConfig, LidarConfig, MwrConfig, PipelineConfig, PlotConfig, RegressionConfig,
};
pub use core::dataset::{Dataset, Values, Variable};
