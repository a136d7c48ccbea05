//! Configuration types for the profiler importers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the lidar importer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LidarConfig {
    /// Child-index path from the scan XML root to the scan element used
    /// when no scan id is requested
    #[serde(default = "default_scan_path")]
    pub scan_path: Vec<usize>,
}

fn default_scan_path() -> Vec<usize> {
    vec![0, 1, 2, 0]
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            scan_path: default_scan_path(),
        }
    }
}

/// Configuration for the microwave radiometer importer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MwrConfig {
    /// LV2 processor to keep (e.g. "Zenith"); `None` keeps all of them
    #[serde(default = "default_processor")]
    pub processor: Option<String>,

    /// Level-2 records written per complete scan
    #[serde(default = "default_records_per_scan")]
    pub records_per_scan: usize,

    /// Resample interval in minutes when resampling is requested
    #[serde(default = "default_resample_minutes")]
    pub resample_minutes: u32,
}

fn default_processor() -> Option<String> {
    Some("Zenith".to_string())
}

fn default_records_per_scan() -> usize {
    16
}

fn default_resample_minutes() -> u32 {
    5
}

impl Default for MwrConfig {
    fn default() -> Self {
        Self {
            processor: default_processor(),
            records_per_scan: default_records_per_scan(),
            resample_minutes: default_resample_minutes(),
        }
    }
}

/// Configuration for the wind vector regression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionConfig {
    /// Elevation of the slanted lines of sight in degrees
    #[serde(default = "default_elevation_deg")]
    pub elevation_deg: f64,

    /// Maximum standard error for a fitted component to be kept (m/s)
    #[serde(default = "default_max_se")]
    pub max_se: f64,

    /// LOS id of the vertically pointing beam
    #[serde(default = "default_vertical_los")]
    pub vertical_los: i64,
}

fn default_elevation_deg() -> f64 {
    75.0
}

fn default_max_se() -> f64 {
    1.0
}

fn default_vertical_los() -> i64 {
    4
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            elevation_deg: default_elevation_deg(),
            max_se: default_max_se(),
            vertical_los: default_vertical_los(),
        }
    }
}

/// Configuration for the external RRS decoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Decoder executable (looked up on PATH if not absolute)
    #[serde(default = "default_decoder_executable")]
    pub executable: PathBuf,
}

fn default_decoder_executable() -> PathBuf {
    PathBuf::from("rrs_decoder")
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            executable: default_decoder_executable(),
        }
    }
}

/// Configuration for skew-T rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    /// Image width in pixels
    #[serde(default = "default_plot_size")]
    pub width: u32,

    /// Image height in pixels
    #[serde(default = "default_plot_size")]
    pub height: u32,

    /// Pressure at zero height (hPa)
    #[serde(default = "default_surface_pressure")]
    pub surface_pressure_hpa: f64,

    /// Scale height for the height to pressure conversion (km)
    #[serde(default = "default_scale_height")]
    pub scale_height_km: f64,
}

fn default_plot_size() -> u32 {
    1200
}

fn default_surface_pressure() -> f64 {
    1013.25
}

fn default_scale_height() -> f64 {
    7.0
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: default_plot_size(),
            height: default_plot_size(),
            surface_pressure_hpa: default_surface_pressure(),
            scale_height_km: default_scale_height(),
        }
    }
}

/// Main configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub lidar: LidarConfig,

    #[serde(default)]
    pub mwr: MwrConfig,

    #[serde(default)]
    pub regression: RegressionConfig,

    #[serde(default)]
    pub decoder: DecoderConfig,

    #[serde(default)]
    pub plot: PlotConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
