//! Command-line interface for the profiler importers.

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::dataset::{AttrValue, Attrs, Dataset};
use crate::core::loaders::parse_timestamp;
use crate::core::writers::write_dataset_csv;
use crate::processors::{
    decode_rrs, lidar_from_csv, mwr_from_csv, weather_balloon, wind_regression_dataset, LidarOptions,
    MwrOptions,
};
use crate::visualization::{plot_skewt, SkewTProfile};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "wxprofilers")]
#[command(about = "Import atmospheric profiler data (lidar, radiometer, radiosonde)", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a lidar radial wind CSV
    Lidar {
        /// Radial wind CSV file
        input: PathBuf,
        /// Scan configuration XML
        #[arg(long)]
        scans: Option<PathBuf>,
        /// Select the scan element by id instead of by position
        #[arg(long)]
        scan_id: Option<String>,
        /// Wind component CSV to merge
        #[arg(long)]
        wind: Option<PathBuf>,
        /// Extra dataset attribute (key=value, repeatable)
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, String)>,
        /// Output CSV (long form, one row per Time and Range)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a microwave radiometer level-2 CSV
    Mwr {
        /// Radiometer CSV file
        input: PathBuf,
        /// Average into fixed time bins and split by record type
        #[arg(long)]
        resample: bool,
        /// LV2 processor to keep (overrides config)
        #[arg(long)]
        processor: Option<String>,
        /// Keep every LV2 processor as a dimension
        #[arg(long, conflicts_with = "processor")]
        all_processors: bool,
        /// Output CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Reconstruct wind vectors from a lidar radial wind CSV
    Wind {
        /// Radial wind CSV file
        input: PathBuf,
        /// Start of the time window (inclusive)
        #[arg(long, value_parser = parse_time_arg, requires = "end")]
        start: Option<NaiveDateTime>,
        /// End of the time window (exclusive)
        #[arg(long, value_parser = parse_time_arg, requires = "start")]
        end: Option<NaiveDateTime>,
        /// Output CSV (one row per Range and Component)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a weather balloon flight file
    Balloon {
        /// Processed flight file
        input: PathBuf,
        /// Output CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Draw a skew-T diagram from resampled radiometer data
    Skewt {
        /// Radiometer CSV file
        input: PathBuf,
        /// Output PNG file path
        #[arg(short, long)]
        output: PathBuf,
        /// Index of the resampled time step to draw
        #[arg(long, default_value_t = 0)]
        time_index: usize,
    },

    /// Run the external RRS BUFR decoder
    DecodeRrs {
        /// Radiosonde BUFR file
        bufr_in: PathBuf,
        /// Output selection passed to the decoder
        outputs: String,
        /// Output directory
        #[arg(long, default_value = "")]
        outdir: String,
    },
}

fn parse_attr(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

fn parse_time_arg(s: &str) -> std::result::Result<NaiveDateTime, String> {
    parse_timestamp(s).map_err(|e| e.to_string())
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Summary lines shared by every importer.
fn dataset_items(input: &Path, ds: &Dataset) -> Vec<(&'static str, String)> {
    let dims: Vec<String> = ds.dims().iter().map(|(d, n)| format!("{}={}", d, n)).collect();
    vec![
        ("Input", input.display().to_string()),
        ("Dimensions", dims.join(", ")),
        ("Variables", ds.data_vars().len().to_string()),
    ]
}

/// Write `ds` to CSV when an output was requested, keyed on `reference` or
/// the first data variable.
fn export(ds: &Dataset, output: Option<&Path>, reference: Option<&str>) -> Result<Option<usize>> {
    let Some(output) = output else {
        return Ok(None);
    };
    let reference = match reference.or_else(|| ds.data_vars().keys().next().map(String::as_str)) {
        Some(name) => name,
        None => bail!("dataset has no data variables to export"),
    };
    let rows = write_dataset_csv(output, ds, reference)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Wrote {} rows to {}", rows, output.display());
    Ok(Some(rows))
}

/// Print the result of a command, or log the error and exit with status 1.
fn finish(title: &str, start: Instant, result: Result<Vec<(&str, String)>>) {
    match result {
        Ok(mut items) => {
            items.push(("Duration", format!("{:.2?}", start.elapsed())));
            print_summary(title, &items);
        }
        Err(e) => {
            error!("{} failed: {:#}", title, e);
            std::process::exit(1);
        }
    }
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    let start = Instant::now();
    match cli.command {
        Commands::Lidar { input, scans, scan_id, wind, attrs, output } => {
            let options = LidarOptions {
                scans,
                scan_id,
                wind,
                attrs: attrs.into_iter().map(|(k, v)| (k, AttrValue::Text(v))).collect(),
            };
            finish("Lidar Import", start, cmd_lidar(&input, &options, output.as_deref(), &config));
        }
        Commands::Mwr { input, resample, processor, all_processors, output } => {
            let mut mwr = config.mwr.clone();
            if all_processors {
                mwr.processor = None;
            } else if processor.is_some() {
                mwr.processor = processor;
            }
            let options = MwrOptions {
                resample,
                attrs: Attrs::new(),
            };
            finish("Radiometer Import", start, cmd_mwr(&input, &options, output.as_deref(), &mwr));
        }
        Commands::Wind { input, start: from, end: to, output } => {
            let window = from.zip(to);
            finish("Wind Regression", start, cmd_wind(&input, window, output.as_deref(), &config));
        }
        Commands::Balloon { input, output } => {
            finish("Balloon Import", start, cmd_balloon(&input, output.as_deref()));
        }
        Commands::Skewt { input, output, time_index } => {
            finish("Skew-T", start, cmd_skewt(&input, &output, time_index, &config));
        }
        Commands::DecodeRrs { bufr_in, outputs, outdir } => {
            finish("RRS Decode", start, cmd_decode_rrs(&bufr_in, &outputs, &outdir, &config));
        }
    }
}

fn cmd_lidar(
    input: &Path,
    options: &LidarOptions,
    output: Option<&Path>,
    config: &PipelineConfig,
) -> Result<Vec<(&'static str, String)>> {
    let spinner = create_spinner("Loading lidar data...");
    let ds = lidar_from_csv(input, options, Some(&config.lidar));
    spinner.finish_and_clear();
    let ds = ds.with_context(|| format!("Failed to import {}", input.display()))?;

    let rows = export(&ds, output, Some("RWS"))?;
    let mut items = dataset_items(input, &ds);
    items.push(("Scan attributes", ds.attrs.keys().filter(|k| k.starts_with("scan_")).count().to_string()));
    if let Some(rows) = rows {
        items.push(("Rows written", rows.to_string()));
    }
    Ok(items)
}

fn cmd_mwr(
    input: &Path,
    options: &MwrOptions,
    output: Option<&Path>,
    config: &crate::config::MwrConfig,
) -> Result<Vec<(&'static str, String)>> {
    let spinner = create_spinner("Loading radiometer data...");
    let ds = mwr_from_csv(input, options, Some(config));
    spinner.finish_and_clear();
    let ds = ds.with_context(|| format!("Failed to import {}", input.display()))?;

    let reference = if options.resample { None } else { Some("Measurement") };
    let rows = export(&ds, output, reference)?;
    let mut items = dataset_items(input, &ds);
    items.push((
        "LV2 Processor",
        config.processor.clone().unwrap_or_else(|| "all".to_string()),
    ));
    if let Some(rows) = rows {
        items.push(("Rows written", rows.to_string()));
    }
    Ok(items)
}

fn cmd_wind(
    input: &Path,
    window: Option<(NaiveDateTime, NaiveDateTime)>,
    output: Option<&Path>,
    config: &PipelineConfig,
) -> Result<Vec<(&'static str, String)>> {
    let spinner = create_spinner("Fitting wind vectors...");
    let result = lidar_from_csv(input, &LidarOptions::default(), Some(&config.lidar))
        .with_context(|| format!("Failed to import {}", input.display()))
        .and_then(|lidar| {
            wind_regression_dataset(&lidar, window, Some(&config.regression)).context("Wind regression failed")
        });
    spinner.finish_and_clear();
    let ds = result?;

    let fitted = ds
        .var("Wind SE")
        .and_then(|v| v.float_2d())
        .map_or(0, |se| se.rows().into_iter().filter(|row| !row.iter().all(|v| v.is_nan())).count());

    let rows = export(&ds, output, Some("Wind"))?;
    let mut items = dataset_items(input, &ds);
    items.push(("Fitted range gates", fitted.to_string()));
    if let Some((from, to)) = window {
        items.push(("Window", format!("{} to {}", from, to)));
    }
    if let Some(rows) = rows {
        items.push(("Rows written", rows.to_string()));
    }
    Ok(items)
}

fn cmd_balloon(input: &Path, output: Option<&Path>) -> Result<Vec<(&'static str, String)>> {
    let spinner = create_spinner("Loading balloon flight...");
    let ds = weather_balloon(input);
    spinner.finish_and_clear();
    let ds = ds.with_context(|| format!("Failed to import {}", input.display()))?;

    let rows = export(&ds, output, None)?;
    let mut items = dataset_items(input, &ds);
    if let Some(flight) = ds.attrs.get("Flight") {
        items.push(("Flight", flight.to_string()));
    }
    if let Some(rows) = rows {
        items.push(("Rows written", rows.to_string()));
    }
    Ok(items)
}

fn cmd_skewt(
    input: &Path,
    output: &Path,
    time_index: usize,
    config: &PipelineConfig,
) -> Result<Vec<(&'static str, String)>> {
    let mut mwr = config.mwr.clone();
    if mwr.processor.is_none() {
        warn!("Skew-T needs a single LV2 processor, using Zenith");
        mwr.processor = Some("Zenith".to_string());
    }
    let options = MwrOptions {
        resample: true,
        attrs: Attrs::new(),
    };

    let spinner = create_spinner("Rendering skew-T...");
    let result = mwr_from_csv(input, &options, Some(&mwr))
        .with_context(|| format!("Failed to import {}", input.display()))
        .and_then(|ds| {
            let profile = SkewTProfile::from_dataset(
                &ds,
                time_index,
                "Temperature",
                "Relative Humidity",
                None,
                Some(&config.plot),
            )?;
            plot_skewt(output, &profile, Some(&config.plot))?;
            Ok(profile)
        });
    spinner.finish_and_clear();
    let profile = result?;

    Ok(vec![
        ("Input", input.display().to_string()),
        ("Output", output.display().to_string()),
        ("Time index", time_index.to_string()),
        ("Levels", profile.pressure_hpa.len().to_string()),
    ])
}

fn cmd_decode_rrs(
    bufr_in: &Path,
    outputs: &str,
    outdir: &str,
    config: &PipelineConfig,
) -> Result<Vec<(&'static str, String)>> {
    let spinner = create_spinner("Running RRS decoder...");
    let report = decode_rrs(bufr_in, outputs, outdir, Some(&config.decoder));
    spinner.finish_and_clear();
    let report = report.context("RRS decoding failed")?;

    Ok(vec![
        ("Input", bufr_in.display().to_string()),
        ("Decoder", config.decoder.executable.display().to_string()),
        ("Output directory", report.outdir),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_attr() {
        assert_eq!(parse_attr("site = Albany").unwrap(), ("site".to_string(), "Albany".to_string()));
        assert!(parse_attr("no separator").is_err());
    }

    #[test]
    fn test_parse_wind_window() {
        let cli = Cli::try_parse_from([
            "wxprofilers",
            "wind",
            "radial.csv",
            "--start",
            "2017-01-01 00:00:00",
            "--end",
            "2017-01-01 00:10:00",
        ])
        .unwrap();
        match cli.command {
            Commands::Wind { start, end, .. } => {
                assert!(start.is_some() && end.is_some());
                assert!(start < end);
            }
            _ => panic!("expected wind subcommand"),
        }

        assert!(Cli::try_parse_from(["wxprofilers", "wind", "radial.csv", "--start", "2017-01-01"]).is_err());
    }

    #[test]
    fn test_export_without_output_is_noop() {
        let ds = Dataset::new();
        assert_eq!(export(&ds, None, None).unwrap(), None);
        assert!(export(&ds, Some(Path::new("unused.csv")), None).is_err());
    }
}
