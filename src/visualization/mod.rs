//! Skew-T diagrams for temperature and humidity profiles.
//!
//! Heights are converted to pressure with an exponential atmosphere, the
//! dewpoint is estimated from relative humidity, and the result is drawn on a
//! skew-T/log-p grid with the plotters library.

use std::path::Path;

use plotters::coord::cartesian::Cartesian2d;
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::config::PlotConfig;
use crate::core::dataset::{Dataset, DatasetError};

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Empty profile")]
    EmptyProfile,

    #[error("Profile lengths differ: {0}")]
    LengthMismatch(String),

    #[error("No 1-D '{0}' profile over Range")]
    MissingProfile(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Pressure at the bottom edge of the diagram (hPa).
const P_BOTTOM: f64 = 1050.0;

/// Pressure at the top edge of the diagram (hPa).
const P_TOP: f64 = 100.0;

/// Reference pressure for potential temperature and moist adiabats (hPa).
const P_REFERENCE: f64 = 1000.0;

/// Temperature span along the bottom edge (°C).
const T_MIN: f64 = -40.0;
const T_MAX: f64 = 50.0;

/// Horizontal shift of isotherms per unit of ln(p) (°C).
const SKEW: f64 = 35.0;

const ZERO_CELSIUS: f64 = 273.15;
const RD: f64 = 287.04;
const CP: f64 = 1005.7;
const LV: f64 = 2.501e6;
const EPSILON: f64 = 0.622;
const KAPPA: f64 = RD / CP;
const KNOTS_PER_MS: f64 = 1.943_844;

const ISOBARS: &[f64] = &[1000.0, 850.0, 700.0, 500.0, 400.0, 300.0, 250.0, 200.0, 150.0, 100.0];

const TEMPERATURE_COLOR: RGBColor = RGBColor(214, 39, 40);
const DEWPOINT_COLOR: RGBColor = RGBColor(44, 160, 44);
const DRY_ADIABAT_COLOR: RGBColor = RGBColor(205, 133, 63);
const MOIST_ADIABAT_COLOR: RGBColor = RGBColor(70, 130, 180);
const GRID_COLOR: RGBColor = RGBColor(190, 190, 190);

/// Pressure (hPa) at a height (km) in an exponential atmosphere.
pub fn height_to_pressure(height_km: f64, surface_pressure_hpa: f64, scale_height_km: f64) -> f64 {
    surface_pressure_hpa * (-height_km / scale_height_km).exp()
}

/// Dewpoint (°C) estimated from temperature (K) and relative humidity (%).
pub fn dewpoint_from_rh(temperature_k: f64, relative_humidity: f64) -> f64 {
    temperature_k - (100.0 - relative_humidity) / 5.0 - ZERO_CELSIUS
}

/// Temperature (°C) along the dry adiabat with potential temperature `theta_k`.
pub fn dry_adiabat(theta_k: f64, pressures: &[f64]) -> Vec<f64> {
    pressures
        .iter()
        .map(|p| theta_k * (p / P_REFERENCE).powf(KAPPA) - ZERO_CELSIUS)
        .collect()
}

fn saturation_vapor_pressure(temperature_c: f64) -> f64 {
    6.112 * (17.67 * temperature_c / (temperature_c + 243.5)).exp()
}

/// Saturated lapse rate dT/dp (K/hPa).
fn moist_lapse_rate(pressure: f64, temperature_k: f64) -> f64 {
    let es = saturation_vapor_pressure(temperature_k - ZERO_CELSIUS);
    let rs = EPSILON * es / (pressure - es);
    let numerator = RD * temperature_k + LV * rs;
    let denominator = CP + LV * LV * rs * EPSILON / (RD * temperature_k * temperature_k);
    numerator / denominator / pressure
}

/// Temperature (°C) along the moist adiabat through `start_c` at 1000 hPa.
///
/// Pressures must be monotonic; the lapse rate is integrated with the
/// midpoint method in steps of at most 5 hPa.
pub fn moist_adiabat(start_c: f64, pressures: &[f64]) -> Vec<f64> {
    let mut p = P_REFERENCE;
    let mut t = start_c + ZERO_CELSIUS;
    let mut out = Vec::with_capacity(pressures.len());

    for &target in pressures {
        let steps = ((target - p).abs() / 5.0).ceil().max(1.0) as usize;
        let dp = (target - p) / steps as f64;
        for _ in 0..steps {
            let half = t + 0.5 * dp * moist_lapse_rate(p, t);
            t += dp * moist_lapse_rate(p + 0.5 * dp, half);
            p += dp;
        }
        out.push(t - ZERO_CELSIUS);
    }
    out
}

/// Number of (pennants, full barbs, half barbs) for a wind speed in knots,
/// rounded to the nearest 5 knots.
pub fn barb_counts(speed_knots: f64) -> (usize, usize, usize) {
    let rounded = ((speed_knots / 5.0).round() * 5.0) as usize;
    (rounded / 50, (rounded % 50) / 10, (rounded % 10) / 5)
}

/// A sounding ready for plotting.
#[derive(Debug, Clone, PartialEq)]
pub struct SkewTProfile {
    pub pressure_hpa: Vec<f64>,
    pub temperature_c: Vec<f64>,
    pub dewpoint_c: Vec<f64>,
    /// Eastward and northward wind (m/s) at every level.
    pub wind: Option<(Vec<f64>, Vec<f64>)>,
}

impl SkewTProfile {
    /// Build a sounding from height (km), temperature (K) and relative
    /// humidity (%) profiles, with optional u/v wind.
    ///
    /// # Errors
    ///
    /// Returns an error if the profiles are empty or have different lengths.
    pub fn from_profiles(
        heights_km: &[f64],
        temperature_k: &[f64],
        relative_humidity: &[f64],
        wind: Option<(&[f64], &[f64])>,
        config: Option<&PlotConfig>,
    ) -> Result<Self> {
        let default_config = PlotConfig::default();
        let config = config.unwrap_or(&default_config);

        let n = heights_km.len();
        if n == 0 {
            return Err(VisualizationError::EmptyProfile);
        }
        let mut lengths = vec![temperature_k.len(), relative_humidity.len()];
        if let Some((u, v)) = wind {
            lengths.extend([u.len(), v.len()]);
        }
        if lengths.iter().any(|&len| len != n) {
            return Err(VisualizationError::LengthMismatch(format!(
                "{} heights, other profiles {:?}",
                n, lengths
            )));
        }

        Ok(Self {
            pressure_hpa: heights_km
                .iter()
                .map(|&h| height_to_pressure(h, config.surface_pressure_hpa, config.scale_height_km))
                .collect(),
            temperature_c: temperature_k.iter().map(|t| t - ZERO_CELSIUS).collect(),
            dewpoint_c: temperature_k
                .iter()
                .zip(relative_humidity)
                .map(|(&t, &rh)| dewpoint_from_rh(t, rh))
                .collect(),
            wind: wind.map(|(u, v)| (u.to_vec(), v.to_vec())),
        })
    }

    /// Build a sounding from one time step of a (Time × Range) dataset such
    /// as the resampled radiometer output. Range must be in km.
    pub fn from_dataset(
        ds: &Dataset,
        time_index: usize,
        temperature: &str,
        relative_humidity: &str,
        wind: Option<(&str, &str)>,
        config: Option<&PlotConfig>,
    ) -> Result<Self> {
        let step = ds.isel("Time", time_index)?;
        let profile = |name: &str| -> Result<Vec<f64>> {
            step.coord(name)
                .or_else(|| step.var(name))
                .filter(|v| v.dims == ["Range"])
                .and_then(|v| v.values.as_float())
                .map(|values| values.iter().copied().collect())
                .ok_or_else(|| VisualizationError::MissingProfile(name.to_string()))
        };

        let heights = profile("Range")?;
        let t = profile(temperature)?;
        let rh = profile(relative_humidity)?;
        let uv = match wind {
            Some((u, v)) => Some((profile(u)?, profile(v)?)),
            None => None,
        };
        Self::from_profiles(
            &heights,
            &t,
            &rh,
            uv.as_ref().map(|(u, v)| (u.as_slice(), v.as_slice())),
            config,
        )
    }
}

/// Vertical diagram coordinate of a pressure level.
fn log_pressure(pressure: f64) -> f64 {
    (P_BOTTOM / pressure).ln()
}

/// Diagram coordinates (skewed temperature, log-pressure) of a point.
fn skew_point(temperature_c: f64, pressure: f64) -> (f64, f64) {
    let y = log_pressure(pressure);
    (temperature_c + SKEW * y, y)
}

/// Split a line into the runs that lie inside the diagram.
fn clip_segments(points: impl IntoIterator<Item = (f64, f64)>) -> Vec<Vec<(f64, f64)>> {
    let y_top = log_pressure(P_TOP);
    let mut segments = Vec::new();
    let mut current = Vec::new();
    for (x, y) in points {
        let inside = x.is_finite() && y.is_finite() && (T_MIN..=T_MAX).contains(&x) && (0.0..=y_top).contains(&y);
        if inside {
            current.push((x, y));
        } else if !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments.retain(|s| s.len() > 1);
    segments
}

fn plot_err<E: std::fmt::Display>(e: E) -> VisualizationError {
    VisualizationError::PlottingError(e.to_string())
}

/// Pressure levels used to trace background lines.
fn trace_levels() -> Vec<f64> {
    let mut levels = Vec::new();
    let mut p = P_BOTTOM;
    while p >= P_TOP {
        levels.push(p);
        p -= 10.0;
    }
    levels
}

/// Render a skew-T diagram to a PNG file.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `profile` - Sounding to draw
/// * `config` - Image size (uses defaults if None)
///
/// Temperature is drawn in red, dewpoint in green, over dry and moist
/// adiabats; wind barbs are placed at 90% of the plot width when the
/// profile has wind.
pub fn plot_skewt(output_path: &Path, profile: &SkewTProfile, config: Option<&PlotConfig>) -> Result<()> {
    let default_config = PlotConfig::default();
    let config = config.unwrap_or(&default_config);

    if profile.pressure_hpa.is_empty() {
        return Err(VisualizationError::EmptyProfile);
    }

    let root = BitMapBackend::new(output_path, (config.width, config.height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(T_MIN..T_MAX, 0.0..log_pressure(P_TOP))
        .map_err(plot_err)?;

    draw_background(&mut chart)?;

    let trace = |values: &[f64]| {
        clip_segments(
            profile
                .pressure_hpa
                .iter()
                .zip(values)
                .map(|(&p, &t)| skew_point(t, p)),
        )
    };
    for segment in trace(&profile.temperature_c) {
        chart
            .draw_series(LineSeries::new(segment, TEMPERATURE_COLOR.stroke_width(3)))
            .map_err(plot_err)?;
    }
    for segment in trace(&profile.dewpoint_c) {
        chart
            .draw_series(LineSeries::new(segment, DEWPOINT_COLOR.stroke_width(3)))
            .map_err(plot_err)?;
    }

    if let Some((u, v)) = &profile.wind {
        let (x_pixels, _) = chart.plotting_area().get_pixel_range();
        let x = x_pixels.start + ((x_pixels.end - x_pixels.start) as f64 * 0.9) as i32;
        for ((&p, &u), &v) in profile.pressure_hpa.iter().zip(u).zip(v) {
            if !(P_TOP..=P_BOTTOM).contains(&p) || !u.is_finite() || !v.is_finite() {
                continue;
            }
            let (_, y) = chart.backend_coord(&(T_MIN, log_pressure(p)));
            draw_barb(&root, (x, y), u, v)?;
        }
    }

    root.present().map_err(plot_err)?;
    log::info!("Saved skew-T to {}", output_path.display());
    Ok(())
}

type SkewChart<'a, 'b> = ChartContext<'a, BitMapBackend<'b>, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

fn draw_background(chart: &mut SkewChart<'_, '_>) -> Result<()> {
    let levels = trace_levels();
    let y_top = log_pressure(P_TOP);

    for &p in ISOBARS {
        let y = log_pressure(p);
        chart
            .draw_series(LineSeries::new(vec![(T_MIN, y), (T_MAX, y)], &GRID_COLOR))
            .map_err(plot_err)?;
    }

    // Isotherms every 10 °C, including those that only enter the diagram aloft.
    let mut t = T_MIN - SKEW * y_top;
    while t <= T_MAX {
        let line = levels.iter().map(|&p| skew_point(t, p));
        for segment in clip_segments(line) {
            chart
                .draw_series(LineSeries::new(segment, &GRID_COLOR))
                .map_err(plot_err)?;
        }
        t += 10.0;
    }

    let mut theta = ZERO_CELSIUS - 30.0;
    while theta <= ZERO_CELSIUS + 200.0 {
        let temps = dry_adiabat(theta, &levels);
        let line = levels.iter().zip(temps).map(|(&p, t)| skew_point(t, p));
        for segment in clip_segments(line) {
            chart
                .draw_series(LineSeries::new(segment, &DRY_ADIABAT_COLOR.mix(0.6)))
                .map_err(plot_err)?;
        }
        theta += 10.0;
    }

    let mut start = -20.0;
    while start <= 40.0 {
        let temps = moist_adiabat(start, &levels);
        let line = levels.iter().zip(temps).map(|(&p, t)| skew_point(t, p));
        for segment in clip_segments(line) {
            chart
                .draw_series(LineSeries::new(segment, &MOIST_ADIABAT_COLOR.mix(0.6)))
                .map_err(plot_err)?;
        }
        start += 5.0;
    }
    Ok(())
}

/// Draw one wind barb in pixel space. The staff points into the wind.
fn draw_barb(root: &DrawingArea<BitMapBackend<'_>, Shift>, origin: (i32, i32), u: f64, v: f64) -> Result<()> {
    const STAFF: f64 = 40.0;
    const FLAG: f64 = 15.0;
    const SPACING: f64 = 6.0;

    let speed = (u * u + v * v).sqrt() * KNOTS_PER_MS;
    let (pennants, full, half) = barb_counts(speed);
    if pennants + full + half == 0 {
        return root
            .draw(&Circle::new(origin, 4, BLACK.stroke_width(1)))
            .map_err(plot_err);
    }

    // Screen y grows downwards.
    let norm = (u * u + v * v).sqrt();
    let dir = (-u / norm, v / norm);
    let perp = (-dir.1, dir.0);
    let at = |along: f64, side: f64| {
        (
            origin.0 + (dir.0 * along + perp.0 * side).round() as i32,
            origin.1 + (dir.1 * along + perp.1 * side).round() as i32,
        )
    };

    let style = BLACK.stroke_width(2);
    root.draw(&PathElement::new(vec![origin, at(STAFF, 0.0)], style))
        .map_err(plot_err)?;

    let mut along = STAFF;
    for _ in 0..pennants {
        root.draw(&Polygon::new(
            vec![at(along, 0.0), at(along - SPACING, FLAG), at(along - 2.0 * SPACING, 0.0)],
            BLACK.filled(),
        ))
        .map_err(plot_err)?;
        along -= 2.0 * SPACING + 2.0;
    }
    for _ in 0..full {
        root.draw(&PathElement::new(vec![at(along, 0.0), at(along + SPACING, FLAG)], style))
            .map_err(plot_err)?;
        along -= SPACING;
    }
    if half > 0 {
        if along == STAFF {
            along -= SPACING;
        }
        root.draw(&PathElement::new(
            vec![at(along, 0.0), at(along + SPACING / 2.0, FLAG / 2.0)],
            style,
        ))
        .map_err(plot_err)?;
    }
    Ok(())
}
