//! Wind vector reconstruction from lidar radial velocities.
//!
//! Every line of sight (LOS) measures the projection of the 3-D wind onto
//! its beam direction. With at least three well-spread beams the wind vector
//! for a range gate follows from an ordinary least-squares fit:
//!
//! ```text
//! -RWS_i = sin(az_i)cos(el_i)·x + cos(az_i)cos(el_i)·y + sin(el_i)·z
//! ```
//!
//! Range gates are fitted independently and in parallel with `rayon`.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::RegressionConfig;
use crate::core::dataset::{Dataset, DatasetError, Values, Variable};

/// Errors that can occur while setting up the regression.
#[derive(Debug, Error)]
pub enum RegressionError {
    #[error("{rows} measurement rows but {los} LOS ids")]
    LosMismatch { rows: usize, los: usize },

    #[error("{columns} range columns but {ranges} range labels")]
    RangeMismatch { columns: usize, ranges: usize },

    #[error("Dataset has no usable '{0}'")]
    MissingVariable(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Result type for regression operations.
pub type Result<T> = std::result::Result<T, RegressionError>;

/// Fitted wind components and their standard errors for one range gate.
///
/// A component whose standard error failed the quality gate is NaN while
/// its standard error is still reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindEstimate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub xse: f64,
    pub yse: f64,
    pub zse: f64,
}

impl WindEstimate {
    /// Estimate for a gate that could not be fitted.
    pub const UNDEFINED: WindEstimate = WindEstimate {
        x: f64::NAN,
        y: f64::NAN,
        z: f64::NAN,
        xse: f64::NAN,
        yse: f64::NAN,
        zse: f64::NAN,
    };

    /// Whether a fit was attempted for this gate.
    pub fn is_fitted(&self) -> bool {
        !(self.xse.is_nan() && self.yse.is_nan() && self.zse.is_nan())
    }

    pub fn components(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn standard_errors(&self) -> [f64; 3] {
        [self.xse, self.yse, self.zse]
    }
}

/// Wind estimates for every range gate.
#[derive(Debug, Clone)]
pub struct WindFit {
    pub ranges: Vec<f64>,
    pub estimates: Vec<WindEstimate>,
}

impl WindFit {
    /// Number of gates with a fitted estimate.
    pub fn fitted_count(&self) -> usize {
        self.estimates.iter().filter(|e| e.is_fitted()).count()
    }

    /// Convert to a (Range × Component) dataset with `Wind` and `Wind SE` variables.
    pub fn to_dataset(&self) -> Result<Dataset> {
        let n = self.estimates.len();
        let wind = Array2::from_shape_fn((n, 3), |(r, c)| self.estimates[r].components()[c]);
        let se = Array2::from_shape_fn((n, 3), |(r, c)| self.estimates[r].standard_errors()[c]);

        let mut ds = Dataset::new();
        ds.set_coord(
            "Range",
            Variable::new(["Range"], Values::Float(Array1::from(self.ranges.clone()).into_dyn()))
                .with_attr("standard_name", "height")
                .with_attr("units", "m"),
        )?;
        let components: Vec<String> = ["x", "y", "z"].iter().map(|s| s.to_string()).collect();
        ds.set_coord(
            "Component",
            Variable::new(["Component"], Values::Text(Array1::from(components).into_dyn())),
        )?;
        ds.set_var(
            "Wind",
            Variable::new(["Range", "Component"], Values::Float(wind.into_dyn()))
                .with_attr("long_name", "wind speed")
                .with_attr("units", "m/s"),
        )?;
        ds.set_var(
            "Wind SE",
            Variable::new(["Range", "Component"], Values::Float(se.into_dyn()))
                .with_attr("long_name", "standard error of wind speed")
                .with_attr("units", "m/s"),
        )?;
        Ok(ds)
    }
}

/// Unit beam vectors (x, y, z) for each LOS id.
///
/// Azimuth is `los × 90°`; the vertical beam points straight up, all others
/// use the configured elevation.
pub fn los_geometry(los: &[i64], config: &RegressionConfig) -> Vec<[f64; 3]> {
    let slanted = config.elevation_deg.to_radians();
    los.iter()
        .map(|&id| {
            let az = id as f64 * std::f64::consts::FRAC_PI_2;
            let el = if id == config.vertical_los {
                std::f64::consts::FRAC_PI_2
            } else {
                slanted
            };
            [az.sin() * el.cos(), az.cos() * el.cos(), el.sin()]
        })
        .collect()
}

/// Whether a set of distinct LOS ids can resolve all three components.
///
/// Fewer than three beams never can. With exactly three, both horizontal
/// axes need a beam: one of LOS 0/2 and one of LOS 1/3.
pub fn has_sufficient_geometry(distinct: &BTreeSet<i64>) -> bool {
    match distinct.len() {
        0..=2 => false,
        3 => {
            let has = |id| distinct.contains(&id);
            (has(0) || has(2)) && (has(1) || has(3))
        }
        _ => true,
    }
}

/// OLS fit of one range gate. `None` when the normal matrix is singular.
fn fit_gate(geometry: &[[f64; 3]], observations: &[f64], max_se: f64) -> Option<WindEstimate> {
    let n = observations.len();
    let x = DMatrix::from_fn(n, 3, |i, j| geometry[i][j]);
    let y = DVector::from_column_slice(observations);

    let xt = x.transpose();
    let inverse = (&xt * &x).try_inverse()?;
    let beta = &inverse * (&xt * &y);

    let residuals = &y - &x * &beta;
    // n == 3 leaves no degrees of freedom: the variance is 0/0 and every component is dropped
    let variance = residuals.norm_squared() / (n as f64 - 3.0);
    let se: Vec<f64> = (0..3).map(|j| (variance * inverse[(j, j)]).sqrt()).collect();

    let gate = |coef: f64, se: f64| {
        if se.is_finite() && se <= max_se {
            coef
        } else {
            f64::NAN
        }
    };

    Some(WindEstimate {
        x: gate(beta[0], se[0]),
        y: gate(beta[1], se[1]),
        z: gate(beta[2], se[2]),
        xse: se[0],
        yse: se[1],
        zse: se[2],
    })
}

/// Fit a wind vector for every range gate.
///
/// # Arguments
///
/// * `rws` - Radial wind speeds, shape (measurements, range gates); NaN marks missing
/// * `los` - LOS id of each measurement row
/// * `ranges` - Range label of each column
/// * `config` - Beam elevation, standard-error limit and vertical LOS (defaults if None)
///
/// # Returns
///
/// One [`WindEstimate`] per gate. Gates without enough distinct, well-spread
/// lines of sight are [`WindEstimate::UNDEFINED`].
///
/// # Errors
///
/// Returns an error if the LOS ids or range labels do not match the matrix shape.
pub fn wind_regression(
    rws: ArrayView2<'_, f64>,
    los: &[i64],
    ranges: &[f64],
    config: Option<&RegressionConfig>,
) -> Result<WindFit> {
    let default_config = RegressionConfig::default();
    let config = config.unwrap_or(&default_config);

    if rws.nrows() != los.len() {
        return Err(RegressionError::LosMismatch {
            rows: rws.nrows(),
            los: los.len(),
        });
    }
    if rws.ncols() != ranges.len() {
        return Err(RegressionError::RangeMismatch {
            columns: rws.ncols(),
            ranges: ranges.len(),
        });
    }

    let geometry = los_geometry(los, config);

    let estimates: Vec<WindEstimate> = (0..rws.ncols())
        .into_par_iter()
        .map(|col| {
            let column = rws.column(col);
            let mut rows = Vec::with_capacity(column.len());
            let mut observations = Vec::with_capacity(column.len());
            let mut distinct = BTreeSet::new();

            for (i, &v) in column.iter().enumerate() {
                if v.is_nan() {
                    continue;
                }
                rows.push(geometry[i]);
                observations.push(-v);
                distinct.insert(los[i]);
            }

            if !has_sufficient_geometry(&distinct) {
                return WindEstimate::UNDEFINED;
            }
            fit_gate(&rows, &observations, config.max_se).unwrap_or(WindEstimate::UNDEFINED)
        })
        .collect();

    let fit = WindFit {
        ranges: ranges.to_vec(),
        estimates,
    };
    log::debug!(
        "Wind regression: {} of {} range gates fitted",
        fit.fitted_count(),
        fit.ranges.len()
    );
    Ok(fit)
}

/// Run [`wind_regression`] on a lidar dataset.
///
/// Uses the `RWS` variable over (Time × Range) and the `LOS` coordinate,
/// restricted to profiles with `start <= Time < end` when a window is given.
pub fn wind_regression_dataset(
    ds: &Dataset,
    window: Option<(NaiveDateTime, NaiveDateTime)>,
    config: Option<&RegressionConfig>,
) -> Result<Dataset> {
    let rws_var = ds
        .var("RWS")
        .filter(|v| v.dims == ["Time", "Range"])
        .ok_or_else(|| RegressionError::MissingVariable("RWS".to_string()))?;
    let rws = rws_var
        .float_2d()
        .ok_or_else(|| RegressionError::MissingVariable("RWS".to_string()))?;
    let los = ds
        .coord("LOS")
        .and_then(|v| v.values.as_int())
        .ok_or_else(|| RegressionError::MissingVariable("LOS".to_string()))?;
    let ranges = ds
        .coord("Range")
        .and_then(|v| v.values.as_float())
        .ok_or_else(|| RegressionError::MissingVariable("Range".to_string()))?;
    let times = ds
        .coord("Time")
        .and_then(|v| v.values.as_time())
        .ok_or_else(|| RegressionError::MissingVariable("Time".to_string()))?;

    let selected: Vec<usize> = times
        .iter()
        .enumerate()
        .filter(|(_, t)| match (window, t) {
            (None, _) => true,
            (Some((start, end)), Some(t)) => *t >= start && *t < end,
            (Some(_), None) => false,
        })
        .map(|(i, _)| i)
        .collect();

    let subset = rws.select(Axis(0), &selected);
    let subset_los: Vec<i64> = selected.iter().map(|&i| los[[i].as_slice()]).collect();
    let ranges: Vec<f64> = ranges.iter().copied().collect();

    let mut out = wind_regression(subset.view(), &subset_los, &ranges, config)?.to_dataset()?;
    if let Some((start, end)) = window {
        out.attrs.insert("window_start".into(), start.to_string().into());
        out.attrs.insert("window_end".into(), end.to_string().into());
    }
    Ok(out)
}
