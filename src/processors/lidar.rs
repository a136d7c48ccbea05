//! Scanning wind lidar importer.
//!
//! The lidar exports one CSV row per (timestamp, range gate) with the radial
//! wind measurements and the beam geometry of that profile. This module
//! pivots those rows into a (Time × Range) dataset, optionally adding the
//! scan definition from the XML sidecar and the reconstructed wind
//! components from the separate wind CSV.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use ndarray::{Array1, Array2, Array3};
use thiserror::Error;

use crate::config::LidarConfig;
use crate::core::dataset::{AttrValue, Attrs, Dataset, DatasetError, Values, Variable};
use crate::core::loaders::{load_table, parse_timestamp, LoaderError};
use crate::core::transforms::{nearest_within, pivot, time_distance, Grid, TransformError};
use crate::processors::scan::{read_scan_attributes, ScanError};

/// Errors that can occur while importing lidar data.
#[derive(Debug, Error)]
pub enum LidarError {
    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error("Failed to grid lidar data: {0}")]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("Failed to read scan configuration: {0}")]
    Scan(#[from] ScanError),
}

/// Result type for lidar operations.
pub type Result<T> = std::result::Result<T, LidarError>;

const TIMESTAMP: &str = "Timestamp";
const RANGE: &str = "Range [m]";
const LOS_ID: &str = "LOS ID";
const CONFIGURATION_ID: &str = "Configuration ID";
const AZIMUTH: &str = "Azimuth [°]";
const ELEVATION: &str = "Elevation [°]";

const WIND_TIMESTAMP: &str = "TimeStamp";
const WIND_X: &str = "X-Wind Speed [m/s]";
const WIND_Y: &str = "Y-Wind Speed [m/s]";
const WIND_Z: &str = "Z-Wind Speed [m/s]";

/// Measurement columns: (CSV header, variable name, attributes).
const MEASUREMENTS: &[(&str, &str, &[(&str, &str)])] = &[
    (
        "RWS [m/s]",
        "RWS",
        &[("long_name", "radial wind speed"), ("units", "m/s")],
    ),
    (
        "DRWS [m/s]",
        "DRWS",
        &[("long_name", "deviation of radial wind speed"), ("units", "m/s")],
    ),
    (
        "CNR [db]",
        "CNR",
        &[("long_name", "carrier to noise ratio"), ("units", "dB")],
    ),
    (
        "Confidence Index [%]",
        "Confidence",
        &[("standard_name", "confidence index"), ("units", "percent")],
    ),
    ("Mean Error", "Error", &[("long_name", "mean error")]),
    ("Status", "Status", &[("long_name", "status")]),
];

/// Optional inputs for [`lidar_from_csv`].
#[derive(Debug, Clone, Default)]
pub struct LidarOptions {
    /// Scan configuration XML sidecar.
    pub scans: Option<PathBuf>,
    /// Select the scan element by its `id` attribute instead of by position.
    pub scan_id: Option<String>,
    /// Wind component CSV to merge.
    pub wind: Option<PathBuf>,
    /// Initial dataset attributes; scan attributes override same-named keys.
    pub attrs: Attrs,
}

fn with_attrs(mut var: Variable, attrs: &[(&str, &str)]) -> Variable {
    for (key, value) in attrs {
        var.set_attr(key, *value);
    }
    var
}

/// Load a lidar radial-wind CSV into a (Time × Range) dataset.
///
/// # Arguments
///
/// * `path` - Path to the radial wind CSV
/// * `options` - Scan sidecar, wind CSV and initial attributes
/// * `config` - Lidar configuration (uses defaults if None)
///
/// # Returns
///
/// A dataset with `Time` and `Range` dimensions. Measurement columns present
/// in the file become data variables (`RWS`, `DRWS`, `CNR`, `Confidence`,
/// `Error`, `Status`); the beam geometry becomes per-profile coordinates
/// (`LOS`, `Configuration ID`, `Azimuth`, `Elevation`). With a wind CSV a
/// `Component` dimension and a `Windspeed` variable are added.
///
/// `Status` is boolean; grid cells with no row in the file are `false`
/// rather than set.
///
/// # Errors
///
/// Returns an error if a file cannot be read, a required column is missing,
/// a value cannot be parsed, or a (timestamp, range) pair occurs twice.
pub fn lidar_from_csv<P: AsRef<Path>>(
    path: P,
    options: &LidarOptions,
    config: Option<&LidarConfig>,
) -> Result<Dataset> {
    let path = path.as_ref();
    let default_config = LidarConfig::default();
    let config = config.unwrap_or(&default_config);

    let table = load_table(path, b',', 0)?;
    let times = table.times(table.column(TIMESTAMP)?)?;
    let ranges = table.floats(table.column(RANGE)?)?;
    let grid = pivot(&times, &ranges)?;
    let (n_time, n_range) = grid.shape();
    log::debug!("{}: {} profiles x {} range gates", path.display(), n_time, n_range);

    let mut attrs = options.attrs.clone();
    if let Some(scans) = &options.scans {
        let scan_attrs = read_scan_attributes(scans, options.scan_id.as_deref(), &config.scan_path)?;
        for (key, value) in scan_attrs {
            attrs.insert(format!("scan_{}", key), AttrValue::Text(value));
        }
    }
    let mut ds = Dataset::with_attrs(attrs);

    let time_axis: Vec<Option<NaiveDateTime>> = grid.rows.iter().copied().map(Some).collect();
    ds.set_coord(
        "Time",
        Variable::new(["Time"], Values::Time(Array1::from(time_axis).into_dyn()))
            .with_attr("standard_name", "time"),
    )?;
    ds.set_coord(
        "Range",
        with_attrs(
            Variable::new(["Range"], Values::Float(Array1::from(grid.cols.clone()).into_dyn())),
            &[("standard_name", "height"), ("units", "m")],
        ),
    )?;

    // Beam geometry is constant within a profile; keep the first value per timestamp
    let los = table.ints(table.column(LOS_ID)?)?;
    let configuration = table.ints(table.column(CONFIGURATION_ID)?)?;
    let azimuth = table.floats(table.column(AZIMUTH)?)?;
    let elevation = table.floats(table.column(ELEVATION)?)?;

    ds.set_coord(
        "LOS",
        Variable::new(["Time"], Values::Int(Array1::from(grid.per_row(&los)).into_dyn())),
    )?;
    ds.set_coord(
        CONFIGURATION_ID,
        Variable::new(
            ["Time"],
            Values::Int(Array1::from(grid.per_row(&configuration)).into_dyn()),
        ),
    )?;
    ds.set_coord(
        "Azimuth",
        with_attrs(
            Variable::new(["Time"], Values::Float(Array1::from(grid.per_row(&azimuth)).into_dyn())),
            &[("standard_name", "sensor_azimuth_angle"), ("units", "degree")],
        ),
    )?;
    ds.set_coord(
        "Elevation",
        with_attrs(
            Variable::new(
                ["Time"],
                Values::Float(Array1::from(grid.per_row(&elevation)).into_dyn()),
            ),
            &[("long_name", "elevation"), ("units", "degree")],
        ),
    )?;

    for &(column, name, var_attrs) in MEASUREMENTS {
        if !table.has_column(column) {
            continue;
        }
        let raw = table.floats(table.column(column)?)?;
        let values = if name == "Status" {
            let flags: Vec<bool> = raw.iter().map(|v| !v.is_nan() && *v != 0.0).collect();
            Values::Bool(grid.fill_with(&flags, false).into_dyn())
        } else {
            Values::Float(grid.fill(&raw).into_dyn())
        };
        ds.set_var(name, with_attrs(Variable::new(["Time", "Range"], values), var_attrs))?;
    }

    if let Some(wind) = &options.wind {
        merge_wind(&mut ds, &grid, wind)?;
    }

    log::info!("Loaded lidar data from {}", path.display());
    Ok(ds)
}

/// Place the wind component CSV onto the lidar grid.
///
/// Every wind row goes to the nearest lidar timestamp and range gate. Rows
/// with an empty timestamp or range, or further off the grid than half a grid
/// step, are skipped; when several rows land in one cell the first is kept.
/// The vendor components are negated and reordered to (x, y, z) = (−Y, −X, −Z).
fn merge_wind(ds: &mut Dataset, grid: &Grid<NaiveDateTime>, path: &Path) -> Result<()> {
    let table = load_table(path, b',', 0)?;
    let time_col = table.column(WIND_TIMESTAMP)?;
    let times = (0..table.len())
        .map(|row| match table.cell(row, time_col).trim() {
            "" => Ok(None),
            cell => parse_timestamp(cell).map(Some),
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let ranges = table.floats(table.column(RANGE)?)?;
    let wind_x = table.floats(table.column(WIND_X)?)?;
    let wind_y = table.floats(table.column(WIND_Y)?)?;
    let wind_z = table.floats(table.column(WIND_Z)?)?;

    let (n_time, n_range) = grid.shape();
    let mut speed = Array3::from_elem((3, n_time, n_range), f64::NAN);
    let mut filled = Array2::from_elem((n_time, n_range), false);
    let mut inexact = 0usize;
    let mut off_grid = 0usize;
    let mut collisions = 0usize;

    for record in 0..table.len() {
        let range = ranges[record];
        let cell = times[record].and_then(|time| {
            Some((
                nearest_within(&grid.rows, &time, time_distance)?,
                nearest_within(&grid.cols, &range, |a, b| (a - b).abs())?,
                time,
            ))
        });
        let Some((r, c, time)) = cell else {
            off_grid += 1;
            continue;
        };
        if filled[[r, c]] {
            collisions += 1;
            continue;
        }
        filled[[r, c]] = true;
        if grid.rows[r] != time || grid.cols[c] != range {
            inexact += 1;
        }

        speed[[0, r, c]] = -wind_y[record];
        speed[[1, r, c]] = -wind_x[record];
        speed[[2, r, c]] = -wind_z[record];
    }

    if inexact > 0 {
        log::warn!(
            "{} of {} wind rows in {} are not on the lidar time/range grid; placed at the nearest cell",
            inexact,
            table.len(),
            path.display()
        );
    }
    if off_grid > 0 {
        log::warn!(
            "{} wind rows in {} have no timestamp or range on the lidar grid; skipped",
            off_grid,
            path.display()
        );
    }
    if collisions > 0 {
        log::warn!(
            "{} wind rows in {} share a lidar cell with an earlier row; kept the first",
            collisions,
            path.display()
        );
    }

    let components: Vec<String> = ["x", "y", "z"].iter().map(|s| s.to_string()).collect();
    ds.set_coord(
        "Component",
        Variable::new(["Component"], Values::Text(Array1::from(components).into_dyn())),
    )?;
    ds.set_var(
        "Windspeed",
        with_attrs(
            Variable::new(["Component", "Time", "Range"], Values::Float(speed.into_dyn())),
            &[("long_name", "wind speed"), ("units", "m/s")],
        ),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::Ix3;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const RWS_CSV: &str = "\
Timestamp,Configuration ID,LOS ID,Azimuth [°],Elevation [°],Range [m],RWS [m/s],DRWS [m/s],CNR [db],Confidence Index [%],Mean Error,Status
2017-01-01 00:00:00.500,1,0,0,75,100,1.5,0.1,-20,100,0.01,1
2017-01-01 00:00:00.500,1,0,0,75,150,1.6,0.1,-21,100,0.01,1
2017-01-01 00:00:01.500,1,1,90,75,150,-2.1,0.2,-23,90,0.02,1
2017-01-01 00:00:01.500,1,1,90,75,100,-2.0,0.2,-22,90,0.02,0
2017-01-01 00:00:02.500,1,4,0,90,100,0.3,0.1,-24,100,0.01,1
";

    const WIND_CSV: &str = "\
TimeStamp,Range [m],X-Wind Speed [m/s],Y-Wind Speed [m/s],Z-Wind Speed [m/s],Azimuth [°],Elevation [°],CNR [db],Confidence index [%]
2017-01-01 00:00:01.500,100,3.0,4.0,0.5,0,75,-20,100
2017-01-01 00:00:02.400,150,1.0,2.0,0.1,0,75,-20,100
";

    fn temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn at_millis(s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 1, 1)
            .unwrap()
            .and_hms_milli_opt(0, 0, s, ms)
            .unwrap()
    }

    #[test]
    fn test_lidar_grid_and_coordinates() -> Result<()> {
        let file = temp_file(RWS_CSV);
        let ds = lidar_from_csv(file.path(), &LidarOptions::default(), None)?;

        assert_eq!(ds.dim_len("Time"), Some(3));
        assert_eq!(ds.dim_len("Range"), Some(2));

        let times = ds.coord("Time").unwrap().values.as_time().unwrap();
        assert_eq!(
            times.iter().copied().collect::<Vec<_>>(),
            vec![
                Some(at_millis(0, 500)),
                Some(at_millis(1, 500)),
                Some(at_millis(2, 500))
            ]
        );
        let ranges = ds.coord("Range").unwrap().values.as_float().unwrap();
        assert_eq!(ranges.iter().copied().collect::<Vec<_>>(), vec![100.0, 150.0]);

        let rws = ds.var("RWS").unwrap().float_2d().unwrap();
        assert_eq!(rws[[0, 0]], 1.5);
        assert_eq!(rws[[0, 1]], 1.6);
        assert_eq!(rws[[1, 0]], -2.0);
        assert_eq!(rws[[1, 1]], -2.1);
        assert_eq!(rws[[2, 0]], 0.3);
        assert!(rws[[2, 1]].is_nan());

        let los = ds.coord("LOS").unwrap().values.as_int().unwrap();
        assert_eq!(los.iter().copied().collect::<Vec<_>>(), vec![0, 1, 4]);
        let azimuth = ds.coord("Azimuth").unwrap().values.as_float().unwrap();
        assert_eq!(azimuth.iter().copied().collect::<Vec<_>>(), vec![0.0, 90.0, 0.0]);

        Ok(())
    }

    #[test]
    fn test_lidar_variables_renamed_with_attributes() -> Result<()> {
        let file = temp_file(RWS_CSV);
        let ds = lidar_from_csv(file.path(), &LidarOptions::default(), None)?;

        for name in ["RWS", "DRWS", "CNR", "Confidence", "Error", "Status"] {
            assert!(ds.var(name).is_some(), "missing {}", name);
        }
        assert_eq!(ds.var("RWS").unwrap().attr_text("units"), Some("m/s"));
        assert_eq!(ds.var("CNR").unwrap().attr_text("units"), Some("dB"));
        assert_eq!(
            ds.var("Confidence").unwrap().attr_text("standard_name"),
            Some("confidence index")
        );
        assert_eq!(ds.coord("Range").unwrap().attr_text("standard_name"), Some("height"));
        assert_eq!(ds.coord("Time").unwrap().attr_text("standard_name"), Some("time"));
        assert_eq!(
            ds.coord("Azimuth").unwrap().attr_text("standard_name"),
            Some("sensor_azimuth_angle")
        );

        let status = ds.var("Status").unwrap().values.as_bool().unwrap();
        let flags: Vec<bool> = status.iter().copied().collect();
        // row-major (Time, Range); the missing cell is false
        assert_eq!(flags, vec![true, true, false, true, true, false]);

        Ok(())
    }

    #[test]
    fn test_lidar_optional_columns_absent() -> Result<()> {
        let file = temp_file(
            "Timestamp,Configuration ID,LOS ID,Azimuth [°],Elevation [°],Range [m],RWS [m/s]\n\
             2017-01-01 00:00:00,1,0,0,75,100,1.0\n",
        );
        let ds = lidar_from_csv(file.path(), &LidarOptions::default(), None)?;
        assert!(ds.var("RWS").is_some());
        assert!(ds.var("CNR").is_none());
        assert!(ds.var("Status").is_none());
        Ok(())
    }

    #[test]
    fn test_lidar_missing_required_column() {
        let file = temp_file("Timestamp,Range [m],RWS [m/s]\n2017-01-01 00:00:00,100,1.0\n");
        assert!(matches!(
            lidar_from_csv(file.path(), &LidarOptions::default(), None),
            Err(LidarError::Loader(LoaderError::MissingColumns(_)))
        ));
    }

    #[test]
    fn test_lidar_duplicate_cell_is_error() {
        let file = temp_file(
            "Timestamp,Configuration ID,LOS ID,Azimuth [°],Elevation [°],Range [m],RWS [m/s]\n\
             2017-01-01 00:00:00,1,0,0,75,100,1.0\n\
             2017-01-01 00:00:00,1,0,0,75,100,2.0\n",
        );
        assert!(matches!(
            lidar_from_csv(file.path(), &LidarOptions::default(), None),
            Err(LidarError::Transform(TransformError::DuplicateCell { .. }))
        ));
    }

    #[test]
    fn test_lidar_wind_merge() -> Result<()> {
        let rws = temp_file(RWS_CSV);
        let wind = temp_file(WIND_CSV);
        let options = LidarOptions {
            wind: Some(wind.path().to_path_buf()),
            ..Default::default()
        };
        let ds = lidar_from_csv(rws.path(), &options, None)?;

        assert_eq!(ds.dim_len("Component"), Some(3));
        let speed = ds.var("Windspeed").unwrap();
        assert_eq!(speed.dims, vec!["Component", "Time", "Range"]);
        assert_eq!(speed.attr_text("units"), Some("m/s"));

        let speed = speed
            .values
            .as_float()
            .unwrap()
            .view()
            .into_dimensionality::<Ix3>()
            .unwrap();
        assert_eq!(speed[[0, 1, 0]], -4.0);
        assert_eq!(speed[[1, 1, 0]], -3.0);
        assert_eq!(speed[[2, 1, 0]], -0.5);
        // 00:00:02.400 lands on the nearest profile (00:00:02.500)
        assert_eq!(speed[[0, 2, 1]], -2.0);
        assert_eq!(speed[[1, 2, 1]], -1.0);
        assert!(speed[[0, 0, 0]].is_nan());

        Ok(())
    }

    fn merged_speed(wind_csv: &str) -> Result<ndarray::Array3<f64>> {
        let rws = temp_file(RWS_CSV);
        let wind = temp_file(wind_csv);
        let options = LidarOptions {
            wind: Some(wind.path().to_path_buf()),
            ..Default::default()
        };
        let ds = lidar_from_csv(rws.path(), &options, None)?;
        Ok(ds
            .var("Windspeed")
            .unwrap()
            .values
            .as_float()
            .unwrap()
            .clone()
            .into_dimensionality::<Ix3>()
            .unwrap())
    }

    #[test]
    fn test_wind_row_without_range_is_skipped() -> Result<()> {
        let speed = merged_speed(
            "TimeStamp,Range [m],X-Wind Speed [m/s],Y-Wind Speed [m/s],Z-Wind Speed [m/s]\n\
             2017-01-02 09:00:00.000,,7.0,8.0,9.0\n\
             2017-01-01 00:00:02.500,,7.0,8.0,9.0\n\
             ,100,7.0,8.0,9.0\n",
        )?;
        assert!(speed.iter().all(|v| v.is_nan()));
        Ok(())
    }

    #[test]
    fn test_wind_row_far_outside_lidar_window_is_skipped() -> Result<()> {
        let speed = merged_speed(
            "TimeStamp,Range [m],X-Wind Speed [m/s],Y-Wind Speed [m/s],Z-Wind Speed [m/s]\n\
             2017-01-02 09:00:00.000,100,7.0,8.0,9.0\n\
             2016-12-31 23:00:00.000,150,7.0,8.0,9.0\n\
             2017-01-01 00:00:01.500,900,7.0,8.0,9.0\n\
             2017-01-01 00:00:02.900,100,1.0,2.0,3.0\n",
        )?;
        // only the last row is within half a step of the grid
        assert_eq!(speed[[0, 2, 0]], -2.0);
        assert_eq!(speed.iter().filter(|v| !v.is_nan()).count(), 3);
        Ok(())
    }

    #[test]
    fn test_wind_rows_sharing_a_cell_keep_the_first() -> Result<()> {
        let speed = merged_speed(
            "TimeStamp,Range [m],X-Wind Speed [m/s],Y-Wind Speed [m/s],Z-Wind Speed [m/s]\n\
             2017-01-01 00:00:01.400,100,1.0,2.0,3.0\n\
             2017-01-01 00:00:01.600,100,7.0,8.0,9.0\n",
        )?;
        assert_eq!(speed[[0, 1, 0]], -2.0);
        assert_eq!(speed[[1, 1, 0]], -1.0);
        assert_eq!(speed[[2, 1, 0]], -3.0);
        Ok(())
    }

    #[test]
    fn test_lidar_scan_attributes() -> Result<()> {
        let rws = temp_file(RWS_CSV);
        let scans = temp_file(crate::processors::scan::tests::SCAN_XML);

        let mut attrs = Attrs::new();
        attrs.insert("site".to_string(), "roof".into());
        attrs.insert("scan_type".to_string(), "unknown".into());
        let options = LidarOptions {
            scans: Some(scans.path().to_path_buf()),
            attrs,
            ..Default::default()
        };
        let ds = lidar_from_csv(rws.path(), &options, None)?;

        assert_eq!(ds.attrs.get("site"), Some(&AttrValue::from("roof")));
        assert_eq!(ds.attrs.get("scan_type"), Some(&AttrValue::from("DBS")));
        assert_eq!(ds.attrs.get("scan_elevation"), Some(&AttrValue::from("75")));

        let by_id = LidarOptions {
            scans: Some(scans.path().to_path_buf()),
            scan_id: Some("2".to_string()),
            ..Default::default()
        };
        let ds = lidar_from_csv(rws.path(), &by_id, None)?;
        assert_eq!(ds.attrs.get("scan_type"), Some(&AttrValue::from("PPI")));

        Ok(())
    }
}
