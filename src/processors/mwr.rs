//! Microwave radiometer (MWR) importer.
//!
//! Radiometer level-2 files interleave several tables in one comma-separated
//! file. Every line carries a record type code in its third field; a line
//! starting with `Record` is the header of the table with that code, and the
//! data rows of table `h` have codes `h+1 ..= h+4`.
//!
//! Table 100 describes the retrieved quantities (`Temperature (K)`, ...) and
//! table 400 holds the profiles themselves, one row per (scan, quantity,
//! retrieval processor).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDateTime};
use ndarray::{Array1, Array2, ArrayD, Axis, IxDyn};
use regex::Regex;
use thiserror::Error;

use crate::config::MwrConfig;
use crate::core::dataset::{AttrValue, Attrs, Dataset, DatasetError, Values, Variable};
use crate::core::loaders::{parse_float, parse_int, parse_table, LoaderError, Table};
use crate::core::transforms::{bin_mean, time_bins, unique_sorted, TransformError};

/// Errors that can occur while importing radiometer data.
#[derive(Debug, Error)]
pub enum MwrError {
    #[error("Failed to read radiometer file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error("Failed to resample radiometer data: {0}")]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("Line {line}: no record type code in '{text}'")]
    InvalidRecordType { line: usize, text: String },

    #[error("Table {0} not found")]
    MissingTable(i64),

    #[error("Invalid range column header '{0}'")]
    InvalidRange(String),

    #[error("Duplicate record for scan {scan}, type {record_type}, processor '{processor}'")]
    DuplicateRecord {
        scan: usize,
        record_type: i64,
        processor: String,
    },

    #[error("records_per_scan must be positive")]
    InvalidScanLength,
}

/// Result type for radiometer operations.
pub type Result<T> = std::result::Result<T, MwrError>;

const RECORD_DESCRIPTIONS: i64 = 100;
const PROFILES: i64 = 400;

const RECORD_TYPE: &str = "Record Type";
const TITLE: &str = "Title";
const DATE_TIME: &str = "Date/Time";
const PROCESSOR: &str = "LV2 Processor";
const DATA_QUALITY: &str = "DataQuality";

/// Units of the resampled variables; other quantities keep the unit from table 100.
const RESAMPLED_UNITS: &[(&str, &str)] = &[
    ("Temperature", "K"),
    ("Vapor Density", "g/m^3"),
    ("Relative Humidity", "%"),
    ("Liquid", "g/m^3"),
];

/// Optional inputs for [`mwr_from_csv`].
#[derive(Debug, Clone, Default)]
pub struct MwrOptions {
    /// Average the scans into fixed time bins and split by record type.
    pub resample: bool,
    /// Dataset attributes.
    pub attrs: Attrs,
}

/// A retrieved quantity described by table 100.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub code: i64,
    pub name: String,
    pub unit: String,
}

/// Split a `Name (unit)` title. Titles without parentheses have an empty unit.
pub fn split_title(title: &str, pattern: &Regex) -> (String, String) {
    match pattern.captures(title) {
        Some(caps) => (caps["name"].trim().to_string(), caps["unit"].to_string()),
        None => (title.trim().to_string(), String::new()),
    }
}

fn title_pattern() -> Regex {
    Regex::new(r"^(?P<name>.*?) \((?P<unit>[^)]*)\)").expect("static title pattern")
}

/// Record type code of a line: its third comma-separated field.
fn record_code(line: &str) -> Option<i64> {
    line.split(',').nth(2).and_then(parse_int)
}

/// Split a multi-table radiometer file into its tables, keyed by header code.
///
/// Tables without data rows are omitted.
pub fn split_tables(text: &str) -> Result<BTreeMap<i64, Table>> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    let codes = lines
        .iter()
        .map(|&(n, line)| {
            record_code(line).ok_or_else(|| MwrError::InvalidRecordType {
                line: n + 1,
                text: line.to_string(),
            })
        })
        .collect::<Result<Vec<i64>>>()?;

    let mut tables = BTreeMap::new();
    for (&(_, header), &code) in lines.iter().zip(&codes) {
        if !header.starts_with("Record") {
            continue;
        }
        let rows: Vec<&str> = lines
            .iter()
            .zip(&codes)
            .filter(|&(_, &c)| c > code && c <= code + 4)
            .map(|(&(_, line), _)| line)
            .collect();
        if rows.is_empty() {
            log::debug!("Table {} has no rows", code);
            continue;
        }

        let mut csv_text = String::from(header);
        for row in &rows {
            csv_text.push('\n');
            csv_text.push_str(row);
        }
        tables.insert(code, parse_table(&csv_text, b',')?);
    }
    Ok(tables)
}

/// Read the record type descriptions from table 100.
pub fn record_types(table: &Table) -> Result<Vec<RecordType>> {
    let codes = table.ints(table.column(RECORD_TYPE)?)?;
    let titles = table.texts(table.column(TITLE)?);
    let pattern = title_pattern();

    Ok(codes
        .into_iter()
        .zip(titles)
        .map(|(code, title)| {
            let (name, unit) = split_title(&title, &pattern);
            RecordType { code, name, unit }
        })
        .collect())
}

/// One table-400 row reduced to its position in the cube.
struct Profile {
    scan: usize,
    record: usize,
    processor: usize,
    time: NaiveDateTime,
    quality: bool,
    values: Vec<f64>,
}

/// Load a radiometer level-2 CSV.
///
/// # Arguments
///
/// * `path` - Path to the radiometer CSV
/// * `options` - Resampling switch and dataset attributes
/// * `config` - Processor selection, scan length and resample interval (defaults if None)
///
/// # Returns
///
/// Without resampling, a dataset with a `Measurement` cube over
/// (Scan × Record Type × Range), or (Scan × Record Type × LV2 Processor ×
/// Range) when no processor is selected, plus `Time` and `DataQuality`
/// coordinates over the non-range dimensions. With resampling, one variable
/// per record type over (Time × [LV2 Processor ×] Range).
///
/// # Errors
///
/// Returns an error if the file cannot be read, a line has no record type
/// code, table 100 or 400 is missing, or a value cannot be parsed.
pub fn mwr_from_csv<P: AsRef<Path>>(
    path: P,
    options: &MwrOptions,
    config: Option<&MwrConfig>,
) -> Result<Dataset> {
    let path = path.as_ref();
    let default_config = MwrConfig::default();
    let config = config.unwrap_or(&default_config);
    if config.records_per_scan == 0 {
        return Err(MwrError::InvalidScanLength);
    }

    let text = fs::read_to_string(path)?;
    let tables = split_tables(&text)?;
    log::debug!("{}: tables {:?}", path.display(), tables.keys().collect::<Vec<_>>());

    let descriptions = tables
        .get(&RECORD_DESCRIPTIONS)
        .ok_or(MwrError::MissingTable(RECORD_DESCRIPTIONS))?;
    let profiles = tables.get(&PROFILES).ok_or(MwrError::MissingTable(PROFILES))?;

    let types = record_types(descriptions)?;
    let ds = build_cube(profiles, &types, options.attrs.clone(), config)?;
    log::info!("Loaded radiometer data from {}: {}", path.display(), ds);

    if options.resample {
        let interval = Duration::minutes(i64::from(config.resample_minutes));
        resample(&ds, &types, interval, options.attrs.clone())
    } else {
        Ok(ds)
    }
}

fn build_cube(table: &Table, types: &[RecordType], attrs: Attrs, config: &MwrConfig) -> Result<Dataset> {
    let code_col = table.column(&PROFILES.to_string())?;
    let processor_col = table.column(PROCESSOR)?;
    let quality_col = table.column(DATA_QUALITY)?;

    let ranges = (processor_col + 1..quality_col)
        .map(|c| {
            let header = &table.headers[c];
            header
                .parse::<f64>()
                .map_err(|_| MwrError::InvalidRange(header.clone()))
        })
        .collect::<Result<Vec<f64>>>()?;

    let codes = table.ints(code_col)?;
    let times = table.times(table.column(DATE_TIME)?)?;
    let processors_all = table.texts(processor_col);
    let qualities = table.floats(quality_col)?;

    let processors = match &config.processor {
        Some(selected) => vec![selected.clone()],
        None => unique_sorted(&processors_all),
    };

    let n_scans = table.len().div_ceil(config.records_per_scan);
    let mut rows = Vec::new();
    for row in 0..table.len() {
        let Some(processor) = processors.iter().position(|p| *p == processors_all[row]) else {
            continue;
        };
        let Some(record) = types.iter().position(|t| t.code == codes[row]) else {
            log::warn!("Row {}: record type {} not described in table 100", row + 1, codes[row]);
            continue;
        };
        let values = (processor_col + 1..quality_col)
            .map(|c| {
                parse_float(table.cell(row, c)).ok_or_else(|| {
                    LoaderError::ParseError(format!("Invalid value: '{}'", table.cell(row, c)))
                })
            })
            .collect::<std::result::Result<Vec<f64>, LoaderError>>()?;

        rows.push(Profile {
            scan: row / config.records_per_scan,
            record,
            processor,
            time: times[row],
            quality: qualities[row] != 0.0 && !qualities[row].is_nan(),
            values,
        });
    }

    let by_processor = config.processor.is_none();
    let mut outer_shape = vec![n_scans, types.len()];
    if by_processor {
        outer_shape.push(processors.len());
    }
    let mut cube_shape = outer_shape.clone();
    cube_shape.push(ranges.len());

    let mut measurement = ArrayD::<f64>::from_elem(IxDyn(&cube_shape), f64::NAN);
    let mut time = ArrayD::<Option<NaiveDateTime>>::from_elem(IxDyn(&outer_shape), None);
    let mut quality = ArrayD::<bool>::from_elem(IxDyn(&outer_shape), false);

    for profile in &rows {
        let mut index = vec![profile.scan, profile.record];
        if by_processor {
            index.push(profile.processor);
        }
        if time[index.as_slice()].is_some() {
            return Err(MwrError::DuplicateRecord {
                scan: profile.scan,
                record_type: types[profile.record].code,
                processor: processors[profile.processor].clone(),
            });
        }
        time[index.as_slice()] = Some(profile.time);
        quality[index.as_slice()] = profile.quality;
        for (r, &v) in profile.values.iter().enumerate() {
            let mut cell = index.clone();
            cell.push(r);
            measurement[cell.as_slice()] = v;
        }
    }

    let mut outer_dims = vec!["Scan", RECORD_TYPE];
    if by_processor {
        outer_dims.push(PROCESSOR);
    }
    let mut cube_dims = outer_dims.clone();
    cube_dims.push("Range");

    let units: BTreeMap<String, String> = types
        .iter()
        .map(|t| (t.name.clone(), t.unit.clone()))
        .collect();

    let mut ds = Dataset::with_attrs(attrs);
    ds.set_coord(
        "Scan",
        Variable::new(
            ["Scan"],
            Values::Int(Array1::from_iter(0..n_scans as i64).into_dyn()),
        ),
    )?;
    ds.set_coord(
        RECORD_TYPE,
        Variable::new(
            [RECORD_TYPE],
            Values::Text(Array1::from_iter(types.iter().map(|t| t.name.clone())).into_dyn()),
        ),
    )?;
    if by_processor {
        ds.set_coord(
            PROCESSOR,
            Variable::new([PROCESSOR], Values::Text(Array1::from(processors.clone()).into_dyn())),
        )?;
    }
    ds.set_coord(
        "Range",
        Variable::new(["Range"], Values::Float(Array1::from(ranges).into_dyn())).with_attr("units", "km"),
    )?;
    ds.set_coord(
        "Time",
        Variable::new(outer_dims.clone(), Values::Time(time)).with_attr("standard_name", "time"),
    )?;
    ds.set_coord(DATA_QUALITY, Variable::new(outer_dims, Values::Bool(quality)))?;
    ds.set_var(
        "Measurement",
        Variable::new(cube_dims, Values::Float(measurement)).with_attr("units", units),
    )?;
    if let Some(selected) = &config.processor {
        ds.attrs.insert(PROCESSOR.to_string(), AttrValue::from(selected.as_str()));
    }
    Ok(ds)
}

/// Average the cube into fixed time bins and split it by record type.
fn resample(ds: &Dataset, types: &[RecordType], interval: Duration, attrs: Attrs) -> Result<Dataset> {
    let measurement = ds
        .var("Measurement")
        .and_then(|v| v.values.as_float())
        .ok_or_else(|| DatasetError::UnknownVariable("Measurement".to_string()))?;
    let times = ds
        .coord("Time")
        .and_then(|v| v.values.as_time())
        .ok_or_else(|| DatasetError::UnknownVariable("Time".to_string()))?;
    let processors = ds.coord(PROCESSOR).cloned();

    // Time is (Scan, Record Type[, LV2 Processor]); flattened in logical order.
    let flat_times: Vec<Option<NaiveDateTime>> = times.iter().copied().collect();
    let bins = time_bins(&flat_times, interval)?;
    let n_bins = bins.starts.len();
    let n_range = measurement.shape()[measurement.ndim() - 1];
    let n_types = types.len();
    let n_proc = processors.as_ref().map_or(1, |p| p.values.shape()[0]);

    let mut out = Dataset::with_attrs(attrs);
    out.set_coord(
        "Time",
        Variable::new(
            ["Time"],
            Values::Time(Array1::from_iter(bins.starts.iter().map(|t| Some(*t))).into_dyn()),
        )
        .with_attr("standard_name", "time"),
    )?;
    if let Some(p) = &processors {
        out.set_coord(PROCESSOR, p.clone())?;
    }
    if let Some(range) = ds.coord("Range") {
        out.set_coord("Range", range.clone())?;
    }

    for (k, record_type) in types.iter().enumerate() {
        let mut per_processor = Vec::with_capacity(n_proc);
        for p in 0..n_proc {
            let samples: Array2<f64> = {
                let by_type = measurement.index_axis(Axis(1), k);
                let by_proc = if processors.is_some() {
                    by_type.index_axis_move(Axis(1), p)
                } else {
                    by_type
                };
                by_proc
                    .into_dimensionality::<ndarray::Ix2>()
                    .map_err(DatasetError::from)?
                    .to_owned()
            };
            let assignment: Vec<Option<usize>> = (0..samples.nrows())
                .map(|s| bins.assignment[(s * n_types + k) * n_proc + p])
                .collect();
            per_processor.push(bin_mean(samples.view(), &assignment, n_bins));
        }

        let unit = RESAMPLED_UNITS
            .iter()
            .find(|(name, _)| *name == record_type.name)
            .map_or(record_type.unit.as_str(), |(_, unit)| *unit);

        let variable = if processors.is_some() {
            let views: Vec<_> = per_processor.iter().map(|a| a.view()).collect();
            let stacked = ndarray::stack(Axis(1), &views).map_err(DatasetError::from)?;
            Variable::new(["Time", PROCESSOR, "Range"], Values::Float(stacked.into_dyn()))
        } else {
            let single = per_processor
                .pop()
                .unwrap_or_else(|| Array2::from_elem((n_bins, n_range), f64::NAN));
            Variable::new(["Time", "Range"], Values::Float(single.into_dyn()))
        };
        out.set_var(&record_type.name, variable.with_attr("units", unit))?;
    }

    log::debug!("Resampled {} scans into {} bins of {}", ds.dim_len("Scan").unwrap_or(0), n_bins, interval);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::Ix1;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MWR_CSV: &str = "\
Record,Date/Time,10,Method,Comment
1,01/01/17 00:00:00,11,0,started
Record,Date/Time,100,Record Type,Title
2,01/01/17 00:00:00,101,401,Temperature (K)
3,01/01/17 00:00:00,101,402,Vapor Density (g/m^3)
4,01/01/17 00:00:00,101,403,Relative Humidity (%)
5,01/01/17 00:00:00,101,404,Liquid (g/m^3)
Record,Date/Time,200,Frequency
Record,Date/Time,400,LV2 Processor,0.000,0.500,1.000,DataQuality
6,01/01/17 00:00:10,401,Zenith,280.0,275.0,270.0,1
7,01/01/17 00:00:10,403,Zenith,50.0,60.0,70.0,1
8,01/01/17 00:00:10,401,Angle20(N),281.0,276.0,271.0,1
9,01/01/17 00:00:10,403,Angle20(N),55.0,65.0,75.0,1

10,01/01/17 00:02:10,401,Zenith,281.0,276.0,271.0,1
11,01/01/17 00:02:10,403,Zenith,51.0,61.0,71.0,1
12,01/01/17 00:02:10,401,Angle20(N),282.0,277.0,272.0,1
13,01/01/17 00:02:10,403,Angle20(N),56.0,,76.0,0
14,01/01/17 00:06:10,401,Zenith,282.0,277.0,272.0,1
15,01/01/17 00:06:10,403,Zenith,52.0,62.0,72.0,1
16,01/01/17 00:06:10,401,Angle20(N),283.0,278.0,273.0,1
17,01/01/17 00:06:10,403,Angle20(N),57.0,67.0,77.0,1
";

    fn fixture() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MWR_CSV.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn config(processor: Option<&str>) -> MwrConfig {
        MwrConfig {
            processor: processor.map(str::to_string),
            records_per_scan: 4,
            ..Default::default()
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_split_tables() {
        let tables = split_tables(MWR_CSV).unwrap();
        assert_eq!(tables.keys().copied().collect::<Vec<_>>(), vec![10, 100, 400]);
        assert_eq!(tables[&100].len(), 4);
        assert_eq!(tables[&400].len(), 12);
        assert_eq!(tables[&400].headers[4], "0.000");
    }

    #[test]
    fn test_invalid_record_code() {
        let err = split_tables("Record,Date/Time,100,Title\nnot a record line\n").unwrap_err();
        assert!(matches!(err, MwrError::InvalidRecordType { line: 2, .. }));
    }

    #[test]
    fn test_record_types() {
        let tables = split_tables(MWR_CSV).unwrap();
        let types = record_types(&tables[&100]).unwrap();
        assert_eq!(types.len(), 4);
        assert_eq!(types[1].code, 402);
        assert_eq!(types[1].name, "Vapor Density");
        assert_eq!(types[1].unit, "g/m^3");

        let pattern = title_pattern();
        assert_eq!(split_title("Cloud Base", &pattern), ("Cloud Base".to_string(), String::new()));
    }

    #[test]
    fn test_cube_for_selected_processor() {
        let file = fixture();
        let ds = mwr_from_csv(file.path(), &MwrOptions::default(), Some(&config(Some("Zenith")))).unwrap();

        let measurement = ds.var("Measurement").unwrap();
        assert_eq!(measurement.dims, vec!["Scan", "Record Type", "Range"]);
        assert_eq!(measurement.values.shape(), &[3, 4, 3]);

        let values = measurement.values.as_float().unwrap();
        assert_eq!(values[[0, 0, 0]], 280.0);
        assert_eq!(values[[0, 0, 2]], 270.0);
        assert_eq!(values[[1, 2, 0]], 51.0);
        assert!(values[[0, 1, 0]].is_nan());

        let units = measurement.attrs["units"].as_map().unwrap();
        assert_eq!(units["Relative Humidity"], "%");

        let names = ds.coord("Record Type").unwrap().values.as_text().unwrap();
        assert_eq!(names[[0]], "Temperature");

        let range = ds.coord("Range").unwrap();
        assert_eq!(range.attr_text("units"), Some("km"));
        let range = range.values.as_float().unwrap().view().into_dimensionality::<Ix1>().unwrap();
        assert_eq!(range.to_vec(), vec![0.0, 0.5, 1.0]);

        let time = ds.coord("Time").unwrap().values.as_time().unwrap();
        assert_eq!(time[[2, 0]], Some(at(0, 6, 10)));
        assert_eq!(time[[2, 1]], None);
        assert_eq!(ds.attrs["LV2 Processor"].as_text(), Some("Zenith"));
    }

    #[test]
    fn test_cube_with_processor_dimension() {
        let file = fixture();
        let ds = mwr_from_csv(file.path(), &MwrOptions::default(), Some(&config(None))).unwrap();

        let measurement = ds.var("Measurement").unwrap();
        assert_eq!(measurement.dims, vec!["Scan", "Record Type", "LV2 Processor", "Range"]);
        assert_eq!(measurement.values.shape(), &[3, 4, 2, 3]);

        let processors = ds.coord("LV2 Processor").unwrap().values.as_text().unwrap();
        assert_eq!(processors[[0]], "Angle20(N)");
        assert_eq!(processors[[1]], "Zenith");

        let values = measurement.values.as_float().unwrap();
        assert_eq!(values[[0, 0, 0, 0]], 281.0);
        assert_eq!(values[[0, 0, 1, 0]], 280.0);
        assert!(values[[1, 2, 0, 1]].is_nan());

        let quality = ds.coord("DataQuality").unwrap().values.as_bool().unwrap();
        assert!(!quality[[1, 2, 0]]);
        assert!(quality[[1, 2, 1]]);
    }

    #[test]
    fn test_resample_selected_processor() {
        let file = fixture();
        let options = MwrOptions {
            resample: true,
            ..Default::default()
        };
        let ds = mwr_from_csv(file.path(), &options, Some(&config(Some("Zenith")))).unwrap();

        let time = ds.coord("Time").unwrap().values.as_time().unwrap();
        assert_eq!(time.len(), 2);
        assert_eq!(time[[0]], Some(at(0, 0, 0)));
        assert_eq!(time[[1]], Some(at(0, 5, 0)));

        let temperature = ds.var("Temperature").unwrap();
        assert_eq!(temperature.dims, vec!["Time", "Range"]);
        assert_eq!(temperature.attr_text("units"), Some("K"));
        let t = temperature.float_2d().unwrap();
        assert_eq!(t[[0, 0]], 280.5);
        assert_eq!(t[[1, 0]], 282.0);

        let vapor = ds.var("Vapor Density").unwrap();
        assert!(vapor.float_2d().unwrap()[[0, 0]].is_nan());
        assert!(!ds.contains("Measurement"));
    }

    #[test]
    fn test_resample_with_processor_dimension() {
        let file = fixture();
        let options = MwrOptions {
            resample: true,
            ..Default::default()
        };
        let ds = mwr_from_csv(file.path(), &options, Some(&config(None))).unwrap();

        let rh = ds.var("Relative Humidity").unwrap();
        assert_eq!(rh.dims, vec!["Time", "LV2 Processor", "Range"]);
        let values = rh.values.as_float().unwrap();
        assert_eq!(values[[0, 0, 0]], 55.5);
        // The missing cell in scan 1 is skipped, not averaged as NaN.
        assert_eq!(values[[0, 0, 1]], 65.0);
        assert_eq!(values[[0, 1, 2]], 70.5);
    }

    #[test]
    fn test_missing_profile_table() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Record,Date/Time,100,Record Type,Title\n1,01/01/17 00:00:00,101,401,Temperature (K)\n")
            .unwrap();
        file.flush().unwrap();

        let err = mwr_from_csv(file.path(), &MwrOptions::default(), None).unwrap_err();
        assert!(matches!(err, MwrError::MissingTable(400)));
    }
}
