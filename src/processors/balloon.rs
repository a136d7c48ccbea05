//! Weather balloon (radiosonde) telemetry importer.
//!
//! The ground station writes a `key : value` header block, a blank line, and
//! then a semicolon-separated table with one row per telemetry sample. Sample
//! timestamps carry only the time of day, so the launch date from the
//! `Flight` header entry is attached and midnight crossings are detected.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDateTime};
use ndarray::{Array1, Array3, ArrayD};
use thiserror::Error;

use crate::core::dataset::{AttrValue, Attrs, Dataset, DatasetError, Values, Variable};
use crate::core::loaders::{load_table, parse_date, parse_float, parse_time_of_day, LoaderError, Table};

/// Errors that can occur while importing balloon data.
#[derive(Debug, Error)]
pub enum BalloonError {
    #[error("Failed to read balloon file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("Header line {line} is not 'key : value': '{text}'")]
    MalformedHeader { line: usize, text: String },

    #[error("No blank line after the header block")]
    MissingHeaderEnd,

    #[error("Header entry '{0}' not found")]
    MissingMetadata(String),

    #[error("Cannot read launch date and time from Flight '{0}'")]
    InvalidFlight(String),

    #[error("Invalid time of day '{0}'")]
    InvalidTime(String),
}

/// Result type for balloon operations.
pub type Result<T> = std::result::Result<T, BalloonError>;

const TIME_STAMP: &str = "Time Stamp";
const ELAPSED_TIME: &str = "Elapsed Time";
const FLIGHT: &str = "Flight";
const STATION_NAME: &str = "Station Name (WMO #)";

/// Telemetry columns stored as coordinates rather than data variables.
const COORDINATE_COLUMNS: &[&str] = &[
    "Elapsed Time",
    "Geopotential Height",
    "Corrected Elevation",
    "Latitude",
    "Longitude",
    "Geometric Height",
];

/// Header entries attached along the Station dimension.
const STATION_COORDS: &[&str] = &["Station Height", "Station Latitude", "Station Longitude"];

/// Header entries attached along the Profile dimension.
const PROFILE_COORDS: &[&str] = &["Flight", "File Name", "Observer Initial", "Version #"];

/// Parsed header block of a balloon file.
#[derive(Debug, Clone, PartialEq)]
pub struct BalloonHeader {
    pub metadata: BTreeMap<String, String>,
    /// Zero-based index of the blank line ending the header.
    pub header_end: usize,
}

impl BalloonHeader {
    fn get(&self, key: &str) -> Result<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| BalloonError::MissingMetadata(key.to_string()))
    }

    /// Launch time from the `Flight` entry (`<flight>, <date>, <time>`).
    pub fn launch(&self) -> Result<NaiveDateTime> {
        let flight = self.get(FLIGHT)?;
        let parts: Vec<&str> = flight.split(", ").collect();
        let date = parts.get(1).and_then(|s| parse_date(s));
        let time = parts.get(2).and_then(|s| parse_time_of_day(s));
        match (date, time) {
            (Some(date), Some(time)) => Ok(date.and_time(time)),
            _ => Err(BalloonError::InvalidFlight(flight.to_string())),
        }
    }
}

/// Parse the `key : value` lines preceding the first blank line.
pub fn parse_header(text: &str) -> Result<BalloonHeader> {
    let mut metadata = BTreeMap::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            return Ok(BalloonHeader {
                metadata,
                header_end: n,
            });
        }
        let (key, value) = line.split_once(" : ").ok_or_else(|| BalloonError::MalformedHeader {
            line: n + 1,
            text: line.to_string(),
        })?;
        metadata.insert(key.trim().to_string(), value.trim().to_string());
    }
    Err(BalloonError::MissingHeaderEnd)
}

/// Sample timestamps: launch date plus time of day, with a day added at
/// every midnight crossing.
///
/// A crossing is a row whose time of day goes backwards while the elapsed
/// time does not.
pub fn sample_times(launch: NaiveDateTime, time_stamps: &[String], elapsed: &[f64]) -> Result<Vec<NaiveDateTime>> {
    let times_of_day = time_stamps
        .iter()
        .map(|s| parse_time_of_day(s).ok_or_else(|| BalloonError::InvalidTime(s.clone())))
        .collect::<Result<Vec<_>>>()?;

    let date = launch.date();
    let mut days = 0;
    let mut out = Vec::with_capacity(times_of_day.len());
    for (i, &tod) in times_of_day.iter().enumerate() {
        if i > 0 && tod < times_of_day[i - 1] && elapsed[i] >= elapsed[i - 1] {
            days += 1;
        }
        out.push(date.and_time(tod) + Duration::days(days));
    }
    Ok(out)
}

/// Lay a column out over (Profile × Station × Time).
fn profile_station_time<T>(values: Vec<T>) -> Result<ArrayD<T>> {
    let n = values.len();
    let cube = Array3::from_shape_vec((1, 1, n), values).map_err(DatasetError::from)?;
    Ok(cube.into_dyn())
}

/// A numeric column stays numeric; anything unparsable makes it text.
fn column_values(table: &Table, col: usize) -> Result<Values> {
    let parsed: Option<Vec<f64>> = (0..table.len()).map(|row| parse_float(table.cell(row, col))).collect();
    Ok(match parsed {
        Some(numbers) => Values::Float(profile_station_time(numbers)?),
        None => Values::Text(profile_station_time(table.texts(col))?),
    })
}

/// Load a weather balloon telemetry file.
///
/// # Arguments
///
/// * `path` - Path to the processed flight file
///
/// # Returns
///
/// A dataset over (Profile × Station × Time), each of length one except
/// Time. Telemetry columns become data variables (the position and
/// elapsed-time columns become coordinates); station and flight header
/// entries become coordinates on the Station and Profile dimensions; every
/// header entry is also a dataset attribute.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the header is malformed or
/// incomplete, or a timestamp cannot be parsed.
pub fn weather_balloon<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let header = parse_header(&text)?;
    let launch = header.launch()?;

    let table = load_table(path, b';', header.header_end + 1)?;
    let time_col = table.column(TIME_STAMP)?;
    let elapsed = table.floats(table.column(ELAPSED_TIME)?)?;
    let times = sample_times(launch, &table.texts(time_col), &elapsed)?;
    log::debug!("{}: {} samples from {}", path.display(), times.len(), launch);

    let attrs: Attrs = header
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), AttrValue::from(v.as_str())))
        .collect();
    let mut ds = Dataset::with_attrs(attrs);

    ds.set_coord(
        "Time",
        Variable::new(["Time"], Values::Time(Array1::from_iter(times.into_iter().map(Some)).into_dyn()))
            .with_attr("standard_name", "time"),
    )?;

    let dims = ["Profile", "Station", "Time"];
    for (col, name) in table.headers.iter().enumerate() {
        if col == time_col || name.is_empty() {
            continue;
        }
        let var = Variable::new(dims, column_values(&table, col)?);
        if COORDINATE_COLUMNS.contains(&name.as_str()) {
            ds.set_coord(name, var)?;
        } else {
            ds.set_var(name, var)?;
        }
    }

    let text_on = |dim: &str, value: &str| {
        Variable::new([dim], Values::Text(Array1::from(vec![value.to_string()]).into_dyn()))
    };

    ds.set_coord("Station", text_on("Station", header.get(STATION_NAME)?))?;
    for key in STATION_COORDS {
        ds.set_coord(key, text_on("Station", header.get(key)?))?;
    }

    ds.set_coord(
        "Profile",
        Variable::new(["Profile"], Values::Time(Array1::from(vec![Some(launch)]).into_dyn())),
    )?;
    for key in PROFILE_COORDS {
        ds.set_coord(key, text_on("Profile", header.get(key)?))?;
    }

    log::info!("Loaded balloon flight from {}: {}", path.display(), ds);
    Ok(ds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BALLOON: &str = "\
File Name : FLT_010117_0000_PROC.txt
Station Name (WMO #) : ALBANY (72518)
Station Height : 93 m
Station Latitude : 42.69
Station Longitude : -73.83
Flight : 1, 01/01/17, 23:59:50
Observer Initial : JS
Version # : 2.1

Time Stamp;Elapsed Time;Pressure;Temperature;Relative Humidity;Geopotential Height;Corrected Elevation;Latitude;Longitude;Geometric Height;Sonde Status
23:59:50;0;1000.0;271.0;80;93;93;42.69;-73.83;93;OK
23:59:58;8;995.0;270.8;79;135;135;42.69;-73.83;135;OK
00:00:06;16;990.0;270.5;78;178;178;42.70;-73.82;178;OK
00:00:14;24;985.0;270.1;77;220;220;42.70;-73.82;220;GPS lost
";

    fn fixture(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 1, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_parse_header() {
        let header = parse_header(BALLOON).unwrap();
        assert_eq!(header.header_end, 8);
        assert_eq!(header.metadata["Station Height"], "93 m");
        assert_eq!(header.launch().unwrap(), at(1, 23, 59, 50));
    }

    #[test]
    fn test_malformed_header() {
        let err = parse_header("File Name : x\nno separator here\n\n").unwrap_err();
        assert!(matches!(err, BalloonError::MalformedHeader { line: 2, .. }));

        assert!(matches!(
            parse_header("File Name : x\n"),
            Err(BalloonError::MissingHeaderEnd)
        ));

        let header = parse_header("Flight : 1, someday\n\n").unwrap();
        assert!(matches!(header.launch(), Err(BalloonError::InvalidFlight(_))));
    }

    #[test]
    fn test_day_rollover() {
        let stamps: Vec<String> = ["23:59:58", "00:00:06", "00:00:04", "00:00:14"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        // The third row goes back in elapsed time too, so no extra day.
        let elapsed = [8.0, 16.0, 14.0, 24.0];
        let times = sample_times(at(1, 23, 59, 50), &stamps, &elapsed).unwrap();
        assert_eq!(times[0], at(1, 23, 59, 58));
        assert_eq!(times[1], at(2, 0, 0, 6));
        assert_eq!(times[2], at(2, 0, 0, 4));
        assert_eq!(times[3], at(2, 0, 0, 14));
    }

    #[test]
    fn test_weather_balloon_dataset() {
        let file = fixture(BALLOON);
        let ds = weather_balloon(file.path()).unwrap();

        assert_eq!(ds.dim_len("Profile"), Some(1));
        assert_eq!(ds.dim_len("Station"), Some(1));
        assert_eq!(ds.dim_len("Time"), Some(4));

        let time = ds.coord("Time").unwrap().values.as_time().unwrap();
        assert_eq!(time[[1]], Some(at(1, 23, 59, 58)));
        assert_eq!(time[[2]], Some(at(2, 0, 0, 6)));

        let temperature = ds.var("Temperature").unwrap();
        assert_eq!(temperature.dims, vec!["Profile", "Station", "Time"]);
        assert_eq!(temperature.values.as_float().unwrap()[[0, 0, 3]], 270.1);

        let status = ds.var("Sonde Status").unwrap().values.as_text().unwrap();
        assert_eq!(status[[0, 0, 3]], "GPS lost");

        assert!(ds.coord("Geometric Height").is_some());
        assert!(ds.var("Latitude").is_none());
        assert!(ds.coord("Latitude").is_some());

        let station = ds.coord("Station").unwrap().values.as_text().unwrap();
        assert_eq!(station[[0]], "ALBANY (72518)");
        let height = ds.coord("Station Height").unwrap().values.as_text().unwrap();
        assert_eq!(height[[0]], "93 m");

        let profile = ds.coord("Profile").unwrap().values.as_time().unwrap();
        assert_eq!(profile[[0]], Some(at(1, 23, 59, 50)));
        let observer = ds.coord("Observer Initial").unwrap().values.as_text().unwrap();
        assert_eq!(observer[[0]], "JS");

        assert_eq!(ds.attrs["Version #"].as_text(), Some("2.1"));
        assert_eq!(ds.attrs["File Name"].as_text(), Some("FLT_010117_0000_PROC.txt"));
    }

    #[test]
    fn test_missing_metadata() {
        let text = BALLOON.replace("Observer Initial : JS\n", "");
        let file = fixture(&text);
        assert!(matches!(
            weather_balloon(file.path()),
            Err(BalloonError::MissingMetadata(key)) if key == "Observer Initial"
        ));
    }
}
