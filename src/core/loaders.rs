//! Delimited-text table loading shared by the instrument importers.
//!
//! This module provides:
//! - [`Table`], a header plus string records read with the `csv` crate
//! - column lookup by header name
//! - numeric and timestamp parsing for the vendor formats seen in practice

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use thiserror::Error;

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Timestamp layouts accepted by [`parse_timestamp`], tried in order.
///
/// The slash layouts with the month first come before `%Y/%m/%d`, since
/// `%Y` also accepts a one- or two-digit year and would read "01/01/17" as
/// year 1.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%m/%d/%y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d", "%d %b %Y"];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// A delimited table: header names plus the raw string records.
#[derive(Debug, Clone)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<StringRecord>,
    index: HashMap<String, usize>,
}

impl Table {
    fn new(headers: Vec<String>, rows: Vec<StringRecord>) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            headers,
            rows,
            index,
        }
    }

    /// Number of data rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Index of the named column.
    pub fn column(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| LoaderError::MissingColumns(name.to_string()))
    }

    /// Raw cell text; short rows yield an empty string.
    #[inline]
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows[row].get(col).unwrap_or("")
    }

    /// Column values as floats. Empty cells become NaN.
    pub fn floats(&self, col: usize) -> Result<Vec<f64>> {
        (0..self.len())
            .map(|row| {
                let cell = self.cell(row, col);
                parse_float(cell).ok_or_else(|| {
                    LoaderError::ParseError(format!(
                        "Invalid number '{}' in column '{}' (row {})",
                        cell,
                        self.headers[col],
                        row + 1
                    ))
                })
            })
            .collect()
    }

    /// Column values as integers.
    pub fn ints(&self, col: usize) -> Result<Vec<i64>> {
        (0..self.len())
            .map(|row| {
                let cell = self.cell(row, col);
                parse_int(cell).ok_or_else(|| {
                    LoaderError::ParseError(format!(
                        "Invalid integer '{}' in column '{}' (row {})",
                        cell,
                        self.headers[col],
                        row + 1
                    ))
                })
            })
            .collect()
    }

    /// Column values as timestamps.
    pub fn times(&self, col: usize) -> Result<Vec<NaiveDateTime>> {
        (0..self.len())
            .map(|row| parse_timestamp(self.cell(row, col)))
            .collect()
    }

    /// Column values as owned strings.
    pub fn texts(&self, col: usize) -> Vec<String> {
        (0..self.len()).map(|row| self.cell(row, col).to_string()).collect()
    }
}

/// Load a delimited table from a file.
///
/// # Arguments
///
/// * `path` - Path to the text file
/// * `delimiter` - Field separator byte (`b','`, `b';'`, ...)
/// * `skip_lines` - Number of leading lines to discard before the header row
///
/// # Errors
///
/// Returns an error if the file cannot be read, the CSV is malformed, or
/// there are no data rows.
pub fn load_table<P: AsRef<Path>>(path: P, delimiter: u8, skip_lines: usize) -> Result<Table> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut discard = String::new();
    for _ in 0..skip_lines {
        discard.clear();
        if reader.read_line(&mut discard)? == 0 {
            return Err(LoaderError::EmptyFile(path.to_path_buf()));
        }
    }

    let mut text = String::new();
    reader.read_to_string(&mut text)?;

    let table = parse_table(&text, delimiter)?;
    if table.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }
    log::debug!(
        "Loaded {} rows x {} columns from {}",
        table.len(),
        table.headers.len(),
        path.display()
    );
    Ok(table)
}

/// Parse delimited text held in memory. The first line is the header row.
pub fn parse_table(text: &str, delimiter: u8) -> Result<Table> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        rows.push(record);
    }

    Ok(Table::new(headers, rows))
}

/// Parse a float cell. Empty and `nan` cells are NaN; anything else unparsable is `None`.
pub fn parse_float(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    s.parse().ok()
}

/// Parse an integer cell, accepting integral float spellings such as `3.0`.
pub fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>().ok().or_else(|| {
        let v: f64 = s.parse().ok()?;
        (v.fract() == 0.0 && v.is_finite()).then_some(v as i64)
    })
}

/// Parse a timestamp in any of the supported layouts.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
        .ok_or_else(|| LoaderError::ParseError(format!("Invalid timestamp: '{}'", s)))
}

/// Parse a calendar date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Parse a time of day.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_table_with_preamble() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Station : Somewhere").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "Time Stamp; Pressure ;Note").unwrap();
        writeln!(file, "00:00:01; 1000.5 ; ok").unwrap();
        writeln!(file, "00:00:02;  999.0 ;").unwrap();
        file.flush().unwrap();

        let table = load_table(file.path(), b';', 2)?;
        assert_eq!(table.headers, vec!["Time Stamp", "Pressure", "Note"]);
        assert_eq!(table.len(), 2);

        let pressure = table.floats(table.column("Pressure")?)?;
        assert_eq!(pressure, vec![1000.5, 999.0]);
        assert_eq!(table.texts(2), vec!["ok", ""]);

        Ok(())
    }

    #[test]
    fn test_missing_column() {
        let table = parse_table("a,b\n1,2\n", b',').unwrap();
        assert!(matches!(
            table.column("c"),
            Err(LoaderError::MissingColumns(name)) if name == "c"
        ));
    }

    #[test]
    fn test_empty_file_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a,b").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            load_table(file.path(), b',', 0),
            Err(LoaderError::EmptyFile(_))
        ));
    }

    #[test]
    fn test_floats_reject_garbage() {
        let table = parse_table("a\n1.5\n\nx\n", b',').unwrap();
        assert!(table.floats(0).is_err());

        let table = parse_table("a\n1.5\nNaN\n", b',').unwrap();
        let values = table.floats(0).unwrap();
        assert_eq!(values[0], 1.5);
        assert!(values[1].is_nan());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("3"), Some(3));
        assert_eq!(parse_int(" 4.0 "), Some(4));
        assert_eq!(parse_int("4.5"), None);
        assert_eq!(parse_int(""), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2017, 1, 1)
            .unwrap()
            .and_hms_opt(12, 30, 5)
            .unwrap();
        assert_eq!(parse_timestamp("2017-01-01 12:30:05").unwrap(), expected);
        assert_eq!(parse_timestamp("2017-01-01T12:30:05").unwrap(), expected);
        assert_eq!(parse_timestamp("01/01/17 12:30:05").unwrap(), expected);
        assert_eq!(parse_timestamp("01/01/2017 12:30:05").unwrap(), expected);
        assert_eq!(parse_timestamp("2017/01/01 12:30:05").unwrap(), expected);

        let with_millis = parse_timestamp("2017-01-01 12:30:05.250").unwrap();
        assert_eq!(with_millis - expected, chrono::Duration::milliseconds(250));

        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_two_digit_year_is_not_read_as_year_one() {
        let parsed = parse_timestamp("01/01/17 00:00:10").unwrap();
        assert_eq!(parsed.date(), NaiveDate::from_ymd_opt(2017, 1, 1).unwrap());

        let parsed = parse_timestamp("12/31/16 23:59:59.5").unwrap();
        assert_eq!(parsed.date(), NaiveDate::from_ymd_opt(2016, 12, 31).unwrap());
    }

    #[test]
    fn test_parse_date_and_time() {
        assert_eq!(
            parse_date("01/02/2017"),
            NaiveDate::from_ymd_opt(2017, 1, 2)
        );
        assert_eq!(parse_time_of_day("23:59:58"), NaiveTime::from_hms_opt(23, 59, 58));
        assert_eq!(parse_time_of_day("noon"), None);
    }
}
