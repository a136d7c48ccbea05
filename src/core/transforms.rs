//! Axis building, pivoting and resampling helpers.
//!
//! The importers receive "long" tables (one row per measurement) and need
//! rectangular grids indexed by sorted coordinate axes. This module provides
//! the pieces for that: sorted-unique axes, a long-to-wide [`pivot`],
//! nearest-neighbour index lookup and fixed-interval time binning.

use chrono::{DateTime, Duration, NaiveDateTime};
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

/// Errors that can occur while reshaping data.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Duplicate entry at row {row}, column {col}")]
    DuplicateCell { row: usize, col: usize },

    #[error("Invalid column key at record {0}")]
    InvalidKey(usize),

    #[error("Length mismatch: {left} row keys vs {right} column keys")]
    LengthMismatch { left: usize, right: usize },

    #[error("Resample interval must be positive, got {0} s")]
    InvalidInterval(i64),

    #[error("Timestamp out of range: {0} s")]
    TimestampOutOfRange(i64),
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Sorted unique values.
pub fn unique_sorted<T: Ord + Clone>(values: &[T]) -> Vec<T> {
    let mut out = values.to_vec();
    out.sort();
    out.dedup();
    out
}

/// Sorted unique floats, NaN excluded.
pub fn unique_sorted_f64(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    out.sort_by(f64::total_cmp);
    out.dedup();
    out
}

/// Exact position of `value` in a sorted float axis.
pub fn position_f64(axis: &[f64], value: f64) -> Option<usize> {
    axis.binary_search_by(|x| x.total_cmp(&value)).ok()
}

/// Index of the element of a sorted `axis` closest to `value`.
///
/// Ties go to the lower index. Returns `None` for an empty axis.
pub fn nearest_index<T, F>(axis: &[T], value: &T, distance: F) -> Option<usize>
where
    T: PartialOrd,
    F: Fn(&T, &T) -> f64,
{
    if axis.is_empty() {
        return None;
    }
    let upper = axis.partition_point(|x| x < value);
    if upper == 0 {
        return Some(0);
    }
    if upper == axis.len() {
        return Some(axis.len() - 1);
    }
    let lower = upper - 1;
    if distance(&axis[lower], value) <= distance(&axis[upper], value) {
        Some(lower)
    } else {
        Some(upper)
    }
}

/// Like [`nearest_index`], but only matches a cell the value could belong to.
///
/// A value past either end of the axis matches the end point only within half
/// of the spacing to its neighbour; a single-element axis matches exact values
/// only. Unordered values such as NaN never match.
pub fn nearest_within<T, F>(axis: &[T], value: &T, distance: F) -> Option<usize>
where
    T: PartialOrd,
    F: Fn(&T, &T) -> f64,
{
    value.partial_cmp(value)?;
    let index = nearest_index(axis, value, &distance)?;
    let last = axis.len() - 1;
    if value >= &axis[0] && value <= &axis[last] {
        return Some(index);
    }
    let spacing = match index {
        _ if last == 0 => 0.0,
        0 => distance(&axis[0], &axis[1]),
        _ => distance(&axis[last - 1], &axis[last]),
    };
    (distance(&axis[index], value) <= spacing / 2.0).then_some(index)
}

/// Seconds between two timestamps, as a float distance for [`nearest_index`].
pub fn time_distance(a: &NaiveDateTime, b: &NaiveDateTime) -> f64 {
    let delta = *a - *b;
    delta.num_milliseconds().abs() as f64 / 1000.0
}

/// Result of pivoting long records into a (row × column) grid.
///
/// Each cell remembers which source record landed in it, so any number of
/// value columns can be spread onto the same grid with [`Grid::fill`].
#[derive(Debug, Clone)]
pub struct Grid<R> {
    /// Sorted unique row keys.
    pub rows: Vec<R>,
    /// Sorted unique column keys.
    pub cols: Vec<f64>,
    /// Source record index per cell, row-major.
    cells: Vec<Option<usize>>,
    /// First source record (in file order) for each row key.
    first_record: Vec<usize>,
}

impl<R> Grid<R> {
    /// (rows, cols)
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }

    /// Source record index for a cell, if one landed there.
    #[inline]
    pub fn record_at(&self, row: usize, col: usize) -> Option<usize> {
        self.cells[row * self.cols.len() + col]
    }

    /// Index of the first source record belonging to each row.
    pub fn first_records(&self) -> &[usize] {
        &self.first_record
    }

    /// Spread a per-record value column onto the grid. Empty cells are NaN.
    pub fn fill(&self, values: &[f64]) -> Array2<f64> {
        self.fill_with(values, f64::NAN)
    }

    /// Spread a per-record column onto the grid using `empty` for vacant cells.
    pub fn fill_with<T: Clone>(&self, values: &[T], empty: T) -> Array2<T> {
        let (n_rows, n_cols) = self.shape();
        Array2::from_shape_fn((n_rows, n_cols), |(r, c)| match self.record_at(r, c) {
            Some(record) => values[record].clone(),
            None => empty.clone(),
        })
    }

    /// Take the per-row value from the first record of each row.
    pub fn per_row<T: Clone>(&self, values: &[T]) -> Vec<T> {
        self.first_record.iter().map(|&i| values[i].clone()).collect()
    }
}

/// Pivot long records keyed by (row, column) into a grid.
///
/// Row and column axes are sorted and deduplicated. Two records with the
/// same key pair are an error.
pub fn pivot<R: Ord + Clone>(row_keys: &[R], col_keys: &[f64]) -> Result<Grid<R>> {
    if row_keys.len() != col_keys.len() {
        return Err(TransformError::LengthMismatch {
            left: row_keys.len(),
            right: col_keys.len(),
        });
    }

    let rows = unique_sorted(row_keys);
    let cols = unique_sorted_f64(col_keys);
    let mut cells = vec![None; rows.len() * cols.len()];
    let mut first_record = vec![usize::MAX; rows.len()];

    for (record, (row_key, &col_key)) in row_keys.iter().zip(col_keys).enumerate() {
        // Both lookups succeed for non-NaN keys since the axes came from these keys.
        let r = rows
            .binary_search(row_key)
            .map_err(|_| TransformError::InvalidKey(record))?;
        let c = position_f64(&cols, col_key).ok_or(TransformError::InvalidKey(record))?;

        let cell = &mut cells[r * cols.len() + c];
        if cell.is_some() {
            return Err(TransformError::DuplicateCell { row: r, col: c });
        }
        *cell = Some(record);
        first_record[r] = first_record[r].min(record);
    }

    Ok(Grid {
        rows,
        cols,
        cells,
        first_record,
    })
}

/// Fixed-interval time bins.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBins {
    /// Start of every bin from the first occupied to the last occupied one.
    pub starts: Vec<NaiveDateTime>,
    /// Bin of each input sample; `None` for missing timestamps.
    pub assignment: Vec<Option<usize>>,
}

/// Assign timestamps to bins of width `interval`, aligned to the Unix epoch.
///
/// Bins with no samples between the first and last occupied bin are kept
/// so the output axis is regular.
pub fn time_bins(times: &[Option<NaiveDateTime>], interval: Duration) -> Result<TimeBins> {
    let step = interval.num_seconds();
    if step <= 0 {
        return Err(TransformError::InvalidInterval(step));
    }

    let keys: Vec<Option<i64>> = times
        .iter()
        .map(|t| t.map(|t| t.and_utc().timestamp().div_euclid(step)))
        .collect();

    let (first, last) = match (keys.iter().flatten().min(), keys.iter().flatten().max()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => {
            return Ok(TimeBins {
                starts: Vec::new(),
                assignment: vec![None; times.len()],
            })
        }
    };

    let starts = (first..=last)
        .map(|key| {
            let secs = key * step;
            DateTime::from_timestamp(secs, 0)
                .map(|d| d.naive_utc())
                .ok_or(TransformError::TimestampOutOfRange(secs))
        })
        .collect::<Result<Vec<_>>>()?;

    let assignment = keys
        .iter()
        .map(|k| k.map(|k| (k - first) as usize))
        .collect();

    Ok(TimeBins { starts, assignment })
}

/// Mean of each column over the samples (rows) assigned to each bin, ignoring NaN.
///
/// Returns a (bins × columns) array; a bin with no finite sample in a column is NaN.
pub fn bin_mean(samples: ArrayView2<'_, f64>, assignment: &[Option<usize>], n_bins: usize) -> Array2<f64> {
    let n_cols = samples.ncols();
    let mut sums = Array2::<f64>::zeros((n_bins, n_cols));
    let mut counts = Array2::<usize>::zeros((n_bins, n_cols));

    for (row, bin) in samples.outer_iter().zip(assignment) {
        let Some(bin) = *bin else { continue };
        for (c, &v) in row.iter().enumerate() {
            if !v.is_nan() {
                sums[[bin, c]] += v;
                counts[[bin, c]] += 1;
            }
        }
    }

    Array2::from_shape_fn((n_bins, n_cols), |(b, c)| {
        if counts[[b, c]] == 0 {
            f64::NAN
        } else {
            sums[[b, c]] / counts[[b, c]] as f64
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::arr2;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_unique_sorted_f64_drops_nan() {
        assert_eq!(
            unique_sorted_f64(&[300.0, 100.0, f64::NAN, 300.0, 200.0]),
            vec![100.0, 200.0, 300.0]
        );
    }

    #[test]
    fn test_nearest_index() {
        let axis = [10.0, 20.0, 30.0];
        let dist = |a: &f64, b: &f64| (a - b).abs();
        assert_eq!(nearest_index(&axis, &-5.0, dist), Some(0));
        assert_eq!(nearest_index(&axis, &14.0, dist), Some(0));
        assert_eq!(nearest_index(&axis, &15.0, dist), Some(0));
        assert_eq!(nearest_index(&axis, &16.0, dist), Some(1));
        assert_eq!(nearest_index(&axis, &30.0, dist), Some(2));
        assert_eq!(nearest_index(&axis, &99.0, dist), Some(2));
        assert_eq!(nearest_index(&[] as &[f64], &1.0, dist), None);
    }

    #[test]
    fn test_nearest_within_rejects_values_off_the_axis() {
        let axis = [10.0, 20.0, 30.0];
        let dist = |a: &f64, b: &f64| (a - b).abs();
        assert_eq!(nearest_within(&axis, &14.0, dist), Some(0));
        assert_eq!(nearest_within(&axis, &26.0, dist), Some(2));
        assert_eq!(nearest_within(&axis, &5.0, dist), Some(0));
        assert_eq!(nearest_within(&axis, &4.0, dist), None);
        assert_eq!(nearest_within(&axis, &35.0, dist), Some(2));
        assert_eq!(nearest_within(&axis, &36.0, dist), None);
        assert_eq!(nearest_within(&axis, &f64::NAN, dist), None);
        assert_eq!(nearest_within(&[10.0], &10.0, dist), Some(0));
        assert_eq!(nearest_within(&[10.0], &10.5, dist), None);
        assert_eq!(nearest_within(&[] as &[f64], &1.0, dist), None);
    }

    #[test]
    fn test_nearest_time_within_grid() {
        let axis = [at(0, 0, 0), at(0, 0, 10), at(0, 0, 20)];
        assert_eq!(nearest_within(&axis, &at(0, 0, 24), time_distance), Some(2));
        assert_eq!(nearest_within(&axis, &at(9, 0, 0), time_distance), None);
    }

    #[test]
    fn test_nearest_time() {
        let axis = [at(0, 0, 0), at(0, 0, 10), at(0, 0, 20)];
        assert_eq!(nearest_index(&axis, &at(0, 0, 12), time_distance), Some(1));
        assert_eq!(nearest_index(&axis, &at(0, 0, 16), time_distance), Some(2));
    }

    #[test]
    fn test_pivot_fills_grid() {
        let rows = vec![at(0, 0, 10), at(0, 0, 0), at(0, 0, 0), at(0, 0, 10), at(0, 0, 10)];
        let cols = vec![100.0, 200.0, 100.0, 200.0, 300.0];
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];

        let grid = pivot(&rows, &cols).unwrap();
        assert_eq!(grid.rows, vec![at(0, 0, 0), at(0, 0, 10)]);
        assert_eq!(grid.cols, vec![100.0, 200.0, 300.0]);
        assert_eq!(grid.first_records(), &[1, 0]);

        let filled = grid.fill(&values);
        assert_eq!(filled[[0, 0]], 3.0);
        assert_eq!(filled[[0, 1]], 2.0);
        assert!(filled[[0, 2]].is_nan());
        assert_eq!(filled.row(1).to_vec(), vec![1.0, 4.0, 5.0]);

        let labels = vec!["a", "b", "c", "d", "e"];
        assert_eq!(grid.per_row(&labels), vec!["b", "a"]);
    }

    #[test]
    fn test_pivot_rejects_duplicates() {
        let rows = vec![1, 1];
        let cols = vec![5.0, 5.0];
        assert!(matches!(
            pivot(&rows, &cols),
            Err(TransformError::DuplicateCell { row: 0, col: 0 })
        ));
        assert!(pivot(&[1], &[f64::NAN]).is_err());
        assert!(pivot(&[1, 2], &[1.0]).is_err());
    }

    #[test]
    fn test_time_bins_regular_axis() {
        let times = vec![Some(at(0, 1, 0)), Some(at(0, 4, 59)), None, Some(at(0, 16, 0))];
        let bins = time_bins(&times, Duration::minutes(5)).unwrap();
        assert_eq!(
            bins.starts,
            vec![at(0, 0, 0), at(0, 5, 0), at(0, 10, 0), at(0, 15, 0)]
        );
        assert_eq!(bins.assignment, vec![Some(0), Some(0), None, Some(3)]);

        assert!(time_bins(&times, Duration::zero()).is_err());
    }

    #[test]
    fn test_bin_mean_ignores_nan() {
        let samples = arr2(&[[1.0, f64::NAN], [3.0, 4.0], [10.0, 20.0]]);
        let assignment = vec![Some(0), Some(0), None];
        let means = bin_mean(samples.view(), &assignment, 2);
        assert_eq!(means[[0, 0]], 2.0);
        assert_eq!(means[[0, 1]], 4.0);
        assert!(means[[1, 0]].is_nan());
    }
}
