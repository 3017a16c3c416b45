//! Dense row-major 2-D table and disjoint mutable row windows over it.

use crate::error::{GasError, Result};
use std::ops::Range;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table2 {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Table2 {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Resizes to `rows × cols`, discarding all values.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.data.clear();
        self.data.resize(rows * cols, 0.0);
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn set_to_zero(&mut self) {
        self.data.fill(0.0);
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Splits the table into one mutable window per range. Ranges must be
    /// ascending and non-overlapping; gaps between them stay untouched.
    pub fn windows_mut(&mut self, ranges: &[Range<usize>]) -> Result<Vec<RowWindow<'_>>> {
        let cols = self.cols;
        let rows = self.rows;
        let slices = split_by_ranges(self.data.as_mut_slice(), cols, rows, ranges)?;
        Ok(slices
            .into_iter()
            .zip(ranges)
            .map(|(data, range)| RowWindow {
                first: range.start,
                cols,
                data,
            })
            .collect())
    }
}

/// Exclusive access to a contiguous block of table rows, addressed by global row index.
#[derive(Debug)]
pub struct RowWindow<'a> {
    first: usize,
    cols: usize,
    data: &'a mut [f64],
}

impl RowWindow<'_> {
    pub fn first_row(&self) -> usize {
        self.first
    }

    pub fn row_count(&self) -> usize {
        if self.cols == 0 { 0 } else { self.data.len() / self.cols }
    }

    pub fn contains(&self, row: usize) -> bool {
        row >= self.first && row < self.first + self.row_count()
    }

    pub fn row_mut(&mut self, row: usize) -> Option<&mut [f64]> {
        if !self.contains(row) {
            return None;
        }
        let start = (row - self.first) * self.cols;
        Some(&mut self.data[start..start + self.cols])
    }

    pub fn set_row(&mut self, row: usize, values: &[f64]) -> Result<()> {
        let cols = self.cols;
        if values.len() != cols {
            return Err(GasError::row_width("table row", cols, values.len()));
        }
        let first = self.first;
        let count = self.row_count();
        let target = self.row_mut(row).ok_or_else(|| {
            GasError::InvalidPartition(format!(
                "row {row} outside window {first}..{}",
                first + count
            ))
        })?;
        target.copy_from_slice(values);
        Ok(())
    }
}

/// Carves `data` (row-major, `stride` elements per row, `rows` rows) into
/// disjoint mutable slices, one per range.
pub(crate) fn split_by_ranges<'a, T>(
    data: &'a mut [T],
    stride: usize,
    rows: usize,
    ranges: &[Range<usize>],
) -> Result<Vec<&'a mut [T]>> {
    let mut rest = data;
    let mut offset = 0;
    let mut out = Vec::with_capacity(ranges.len());
    for range in ranges {
        if range.start < offset || range.end < range.start || range.end > rows {
            return Err(GasError::InvalidPartition(format!(
                "range {}..{} is unordered, overlapping or beyond {rows} rows",
                range.start, range.end
            )));
        }
        let (_, tail) = std::mem::take(&mut rest).split_at_mut((range.start - offset) * stride);
        let (window, tail) = tail.split_at_mut(range.len() * stride);
        out.push(window);
        rest = tail;
        offset = range.end;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_write_only_their_rows() {
        let mut table = Table2::new(5, 2);
        {
            let mut windows = table.windows_mut(&[0..2, 2..2, 3..5]).unwrap();
            assert_eq!(windows.len(), 3);
            assert_eq!(windows[1].row_count(), 0);
            windows[0].set_row(1, &[1.0, 1.5]).unwrap();
            windows[2].set_row(4, &[4.0, 4.5]).unwrap();
            assert!(windows[2].set_row(1, &[0.0, 0.0]).is_err());
        }
        assert_eq!(table.row(1), &[1.0, 1.5]);
        assert_eq!(table.row(2), &[0.0, 0.0]);
        assert_eq!(table.row(4), &[4.0, 4.5]);
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let mut table = Table2::new(4, 1);
        assert!(table.windows_mut(&[0..3, 2..4]).is_err());
        assert!(table.windows_mut(&[0..5]).is_err());
    }

    #[test]
    fn row_width_is_checked() {
        let mut table = Table2::new(2, 3);
        let mut windows = table.windows_mut(&[0..2]).unwrap();
        let err = windows[0].set_row(0, &[1.0]).unwrap_err();
        assert!(matches!(err, GasError::RowWidthMismatch { expected: 3, actual: 1, .. }));
    }

    #[test]
    fn resize_discards_values() {
        let mut table = Table2::new(2, 2);
        table.set(1, 1, 3.0);
        table.resize(3, 2);
        assert_eq!(table.rows(), 3);
        assert!(table.data().iter().all(|v| *v == 0.0));
    }
}
