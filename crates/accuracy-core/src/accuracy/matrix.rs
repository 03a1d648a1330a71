//! Error (confusion) matrix.
//!
//! ```text
//!               classified
//!          |    | L1 | L2 | L3 |
//!   t      | L1 |    |    |    |
//!   h  map | L2 |    |    |    |
//!   e      | L3 |    |    |    |
//! ```
//!
//! Rows are thematic map values, columns are classified values. Both axes use
//! the ascending set of every value seen on either side.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorMatrix {
    values: Vec<i64>,
    /// Row-major, `values.len()²` cells.
    cells: Vec<u64>,
}

impl ErrorMatrix {
    /// Build from paired label sequences of equal length.
    pub fn from_labels(thematic: &[i64], classified: &[i64]) -> Result<Self> {
        if thematic.len() != classified.len() {
            return Err(Error::InvalidInput(format!(
                "{} thematic labels but {} classified labels",
                thematic.len(),
                classified.len()
            )));
        }

        let values: Vec<i64> = thematic
            .iter()
            .chain(classified)
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let n = values.len();
        let mut matrix = Self { values, cells: vec![0; n * n] };

        for (&t, &c) in thematic.iter().zip(classified) {
            // Both values are in the axis set by construction.
            if let (Some(i), Some(j)) = (matrix.index_of(t), matrix.index_of(c)) {
                matrix.cells[i * n + j] += 1;
            }
        }
        Ok(matrix)
    }

    /// Axis values, ascending.
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn index_of(&self, value: i64) -> Option<usize> {
        self.values.binary_search(&value).ok()
    }

    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.cells[row * self.size() + col]
    }

    /// Count for a `(thematic value, classified value)` pair.
    pub fn count(&self, thematic: i64, classified: i64) -> u64 {
        match (self.index_of(thematic), self.index_of(classified)) {
            (Some(i), Some(j)) => self.get(i, j),
            _ => 0,
        }
    }

    pub fn row_sum(&self, row: usize) -> u64 {
        let n = self.size();
        self.cells[row * n..(row + 1) * n].iter().sum()
    }

    pub fn column_sum(&self, col: usize) -> u64 {
        (0..self.size()).map(|row| self.get(row, col)).sum()
    }

    pub fn total(&self) -> u64 {
        self.cells.iter().sum()
    }

    pub fn trace(&self) -> u64 {
        (0..self.size()).map(|k| self.get(k, k)).sum()
    }

    /// Diagonal over row total: the fraction of samples mapped as `k` that
    /// were classified as `k`.
    pub fn users_accuracy(&self, k: usize) -> Option<f64> {
        ratio(self.get(k, k), self.row_sum(k))
    }

    /// Diagonal over column total: the fraction of samples classified as `k`
    /// that the map shows as `k`.
    pub fn producers_accuracy(&self, k: usize) -> Option<f64> {
        ratio(self.get(k, k), self.column_sum(k))
    }

    pub fn overall_accuracy(&self) -> Option<f64> {
        ratio(self.trace(), self.total())
    }
}

pub(crate) fn ratio(num: u64, den: u64) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}
