//! Distance matrix between warehouse positions.
//!
//! The matrix is precomputed and may be asymmetric. Lookups never fail: a
//! NaN, negative or missing entry is logged and read as 0 so that one bad
//! value cannot abort a whole optimization run.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PickingError, PickingResult};
use crate::model::Position;
use crate::traits::DistanceMatrixProvider;

/// Dense row-major matrix indexed by position id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceMatrix {
    size: usize,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Builds a matrix from square rows.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> PickingResult<Self> {
        let size = rows.len();
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != size) {
            return Err(PickingError::InvalidInstance(format!(
                "distance matrix row {idx} has {} columns, expected {size}",
                row.len()
            )));
        }

        Ok(Self {
            size,
            values: rows.into_iter().flatten().collect(),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Sanitized distance from one position to another.
    pub fn get(&self, from: usize, to: usize) -> f64 {
        let value = if from < self.size && to < self.size {
            self.values[from * self.size + to]
        } else {
            f64::NAN
        };

        if value.is_nan() || value < 0.0 {
            warn!(from, to, value, "invalid distance, using 0");
            return 0.0;
        }

        value
    }
}

/// Manhattan distances, the usual metric between racks in a picking area.
#[derive(Debug, Clone, Copy, Default)]
pub struct RectilinearMatrix;

impl DistanceMatrixProvider for RectilinearMatrix {
    fn matrix_for(&self, positions: &[Position]) -> DistanceMatrix {
        build(positions, |a, b| (a.x - b.x).abs() + (a.y - b.y).abs())
    }
}

/// Straight-line distances.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatrix;

impl DistanceMatrixProvider for EuclideanMatrix {
    fn matrix_for(&self, positions: &[Position]) -> DistanceMatrix {
        build(positions, |a, b| ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt())
    }
}

/// Row `i` belongs to the position whose id is `i`.
fn build(positions: &[Position], metric: impl Fn(&Position, &Position) -> f64) -> DistanceMatrix {
    let size = positions.iter().map(|p| p.id + 1).max().unwrap_or(0);
    let mut values = vec![0.0; size * size];

    for from in positions {
        for to in positions {
            if from.id != to.id {
                values[from.id * size + to.id] = metric(from, to);
            }
        }
    }

    DistanceMatrix { size, values }
}
