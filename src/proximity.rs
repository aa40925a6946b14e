//! Hausdorff closeness between orders.
//!
//! `H(a, b)` is the largest distance from a position of `a` to its nearest
//! position of `b`. The closeness of two orders is `max(H(a, b), H(b, a))`,
//! a cheap stand-in for the extra route length of picking both together.

use rayon::prelude::*;

use crate::model::{Order, Warehouse};

/// Directed Hausdorff distance from the positions of `from` to those of `to`.
pub fn directed_hausdorff(warehouse: &Warehouse, from: &Order, to: &Order) -> f64 {
    from.pickups()
        .map(|p| {
            to.pickups()
                .map(|q| warehouse.distance(p, q))
                .fold(f64::INFINITY, f64::min)
        })
        .filter(|d| d.is_finite())
        .fold(0.0, f64::max)
}

/// Symmetric closeness score; 0 for an order with itself.
pub fn closeness(warehouse: &Warehouse, a: &Order, b: &Order) -> f64 {
    if a.id == b.id {
        return 0.0;
    }

    directed_hausdorff(warehouse, a, b).max(directed_hausdorff(warehouse, b, a))
}

/// Pairwise closeness of all orders, indexed like `warehouse.orders`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosenessMatrix {
    rows: Vec<Vec<f64>>,
}

impl ClosenessMatrix {
    pub fn build(warehouse: &Warehouse) -> Self {
        let orders = &warehouse.orders;
        let rows = orders
            .par_iter()
            .map(|a| orders.iter().map(|b| closeness(warehouse, a, b)).collect())
            .collect();

        Self { rows }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.rows[i][j]
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }
}
