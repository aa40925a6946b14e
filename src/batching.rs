//! Construction of the initial batches.
//!
//! Every method follows the same two-path contract: a primary optimization
//! that may fail, and a singleton fallback that always succeeds. The
//! fallback is logged, never returned as an error.

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assignment::{AssignmentObjective, AssignmentProblem, BranchAndBound};
use crate::error::{PickingError, PickingResult};
use crate::model::{Batch, BatchId, OrderId, Warehouse};
use crate::proximity::ClosenessMatrix;
use crate::traits::{AssignmentSolver, SolveStatus};

/// Batching strategy, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchingMethod {
    /// Location-allocation over batch representatives.
    #[default]
    PMedian,
    /// Pairwise closeness within each batch.
    GraphPartition,
    /// Capacity-constrained k-means over the closeness rows.
    Clustering,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingOptions {
    pub method: BatchingMethod,
    /// Wall-clock limit for the assignment solver.
    pub timeout_ms: u64,
    /// Extra batches over the capacity lower bound, as a fraction.
    pub slack: f64,
    /// Use a feasible but unproven assignment when the time limit expires.
    pub accept_feasible: bool,
    /// Seed of the clustering initialization.
    pub seed: u64,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self {
            method: BatchingMethod::default(),
            timeout_ms: 100_000,
            slack: 0.1,
            accept_feasible: true,
            seed: 0,
        }
    }
}

impl BatchingOptions {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Splits the orders of a warehouse into batches.
pub struct Batcher<'a> {
    warehouse: &'a Warehouse,
    options: BatchingOptions,
    solver: Box<dyn AssignmentSolver + 'a>,
}

impl<'a> Batcher<'a> {
    pub fn new(warehouse: &'a Warehouse, options: BatchingOptions) -> Self {
        Self::with_solver(warehouse, options, Box::new(BranchAndBound))
    }

    /// Uses a caller-provided assignment solver for the model-based methods.
    pub fn with_solver(
        warehouse: &'a Warehouse,
        options: BatchingOptions,
        solver: Box<dyn AssignmentSolver + 'a>,
    ) -> Self {
        Self {
            warehouse,
            options,
            solver,
        }
    }

    /// Batches covering every order exactly once. Never fails.
    pub fn batch(&self) -> Vec<Batch> {
        match self.try_batch() {
            Ok(batches) => {
                info!(method = ?self.options.method, batches = batches.len(), "orders batched");
                batches
            }
            Err(err) => {
                warn!(method = ?self.options.method, %err, "batching failed, falling back to single orders");
                singletons(self.warehouse)
            }
        }
    }

    /// The primary path alone; errors instead of falling back.
    pub fn try_batch(&self) -> PickingResult<Vec<Batch>> {
        let closeness = ClosenessMatrix::build(self.warehouse);
        let max_groups = self.warehouse.minimum_batches(self.options.slack);

        let groups = match self.options.method {
            BatchingMethod::PMedian => {
                self.assign(closeness, max_groups, AssignmentObjective::Representative)?
            }
            BatchingMethod::GraphPartition => {
                self.assign(closeness, max_groups, AssignmentObjective::Pairwise)?
            }
            BatchingMethod::Clustering => {
                Clustering::new(self.warehouse, &closeness, self.options.seed).run(max_groups)?
            }
        };

        let batches = to_batches(groups);
        self.verify(&batches)?;
        Ok(batches)
    }

    fn assign(
        &self,
        closeness: ClosenessMatrix,
        max_groups: usize,
        objective: AssignmentObjective,
    ) -> PickingResult<Vec<Vec<OrderId>>> {
        let problem = AssignmentProblem {
            closeness,
            volumes: self.warehouse.orders.iter().map(|order| order.volume).collect(),
            capacity: self.warehouse.capacity,
            max_groups,
            objective,
        };
        let outcome = self.solver.solve(&problem, self.options.time_limit());
        debug!(status = ?outcome.status, value = outcome.value, "assignment solved");

        match outcome.status {
            SolveStatus::Optimal => {}
            SolveStatus::Feasible if self.options.accept_feasible => {}
            status => return Err(PickingError::Assignment(status)),
        }
        if !problem.is_feasible(&outcome.groups) {
            return Err(PickingError::Assignment(SolveStatus::Infeasible));
        }

        Ok(outcome.groups)
    }

    /// Coverage and capacity of a batching result.
    fn verify(&self, batches: &[Batch]) -> PickingResult<()> {
        let mut seen = vec![false; self.warehouse.nb_orders()];
        for batch in batches {
            if !batch.is_feasible(self.warehouse) {
                return Err(PickingError::Assignment(SolveStatus::Infeasible));
            }
            for &id in &batch.order_ids {
                match seen.get_mut(id) {
                    Some(slot) if !*slot => *slot = true,
                    _ => return Err(PickingError::Assignment(SolveStatus::Infeasible)),
                }
            }
        }

        if seen.into_iter().all(|assigned| assigned) {
            Ok(())
        } else {
            Err(PickingError::Assignment(SolveStatus::Infeasible))
        }
    }
}

/// One batch per order.
pub fn singletons(warehouse: &Warehouse) -> Vec<Batch> {
    warehouse
        .orders
        .iter()
        .enumerate()
        .map(|(idx, order)| Batch::new(BatchId(idx), vec![order.id]))
        .collect()
}

fn to_batches(groups: Vec<Vec<OrderId>>) -> Vec<Batch> {
    groups
        .into_iter()
        .filter(|group| !group.is_empty())
        .enumerate()
        .map(|(idx, mut group)| {
            group.sort_unstable();
            Batch::new(BatchId(idx), group)
        })
        .collect()
}

const MAX_CLUSTERING_ROUNDS: usize = 50;

/// Capacity-constrained k-means; each order is the point given by its row
/// of the closeness matrix.
struct Clustering<'a> {
    warehouse: &'a Warehouse,
    points: &'a [Vec<f64>],
    rng: SmallRng,
}

impl<'a> Clustering<'a> {
    fn new(warehouse: &'a Warehouse, closeness: &'a ClosenessMatrix, seed: u64) -> Self {
        Self {
            warehouse,
            points: closeness.rows(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn run(&mut self, k: usize) -> PickingResult<Vec<Vec<OrderId>>> {
        if self.points.is_empty() {
            return Ok(Vec::new());
        }

        let mut centers = self.initial_centers(k);
        let mut labels = self.assign(&centers)?;
        for round in 0..MAX_CLUSTERING_ROUNDS {
            centers = self.centroids(&labels, centers.len());
            let next = self.assign(&centers)?;
            if next == labels {
                debug!(round, "clustering converged");
                break;
            }
            labels = next;
        }

        let mut groups = vec![Vec::new(); centers.len()];
        for (order, label) in labels.into_iter().enumerate() {
            groups[label].push(order);
        }
        Ok(groups)
    }

    /// Random first center, then farthest-point seeding.
    fn initial_centers(&mut self, k: usize) -> Vec<Vec<f64>> {
        let n = self.points.len();
        let mut chosen = vec![self.rng.gen_range(0..n)];
        while chosen.len() < k.min(n) {
            let farthest = (0..n)
                .filter(|idx| !chosen.contains(idx))
                .map(|idx| {
                    let nearest = chosen
                        .iter()
                        .map(|&c| squared_distance(&self.points[idx], &self.points[c]))
                        .fold(f64::INFINITY, f64::min);
                    (idx, nearest)
                })
                .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
            match farthest {
                Some((idx, _)) => chosen.push(idx),
                None => break,
            }
        }
        chosen.into_iter().map(|idx| self.points[idx].clone()).collect()
    }

    /// Largest orders first, each into the nearest cluster with room left.
    fn assign(&self, centers: &[Vec<f64>]) -> PickingResult<Vec<usize>> {
        let capacity = self.warehouse.capacity;
        let mut order_ids: Vec<OrderId> = (0..self.points.len()).collect();
        order_ids.sort_by_key(|&id| std::cmp::Reverse(self.warehouse.orders[id].volume));

        let mut volume = vec![0u64; centers.len()];
        let mut count = vec![0usize; centers.len()];
        let mut labels = vec![0; self.points.len()];

        for id in order_ids {
            let order_volume = self.warehouse.orders[id].volume as u64;
            let nearest = centers
                .iter()
                .enumerate()
                .filter(|&(c, _)| capacity.admits(volume[c] + order_volume, count[c] + 1))
                .map(|(c, center)| (c, squared_distance(&self.points[id], center)))
                .min_by(|a, b| a.1.total_cmp(&b.1));

            let Some((c, _)) = nearest else {
                return Err(PickingError::Assignment(SolveStatus::Infeasible));
            };
            volume[c] += order_volume;
            count[c] += 1;
            labels[id] = c;
        }

        Ok(labels)
    }

    /// Mean point of each cluster; empty clusters keep a zero center.
    fn centroids(&self, labels: &[usize], k: usize) -> Vec<Vec<f64>> {
        let dim = self.points.len();
        let mut sums = vec![vec![0.0; dim]; k];
        let mut sizes = vec![0usize; k];
        for (point, &label) in self.points.iter().zip(labels) {
            sizes[label] += 1;
            for (acc, value) in sums[label].iter_mut().zip(point) {
                *acc += value;
            }
        }
        for (sum, &size) in sums.iter_mut().zip(&sizes) {
            if size > 0 {
                sum.iter_mut().for_each(|value| *value /= size as f64);
            }
        }
        sums
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
