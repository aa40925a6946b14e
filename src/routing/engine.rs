//! Heuristic pickup-and-delivery routing.
//!
//! Starts from a seed order of the pickups (the previous route, a hint, or
//! the sequential visit order) and improves it with 2-opt segment reversals
//! and or-opt relocations until no move helps or time runs out. Deliveries
//! are placed right after the last pickup of their order, which keeps every
//! sequence precedence-feasible without costing anything.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{RouteOutcome, RoutingGraph, warn_on_budget};
use crate::traits::{RouteSolver, SolveStatus};

#[derive(Debug, Clone)]
pub struct ConstraintRouting {
    /// Check the order-count and volume dimensions along the route.
    enforce_capacity: bool,
}

impl ConstraintRouting {
    pub fn new(enforce_capacity: bool) -> Self {
        Self { enforce_capacity }
    }

    fn initial_order(graph: &RoutingGraph, seed: Option<&[usize]>) -> Vec<usize> {
        match seed {
            Some(seed) if graph.is_pickup_permutation(seed) => seed.to_vec(),
            Some(_) => {
                trace!("seed does not cover the batch, starting from sequential order");
                graph.pickups()
            }
            None => graph.pickups(),
        }
    }
}

impl RouteSolver for ConstraintRouting {
    fn solve(
        &self,
        graph: &RoutingGraph,
        seed: Option<&[usize]>,
        time_limit: Duration,
    ) -> RouteOutcome {
        let started = Instant::now();
        let deadline = started + time_limit;
        let mut order = Self::initial_order(graph, seed);

        if self.enforce_capacity {
            if let Err(reason) = graph.check_load(&graph.complete(&order)) {
                debug!(%reason, "capacity dimension violated");
                return RouteOutcome::failed(SolveStatus::Infeasible);
            }
        }

        let mut cost = graph.path_cost(&order);
        let initial = cost;
        let mut rounds = 0;
        while Instant::now() < deadline {
            rounds += 1;
            let improved = two_opt(graph, &mut order, &mut cost, deadline)
                || or_opt(graph, &mut order, &mut cost, deadline);
            if !improved {
                break;
            }
        }
        warn_on_budget(started.elapsed(), time_limit, "constraint routing");
        debug!(rounds, initial, cost, "local search routing finished");

        let sequence = graph.complete(&order);
        let cost = graph.sequence_cost(&sequence);

        RouteOutcome {
            status: SolveStatus::Feasible,
            sequence,
            cost,
        }
    }
}

const EPSILON: f64 = 1e-9;

/// Applies the first improving segment reversal, if any, before `deadline`.
fn two_opt(graph: &RoutingGraph, order: &mut [usize], cost: &mut f64, deadline: Instant) -> bool {
    let n = order.len();
    for i in 0..n {
        if Instant::now() >= deadline {
            return false;
        }
        for j in i + 1..n {
            order[i..=j].reverse();
            let candidate = graph.path_cost(order);
            if candidate + EPSILON < *cost {
                *cost = candidate;
                return true;
            }
            order[i..=j].reverse();
        }
    }
    false
}

/// Applies the first improving single-node relocation, if any, before `deadline`.
fn or_opt(graph: &RoutingGraph, order: &mut Vec<usize>, cost: &mut f64, deadline: Instant) -> bool {
    let n = order.len();
    for from in 0..n {
        if Instant::now() >= deadline {
            return false;
        }
        for to in (0..n).filter(|&to| to != from) {
            let node = order.remove(from);
            order.insert(to, node);
            let candidate = graph.path_cost(order);
            if candidate + EPSILON < *cost {
                *cost = candidate;
                return true;
            }
            let node = order.remove(to);
            order.insert(from, node);
        }
    }
    false
}
