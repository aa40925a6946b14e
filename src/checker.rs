//! Independent feasibility check and evaluation of a solution.
//!
//! The checker trusts nothing the solver reports: coverage, capacity and
//! costs are recomputed from the routes and the distance matrix.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::model::{Batch, ItemId, OrderId, Route, Solution, Warehouse};

const TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub feasible: bool,
    pub violations: Vec<String>,
    /// Every order picked on its own trip, items in listed order.
    pub base_cost: f64,
    pub objective_cost: f64,
    /// Saving over the base cost, in percent.
    pub improvement_pct: f64,
}

/// Cost of picking every order alone: start depot, its pickups as listed,
/// end depot.
pub fn base_cost(warehouse: &Warehouse) -> f64 {
    warehouse
        .base_solution()
        .into_iter()
        .map(|pickups| {
            let mut sequence = Vec::with_capacity(pickups.len() + 2);
            sequence.push(*warehouse.start_depot());
            sequence.extend(pickups);
            sequence.push(*warehouse.end_depot());
            Route::new(sequence).distance(warehouse)
        })
        .sum()
}

pub fn check(warehouse: &Warehouse, solution: &Solution) -> CheckReport {
    let mut violations = Vec::new();
    check_coverage(warehouse, solution, &mut violations);

    let mut objective_cost = 0.0;
    for (idx, batch) in solution.batches.iter().enumerate().filter(|(_, b)| !b.is_empty()) {
        check_capacity(warehouse, idx, batch, &mut violations);
        match &batch.route {
            Some(route) => {
                check_route(warehouse, idx, batch, route, &mut violations);
                objective_cost += route.distance(warehouse);
            }
            None => violations.push(format!("batch {idx} has no route")),
        }
    }

    let base_cost = base_cost(warehouse);
    let improvement_pct = if base_cost > 0.0 {
        100.0 * (base_cost - objective_cost) / base_cost
    } else {
        0.0
    };
    let feasible = violations.is_empty();

    if feasible {
        info!(base_cost, objective_cost, improvement_pct, "solution is feasible");
    } else {
        warn!(violations = violations.len(), "solution is infeasible");
    }

    CheckReport {
        feasible,
        violations,
        base_cost,
        objective_cost,
        improvement_pct,
    }
}

fn check_coverage(warehouse: &Warehouse, solution: &Solution, violations: &mut Vec<String>) {
    let mut seen: BTreeMap<OrderId, usize> = BTreeMap::new();
    for id in solution.batches.iter().flat_map(|batch| &batch.order_ids) {
        *seen.entry(*id).or_default() += 1;
    }

    for (id, times) in &seen {
        if warehouse.order(*id).is_none() {
            violations.push(format!("unknown order {id}"));
        } else if *times > 1 {
            violations.push(format!("order {id} is in {times} batches"));
        }
    }
    for order in warehouse.orders.iter().filter(|order| !seen.contains_key(&order.id)) {
        violations.push(format!("order {} is not batched", order.id));
    }
}

fn check_capacity(warehouse: &Warehouse, idx: usize, batch: &Batch, violations: &mut Vec<String>) {
    let capacity = warehouse.capacity;
    if batch.nb_orders() > capacity.nb_orders {
        violations.push(format!(
            "batch {idx} carries {} orders, capacity is {}",
            batch.nb_orders(),
            capacity.nb_orders
        ));
    }
    let volume = batch.volume(warehouse);
    if volume > capacity.volume as u64 {
        violations.push(format!(
            "batch {idx} carries volume {volume}, capacity is {}",
            capacity.volume
        ));
    }
}

fn check_route(
    warehouse: &Warehouse,
    idx: usize,
    batch: &Batch,
    route: &Route,
    violations: &mut Vec<String>,
) {
    let first = route.sequence.first().map(|item| item.position.id);
    let last = route.sequence.last().map(|item| item.position.id);
    if first != Some(warehouse.start_depot().position.id) {
        violations.push(format!("batch {idx} does not start at the depot"));
    }
    if last != Some(warehouse.end_depot().position.id) {
        violations.push(format!("batch {idx} does not end at the depot"));
    }

    let expected: BTreeSet<ItemId> = batch.pickups(warehouse).iter().map(|item| item.id).collect();
    let mut visited: BTreeMap<ItemId, usize> = BTreeMap::new();
    for item in route.pickups() {
        *visited.entry(item.id).or_default() += 1;
    }

    if let Some(id) = expected.iter().find(|id| !visited.contains_key(id)) {
        violations.push(format!("batch {idx} misses item {id}"));
    }
    if let Some(id) = visited.keys().find(|id| !expected.contains(id)) {
        violations.push(format!("batch {idx} visits item {id} of another batch"));
    }
    if let Some((id, times)) = visited.iter().find(|&(_, &times)| times > 1) {
        violations.push(format!("batch {idx} visits item {id} {times} times"));
    }

    let distance = route.distance(warehouse);
    if (distance - batch.metrics.distance).abs() > TOLERANCE {
        violations.push(format!(
            "batch {idx} reports distance {} but its route is {distance}",
            batch.metrics.distance
        ));
    }
}
