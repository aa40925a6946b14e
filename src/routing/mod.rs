//! Picker routing for one batch at a time.
//!
//! A batch is turned into a [`RoutingGraph`]: the start depot, every pickup
//! item, one artificial delivery node per order, and the end depot. The
//! artificial node of an order must follow all of its pickups and carries
//! the order's demand (1) and volume, so capacity is checked on orders even
//! though items weigh nothing. Artificial nodes cost nothing to enter or
//! leave and are stripped from the returned route.
//!
//! Batches are independent, so [`Router::route_all`] fans them out on the
//! rayon pool.

pub mod engine;
pub mod exact;

use std::collections::HashMap;
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PickingError, PickingResult, RoutingFailure};
use crate::model::{Batch, Capacity, Item, ItemId, Metrics, OrderId, Route, Warehouse};
use crate::traits::{RouteSolver, SolveStatus};

pub use engine::ConstraintRouting;
pub use exact::{ExactTsp, MultiCommodityFlow};

/// Routing strategy, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoutingMethod {
    /// Exact TSP over the pickups; subtours ruled out by commodity flows.
    TspMultiCommodityFlow,
    /// Pickup/delivery local search seeded with the sequential visit order.
    TspConstraintBased,
    /// Like `TspConstraintBased` with count and volume dimensions enforced,
    /// seeded from the previous solution when one is known.
    #[default]
    Vrp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingOptions {
    pub method: RoutingMethod,
    /// Wall-clock limit per batch.
    pub timeout_ms: u64,
    /// Largest pickup count solved by dynamic programming.
    pub exact_node_limit: usize,
    /// Route batches on the rayon pool.
    pub parallel: bool,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self {
            method: RoutingMethod::default(),
            timeout_ms: 10_000,
            exact_node_limit: 14,
            parallel: true,
        }
    }
}

impl RoutingOptions {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Result of a route solver call.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    pub status: SolveStatus,
    /// Node indices from `graph.start()` to `graph.end()`.
    pub sequence: Vec<usize>,
    pub cost: f64,
}

impl RouteOutcome {
    pub fn failed(status: SolveStatus) -> Self {
        Self {
            status,
            sequence: Vec::new(),
            cost: 0.0,
        }
    }
}

/// Pickup-and-delivery graph of a single batch.
#[derive(Debug, Clone)]
pub struct RoutingGraph {
    nodes: Vec<Item>,
    /// Owning order of every pickup and artificial node.
    owner: Vec<Option<OrderId>>,
    /// Artificial node of each order, keyed by order id.
    delivery: HashMap<OrderId, usize>,
    demand: Vec<usize>,
    volume: Vec<u32>,
    costs: Vec<f64>,
    capacity: Capacity,
}

impl RoutingGraph {
    pub fn build(warehouse: &Warehouse, batch: &Batch) -> Self {
        let first_artificial = warehouse.next_item_id();
        let mut nodes = vec![*warehouse.start_depot()];
        let mut owner = vec![None];
        let mut demand = vec![0];
        let mut volume = vec![0];
        let mut delivery = HashMap::new();

        for order in batch.orders(warehouse) {
            for item in order.pickups() {
                nodes.push(*item);
                owner.push(Some(order.id));
                demand.push(0);
                volume.push(0);
            }

            let anchor = order
                .pickups()
                .last()
                .map(|item| item.position)
                .unwrap_or(warehouse.start_depot().position);
            delivery.insert(order.id, nodes.len());
            nodes.push(Item::artificial(first_artificial + order.id, anchor));
            owner.push(Some(order.id));
            demand.push(1);
            volume.push(order.volume);
        }

        nodes.push(*warehouse.end_depot());
        owner.push(None);
        demand.push(0);
        volume.push(0);

        let n = nodes.len();
        let mut costs = vec![0.0; n * n];
        for (i, from) in nodes.iter().enumerate() {
            for (j, to) in nodes.iter().enumerate() {
                if i != j {
                    costs[i * n + j] = warehouse.distance(from, to);
                }
            }
        }

        Self {
            nodes,
            owner,
            delivery,
            demand,
            volume,
            costs,
            capacity: warehouse.capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn start(&self) -> usize {
        0
    }

    pub fn end(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn node(&self, idx: usize) -> &Item {
        &self.nodes[idx]
    }

    pub fn cost(&self, from: usize, to: usize) -> f64 {
        self.costs[from * self.nodes.len() + to]
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    pub fn demand(&self, idx: usize) -> usize {
        self.demand[idx]
    }

    pub fn volume(&self, idx: usize) -> u32 {
        self.volume[idx]
    }

    pub fn is_pickup(&self, idx: usize) -> bool {
        self.nodes[idx].is_pickup()
    }

    pub fn is_artificial(&self, idx: usize) -> bool {
        self.nodes[idx].is_artificial()
    }

    pub fn pickups(&self) -> Vec<usize> {
        (0..self.nodes.len()).filter(|&i| self.is_pickup(i)).collect()
    }

    /// Whether `seed` lists every pickup node exactly once.
    pub fn is_pickup_permutation(&self, seed: &[usize]) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let all_pickups = seed.iter().all(|&node| {
            node < seen.len() && self.is_pickup(node) && !std::mem::replace(&mut seen[node], true)
        });
        all_pickups && seed.len() == self.pickups().len()
    }

    /// Artificial node paired with a pickup node.
    pub fn delivery_of(&self, idx: usize) -> Option<usize> {
        self.owner[idx].and_then(|order| self.delivery.get(&order).copied())
    }

    /// Travel cost of a sequence; artificial nodes are skipped over.
    pub fn sequence_cost(&self, sequence: &[usize]) -> f64 {
        let mut total = 0.0;
        let mut last: Option<usize> = None;
        for &node in sequence.iter().filter(|&&node| !self.is_artificial(node)) {
            if let Some(prev) = last {
                total += self.cost(prev, node);
            }
            last = Some(node);
        }
        total
    }

    /// Cost of visiting `pickups` in order between the two depots.
    pub fn path_cost(&self, pickups: &[usize]) -> f64 {
        let mut total = 0.0;
        let mut at = self.start();
        for &node in pickups.iter().chain(std::iter::once(&self.end())) {
            total += self.cost(at, node);
            at = node;
        }
        total
    }

    /// Start depot, pickups in the given order, each artificial node right
    /// after the last pickup of its order, end depot.
    pub fn complete(&self, pickups: &[usize]) -> Vec<usize> {
        let mut remaining: HashMap<OrderId, usize> = HashMap::new();
        for &idx in pickups {
            if let Some(order) = self.owner[idx] {
                *remaining.entry(order).or_default() += 1;
            }
        }

        let mut sequence = Vec::with_capacity(self.nodes.len());
        sequence.push(self.start());
        for &idx in pickups {
            sequence.push(idx);
            let Some(order) = self.owner[idx] else { continue };
            if let Some(count) = remaining.get_mut(&order) {
                *count -= 1;
                if *count == 0 {
                    if let Some(&delivery) = self.delivery.get(&order) {
                        sequence.push(delivery);
                    }
                }
            }
        }

        // orders without pickups still need their delivery visited
        let mut idle: Vec<usize> = self
            .delivery
            .iter()
            .filter(|(order, _)| !remaining.contains_key(*order))
            .map(|(_, &delivery)| delivery)
            .collect();
        idle.sort_unstable();
        sequence.extend(idle);

        sequence.push(self.end());
        sequence
    }

    /// Whether a sequence visits every node once, between the depots, with
    /// each delivery after all of its pickups.
    pub fn is_valid_sequence(&self, sequence: &[usize]) -> bool {
        let n = self.nodes.len();
        if sequence.len() != n
            || sequence.first() != Some(&self.start())
            || sequence.last() != Some(&self.end())
        {
            return false;
        }

        let mut rank = vec![usize::MAX; n];
        for (pos, &node) in sequence.iter().enumerate() {
            if node >= n || rank[node] != usize::MAX {
                return false;
            }
            rank[node] = pos;
        }

        (0..n)
            .filter(|&i| self.is_pickup(i))
            .all(|i| self.delivery_of(i).is_none_or(|d| rank[i] < rank[d]))
    }

    /// Cumulative (orders, volume) load at the end of a sequence, or the
    /// first dimension exceeded along it.
    pub fn check_load(&self, sequence: &[usize]) -> Result<(usize, u64), String> {
        let mut units = 0;
        let mut volume = 0u64;
        for &node in sequence {
            units += self.demand[node];
            volume += self.volume[node] as u64;
            if units > self.capacity.nb_orders {
                return Err(format!(
                    "{units} orders exceed the capacity of {}",
                    self.capacity.nb_orders
                ));
            }
            if volume > self.capacity.volume as u64 {
                return Err(format!(
                    "volume {volume} exceeds the capacity of {}",
                    self.capacity.volume
                ));
            }
        }
        Ok((units, volume))
    }

    /// Items of a sequence without artificial nodes.
    pub fn to_route(&self, sequence: &[usize]) -> Route {
        Route::new(
            sequence
                .iter()
                .filter(|&&node| !self.is_artificial(node))
                .map(|&node| self.nodes[node])
                .collect(),
        )
    }
}

/// Pickup order known from a previous solution, used to seed routing.
#[derive(Debug, Clone, Default)]
pub struct RouteHint {
    rank: HashMap<ItemId, usize>,
}

impl RouteHint {
    pub fn from_sequences(sequences: &[Vec<Item>]) -> Self {
        let rank = sequences
            .iter()
            .flatten()
            .filter(|item| item.is_pickup())
            .enumerate()
            .map(|(rank, item)| (item.id, rank))
            .collect();
        Self { rank }
    }

    pub fn is_empty(&self) -> bool {
        self.rank.is_empty()
    }

    /// Pickup nodes ordered by their rank in the hint; unknown ones last.
    fn seed(&self, graph: &RoutingGraph) -> Vec<usize> {
        let mut pickups = graph.pickups();
        pickups.sort_by_key(|&idx| {
            let rank = self.rank.get(&graph.node(idx).id).copied();
            (rank.unwrap_or(usize::MAX), idx)
        });
        pickups
    }
}

/// Routes batches with the configured strategy.
pub struct Router<'a> {
    warehouse: &'a Warehouse,
    options: RoutingOptions,
    solver: Box<dyn RouteSolver + 'a>,
    hint: Option<RouteHint>,
}

impl<'a> Router<'a> {
    pub fn new(warehouse: &'a Warehouse, options: RoutingOptions) -> Self {
        let solver: Box<dyn RouteSolver> = match options.method {
            RoutingMethod::TspMultiCommodityFlow => Box::new(ExactTsp::new(options.exact_node_limit)),
            RoutingMethod::TspConstraintBased => Box::new(ConstraintRouting::new(false)),
            RoutingMethod::Vrp => Box::new(ConstraintRouting::new(true)),
        };
        Self::with_solver(warehouse, options, solver)
    }

    /// Uses a caller-provided route solver instead of the configured one.
    pub fn with_solver(
        warehouse: &'a Warehouse,
        options: RoutingOptions,
        solver: Box<dyn RouteSolver + 'a>,
    ) -> Self {
        Self {
            warehouse,
            options,
            solver,
            hint: None,
        }
    }

    /// Seeds the `Vrp` method from a previous solution.
    pub fn with_hint(mut self, hint: RouteHint) -> Self {
        self.hint = Some(hint).filter(|hint| !hint.is_empty());
        self
    }

    /// Routes one batch and returns it with a fresh route and metrics.
    pub fn route_batch(&self, batch: &Batch) -> Result<Batch, RoutingFailure> {
        let graph = RoutingGraph::build(self.warehouse, batch);
        let seed = self.seed(&graph, batch);
        let outcome = self
            .solver
            .solve(&graph, seed.as_deref(), self.options.time_limit());

        match outcome.status {
            SolveStatus::Optimal | SolveStatus::Feasible => {}
            SolveStatus::Infeasible => {
                let reason = graph
                    .check_load(&graph.complete(&graph.pickups()))
                    .err()
                    .unwrap_or_else(|| "no feasible visiting sequence".to_string());
                return Err(RoutingFailure::Infeasible(reason));
            }
            SolveStatus::Timeout => return Err(RoutingFailure::Timeout),
        }

        if !graph.is_valid_sequence(&outcome.sequence) {
            return Err(RoutingFailure::Solver(format!(
                "invalid visiting sequence {:?}",
                outcome.sequence
            )));
        }
        debug_assert!(MultiCommodityFlow::new(&graph).certify(&outcome.sequence));

        let route = graph.to_route(&outcome.sequence);
        let metrics = Metrics {
            distance: route.distance(self.warehouse),
            units: batch.nb_orders(),
            volume: batch.volume(self.warehouse),
        };
        debug!(batch = batch.id.0, status = ?outcome.status, distance = metrics.distance, "batch routed");

        Ok(Batch {
            id: batch.id,
            order_ids: batch.order_ids.clone(),
            route: Some(route),
            metrics,
            stale: false,
        })
    }

    /// Routes every batch; the first failure is reported with its index.
    pub fn route_all(&self, batches: &[Batch]) -> PickingResult<Vec<Batch>> {
        let route = |(idx, batch): (usize, &Batch)| {
            self.route_batch(batch)
                .map_err(|reason| PickingError::Routing { batch: idx, reason })
        };

        let routed: Vec<Batch> = if self.options.parallel {
            batches.par_iter().enumerate().map(route).collect::<PickingResult<_>>()?
        } else {
            batches.iter().enumerate().map(route).collect::<PickingResult<_>>()?
        };

        let total: f64 = routed.iter().map(Batch::distance).sum();
        info!(method = ?self.options.method, batches = routed.len(), distance = total, "batches routed");
        Ok(routed)
    }

    /// The batch's own route when it has one, otherwise the hint for `Vrp`.
    fn seed(&self, graph: &RoutingGraph, batch: &Batch) -> Option<Vec<usize>> {
        if let Some(route) = &batch.route {
            let hint = RouteHint::from_sequences(&[route.sequence.clone()]);
            return Some(hint.seed(graph));
        }

        match (self.options.method, &self.hint) {
            (RoutingMethod::Vrp, Some(hint)) => Some(hint.seed(graph)),
            _ => None,
        }
    }
}

pub(crate) fn warn_on_budget(elapsed: Duration, limit: Duration, what: &str) {
    if elapsed >= limit {
        warn!(?limit, "{what} stopped at its time limit");
    }
}
