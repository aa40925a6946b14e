//! Warehouse instance and solution model.
//!
//! A [`Warehouse`] is loaded once and stays read-only for a whole run.
//! Batches reference orders by id and carry their own route and metrics.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMatrix;
use crate::error::{PickingError, PickingResult};

pub type OrderId = usize;
pub type ItemId = usize;
pub type PositionId = usize;

/// A storage position. Several items may share one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Row/column of this position in the distance matrix.
    pub id: PositionId,
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(id: PositionId, x: f64, y: f64) -> Self {
        Self { id, x, y }
    }
}

/// Role of an item in a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Pickup,
    Depot,
    /// Consolidation node of an order, only meaningful while routing.
    Artificial,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub position: Position,
    pub kind: ItemKind,
}

impl Item {
    pub fn pickup(id: ItemId, position: Position) -> Self {
        Self {
            id,
            position,
            kind: ItemKind::Pickup,
        }
    }

    pub fn depot(id: ItemId, position: Position) -> Self {
        Self {
            id,
            position,
            kind: ItemKind::Depot,
        }
    }

    pub fn artificial(id: ItemId, position: Position) -> Self {
        Self {
            id,
            position,
            kind: ItemKind::Artificial,
        }
    }

    pub fn is_pickup(&self) -> bool {
        self.kind == ItemKind::Pickup
    }

    pub fn is_depot(&self) -> bool {
        self.kind == ItemKind::Depot
    }

    pub fn is_artificial(&self) -> bool {
        self.kind == ItemKind::Artificial
    }
}

/// A customer order: the unit of batch assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub volume: u32,
    /// Pickup items, in the order they were listed.
    pub items: Vec<Item>,
}

impl Order {
    pub fn new(id: OrderId, volume: u32, items: Vec<Item>) -> Self {
        Self { id, volume, items }
    }

    pub fn pickups(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(|item| item.is_pickup())
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.pickups().map(|item| &item.position)
    }
}

/// Limits of a single picker trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub volume: u32,
    pub nb_orders: usize,
}

impl Capacity {
    pub fn new(volume: u32, nb_orders: usize) -> Self {
        Self { volume, nb_orders }
    }

    pub fn admits(&self, volume: u64, nb_orders: usize) -> bool {
        volume <= self.volume as u64 && nb_orders <= self.nb_orders
    }
}

/// The full problem instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warehouse {
    pub name: String,
    pub orders: Vec<Order>,
    pub capacity: Capacity,
    pub distances: DistanceMatrix,
    start: Item,
    end: Item,
}

impl Warehouse {
    /// Builds a warehouse; depot items get ids after the largest pickup id.
    pub fn new(
        name: impl Into<String>,
        orders: Vec<Order>,
        capacity: Capacity,
        distances: DistanceMatrix,
        start: Position,
        end: Position,
    ) -> Self {
        let next_id = orders
            .iter()
            .flat_map(|order| order.items.iter())
            .map(|item| item.id + 1)
            .max()
            .unwrap_or(0);

        Self {
            name: name.into(),
            orders,
            capacity,
            distances,
            start: Item::depot(next_id, start),
            end: Item::depot(next_id + 1, end),
        }
    }

    pub fn start_depot(&self) -> &Item {
        &self.start
    }

    pub fn end_depot(&self) -> &Item {
        &self.end
    }

    /// First id free for synthetic items such as artificial nodes.
    pub fn next_item_id(&self) -> ItemId {
        self.end.id + 1
    }

    pub fn nb_orders(&self) -> usize {
        self.orders.len()
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders
            .get(id)
            .filter(|order| order.id == id)
            .or_else(|| self.orders.iter().find(|order| order.id == id))
    }

    pub fn total_volume(&self) -> u64 {
        self.orders.iter().map(|order| order.volume as u64).sum()
    }

    pub fn nb_items(&self) -> usize {
        self.orders.iter().map(|order| order.pickups().count()).sum()
    }

    /// Travel distance between two items.
    ///
    /// Artificial nodes are free; items on the same position are 0 apart.
    pub fn distance(&self, from: &Item, to: &Item) -> f64 {
        if from.is_artificial() || to.is_artificial() {
            return 0.0;
        }
        if from.id == to.id || from.position.id == to.position.id {
            return 0.0;
        }
        self.distances.get(from.position.id, to.position.id)
    }

    /// Lower bound on the batch count, inflated by `slack`.
    ///
    /// Clamped to `[1, nb_orders]`: more batches than orders are never useful.
    pub fn minimum_batches(&self, slack: f64) -> usize {
        let nb_orders = self.nb_orders();
        if nb_orders == 0 {
            return 0;
        }

        let by_volume = self.total_volume() as f64 / self.capacity.volume.max(1) as f64;
        let by_count = nb_orders as f64 / self.capacity.nb_orders.max(1) as f64;
        let batches = (by_volume.max(by_count) * (1.0 + slack)).ceil() as usize;

        batches.clamp(1, nb_orders)
    }

    /// Pickup sequence of every order visited on its own, as listed.
    pub fn base_solution(&self) -> Vec<Vec<Item>> {
        self.orders
            .iter()
            .map(|order| order.pickups().copied().collect())
            .collect()
    }

    /// Checks ids, volumes and matrix bounds.
    pub fn validate(&self) -> PickingResult<()> {
        for (idx, order) in self.orders.iter().enumerate() {
            if order.id != idx {
                return Err(PickingError::InvalidInstance(format!(
                    "order ids must be sequential: found {} at index {idx}",
                    order.id
                )));
            }
            if order.volume > self.capacity.volume {
                return Err(PickingError::InvalidInstance(format!(
                    "order {} has volume {} above the capacity {}",
                    order.id, order.volume, self.capacity.volume
                )));
            }
            if order.pickups().next().is_none() {
                return Err(PickingError::InvalidInstance(format!(
                    "order {} has no pickup items",
                    order.id
                )));
            }
        }

        if self.capacity.nb_orders == 0 {
            return Err(PickingError::InvalidInstance(
                "capacity must admit at least one order".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for item in self.orders.iter().flat_map(|order| order.pickups()) {
            if !seen.insert(item.id) {
                return Err(PickingError::InvalidInstance(format!(
                    "item id {} is used more than once",
                    item.id
                )));
            }
        }

        let size = self.distances.size();
        let out_of_bounds = self
            .orders
            .iter()
            .flat_map(|order| order.positions())
            .chain([&self.start.position, &self.end.position])
            .find(|position| position.id >= size);

        if let Some(position) = out_of_bounds {
            return Err(PickingError::InvalidInstance(format!(
                "position {} is outside the {size}x{size} distance matrix",
                position.id
            )));
        }

        Ok(())
    }
}

/// Distance and load of a routed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub distance: f64,
    /// Number of orders carried.
    pub units: usize,
    pub volume: u64,
}

/// Visiting sequence from the start depot to the end depot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub sequence: Vec<Item>,
}

impl Route {
    pub fn new(sequence: Vec<Item>) -> Self {
        Self { sequence }
    }

    pub fn pickups(&self) -> impl Iterator<Item = &Item> {
        self.sequence.iter().filter(|item| item.is_pickup())
    }

    /// Sum of consecutive distances.
    pub fn distance(&self, warehouse: &Warehouse) -> f64 {
        self.sequence
            .windows(2)
            .map(|pair| warehouse.distance(&pair[0], &pair[1]))
            .sum()
    }

    /// Position ids in visiting order, consecutive duplicates collapsed.
    pub fn position_ids(&self) -> Vec<PositionId> {
        let mut ids: Vec<PositionId> = self.sequence.iter().map(|item| item.position.id).collect();
        ids.dedup();
        ids
    }
}

/// Stable identity of a batch across local-search moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(pub usize);

/// A group of orders picked in one trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub order_ids: Vec<OrderId>,
    pub route: Option<Route>,
    pub metrics: Metrics,
    /// The route was not recomputed after the order set changed.
    pub stale: bool,
}

impl Batch {
    pub fn new(id: BatchId, order_ids: Vec<OrderId>) -> Self {
        Self {
            id,
            order_ids,
            route: None,
            metrics: Metrics::default(),
            stale: false,
        }
    }

    pub fn nb_orders(&self) -> usize {
        self.order_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order_ids.is_empty()
    }

    pub fn distance(&self) -> f64 {
        self.metrics.distance
    }

    pub fn order_set(&self) -> BTreeSet<OrderId> {
        self.order_ids.iter().copied().collect()
    }

    pub fn orders<'a>(&'a self, warehouse: &'a Warehouse) -> impl Iterator<Item = &'a Order> {
        self.order_ids.iter().filter_map(|id| warehouse.order(*id))
    }

    pub fn volume(&self, warehouse: &Warehouse) -> u64 {
        self.orders(warehouse).map(|order| order.volume as u64).sum()
    }

    pub fn is_feasible(&self, warehouse: &Warehouse) -> bool {
        warehouse
            .capacity
            .admits(self.volume(warehouse), self.nb_orders())
    }

    /// Pickup items of all orders, grouped by order.
    pub fn pickups(&self, warehouse: &Warehouse) -> Vec<Item> {
        self.orders(warehouse)
            .flat_map(|order| order.pickups().copied())
            .collect()
    }
}

/// A full batching and routing of a warehouse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub batches: Vec<Batch>,
}

impl Solution {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches }
    }

    pub fn total_distance(&self) -> f64 {
        self.batches.iter().map(Batch::distance).sum()
    }

    pub fn nb_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn nb_orders(&self) -> usize {
        self.batches.iter().map(Batch::nb_orders).sum()
    }

    /// Batch to order-set mapping, the identity used by tabu memory.
    pub fn assignment(&self) -> BTreeMap<BatchId, BTreeSet<OrderId>> {
        self.batches
            .iter()
            .map(|batch| (batch.id, batch.order_set()))
            .collect()
    }

    /// Pickup sequences of every routed batch, depots and artificial nodes removed.
    pub fn pickup_sequences(&self) -> Vec<Vec<Item>> {
        self.batches
            .iter()
            .filter_map(|batch| batch.route.as_ref())
            .map(|route| route.pickups().copied().collect())
            .collect()
    }

    /// Plain-text layout: batch count, then three lines per batch.
    pub fn to_text(&self) -> String {
        let batches: Vec<&Batch> = self.batches.iter().filter(|b| !b.is_empty()).collect();
        let mut out = format!("{}\n", batches.len());

        for (idx, batch) in batches.iter().enumerate() {
            let positions = batch
                .route
                .as_ref()
                .map(Route::position_ids)
                .unwrap_or_default();
            let _ = writeln!(out, "{idx} {} {}", batch.nb_orders(), positions.len());
            let _ = writeln!(out, "{}", join(&batch.order_ids));
            let _ = writeln!(out, "{}", join(&positions));
        }

        out
    }
}

fn join(values: &[usize]) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
