//! Toy picking areas.
//!
//! Position 0 is the start depot at the front-left corner and the last
//! position is the end depot at the front-right corner. Aisle `a` runs
//! along x = 2a + 1 with one slot per metre of depth.

use proptest::prelude::*;

use batch_picking::distance::{DistanceMatrix, RectilinearMatrix};
use batch_picking::model::{Capacity, Item, Order, Position, Warehouse};
use batch_picking::traits::DistanceMatrixProvider;

#[derive(Debug, Clone)]
pub struct Layout {
    pub aisles: usize,
    pub depth: usize,
}

impl Layout {
    pub const fn new(aisles: usize, depth: usize) -> Self {
        Self { aisles, depth }
    }

    pub fn nb_slots(&self) -> usize {
        self.aisles * self.depth
    }

    /// Position id of a slot, 1-based after the start depot.
    pub fn slot(&self, aisle: usize, level: usize) -> usize {
        1 + aisle * self.depth + level
    }

    pub fn positions(&self) -> Vec<Position> {
        let mut positions = vec![Position::new(0, 0.0, 0.0)];
        for aisle in 0..self.aisles {
            for level in 0..self.depth {
                let id = self.slot(aisle, level);
                positions.push(Position::new(id, (2 * aisle + 1) as f64, (level + 1) as f64));
            }
        }
        positions.push(Position::new(self.nb_slots() + 1, (2 * self.aisles) as f64, 0.0));
        positions
    }
}

pub const SMALL: Layout = Layout::new(3, 4);
pub const MEDIUM: Layout = Layout::new(5, 6);

/// Builder for test warehouses with sensible defaults.
#[derive(Debug, Clone)]
pub struct TestWarehouse {
    name: String,
    layout: Layout,
    capacity: Capacity,
    orders: Vec<(u32, Vec<usize>)>,
    distances: Option<DistanceMatrix>,
}

impl TestWarehouse {
    pub fn new(name: &str, layout: Layout) -> Self {
        Self {
            name: name.to_string(),
            layout,
            capacity: Capacity::new(10, 3),
            orders: Vec::new(),
            distances: None,
        }
    }

    pub fn capacity(mut self, volume: u32, nb_orders: usize) -> Self {
        self.capacity = Capacity::new(volume, nb_orders);
        self
    }

    /// Adds an order picking the given position ids.
    pub fn order(mut self, volume: u32, positions: &[usize]) -> Self {
        self.orders.push((volume, positions.to_vec()));
        self
    }

    pub fn orders(mut self, orders: Vec<(u32, Vec<usize>)>) -> Self {
        self.orders.extend(orders);
        self
    }

    /// Replaces the rectilinear distances of the layout.
    pub fn distances(mut self, distances: DistanceMatrix) -> Self {
        self.distances = Some(distances);
        self
    }

    pub fn build(self) -> Warehouse {
        let positions = self.layout.positions();
        let distances = self
            .distances
            .unwrap_or_else(|| RectilinearMatrix.matrix_for(&positions));

        let mut next_item = 0;
        let orders = self
            .orders
            .into_iter()
            .enumerate()
            .map(|(id, (volume, slots))| {
                let items = slots
                    .into_iter()
                    .map(|slot| {
                        next_item += 1;
                        Item::pickup(next_item - 1, positions[slot])
                    })
                    .collect();
                Order::new(id, volume, items)
            })
            .collect();

        let start = positions[0];
        let end = positions[positions.len() - 1];
        Warehouse::new(self.name, orders, self.capacity, distances, start, end)
    }
}

/// Six orders in two clusters: aisle 0 and aisle 2 of [`SMALL`].
pub fn two_clusters() -> Warehouse {
    let l = SMALL;
    TestWarehouse::new("two-clusters", l.clone())
        .capacity(10, 3)
        .order(2, &[l.slot(0, 0), l.slot(0, 2)])
        .order(3, &[l.slot(0, 1)])
        .order(2, &[l.slot(0, 3), l.slot(0, 0)])
        .order(3, &[l.slot(2, 0), l.slot(2, 3)])
        .order(2, &[l.slot(2, 1)])
        .order(1, &[l.slot(2, 2), l.slot(1, 3)])
        .build()
}

/// Random order books over a layout: 1 to `max_orders` orders, each with
/// 1 to 3 distinct slots and a volume in 1..=4.
pub fn order_book(layout: Layout, max_orders: usize) -> impl Strategy<Value = Vec<(u32, Vec<usize>)>> {
    let slots = layout.nb_slots();
    let order = (1u32..=4, prop::collection::btree_set(1..=slots, 1..=3))
        .prop_map(|(volume, slots)| (volume, slots.into_iter().collect::<Vec<_>>()));
    prop::collection::vec(order, 1..=max_orders)
}
