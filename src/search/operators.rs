//! Neighbourhood moves over the batch assignment.
//!
//! Moves only rearrange orders; re-routing the touched batches is left to
//! the search loop. [`check_move`] is the invariant harness run after
//! every move.

use std::collections::BTreeMap;

use rand::{Rng, RngCore};

use crate::model::{Batch, OrderId, Solution};

/// A rearranged solution and the batches that need a new route.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub solution: Solution,
    /// Indices of batches to re-route.
    pub touched: Vec<usize>,
}

pub trait Move {
    fn name(&self) -> &'static str;

    /// Returns `None` when the solution has no neighbour under this move.
    fn apply(&self, solution: &Solution, rng: &mut dyn RngCore) -> Option<Candidate>;
}

/// Exchanges one order between two batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Swap;

/// Moves one order out of the least-loaded batch.
///
/// Only the destination is re-routed. The source keeps its previous route
/// and metrics and is flagged stale.
#[derive(Debug, Clone, Copy, Default)]
pub struct Relocate;

/// Indices of non-empty batches, least loaded first.
fn by_load(batches: &[Batch]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..batches.len())
        .filter(|&idx| !batches[idx].is_empty())
        .collect();
    indices.sort_by_key(|&idx| (batches[idx].nb_orders(), idx));
    indices
}

fn take_random(batch: &mut Batch, rng: &mut dyn RngCore) -> OrderId {
    let pos = rng.gen_range(0..batch.order_ids.len());
    batch.order_ids.remove(pos)
}

impl Move for Swap {
    fn name(&self) -> &'static str {
        "swap"
    }

    fn apply(&self, solution: &Solution, rng: &mut dyn RngCore) -> Option<Candidate> {
        let loaded = by_load(&solution.batches);
        if loaded.len() < 2 {
            return None;
        }

        let half = (loaded.len() / 2).max(1);
        let source = loaded[rng.gen_range(0..half)];
        let others: Vec<usize> = loaded.iter().copied().filter(|&idx| idx != source).collect();
        let target = others[rng.gen_range(0..others.len())];

        let mut batches = solution.batches.clone();
        let out = take_random(&mut batches[source], rng);
        let back = take_random(&mut batches[target], rng);
        batches[source].order_ids.push(back);
        batches[target].order_ids.push(out);

        Some(Candidate {
            solution: Solution::new(batches),
            touched: vec![source, target],
        })
    }
}

impl Move for Relocate {
    fn name(&self) -> &'static str {
        "relocate"
    }

    fn apply(&self, solution: &Solution, rng: &mut dyn RngCore) -> Option<Candidate> {
        let source = *by_load(&solution.batches).first()?;

        let mut rest: Vec<usize> = (0..solution.batches.len())
            .filter(|&idx| idx != source)
            .collect();
        if rest.is_empty() {
            return None;
        }
        rest.sort_by_key(|&idx| (solution.batches[idx].nb_orders(), idx));
        let half = (rest.len() / 2).max(1);
        let target = rest[rng.gen_range(0..half)];

        let mut batches = solution.batches.clone();
        let order = take_random(&mut batches[source], rng);
        batches[source].stale = true;
        batches[target].order_ids.push(order);

        Some(Candidate {
            solution: Solution::new(batches),
            touched: vec![target],
        })
    }
}

/// Checks that a move kept the batch count and assigned every order of
/// `before` exactly once in `after`.
pub fn check_move(before: &Solution, after: &Solution) -> Result<(), String> {
    if before.nb_batches() != after.nb_batches() {
        return Err(format!(
            "batch count changed from {} to {}",
            before.nb_batches(),
            after.nb_batches()
        ));
    }

    let count = |solution: &Solution| {
        let mut counts: BTreeMap<OrderId, usize> = BTreeMap::new();
        for id in solution.batches.iter().flat_map(|batch| &batch.order_ids) {
            *counts.entry(*id).or_default() += 1;
        }
        counts
    };
    let (old, new) = (count(before), count(after));

    if let Some((id, times)) = new.iter().find(|&(_, &times)| times > 1) {
        return Err(format!("order {id} assigned {times} times"));
    }
    if let Some(id) = old.keys().find(|id| !new.contains_key(id)) {
        return Err(format!("order {id} lost"));
    }
    if let Some(id) = new.keys().find(|id| !old.contains_key(id)) {
        return Err(format!("order {id} not found before the move"));
    }

    Ok(())
}
