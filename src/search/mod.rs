//! Local search over routed batches.
//!
//! Each iteration draws Swap or Relocate, re-routes the touched batches and
//! decides with tabu memory and simulated annealing. The search is strictly
//! sequential; only the routing calls it makes may use the thread pool.

pub mod operators;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PickingError, PickingResult};
use crate::model::{Batch, BatchId, Metrics, OrderId, Route, Solution, Warehouse};
use crate::routing::Router;
use crate::traits::Acceptor;

use operators::{Candidate, Move, Relocate, Swap, check_move};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSearchOptions {
    pub max_iterations: usize,
    pub initial_temperature: f64,
    /// Fraction of the temperature lost per iteration.
    pub cooling_rate: f64,
    pub tabu_memory_size: usize,
    /// Stop after this many consecutive iterations without an accepted move.
    pub convergence_window: Option<usize>,
    pub seed: u64,
}

impl Default for LocalSearchOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            initial_temperature: 100.0,
            cooling_rate: 0.003,
            tabu_memory_size: 10,
            convergence_window: None,
            seed: 0,
        }
    }
}

/// Batch to order-set mapping of a solution.
pub type Assignment = BTreeMap<BatchId, BTreeSet<OrderId>>;

/// Bounded record of recently accepted assignments.
#[derive(Debug, Clone)]
pub struct TabuMemory {
    capacity: usize,
    entries: VecDeque<Assignment>,
}

impl TabuMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn contains(&self, assignment: &Assignment) -> bool {
        self.entries.iter().any(|entry| entry == assignment)
    }

    /// Remembers an assignment, forgetting the oldest one when full.
    pub fn push(&mut self, assignment: Assignment) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(assignment);
    }

    /// Halves the capacity, keeping the most recent entries.
    pub fn shrink(&mut self) {
        self.capacity = (self.capacity / 2).max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Metropolis acceptance with geometric cooling.
#[derive(Debug, Clone)]
pub struct SimulatedAnnealing {
    temperature: f64,
    cooling_rate: f64,
}

impl SimulatedAnnealing {
    pub fn new(initial_temperature: f64, cooling_rate: f64) -> Self {
        Self {
            temperature: initial_temperature,
            cooling_rate,
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Chance of moving from `current` to `candidate`.
    pub fn probability(&self, current: f64, candidate: f64) -> f64 {
        let improvement = current - candidate;
        if improvement > 0.0 {
            1.0
        } else if self.temperature <= 0.0 {
            0.0
        } else {
            (improvement / self.temperature).exp()
        }
    }
}

impl Acceptor for SimulatedAnnealing {
    fn accepts(&self, current: f64, candidate: f64, draw: f64) -> bool {
        draw < self.probability(current, candidate)
    }

    fn cool(&mut self) {
        self.temperature *= 1.0 - self.cooling_rate;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    Initialized,
    Iterating,
    TerminatedByIterationLimit,
    TerminatedByConvergence,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub solution: Solution,
    pub state: SearchState,
    pub iterations: usize,
    pub accepted: usize,
    /// Candidates discarded because their assignment was tabu.
    pub tabu_hits: usize,
    pub initial_distance: f64,
}

impl SearchOutcome {
    pub fn distance(&self) -> f64 {
        self.solution.total_distance()
    }
}

enum Verdict {
    NoNeighbour,
    OverCapacity,
    Tabu,
    Rejected,
    Accepted,
}

pub struct LocalSearch<'a> {
    warehouse: &'a Warehouse,
    router: &'a Router<'a>,
    options: LocalSearchOptions,
    tabu: TabuMemory,
    acceptor: Box<dyn Acceptor + 'a>,
    rng: StdRng,
    state: SearchState,
}

impl<'a> LocalSearch<'a> {
    pub fn new(warehouse: &'a Warehouse, router: &'a Router<'a>, options: LocalSearchOptions) -> Self {
        let acceptor = SimulatedAnnealing::new(options.initial_temperature, options.cooling_rate);
        Self::with_acceptor(warehouse, router, options, Box::new(acceptor))
    }

    pub fn with_acceptor(
        warehouse: &'a Warehouse,
        router: &'a Router<'a>,
        options: LocalSearchOptions,
        acceptor: Box<dyn Acceptor + 'a>,
    ) -> Self {
        Self {
            warehouse,
            router,
            tabu: TabuMemory::new(options.tabu_memory_size),
            rng: StdRng::seed_from_u64(options.seed),
            options,
            acceptor,
            state: SearchState::Initialized,
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Improves a routed solution. The result is never longer than `initial`.
    pub fn run(&mut self, initial: Solution) -> PickingResult<SearchOutcome> {
        let initial_distance = initial.total_distance();
        let mut current = initial.clone();
        let mut best = initial.clone();
        let mut accepted = 0;
        let mut tabu_hits = 0;
        let mut idle = 0;
        let mut iterations = 0;

        self.state = SearchState::Iterating;
        info!(
            batches = initial.nb_batches(),
            distance = initial_distance,
            max_iterations = self.options.max_iterations,
            "local search started"
        );

        for iteration in 0..self.options.max_iterations {
            iterations = iteration + 1;
            if iteration > 0 && iteration == self.options.max_iterations / 2 {
                self.tabu.shrink();
                debug!(capacity = self.tabu.capacity(), "tabu memory shrunk");
            }

            let verdict = self.step(&mut current)?;
            self.acceptor.cool();

            match verdict {
                Verdict::Accepted => {
                    accepted += 1;
                    idle = 0;
                    if current.total_distance() < best.total_distance() {
                        best = current.clone();
                    }
                }
                Verdict::Tabu => {
                    tabu_hits += 1;
                    idle += 1;
                }
                Verdict::NoNeighbour | Verdict::OverCapacity | Verdict::Rejected => idle += 1,
            }

            if self.options.convergence_window.is_some_and(|window| idle >= window) {
                self.state = SearchState::TerminatedByConvergence;
                break;
            }
        }
        if self.state == SearchState::Iterating {
            self.state = SearchState::TerminatedByIterationLimit;
        }

        let chosen = if current.total_distance() <= best.total_distance() {
            current
        } else {
            best
        };
        let mut solution = finalize(self.warehouse, chosen);
        if solution.total_distance() > initial_distance {
            solution = finalize(self.warehouse, initial);
        }

        info!(
            state = ?self.state,
            iterations,
            accepted,
            tabu_hits,
            distance = solution.total_distance(),
            "local search finished"
        );

        Ok(SearchOutcome {
            solution,
            state: self.state,
            iterations,
            accepted,
            tabu_hits,
            initial_distance,
        })
    }

    fn step(&mut self, current: &mut Solution) -> PickingResult<Verdict> {
        let operator: &dyn Move = if self.rng.gen_bool(0.5) {
            &Swap
        } else {
            &Relocate
        };

        let Some(Candidate {
            solution: mut candidate,
            touched,
        }) = operator.apply(current, &mut self.rng)
        else {
            return Ok(Verdict::NoNeighbour);
        };
        if let Err(reason) = check_move(current, &candidate) {
            panic!("{} broke the solution: {reason}", operator.name());
        }

        if touched
            .iter()
            .any(|&idx| !candidate.batches[idx].is_feasible(self.warehouse))
        {
            debug!(operator = operator.name(), "candidate over capacity");
            return Ok(Verdict::OverCapacity);
        }

        let assignment = candidate.assignment();
        if self.tabu.contains(&assignment) {
            debug!(operator = operator.name(), "candidate is tabu");
            return Ok(Verdict::Tabu);
        }

        for &idx in &touched {
            let routed = self
                .router
                .route_batch(&candidate.batches[idx])
                .map_err(|reason| PickingError::Routing { batch: idx, reason })?;
            candidate.batches[idx] = routed;
        }

        let (from, to) = (current.total_distance(), candidate.total_distance());
        let draw: f64 = self.rng.r#gen();
        if !self.acceptor.accepts(from, to, draw) {
            debug!(operator = operator.name(), current = from, candidate = to, "candidate rejected");
            return Ok(Verdict::Rejected);
        }

        debug!(operator = operator.name(), current = from, candidate = to, "candidate accepted");
        self.tabu.push(assignment);
        *current = candidate;
        Ok(Verdict::Accepted)
    }
}

/// Shortcuts the stale routes and drops emptied batches.
pub fn finalize(warehouse: &Warehouse, solution: Solution) -> Solution {
    let batches = solution
        .batches
        .into_iter()
        .filter(|batch| !batch.is_empty())
        .map(|batch| if batch.stale { shortcut(warehouse, batch) } else { batch })
        .collect();
    Solution::new(batches)
}

/// Removes the items of departed orders from a batch's route, keeping the
/// remaining visiting order.
pub fn shortcut(warehouse: &Warehouse, batch: Batch) -> Batch {
    let items: BTreeSet<_> = batch.pickups(warehouse).iter().map(|item| item.id).collect();
    let route = batch.route.as_ref().map(|route| {
        Route::new(
            route
                .sequence
                .iter()
                .filter(|item| item.is_depot() || items.contains(&item.id))
                .copied()
                .collect(),
        )
    });
    let metrics = Metrics {
        distance: route.as_ref().map_or(0.0, |route| route.distance(warehouse)),
        units: batch.nb_orders(),
        volume: batch.volume(warehouse),
    };

    Batch {
        route,
        metrics,
        stale: false,
        ..batch
    }
}
