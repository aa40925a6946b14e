//! Sequential batch-picking solver: construction, then local search.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use crate::batching::{Batcher, BatchingOptions};
use crate::error::{PickingError, PickingResult};
use crate::model::{Solution, Warehouse};
use crate::routing::{RouteHint, Router, RoutingOptions};
use crate::search::{LocalSearch, LocalSearchOptions, SearchState};
use crate::traits::{AssignmentSolver, RouteSolver};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    pub batching: BatchingOptions,
    pub routing: RoutingOptions,
    pub local_search: LocalSearchOptions,
}

impl SolveOptions {
    pub fn validate(&self) -> PickingResult<()> {
        let invalid = |reason: &str| Err(PickingError::InvalidConfig(reason.to_string()));

        if !self.batching.slack.is_finite() || self.batching.slack < 0.0 {
            return invalid("batching slack must be a non-negative number");
        }
        if self.routing.timeout_ms == 0 {
            return invalid("routing timeout must be positive");
        }

        let search = &self.local_search;
        if !(0.0..1.0).contains(&search.cooling_rate) {
            return invalid("cooling rate must be in [0, 1)");
        }
        if !search.initial_temperature.is_finite() || search.initial_temperature <= 0.0 {
            return invalid("initial temperature must be positive");
        }
        if search.tabu_memory_size == 0 {
            return invalid("tabu memory must hold at least one solution");
        }
        if search.convergence_window == Some(0) {
            return invalid("convergence window must be positive");
        }

        Ok(())
    }
}

/// Wall time spent in each phase.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseTimings {
    pub batching: Duration,
    pub routing: Duration,
    pub local_search: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone)]
pub struct SolveReport {
    pub solution: Solution,
    /// Distance of the routed construction, before local search.
    pub construction_distance: f64,
    pub search_state: SearchState,
    pub iterations: usize,
    pub accepted: usize,
    pub tabu_hits: usize,
    pub timings: PhaseTimings,
}

impl SolveReport {
    pub fn distance(&self) -> f64 {
        self.solution.total_distance()
    }
}

/// Batches and routes a warehouse, then improves the result.
pub struct Sequential<'a> {
    warehouse: &'a Warehouse,
    options: SolveOptions,
    assignment_solver: Option<Box<dyn AssignmentSolver + 'a>>,
    route_solver: Option<Box<dyn RouteSolver + 'a>>,
    hint: Option<RouteHint>,
}

impl<'a> Sequential<'a> {
    pub fn new(warehouse: &'a Warehouse, options: SolveOptions) -> Self {
        Self {
            warehouse,
            options,
            assignment_solver: None,
            route_solver: None,
            hint: None,
        }
    }

    pub fn with_assignment_solver(mut self, solver: Box<dyn AssignmentSolver + 'a>) -> Self {
        self.assignment_solver = Some(solver);
        self
    }

    pub fn with_route_solver(mut self, solver: Box<dyn RouteSolver + 'a>) -> Self {
        self.route_solver = Some(solver);
        self
    }

    /// Seeds routing from a previous solution.
    pub fn with_hint(mut self, hint: RouteHint) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn run(self) -> PickingResult<SolveReport> {
        let started = Instant::now();
        let _span = info_span!("solve", warehouse = %self.warehouse.name).entered();

        self.options.validate()?;
        self.warehouse.validate()?;
        info!(
            orders = self.warehouse.nb_orders(),
            items = self.warehouse.nb_items(),
            "solving"
        );

        let Self {
            warehouse,
            options,
            assignment_solver,
            route_solver,
            hint,
        } = self;
        let mut timings = PhaseTimings::default();

        let batches = {
            let _span = info_span!("batching").entered();
            let phase = Instant::now();
            let batcher = match assignment_solver {
                Some(solver) => Batcher::with_solver(warehouse, options.batching.clone(), solver),
                None => Batcher::new(warehouse, options.batching.clone()),
            };
            let batches = batcher.batch();
            timings.batching = phase.elapsed();
            batches
        };

        let mut router = match route_solver {
            Some(solver) => Router::with_solver(warehouse, options.routing.clone(), solver),
            None => Router::new(warehouse, options.routing.clone()),
        };
        if let Some(hint) = hint {
            router = router.with_hint(hint);
        }

        let construction = {
            let _span = info_span!("routing").entered();
            let phase = Instant::now();
            let routed = Solution::new(router.route_all(&batches)?);
            timings.routing = phase.elapsed();
            routed
        };
        let construction_distance = construction.total_distance();

        let outcome = {
            let _span = info_span!("local_search").entered();
            let phase = Instant::now();
            let outcome = LocalSearch::new(warehouse, &router, options.local_search).run(construction)?;
            timings.local_search = phase.elapsed();
            outcome
        };
        timings.total = started.elapsed();

        info!(
            batches = outcome.solution.nb_batches(),
            construction = construction_distance,
            distance = outcome.distance(),
            elapsed_ms = timings.total.as_millis() as u64,
            "solved"
        );

        Ok(SolveReport {
            solution: outcome.solution,
            construction_distance,
            search_state: outcome.state,
            iterations: outcome.iterations,
            accepted: outcome.accepted,
            tabu_hits: outcome.tabu_hits,
            timings,
        })
    }
}

/// Solves a warehouse with the built-in solvers.
pub fn solve(warehouse: &Warehouse, options: SolveOptions) -> PickingResult<SolveReport> {
    Sequential::new(warehouse, options).run()
}
