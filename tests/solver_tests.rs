//! End-to-end solver tests.
//!
//! Construction fallback, routing failures, local search guarantees and
//! configuration loading.

mod fixtures;

use std::sync::Mutex;
use std::time::Duration;

use batch_picking::assignment::{AssignmentOutcome, AssignmentProblem};
use batch_picking::checker::{base_cost, check};
use batch_picking::error::{PickingError, RoutingFailure};
use batch_picking::model::{Batch, BatchId};
use batch_picking::routing::{
    ConstraintRouting, RouteHint, RouteOutcome, Router, RoutingGraph, RoutingMethod, RoutingOptions,
};
use batch_picking::search::SearchState;
use batch_picking::solver::{Sequential, SolveOptions, solve};
use batch_picking::traits::{AssignmentSolver, RouteSolver, SolveStatus};

use fixtures::{MEDIUM, SMALL, TestWarehouse};

// ============================================================================
// Test Fixtures
// ============================================================================

fn options(method: RoutingMethod) -> SolveOptions {
    let mut options = SolveOptions::default();
    options.routing.method = method;
    options.batching.timeout_ms = 5_000;
    options.routing.timeout_ms = 2_000;
    options.local_search.max_iterations = 25;
    options
}

/// Always times out without an incumbent.
struct StalledAssignment;

impl AssignmentSolver for StalledAssignment {
    fn solve(&self, _: &AssignmentProblem, _: Duration) -> AssignmentOutcome {
        AssignmentOutcome {
            status: SolveStatus::Timeout,
            groups: Vec::new(),
            value: 0.0,
        }
    }
}

/// Never finds a route.
struct StalledRouting;

impl RouteSolver for StalledRouting {
    fn solve(&self, _: &RoutingGraph, _: Option<&[usize]>, _: Duration) -> RouteOutcome {
        RouteOutcome::failed(SolveStatus::Timeout)
    }
}

/// Logs the pickup item ids of every seed, then routes with the VRP engine.
struct SeedLog<'m> {
    seeds: &'m Mutex<Vec<Vec<usize>>>,
}

impl RouteSolver for SeedLog<'_> {
    fn solve(&self, graph: &RoutingGraph, seed: Option<&[usize]>, limit: Duration) -> RouteOutcome {
        if let Some(seed) = seed {
            let ids = seed.iter().map(|&idx| graph.node(idx).id).collect();
            self.seeds.lock().unwrap().push(ids);
        }
        ConstraintRouting::new(true).solve(graph, seed, limit)
    }
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_unit_capacity_gives_single_order_trips() {
    let l = SMALL;
    let w = TestWarehouse::new("singles", l.clone())
        .capacity(10, 1)
        .order(2, &[l.slot(0, 1), l.slot(1, 2)])
        .order(3, &[l.slot(0, 2)])
        .order(1, &[l.slot(2, 3), l.slot(2, 0)])
        .build();
    assert_eq!(w.minimum_batches(0.1), w.nb_orders());

    let report = solve(&w, options(RoutingMethod::TspMultiCommodityFlow)).unwrap();
    assert!(report.solution.batches.iter().all(|b| b.nb_orders() == 1));
    assert_eq!(report.solution.nb_batches(), 3);

    let router = Router::new(&w, options(RoutingMethod::TspMultiCommodityFlow).routing);
    let independent: f64 = w
        .orders
        .iter()
        .map(|order| {
            router
                .route_batch(&Batch::new(BatchId(order.id), vec![order.id]))
                .unwrap()
                .distance()
        })
        .sum();
    assert!((report.distance() - independent).abs() < 1e-9);
}

#[test]
fn test_stalled_assignment_falls_back_to_singletons() {
    let w = fixtures::two_clusters();
    let report = Sequential::new(&w, options(RoutingMethod::Vrp))
        .with_assignment_solver(Box::new(StalledAssignment))
        .run()
        .unwrap();

    let check = check(&w, &report.solution);
    assert!(check.feasible, "{:?}", check.violations);
    assert!(report.construction_distance <= base_cost(&w) + 1e-9);
}

#[test]
fn test_routing_failure_names_the_batch() {
    let w = fixtures::two_clusters();
    let mut opts = options(RoutingMethod::Vrp);
    opts.routing.parallel = false;

    let result = Sequential::new(&w, opts)
        .with_route_solver(Box::new(StalledRouting))
        .run();

    assert!(matches!(
        result,
        Err(PickingError::Routing {
            batch: 0,
            reason: RoutingFailure::Timeout
        })
    ));
}

#[test]
fn test_invalid_instance_is_rejected() {
    let w = TestWarehouse::new("oversized", SMALL)
        .capacity(3, 2)
        .order(5, &[1])
        .build();

    assert!(matches!(
        solve(&w, SolveOptions::default()),
        Err(PickingError::InvalidInstance(_))
    ));
}

// ============================================================================
// Full pipeline
// ============================================================================

#[test]
fn test_every_routing_method_yields_a_feasible_solution() {
    let w = fixtures::two_clusters();
    for method in [
        RoutingMethod::TspMultiCommodityFlow,
        RoutingMethod::TspConstraintBased,
        RoutingMethod::Vrp,
    ] {
        let report = solve(&w, options(method)).unwrap();
        let check = check(&w, &report.solution);

        assert!(check.feasible, "{method:?}: {:?}", check.violations);
        assert!(check.improvement_pct > 0.0, "{method:?}");
        assert!((check.objective_cost - report.distance()).abs() < 1e-9);
    }
}

#[test]
fn test_local_search_never_worsens_construction() {
    let l = MEDIUM;
    let w = TestWarehouse::new("medium", l.clone())
        .capacity(8, 3)
        .order(3, &[l.slot(0, 0), l.slot(4, 5)])
        .order(2, &[l.slot(1, 2)])
        .order(4, &[l.slot(3, 1), l.slot(0, 4)])
        .order(1, &[l.slot(2, 2), l.slot(2, 5)])
        .order(2, &[l.slot(4, 0)])
        .order(3, &[l.slot(1, 5), l.slot(3, 3)])
        .order(2, &[l.slot(0, 2)])
        .build();

    let mut opts = options(RoutingMethod::Vrp);
    opts.local_search.max_iterations = 60;
    opts.local_search.initial_temperature = 50.0;
    let report = solve(&w, opts).unwrap();

    assert_eq!(report.search_state, SearchState::TerminatedByIterationLimit);
    assert_eq!(report.iterations, 60);
    assert!(report.distance() <= report.construction_distance + 1e-9);
    assert!(check(&w, &report.solution).feasible);
}

#[test]
fn test_convergence_window_stops_early() {
    let l = SMALL;
    // one order: no move has a neighbour
    let w = TestWarehouse::new("lonely", l.clone()).order(1, &[l.slot(1, 1)]).build();

    let mut opts = options(RoutingMethod::Vrp);
    opts.local_search.max_iterations = 100;
    opts.local_search.convergence_window = Some(5);
    let report = solve(&w, opts).unwrap();

    assert_eq!(report.search_state, SearchState::TerminatedByConvergence);
    assert_eq!(report.iterations, 5);
    assert_eq!(report.accepted, 0);
}

#[test]
fn test_previous_solution_seeds_construction_routes() {
    let w = fixtures::two_clusters();
    let mut opts = options(RoutingMethod::Vrp);
    opts.local_search.max_iterations = 0;

    let previous = solve(&w, opts.clone()).unwrap();
    let mut expected: Vec<Vec<usize>> = previous
        .solution
        .pickup_sequences()
        .iter()
        .map(|sequence| sequence.iter().map(|item| item.id).collect())
        .collect();

    let seeds = Mutex::new(Vec::new());
    let hint = RouteHint::from_sequences(&previous.solution.pickup_sequences());
    let report = Sequential::new(&w, opts)
        .with_route_solver(Box::new(SeedLog { seeds: &seeds }))
        .with_hint(hint)
        .run()
        .unwrap();

    let mut seen = seeds.into_inner().unwrap();
    seen.sort();
    expected.sort();
    assert_eq!(seen, expected);
    assert!(report.distance() <= previous.distance() + 1e-9);
}

#[test]
fn test_solving_twice_is_identical() {
    let w = fixtures::two_clusters();
    let first = solve(&w, options(RoutingMethod::Vrp)).unwrap();
    let second = solve(&w, options(RoutingMethod::Vrp)).unwrap();

    assert_eq!(first.solution, second.solution);
    assert_eq!(first.solution.to_text(), second.solution.to_text());
}

#[test]
fn test_text_layout_lists_every_batch() {
    let w = fixtures::two_clusters();
    let report = solve(&w, options(RoutingMethod::TspMultiCommodityFlow)).unwrap();
    let text = report.solution.to_text();
    let mut lines = text.lines();

    let count: usize = lines.next().unwrap().parse().unwrap();
    assert_eq!(count, report.solution.nb_batches());
    assert_eq!(text.lines().count(), 1 + 3 * count);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_partial_options_fill_in_defaults() {
    let json = r#"{
        "routing": { "method": "TspMultiCommodityFlow" },
        "local_search": { "max_iterations": 3, "convergence_window": 2 }
    }"#;
    let options: SolveOptions = serde_json::from_str(json).unwrap();

    assert_eq!(options.routing.method, RoutingMethod::TspMultiCommodityFlow);
    assert_eq!(options.routing.exact_node_limit, RoutingOptions::default().exact_node_limit);
    assert_eq!(options.local_search.max_iterations, 3);
    assert_eq!(options.local_search.convergence_window, Some(2));
    assert_eq!(options.batching.timeout_ms, 100_000);
    assert!(options.validate().is_ok());
}

#[test]
fn test_options_survive_json() {
    let mut options = SolveOptions::default();
    options.local_search.seed = 42;
    options.batching.slack = 0.25;

    let json = serde_json::to_string(&options).unwrap();
    let back: SolveOptions = serde_json::from_str(&json).unwrap();

    assert_eq!(back.local_search.seed, 42);
    assert_eq!(back.batching.slack, 0.25);
    assert_eq!(back.routing.method, RoutingMethod::Vrp);
}
