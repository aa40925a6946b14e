//! Seams between the heuristic engine and the solvers it delegates to.
//!
//! The engine only relies on these contracts. The crate ships one
//! implementation of each, but callers may plug in their own, for example
//! a MIP backend for assignment or an external routing library.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assignment::{AssignmentOutcome, AssignmentProblem};
use crate::distance::DistanceMatrix;
use crate::model::Position;
use crate::routing::{RouteOutcome, RoutingGraph};

/// Termination status reported by a solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// Proven optimal.
    Optimal,
    /// A feasible incumbent, not proven optimal.
    Feasible,
    /// Proven that no feasible solution exists.
    Infeasible,
    /// The time limit expired before any feasible solution was found.
    Timeout,
}

impl SolveStatus {
    pub fn has_solution(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}

/// Builds a distance matrix for a set of positions.
///
/// Row and column `i` belong to the position whose id is `i`.
pub trait DistanceMatrixProvider {
    fn matrix_for(&self, positions: &[Position]) -> DistanceMatrix;
}

/// Solves the order-to-batch assignment model.
pub trait AssignmentSolver: Send + Sync {
    fn solve(&self, problem: &AssignmentProblem, time_limit: Duration) -> AssignmentOutcome;
}

/// Decides whether local search moves to a candidate solution.
pub trait Acceptor {
    /// `draw` is a uniform sample from `[0, 1)`.
    fn accepts(&self, current: f64, candidate: f64, draw: f64) -> bool;

    /// Called once per iteration, accepted or not.
    fn cool(&mut self);
}

/// Finds a visiting sequence through a routing graph.
///
/// `seed` is an optional starting sequence of node indices, depots
/// excluded. Implementations must return sequences that start at
/// `graph.start()` and end at `graph.end()`.
pub trait RouteSolver: Send + Sync {
    fn solve(&self, graph: &RoutingGraph, seed: Option<&[usize]>, time_limit: Duration)
    -> RouteOutcome;
}
