//! Error taxonomy for the batch-picking pipeline.

use std::fmt;

use crate::traits::SolveStatus;

/// Why a single batch could not be routed.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingFailure {
    /// A capacity dimension (order count or volume) cannot be satisfied.
    Infeasible(String),
    /// No solution was found within the time limit.
    Timeout,
    /// The routing collaborator reported an internal problem.
    Solver(String),
}

impl fmt::Display for RoutingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingFailure::Infeasible(reason) => write!(f, "infeasible: {reason}"),
            RoutingFailure::Timeout => write!(f, "no route found within the time limit"),
            RoutingFailure::Solver(reason) => write!(f, "solver error: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickingError {
    /// The warehouse instance is inconsistent.
    InvalidInstance(String),
    /// Options are out of their valid ranges.
    InvalidConfig(String),
    /// Routing failed for the batch at the given index.
    Routing { batch: usize, reason: RoutingFailure },
    /// The assignment solver returned no usable assignment.
    Assignment(SolveStatus),
}

impl fmt::Display for PickingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PickingError::InvalidInstance(reason) => write!(f, "invalid instance: {reason}"),
            PickingError::InvalidConfig(reason) => write!(f, "invalid options: {reason}"),
            PickingError::Routing { batch, reason } => {
                write!(f, "cannot route batch {batch}: {reason}")
            }
            PickingError::Assignment(status) => {
                write!(f, "assignment solver returned no solution ({status:?})")
            }
        }
    }
}

impl std::error::Error for PickingError {}

pub type PickingResult<T> = Result<T, PickingError>;
