//! batch-picking core
//!
//! Joint order batching and picker routing: orders are grouped into
//! capacity-constrained batches, each batch is routed from the start depot
//! to the end depot, and a tabu/annealing local search improves the result.

pub mod assignment;
pub mod batching;
pub mod checker;
pub mod distance;
pub mod error;
pub mod model;
pub mod proximity;
pub mod routing;
pub mod search;
pub mod solver;
pub mod traits;

pub use error::{PickingError, PickingResult};
pub use solver::{SolveOptions, SolveReport, solve};
