//! Test fixtures for batch-picking.
//!
//! Provides toy warehouse layouts:
//! - Parallel aisles with rectilinear distances
//! - A builder for orders, capacity and depots
//! - Proptest strategies for random order books

#![allow(dead_code)]

pub mod layouts;

pub use layouts::*;
