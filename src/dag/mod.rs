// src/dag/mod.rs

//! DAG representation and phase planning.
//!
//! - [`graph`] holds the index-based dependency graph: readiness checks,
//!   topological order, and greedy phase decomposition.
//! - [`plan`] contains the [`ExecutionPlan`] returned by dry runs.

pub mod graph;
pub mod plan;

pub use graph::{DependencyGraph, GraphNode};
pub use plan::ExecutionPlan;
