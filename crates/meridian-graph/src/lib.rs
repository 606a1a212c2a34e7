//! # Meridian Graph
//!
//! In-memory cross-repository dependency graph (`DependencyGraph`) and the
//! memoised blocker projections built on top of it (`BlockerAnalyzer`). See
//! `spec.md` §4.4–§4.5.

pub mod analyzer;
pub mod graph;

pub use analyzer::{BlockerAnalyzer, BlockingChain, ImpactReport};
pub use graph::{DependencyGraph, EdgeCounts};
