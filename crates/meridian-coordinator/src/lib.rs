//! # Meridian Coordinator
//!
//! Builds dependency-respecting completion plans over a selected set of
//! tasks and executes them step by step, with reverse-order rollback.
//! See `spec.md` §4.7.

pub mod plan;

pub use plan::{Coordinator, Plan, PlanStatus, PlanStep, StepStatus};
