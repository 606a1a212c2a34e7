//! # Meridian Shared
//!
//! Types, error taxonomy, configuration, and resilience primitives shared by
//! every crate in the Meridian cross-repository orchestration core.

pub mod config;
pub mod errors;
pub mod resilience;
pub mod telemetry;
pub mod types;

pub use errors::{MeridianError, MeridianResult};
