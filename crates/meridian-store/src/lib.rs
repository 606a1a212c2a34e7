//! # Meridian Store
//!
//! The write path of the orchestration core: a connection pool
//! (`RelationalStore`), an append-only event log (`EventLog`), and task CRUD
//! (`TaskStore`) that writes one event per mutation in the same transaction.
//! See `spec.md` §4.1–§4.3.

pub mod event_log;
pub mod pool;
pub mod task_store;

pub use event_log::{EventFilter, EventLog};
pub use pool::{PoolMetrics, RelationalStore};
pub use task_store::{TaskFilterSpec, TaskStore};
