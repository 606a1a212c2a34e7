//! Core data model shared by the store, graph, and projection crates.

mod dependency;
mod event;
mod task;

pub use dependency::{Dependency, DependencyStatus, DependencyType};
pub use event::{TaskEvent, TaskEventType};
pub use task::{Task, TaskDraft, TaskPatch, TaskPriority, TaskStatus};
