//! # Meridian Projections
//!
//! Read-side views over `TaskStore`: cross-repository aggregation,
//! in-memory filter refinement beyond what the store can express, ranked
//! token search, and per-repository health dashboards. See `spec.md` §4.6.

pub mod aggregator;
pub mod dashboard;
pub mod filter;
pub mod search;

pub use aggregator::{Aggregator, CrossRepoSummary, RepoTaskStats};
pub use dashboard::{Dashboard, DashboardView, HealthIndicator};
pub use filter::{FilterCriteria, FilterResult, SortBy, SortOrder};
pub use search::{Search, SearchCriteria, SearchResult};
