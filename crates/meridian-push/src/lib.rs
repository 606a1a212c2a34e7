//! # Meridian Push
//!
//! WebSocket push server (`spec.md` §4.8) and the domain-event broadcaster
//! that feeds it (`spec.md` §4.9).

pub mod auth;
pub mod broadcaster;
pub mod envelope;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod ws;

pub use auth::{AuthConfig, Claims};
pub use broadcaster::Broadcaster;
pub use envelope::{Envelope, ErrorCode, FrameType};
pub use metrics::Metrics;
pub use server::{NullStatusProvider, PushServer, ServerState, StatusProvider};
