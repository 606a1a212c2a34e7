//! # Meridian Webhooks
//!
//! Inbound webhook verification and idempotent external-issue import,
//! kept transport-agnostic: callers extract the raw body and headers
//! themselves before handing them to [`receiver::WebhookReceiver`]
//! (`spec.md` §4.10).

pub mod importer;
pub mod receiver;
pub mod signature;

pub use importer::{
    ExternalIssue, ImportBatch, ImportConfig, ImportFilter, ImportOutcome, IssueImporter,
    IssueMapping,
};
pub use receiver::{EventType, WebhookEvent, WebhookReceiver, WebhookResult, WebhookSource};
