//! Shared application state handed to every Axum handler. Cheap to clone:
//! every field is itself an `Arc` or an internally-pooled handle.

use axum::extract::FromRef;
use meridian_push::{AuthConfig, Broadcaster, NullStatusProvider, PushServer};
use meridian_webhooks::{IssueImporter, WebhookReceiver};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub push: Arc<PushServer>,
    pub broadcaster: Arc<Broadcaster>,
    pub webhooks: Arc<WebhookReceiver>,
    pub importer: Arc<IssueImporter>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        auth: AuthConfig,
        inbound_rate: f64,
        webhooks: WebhookReceiver,
        importer: IssueImporter,
    ) -> Self {
        let push = Arc::new(PushServer::new(auth, inbound_rate, Arc::new(NullStatusProvider)));
        Self {
            pool,
            push,
            broadcaster: Arc::new(Broadcaster::new()),
            webhooks: Arc::new(webhooks),
            importer: Arc::new(importer),
        }
    }
}

/// Lets Axum hand `meridian_push::ws::upgrade` its `State<Arc<PushServer>>`
/// out of the same `AppState` every other route shares.
impl FromRef<AppState> for Arc<PushServer> {
    fn from_ref(state: &AppState) -> Self {
        state.push.clone()
    }
}
