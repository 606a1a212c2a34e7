//! PushServer: subscription registry, request dispatch, and fan-out
//! (`spec.md` §4.8).

use crate::auth::{authorize_channel, AuthConfig, Claims};
use crate::envelope::{Envelope, ErrorCode, FrameType};
use crate::metrics::{MessageKind, Metrics};
use crate::registry::{ConnectionHandle, Registry};
use async_trait::async_trait;
use meridian_shared::resilience::TokenBucket;
use serde_json::Value;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Running,
    Stopped,
}

/// Resolves cached pool/workflow status for the `get_pool_status` and
/// `get_workflow_status` requests. Implemented outside this crate by
/// whichever collaborator owns that projection.
#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn pool_status(&self, pool_id: &str) -> Option<Value>;
    async fn workflow_status(&self, workflow_id: &str) -> Option<Value>;
}

pub struct NullStatusProvider;

#[async_trait]
impl StatusProvider for NullStatusProvider {
    async fn pool_status(&self, _pool_id: &str) -> Option<Value> {
        None
    }
    async fn workflow_status(&self, _workflow_id: &str) -> Option<Value> {
        None
    }
}

pub struct PushServer {
    registry: Registry,
    auth: AuthConfig,
    metrics: Metrics,
    status: Arc<dyn StatusProvider>,
    rate: f64,
    burst_size: f64,
    cleanup_interval: Duration,
    state: AtomicU8,
}

impl std::fmt::Debug for PushServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushServer")
            .field("rate", &self.rate)
            .field("burst_size", &self.burst_size)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish()
    }
}

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

impl PushServer {
    pub fn new(auth: AuthConfig, rate: f64, status: Arc<dyn StatusProvider>) -> Self {
        Self {
            registry: Registry::new(),
            auth,
            metrics: Metrics::new(),
            status,
            rate,
            burst_size: rate * 1.5,
            cleanup_interval: Duration::from_secs(300),
            state: AtomicU8::new(STATE_CREATED),
        }
    }

    /// Marks the server running and spawns the background idle-connection
    /// sweep (`spec.md` §4.8, `cleanup_interval`). Takes `Arc<Self>` because
    /// the sweep task outlives the call and needs its own owned handle.
    pub fn start(self: &Arc<Self>) {
        self.state.store(STATE_RUNNING, Ordering::SeqCst);
        info!("push server running");

        let server = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(server.cleanup_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if server.state() != ServerState::Running {
                    break;
                }
                let removed = server.registry.sweep_idle(server.cleanup_interval);
                if !removed.is_empty() {
                    info!(count = removed.len(), "swept idle connections");
                }
            }
        });
    }

    /// Refuses new connections (callers should check `state()` before
    /// accepting an upgrade) and closes every existing one.
    pub fn stop(&self) {
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        for id in self.registry.all_connection_ids() {
            if let Some(conn) = self.registry.connection(id) {
                let _ = conn.sender.send(Envelope::event(
                    "global",
                    "session.closed",
                    serde_json::json!({}),
                ));
            }
            self.registry.unregister(id);
        }
        info!("push server stopped");
    }

    pub fn state(&self) -> ServerState {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => ServerState::Running,
            STATE_STOPPED => ServerState::Stopped,
            _ => ServerState::Created,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Registers a new connection, verifying the bearer token when auth is
    /// enabled. Returns `None` (and the caller must close the socket with
    /// the protocol-error code) on a bad token.
    pub fn accept_connection(
        &self,
        token: Option<&str>,
        sender: mpsc::UnboundedSender<Envelope>,
    ) -> Option<Arc<ConnectionHandle>> {
        let claims = match token {
            Some(t) => match self.auth.verify(t) {
                Ok(claims) => claims,
                Err(_) => return None,
            },
            None => {
                if self.auth.enabled {
                    return None;
                }
                None
            }
        };

        let id = Uuid::now_v7();
        let handle = Arc::new(ConnectionHandle::new(
            id,
            claims,
            TokenBucket::new(self.rate, Some(self.burst_size)),
            sender,
        ));
        self.registry.register(handle.clone());
        Some(handle)
    }

    pub fn disconnect(&self, id: Uuid) {
        self.registry.unregister(id);
    }

    /// Consumes one token from the connection's bucket. On exhaustion,
    /// returns the RATE_LIMITED error frame to send back (never queues the
    /// original message).
    pub fn check_rate_limit(&self, conn: &ConnectionHandle) -> Result<(), Envelope> {
        let outcome = conn.bucket.check();
        if outcome.allowed {
            return Ok(());
        }
        if conn.should_log_rate_limit() {
            warn!(connection_id = %conn.id, "rate limit exceeded");
        }
        self.metrics.record_error(ErrorCode::RateLimited.as_str());
        Err(Envelope::error(
            None,
            ErrorCode::RateLimited,
            format!("retry_after={:.3}", outcome.retry_after_secs),
        ))
    }

    /// Dispatches one inbound REQUEST frame; returns the RESPONSE/ERROR
    /// frame to send back on the same connection.
    pub async fn handle_request(&self, conn: &ConnectionHandle, request: &Envelope) -> Envelope {
        self.metrics.record_message(MessageKind::Request);
        let id = request.id.clone().unwrap_or_default();

        let response = match request.event.as_str() {
            "subscribe" => self.handle_subscribe(conn, request, &id),
            "unsubscribe" => self.handle_unsubscribe(conn, request, &id),
            "get_pool_status" => self.handle_get_pool_status(request, &id).await,
            "get_workflow_status" => self.handle_get_workflow_status(request, &id).await,
            _ => {
                self.metrics.record_error(ErrorCode::UnknownRequest.as_str());
                Envelope::error(Some(id), ErrorCode::UnknownRequest, "unknown request event")
            }
        };
        self.metrics.record_message(MessageKind::Response);
        response
    }

    fn handle_subscribe(&self, conn: &ConnectionHandle, request: &Envelope, id: &str) -> Envelope {
        let Some(channel) = request.data.get("channel").and_then(Value::as_str) else {
            return Envelope::error(Some(id.to_string()), ErrorCode::UnknownRequest, "missing channel");
        };
        if !authorize_channel(&self.auth, conn.claims.as_ref(), channel) {
            self.metrics.record_error(ErrorCode::Forbidden.as_str());
            return Envelope::error(Some(id.to_string()), ErrorCode::Forbidden, "not authorised for this channel");
        }
        self.registry.subscribe(conn.id, channel);
        Envelope::response(
            id.to_string(),
            "subscribe",
            serde_json::json!({"status": "subscribed", "channel": channel}),
        )
    }

    fn handle_unsubscribe(&self, conn: &ConnectionHandle, request: &Envelope, id: &str) -> Envelope {
        let Some(channel) = request.data.get("channel").and_then(Value::as_str) else {
            return Envelope::error(Some(id.to_string()), ErrorCode::UnknownRequest, "missing channel");
        };
        self.registry.unsubscribe(conn.id, channel);
        Envelope::response(
            id.to_string(),
            "unsubscribe",
            serde_json::json!({"status": "unsubscribed", "channel": channel}),
        )
    }

    async fn handle_get_pool_status(&self, request: &Envelope, id: &str) -> Envelope {
        let Some(pool_id) = request.data.get("pool_id").and_then(Value::as_str) else {
            return Envelope::error(Some(id.to_string()), ErrorCode::UnknownRequest, "missing pool_id");
        };
        match self.status.pool_status(pool_id).await {
            Some(data) => Envelope::response(id.to_string(), "get_pool_status", data),
            None => {
                self.metrics.record_error(ErrorCode::NotFound.as_str());
                Envelope::error(Some(id.to_string()), ErrorCode::NotFound, "unknown pool")
            }
        }
    }

    async fn handle_get_workflow_status(&self, request: &Envelope, id: &str) -> Envelope {
        let Some(workflow_id) = request.data.get("workflow_id").and_then(Value::as_str) else {
            return Envelope::error(Some(id.to_string()), ErrorCode::UnknownRequest, "missing workflow_id");
        };
        match self.status.workflow_status(workflow_id).await {
            Some(data) => Envelope::response(id.to_string(), "get_workflow_status", data),
            None => {
                self.metrics.record_error(ErrorCode::NotFound.as_str());
                Envelope::error(Some(id.to_string()), ErrorCode::NotFound, "unknown workflow")
            }
        }
    }

    /// Fans the frame out to every member of `room`. Delivery is
    /// best-effort per socket; a send failure unregisters that connection.
    pub fn broadcast_to_room(&self, room: &str, frame: Envelope) {
        let started = Instant::now();
        let members = self.registry.room_members(room);
        let mut dead = Vec::new();
        for member in &members {
            if member.sender.send(frame.clone()).is_err() {
                dead.push(member.id);
            }
        }
        for id in dead {
            self.registry.unregister(id);
        }
        self.metrics.record_message(MessageKind::Event);
        self.metrics.record_broadcast(room, started.elapsed());
    }

    pub fn active_connection_count(&self) -> usize {
        self.registry.active_connection_count()
    }

    pub fn active_subscription_count(&self) -> usize {
        self.registry.active_subscription_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;

    fn server() -> PushServer {
        PushServer::new(AuthConfig::disabled(), 100.0, Arc::new(NullStatusProvider))
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_round_trips() {
        let server = server();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = server.accept_connection(None, tx).unwrap();

        let req = Envelope {
            frame_type: FrameType::Request,
            event: "subscribe".to_string(),
            data: serde_json::json!({"channel": "global"}),
            id: Some("1".to_string()),
            correlation_id: None,
            room: None,
        };
        let resp = server.handle_request(&conn, &req).await;
        assert_eq!(resp.data["status"], "subscribed");
        assert_eq!(server.active_subscription_count(), 1);

        let req = Envelope {
            event: "unsubscribe".to_string(),
            ..req
        };
        let resp = server.handle_request(&conn, &req).await;
        assert_eq!(resp.data["status"], "unsubscribed");
        assert_eq!(server.active_subscription_count(), 0);
    }

    #[tokio::test]
    async fn unknown_request_returns_unknown_request_error() {
        let server = server();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = server.accept_connection(None, tx).unwrap();
        let req = Envelope {
            frame_type: FrameType::Request,
            event: "bogus".to_string(),
            data: serde_json::json!({}),
            id: Some("1".to_string()),
            correlation_id: None,
            room: None,
        };
        let resp = server.handle_request(&conn, &req).await;
        assert_eq!(resp.frame_type, FrameType::Error);
        assert_eq!(resp.data["code"], "UNKNOWN_REQUEST");
    }

    #[tokio::test]
    async fn subscribing_to_restricted_channel_without_auth_is_forbidden() {
        let server = PushServer::new(
            AuthConfig::enabled(b"secret".to_vec()),
            100.0,
            Arc::new(NullStatusProvider),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        // No token supplied and auth enabled -> accept_connection refuses.
        assert!(server.accept_connection(None, tx).is_none());
    }

    #[tokio::test]
    async fn broadcast_unregisters_connections_whose_receiver_dropped() {
        let server = server();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = server.accept_connection(None, tx).unwrap();
        server.registry.subscribe(conn.id, "global");
        drop(rx);

        server.broadcast_to_room("global", Envelope::event("global", "x", serde_json::json!({})));
        assert_eq!(server.active_connection_count(), 0);
    }

    #[tokio::test]
    async fn stop_transitions_state_and_clears_connections() {
        let server = Arc::new(server());
        let (tx, _rx) = mpsc::unbounded_channel();
        server.accept_connection(None, tx);
        server.start();
        assert_eq!(server.state(), ServerState::Running);
        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.active_connection_count(), 0);
    }
}
