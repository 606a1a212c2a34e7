//! Translates domain-level calls into push envelopes (`spec.md` §4.9).
//! When no server is attached, or it is stopped, events queue in a bounded
//! FIFO buffer (drop-oldest) until `flush` drains it.

use crate::envelope::Envelope;
use crate::server::{PushServer, ServerState};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::warn;

const DEFAULT_BUFFER_CAPACITY: usize = 1000;
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
struct BufferedEvent {
    room: String,
    envelope: Envelope,
}

pub struct Broadcaster {
    server: RwLock<Option<Arc<PushServer>>>,
    buffer: Mutex<VecDeque<BufferedEvent>>,
    buffer_capacity: usize,
    reconnect_attempts: AtomicU32,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("buffer_capacity", &self.buffer_capacity)
            .field(
                "reconnect_attempts",
                &self.reconnect_attempts.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            server: RwLock::new(None),
            buffer: Mutex::new(VecDeque::new()),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    pub fn attach(&self, server: Arc<PushServer>) {
        *self.server.write().expect("lock poisoned") = Some(server);
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    pub fn detach(&self) {
        *self.server.write().expect("lock poisoned") = None;
    }

    fn emit(&self, room: impl Into<String>, event: impl Into<String>, data: Value) {
        let room = room.into();
        let envelope = Envelope::event(room.clone(), event, data);

        let attached = self.server.read().expect("lock poisoned").clone();
        match attached {
            Some(server) if server.state() == ServerState::Running => {
                server.broadcast_to_room(&room, envelope);
            }
            Some(_) | None => self.buffer_push(room, envelope),
        }
    }

    fn buffer_push(&self, room: String, envelope: Envelope) {
        let mut buffer = self.buffer.lock().expect("lock poisoned");
        if buffer.len() >= self.buffer_capacity {
            buffer.pop_front();
        }
        buffer.push_back(BufferedEvent { room, envelope });
    }

    /// Drains the buffer in insertion order against the currently attached
    /// server. Returns how many delivered (i.e. a server was attached and
    /// running for the whole drain).
    pub fn flush(&self) -> usize {
        let attached = self.server.read().expect("lock poisoned").clone();
        let Some(server) = attached.filter(|s| s.state() == ServerState::Running) else {
            return 0;
        };

        let mut delivered = 0;
        let mut buffer = self.buffer.lock().expect("lock poisoned");
        while let Some(event) = buffer.pop_front() {
            server.broadcast_to_room(&event.room, event.envelope);
            delivered += 1;
        }
        delivered
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().expect("lock poisoned").len()
    }

    /// Called when a connection-type error surfaces while talking to the
    /// attached server. Caps at 5 successive attempts, then resets so a
    /// later genuine recovery isn't permanently locked out.
    pub fn note_connection_error(&self) -> u32 {
        let attempts = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if attempts >= MAX_RECONNECT_ATTEMPTS {
            warn!(attempts, "broadcaster reconnect attempts exhausted, resetting");
            self.reconnect_attempts.store(0, Ordering::Relaxed);
        }
        attempts
    }

    pub fn worker_added(&self, pool_id: &str, worker_id: &str, data: Value) {
        self.emit(format!("pool:{pool_id}"), "worker.added", json!({"worker_id": worker_id, "data": data}));
    }

    pub fn worker_removed(&self, pool_id: &str, worker_id: &str) {
        self.emit(format!("pool:{pool_id}"), "worker.removed", json!({"worker_id": worker_id}));
    }

    pub fn worker_status_changed(&self, pool_id: &str, worker_id: &str, status: &str) {
        self.emit(
            format!("pool:{pool_id}"),
            "worker.status_changed",
            json!({"worker_id": worker_id, "status": status}),
        );
    }

    pub fn pool_spawned(&self, pool_id: &str, data: Value) {
        self.emit(format!("pool:{pool_id}"), "pool.spawned", data);
    }

    pub fn pool_scaled(&self, pool_id: &str, size: usize) {
        self.emit(format!("pool:{pool_id}"), "pool.scaled", json!({"size": size}));
    }

    pub fn pool_status_changed(&self, pool_id: &str, status: &str) {
        self.emit(format!("pool:{pool_id}"), "pool.status_changed", json!({"status": status}));
    }

    pub fn pool_closed(&self, pool_id: &str) {
        self.emit(format!("pool:{pool_id}"), "pool.closed", json!({}));
    }

    pub fn task_assigned(&self, pool_id: &str, task_id: &str, worker_id: &str) {
        self.emit(
            format!("pool:{pool_id}"),
            "task.assigned",
            json!({"task_id": task_id, "worker_id": worker_id}),
        );
    }

    pub fn task_completed(&self, pool_id: &str, task_id: &str, data: Value) {
        self.emit(format!("pool:{pool_id}"), "task.completed", json!({"task_id": task_id, "data": data}));
    }

    pub fn workflow_started(&self, workflow_id: &str, data: Value) {
        self.emit(format!("workflow:{workflow_id}"), "workflow.started", data);
    }

    pub fn workflow_stage_completed(&self, workflow_id: &str, stage: &str) {
        self.emit(
            format!("workflow:{workflow_id}"),
            "workflow.stage_completed",
            json!({"stage": stage}),
        );
    }

    pub fn workflow_completed(&self, workflow_id: &str, data: Value) {
        self.emit(format!("workflow:{workflow_id}"), "workflow.completed", data);
    }

    pub fn workflow_failed(&self, workflow_id: &str, reason: &str) {
        self.emit(format!("workflow:{workflow_id}"), "workflow.failed", json!({"reason": reason}));
    }

    pub fn learning_metrics(&self, data: Value) {
        self.emit("symbiotic:ecosystem", "learning.metrics", data);
    }

    pub fn skill_effectiveness(&self, data: Value) {
        self.emit("symbiotic:ecosystem", "skill.effectiveness", data);
    }

    pub fn strategy_recommender(&self, data: Value) {
        self.emit("symbiotic:ecosystem", "strategy.recommender", data);
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
