//! Connection and room bookkeeping. Two fine-grained locks, per `spec.md`
//! §5: fan-out copies the membership set under the lock then iterates the
//! copy outside it.

use crate::auth::Claims;
use crate::envelope::Envelope;
use meridian_shared::resilience::TokenBucket;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub claims: Option<Claims>,
    pub bucket: TokenBucket,
    pub sender: mpsc::UnboundedSender<Envelope>,
    last_rate_limit_log: Mutex<Option<Instant>>,
}

impl ConnectionHandle {
    pub fn new(
        id: Uuid,
        claims: Option<Claims>,
        bucket: TokenBucket,
        sender: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            id,
            claims,
            bucket,
            sender,
            last_rate_limit_log: Mutex::new(None),
        }
    }

    /// True if this is the first rate-limit event for this connection
    /// within the current 1-second window.
    pub fn should_log_rate_limit(&self) -> bool {
        let mut last = self.last_rate_limit_log.lock().expect("lock poisoned");
        let now = Instant::now();
        let should_log = last.is_none_or(|t| now.duration_since(t).as_secs_f64() >= 1.0);
        if should_log {
            *last = Some(now);
        }
        should_log
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: RwLock<HashMap<Uuid, std::sync::Arc<ConnectionHandle>>>,
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: std::sync::Arc<ConnectionHandle>) {
        self.connections
            .write()
            .expect("lock poisoned")
            .insert(handle.id, handle);
    }

    /// Removes the connection and every room membership it held.
    pub fn unregister(&self, id: Uuid) {
        self.connections.write().expect("lock poisoned").remove(&id);
        let mut rooms = self.rooms.write().expect("lock poisoned");
        rooms.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
    }

    pub fn connection(&self, id: Uuid) -> Option<std::sync::Arc<ConnectionHandle>> {
        self.connections.read().expect("lock poisoned").get(&id).cloned()
    }

    pub fn subscribe(&self, id: Uuid, channel: &str) {
        self.rooms
            .write()
            .expect("lock poisoned")
            .entry(channel.to_string())
            .or_default()
            .insert(id);
    }

    pub fn unsubscribe(&self, id: Uuid, channel: &str) {
        if let Some(members) = self.rooms.write().expect("lock poisoned").get_mut(channel) {
            members.remove(&id);
        }
    }

    /// Snapshot of the room's membership, copied under the lock so callers
    /// can iterate and send without holding it.
    pub fn room_members(&self, channel: &str) -> Vec<std::sync::Arc<ConnectionHandle>> {
        let member_ids: Vec<Uuid> = {
            let rooms = self.rooms.read().expect("lock poisoned");
            rooms.get(channel).into_iter().flatten().copied().collect()
        };
        let connections = self.connections.read().expect("lock poisoned");
        member_ids
            .into_iter()
            .filter_map(|id| connections.get(&id).cloned())
            .collect()
    }

    pub fn active_connection_count(&self) -> usize {
        self.connections.read().expect("lock poisoned").len()
    }

    pub fn active_subscription_count(&self) -> usize {
        self.rooms
            .read()
            .expect("lock poisoned")
            .values()
            .map(|m| m.len())
            .sum()
    }

    pub fn all_connection_ids(&self) -> Vec<Uuid> {
        self.connections.read().expect("lock poisoned").keys().copied().collect()
    }

    /// Unregisters every connection whose bucket has seen no `check()` call
    /// for at least `threshold`, returning the ids removed.
    pub fn sweep_idle(&self, threshold: Duration) -> Vec<Uuid> {
        let idle: Vec<Uuid> = {
            let connections = self.connections.read().expect("lock poisoned");
            connections
                .iter()
                .filter(|(_, handle)| handle.bucket.idle_for_secs() >= threshold.as_secs_f64())
                .map(|(id, _)| *id)
                .collect()
        };
        for id in &idle {
            self.unregister(*id);
        }
        idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: Uuid) -> std::sync::Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::unbounded_channel();
        std::sync::Arc::new(ConnectionHandle::new(id, None, TokenBucket::new(10.0, None), tx))
    }

    #[test]
    fn unregister_clears_room_membership() {
        let registry = Registry::new();
        let id = Uuid::now_v7();
        registry.register(handle(id));
        registry.subscribe(id, "pool:a");
        assert_eq!(registry.active_subscription_count(), 1);
        registry.unregister(id);
        assert_eq!(registry.active_subscription_count(), 0);
        assert_eq!(registry.active_connection_count(), 0);
    }

    #[test]
    fn room_members_only_returns_still_connected_handles() {
        let registry = Registry::new();
        let id = Uuid::now_v7();
        registry.register(handle(id));
        registry.subscribe(id, "global");
        assert_eq!(registry.room_members("global").len(), 1);
    }

    #[test]
    fn sweep_idle_removes_only_connections_past_the_threshold() {
        let registry = Registry::new();
        let id = Uuid::now_v7();
        registry.register(handle(id));
        registry.subscribe(id, "global");

        assert!(registry.sweep_idle(Duration::from_secs(60)).is_empty());
        assert_eq!(registry.active_connection_count(), 1);

        let removed = registry.sweep_idle(Duration::from_secs(0));
        assert_eq!(removed, vec![id]);
        assert_eq!(registry.active_connection_count(), 0);
        assert_eq!(registry.active_subscription_count(), 0);
    }

    #[test]
    fn unsubscribe_removes_single_membership_without_dropping_connection() {
        let registry = Registry::new();
        let id = Uuid::now_v7();
        registry.register(handle(id));
        registry.subscribe(id, "global");
        registry.unsubscribe(id, "global");
        assert_eq!(registry.room_members("global").len(), 0);
        assert_eq!(registry.active_connection_count(), 1);
    }
}
