//! Observability counters and gauges (`spec.md` §4.8). Metric names are
//! stable so external collectors can scrape them; this module only holds
//! the numbers, it has no opinion on the exposition format.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Metrics {
    messages_request: AtomicU64,
    messages_response: AtomicU64,
    messages_event: AtomicU64,
    errors_by_kind: Mutex<HashMap<String, u64>>,
    broadcast_duration_by_channel: Mutex<HashMap<String, Vec<Duration>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self, kind: MessageKind) {
        match kind {
            MessageKind::Request => self.messages_request.fetch_add(1, Ordering::Relaxed),
            MessageKind::Response => self.messages_response.fetch_add(1, Ordering::Relaxed),
            MessageKind::Event => self.messages_event.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_error(&self, kind: &str) {
        *self
            .errors_by_kind
            .lock()
            .expect("lock poisoned")
            .entry(kind.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_broadcast(&self, channel: &str, duration: Duration) {
        self.broadcast_duration_by_channel
            .lock()
            .expect("lock poisoned")
            .entry(channel.to_string())
            .or_default()
            .push(duration);
    }

    pub fn message_counts(&self) -> (u64, u64, u64) {
        (
            self.messages_request.load(Ordering::Relaxed),
            self.messages_response.load(Ordering::Relaxed),
            self.messages_event.load(Ordering::Relaxed),
        )
    }

    pub fn error_count(&self, kind: &str) -> u64 {
        *self
            .errors_by_kind
            .lock()
            .expect("lock poisoned")
            .get(kind)
            .unwrap_or(&0)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum MessageKind {
    Request,
    Response,
    Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_counts_track_each_kind_independently() {
        let m = Metrics::new();
        m.record_message(MessageKind::Request);
        m.record_message(MessageKind::Request);
        m.record_message(MessageKind::Event);
        assert_eq!(m.message_counts(), (2, 0, 1));
    }

    #[test]
    fn errors_are_tallied_by_kind() {
        let m = Metrics::new();
        m.record_error("FORBIDDEN");
        m.record_error("FORBIDDEN");
        m.record_error("RATE_LIMITED");
        assert_eq!(m.error_count("FORBIDDEN"), 2);
        assert_eq!(m.error_count("RATE_LIMITED"), 1);
    }
}
