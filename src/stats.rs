use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Process-lifetime delivery counters. Safe to update from delivery tasks.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    received: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    last_message_time: Mutex<Option<DateTime<Utc>>>,
    seen_sources: Mutex<BTreeSet<i64>>,
}

/// Point-in-time copy of [`DeliveryStats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub sent: u64,
    pub failed: u64,
    pub last_message_time: Option<DateTime<Utc>>,
    pub active_sources: Vec<i64>,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an inbound event and remember where it came from.
    pub fn record_received(&self, source_id: i64, at: DateTime<Utc>) {
        self.received.fetch_add(1, Ordering::Relaxed);
        *self
            .last_message_time
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(at);
        self.seen_sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(source_id);
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_message_time: *self
                .last_message_time
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
            active_sources: self
                .seen_sources
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .copied()
                .collect(),
        }
    }

    pub fn log_summary(&self) {
        let snap = self.snapshot();
        info!(
            received = snap.received,
            sent = snap.sent,
            failed = snap.failed,
            active_sources = snap.active_sources.len(),
            last_message = ?snap.last_message_time,
            "Delivery stats"
        );
    }
}
