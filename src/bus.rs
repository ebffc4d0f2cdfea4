//! Typed notification bus
//!
//! In-process publish/subscribe for the notifications consumed by
//! presentation layers. Fan-out uses a tokio broadcast channel: slow
//! subscribers may lag and drop, which is acceptable for live dashboard
//! feeds that are refreshed on every tick anyway.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use crate::alerting::Alert;
use crate::history::Trend;
use crate::{EntityError, EntityStatus};

/// Aggregate health counts published once per tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSummary {
    pub total: usize,
    pub operational: usize,
    pub warning: usize,
    pub critical: usize,
    pub error: usize,
    pub timeout: usize,
    pub maintenance: usize,
    pub average_score: f64,
}

/// Per-department rollup published once per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub department: String,
    pub members: usize,
    pub average_score: f64,
    pub total_throughput: f64,
    pub trend: Trend,
}

/// Notifications consumed by presentation layers.
#[derive(Debug, Clone)]
pub enum Notification {
    EntityUpdate {
        entity_id: String,
        status: EntityStatus,
        health_score: u8,
        timestamp: DateTime<Utc>,
    },
    EntityError {
        entity_id: String,
        error: EntityError,
    },
    TaskCompletion {
        entity_id: String,
        task_id: String,
        duration_ms: f64,
        success: bool,
        timestamp: DateTime<Utc>,
    },
    AlertRaised {
        alert: Alert,
    },
    HealthSummary {
        summary: HealthSummary,
        timestamp: DateTime<Utc>,
    },
    GroupSummary {
        summary: GroupSummary,
        timestamp: DateTime<Utc>,
    },
}

/// Handle for publishing and subscribing to notifications.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Publish a notification. Having no subscribers is not an error.
    pub fn publish(&self, notification: Notification) {
        match self.tx.send(notification) {
            Ok(receivers) => trace!("published notification to {receivers} receivers"),
            Err(_) => trace!("no receivers for notification (this is OK)"),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}
