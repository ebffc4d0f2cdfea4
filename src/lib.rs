pub mod actors;
pub mod alerting;
pub mod bus;
pub mod channel;
pub mod config;
pub mod health;
pub mod history;
pub mod registry;
pub mod upstream;
pub mod util;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a monitored unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Agent,
    Department,
}

/// Status of a monitored entity.
///
/// `Active`, `Error` and `Maintenance` may be reported explicitly by the
/// entity itself; the remaining variants are derived by the health engine
/// on every monitoring tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    Operational,
    Warning,
    Critical,
    Error,
    Timeout,
    Maintenance,
}

impl EntityStatus {
    /// Get the string representation (lowercase)
    ///
    /// This matches the serde serialization format.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Operational => "operational",
            EntityStatus::Warning => "warning",
            EntityStatus::Critical => "critical",
            EntityStatus::Error => "error",
            EntityStatus::Timeout => "timeout",
            EntityStatus::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Performance metrics reported by an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Average response time in milliseconds
    #[serde(default)]
    pub response_time_ms: f64,

    /// Error rate in percent (0-100)
    #[serde(default)]
    pub error_rate: f64,

    /// Tasks per minute
    #[serde(default)]
    pub throughput: f64,
}

/// Severity attached to a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    High,
    Medium,
    Low,
}

/// Last error recorded for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityError {
    pub error_type: String,
    pub message: String,
    pub severity: ErrorSeverity,
    pub timestamp: DateTime<Utc>,
}

/// Last-known state of a monitored entity.
///
/// Created lazily on the first message naming an unknown id and merged
/// field-by-field on every subsequent update, so partial updates never
/// erase previously reported fields. Never removed for the life of the
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredEntity {
    pub id: String,
    pub kind: EntityKind,

    /// Effective status, recomputed by the health engine each tick
    pub status: EntityStatus,

    /// Status as last reported by the entity itself
    pub reported_status: EntityStatus,

    /// Derived health score, always within 0..=100
    pub health_score: u8,

    pub last_seen: DateTime<Utc>,
    pub metrics: PerformanceMetrics,

    /// Cumulative completed task counter
    pub tasks_completed: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<EntityError>,

    /// Department/group tag, if the entity belongs to one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

impl MonitoredEntity {
    /// Create a fresh entity record with default fields.
    pub fn new(id: impl Into<String>, kind: EntityKind, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind,
            status: EntityStatus::Operational,
            reported_status: EntityStatus::Operational,
            health_score: 100,
            last_seen: now,
            metrics: PerformanceMetrics::default(),
            tasks_completed: 0,
            last_error: None,
            department: None,
        }
    }
}
