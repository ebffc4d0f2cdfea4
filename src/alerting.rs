//! Threshold alerting engine
//!
//! Evaluates scored entities against configurable thresholds on every
//! monitoring tick. Severity is always derived from how far the observed
//! value exceeds the threshold, never taken from upstream free text.
//!
//! ## Deduplication
//!
//! At most one open alert exists per `(entity, rule)` key. A key opens
//! when its rule first fails and closes when the rule passes on a later
//! tick or the record is removed by the retention sweep. Acknowledging a
//! record does not close the key, so a persistently violated rule does
//! not re-fire after an operator acknowledged it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::MonitoredEntity;

/// Rule that an alert was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRule {
    HealthScore,
    ResponseTime,
    ErrorRate,
    Inactivity,
    /// Synthetic alert describing an upstream API failure
    Upstream,
}

impl AlertRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertRule::HealthScore => "health_score",
            AlertRule::ResponseTime => "response_time",
            AlertRule::ErrorRate => "error_rate",
            AlertRule::Inactivity => "inactivity",
            AlertRule::Upstream => "upstream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// A single threshold violation requiring operator attention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub entity_id: String,
    pub rule: AlertRule,
    pub severity: AlertSeverity,
    pub message: String,
    pub threshold: f64,
    pub observed: f64,
    pub created: DateTime<Utc>,
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Alert thresholds, independently overridable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum acceptable health score
    #[serde(default = "default_health_score_floor")]
    pub health_score_floor: u8,

    /// Maximum acceptable response time in milliseconds
    #[serde(default = "default_max_response_time_ms")]
    pub max_response_time_ms: f64,

    /// Maximum acceptable error rate in percent
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    /// Maximum acceptable inactivity in seconds
    #[serde(default = "default_max_inactivity_secs")]
    pub max_inactivity_secs: i64,
}

fn default_health_score_floor() -> u8 {
    70
}

fn default_max_response_time_ms() -> f64 {
    2000.0
}

fn default_max_error_rate() -> f64 {
    5.0
}

fn default_max_inactivity_secs() -> i64 {
    300
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            health_score_floor: default_health_score_floor(),
            max_response_time_ms: default_max_response_time_ms(),
            max_error_rate: default_max_error_rate(),
            max_inactivity_secs: default_max_inactivity_secs(),
        }
    }
}

/// Stateful alerting engine.
#[derive(Debug)]
pub struct AlertEngine {
    thresholds: Thresholds,

    /// Records older than this are discarded by the sweep,
    /// acknowledged or not
    retention: Duration,

    alerts: Vec<Alert>,

    /// Open alert id per (entity, rule) key
    open: HashMap<(String, AlertRule), String>,

    seq: u64,
}

impl AlertEngine {
    pub fn new(thresholds: Thresholds, retention: Duration) -> Self {
        Self {
            thresholds,
            retention,
            alerts: Vec::new(),
            open: HashMap::new(),
            seq: 0,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Replace the rule set at runtime.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        debug!("updating alert thresholds: {thresholds:?}");
        self.thresholds = thresholds;
    }

    /// Evaluate one scored entity. Returns the alerts raised on this tick.
    pub fn evaluate_entity(&mut self, entity: &MonitoredEntity, now: DateTime<Utc>) -> Vec<Alert> {
        let mut raised = Vec::new();
        let t = self.thresholds;

        let score = entity.health_score as f64;
        let floor = t.health_score_floor as f64;
        self.check_rule(
            &mut raised,
            &entity.id,
            AlertRule::HealthScore,
            score < floor,
            floor,
            score,
            // score < 50 is critical, everything else a warning
            if entity.health_score < 50 {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            },
            format!(
                "health score {} below floor {}",
                entity.health_score, t.health_score_floor
            ),
            now,
        );

        let response_time = entity.metrics.response_time_ms;
        self.check_rule(
            &mut raised,
            &entity.id,
            AlertRule::ResponseTime,
            response_time > t.max_response_time_ms,
            t.max_response_time_ms,
            response_time,
            severity_by_ratio(response_time, t.max_response_time_ms),
            format!(
                "response time {response_time:.0}ms above limit {:.0}ms",
                t.max_response_time_ms
            ),
            now,
        );

        let error_rate = entity.metrics.error_rate;
        self.check_rule(
            &mut raised,
            &entity.id,
            AlertRule::ErrorRate,
            error_rate > t.max_error_rate,
            t.max_error_rate,
            error_rate,
            severity_by_ratio(error_rate, t.max_error_rate),
            format!(
                "error rate {error_rate:.1}% above limit {:.1}%",
                t.max_error_rate
            ),
            now,
        );

        let inactive_secs = (now - entity.last_seen).num_seconds().max(0) as f64;
        let max_inactivity = t.max_inactivity_secs as f64;
        self.check_rule(
            &mut raised,
            &entity.id,
            AlertRule::Inactivity,
            inactive_secs > max_inactivity,
            max_inactivity,
            inactive_secs,
            severity_by_ratio(inactive_secs, max_inactivity),
            format!("no message for {inactive_secs:.0}s (limit {max_inactivity:.0}s)"),
            now,
        );

        raised
    }

    #[allow(clippy::too_many_arguments)]
    fn check_rule(
        &mut self,
        raised: &mut Vec<Alert>,
        entity_id: &str,
        rule: AlertRule,
        violated: bool,
        threshold: f64,
        observed: f64,
        severity: AlertSeverity,
        message: String,
        now: DateTime<Utc>,
    ) {
        let key = (entity_id.to_string(), rule);

        if !violated {
            if self.open.remove(&key).is_some() {
                trace!("{entity_id}: {} back within threshold", rule.as_str());
            }
            return;
        }

        if self.open.contains_key(&key) {
            // open alert already covers this violation
            return;
        }

        let alert = self.push_alert(entity_id, rule, severity, message, threshold, observed, now);
        raised.push(alert);
    }

    /// Raise a synthetic alert outside the rule set, e.g. for an upstream
    /// API failure. Deduplicated like any rule alert.
    pub fn raise_synthetic(
        &mut self,
        entity_id: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let key = (entity_id.to_string(), AlertRule::Upstream);
        if self.open.contains_key(&key) {
            return None;
        }

        Some(self.push_alert(
            entity_id,
            AlertRule::Upstream,
            AlertSeverity::Critical,
            message.into(),
            0.0,
            0.0,
            now,
        ))
    }

    /// Close the open key for a synthetic alert once the source recovered.
    pub fn resolve_synthetic(&mut self, entity_id: &str) {
        self.open.remove(&(entity_id.to_string(), AlertRule::Upstream));
    }

    fn push_alert(
        &mut self,
        entity_id: &str,
        rule: AlertRule,
        severity: AlertSeverity,
        message: String,
        threshold: f64,
        observed: f64,
        now: DateTime<Utc>,
    ) -> Alert {
        self.seq += 1;
        let alert = Alert {
            id: format!("alert-{}", self.seq),
            entity_id: entity_id.to_string(),
            rule,
            severity,
            message,
            threshold,
            observed,
            created: now,
            acknowledged: false,
            acknowledged_at: None,
        };

        debug!(
            "{entity_id}: raised {:?} {} alert ({})",
            alert.severity,
            rule.as_str(),
            alert.message
        );

        self.open
            .insert((entity_id.to_string(), rule), alert.id.clone());
        self.alerts.push(alert.clone());
        alert
    }

    /// Mark an alert as acknowledged. Returns false for unknown ids.
    pub fn acknowledge(&mut self, alert_id: &str, now: DateTime<Utc>) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                alert.acknowledged_at = Some(now);
                true
            }
            None => false,
        }
    }

    /// All unacknowledged alerts, newest first.
    pub fn active(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created.cmp(&a.created));
        active
    }

    pub fn all(&self) -> &[Alert] {
        &self.alerts
    }

    /// Discard records older than the retention window, acknowledged or
    /// not. Returns the number of records removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let before = self.alerts.len();

        self.alerts.retain(|a| a.created >= cutoff);

        let kept: std::collections::HashSet<&str> =
            self.alerts.iter().map(|a| a.id.as_str()).collect();
        self.open.retain(|_, id| kept.contains(id.as_str()));

        let removed = before - self.alerts.len();
        if removed > 0 {
            debug!("alert sweep removed {removed} records older than {cutoff}");
        }
        removed
    }
}

/// Derive severity from how far the observed value exceeds the threshold.
fn severity_by_ratio(observed: f64, threshold: f64) -> AlertSeverity {
    if threshold > 0.0 && observed >= threshold * 2.0 {
        AlertSeverity::Critical
    } else {
        AlertSeverity::Warning
    }
}
