//! Health scoring engine
//!
//! Pure functions mapping an entity snapshot to a 0-100 score and a status
//! classification. Both take the evaluation time as an explicit parameter
//! instead of reading the clock, so identical inputs always yield identical
//! output.

use chrono::{DateTime, Duration, Utc};

use crate::{EntityStatus, MonitoredEntity};

/// Grace period before inactivity starts to cost points.
const INACTIVITY_GRACE_SECS: i64 = 60;

/// Points deducted per minute of inactivity beyond the grace period.
const INACTIVITY_POINTS_PER_MINUTE: f64 = 5.0;

/// A reported error within this window still costs points.
const RECENT_ERROR_WINDOW_SECS: i64 = 300;

/// Compute the health score for an entity at a given instant.
///
/// Starts at 100 and deducts:
/// - up to 30 for inactivity beyond a 60 s grace period
/// - 40 / 20 / 10 for explicit error / warning / maintenance status
/// - up to 20 for the error rate (`min(20, rate * 4)`)
/// - up to 15 for response times above 1000 ms (`min(15, (rt/1000) * 3)`)
/// - 25 (high severity) or 15 for an error within the last 5 minutes
///
/// The result is clamped to 0..=100 and rounded to the nearest integer.
pub fn score(entity: &MonitoredEntity, now: DateTime<Utc>) -> u8 {
    let mut score = 100.0_f64;

    let inactive_secs = (now - entity.last_seen).num_seconds().max(0);
    if inactive_secs > INACTIVITY_GRACE_SECS {
        let inactive_minutes = (inactive_secs - INACTIVITY_GRACE_SECS) as f64 / 60.0;
        score -= (inactive_minutes * INACTIVITY_POINTS_PER_MINUTE).min(30.0);
    }

    score -= match entity.reported_status {
        EntityStatus::Error => 40.0,
        EntityStatus::Warning => 20.0,
        EntityStatus::Maintenance => 10.0,
        _ => 0.0,
    };

    score -= (entity.metrics.error_rate * 4.0).min(20.0).max(0.0);

    if entity.metrics.response_time_ms > 1000.0 {
        score -= ((entity.metrics.response_time_ms / 1000.0) * 3.0).min(15.0);
    }

    if let Some(error) = &entity.last_error {
        let age = now - error.timestamp;
        if age >= Duration::zero() && age.num_seconds() <= RECENT_ERROR_WINDOW_SECS {
            score -= match error.severity {
                crate::ErrorSeverity::High => 25.0,
                _ => 15.0,
            };
        }
    }

    score.clamp(0.0, 100.0).round() as u8
}

/// Classify an entity into an effective status.
///
/// Evaluated in priority order: explicit error, inactivity timeout,
/// critical score, warning score, explicit maintenance, operational.
/// For fixed non-score inputs the classification is monotonic in the
/// score: a lower score never maps to a better bucket.
pub fn classify(
    entity: &MonitoredEntity,
    score: u8,
    now: DateTime<Utc>,
    inactivity_threshold: Duration,
) -> EntityStatus {
    if entity.reported_status == EntityStatus::Error {
        return EntityStatus::Error;
    }

    if now - entity.last_seen > inactivity_threshold {
        return EntityStatus::Timeout;
    }

    if score < 50 {
        return EntityStatus::Critical;
    }

    if score < 70 {
        return EntityStatus::Warning;
    }

    if entity.reported_status == EntityStatus::Maintenance {
        return EntityStatus::Maintenance;
    }

    EntityStatus::Operational
}
