//! Entity registry
//!
//! In-memory last-known-state store for monitored entities. Records are
//! created lazily on the first message naming an unknown id and merged
//! field-by-field on every subsequent update, so unspecified fields
//! persist across partial updates. Records are never removed for the life
//! of the session.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::channel::frame::EntityUpdate;
use crate::{EntityError, EntityKind, MonitoredEntity};

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, MonitoredEntity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry with a snapshot, e.g. fetched from the upstream
    /// API at startup. Existing records win over snapshot records.
    pub fn seed(&mut self, snapshot: Vec<MonitoredEntity>) {
        for entity in snapshot {
            self.entities.entry(entity.id.clone()).or_insert(entity);
        }
    }

    /// Apply a partial update, creating the record if the id is unknown.
    ///
    /// Merge is shallow and field-by-field: only fields present in the
    /// update are overwritten. `last_seen` is always refreshed.
    pub fn apply(&mut self, update: EntityUpdate, now: DateTime<Utc>) -> &MonitoredEntity {
        let entity = self
            .entities
            .entry(update.entity_id.clone())
            .or_insert_with(|| {
                debug!("creating registry record for {}", update.entity_id);
                MonitoredEntity::new(
                    update.entity_id.clone(),
                    update.kind.unwrap_or(EntityKind::Agent),
                    now,
                )
            });

        if let Some(kind) = update.kind {
            entity.kind = kind;
        }
        if let Some(status) = update.status {
            entity.reported_status = status;
        }
        if let Some(response_time_ms) = update.response_time_ms {
            entity.metrics.response_time_ms = response_time_ms;
        }
        if let Some(error_rate) = update.error_rate {
            entity.metrics.error_rate = error_rate;
        }
        if let Some(throughput) = update.throughput {
            entity.metrics.throughput = throughput;
        }
        if let Some(department) = update.department {
            entity.department = Some(department);
        }
        entity.last_seen = now;

        entity
    }

    /// Record a reported error for an entity, creating it if unknown.
    pub fn record_error(
        &mut self,
        entity_id: &str,
        error: EntityError,
        now: DateTime<Utc>,
    ) -> &MonitoredEntity {
        let entity = self
            .entities
            .entry(entity_id.to_string())
            .or_insert_with(|| MonitoredEntity::new(entity_id, EntityKind::Agent, now));

        entity.last_error = Some(error);
        entity.last_seen = now;
        entity
    }

    /// Record a completed task for an entity, creating it if unknown.
    pub fn record_task(&mut self, entity_id: &str, now: DateTime<Utc>) -> &MonitoredEntity {
        let entity = self
            .entities
            .entry(entity_id.to_string())
            .or_insert_with(|| MonitoredEntity::new(entity_id, EntityKind::Agent, now));

        entity.tasks_completed += 1;
        entity.last_seen = now;
        entity
    }

    pub fn get(&self, entity_id: &str) -> Option<&MonitoredEntity> {
        self.entities.get(entity_id)
    }

    pub fn get_mut(&mut self, entity_id: &str) -> Option<&mut MonitoredEntity> {
        self.entities.get_mut(entity_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MonitoredEntity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MonitoredEntity> {
        self.entities.values_mut()
    }

    /// Distinct department tags currently present in the registry.
    pub fn departments(&self) -> Vec<String> {
        let mut departments: Vec<String> = self
            .entities
            .values()
            .filter_map(|e| e.department.clone())
            .collect();
        departments.sort();
        departments.dedup();
        departments
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
