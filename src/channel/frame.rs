//! Wire frames for channel transports
//!
//! Every frame on the wire is `{type, payload, timestamp?}`. Frames are
//! modelled as a tagged union and validated exactly once, at the transport
//! boundary: anything that does not match a known tag fails
//! deserialization there and is logged and dropped, never dispatched.

use serde::{Deserialize, Serialize};

use crate::{EntityError, EntityKind, EntityStatus};

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(flatten)]
    pub body: FrameBody,

    /// Sender-side timestamp in unix milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Frame {
    pub fn new(body: FrameBody) -> Self {
        Self { body, timestamp: None }
    }

    pub fn with_timestamp(body: FrameBody, timestamp_ms: i64) -> Self {
        Self {
            body,
            timestamp: Some(timestamp_ms),
        }
    }

    /// The data-type key used for subscription routing.
    pub fn data_type(&self) -> &'static str {
        self.body.data_type()
    }
}

/// Frame body, discriminated by the wire `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FrameBody {
    /// Subscription handshake, re-sent on every (re)connect so the
    /// server-side filter stays in sync
    Subscribe { subscriptions: Vec<String> },

    /// Periodic keep-alive, sent in both directions
    Heartbeat,

    /// Partial state update for a monitored entity
    EntityUpdate(EntityUpdate),

    /// Error report for an entity
    EntityError {
        entity_id: String,
        error: EntityError,
    },

    /// Completion notice for a single task
    TaskCompletion {
        entity_id: String,
        task_id: String,
        duration_ms: f64,
        success: bool,
    },

    /// Operator command: ask an entity to report its status
    StatusRequest {
        message_id: String,
        entity_id: String,
    },

    /// Operator command: emergency shutdown of an entity
    EmergencyShutdown {
        message_id: String,
        entity_id: String,
        reason: String,
    },

    /// Operator command: restart an entity
    Restart {
        message_id: String,
        entity_id: String,
    },

    /// Operator command: broadcast a message to a department
    Broadcast {
        message_id: String,
        department: String,
        message: String,
    },
}

impl FrameBody {
    /// The data-type key used for subscription routing.
    ///
    /// This matches the serde `type` tag.
    pub fn data_type(&self) -> &'static str {
        match self {
            FrameBody::Subscribe { .. } => "subscribe",
            FrameBody::Heartbeat => "heartbeat",
            FrameBody::EntityUpdate(_) => "entity_update",
            FrameBody::EntityError { .. } => "entity_error",
            FrameBody::TaskCompletion { .. } => "task_completion",
            FrameBody::StatusRequest { .. } => "status_request",
            FrameBody::EmergencyShutdown { .. } => "emergency_shutdown",
            FrameBody::Restart { .. } => "restart",
            FrameBody::Broadcast { .. } => "broadcast",
        }
    }
}

/// Partial entity update carried by an `entity_update` frame.
///
/// All fields except the id are optional; the registry merges them
/// field-by-field into the last-known state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub entity_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EntityStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

impl EntityUpdate {
    pub fn status(entity_id: impl Into<String>, status: EntityStatus) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: Some(status),
            ..Default::default()
        }
    }
}
