//! Messages understood by the monitor actor
//!
//! Queries carry a oneshot responder; fire-and-forget messages do not.

use chrono::Duration;
use tokio::sync::oneshot;

use crate::MonitoredEntity;
use crate::alerting::{Alert, Thresholds};
use crate::channel::{Frame, FrameBody};
use crate::history::{Granularity, MetricSample, Trend};

/// Operator command addressed to one entity or a whole department.
#[derive(Debug, Clone)]
pub enum AgentCommand {
    /// Ask an entity to report its status
    StatusRequest { entity_id: String },

    /// Emergency shutdown of an entity
    EmergencyShutdown { entity_id: String, reason: String },

    /// Restart an entity
    Restart { entity_id: String },

    /// Broadcast a message to every member of a department
    Broadcast { department: String, message: String },
}

impl AgentCommand {
    /// Wire tag of the resulting frame.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentCommand::StatusRequest { .. } => "status_request",
            AgentCommand::EmergencyShutdown { .. } => "emergency_shutdown",
            AgentCommand::Restart { .. } => "restart",
            AgentCommand::Broadcast { .. } => "broadcast",
        }
    }

    /// Addressee, an entity id or a department tag.
    pub fn target(&self) -> &str {
        match self {
            AgentCommand::StatusRequest { entity_id }
            | AgentCommand::EmergencyShutdown { entity_id, .. }
            | AgentCommand::Restart { entity_id } => entity_id,
            AgentCommand::Broadcast { department, .. } => department,
        }
    }

    /// Build the wire frame carrying this command.
    pub fn into_frame(self, message_id: String) -> Frame {
        let body = match self {
            AgentCommand::StatusRequest { entity_id } => FrameBody::StatusRequest {
                message_id,
                entity_id,
            },
            AgentCommand::EmergencyShutdown { entity_id, reason } => {
                FrameBody::EmergencyShutdown {
                    message_id,
                    entity_id,
                    reason,
                }
            }
            AgentCommand::Restart { entity_id } => FrameBody::Restart {
                message_id,
                entity_id,
            },
            AgentCommand::Broadcast {
                department,
                message,
            } => FrameBody::Broadcast {
                message_id,
                department,
                message,
            },
        };
        Frame::new(body)
    }
}

/// Receipt for a dispatched operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Written to the open channel
    Sent { message_id: String },

    /// Channel not open; queued and flushed on the next reconnect
    Queued { message_id: String },
}

impl Dispatch {
    pub fn message_id(&self) -> &str {
        match self {
            Dispatch::Sent { message_id } | Dispatch::Queued { message_id } => message_id,
        }
    }
}

/// Commands accepted by the monitor actor.
#[derive(Debug)]
pub enum MonitorCommand {
    GetEntity {
        entity_id: String,
        respond_to: oneshot::Sender<Option<MonitoredEntity>>,
    },
    ListEntities {
        respond_to: oneshot::Sender<Vec<MonitoredEntity>>,
    },
    ActiveAlerts {
        respond_to: oneshot::Sender<Vec<Alert>>,
    },
    Acknowledge {
        alert_id: String,
        respond_to: oneshot::Sender<bool>,
    },
    History {
        key: String,
        granularity: Granularity,
        within: Duration,
        respond_to: oneshot::Sender<Vec<MetricSample>>,
    },
    Trend {
        key: String,
        granularity: Granularity,
        respond_to: oneshot::Sender<Trend>,
    },
    Dispatch {
        command: AgentCommand,
        respond_to: oneshot::Sender<Dispatch>,
    },
    SetThresholds {
        thresholds: Thresholds,
    },

    /// Run a monitoring tick immediately
    TickNow {
        respond_to: oneshot::Sender<()>,
    },

    /// Run a retention sweep immediately
    SweepNow {
        respond_to: oneshot::Sender<usize>,
    },

    Shutdown,
}
