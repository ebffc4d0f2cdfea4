//! Monitor actor
//!
//! Owns the entity registry, the alert and history engines and the
//! outbound command queue. All mutable monitoring state lives inside this
//! one task; everything else talks to it through [`MonitorHandle`].
//!
//! On every tick the actor rescores and reclassifies all entities,
//! evaluates alert rules, appends history samples per entity and per
//! department, publishes summaries on the notification bus and pushes
//! state to the upstream API. Telemetry frames arrive between ticks and
//! only mutate the registry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::alerting::{Alert, AlertEngine, Thresholds};
use crate::bus::{GroupSummary, HealthSummary, Notification, NotificationBus};
use crate::channel::{ChannelEvent, ChannelHandle, ChannelState, Frame, FrameBody, InboundMessage};
use crate::health;
use crate::history::{Granularity, HistoryConfig, HistoryEngine, MetricSample, Trend};
use crate::registry::EntityRegistry;
use crate::upstream::{EnterpriseApi, LogRecord};
use crate::{EntityStatus, MonitoredEntity};

use super::messages::{AgentCommand, Dispatch, MonitorCommand};

/// Pseudo entity id that synthetic upstream alerts are raised against.
const UPSTREAM_ENTITY: &str = "enterprise-api";

/// Telemetry data types the monitor subscribes to.
const TELEMETRY_TYPES: [&str; 3] = ["entity_update", "entity_error", "task_completion"];

/// Runtime settings for the monitor actor.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Interval between scoring/alerting/aggregation passes
    pub tick_interval: Duration,

    /// Interval between alert retention sweeps
    pub sweep_interval: Duration,

    /// Alert records older than this are swept
    pub alert_retention: chrono::Duration,

    /// Silence beyond this classifies an entity as timed out
    pub inactivity_threshold: chrono::Duration,

    /// Commands held while the channel is down; oldest dropped beyond this
    pub command_queue_capacity: usize,

    pub thresholds: Thresholds,
    pub history: HistoryConfig,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(3600),
            alert_retention: chrono::Duration::hours(24),
            inactivity_threshold: chrono::Duration::seconds(300),
            command_queue_capacity: 256,
            thresholds: Thresholds::default(),
            history: HistoryConfig::default(),
        }
    }
}

struct MonitorActor {
    settings: MonitorSettings,
    registry: EntityRegistry,
    alerts: AlertEngine,
    history: HistoryEngine,
    bus: NotificationBus,
    upstream: Option<Arc<dyn EnterpriseApi>>,
    channel: ChannelHandle,
    telemetry_tx: mpsc::UnboundedSender<InboundMessage>,
    telemetry_rx: mpsc::UnboundedReceiver<InboundMessage>,
    events_rx: broadcast::Receiver<ChannelEvent>,
    events_open: bool,
    command_rx: mpsc::Receiver<MonitorCommand>,
    push_tx: mpsc::UnboundedSender<PushOutcome>,
    push_rx: mpsc::UnboundedReceiver<PushOutcome>,

    /// Commands awaiting an open channel, oldest first
    queue: VecDeque<Frame>,

    seq: u64,
}

/// Effective status change observed during a tick, `(id, from, to)`.
type StatusTransition = (String, EntityStatus, EntityStatus);

/// Result of a spawned upstream push, reported back to the actor.
#[derive(Debug)]
enum PushOutcome {
    Persisted,
    Failed {
        reason: String,
        at: DateTime<Utc>,
    },
}

impl MonitorActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting monitor actor");

        for data_type in TELEMETRY_TYPES {
            if let Err(e) = self
                .channel
                .subscribe(data_type, self.telemetry_tx.clone())
                .await
            {
                error!("failed to subscribe to {data_type}: {e:#}");
            }
        }

        self.seed().await;

        let mut tick = interval_at(
            Instant::now() + self.settings.tick_interval,
            self.settings.tick_interval,
        );
        let mut sweep = interval_at(
            Instant::now() + self.settings.sweep_interval,
            self.settings.sweep_interval,
        );

        loop {
            tokio::select! {
                Some(message) = self.telemetry_rx.recv() => {
                    self.handle_frame(message.frame, Utc::now());
                }

                _ = tick.tick() => {
                    self.tick(Utc::now());
                }

                _ = sweep.tick() => {
                    self.sweep(Utc::now());
                }

                Some(outcome) = self.push_rx.recv() => {
                    self.apply_push_outcome(outcome);
                }

                event = self.events_rx.recv(), if self.events_open => match event {
                    Ok(ChannelEvent::StateChanged { state: ChannelState::Open, .. }) => {
                        self.flush_queue().await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("channel event tap lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.events_open = false;
                    }
                },

                command = self.command_rx.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        debug!("monitor actor stopped");
    }

    /// Seed the registry from the upstream snapshot. On failure the
    /// registry starts empty and a synthetic critical alert is raised.
    async fn seed(&mut self) {
        let Some(api) = self.upstream.clone() else {
            return;
        };

        match api.fetch_entities().await {
            Ok(snapshot) => {
                debug!("seeding registry with {} entities", snapshot.len());
                self.registry.seed(snapshot);
            }
            Err(e) => {
                warn!("entity snapshot fetch failed: {e}");
                self.raise_upstream_alert(format!("entity snapshot fetch failed: {e}"), Utc::now());
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame, now: DateTime<Utc>) {
        match frame.body {
            FrameBody::EntityUpdate(update) => {
                let entity = self.registry.apply(update, now);
                self.bus.publish(Notification::EntityUpdate {
                    entity_id: entity.id.clone(),
                    status: entity.reported_status,
                    health_score: entity.health_score,
                    timestamp: now,
                });
            }
            FrameBody::EntityError { entity_id, error } => {
                self.registry.record_error(&entity_id, error.clone(), now);
                self.bus.publish(Notification::EntityError { entity_id, error });
            }
            FrameBody::TaskCompletion {
                entity_id,
                task_id,
                duration_ms,
                success,
            } => {
                self.registry.record_task(&entity_id, now);
                self.bus.publish(Notification::TaskCompletion {
                    entity_id,
                    task_id,
                    duration_ms,
                    success,
                    timestamp: now,
                });
            }
            other => trace!("ignoring {} frame", other.data_type()),
        }
    }

    /// One monitoring pass: rescore, reclassify, evaluate alert rules,
    /// append history, publish summaries, start the upstream push.
    ///
    /// Returns whether a push was started, so the explicit tick command
    /// can wait for its outcome.
    fn tick(&mut self, now: DateTime<Utc>) -> bool {
        trace!("monitoring tick over {} entities", self.registry.len());

        let mut transitions = Vec::new();
        for entity in self.registry.iter_mut() {
            let score = health::score(entity, now);
            entity.health_score = score;
            let status = health::classify(entity, score, now, self.settings.inactivity_threshold);
            if status != entity.status {
                debug!("{}: {} -> {}", entity.id, entity.status, status);
                transitions.push((entity.id.clone(), entity.status, status));
            }
            entity.status = status;
        }

        let mut raised = Vec::new();
        for entity in self.registry.iter() {
            raised.extend(self.alerts.evaluate_entity(entity, now));
        }
        for alert in &raised {
            self.bus.publish(Notification::AlertRaised {
                alert: alert.clone(),
            });
        }

        for entity in self.registry.iter() {
            self.history.record(
                &entity.id,
                MetricSample {
                    timestamp: now,
                    health_score: entity.health_score as f64,
                    response_time_ms: entity.metrics.response_time_ms,
                    error_rate: entity.metrics.error_rate,
                    throughput: entity.metrics.throughput,
                    tasks_completed: entity.tasks_completed,
                },
            );
        }

        self.publish_health_summary(now);
        self.publish_group_summaries(now);

        self.start_push(raised, transitions, now)
    }

    fn publish_health_summary(&self, now: DateTime<Utc>) {
        let mut summary = HealthSummary::default();
        let mut score_sum = 0.0;

        for entity in self.registry.iter() {
            summary.total += 1;
            score_sum += entity.health_score as f64;
            match entity.status {
                EntityStatus::Operational | EntityStatus::Active => summary.operational += 1,
                EntityStatus::Warning => summary.warning += 1,
                EntityStatus::Critical => summary.critical += 1,
                EntityStatus::Error => summary.error += 1,
                EntityStatus::Timeout => summary.timeout += 1,
                EntityStatus::Maintenance => summary.maintenance += 1,
            }
        }
        if summary.total > 0 {
            summary.average_score = score_sum / summary.total as f64;
        }

        self.bus.publish(Notification::HealthSummary {
            summary,
            timestamp: now,
        });
    }

    fn publish_group_summaries(&mut self, now: DateTime<Utc>) {
        for department in self.registry.departments() {
            let mut members = 0usize;
            let mut score_sum = 0.0;
            let mut response_time_sum = 0.0;
            let mut error_rate_sum = 0.0;
            let mut throughput = 0.0;
            let mut tasks_completed = 0u64;

            for entity in self
                .registry
                .iter()
                .filter(|e| e.department.as_deref() == Some(department.as_str()))
            {
                members += 1;
                score_sum += entity.health_score as f64;
                response_time_sum += entity.metrics.response_time_ms;
                error_rate_sum += entity.metrics.error_rate;
                throughput += entity.metrics.throughput;
                tasks_completed += entity.tasks_completed;
            }
            if members == 0 {
                continue;
            }

            let n = members as f64;
            let key = format!("department:{department}");
            self.history.record(
                &key,
                MetricSample {
                    timestamp: now,
                    health_score: score_sum / n,
                    response_time_ms: response_time_sum / n,
                    error_rate: error_rate_sum / n,
                    throughput,
                    tasks_completed,
                },
            );

            let summary = GroupSummary {
                department,
                members,
                average_score: score_sum / n,
                total_throughput: throughput,
                trend: self.history.trend(&key, Granularity::Hourly),
            };
            self.bus.publish(Notification::GroupSummary {
                summary,
                timestamp: now,
            });
        }
    }

    /// Start pushing this tick's alerts, status transitions and entity
    /// state to the upstream API on a spawned task, so slow upstream
    /// round-trips never stall telemetry intake or the next tick. The
    /// outcome comes back through `push_rx` and is applied in the loop.
    ///
    /// Returns whether a push was started.
    fn start_push(
        &mut self,
        raised: Vec<Alert>,
        transitions: Vec<StatusTransition>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(api) = self.upstream.clone() else {
            return false;
        };

        let entities: Vec<MonitoredEntity> = self.registry.iter().cloned().collect();
        let outcome_tx = self.push_tx.clone();
        tokio::spawn(async move {
            let outcome = push_batch(api, raised, transitions, entities, now).await;
            let _ = outcome_tx.send(outcome);
        });
        true
    }

    /// A failed push degrades to a deduplicated synthetic critical alert;
    /// there is no retry. The next successful push resolves it.
    fn apply_push_outcome(&mut self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Persisted => self.alerts.resolve_synthetic(UPSTREAM_ENTITY),
            PushOutcome::Failed { reason, at } => {
                warn!("upstream push failed: {reason}");
                self.raise_upstream_alert(format!("upstream push failed: {reason}"), at);
            }
        }
    }

    fn raise_upstream_alert(&mut self, message: String, now: DateTime<Utc>) {
        if let Some(alert) = self.alerts.raise_synthetic(UPSTREAM_ENTITY, message, now) {
            self.bus.publish(Notification::AlertRaised { alert });
        }
    }

    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        self.alerts.sweep(now)
    }

    /// Send an operator command, queueing it if the channel is down.
    async fn dispatch(&mut self, command: AgentCommand) -> Dispatch {
        self.seq += 1;
        let message_id = format!("cmd-{}", self.seq);

        if let Some(api) = self.upstream.clone() {
            let record = LogRecord::Command {
                message_id: message_id.clone(),
                entity_id: command.target().to_string(),
                command: command.kind().to_string(),
                timestamp: Utc::now(),
            };
            // command logging must not block dispatch
            tokio::spawn(async move {
                if let Err(e) = api.append_log(&record).await {
                    warn!("failed to log command: {e}");
                }
            });
        }

        let frame = command.into_frame(message_id.clone());
        match self.channel.send(frame.clone()).await {
            Ok(true) => Dispatch::Sent { message_id },
            _ => {
                debug!("channel down, queueing command {message_id}");
                self.enqueue(frame);
                Dispatch::Queued { message_id }
            }
        }
    }

    fn enqueue(&mut self, frame: Frame) {
        if self.queue.len() == self.settings.command_queue_capacity {
            warn!("command queue full, dropping oldest command");
            self.queue.pop_front();
        }
        self.queue.push_back(frame);
    }

    /// Flush queued commands in FIFO order after a reconnect.
    async fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        debug!("flushing {} queued commands", self.queue.len());

        while let Some(frame) = self.queue.pop_front() {
            match self.channel.send(frame.clone()).await {
                Ok(true) => {}
                _ => {
                    // channel went down again, keep the rest queued
                    self.queue.push_front(frame);
                    break;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: MonitorCommand) -> bool {
        match command {
            MonitorCommand::GetEntity {
                entity_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.get(&entity_id).cloned());
            }
            MonitorCommand::ListEntities { respond_to } => {
                let mut entities: Vec<MonitoredEntity> = self.registry.iter().cloned().collect();
                entities.sort_by(|a, b| a.id.cmp(&b.id));
                let _ = respond_to.send(entities);
            }
            MonitorCommand::ActiveAlerts { respond_to } => {
                let _ = respond_to.send(self.alerts.active());
            }
            MonitorCommand::Acknowledge {
                alert_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.alerts.acknowledge(&alert_id, Utc::now()));
            }
            MonitorCommand::History {
                key,
                granularity,
                within,
                respond_to,
            } => {
                let _ = respond_to.send(self.history.range(&key, granularity, within, Utc::now()));
            }
            MonitorCommand::Trend {
                key,
                granularity,
                respond_to,
            } => {
                let _ = respond_to.send(self.history.trend(&key, granularity));
            }
            MonitorCommand::Dispatch {
                command,
                respond_to,
            } => {
                let receipt = self.dispatch(command).await;
                let _ = respond_to.send(receipt);
            }
            MonitorCommand::SetThresholds { thresholds } => {
                self.alerts.set_thresholds(thresholds);
            }
            MonitorCommand::TickNow { respond_to } => {
                // wait for the push outcome so callers observe its
                // effects once the ack arrives
                if self.tick(Utc::now()) {
                    if let Some(outcome) = self.push_rx.recv().await {
                        self.apply_push_outcome(outcome);
                    }
                }
                let _ = respond_to.send(());
            }
            MonitorCommand::SweepNow { respond_to } => {
                let _ = respond_to.send(self.sweep(Utc::now()));
            }
            MonitorCommand::Shutdown => return false,
        }
        true
    }
}

/// Serially append alert and activity records, then persist every entity.
/// Stops at the first failure.
async fn push_batch(
    api: Arc<dyn EnterpriseApi>,
    raised: Vec<Alert>,
    transitions: Vec<StatusTransition>,
    entities: Vec<MonitoredEntity>,
    now: DateTime<Utc>,
) -> PushOutcome {
    for alert in raised {
        if let Err(e) = api.append_log(&LogRecord::Alert { alert }).await {
            return PushOutcome::Failed {
                reason: e.to_string(),
                at: now,
            };
        }
    }

    for (entity_id, from, to) in transitions {
        let record = LogRecord::Activity {
            entity_id,
            message: format!("status changed from {from} to {to}"),
            timestamp: now,
        };
        if let Err(e) = api.append_log(&record).await {
            return PushOutcome::Failed {
                reason: e.to_string(),
                at: now,
            };
        }
    }

    for entity in &entities {
        if let Err(e) = api.persist_entity(entity).await {
            return PushOutcome::Failed {
                reason: e.to_string(),
                at: now,
            };
        }
    }

    PushOutcome::Persisted
}

/// Handle for interacting with the monitor actor.
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
    bus: NotificationBus,
}

impl MonitorHandle {
    /// Spawn the monitor actor on the given channel.
    ///
    /// `events` should come from the same [`crate::channel::ChannelManager`]
    /// the channel handle belongs to; it drives the command queue flush on
    /// reconnect.
    pub fn spawn(
        settings: MonitorSettings,
        channel: ChannelHandle,
        events: broadcast::Receiver<ChannelEvent>,
        upstream: Option<Arc<dyn EnterpriseApi>>,
    ) -> Self {
        let (sender, command_rx) = mpsc::channel(32);
        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let bus = NotificationBus::default();

        let actor = MonitorActor {
            registry: EntityRegistry::new(),
            alerts: AlertEngine::new(settings.thresholds, settings.alert_retention),
            history: HistoryEngine::new(settings.history),
            settings,
            bus: bus.clone(),
            upstream,
            channel,
            telemetry_tx,
            telemetry_rx,
            events_rx: events,
            events_open: true,
            command_rx,
            push_tx,
            push_rx,
            queue: VecDeque::new(),
            seq: 0,
        };
        tokio::spawn(actor.run());

        Self { sender, bus }
    }

    /// Subscribe to the notification bus.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    pub async fn entity(&self, entity_id: impl Into<String>) -> anyhow::Result<Option<MonitoredEntity>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetEntity {
                entity_id: entity_id.into(),
                respond_to: tx,
            })
            .await
            .context("failed to send GetEntity command")?;
        rx.await.context("failed to receive entity")
    }

    /// All entities, sorted by id.
    pub async fn entities(&self) -> anyhow::Result<Vec<MonitoredEntity>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::ListEntities { respond_to: tx })
            .await
            .context("failed to send ListEntities command")?;
        rx.await.context("failed to receive entities")
    }

    /// Unacknowledged alerts, newest first.
    pub async fn active_alerts(&self) -> anyhow::Result<Vec<Alert>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::ActiveAlerts { respond_to: tx })
            .await
            .context("failed to send ActiveAlerts command")?;
        rx.await.context("failed to receive alerts")
    }

    /// Acknowledge an alert. Returns false for unknown ids.
    pub async fn acknowledge(&self, alert_id: impl Into<String>) -> anyhow::Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::Acknowledge {
                alert_id: alert_id.into(),
                respond_to: tx,
            })
            .await
            .context("failed to send Acknowledge command")?;
        rx.await.context("failed to receive acknowledge result")
    }

    /// History samples for an entity or `department:{name}` key.
    pub async fn history(
        &self,
        key: impl Into<String>,
        granularity: Granularity,
        within: chrono::Duration,
    ) -> anyhow::Result<Vec<MetricSample>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::History {
                key: key.into(),
                granularity,
                within,
                respond_to: tx,
            })
            .await
            .context("failed to send History command")?;
        rx.await.context("failed to receive history")
    }

    pub async fn trend(
        &self,
        key: impl Into<String>,
        granularity: Granularity,
    ) -> anyhow::Result<Trend> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::Trend {
                key: key.into(),
                granularity,
                respond_to: tx,
            })
            .await
            .context("failed to send Trend command")?;
        rx.await.context("failed to receive trend")
    }

    /// Dispatch an operator command towards the fleet.
    pub async fn dispatch(&self, command: AgentCommand) -> anyhow::Result<Dispatch> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::Dispatch {
                command,
                respond_to: tx,
            })
            .await
            .context("failed to send Dispatch command")?;
        rx.await.context("failed to receive dispatch receipt")
    }

    /// Replace the alert thresholds at runtime.
    pub async fn set_thresholds(&self, thresholds: Thresholds) -> anyhow::Result<()> {
        self.sender
            .send(MonitorCommand::SetThresholds { thresholds })
            .await
            .context("failed to send SetThresholds command")
    }

    /// Run a monitoring tick immediately and wait for it, including the
    /// upstream push it starts, to finish.
    pub async fn tick_now(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::TickNow { respond_to: tx })
            .await
            .context("failed to send TickNow command")?;
        rx.await.context("failed to await tick")
    }

    /// Run a retention sweep immediately, returning removed record count.
    pub async fn sweep_now(&self) -> anyhow::Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;
        rx.await.context("failed to await sweep")
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.sender
            .send(MonitorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
