//! End-to-end monitor pipeline: telemetry in, alerts and summaries out

use fleetwatch::EntityStatus;
use fleetwatch::actors::MonitorSettings;
use fleetwatch::alerting::{AlertRule, Thresholds};
use fleetwatch::bus::Notification;
use fleetwatch::channel::{Frame, FrameBody};
use fleetwatch::history::{Granularity, Trend};

use crate::helpers::*;

#[tokio::test]
async fn degraded_entity_raises_alerts_once() {
    let mut hub = spawn_hub(test_settings(), None).await;
    let peer = accept_peer(&mut hub).await;

    inject_update(&hub, &peer, degraded_update("agent-1")).await;
    hub.monitor.tick_now().await.unwrap();

    let alerts = hub.monitor.active_alerts().await.unwrap();
    assert!(alerts.iter().any(|a| a.rule == AlertRule::ErrorRate));
    assert!(alerts.iter().any(|a| a.rule == AlertRule::HealthScore));
    let count = alerts.len();

    // the violation persists; no duplicates on the next tick
    hub.monitor.tick_now().await.unwrap();
    assert_eq!(hub.monitor.active_alerts().await.unwrap().len(), count);
}

#[tokio::test]
async fn recovery_closes_the_alert_key() {
    let mut hub = spawn_hub(test_settings(), None).await;
    let peer = accept_peer(&mut hub).await;

    inject_update(&hub, &peer, degraded_update("agent-1")).await;
    hub.monitor.tick_now().await.unwrap();
    let initial = hub.monitor.active_alerts().await.unwrap().len();

    // recovers; the keys close, no new alerts
    inject_update(&hub, &peer, healthy_update("agent-1", "ops")).await;
    hub.monitor.tick_now().await.unwrap();
    assert_eq!(hub.monitor.active_alerts().await.unwrap().len(), initial);

    // degrades again; the rules re-fire
    inject_update(&hub, &peer, degraded_update("agent-1")).await;
    hub.monitor.tick_now().await.unwrap();
    assert!(hub.monitor.active_alerts().await.unwrap().len() > initial);
}

#[tokio::test]
async fn unknown_entity_is_lazily_registered() {
    let mut hub = spawn_hub(test_settings(), None).await;
    let peer = accept_peer(&mut hub).await;
    let mut notifications = hub.monitor.notifications();

    // a task completion for an id never seen before
    peer.to_channel
        .send(Frame::new(FrameBody::TaskCompletion {
            entity_id: "agent-9".to_string(),
            task_id: "task-1".to_string(),
            duration_ms: 80.0,
            success: true,
        }))
        .await
        .unwrap();
    await_notification(&mut notifications, |n| {
        matches!(n, Notification::TaskCompletion { entity_id, .. } if entity_id == "agent-9")
    })
    .await;

    let entity = hub.monitor.entity("agent-9").await.unwrap().unwrap();
    assert_eq!(entity.tasks_completed, 1);
    assert_eq!(entity.status, EntityStatus::Operational);

    hub.monitor.tick_now().await.unwrap();
    let summary = await_notification(&mut notifications, |n| {
        matches!(n, Notification::HealthSummary { .. })
    })
    .await;
    match summary {
        Notification::HealthSummary { summary, .. } => assert_eq!(summary.total, 1),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn department_history_feeds_group_summaries() {
    let mut hub = spawn_hub(test_settings(), None).await;
    let peer = accept_peer(&mut hub).await;
    let mut notifications = hub.monitor.notifications();

    inject_update(&hub, &peer, healthy_update("agent-1", "ops")).await;
    inject_update(&hub, &peer, healthy_update("agent-2", "ops")).await;

    for _ in 0..3 {
        hub.monitor.tick_now().await.unwrap();
    }

    let group = await_notification(&mut notifications, |n| {
        matches!(n, Notification::GroupSummary { .. })
    })
    .await;
    match group {
        Notification::GroupSummary { summary, .. } => {
            assert_eq!(summary.department, "ops");
            assert_eq!(summary.members, 2);
            assert_eq!(summary.total_throughput, 20.0);
        }
        _ => unreachable!(),
    }

    let samples = hub
        .monitor
        .history(
            "department:ops",
            Granularity::Hourly,
            chrono::Duration::hours(1),
        )
        .await
        .unwrap();
    assert_eq!(samples.len(), 3);

    // steady metrics classify as a stable trend
    let trend = hub
        .monitor
        .trend("department:ops", Granularity::Hourly)
        .await
        .unwrap();
    assert_eq!(trend, Trend::Stable);
}

#[tokio::test]
async fn threshold_override_applies_on_the_next_tick() {
    let mut hub = spawn_hub(test_settings(), None).await;
    let peer = accept_peer(&mut hub).await;

    inject_update(&hub, &peer, healthy_update("agent-1", "ops")).await;
    hub.monitor.tick_now().await.unwrap();
    assert!(hub.monitor.active_alerts().await.unwrap().is_empty());

    hub.monitor
        .set_thresholds(Thresholds {
            health_score_floor: 99,
            ..Thresholds::default()
        })
        .await
        .unwrap();
    hub.monitor.tick_now().await.unwrap();

    let alerts = hub.monitor.active_alerts().await.unwrap();
    assert!(alerts.iter().any(|a| a.rule == AlertRule::HealthScore));
}

#[tokio::test]
async fn sweep_discards_expired_alert_records() {
    let settings = MonitorSettings {
        // zero retention so freshly raised records expire immediately
        alert_retention: chrono::Duration::zero(),
        ..test_settings()
    };
    let mut hub = spawn_hub(settings, None).await;
    let peer = accept_peer(&mut hub).await;

    inject_update(&hub, &peer, degraded_update("agent-1")).await;
    hub.monitor.tick_now().await.unwrap();
    let raised = hub.monitor.active_alerts().await.unwrap().len();
    assert!(raised > 0);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let removed = hub.monitor.sweep_now().await.unwrap();
    assert_eq!(removed, raised);
    assert!(hub.monitor.active_alerts().await.unwrap().is_empty());
}
