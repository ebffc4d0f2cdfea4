//! Upstream API degradation and recovery

use std::sync::Arc;

use fleetwatch::alerting::AlertRule;
use fleetwatch::upstream::{EnterpriseApi, HttpEnterpriseApi};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn empty_snapshot() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "entities": [] }))
}

fn api(server: &MockServer) -> Arc<dyn EnterpriseApi> {
    Arc::new(HttpEnterpriseApi::new(server.uri(), None))
}

#[tokio::test]
async fn tick_persists_entity_state_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/entities"))
        .respond_with(empty_snapshot())
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/entities/agent-1/status"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut hub = spawn_hub(test_settings(), Some(api(&server))).await;
    let peer = accept_peer(&mut hub).await;

    inject_update(&hub, &peer, healthy_update("agent-1", "ops")).await;
    hub.monitor.tick_now().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let persisted = requests
        .iter()
        .filter(|r| r.method.to_string() == "PUT")
        .count();
    assert_eq!(persisted, 1);

    // and no synthetic alert, the push succeeded
    assert!(hub.monitor.active_alerts().await.unwrap().is_empty());
}

#[tokio::test]
async fn status_transitions_are_logged_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/entities"))
        .respond_with(empty_snapshot())
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/logs"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let mut hub = spawn_hub(test_settings(), Some(api(&server))).await;
    let peer = accept_peer(&mut hub).await;

    inject_update(&hub, &peer, degraded_update("agent-1")).await;
    hub.monitor.tick_now().await.unwrap();
    hub.monitor.tick_now().await.unwrap();

    // the flip to error is logged on the first tick only; the second
    // tick classifies the same status and stays quiet
    let requests = server.received_requests().await.unwrap();
    let activity = requests
        .iter()
        .filter(|r| r.url.path() == "/api/v1/logs")
        .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
        .filter(|record| record["kind"] == "activity")
        .collect::<Vec<_>>();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0]["entity_id"], "agent-1");
}

#[tokio::test]
async fn upstream_outage_degrades_to_one_synthetic_alert() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/entities"))
        .respond_with(empty_snapshot())
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/entities/agent-1/status"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut hub = spawn_hub(test_settings(), Some(api(&server))).await;
    let peer = accept_peer(&mut hub).await;

    inject_update(&hub, &peer, healthy_update("agent-1", "ops")).await;
    hub.monitor.tick_now().await.unwrap();
    hub.monitor.tick_now().await.unwrap();

    // persistent outage, exactly one open synthetic alert
    let upstream: Vec<_> = hub
        .monitor
        .active_alerts()
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.rule == AlertRule::Upstream)
        .collect();
    assert_eq!(upstream.len(), 1);
    assert_eq!(upstream[0].entity_id, "enterprise-api");
}

#[tokio::test]
async fn upstream_recovery_resolves_and_allows_refire() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/entities"))
        .respond_with(empty_snapshot())
        .mount(&server)
        .await;
    // fail once, succeed once, then fail for good
    Mock::given(method("PUT"))
        .and(path("/api/v1/entities/agent-1/status"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/entities/agent-1/status"))
        .respond_with(ResponseTemplate::new(204))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/entities/agent-1/status"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut hub = spawn_hub(test_settings(), Some(api(&server))).await;
    let peer = accept_peer(&mut hub).await;
    inject_update(&hub, &peer, healthy_update("agent-1", "ops")).await;

    hub.monitor.tick_now().await.unwrap(); // outage, alert raised
    hub.monitor.tick_now().await.unwrap(); // recovered, key resolved
    hub.monitor.tick_now().await.unwrap(); // outage again, re-fires

    let upstream: Vec<_> = hub
        .monitor
        .active_alerts()
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.rule == AlertRule::Upstream)
        .collect();
    assert_eq!(upstream.len(), 2);
}

#[tokio::test]
async fn seed_failure_does_not_stop_telemetry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/entities"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut hub = spawn_hub(test_settings(), Some(api(&server))).await;
    let peer = accept_peer(&mut hub).await;

    // the failed snapshot shows up as a critical synthetic alert
    let alerts = hub.monitor.active_alerts().await.unwrap();
    assert!(alerts.iter().any(|a| a.rule == AlertRule::Upstream));

    // live telemetry still builds up the registry from scratch
    inject_update(&hub, &peer, healthy_update("agent-1", "ops")).await;
    let entities = hub.monitor.entities().await.unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].id, "agent-1");
}
