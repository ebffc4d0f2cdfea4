//! Reconnect behavior observed through the public channel API

use std::sync::Arc;
use std::time::Duration;

use fleetwatch::channel::{
    ChannelEvent, ChannelManager, ChannelOptions, ChannelState, Connector, FrameBody,
    InProcessConnector,
};
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::timeout;

fn options() -> ChannelOptions {
    ChannelOptions {
        heartbeat: false,
        base_backoff: Duration::from_millis(10),
        ..ChannelOptions::new("mem://telemetry")
    }
}

async fn next_state(events: &mut tokio::sync::broadcast::Receiver<ChannelEvent>) -> ChannelState {
    timeout(Duration::from_secs(1), async {
        loop {
            if let ChannelEvent::StateChanged { state, .. } = events.recv().await.unwrap() {
                return state;
            }
        }
    })
    .await
    .expect("timed out waiting for state change")
}

#[tokio::test]
async fn state_events_follow_the_connection_lifecycle() {
    let (connector, mut peers) = InProcessConnector::new();
    let mut manager = ChannelManager::new(Arc::clone(&connector) as Arc<dyn Connector>);
    let mut events = manager.events();

    let _handle = manager.connect("telemetry", options()).await;
    assert_eq!(next_state(&mut events).await, ChannelState::Connecting);
    assert_eq!(next_state(&mut events).await, ChannelState::Open);

    // unclean close triggers a reconnect cycle
    let peer = peers.recv().await.unwrap();
    drop(peer);
    assert_eq!(next_state(&mut events).await, ChannelState::Connecting);
    assert_eq!(next_state(&mut events).await, ChannelState::Open);
}

#[tokio::test]
async fn reconnect_restores_the_subscription_set() {
    let (connector, mut peers) = InProcessConnector::new();
    let mut manager = ChannelManager::new(Arc::clone(&connector) as Arc<dyn Connector>);

    let handle = manager.connect("telemetry", options()).await;
    let (tx, _rx) = unbounded_channel();
    handle.subscribe("entity_update", tx.clone()).await.unwrap();
    handle.subscribe("entity_error", tx).await.unwrap();

    // let the first connection see all handshakes, then kill it
    let mut peer = peers.recv().await.unwrap();
    loop {
        let frame = timeout(Duration::from_secs(1), peer.from_channel.recv())
            .await
            .unwrap()
            .unwrap();
        if let FrameBody::Subscribe { subscriptions } = &frame.body {
            if subscriptions.len() == 2 {
                break;
            }
        }
    }
    drop(peer);

    // the replacement connection gets the full set in one handshake
    let mut peer = timeout(Duration::from_secs(1), peers.recv())
        .await
        .expect("expected reconnect")
        .unwrap();
    let frame = timeout(Duration::from_secs(1), peer.from_channel.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        frame.body,
        FrameBody::Subscribe {
            subscriptions: vec!["entity_error".to_string(), "entity_update".to_string()]
        }
    );
}

#[tokio::test]
async fn exhausted_channel_stays_closed_until_explicit_connect() {
    let (connector, mut peers) = InProcessConnector::new();
    connector.fail_next(u32::MAX);
    let mut manager = ChannelManager::new(Arc::clone(&connector) as Arc<dyn Connector>);

    let options = ChannelOptions {
        max_reconnect_attempts: 2,
        ..options()
    };
    let handle = manager.connect("telemetry", options).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // initial attempt plus two scheduled reconnects, then terminal
    assert_eq!(connector.attempts(), 3);
    assert_eq!(handle.state().await.unwrap(), ChannelState::Closed);

    connector.fail_next(0);
    handle.reconnect().await.unwrap();
    let peer = timeout(Duration::from_secs(1), peers.recv())
        .await
        .expect("explicit connect should produce a connection")
        .unwrap();
    assert_eq!(peer.url, "mem://telemetry");
}

#[tokio::test]
async fn disconnected_channel_is_removed_from_the_manager() {
    let (connector, mut peers) = InProcessConnector::new();
    let mut manager = ChannelManager::new(Arc::clone(&connector) as Arc<dyn Connector>);

    manager.connect("telemetry", options()).await;
    let _peer = peers.recv().await.unwrap();
    assert_eq!(manager.channel_ids(), vec!["telemetry".to_string()]);

    manager.disconnect("telemetry").await;
    assert!(manager.channel("telemetry").is_none());
    assert!(manager.channel_ids().is_empty());

    // no reconnection attempts after an intentional close
    let attempts = connector.attempts();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.attempts(), attempts);
}
