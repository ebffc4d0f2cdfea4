//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use fleetwatch::EntityStatus;
use fleetwatch::actors::{MonitorHandle, MonitorSettings};
use fleetwatch::bus::Notification;
use fleetwatch::channel::{
    ChannelManager, ChannelOptions, Connector, EntityUpdate, Frame, FrameBody, InProcessConnector,
    InProcessPeer,
};
use fleetwatch::upstream::EnterpriseApi;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

/// In-process hub: channel manager plus monitor, wired over the loopback
/// transport.
pub struct TestHub {
    pub manager: ChannelManager,
    pub peers: mpsc::UnboundedReceiver<InProcessPeer>,
    pub connector: Arc<InProcessConnector>,
    pub monitor: MonitorHandle,
}

/// Long intervals so only the explicit tick/sweep hooks drive the monitor.
pub fn test_settings() -> MonitorSettings {
    MonitorSettings {
        tick_interval: Duration::from_secs(3600),
        sweep_interval: Duration::from_secs(3600),
        ..MonitorSettings::default()
    }
}

pub fn test_channel_options() -> ChannelOptions {
    ChannelOptions {
        heartbeat: false,
        base_backoff: Duration::from_millis(10),
        ..ChannelOptions::new("mem://hub")
    }
}

pub async fn spawn_hub(
    settings: MonitorSettings,
    upstream: Option<Arc<dyn EnterpriseApi>>,
) -> TestHub {
    let (connector, peers) = InProcessConnector::new();
    let mut manager = ChannelManager::new(Arc::clone(&connector) as Arc<dyn Connector>);
    let events = manager.events();

    let channel = manager.connect("hub", test_channel_options()).await;
    let monitor = MonitorHandle::spawn(settings, channel, events, upstream);

    TestHub {
        manager,
        peers,
        connector,
        monitor,
    }
}

pub async fn recv_frame(peer: &mut InProcessPeer) -> Frame {
    timeout(Duration::from_secs(1), peer.from_channel.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("peer closed")
}

/// Accept the next connection and drain handshakes until the monitor's
/// three telemetry subscriptions are all registered.
pub async fn accept_peer(hub: &mut TestHub) -> InProcessPeer {
    let mut peer = timeout(Duration::from_secs(1), hub.peers.recv())
        .await
        .expect("timed out waiting for connection")
        .unwrap();
    drain_handshakes(&mut peer).await;
    peer
}

pub async fn drain_handshakes(peer: &mut InProcessPeer) {
    loop {
        let frame = recv_frame(peer).await;
        if let FrameBody::Subscribe { subscriptions } = &frame.body {
            if subscriptions.len() == 3 {
                return;
            }
        }
    }
}

/// A healthy entity update with metrics and a department tag.
pub fn healthy_update(entity_id: &str, department: &str) -> Frame {
    Frame::new(FrameBody::EntityUpdate(EntityUpdate {
        entity_id: entity_id.to_string(),
        status: Some(EntityStatus::Active),
        response_time_ms: Some(300.0),
        error_rate: Some(0.5),
        throughput: Some(10.0),
        department: Some(department.to_string()),
        ..Default::default()
    }))
}

/// An update that fails the error-rate rule and sinks the health score.
pub fn degraded_update(entity_id: &str) -> Frame {
    Frame::new(FrameBody::EntityUpdate(EntityUpdate {
        entity_id: entity_id.to_string(),
        status: Some(EntityStatus::Error),
        error_rate: Some(50.0),
        ..Default::default()
    }))
}

pub async fn await_notification(
    rx: &mut broadcast::Receiver<Notification>,
    matches: impl Fn(&Notification) -> bool,
) -> Notification {
    timeout(Duration::from_secs(1), async {
        loop {
            let notification = rx.recv().await.expect("notification bus closed");
            if matches(&notification) {
                return notification;
            }
        }
    })
    .await
    .expect("timed out waiting for notification")
}

/// Inject an update and wait until the monitor has applied it.
pub async fn inject_update(hub: &TestHub, peer: &InProcessPeer, frame: Frame) {
    let entity_id = match &frame.body {
        FrameBody::EntityUpdate(update) => update.entity_id.clone(),
        other => panic!("not an entity update: {other:?}"),
    };

    let mut notifications = hub.monitor.notifications();
    peer.to_channel.send(frame).await.unwrap();
    await_notification(&mut notifications, |n| {
        matches!(n, Notification::EntityUpdate { entity_id: id, .. } if *id == entity_id)
    })
    .await;
}
