//! Outbound command dispatch and the offline queue

use std::time::Duration;

use fleetwatch::actors::{AgentCommand, Dispatch, MonitorSettings};
use fleetwatch::channel::FrameBody;
use tokio::time::timeout;

use crate::helpers::*;

fn restart(entity_id: &str) -> AgentCommand {
    AgentCommand::Restart {
        entity_id: entity_id.to_string(),
    }
}

#[tokio::test]
async fn broadcast_command_reaches_the_wire() {
    let mut hub = spawn_hub(test_settings(), None).await;
    let mut peer = accept_peer(&mut hub).await;

    let receipt = hub
        .monitor
        .dispatch(AgentCommand::Broadcast {
            department: "ops".to_string(),
            message: "maintenance window at 14:00".to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(receipt, Dispatch::Sent { .. }));

    let frame = recv_frame(&mut peer).await;
    match frame.body {
        FrameBody::Broadcast {
            message_id,
            department,
            message,
        } => {
            assert_eq!(message_id, receipt.message_id());
            assert_eq!(department, "ops");
            assert_eq!(message, "maintenance window at 14:00");
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn queued_commands_flush_in_fifo_order() {
    let mut hub = spawn_hub(test_settings(), None).await;
    let peer = accept_peer(&mut hub).await;

    // hold the channel down until every command is enqueued
    hub.connector.fail_next(u32::MAX);
    drop(peer);
    tokio::time::sleep(Duration::from_millis(5)).await;

    for id in ["agent-1", "agent-2", "agent-3"] {
        let receipt = hub.monitor.dispatch(restart(id)).await.unwrap();
        assert!(matches!(receipt, Dispatch::Queued { .. }), "{id}");
    }
    hub.connector.fail_next(0);

    // reconnect; handshake first, then the queue in dispatch order
    let mut peer = timeout(Duration::from_secs(1), hub.peers.recv())
        .await
        .expect("expected reconnect")
        .unwrap();

    let mut restarted = vec![];
    while restarted.len() < 3 {
        let frame = recv_frame(&mut peer).await;
        if let FrameBody::Restart { entity_id, .. } = frame.body {
            restarted.push(entity_id);
        }
    }
    assert_eq!(restarted, vec!["agent-1", "agent-2", "agent-3"]);
}

#[tokio::test]
async fn queue_overflow_drops_the_oldest_command() {
    let settings = MonitorSettings {
        command_queue_capacity: 2,
        ..test_settings()
    };
    let mut hub = spawn_hub(settings, None).await;
    let peer = accept_peer(&mut hub).await;

    hub.connector.fail_next(u32::MAX);
    drop(peer);
    tokio::time::sleep(Duration::from_millis(5)).await;

    for id in ["agent-1", "agent-2", "agent-3"] {
        hub.monitor.dispatch(restart(id)).await.unwrap();
    }
    hub.connector.fail_next(0);

    let mut peer = timeout(Duration::from_secs(1), hub.peers.recv())
        .await
        .expect("expected reconnect")
        .unwrap();

    let mut restarted = vec![];
    loop {
        let frame = recv_frame(&mut peer).await;
        if let FrameBody::Restart { entity_id, .. } = frame.body {
            restarted.push(entity_id);
            if restarted.len() == 2 {
                break;
            }
        }
    }
    // agent-1 was dropped when the third command arrived
    assert_eq!(restarted, vec!["agent-2", "agent-3"]);
}

#[tokio::test]
async fn dispatch_keeps_working_after_reconnect() {
    let mut hub = spawn_hub(test_settings(), None).await;
    let peer = accept_peer(&mut hub).await;

    drop(peer);
    let mut peer = accept_peer(&mut hub).await;

    let receipt = hub.monitor.dispatch(restart("agent-1")).await.unwrap();
    assert!(matches!(receipt, Dispatch::Sent { .. }));

    let frame = recv_frame(&mut peer).await;
    assert!(matches!(frame.body, FrameBody::Restart { .. }));
}
