//! Driver tests against the in-memory device link
//!
//! All tests run on paused time, so reconnect delays and heartbeats elapse instantly while
//! keeping their relative order.

use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};

use super::*;
use crate::channel::ChannelBinding;
use crate::config::ClientConfig;
use crate::events::{ClientEvent, EventStream};
use crate::test_utils::{DeviceSocket, ManualPlayback, MockDevice, RecordingSink, frame_bytes, mock_link};
use crate::transport::WireMessage;
use crate::types::{ChannelId, ControlMessage, RequestKind};

const URL: &str = "ws://device.local:4567";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn client_with(config: ClientConfig) -> (TransportClient, EventStream, MockDevice) {
    init_tracing();
    let (connector, device) = mock_link();
    let (client, events) = TransportClient::with_connector(config, connector).unwrap();
    (client, events, device)
}

fn client() -> (TransportClient, EventStream, MockDevice) {
    client_with(ClientConfig::default())
}

/// Next event that is not periodic metrics output
async fn next_event(events: &mut EventStream) -> ClientEvent {
    timeout(Duration::from_secs(120), async {
        loop {
            match events.next().await {
                Some(ClientEvent::ChannelStats(_) | ClientEvent::OverlayExpired { .. }) => continue,
                Some(event) => return event,
                None => panic!("Event stream ended"),
            }
        }
    })
    .await
    .expect("Timed out waiting for an event")
}

/// Assert no non-metrics event arrives within `window`
async fn assert_quiet(events: &mut EventStream, window: Duration) {
    let result = timeout(window, next_event(events)).await;
    assert!(result.is_err(), "Unexpected event: {:?}", result);
}

async fn open(client: &TransportClient, events: &mut EventStream, device: &mut MockDevice) -> DeviceSocket {
    client.connect(URL).unwrap();
    let socket = device.next_socket().await.unwrap();
    assert_eq!(next_event(events).await, ClientEvent::Opened);
    socket
}

#[tokio::test(start_paused = true)]
async fn open_publishes_state_and_sends_heartbeats() {
    let (client, mut events, mut device) = client();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let mut socket = open(&client, &mut events, &mut device).await;
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(device.urls(), vec![URL.to_string()]);

    let start = Instant::now();
    assert_eq!(socket.next_json().await, Some(json!({"kind": 0})));
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert_eq!(socket.next_json().await, Some(json!({"kind": 0})));
    assert!(start.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn connect_is_a_no_op_while_connected() {
    let (client, mut events, mut device) = client();
    let _socket = open(&client, &mut events, &mut device).await;

    client.connect(URL).unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(device.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejects_non_websocket_urls() {
    let (client, _events, device) = client();
    assert!(matches!(client.connect("http://device:80"), Err(crate::ConsoleError::Config { .. })));
    assert!(matches!(client.connect_configured(), Err(crate::ConsoleError::Config { .. })));
    assert_eq!(device.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn send_before_open_is_retried_until_open() {
    let (client, mut events, mut device) = client();
    client.send_request(RequestKind::GetConfig, None).unwrap();

    sleep(Duration::from_secs(1)).await;
    let mut socket = open(&client, &mut events, &mut device).await;

    assert_eq!(socket.next_json().await, Some(json!({"kind": 7})));
}

#[tokio::test(start_paused = true)]
async fn send_while_open_is_written_immediately() {
    let (client, mut events, mut device) = client();
    let mut socket = open(&client, &mut events, &mut device).await;

    client.send(ControlMessage::request(RequestKind::SetBitrate, Some(json!(4096)))).unwrap();
    let start = Instant::now();
    assert_eq!(socket.next_json().await, Some(json!({"kind": 6, "param": 4096})));
    assert!(start.elapsed() < Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn reconnect_budget_then_link_lost() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;

    device.refuse_connections();
    drop(socket);

    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected { error: None });
    for attempt in 1..=3 {
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::Reconnecting { attempt, max_attempts: 3 }
        );
    }
    assert_eq!(next_event(&mut events).await, ClientEvent::LinkLost { attempts: 3 });
    assert_eq!(device.attempts(), 4);

    assert_quiet(&mut events, Duration::from_secs(30)).await;
    assert_eq!(device.attempts(), 4);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn reconnect_waits_for_the_backoff() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;
    drop(socket);

    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected { .. }));
    let start = Instant::now();
    assert_eq!(next_event(&mut events).await, ClientEvent::Reconnecting { attempt: 1, max_attempts: 3 });

    let _socket = device.next_socket().await.unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::Opened);
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(device.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_after_link_lost_restores_the_budget() {
    let mut config = ClientConfig::default();
    config.connection.reconnect_attempts = 1;
    let (client, mut events, mut device) = client_with(config);
    let socket = open(&client, &mut events, &mut device).await;

    device.refuse_connections();
    drop(socket);
    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected { .. }));
    assert!(matches!(next_event(&mut events).await, ClientEvent::Reconnecting { attempt: 1, .. }));
    assert_eq!(next_event(&mut events).await, ClientEvent::LinkLost { attempts: 1 });

    device.accept_connections();
    let socket = open(&client, &mut events, &mut device).await;
    drop(socket);
    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected { .. }));
    assert_eq!(next_event(&mut events).await, ClientEvent::Reconnecting { attempt: 1, max_attempts: 1 });
}

#[tokio::test(start_paused = true)]
async fn superseded_session_does_not_reconnect() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;

    socket.send_json(json!({"kind": 99}));
    assert_eq!(next_event(&mut events).await, ClientEvent::Superseded);

    drop(socket);
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected { error: None });
    assert_quiet(&mut events, Duration::from_secs(30)).await;
    assert_eq!(device.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_disconnect_notice_moves_to_closing_then_reconnects() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;
    let mut states = client.state_updates();
    assert_eq!(states.next().await, Some(ConnectionState::Open));

    socket.send_json(json!({"kind": 110}));
    socket.send_json(json!({"kind": 5, "time": 1700000000}));

    assert_eq!(states.next().await, Some(ConnectionState::Closing));
    // the notice itself is not dispatched
    match next_event(&mut events).await {
        ClientEvent::Message(message) => assert_eq!(message.kind(), Some(5)),
        other => panic!("Expected message, got {other:?}"),
    }

    drop(socket);
    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected { .. }));
    assert_eq!(next_event(&mut events).await, ClientEvent::Reconnecting { attempt: 1, max_attempts: 3 });
}

#[tokio::test(start_paused = true)]
async fn unclosed_socket_after_disconnect_notice_is_released() {
    let mut config = ClientConfig::default();
    config.connection.idle_timeout_ms = Some(15_000);
    let (client, mut events, mut device) = client_with(config);
    let mut socket = open(&client, &mut events, &mut device).await;
    let start = Instant::now();

    socket.send_json(json!({"kind": 110}));
    match next_event(&mut events).await {
        ClientEvent::Disconnected { error: Some(error) } => {
            assert!(error.contains("announced its disconnect"));
        }
        other => panic!("Expected disconnect after the grace period, got {other:?}"),
    }
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert_eq!(next_event(&mut events).await, ClientEvent::Reconnecting { attempt: 1, max_attempts: 3 });
    assert_eq!(socket.next_message().await, None);

    let _socket = device.next_socket().await.unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::Opened);
    assert_eq!(device.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_first_connect_abandons_held_sends() {
    let (client, mut events, mut device) = client();
    device.refuse_connections();
    client.send(ControlMessage::request(RequestKind::SetBitrate, Some(json!(1024)))).unwrap();
    client.connect(URL).unwrap();

    sleep(Duration::from_secs(30)).await;
    assert_eq!(device.attempts(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // held while idle, written once the next connect opens
    client.send_request(RequestKind::GetConfig, None).unwrap();
    sleep(Duration::from_secs(1)).await;
    device.accept_connections();
    let mut socket = open(&client, &mut events, &mut device).await;
    assert_eq!(socket.next_json().await, Some(json!({"kind": 7})));
    assert_eq!(socket.next_json().await, Some(json!({"kind": 0})));
}

#[tokio::test(start_paused = true)]
async fn user_close_is_terminal() {
    let (client, mut events, mut device) = client();
    let mut socket = open(&client, &mut events, &mut device).await;

    client.close().unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected { error: None });
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(socket.next_message().await, Some(WireMessage::Close));

    assert_quiet(&mut events, Duration::from_secs(30)).await;
    assert_eq!(device.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn sends_after_close_are_dropped() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;
    client.close().unwrap();
    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected { .. }));
    drop(socket);

    client.send_request(RequestKind::Snapshot, None).unwrap();
    sleep(Duration::from_secs(1)).await;

    let mut socket = open(&client, &mut events, &mut device).await;
    // only heartbeats follow: the snapshot request was abandoned
    assert_eq!(socket.next_json().await, Some(json!({"kind": 0})));
}

#[tokio::test(start_paused = true)]
async fn malformed_text_is_dropped() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;

    socket.send_text("not json at all");
    socket.send_text("[1, 2, 3]");
    socket.send_json(json!({"kind": 7, "param": {"channels": 4}}));

    match next_event(&mut events).await {
        ClientEvent::Message(message) => {
            assert_eq!(message.kind(), Some(7));
            assert_eq!(message.body()["param"]["channels"], 4);
        }
        other => panic!("Expected message, got {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn transport_error_surfaces_in_disconnect() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;

    socket.fail("connection reset by peer");
    match next_event(&mut events).await {
        ClientEvent::Disconnected { error: Some(error) } => {
            assert!(error.contains("connection reset by peer"))
        }
        other => panic!("Expected disconnect with error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn binary_frames_reach_the_channel_sink() {
    let (client, mut events, mut device) = client();
    let mut socket = open(&client, &mut events, &mut device).await;

    let sink = RecordingSink::default();
    client
        .start_stream(vec![ChannelBinding::new(
            ChannelId::new(2),
            sink.clone(),
            ManualPlayback::new(0.0, None),
        )])
        .unwrap();
    assert_eq!(socket.next_json().await, Some(json!({"kind": 3, "param": 1})));

    let payload = [0x00, 0x00, 0x00, 0x01, 0x67, 0x42];
    socket.send_binary(frame_bytes(2, 123_456_789, &payload));
    socket.send_binary(frame_bytes(2, 123_500_000, &payload));
    socket.send_binary(bytes::Bytes::from_static(&[1, 2, 3]));
    socket.send_json(json!({"kind": 5}));

    // text after the frames: once it is dispatched the frames have been routed
    assert!(matches!(next_event(&mut events).await, ClientEvent::Message(_)));
    assert_eq!(client.channel_epoch(ChannelId::new(2)), Some(123_456_789));
    assert_eq!(sink.payloads().len(), 2);
    assert_eq!(sink.payloads()[0].as_ref(), &payload);
}

#[tokio::test(start_paused = true)]
async fn algorithm_results_are_aligned_to_the_playhead() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;

    let playback = ManualPlayback::new(0.0, Some(0.0));
    client
        .start_stream(vec![ChannelBinding::new(ChannelId::new(1), RecordingSink::default(), playback)])
        .unwrap();
    socket.send_binary(frame_bytes(1, 1_000_000, &[0; 64]));
    socket.send_json(json!({
        "kind": 10,
        "pipeline": 1,
        "timestamp": 1_000_000,
        "classification_result": "person"
    }));

    let mut seen = Vec::new();
    for _ in 0..2 {
        seen.push(next_event(&mut events).await);
    }
    assert!(seen.iter().any(|e| matches!(e, ClientEvent::Message(m) if m.kind() == Some(10))));
    assert!(seen.contains(&ClientEvent::Classification {
        channel: ChannelId::new(1),
        timestamp: 1_000_000,
        text: "person".into(),
    }));
}

#[tokio::test(start_paused = true)]
async fn fcos_detections_are_aligned_to_the_playhead() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;

    let playback = ManualPlayback::new(0.0, Some(0.0));
    client
        .start_stream(vec![ChannelBinding::new(ChannelId::new(0), RecordingSink::default(), playback)])
        .unwrap();
    socket.send_binary(frame_bytes(0, 2_000_000, &[0; 64]));
    socket.send_text(
        r#"{"kind":10,"pipeline":0,"timestamp":2000000,"detection_result":[{"bbox":[12.000000,30.000000,200.500000,310.000000],"prob":0.873210,"label":0,"class_name":"person"}]}"#,
    );

    let mut boxes = None;
    for _ in 0..2 {
        if let ClientEvent::Detections { channel, timestamp, boxes: found } = next_event(&mut events).await {
            assert_eq!(channel, ChannelId::new(0));
            assert_eq!(timestamp, 2_000_000);
            boxes = Some(found);
        }
    }
    let boxes = boxes.expect("no detections emitted");
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].label, "person");
    assert_eq!(boxes[0].class_id, Some(0));
}

#[tokio::test(start_paused = true)]
async fn results_for_inactive_channels_are_still_dispatched() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;

    socket.send_json(json!({
        "kind": 10,
        "pipeline": 3,
        "timestamp": 42,
        "detection_result": [{"bbox": [1.0, 2.0, 3.0, 4.0], "name": "car", "score": 0.9}]
    }));
    assert!(matches!(next_event(&mut events).await, ClientEvent::Message(_)));
    assert_quiet(&mut events, Duration::from_secs(2)).await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_tears_down_every_channel() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;

    let sinks = [RecordingSink::default(), RecordingSink::default()];
    client
        .start_stream(
            sinks
                .iter()
                .enumerate()
                .map(|(i, sink)| {
                    ChannelBinding::new(ChannelId::new(i as u32), sink.clone(), ManualPlayback::new(0.0, None))
                })
                .collect(),
        )
        .unwrap();
    assert_eq!(client.active_channels().len(), 2);

    drop(socket);
    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected { .. }));
    assert!(client.active_channels().is_empty());
    assert!(sinks.iter().all(RecordingSink::destroyed));
}

#[tokio::test(start_paused = true)]
async fn stop_stream_releases_synchronously() {
    let (client, mut events, mut device) = client();
    let mut socket = open(&client, &mut events, &mut device).await;

    let sink = RecordingSink::default();
    client
        .start_stream(vec![ChannelBinding::new(ChannelId::new(4), sink.clone(), ManualPlayback::new(0.0, None))])
        .unwrap();
    socket.send_binary(frame_bytes(4, 99, &[0; 8]));
    socket.send_json(json!({"kind": 5}));
    assert!(matches!(next_event(&mut events).await, ClientEvent::Message(_)));
    assert_eq!(client.channel_epoch(ChannelId::new(4)), Some(99));

    client.stop_stream(&[ChannelId::new(4)]).unwrap();
    assert!(sink.destroyed());
    assert_eq!(client.channel_epoch(ChannelId::new(4)), None);

    assert_eq!(socket.next_json().await, Some(json!({"kind": 3, "param": 1})));
    assert_eq!(socket.next_json().await, Some(json!({"kind": 4, "param": 1})));
}

#[tokio::test(start_paused = true)]
async fn metrics_report_counts_and_expire_overlays() {
    let (client, mut events, mut device) = client();
    let socket = open(&client, &mut events, &mut device).await;

    client
        .start_stream(vec![ChannelBinding::new(ChannelId::new(0), RecordingSink::default(), ManualPlayback::new(0.0, None))])
        .unwrap();
    socket.send_binary(frame_bytes(0, 10, &[0; 20]));
    socket.send_binary(frame_bytes(0, 20, &[0; 200]));
    socket.send_binary(frame_bytes(0, 30, &[0; 200]));

    let stats = loop {
        match events.next().await {
            Some(ClientEvent::ChannelStats(stats)) => break stats,
            Some(_) => continue,
            None => panic!("Event stream ended"),
        }
    };
    assert_eq!(stats.channel, ChannelId::new(0));
    assert_eq!(stats.frames_played, 2);
    assert_eq!(stats.results_received, 0);
    assert_eq!(events.next().await, Some(ClientEvent::OverlayExpired { channel: ChannelId::new(0) }));
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_declares_the_socket_dead() {
    let mut config = ClientConfig::default();
    config.connection.idle_timeout_ms = Some(8_000);
    let (client, mut events, mut device) = client_with(config);
    let _socket = open(&client, &mut events, &mut device).await;
    let start = Instant::now();

    match next_event(&mut events).await {
        ClientEvent::Disconnected { error: Some(error) } => {
            assert!(error.contains("No inbound traffic"));
        }
        other => panic!("Expected idle disconnect, got {other:?}"),
    }
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(next_event(&mut events).await, ClientEvent::Reconnecting { attempt: 1, max_attempts: 3 });
}

#[tokio::test(start_paused = true)]
async fn dropping_the_client_ends_the_event_stream() {
    let (client, mut events, mut device) = client();
    let mut socket = open(&client, &mut events, &mut device).await;

    drop(client);
    timeout(Duration::from_secs(5), async { while events.next().await.is_some() {} })
        .await
        .expect("Event stream did not end");
    assert_eq!(socket.next_message().await, None);
}
