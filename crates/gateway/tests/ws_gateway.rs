//! End-to-end tests: a real listener, real WebSocket peers.

use std::{sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    serde_json::json,
    tokio::{net::TcpStream, sync::mpsc},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{Error as WsError, Message},
    },
};

use {
    mcbridge_config::{GatewayConfig, OneOrMany},
    mcbridge_gateway::{
        ConnectionRegistry, GatewayError, HandlerRegistry, InboundEvent, RunningGateway,
        register_event_forwarding, start_gateway,
    },
    mcbridge_protocol::Envelope,
};

type Peer = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start() -> (RunningGateway, mpsc::Receiver<InboundEvent>) {
    start_with_heartbeat(0.0).await
}

async fn start_with_heartbeat(
    ws_heartbeat_sec: f64,
) -> (RunningGateway, mpsc::Receiver<InboundEvent>) {
    let config = GatewayConfig {
        listen_host: "127.0.0.1".into(),
        listen_port: 0,
        server_ids: OneOrMany::Many(vec!["survival".into(), "lobby".into()]),
        tokens: OneOrMany::Many(vec!["s3cret".into(), "l0bby".into()]),
        ws_heartbeat_sec,
        request_timeout_sec: 2.0,
        ..GatewayConfig::default()
    };
    let (tx, rx) = mpsc::channel(16);
    let mut handlers = HandlerRegistry::new();
    register_event_forwarding(&mut handlers, tx).unwrap();
    let running = start_gateway(&config, Arc::new(ConnectionRegistry::new()), handlers)
        .await
        .unwrap();
    (running, rx)
}

fn url(running: &RunningGateway, query: &str) -> String {
    format!("ws://{}/mc{query}", running.local_addr)
}

async fn connect(running: &RunningGateway, server_id: &str, token: &str) -> Peer {
    let (mut ws, _) = connect_async(url(running, &format!("?serverId={server_id}&token={token}")))
        .await
        .unwrap();
    let ack = next_envelope(&mut ws).await;
    assert_eq!(ack.message_type, "CONNECTION_ACK");
    assert_eq!(ack.payload["serverId"], server_id);
    ws
}

async fn next_message(ws: &mut Peer) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_envelope(ws: &mut Peer) -> Envelope {
    match next_message(ws).await {
        Message::Text(text) => Envelope::decode(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn send(ws: &mut Peer, envelope: &Envelope) {
    ws.send(Message::Text(envelope.encode().unwrap().into()))
        .await
        .unwrap();
}

async fn wait_until_connected(running: &RunningGateway, expected: &[&str]) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while running.gateway.list_connected_server_ids().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry never reached expected state");
}

fn rejection(err: WsError) -> (u16, String) {
    match err {
        WsError::Http(resp) => {
            let body = resp
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            (resp.status().as_u16(), body)
        },
        other => panic!("expected http rejection, got {other}"),
    }
}

// ── Handshake ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_credentials_get_401() {
    let (running, _events) = start().await;
    let err = connect_async(url(&running, "?serverId=survival"))
        .await
        .unwrap_err();
    assert_eq!(rejection(err), (401, "missing serverId/token".to_string()));
    assert!(running.gateway.list_connected_server_ids().await.is_empty());
}

#[tokio::test]
async fn wrong_token_and_unknown_server_get_403() {
    let (running, _events) = start().await;
    for query in [
        "?serverId=survival&token=nope",
        "?serverId=creative&token=s3cret",
    ] {
        let err = connect_async(url(&running, query)).await.unwrap_err();
        assert_eq!(rejection(err), (403, "invalid token".to_string()));
    }
}

#[tokio::test]
async fn other_paths_get_404() {
    let (running, _events) = start().await;
    let err = connect_async(format!(
        "ws://{}/elsewhere?serverId=survival&token=s3cret",
        running.local_addr
    ))
    .await
    .unwrap_err();
    assert_eq!(rejection(err), (404, "not found".to_string()));
}

#[tokio::test]
async fn health_reports_connected_servers() {
    let (running, _events) = start().await;
    let _peer = connect(&running, "survival", "s3cret").await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/health", running.local_addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["servers"], json!(["survival"]));
}

// ── Heartbeat & dispatch ─────────────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_is_acknowledged() {
    let (running, _events) = start().await;
    let mut peer = connect(&running, "survival", "s3cret").await;

    let mut ping = Envelope::new("HEARTBEAT", json!({}));
    ping.id = "hb-1".into();
    send(&mut peer, &ping).await;

    let ack = next_envelope(&mut peer).await;
    assert_eq!(ack.message_type, "HEARTBEAT_ACK");
    assert_eq!(ack.id, "hb-1");
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let (running, _events) = start().await;
    let mut peer = connect(&running, "survival", "s3cret").await;

    peer.send(Message::Text("{not json".into())).await.unwrap();
    send(&mut peer, &Envelope::new("HEARTBEAT", json!({}))).await;
    assert_eq!(next_envelope(&mut peer).await.message_type, "HEARTBEAT_ACK");
    assert_eq!(running.gateway.list_connected_server_ids().await, vec!["survival"]);
}

#[tokio::test]
async fn chat_forward_becomes_event() {
    let (running, mut events) = start().await;
    let mut peer = connect(&running, "lobby", "l0bby").await;

    let mut forward = Envelope::new("MESSAGE_FORWARD", json!({"content": "hi there"}));
    forward.source = Some(json!({"player": {"name": "Steve"}}));
    send(&mut peer, &forward).await;

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, InboundEvent::Chat {
        server_id: "lobby".into(),
        message_id: forward.id.clone(),
        player_name: "Steve".into(),
        content: "hi there".into(),
    });
}

// ── Transport keepalive ──────────────────────────────────────────────────────

#[tokio::test]
async fn peer_is_pinged_every_interval() {
    let (running, _events) = start_with_heartbeat(0.1).await;
    let mut peer = connect(&running, "survival", "s3cret").await;

    let mut pings = 0;
    tokio::time::timeout(Duration::from_secs(5), async {
        while pings < 2 {
            match peer.next().await {
                Some(Ok(Message::Ping(_))) => pings += 1,
                Some(Ok(_)) => {},
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no pings received");
    // Reading answers every ping with a pong, so the peer stays registered.
    assert_eq!(running.gateway.list_connected_server_ids().await, vec!["survival"]);
}

#[tokio::test]
async fn silent_peer_is_closed_as_half_open() {
    let (running, _events) = start_with_heartbeat(0.1).await;
    let _silent = connect(&running, "survival", "s3cret").await;
    let _other = connect(&running, "lobby", "l0bby").await;

    let gateway = running.gateway.clone();
    let call = tokio::spawn(async move {
        gateway
            .send_request("survival", "X_REQUEST", json!({}), Duration::from_secs(30))
            .await
    });

    // `_silent` is never polled again: no pongs, no frames.
    let err = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .expect("half-open peer was never closed")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, GatewayError::ConnectionLost { .. }));
    wait_until_connected(&running, &["lobby"]).await;
}

#[tokio::test]
async fn no_pings_when_keepalive_is_off() {
    for heartbeat in [0.0, -1.0, 1e-12] {
        let (running, _events) = start_with_heartbeat(heartbeat).await;
        let mut peer = connect(&running, "survival", "s3cret").await;

        let quiet = tokio::time::timeout(Duration::from_millis(400), peer.next()).await;
        assert!(quiet.is_err(), "unexpected frame with heartbeat {heartbeat}: {quiet:?}");
    }
}

#[tokio::test]
async fn sub_nanosecond_heartbeat_still_serves_the_peer() {
    let (running, _events) = start_with_heartbeat(1e-12).await;
    let mut peer = connect(&running, "survival", "s3cret").await;

    let mut ping = Envelope::new("HEARTBEAT", json!({}));
    ping.id = "h1".into();
    send(&mut peer, &ping).await;
    assert_eq!(next_envelope(&mut peer).await.id, "h1");
    assert_eq!(running.gateway.list_connected_server_ids().await, vec!["survival"]);
}

// ── Request / reply ──────────────────────────────────────────────────────────

#[tokio::test]
async fn request_resolves_with_peer_reply() {
    let (running, _events) = start().await;
    let mut peer = connect(&running, "survival", "s3cret").await;

    let gateway = running.gateway.clone();
    let call = tokio::spawn(async move { gateway.query_playtime("survival", "u-1").await });

    let request = next_envelope(&mut peer).await;
    assert_eq!(request.message_type, "PLAYTIME_QUERY_REQUEST");
    assert_eq!(request.payload["playerUuid"], "u-1");
    let reply = Envelope::reply(
        "PLAYTIME_QUERY_RESPONSE",
        request.id.clone(),
        json!({"success": true, "minutes": 90}),
    );
    send(&mut peer, &reply).await;

    let status = call.await.unwrap().unwrap();
    assert!(status.success);
    assert_eq!(status.extra["minutes"], 90);
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let (running, _events) = start().await;
    let mut peer = connect(&running, "survival", "s3cret").await;

    let err = running
        .gateway
        .send_request("survival", "X_REQUEST", json!({}), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout { .. }));
    assert_eq!(next_envelope(&mut peer).await.message_type, "X_REQUEST");

    let conn = running.gateway.lookup_connection("survival").await.unwrap();
    assert!(conn.pending().is_empty());
}

#[tokio::test]
async fn request_to_absent_server_is_not_connected() {
    let (running, _events) = start().await;
    let _peer = connect(&running, "lobby", "l0bby").await;
    let err = running
        .gateway
        .query_membership("survival", "u-1")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "server not connected: survival (connected: lobby)"
    );
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconnect_replaces_previous_connection() {
    let (running, _events) = start().await;
    let mut first = connect(&running, "survival", "s3cret").await;

    let gateway = running.gateway.clone();
    let stranded = tokio::spawn(async move {
        gateway
            .send_request("survival", "X_REQUEST", json!({}), Duration::from_secs(30))
            .await
    });
    assert_eq!(next_envelope(&mut first).await.message_type, "X_REQUEST");

    let mut second = connect(&running, "survival", "s3cret").await;

    assert!(matches!(
        stranded.await.unwrap().unwrap_err(),
        GatewayError::ConnectionLost { .. }
    ));
    match next_message(&mut first).await {
        Message::Close(Some(frame)) => assert_eq!(frame.reason.as_str(), "replaced"),
        other => panic!("expected close frame, got {other:?}"),
    }

    // The old session's teardown must leave the new one registered.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(running.gateway.list_connected_server_ids().await, vec!["survival"]);

    let gateway = running.gateway.clone();
    let call = tokio::spawn(async move { gateway.query_playtime("survival", "u-2").await });
    let request = next_envelope(&mut second).await;
    send(
        &mut second,
        &Envelope::reply("PLAYTIME_QUERY_RESPONSE", request.id, json!({"success": true})),
    )
    .await;
    assert!(call.await.unwrap().unwrap().success);
}

#[tokio::test]
async fn disconnect_fails_pending_and_unregisters() {
    let (running, _events) = start().await;
    let mut peer = connect(&running, "survival", "s3cret").await;
    let _other = connect(&running, "lobby", "l0bby").await;

    let gateway = running.gateway.clone();
    let call = tokio::spawn(async move { gateway.query_membership("survival", "u-1").await });
    assert_eq!(
        next_envelope(&mut peer).await.message_type,
        "MEMBERSHIP_QUERY_REQUEST"
    );

    peer.close(None).await.unwrap();
    assert!(matches!(
        call.await.unwrap().unwrap_err(),
        GatewayError::ConnectionLost { .. }
    ));
    wait_until_connected(&running, &["lobby"]).await;
}

#[tokio::test]
async fn shutdown_closes_every_peer() {
    let (running, _events) = start().await;
    let mut peer = connect(&running, "survival", "s3cret").await;

    running.shutdown().await.unwrap();
    match next_message(&mut peer).await {
        Message::Close(Some(frame)) => assert_eq!(frame.reason.as_str(), "gateway shutting down"),
        other => panic!("expected close frame, got {other:?}"),
    }
}
