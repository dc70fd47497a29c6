//! The client against a local WebSocket server that plays the game side.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio::{
        net::{TcpListener, TcpStream},
        sync::mpsc,
    },
    tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message},
};

use {
    mcbridge_client::{BridgeClient, ClientState, ReconnectOutcome, spawn_status_poller},
    mcbridge_config::ClientConfig,
};

type Conn = WebSocketStream<TcpStream>;

const TOKEN: &str = "t0ken";

struct FakeServer {
    addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<Conn>,
}

impl FakeServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, conns) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await
                    && tx.send(ws).is_err()
                {
                    break;
                }
            }
        });
        Self { addr, conns }
    }

    async fn accept(&mut self) -> Conn {
        tokio::time::timeout(Duration::from_secs(5), self.conns.recv())
            .await
            .expect("client never connected")
            .unwrap()
    }

    /// Accept and run the auth exchange, answering with `verdict`.
    async fn accept_and_auth(&mut self, verdict: &str) -> Conn {
        let mut ws = self.accept().await;
        send_json(&mut ws, json!({"type": "auth_required"})).await;
        let auth = recv_json(&mut ws).await;
        assert_eq!(auth, json!({"type": "auth", "token": TOKEN}));
        send_json(&mut ws, json!({"type": verdict})).await;
        ws
    }

    fn config(&self, reconnect_interval_sec: u64) -> ClientConfig {
        ClientConfig {
            enabled: true,
            websocket_host: "127.0.0.1".into(),
            websocket_port: self.addr.port(),
            websocket_token: TOKEN.into(),
            auto_reconnect: true,
            reconnect_interval_sec,
            status_check_interval_sec: 0,
        }
    }
}

async fn send_json(ws: &mut Conn, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn recv_json(ws: &mut Conn) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("client went away")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

async fn wait_for_state(client: &BridgeClient, wanted: ClientState) {
    let mut states = client.subscribe();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == wanted))
        .await
        .unwrap_or_else(|_| panic!("client never reached {wanted}"))
        .unwrap();
}

#[tokio::test]
async fn authenticates_then_sends() {
    let mut server = FakeServer::start().await;
    let client = BridgeClient::new(&server.config(60));
    client.start();

    let mut ws = server.accept_and_auth("auth_success").await;
    wait_for_state(&client, ClientState::Authenticated).await;
    assert!(client.is_connected());

    client.send_chat("hello", Some("bot")).unwrap();
    assert_eq!(
        recv_json(&mut ws).await,
        json!({"type": "chat", "message": "hello", "sender": "bot"})
    );
    client.send_command("list").unwrap();
    assert_eq!(
        recv_json(&mut ws).await,
        json!({"type": "command", "command": "list"})
    );

    client.stop().await;
    assert_eq!(client.state(), ClientState::Stopped);
}

#[tokio::test]
async fn reconnects_after_server_closes() {
    let mut server = FakeServer::start().await;
    let client = BridgeClient::new(&server.config(0));
    client.start();

    let mut first = server.accept_and_auth("auth_success").await;
    wait_for_state(&client, ClientState::Authenticated).await;
    first.close(None).await.unwrap();

    let _second = server.accept_and_auth("auth_success").await;
    wait_for_state(&client, ClientState::Authenticated).await;
    client.stop().await;
}

#[tokio::test]
async fn auth_failure_stops_retrying() {
    let mut server = FakeServer::start().await;
    let client = BridgeClient::new(&server.config(0));
    client.start();

    let _ws = server.accept_and_auth("auth_failed").await;
    wait_for_state(&client, ClientState::Stopped).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(server.conns.try_recv().is_err());
    assert!(client.send_command("list").is_err());
}

#[tokio::test]
async fn reconnect_now_skips_the_interval() {
    let mut server = FakeServer::start().await;
    let client = BridgeClient::new(&server.config(60));
    client.start();
    let _first = server.accept_and_auth("auth_success").await;
    wait_for_state(&client, ClientState::Authenticated).await;

    let reconnect = {
        let client = client.clone();
        tokio::spawn(async move { client.reconnect(Duration::from_secs(5)).await })
    };
    let _second = server.accept_and_auth("auth_success").await;
    assert_eq!(reconnect.await.unwrap(), ReconnectOutcome::Succeeded);
    client.stop().await;
}

#[tokio::test]
async fn reconnect_restarts_a_stopped_client() {
    let mut server = FakeServer::start().await;
    let client = BridgeClient::new(&server.config(60));
    client.start();
    let _ws = server.accept_and_auth("auth_failed").await;
    wait_for_state(&client, ClientState::Stopped).await;

    let reconnect = {
        let client = client.clone();
        tokio::spawn(async move { client.reconnect(Duration::from_secs(5)).await })
    };
    let _ws = server.accept_and_auth("auth_success").await;
    assert_eq!(reconnect.await.unwrap(), ReconnectOutcome::Succeeded);
    client.stop().await;
}

#[tokio::test]
async fn reconnect_reports_missing_auth() {
    let mut server = FakeServer::start().await;
    let client = BridgeClient::new(&server.config(60));
    client.start();
    let _first = server.accept_and_auth("auth_success").await;
    wait_for_state(&client, ClientState::Authenticated).await;

    let reconnect = {
        let client = client.clone();
        tokio::spawn(async move { client.reconnect(Duration::from_millis(500)).await })
    };
    // Accept the new transport but never ask for credentials.
    let _silent = server.accept().await;
    assert_eq!(
        reconnect.await.unwrap(),
        ReconnectOutcome::ConnectedNotAuthenticated
    );
    client.stop().await;
}

#[tokio::test]
async fn reconnect_fails_without_server() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = ClientConfig {
        websocket_host: "127.0.0.1".into(),
        websocket_port: addr.port(),
        reconnect_interval_sec: 60,
        ..ClientConfig::default()
    };

    let client = BridgeClient::new(&config);
    assert_eq!(
        client.reconnect(Duration::from_millis(300)).await,
        ReconnectOutcome::Failed
    );
    client.stop().await;
}

#[tokio::test]
async fn handlers_heartbeat_and_status_poll() {
    let mut server = FakeServer::start().await;
    let client = BridgeClient::new(&server.config(60));

    let joins = Arc::new(AtomicUsize::new(0));
    {
        let joins = Arc::clone(&joins);
        client
            .register_handler("player_join", move |msg: Value| {
                let joins = Arc::clone(&joins);
                async move {
                    assert_eq!(msg["player"], "Steve");
                    joins.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
    }
    client.start();
    let poller = spawn_status_poller(client.clone(), Duration::from_millis(50));

    let mut ws = server.accept_and_auth("auth_success").await;
    wait_for_state(&client, ClientState::Authenticated).await;

    send_json(&mut ws, json!({"type": "player_join", "player": "Steve"})).await;
    send_json(
        &mut ws,
        json!({"type": "HEARTBEAT", "id": "hb-7", "timestamp": 1, "payload": {}}),
    )
    .await;

    let mut saw_ack = false;
    let mut saw_status = false;
    while !(saw_ack && saw_status) {
        let msg = recv_json(&mut ws).await;
        match msg["type"].as_str() {
            Some("HEARTBEAT_ACK") => {
                assert_eq!(msg["id"], "hb-7");
                saw_ack = true;
            },
            Some("status_request") => saw_status = true,
            other => panic!("unexpected message type {other:?}"),
        }
    }
    assert_eq!(joins.load(Ordering::SeqCst), 1);

    client.stop().await;
    tokio::time::timeout(Duration::from_secs(5), poller)
        .await
        .unwrap()
        .unwrap();
}
