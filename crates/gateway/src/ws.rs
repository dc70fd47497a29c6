use std::{net::SocketAddr, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use {
    axum::extract::ws::{CloseFrame, Message, WebSocket},
    futures::{
        FutureExt, SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    tokio::{
        sync::mpsc,
        time::{Instant, Interval},
    },
    tracing::{debug, info, trace, warn},
};

use mcbridge_protocol::{Envelope, now_ms};

use crate::{
    connection::{Outbound, ServerConnection},
    dispatch::{HandlerCall, Routed, route},
    state::GatewayState,
};

/// A peer silent for this many ping intervals is treated as half-open.
const MISSED_PINGS_BEFORE_CLOSE: u32 = 3;

/// Close reason sent to a connection evicted by a newer one.
pub const CLOSE_REASON_REPLACED: &str = "replaced";

/// Handle an authenticated peer from registration to teardown.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    server_id: String,
    remote_addr: SocketAddr,
) {
    let (conn, outbound_rx) = ServerConnection::new(server_id.as_str());
    let (ws_tx, ws_rx) = socket.split();

    // ── Register, evicting any previous session ─────────────────────────
    if let Some(old) = state.registry.register(Arc::clone(&conn)).await {
        old.close(CLOSE_REASON_REPLACED);
        let failed = old.teardown();
        warn!(
            server_id = %server_id,
            old_conn_id = %old.conn_id,
            failed_pending = failed,
            "replacing existing connection"
        );
    }
    info!(
        server_id = %server_id,
        conn_id = %conn.conn_id,
        remote_ip = %remote_addr.ip(),
        "server connected"
    );

    let writer = {
        let conn = Arc::clone(&conn);
        let heartbeat = state.heartbeat;
        tokio::spawn(async move {
            let shutdown = conn.shutdown_token();
            let result = AssertUnwindSafe(write_loop(
                ws_tx,
                outbound_rx,
                Arc::clone(&conn),
                heartbeat,
            ))
            .catch_unwind()
            .await;
            // The reader must not outlive the writer, however it ended.
            shutdown.cancel();
            if result.is_err() {
                warn!(server_id = %conn.server_id, conn_id = %conn.conn_id, "writer panicked");
            }
        })
    };

    if let Err(e) = conn.send(&Envelope::connection_ack(&server_id)) {
        debug!(server_id = %server_id, error = %e, "connection ack not sent");
    }

    // ── Handler worker ──────────────────────────────────────────────────
    // Handlers run in arrival order, off the read loop.
    let (calls_tx, calls_rx) = mpsc::unbounded_channel::<HandlerCall>();
    let worker = tokio::spawn(run_handlers(calls_rx));

    read_loop(ws_rx, &conn, &state, &calls_tx).await;

    // ── Teardown ────────────────────────────────────────────────────────
    let failed = conn.teardown();
    drop(calls_tx);
    let _ = writer.await;

    let removed = state
        .registry
        .remove_if_current(&server_id, &conn.conn_id)
        .await;
    let replaced = !removed && state.registry.get(&server_id).await.is_some();
    let uptime = conn.connected_at.elapsed();
    if replaced {
        info!(
            server_id = %server_id,
            conn_id = %conn.conn_id,
            failed_pending = failed,
            ?uptime,
            "server disconnected (replaced)"
        );
    } else {
        info!(
            server_id = %server_id,
            conn_id = %conn.conn_id,
            failed_pending = failed,
            ?uptime,
            "server disconnected"
        );
    }

    // Calls already queued still run; new ones cannot arrive.
    let _ = worker.await;
}

async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    conn: &Arc<ServerConnection>,
    state: &GatewayState,
    calls_tx: &mpsc::UnboundedSender<HandlerCall>,
) {
    let shutdown = conn.shutdown_token();
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = ws_rx.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(server_id = %conn.server_id, error = %e, "websocket read error");
                break;
            },
            None => break,
        };

        match msg {
            Message::Text(text) => match route(conn, &state.handlers, text.as_str()) {
                Routed::Handler(call) => {
                    if calls_tx.send(call).is_err() {
                        break;
                    }
                },
                other => trace!(server_id = %conn.server_id, outcome = other.label(), "routed"),
            },
            Message::Binary(_) => {
                conn.touch();
                debug!(server_id = %conn.server_id, "ignoring binary frame");
            },
            Message::Ping(_) | Message::Pong(_) => conn.touch(),
            Message::Close(frame) => {
                debug!(
                    server_id = %conn.server_id,
                    code = frame.as_ref().map(|f| f.code),
                    reason = frame.as_ref().map(|f| f.reason.as_str()).unwrap_or_default(),
                    "peer closed"
                );
                break;
            },
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    conn: Arc<ServerConnection>,
    heartbeat: Option<Duration>,
) {
    let shutdown = conn.shutdown_token();
    let heartbeat = heartbeat.filter(|period| !period.is_zero());
    let mut ping = heartbeat.map(|period| tokio::time::interval_at(Instant::now() + period, period));

    loop {
        tokio::select! {
            // Drain queued frames first so a close queued before teardown
            // still reaches the peer.
            biased;
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                },
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                },
                None => break,
            },
            _ = shutdown.cancelled() => break,
            _ = next_tick(&mut ping) => {
                if let Some(period) = heartbeat
                    && is_half_open(conn.last_seen_ms(), period)
                {
                    warn!(
                        server_id = %conn.server_id,
                        conn_id = %conn.conn_id,
                        "no traffic from peer, closing half-open connection"
                    );
                    break;
                }
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            },
        }
    }

    shutdown.cancel();
    let _ = sink.close().await;
}

async fn next_tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        },
        None => std::future::pending().await,
    }
}

fn is_half_open(last_seen_ms: i64, period: Duration) -> bool {
    let limit = period.saturating_mul(MISSED_PINGS_BEFORE_CLOSE).as_millis();
    let silent = now_ms().saturating_sub(last_seen_ms).max(0) as u128;
    silent > limit
}

async fn run_handlers(mut calls: mpsc::UnboundedReceiver<HandlerCall>) {
    while let Some(call) = calls.recv().await {
        // Failures are logged inside run().
        let _ = call.run().await;
    }
}
