use std::{
    collections::HashMap,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    futures::{FutureExt, SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio::{
        sync::{Notify, mpsc, watch},
        task::JoinHandle,
    },
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use {
    mcbridge_config::ClientConfig,
    mcbridge_protocol::{Envelope, preview, types},
};

use crate::{
    error::{ClientError, Result},
    state::{ClientState, ReconnectOutcome, SessionEnd},
};

/// A boxed async handler for one message type, called with the raw JSON object.
pub type MessageHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Outbound connection to a single game server, with token auth and a fixed
/// interval reconnect loop. Cloning shares the same connection.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<Inner>,
}

struct Inner {
    uri: String,
    token: String,
    auto_reconnect: bool,
    reconnect_interval: Duration,
    state: watch::Sender<ClientState>,
    /// Set while the reconnect loop should keep going.
    running: AtomicBool,
    /// Successful authentications so far, so a reconnect can tell a fresh
    /// session from the one it replaced.
    authentications: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    force_reconnect: Notify,
    handlers: RwLock<HashMap<String, MessageHandler>>,
    run: Mutex<Option<LoopHandle>>,
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl BridgeClient {
    pub fn new(config: &ClientConfig) -> Self {
        let (state, _) = watch::channel(ClientState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                uri: config.ws_uri(),
                token: config.websocket_token.clone(),
                auto_reconnect: config.auto_reconnect,
                reconnect_interval: config.reconnect_interval(),
                state,
                running: AtomicBool::new(false),
                authentications: AtomicU64::new(0),
                outbound: Mutex::new(None),
                force_reconnect: Notify::new(),
                handlers: RwLock::new(HashMap::new()),
                run: Mutex::new(None),
            }),
        }
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == ClientState::Authenticated
    }

    /// Handle every inbound message of `message_type`. Register before
    /// [`start`](Self::start); each type may be registered once.
    pub fn register_handler<F, Fut>(&self, message_type: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let message_type = message_type.into();
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(&message_type) {
            return Err(ClientError::DuplicateHandler(message_type));
        }
        handlers.insert(message_type, Arc::new(move |msg| Box::pin(handler(msg))));
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the connect loop. A no-op if it is already running.
    pub fn start(&self) {
        let mut run = lock(&self.inner.run);
        if self.inner.running.load(Ordering::SeqCst) {
            warn!(uri = %self.inner.uri, "client already running");
            return;
        }
        self.inner.running.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(connect_loop(Arc::clone(&self.inner), cancel.clone()));
        *run = Some(LoopHandle { cancel, task });
        info!(uri = %self.inner.uri, "client started");
    }

    /// Stop the loop, close the transport and wait for the loop to exit.
    pub async fn stop(&self) {
        info!(uri = %self.inner.uri, "stopping client");
        let handle = {
            let mut run = lock(&self.inner.run);
            self.inner.running.store(false, Ordering::SeqCst);
            run.take()
        };
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                debug!(error = %e, "connect loop ended abnormally");
            }
        }
        self.inner.clear_outbound();
        self.inner.set_state(ClientState::Stopped);
        info!(uri = %self.inner.uri, "client stopped");
    }

    /// Drop the current connection and dial again right away, then wait up
    /// to `timeout` for a fresh authenticated session. Restarts the loop if
    /// it had stopped.
    pub async fn reconnect(&self, timeout: Duration) -> ReconnectOutcome {
        info!(uri = %self.inner.uri, "reconnect requested");
        let before = self.inner.authentications.load(Ordering::SeqCst);
        let mut states = self.inner.state.subscribe();

        if self.inner.running.load(Ordering::SeqCst) {
            self.inner.force_reconnect.notify_one();
        } else {
            self.start();
        }

        let inner = &self.inner;
        let reached = tokio::time::timeout(
            timeout,
            states.wait_for(|s| {
                *s == ClientState::Authenticated
                    && inner.authentications.load(Ordering::SeqCst) > before
            }),
        )
        .await
        .is_ok_and(|r| r.is_ok());

        if reached {
            info!(uri = %self.inner.uri, "reconnected");
            ReconnectOutcome::Succeeded
        } else if self.state() == ClientState::Authenticating {
            warn!(uri = %self.inner.uri, "connected but not authenticated");
            ReconnectOutcome::ConnectedNotAuthenticated
        } else {
            error!(uri = %self.inner.uri, ?timeout, "reconnect failed");
            ReconnectOutcome::Failed
        }
    }

    // ── Sending ─────────────────────────────────────────────────────────

    /// Send a JSON message. Refused unless connected and authenticated.
    pub fn send_message(&self, data: &Value) -> Result<()> {
        let state = self.state();
        if !state.is_connected() {
            warn!("not connected, message not sent");
            return Err(ClientError::NotConnected);
        }
        if state != ClientState::Authenticated {
            warn!("not authenticated, message not sent");
            return Err(ClientError::NotAuthenticated);
        }
        let frame = serde_json::to_string(data)?;
        match lock(&self.inner.outbound).as_ref() {
            Some(tx) if tx.send(frame).is_ok() => Ok(()),
            _ => Err(ClientError::NotConnected),
        }
    }

    pub fn send_chat(&self, message: &str, sender: Option<&str>) -> Result<()> {
        let mut data = json!({ "type": types::client::CHAT, "message": message });
        if let Some(sender) = sender.filter(|s| !s.is_empty()) {
            data["sender"] = Value::String(sender.to_string());
        }
        self.send_message(&data)
    }

    pub fn send_command(&self, command: &str) -> Result<()> {
        self.send_message(&json!({ "type": types::client::COMMAND, "command": command }))
    }

    pub fn request_status(&self) -> Result<()> {
        self.send_message(&json!({ "type": types::client::STATUS_REQUEST }))
    }
}

// ── Connect loop ─────────────────────────────────────────────────────────────

async fn connect_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    while inner.running.load(Ordering::SeqCst) && !cancel.is_cancelled() {
        inner.set_state(ClientState::Connecting);
        info!(uri = %inner.uri, "connecting");

        let end = inner.run_session(&cancel).await;
        inner.clear_outbound();
        match end {
            SessionEnd::Stopped => break,
            SessionEnd::AuthFailed => {
                error!(uri = %inner.uri, "authentication failed, check the token; not retrying");
                break;
            },
            SessionEnd::Forced => {
                inner.set_state(ClientState::Disconnected);
                continue;
            },
            SessionEnd::Closed => warn!(uri = %inner.uri, "connection closed"),
            SessionEnd::Failed(e) => warn!(uri = %inner.uri, error = %e, "connection error"),
        }

        inner.set_state(ClientState::Disconnected);
        if !inner.auto_reconnect {
            info!("auto-reconnect disabled, stopping");
            break;
        }
        info!(interval = ?inner.reconnect_interval, "reconnecting after interval");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = inner.force_reconnect.notified() => {},
            _ = tokio::time::sleep(inner.reconnect_interval) => {},
        }
    }
    inner.finish();
}

impl Inner {
    fn set_state(&self, next: ClientState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, "client state");
        }
    }

    fn clear_outbound(&self) {
        lock(&self.outbound).take();
    }

    /// Loop exit: record the terminal state under the same lock `start`
    /// takes, so a concurrent start sees a consistent flag.
    fn finish(&self) {
        let _run = lock(&self.run);
        self.running.store(false, Ordering::SeqCst);
        self.set_state(ClientState::Stopped);
    }

    async fn run_session(&self, cancel: &CancellationToken) -> SessionEnd {
        let dialed = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Stopped,
            _ = self.force_reconnect.notified() => return SessionEnd::Forced,
            dialed = connect_async(self.uri.as_str()) => dialed,
        };
        let ws = match dialed {
            Ok((ws, _)) => ws,
            Err(e) => return SessionEnd::Failed(e.to_string()),
        };
        self.set_state(ClientState::Authenticating);
        info!(uri = %self.uri, "connection established, waiting for auth request");

        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *lock(&self.outbound) = Some(tx.clone());

        let end = loop {
            tokio::select! {
                _ = cancel.cancelled() => break SessionEnd::Stopped,
                _ = self.force_reconnect.notified() => break SessionEnd::Forced,
                frame = rx.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            break SessionEnd::Failed(e.to_string());
                        }
                    },
                    None => break SessionEnd::Closed,
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = self.handle_text(text.as_str(), &tx).await {
                            break end;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break SessionEnd::Closed,
                    Some(Ok(_)) => {},
                    Some(Err(e)) => break SessionEnd::Failed(e.to_string()),
                },
            }
        };

        if matches!(
            end,
            SessionEnd::Stopped | SessionEnd::Forced | SessionEnd::AuthFailed
        ) {
            let _ = sink.send(Message::Close(None)).await;
        }
        end
    }

    /// Process one inbound text frame. Returns how the session ends, if it
    /// should.
    async fn handle_text(&self, raw: &str, tx: &mpsc::UnboundedSender<String>) -> Option<SessionEnd> {
        let data = match serde_json::from_str::<Value>(raw) {
            Ok(data @ Value::Object(_)) => data,
            _ => {
                error!(raw = %preview(raw, 200), "cannot parse message");
                return None;
            },
        };
        let message_type = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match message_type.as_str() {
            types::client::AUTH_REQUIRED => {
                let auth = json!({ "type": types::client::AUTH, "token": self.token });
                if tx.send(auth.to_string()).is_ok() {
                    info!("auth sent");
                }
            },
            types::client::AUTH_SUCCESS => {
                self.authentications.fetch_add(1, Ordering::SeqCst);
                self.set_state(ClientState::Authenticated);
                info!(uri = %self.uri, "authenticated");
            },
            types::client::AUTH_FAILED => return Some(SessionEnd::AuthFailed),
            types::client::ERROR => {
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error");
                error!(message, "server error");
            },
            types::HEARTBEAT => {
                let id = data.get("id").and_then(Value::as_str).unwrap_or_default();
                match Envelope::heartbeat_ack(id).encode() {
                    Ok(frame) => {
                        let _ = tx.send(frame);
                    },
                    Err(e) => debug!(error = %e, "heartbeat ack not encoded"),
                }
            },
            other => self.dispatch(other, data).await,
        }
        None
    }

    async fn dispatch(&self, message_type: &str, data: Value) {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message_type)
            .cloned();
        let Some(handler) = handler else {
            debug!(message_type, "no handler, ignoring");
            return;
        };
        match AssertUnwindSafe(handler(data)).catch_unwind().await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => error!(message_type, error = %format!("{e:#}"), "handler failed"),
            Err(_) => error!(message_type, "handler panicked"),
        }
    }
}
