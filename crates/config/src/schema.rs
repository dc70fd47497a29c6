//! Config schema types (gateway, outbound client, REST status API).

use std::time::Duration;

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use mcbridge_protocol::{
    DEFAULT_HEARTBEAT_SECS, DEFAULT_PATH, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_SECS,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub gateway: GatewayConfig,
    pub client: ClientConfig,
    pub rest: RestConfig,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// A value written either as a single string or as a list of strings.
///
/// `"main"` reads as `["main"]`, never as a list of characters. A blank
/// single string reads as an empty list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Vec::new()
                } else {
                    vec![s.to_string()]
                }
            },
            Self::Many(v) => v.clone(),
        }
    }
}

/// Positive seconds as a non-zero `Duration`; anything that rounds to zero is
/// treated as unset.
fn secs(value: f64) -> Option<Duration> {
    if value > 0.0 {
        Duration::try_from_secs_f64(value)
            .ok()
            .filter(|d| !d.is_zero())
    } else {
        None
    }
}

// ── Gateway (inbound) ────────────────────────────────────────────────────────

/// Inbound gateway: where to listen and which peers may connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_host: String,
    pub listen_port: u16,
    /// WebSocket path; requests on any other path are refused.
    pub path: String,
    /// Whitelisted server ids, paired by index with `tokens`.
    pub server_ids: OneOrMany,
    pub tokens: OneOrMany,
    /// Transport ping interval. `<= 0` disables pings.
    pub ws_heartbeat_sec: f64,
    /// Default deadline for request/reply calls.
    pub request_timeout_sec: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".into(),
            listen_port: DEFAULT_PORT,
            path: DEFAULT_PATH.into(),
            server_ids: OneOrMany::One("ExampleServer".into()),
            tokens: OneOrMany::One("CHANGE_ME".into()),
            ws_heartbeat_sec: DEFAULT_HEARTBEAT_SECS,
            request_timeout_sec: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl GatewayConfig {
    /// `(server_id, token)` pairs, trimmed, blanks dropped.
    ///
    /// Lists of different lengths are zipped to the shorter one.
    pub fn credentials(&self) -> Vec<(String, String)> {
        let ids = self.server_ids.to_vec();
        let tokens = self.tokens.to_vec();
        if ids.len() != tokens.len() {
            warn!(
                server_ids = ids.len(),
                tokens = tokens.len(),
                "whitelist length mismatch, pairing the shortest"
            );
        }
        ids.iter()
            .zip(tokens.iter())
            .map(|(id, tok)| (id.trim().to_string(), tok.trim().to_string()))
            .filter(|(id, tok)| !id.is_empty() && !tok.is_empty())
            .collect()
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        secs(self.ws_heartbeat_sec)
    }

    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout_sec)
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    /// Normalized path: always starts with `/`.
    pub fn ws_path(&self) -> String {
        let path = self.path.trim();
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        }
    }
}

// ── Client (outbound) ────────────────────────────────────────────────────────

/// Outbound client: dials a single game server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub enabled: bool,
    pub websocket_host: String,
    pub websocket_port: u16,
    pub websocket_token: String,
    pub auto_reconnect: bool,
    pub reconnect_interval_sec: u64,
    /// Status poll period. `0` disables polling.
    pub status_check_interval_sec: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            websocket_host: "localhost".into(),
            websocket_port: 8765,
            websocket_token: String::new(),
            auto_reconnect: true,
            reconnect_interval_sec: 5,
            status_check_interval_sec: 300,
        }
    }
}

impl ClientConfig {
    pub fn ws_uri(&self) -> String {
        format!("ws://{}:{}", self.websocket_host, self.websocket_port)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_sec)
    }

    pub fn status_check_interval(&self) -> Option<Duration> {
        (self.status_check_interval_sec > 0)
            .then(|| Duration::from_secs(self.status_check_interval_sec))
    }
}

// ── REST status API ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub host: String,
    pub port: u16,
    pub token: String,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8766,
            token: String::new(),
        }
    }
}

impl RestConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}
