//! Wire protocol shared by the inbound gateway and the outbound client.
//!
//! Every frame on the socket is a JSON [`Envelope`]: a type tag, a correlation
//! id, a sender timestamp and a type-specific payload. Replies echo the
//! request id in `replyTo`.

pub mod envelope;
pub mod types;

pub use {
    envelope::{Envelope, ProtocolError, ReplyStatus, Target},
    types::RequestKind,
};

/// Default WebSocket path the gateway accepts peers on.
pub const DEFAULT_PATH: &str = "/mc";
/// Default gateway listen port.
pub const DEFAULT_PORT: u16 = 58008;
/// Default transport ping interval in seconds.
pub const DEFAULT_HEARTBEAT_SECS: f64 = 5.0;
/// Default deadline for request/reply calls, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 10.0;
/// Platform name stamped on text the bridge sends into a game server.
pub const BRIDGE_PLATFORM: &str = "mcbridge";
/// Display name stamped on text the bridge sends into a game server.
pub const BRIDGE_USER_NAME: &str = "mcbridge";

/// Query parameter carrying the peer identity on connect.
pub const PARAM_SERVER_ID: &str = "serverId";
/// Query parameter carrying the peer token on connect.
pub const PARAM_TOKEN: &str = "token";

/// Milliseconds since the Unix epoch, sender-local.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Truncate `raw` to at most `max` chars for log output.
pub fn preview(raw: &str, max: usize) -> &str {
    match raw.char_indices().nth(max) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}
