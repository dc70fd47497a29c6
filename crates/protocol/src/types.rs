//! Message type catalog.

// ── Control messages ─────────────────────────────────────────────────────────

pub const HEARTBEAT: &str = "HEARTBEAT";
pub const HEARTBEAT_ACK: &str = "HEARTBEAT_ACK";
/// Sent once by the gateway right after a peer is accepted.
pub const CONNECTION_ACK: &str = "CONNECTION_ACK";

// ── Unsolicited messages ─────────────────────────────────────────────────────

/// Game chat forwarded to the bridge.
pub const MESSAGE_FORWARD: &str = "MESSAGE_FORWARD";
/// Text the bridge pushes into a game server.
pub const MESSAGE_INCOMING: &str = "MESSAGE_INCOMING";
/// A player asked for an account-binding code.
pub const BIND_CODE_ISSUED: &str = "BIND_CODE_ISSUED";

/// Handshake messages used by the outbound client role.
pub mod client {
    pub const AUTH_REQUIRED: &str = "auth_required";
    pub const AUTH: &str = "auth";
    pub const AUTH_SUCCESS: &str = "auth_success";
    pub const AUTH_FAILED: &str = "auth_failed";
    pub const ERROR: &str = "error";
    pub const CHAT: &str = "chat";
    pub const COMMAND: &str = "command";
    pub const STATUS_REQUEST: &str = "status_request";
}

/// True for types the dispatch layer consumes internally.
pub fn is_control(message_type: &str) -> bool {
    matches!(message_type, HEARTBEAT | HEARTBEAT_ACK | CONNECTION_ACK)
}

// ── Request/reply pairs ──────────────────────────────────────────────────────

/// Requests the bridge can issue to a game server. Each has exactly one
/// response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    BindConfirm,
    BindingLookup,
    MembershipQuery,
    PlaytimeQuery,
    ExternalAccountLookup,
}

impl RequestKind {
    pub const ALL: [RequestKind; 5] = [
        RequestKind::BindConfirm,
        RequestKind::BindingLookup,
        RequestKind::MembershipQuery,
        RequestKind::PlaytimeQuery,
        RequestKind::ExternalAccountLookup,
    ];

    pub fn request_type(self) -> &'static str {
        match self {
            Self::BindConfirm => "BIND_CONFIRM_REQUEST",
            Self::BindingLookup => "BINDING_LOOKUP_REQUEST",
            Self::MembershipQuery => "MEMBERSHIP_QUERY_REQUEST",
            Self::PlaytimeQuery => "PLAYTIME_QUERY_REQUEST",
            Self::ExternalAccountLookup => "EXTERNAL_ACCOUNT_LOOKUP_REQUEST",
        }
    }

    pub fn response_type(self) -> &'static str {
        match self {
            Self::BindConfirm => "BIND_CONFIRM_RESPONSE",
            Self::BindingLookup => "BINDING_LOOKUP_RESPONSE",
            Self::MembershipQuery => "MEMBERSHIP_QUERY_RESPONSE",
            Self::PlaytimeQuery => "PLAYTIME_QUERY_RESPONSE",
            Self::ExternalAccountLookup => "EXTERNAL_ACCOUNT_LOOKUP_RESPONSE",
        }
    }

    pub fn from_request_type(message_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.request_type() == message_type)
    }

    pub fn from_response_type(message_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.response_type() == message_type)
    }
}

/// True for types that only ever arrive as a reply to an issued request.
pub fn is_response(message_type: &str) -> bool {
    RequestKind::from_response_type(message_type).is_some()
}
