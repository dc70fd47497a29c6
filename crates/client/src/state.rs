use std::fmt;

/// Where the outbound connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    /// Dialing the remote endpoint.
    Connecting,
    /// Transport open, waiting for the server to accept the token.
    Authenticating,
    /// Application traffic allowed.
    Authenticated,
    /// The reconnect loop is not running: stopped by the caller or after an
    /// explicit auth failure.
    Stopped,
}

impl ClientState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Stopped => "stopped",
        }
    }

    /// Transport open, authenticated or not.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Authenticating | Self::Authenticated)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a caller-initiated reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Succeeded,
    /// The transport came back but the server never accepted the token.
    ConnectedNotAuthenticated,
    /// Nothing connected before the deadline.
    Failed,
}

/// How one connection attempt ended.
#[derive(Debug)]
pub(crate) enum SessionEnd {
    /// Dial or transport error.
    Failed(String),
    /// The server closed the transport.
    Closed,
    /// The server rejected the token.
    AuthFailed,
    /// A caller asked for an immediate reconnect.
    Forced,
    /// The client is stopping.
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_states() {
        assert!(ClientState::Authenticating.is_connected());
        assert!(ClientState::Authenticated.is_connected());
        assert!(!ClientState::Connecting.is_connected());
        assert!(!ClientState::Stopped.is_connected());
        assert_eq!(ClientState::Authenticated.to_string(), "authenticated");
    }
}
