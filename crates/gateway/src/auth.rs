use std::{collections::HashMap, fmt};

use axum::http::StatusCode;

// ── Types ────────────────────────────────────────────────────────────────────

/// Static server id → token whitelist.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    tokens: HashMap<String, String>,
}

/// Why a connect attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// `serverId` or `token` absent or blank.
    MissingCredentials,
    /// The server id is not whitelisted.
    UnknownServer,
    TokenMismatch,
}

impl AuthRejection {
    pub fn status(self) -> StatusCode {
        match self {
            Self::MissingCredentials => StatusCode::UNAUTHORIZED,
            Self::UnknownServer | Self::TokenMismatch => StatusCode::FORBIDDEN,
        }
    }

    /// Body of the HTTP rejection. Unknown server and bad token read the same
    /// so the response does not reveal which ids exist.
    pub fn body(self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing serverId/token",
            Self::UnknownServer | Self::TokenMismatch => "invalid token",
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::MissingCredentials => "credentials_missing",
            Self::UnknownServer => "server_unknown",
            Self::TokenMismatch => "token_mismatch",
        }
    }
}

impl fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison (prevents timing attacks).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

fn is_bind_all(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "::" | "[::]")
}

// ── Auth logic ───────────────────────────────────────────────────────────────

impl Whitelist {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            tokens: pairs.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whitelisted server ids, sorted.
    pub fn server_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tokens.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Check the identity and token a peer presented on connect. Returns the
    /// accepted server id.
    pub fn authorize_connect(
        &self,
        server_id: Option<&str>,
        token: Option<&str>,
    ) -> Result<String, AuthRejection> {
        let server_id = server_id.map(str::trim).unwrap_or_default();
        let token = token.map(str::trim).unwrap_or_default();
        if server_id.is_empty() || token.is_empty() {
            return Err(AuthRejection::MissingCredentials);
        }
        let Some(expected) = self.tokens.get(server_id) else {
            return Err(AuthRejection::UnknownServer);
        };
        if !safe_equal(token, expected) {
            return Err(AuthRejection::TokenMismatch);
        }
        Ok(server_id.to_string())
    }

    /// Connect URL for every whitelisted server, for the startup log.
    /// Bind-all listen hosts are rendered as `<public-host>`.
    pub fn connect_urls(&self, listen_host: &str, port: u16, path: &str) -> Vec<String> {
        let host = if is_bind_all(listen_host) {
            "<public-host>"
        } else {
            listen_host
        };
        self.server_ids()
            .into_iter()
            .map(|id| {
                let token = self.tokens.get(id).map(String::as_str).unwrap_or_default();
                format!("ws://{host}:{port}{path}?serverId={id}&token={token}")
            })
            .collect()
    }
}
