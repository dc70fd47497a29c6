#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("connected but not authenticated")]
    NotAuthenticated,

    #[error("handler already registered for message type {0}")]
    DuplicateHandler(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
