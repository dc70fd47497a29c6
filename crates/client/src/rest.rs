//! Thin client for the game server's REST status API.

use std::time::Duration;

use {
    reqwest::{Client, StatusCode},
    serde_json::Value,
    tracing::error,
};

use mcbridge_config::RestConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("HTTP {status} from {endpoint}")]
    Status { endpoint: String, status: StatusCode },

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct RestClient {
    client: Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(config: &RestConfig) -> Result<Self, RestError> {
        Ok(Self::with_base_url(
            config.base_url(),
            config.token.clone(),
            Client::builder().timeout(REQUEST_TIMEOUT).build()?,
        ))
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub async fn server_status(&self) -> Result<Value, RestError> {
        self.get("/api/status").await
    }

    pub async fn players(&self) -> Result<Value, RestError> {
        self.get("/api/players").await
    }

    pub async fn server_info(&self) -> Result<Value, RestError> {
        self.get("/api/info").await
    }

    pub async fn world_info(&self) -> Result<Value, RestError> {
        self.get("/api/world").await
    }

    /// GET `endpoint` with the bearer token. A body carrying a `data` field
    /// is unwrapped to that field.
    pub async fn get(&self, endpoint: &str) -> Result<Value, RestError> {
        let url = format!("{}{endpoint}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .inspect_err(|e| error!(%url, error = %e, "REST request failed"))?;

        let status = resp.status();
        if status != StatusCode::OK {
            error!(%url, %status, "REST request failed");
            return Err(RestError::Status {
                endpoint: endpoint.to_string(),
                status,
            });
        }

        let body: Value = resp.json().await?;
        Ok(match body {
            Value::Object(mut map) if map.contains_key("data") => {
                map.remove("data").unwrap_or_default()
            },
            other => other,
        })
    }
}
