use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

use crate::config::HttpConfig;
use crate::error::DispatchError;

/// Caller identity header sent with every generation request.
pub const USERNAME_HEADER: &str = "x-user-username";

/// Raw result of one generation call, before classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },
}

/// One generation call against one relay. Implementations do no retrying or
/// classification of their own; the executor owns both.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        url: &str,
        token: &str,
        username: &str,
        body: &serde_json::Value,
    ) -> Result<RawResponse, TransportError>;
}

/// Production transport over a shared `reqwest` client.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DispatchError::configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }

    /// Wrap an existing client (shared with the slot gate).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        token: &str,
        username: &str,
        body: &serde_json::Value,
    ) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(USERNAME_HEADER, username)
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(RawResponse { status, body })
    }
}
