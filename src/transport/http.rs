//! HTTP transport speaking the remote store's form-encoded action endpoints.

use async_trait::async_trait;
use serde_json::Value;

use super::Transport;
use crate::protocol::{Reply, Request};
use crate::{Error, Result};

/// Transport posting requests to `<base_url>/<endpoint>`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport rooted at `base_url` (e.g. `http://host/app`).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "base url must start with http:// or https://, got '{}'",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("backlog-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Reply> {
        let operation = request.operation();
        let url = self.url(&request.endpoint());
        tracing::debug!("POST {} ({})", url, operation);

        let response = self
            .client
            .post(&url)
            .form(&request.form_params())
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{} {}: {}", operation, url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.to_string()
            } else {
                body.trim().to_string()
            };
            tracing::warn!("{} rejected with {}", operation, status);
            return Err(Error::Remote {
                operation: operation.to_string(),
                message,
            });
        }

        if request.expects_ack() {
            return Ok(Reply::Ack);
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("{}: invalid response body: {}", operation, e)))?;

        if request.expects_list() {
            match value {
                Value::Array(records) => Ok(Reply::Records(records)),
                _ => Err(Error::InvalidRecord(format!(
                    "{} expected a list of records",
                    operation
                ))),
            }
        } else {
            Ok(Reply::Record(value))
        }
    }
}
