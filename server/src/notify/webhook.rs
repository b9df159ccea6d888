use std::time::Duration;

use derive_more::derive::Display;
use serde::Serialize;
use url::Url;

use crate::{server_config::cfg, HttpClient};

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum WebhookError {
    #[display("Invalid webhook URL: {_0}")]
    InvalidUrl(String),
    #[display("Webhook returned {_0}")]
    Status(u16),
    #[display("Webhook request failed: {_0}")]
    Request(String),
}

impl std::error::Error for WebhookError {}

/// Delivers JSON payloads to user-configured URLs. Deliveries are not retried.
#[derive(Clone)]
pub struct WebhookClient {
    http_client: HttpClient,
    timeout: Duration,
}

impl WebhookClient {
    pub fn new(http_client: HttpClient, timeout: Duration) -> Self {
        Self {
            http_client,
            timeout,
        }
    }

    pub fn from_config(http_client: HttpClient) -> Self {
        Self::new(http_client, Duration::from_secs(cfg.webhook.timeout_secs))
    }

    /// Posts `body` and returns the response text. Non-2xx responses are failures.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<String, WebhookError> {
        let url = Url::parse(url).map_err(|e| WebhookError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WebhookError::InvalidUrl(url.to_string()));
        }

        let resp = self
            .http_client
            .post(url.clone())
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| WebhookError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!("Webhook {} returned {}", url, status);
            return Err(WebhookError::Status(status.as_u16()));
        }

        resp.text()
            .await
            .map_err(|e| WebhookError::Request(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::testing::common::WebhookServer;

    fn client() -> WebhookClient {
        WebhookClient::new(HttpClient::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_post_json_delivers_body() {
        let server = WebhookServer::start(StatusCode::OK, "created").await;

        let text = client()
            .post_json(&server.url(), &json!({ "action": "create_task" }))
            .await
            .unwrap();

        assert_eq!(text, "created");
        let received = server.received().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["action"], "create_task");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let server = WebhookServer::start(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;

        let err = client()
            .post_json(&server.url(), &json!({}))
            .await
            .unwrap_err();

        assert_eq!(err, WebhookError::Status(500));
        assert_eq!(err.to_string(), "Webhook returned 500");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_url_makes_no_request() {
        let err = client()
            .post_json("not a url", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidUrl(_)));
    }
}
