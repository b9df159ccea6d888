use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::derive::Display;
use reqwest::StatusCode;
use serde::Serialize;

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult},
    retry::{RetryPolicy, Retryable},
    server_config::cfg,
    util::check_expired,
    HttpClient,
};

use super::{
    gmail::GmailProvider, message::CanonicalMessage, outlook::OutlookProvider, query::SearchQuery,
};

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ProviderError {
    #[display("access token expired or revoked")]
    AuthExpired,
    #[display("rate limited by email provider")]
    RateLimited,
    #[display("not found: {_0}")]
    NotFound(String),
    #[display("transient provider failure: {_0}")]
    Transient(String),
    #[display("unsupported: {_0}")]
    Unsupported(String),
    #[display("provider error: {_0}")]
    Other(String),
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ProviderError::AuthExpired,
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
            StatusCode::FORBIDDEN if body.contains("RateLimitExceeded") || body.contains("rateLimitExceeded") => {
                ProviderError::RateLimited
            }
            StatusCode::NOT_FOUND => ProviderError::NotFound(body.to_string()),
            StatusCode::REQUEST_TIMEOUT => ProviderError::Transient(body.to_string()),
            s if s.is_server_error() => ProviderError::Transient(format!("{s}: {body}")),
            s => ProviderError::Other(format!("{s}: {body}")),
        }
    }
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited | ProviderError::Transient(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return ProviderError::from_status(status, &error.to_string());
        }
        if error.is_timeout() || error.is_connect() || error.is_request() {
            ProviderError::Transient(error.to_string())
        } else {
            ProviderError::Other(error.to_string())
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// What an account's provider can do. Rule validation and action execution
/// consult this instead of the provider's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// Messages can be moved between named folders.
    pub folders: bool,
    /// Labels are applied as categories.
    pub categories_for_labels: bool,
}

impl ProviderCapabilities {
    pub const GMAIL: Self = Self {
        folders: false,
        categories_for_labels: false,
    };
    pub const OUTLOOK: Self = Self {
        folders: true,
        categories_for_labels: true,
    };

    pub fn for_kind(kind: EmailProviderKind) -> Self {
        match kind {
            EmailProviderKind::Google => Self::GMAIL,
            EmailProviderKind::Microsoft => Self::OUTLOOK,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub id: Option<String>,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSubscription {
    pub subscription_id: String,
    pub expiration: Option<DateTime<Utc>>,
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageThread {
    pub id: String,
    pub messages: Vec<CanonicalMessage>,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn kind(&self) -> EmailProviderKind;

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::for_kind(self.kind())
    }

    fn email_address(&self) -> &str;

    async fn search_emails(
        &self,
        query: &SearchQuery,
        max_results: u32,
    ) -> ProviderResult<Vec<CanonicalMessage>>;

    async fn get_message(&self, message_id: &str) -> ProviderResult<CanonicalMessage>;

    async fn get_thread(&self, thread_id: &str) -> ProviderResult<MessageThread>;

    /// Unread messages currently in the inbox.
    async fn unread_count(&self) -> ProviderResult<u64>;

    async fn apply_label(&self, message: &CanonicalMessage, label: &str) -> ProviderResult<()>;

    async fn move_to_folder(&self, message: &CanonicalMessage, folder: &str)
        -> ProviderResult<()>;

    async fn archive(&self, message: &CanonicalMessage) -> ProviderResult<()>;

    async fn mark_read(&self, message: &CanonicalMessage) -> ProviderResult<()>;

    async fn mark_spam(&self, message: &CanonicalMessage) -> ProviderResult<()>;

    async fn send_reply(
        &self,
        original: &CanonicalMessage,
        reply: &OutgoingEmail,
    ) -> ProviderResult<SentMessage>;

    async fn create_draft(
        &self,
        original: &CanonicalMessage,
        reply: &OutgoingEmail,
    ) -> ProviderResult<SentMessage>;

    async fn send_forward(
        &self,
        original: &CanonicalMessage,
        forward: &OutgoingEmail,
    ) -> ProviderResult<SentMessage>;

    async fn watch(&self) -> ProviderResult<WatchSubscription>;

    async fn unwatch(&self, subscription_id: Option<&str>) -> ProviderResult<()>;
}

pub type DynEmailProvider = Arc<dyn EmailProvider>;

/// Transport settings shared by provider clients.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub gmail_topic: String,
    pub graph_notification_url: String,
}

impl ProviderSettings {
    pub fn from_config() -> Self {
        Self {
            timeout: Duration::from_secs(cfg.providers.request_timeout_secs),
            retry: cfg.providers.retry_policy(),
            gmail_topic: cfg.providers.gmail_pubsub_topic.clone(),
            graph_notification_url: cfg.providers.graph_notification_url.clone(),
        }
    }
}

/// Builds the client for an account, dispatching on its stored provider kind.
pub fn create_email_provider(
    http_client: &HttpClient,
    account: &email_account::Model,
    settings: ProviderSettings,
    token_key: &[u8],
) -> AppResult<DynEmailProvider> {
    let access_token = ensure_access_token(account, token_key)?;

    let provider: DynEmailProvider = match account.provider {
        EmailProviderKind::Google => Arc::new(GmailProvider::new(
            http_client.clone(),
            access_token,
            account.email.clone(),
            settings,
        )),
        EmailProviderKind::Microsoft => Arc::new(OutlookProvider::new(
            http_client.clone(),
            access_token,
            account.email.clone(),
            settings,
        )),
    };

    Ok(provider)
}

fn ensure_access_token(account: &email_account::Model, token_key: &[u8]) -> AppResult<String> {
    if account.needs_reauthentication {
        return Err(ProviderError::AuthExpired.into());
    }
    let Some(encrypted) = account.access_token.as_deref() else {
        return Err(ProviderError::AuthExpired.into());
    };
    if account.expires_at.is_some_and(check_expired) {
        tracing::info!("Access token for {} has expired", account.email);
        return Err(ProviderError::AuthExpired.into());
    }

    lib_utils::crypt::decrypt(encrypted, token_key).map_err(AppError::from)
}

/// Maps a non-success response into a provider error.
pub(super) async fn check_response(resp: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status, &body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn account(provider: EmailProviderKind, token: Option<String>) -> email_account::Model {
        let now = Utc::now().with_timezone(&FixedOffset::east_opt(0).unwrap());
        email_account::Model {
            id: "acc-1".to_string(),
            user_id: "user-1".to_string(),
            email: "me@example.com".to_string(),
            provider,
            access_token: token,
            expires_at: Some(now + chrono::Duration::hours(1)),
            needs_reauthentication: false,
            watch_emails_subscription_id: None,
            watch_emails_expiration_date: None,
            last_history_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn settings() -> ProviderSettings {
        ProviderSettings {
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::none(),
            gmail_topic: "projects/test/topics/test".to_string(),
            graph_notification_url: "https://example.com/webhooks/outlook".to_string(),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProviderError::from_status(StatusCode::UNAUTHORIZED, ""),
            ProviderError::AuthExpired
        );
        assert_eq!(
            ProviderError::from_status(StatusCode::FORBIDDEN, "userRateLimitExceeded"),
            ProviderError::RateLimited
        );
        assert!(ProviderError::from_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!ProviderError::from_status(StatusCode::NOT_FOUND, "").is_retryable());
        assert!(!ProviderError::AuthExpired.is_retryable());
    }

    #[test]
    fn test_capabilities_follow_provider_kind() {
        assert!(!ProviderCapabilities::for_kind(EmailProviderKind::Google).folders);
        assert!(ProviderCapabilities::for_kind(EmailProviderKind::Microsoft).folders);
    }

    #[test]
    fn test_create_provider_dispatches_on_kind() {
        let key = b"test-key";
        let token = lib_utils::crypt::encrypt("token", key).unwrap();
        let http_client = HttpClient::new();

        let gmail = create_email_provider(
            &http_client,
            &account(EmailProviderKind::Google, Some(token.clone())),
            settings(),
            key,
        )
        .unwrap();
        assert_eq!(gmail.kind(), EmailProviderKind::Google);

        let outlook = create_email_provider(
            &http_client,
            &account(EmailProviderKind::Microsoft, Some(token)),
            settings(),
            key,
        )
        .unwrap();
        assert_eq!(outlook.kind(), EmailProviderKind::Microsoft);
        assert!(outlook.capabilities().folders);
    }

    #[test]
    fn test_missing_token_is_auth_expired() {
        let result = create_email_provider(
            &HttpClient::new(),
            &account(EmailProviderKind::Google, None),
            settings(),
            b"key",
        );
        assert!(matches!(
            result,
            Err(AppError::Provider(ProviderError::AuthExpired))
        ));
    }
}
