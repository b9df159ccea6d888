use std::future::Future;

use anyhow::anyhow;
use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};

use crate::{
    db_core::prelude::*,
    email::{
        message::CanonicalMessage,
        provider::{DynEmailProvider, ProviderError, ProviderResult},
        query::SearchQuery,
    },
    error::{AppError, AppResult},
    model::email_account::EmailAccountCtrl,
    rules::ApplicationReport,
    server_config::cfg,
    ServerState,
};

const CONCURRENT_MESSAGES: usize = 4;

/// Runs `work` on its own task and waits for it. The work keeps going when the
/// caller is dropped, e.g. on a request timeout or a client disconnect.
pub async fn run_detached<T, F>(work: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| AppError::Internal(anyhow!("Detached task failed: {e}")))?
}

/// Flags the account when the provider rejected its credentials.
pub async fn check_auth<T>(
    conn: &DatabaseConnection,
    account: &email_account::Model,
    result: ProviderResult<T>,
) -> AppResult<T> {
    match result {
        Err(ProviderError::AuthExpired) => {
            EmailAccountCtrl::flag_needs_reauthentication(conn, &account.id).await?;
            Err(ProviderError::AuthExpired.into())
        }
        other => other.map_err(AppError::from),
    }
}

async fn apply_rules(
    state: &ServerState,
    account: &email_account::Model,
    provider: DynEmailProvider,
    message: &CanonicalMessage,
) -> AppResult<ApplicationReport> {
    let executor = state.services.executor(provider);
    let report = state
        .services
        .engine
        .process_message(&account.id, message, &executor)
        .await?;
    Ok(report)
}

/// Runs the account's rules on one message.
pub async fn process_message(
    state: &ServerState,
    email_account_id: &str,
    message_id: &str,
) -> AppResult<ApplicationReport> {
    let account = EmailAccountCtrl::get_by_id(&state.conn, email_account_id).await?;
    let provider = state.services.provider_for(&state.http_client, &account)?;
    let message = check_auth(&state.conn, &account, provider.get_message(message_id).await).await?;

    apply_rules(state, &account, provider, &message).await
}

async fn process_all(
    state: &ServerState,
    account: &email_account::Model,
    provider: &DynEmailProvider,
    messages: Vec<CanonicalMessage>,
) -> usize {
    let results: Vec<_> = stream::iter(messages)
        .map(|message| {
            let provider = provider.clone();
            async move {
                let result = apply_rules(state, account, provider, &message).await;
                (message.id, result)
            }
        })
        .buffer_unordered(CONCURRENT_MESSAGES)
        .collect()
        .await;

    let mut processed = 0;
    for (message_id, result) in results {
        match result {
            Ok(report) => {
                tracing::debug!("Message {} for {}: {:?}", message_id, account.email, report.status);
                processed += 1;
            }
            Err(e) => tracing::error!(
                "Error processing message {} for {}: {:?}",
                message_id,
                account.email,
                e
            ),
        }
    }
    processed
}

/// Gmail push: `historyId` only says something changed, so recent inbox messages
/// are re-read. Already processed messages are skipped by the engine.
pub async fn process_gmail_push(
    state: &ServerState,
    email_address: &str,
    history_id: &str,
) -> AppResult<usize> {
    let account = EmailAccountCtrl::get_by_email(&state.conn, email_address).await?;
    let provider = state.services.provider_for(&state.http_client, &account)?;

    let since = Utc::now() - Duration::minutes(cfg.engine.inbound_lookback_minutes);
    let query = SearchQuery::new().in_inbox().after(since.timestamp());
    let messages = check_auth(
        &state.conn,
        &account,
        provider
            .search_emails(&query, cfg.engine.max_messages_per_notification)
            .await,
    )
    .await?;

    let processed = process_all(state, &account, &provider, messages).await;
    EmailAccountCtrl::set_last_history_id(&state.conn, &account.id, history_id).await?;

    tracing::info!(
        "Gmail push for {} (history {}): processed {} messages",
        account.email,
        history_id,
        processed
    );
    Ok(processed)
}

/// Graph notification: the changed message ids are named directly.
pub async fn process_outlook_notification(
    state: &ServerState,
    subscription_id: &str,
    message_ids: Vec<String>,
) -> AppResult<usize> {
    let account = EmailAccountCtrl::get_by_subscription_id(&state.conn, subscription_id).await?;
    let provider = state.services.provider_for(&state.http_client, &account)?;

    let mut messages = Vec::with_capacity(message_ids.len());
    for message_id in message_ids {
        match provider.get_message(&message_id).await {
            Ok(message) => messages.push(message),
            Err(ProviderError::NotFound(_)) => {
                tracing::debug!("Message {} is gone, skipping", message_id);
            }
            Err(ProviderError::AuthExpired) => {
                check_auth(&state.conn, &account, Err::<(), _>(ProviderError::AuthExpired))
                    .await?;
            }
            Err(e) => tracing::error!("Error fetching message {}: {}", message_id, e),
        }
    }

    let processed = process_all(state, &account, &provider, messages).await;
    tracing::info!(
        "Outlook notification for {}: processed {} messages",
        account.email,
        processed
    );
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration as StdDuration,
    };

    use super::*;

    #[tokio::test]
    async fn test_detached_work_survives_dropped_caller() {
        let done = Arc::new(AtomicBool::new(false));
        let (tx, rx) = tokio::sync::oneshot::channel();

        let work = {
            let done = done.clone();
            async move {
                tokio::time::sleep(StdDuration::from_millis(100)).await;
                done.store(true, Ordering::SeqCst);
                let _ = tx.send(());
                Ok(())
            }
        };
        let caller = tokio::time::timeout(StdDuration::from_millis(10), run_detached(work)).await;

        assert!(caller.is_err());
        assert!(!done.load(Ordering::SeqCst));
        rx.await.unwrap();
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_detached_panic_is_an_internal_error() {
        let result: AppResult<()> = run_detached(async { panic!("boom") }).await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }
}
