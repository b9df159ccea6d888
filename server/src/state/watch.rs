use crate::{
    db_core::prelude::*,
    model::email_account::{EmailAccountCtrl, WatchStatus},
    error::AppResult,
    ServerState,
};

use super::processor::check_auth;

/// Subscribes to push notifications and stores the subscription.
pub async fn watch_account(
    state: &ServerState,
    account: &email_account::Model,
) -> AppResult<WatchStatus> {
    let provider = state.services.provider_for(&state.http_client, account)?;
    let subscription = check_auth(&state.conn, account, provider.watch().await).await?;

    tracing::info!(
        "Watching {} (subscription {}, expires {:?})",
        account.email,
        subscription.subscription_id,
        subscription.expiration
    );
    let account = EmailAccountCtrl::set_watch(&state.conn, &account.id, &subscription).await?;
    Ok(WatchStatus::from(&account))
}

pub async fn unwatch_account(
    state: &ServerState,
    account: &email_account::Model,
) -> AppResult<WatchStatus> {
    let provider = state.services.provider_for(&state.http_client, account)?;
    check_auth(
        &state.conn,
        account,
        provider
            .unwatch(account.watch_emails_subscription_id.as_deref())
            .await,
    )
    .await?;

    tracing::info!("Stopped watching {}", account.email);
    let account = EmailAccountCtrl::clear_watch(&state.conn, &account.id).await?;
    Ok(WatchStatus::from(&account))
}
