use std::collections::HashMap;

use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};

use crate::{
    db_core::prelude::*,
    error::AppResult,
    model::email_account::EmailAccountCtrl,
    ServerState,
};

use super::watch::watch_account;

const DUE_BATCH_SIZE: u64 = 100;
const CONCURRENT_ACCOUNTS: usize = 10;
const WATCH_RENEWAL_WINDOW_HOURS: i64 = 24;

/// Runs deferred rule actions that have come due, once each.
pub async fn run_due_actions(state: ServerState) -> AppResult<usize> {
    let jobs = state
        .services
        .scheduler
        .due(Utc::now(), DUE_BATCH_SIZE)
        .await?;
    if jobs.is_empty() {
        return Ok(0);
    }
    tracing::info!("Running {} due actions", jobs.len());

    let mut by_account: HashMap<String, Vec<scheduled_action::Model>> = HashMap::new();
    for job in jobs {
        by_account
            .entry(job.email_account_id.clone())
            .or_default()
            .push(job);
    }

    let counts: Vec<usize> = stream::iter(by_account)
        .map(|(email_account_id, jobs)| {
            let state = &state;
            async move {
                match run_account_jobs(state, &email_account_id, &jobs).await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!(
                            "Error running due actions for account {}: {:?}",
                            email_account_id,
                            e
                        );
                        0
                    }
                }
            }
        })
        .buffer_unordered(CONCURRENT_ACCOUNTS)
        .collect()
        .await;

    Ok(counts.into_iter().sum())
}

async fn run_account_jobs(
    state: &ServerState,
    email_account_id: &str,
    jobs: &[scheduled_action::Model],
) -> AppResult<usize> {
    let services = &state.services;
    let account = EmailAccountCtrl::get_by_id(&state.conn, email_account_id).await?;
    let provider = match services.provider_for(&state.http_client, &account) {
        Ok(provider) => provider,
        Err(e) => {
            for job in jobs {
                services
                    .scheduler
                    .complete(&job.id, ScheduledActionStatus::Failed, Some(e.to_string()))
                    .await?;
            }
            return Err(e);
        }
    };

    let executor = services.executor(provider);
    let mut completed = 0;
    for job in jobs {
        let status = services.engine.run_deferred(job, &executor).await?;
        if status == ScheduledActionStatus::Completed {
            completed += 1;
        }
    }
    Ok(completed)
}

/// Renews push subscriptions that expire within the renewal window.
pub async fn renew_expiring_watches(state: ServerState) -> AppResult<usize> {
    let cutoff = Utc::now() + Duration::hours(WATCH_RENEWAL_WINDOW_HOURS);
    let accounts = EmailAccountCtrl::watches_expiring_before(&state.conn, cutoff).await?;
    tracing::info!("Renewing {} expiring watches", accounts.len());

    let mut renewed = 0;
    for account in accounts {
        match watch_account(&state, &account).await {
            Ok(_) => renewed += 1,
            Err(e) => tracing::error!("Failed to renew watch for {}: {:?}", account.email, e),
        }
    }
    Ok(renewed)
}
