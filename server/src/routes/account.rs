use axum::{
    extract::{Path, State},
    Json,
};
use sea_orm::DatabaseConnection;

use crate::{
    error::AppJsonResult,
    model::email_account::{EmailAccountCtrl, WatchStatus},
    state::watch::{unwatch_account, watch_account},
    ServerState,
};

/// # GET /user/email-account/:email_account_id/watch-status
pub async fn watch_status(
    State(conn): State<DatabaseConnection>,
    Path(email_account_id): Path<String>,
) -> AppJsonResult<WatchStatus> {
    let status = EmailAccountCtrl::watch_status(&conn, &email_account_id).await?;
    Ok(Json(status))
}

/// # POST /email-account/:email_account_id/watch
pub async fn watch(
    State(state): State<ServerState>,
    Path(email_account_id): Path<String>,
) -> AppJsonResult<WatchStatus> {
    let account = EmailAccountCtrl::get_by_id(&state.conn, &email_account_id).await?;
    let status = watch_account(&state, &account).await?;
    Ok(Json(status))
}

/// # POST /email-account/:email_account_id/unwatch
pub async fn unwatch(
    State(state): State<ServerState>,
    Path(email_account_id): Path<String>,
) -> AppJsonResult<WatchStatus> {
    let account = EmailAccountCtrl::get_by_id(&state.conn, &email_account_id).await?;
    let status = unwatch_account(&state, &account).await?;
    Ok(Json(status))
}
