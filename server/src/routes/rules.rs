use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::{
    db_core::prelude::ActionType,
    email::provider::ProviderCapabilities,
    error::{AppJsonResult, AppResult},
    model::{email_account::EmailAccountCtrl, rule::RuleCtrl},
    rules::{
        model::Rule,
        schema::{allowed_actions, CreateRuleSchema},
        ApplicationReport,
    },
    state::processor,
    ServerState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableActions {
    actions: Vec<ActionType>,
    capabilities: ProviderCapabilities,
}

/// # GET /email-account/:email_account_id/rules
pub async fn list(
    State(conn): State<DatabaseConnection>,
    Path(email_account_id): Path<String>,
) -> AppJsonResult<Vec<Rule>> {
    EmailAccountCtrl::get_by_id(&conn, &email_account_id).await?;
    let rules = RuleCtrl::list(&conn, &email_account_id).await?;
    Ok(Json(rules))
}

/// # GET /email-account/:email_account_id/rules/available-actions
pub async fn available_actions(
    State(conn): State<DatabaseConnection>,
    Path(email_account_id): Path<String>,
) -> AppJsonResult<AvailableActions> {
    let account = EmailAccountCtrl::get_by_id(&conn, &email_account_id).await?;
    let capabilities = ProviderCapabilities::for_kind(account.provider);
    Ok(Json(AvailableActions {
        actions: allowed_actions(capabilities),
        capabilities,
    }))
}

/// # POST /email-account/:email_account_id/rules
pub async fn create(
    State(conn): State<DatabaseConnection>,
    Path(email_account_id): Path<String>,
    Json(schema): Json<CreateRuleSchema>,
) -> AppResult<(StatusCode, Json<Rule>)> {
    let account = EmailAccountCtrl::get_by_id(&conn, &email_account_id).await?;
    schema.validate(ProviderCapabilities::for_kind(account.provider))?;

    let rule = RuleCtrl::create(&conn, &account.id, &schema).await?;
    tracing::info!("Created rule \"{}\" for {}", rule.name, account.email);
    Ok((StatusCode::CREATED, Json(rule)))
}

/// # POST /email-account/:email_account_id/messages/:message_id/process
pub async fn process_message(
    State(state): State<ServerState>,
    Path((email_account_id, message_id)): Path<(String, String)>,
) -> AppJsonResult<ApplicationReport> {
    let report = processor::run_detached(async move {
        processor::process_message(&state, &email_account_id, &message_id).await
    })
    .await?;
    Ok(Json(report))
}
