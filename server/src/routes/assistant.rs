use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::{
    assistant::{tool_definitions, AssistantTools, ToolDefinition},
    error::AppJsonResult,
    model::{email_account::EmailAccountCtrl, user::UserCtrl},
    prompt::llm_config::{provider_options, ProviderOption},
    server_config::cfg,
    state::processor,
    ServerState,
};

/// # GET /assistant/tools
pub async fn list_tools() -> Json<Vec<ToolDefinition>> {
    Json(tool_definitions())
}

/// # GET /llm/providers
pub async fn list_llm_providers() -> Json<Vec<ProviderOption>> {
    Json(provider_options(cfg.llm.ollama_model()))
}

/// # POST /email-account/:email_account_id/assistant/tools/:tool_name
///
/// Tool failures are part of the JSON result, not an error status.
pub async fn invoke_tool(
    State(state): State<ServerState>,
    Path((email_account_id, tool_name)): Path<(String, String)>,
    args: Option<Json<Value>>,
) -> AppJsonResult<Value> {
    let account = EmailAccountCtrl::get_by_id(&state.conn, &email_account_id).await?;
    let webhook_url = UserCtrl::webhook_url_for_account(&state.conn, &account.id).await?;
    let provider = match state.services.provider_for(&state.http_client, &account) {
        Ok(provider) => Some(provider),
        Err(e) => {
            tracing::warn!("No email provider for {}: {:?}", account.email, e);
            None
        }
    };

    let tools = AssistantTools::new(
        account.email.clone(),
        account.id.clone(),
        provider,
        state.services.trackers.clone(),
        state.services.webhooks.clone(),
        webhook_url,
    );
    let args = args.map(|Json(v)| v).unwrap_or(Value::Null);
    let result =
        processor::run_detached(async move { Ok(tools.execute(&tool_name, args).await) }).await?;
    Ok(Json(result))
}
