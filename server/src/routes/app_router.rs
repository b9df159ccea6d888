use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    BoxError, Router,
};
use http::HeaderValue;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::{error::AppError, request_tracing, ServerState};

use super::{account, assistant, rules, webhooks};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        let origins = ["https://localhost:3000", "http://localhost:3000"]
            .into_iter()
            .map(|origin| origin.parse::<HeaderValue>().unwrap())
            .collect::<Vec<_>>();

        let cors_layer = CorsLayer::new()
            .allow_origin(origins)
            .allow_credentials(true);

        let timeout_layer = ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_timeout_error))
            .timeout(REQUEST_TIMEOUT);

        let email_account = Router::new()
            .route("/watch", post(account::watch))
            .route("/unwatch", post(account::unwatch))
            .route("/rules", get(rules::list).post(rules::create))
            .route("/rules/available-actions", get(rules::available_actions))
            .route(
                "/messages/:message_id/process",
                post(rules::process_message),
            )
            .route(
                "/assistant/tools/:tool_name",
                post(assistant::invoke_tool),
            );

        Router::new()
            .route("/", get(|| async { "Inbox server" }))
            .route(
                "/user/email-account/:email_account_id/watch-status",
                get(account::watch_status),
            )
            .nest("/email-account/:email_account_id", email_account)
            .route("/assistant/tools", get(assistant::list_tools))
            .route("/llm/providers", get(assistant::list_llm_providers))
            .route("/webhooks/google", post(webhooks::google))
            .route("/webhooks/outlook", post(webhooks::outlook))
            .layer(timeout_layer)
            .layer(request_tracing::trace_with_request_id_layer())
            .layer(cors_layer)
            .with_state(state)
            .fallback(handler_404)
    }
}

async fn handle_timeout_error(err: BoxError) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::RequestTimeout
    } else {
        AppError::Internal(anyhow::anyhow!("Unhandled internal error: {err}"))
    }
}

pub async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}
