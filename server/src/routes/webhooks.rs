use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};

use crate::{
    error::{AppError, AppResult},
    state::processor,
    ServerState,
};

#[derive(Debug, Deserialize)]
pub struct PubSubPush {
    pub message: PubSubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    pub data: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailNotification {
    pub email_address: String,
    #[serde(deserialize_with = "number_or_string")]
    pub history_id: String,
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    })
}

/// Pub/Sub wraps the Gmail notification in base64 JSON.
pub fn decode_gmail_push(push: &PubSubPush) -> AppResult<GmailNotification> {
    let data = STANDARD
        .decode(push.message.data.trim())
        .map_err(|_| AppError::BadRequest("Push data is not valid base64".to_string()))?;

    serde_json::from_slice(&data)
        .map_err(|e| AppError::BadRequest(format!("Invalid Gmail notification: {e}")))
}

/// # POST /webhooks/google
pub async fn google(State(state): State<ServerState>, body: Bytes) -> AppResult<StatusCode> {
    let push: PubSubPush = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid Pub/Sub push: {e}")))?;
    let notification = decode_gmail_push(&push)?;

    tracing::info!(
        "Gmail push for {} (history {})",
        notification.email_address,
        notification.history_id
    );
    tokio::spawn(async move {
        if let Err(e) = processor::process_gmail_push(
            &state,
            &notification.email_address,
            &notification.history_id,
        )
        .await
        {
            tracing::error!(
                "Error processing Gmail push for {}: {:?}",
                notification.email_address,
                e
            );
        }
    });

    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlookValidation {
    pub validation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GraphNotificationBatch {
    #[serde(default)]
    pub value: Vec<GraphNotification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNotification {
    pub subscription_id: String,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub resource_data: Option<GraphResourceData>,
}

#[derive(Debug, Deserialize)]
pub struct GraphResourceData {
    pub id: Option<String>,
}

impl GraphNotification {
    /// `resourceData.id`, else the last segment of `Users/{user}/Messages/{id}`.
    fn message_id(&self) -> Option<String> {
        self.resource_data
            .as_ref()
            .and_then(|data| data.id.clone())
            .or_else(|| {
                self.resource
                    .as_deref()
                    .and_then(|resource| resource.rsplit('/').next())
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
            })
    }
}

/// Message ids per subscription, in arrival order without duplicates.
pub fn group_notifications(batch: GraphNotificationBatch) -> IndexMap<String, Vec<String>> {
    let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
    for notification in batch.value {
        let Some(message_id) = notification.message_id() else {
            continue;
        };
        let ids = grouped.entry(notification.subscription_id).or_default();
        if !ids.contains(&message_id) {
            ids.push(message_id);
        }
    }
    grouped
}

/// # POST /webhooks/outlook
///
/// Graph validates a new subscription by posting `?validationToken=` and expects it echoed
/// back as plain text.
pub async fn outlook(
    State(state): State<ServerState>,
    Query(validation): Query<OutlookValidation>,
    body: Bytes,
) -> AppResult<Response> {
    if let Some(token) = validation.validation_token {
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            token,
        )
            .into_response());
    }

    let batch: GraphNotificationBatch = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid Graph notification: {e}")))?;

    for (subscription_id, message_ids) in group_notifications(batch) {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) =
                processor::process_outlook_notification(&state, &subscription_id, message_ids)
                    .await
            {
                tracing::error!(
                    "Error processing Outlook notification for subscription {}: {:?}",
                    subscription_id,
                    e
                );
            }
        });
    }

    Ok(StatusCode::ACCEPTED.into_response())
}
