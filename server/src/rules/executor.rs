use derive_more::derive::Display;
use serde_json::json;

use crate::{
    db_core::prelude::*,
    email::{
        message::{decode_snippet, CanonicalMessage},
        provider::{DynEmailProvider, OutgoingEmail, ProviderError},
    },
    model::{
        digest::{DynDigestQueue, NewDigestItem},
        thread_tracker::{DynTrackerStore, NewTracker},
    },
    notify::{WebhookClient, WebhookError},
};

use super::{
    model::{ActionField, ActionFields},
    resolver::ResolvedAction,
    schema::action_type_name,
};

#[derive(Debug, Display)]
pub enum ExecutionError {
    #[display("{_0}")]
    Provider(ProviderError),
    #[display("{_0}")]
    Webhook(WebhookError),
    #[display("Storage error: {_0}")]
    Store(DbErr),
    #[display("Missing {_0} for action")]
    MissingField(ActionField),
}

impl std::error::Error for ExecutionError {}

impl From<ProviderError> for ExecutionError {
    fn from(e: ProviderError) -> Self {
        ExecutionError::Provider(e)
    }
}

impl From<WebhookError> for ExecutionError {
    fn from(e: WebhookError) -> Self {
        ExecutionError::Webhook(e)
    }
}

impl From<DbErr> for ExecutionError {
    fn from(e: DbErr) -> Self {
        ExecutionError::Store(e)
    }
}

/// The rule and message an action runs for.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub email_account_id: &'a str,
    pub rule_id: &'a str,
    pub rule_name: &'a str,
    pub message: &'a CanonicalMessage,
}

/// Applies resolved actions through the account's provider and stores.
#[derive(Clone)]
pub struct ActionExecutor {
    provider: DynEmailProvider,
    trackers: DynTrackerStore,
    digests: DynDigestQueue,
    webhooks: WebhookClient,
}

fn required(fields: &ActionFields, field: ActionField) -> Result<&str, ExecutionError> {
    fields.get(field).ok_or(ExecutionError::MissingField(field))
}

fn outgoing(fields: &ActionFields) -> OutgoingEmail {
    let list = |field| fields.get(field).map(|v| vec![v.to_string()]).unwrap_or_default();
    OutgoingEmail {
        to: list(ActionField::To),
        cc: list(ActionField::Cc),
        bcc: list(ActionField::Bcc),
        subject: fields.get(ActionField::Subject).map(str::to_string),
        content: fields.get(ActionField::Content).unwrap_or_default().to_string(),
    }
}

impl ActionExecutor {
    pub fn new(
        provider: DynEmailProvider,
        trackers: DynTrackerStore,
        digests: DynDigestQueue,
        webhooks: WebhookClient,
    ) -> Self {
        Self {
            provider,
            trackers,
            digests,
            webhooks,
        }
    }

    pub fn provider(&self) -> &DynEmailProvider {
        &self.provider
    }

    pub async fn execute(
        &self,
        ctx: ExecutionContext<'_>,
        action: &ResolvedAction,
    ) -> Result<(), ExecutionError> {
        let message = ctx.message;
        let fields = &action.fields;
        tracing::debug!(
            "Executing {} (#{}) of rule {} on message {}",
            action_type_name(action.action_type),
            action.index,
            ctx.rule_name,
            message.id
        );

        match action.action_type {
            ActionType::Label => {
                let label = required(fields, ActionField::Label)?;
                self.provider.apply_label(message, label).await?;
            }
            ActionType::MoveFolder => {
                let folder = required(fields, ActionField::FolderName)?;
                if !self.provider.capabilities().folders {
                    return Err(ProviderError::Unsupported(
                        "Folders are not available for this email provider".to_string(),
                    )
                    .into());
                }
                self.provider.move_to_folder(message, folder).await?;
            }
            ActionType::Archive => self.provider.archive(message).await?,
            ActionType::MarkRead => self.provider.mark_read(message).await?,
            ActionType::MarkSpam => self.provider.mark_spam(message).await?,
            ActionType::DraftEmail => {
                required(fields, ActionField::Content)?;
                self.provider.create_draft(message, &outgoing(fields)).await?;
                self.trackers
                    .mark(NewTracker {
                        email_account_id: ctx.email_account_id.to_string(),
                        thread_id: message.thread_id.clone(),
                        message_id: message.id.clone(),
                        tracker_type: ThreadTrackerType::NeedsReply,
                        reason: Some(format!("Draft created by rule \"{}\"", ctx.rule_name)),
                    })
                    .await?;
            }
            ActionType::Reply => {
                required(fields, ActionField::Content)?;
                let sent = self.provider.send_reply(message, &outgoing(fields)).await?;
                self.trackers
                    .resolve_thread(
                        ctx.email_account_id,
                        &message.thread_id,
                        ThreadTrackerType::NeedsReply,
                    )
                    .await?;
                self.trackers
                    .mark(NewTracker {
                        email_account_id: ctx.email_account_id.to_string(),
                        thread_id: sent.thread_id.unwrap_or_else(|| message.thread_id.clone()),
                        message_id: sent.id.unwrap_or_else(|| message.id.clone()),
                        tracker_type: ThreadTrackerType::Awaiting,
                        reason: Some(format!("Replied by rule \"{}\"", ctx.rule_name)),
                    })
                    .await?;
            }
            ActionType::Forward => {
                required(fields, ActionField::To)?;
                self.provider.send_forward(message, &outgoing(fields)).await?;
            }
            ActionType::Digest => {
                let queued = self
                    .digests
                    .enqueue(NewDigestItem {
                        email_account_id: ctx.email_account_id.to_string(),
                        rule_id: ctx.rule_id.to_string(),
                        message_id: message.id.clone(),
                        thread_id: message.thread_id.clone(),
                        subject: message.headers.subject.clone(),
                        sender: message.headers.from.clone(),
                        snippet: decode_snippet(&message.snippet),
                    })
                    .await?;
                if !queued {
                    tracing::debug!("Message {} already in digest", message.id);
                }
            }
            ActionType::CallWebhook => {
                let url = required(fields, ActionField::WebhookUrl)?;
                let payload = json!({
                    "action": "rule_action",
                    "rule": { "id": ctx.rule_id, "name": ctx.rule_name },
                    "actionType": action.action_type,
                    "fields": fields,
                    "email": {
                        "threadId": message.thread_id,
                        "messageId": message.id,
                        "subject": message.subject(),
                        "from": message.from(),
                        "snippet": decode_snippet(&message.snippet),
                        "date": message.headers.date,
                    },
                });
                self.webhooks.post_json(url, &payload).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::http::StatusCode;

    use super::*;
    use crate::{
        email::message::MessageHeaders,
        model::thread_tracker::TrackerStore,
        testing::{
            common::WebhookServer,
            fakes::{FakeProvider, InMemoryDigestQueue, InMemoryTrackerStore, ProviderCall},
        },
        HttpClient,
    };

    struct Harness {
        provider: Arc<FakeProvider>,
        trackers: Arc<InMemoryTrackerStore>,
        digests: Arc<InMemoryDigestQueue>,
        executor: ActionExecutor,
    }

    fn harness(kind: EmailProviderKind) -> Harness {
        let provider = Arc::new(FakeProvider::new(kind));
        let trackers = Arc::new(InMemoryTrackerStore::default());
        let digests = Arc::new(InMemoryDigestQueue::default());
        let executor = ActionExecutor::new(
            provider.clone(),
            trackers.clone(),
            digests.clone(),
            WebhookClient::new(HttpClient::new(), Duration::from_secs(5)),
        );
        Harness {
            provider,
            trackers,
            digests,
            executor,
        }
    }

    fn message() -> CanonicalMessage {
        CanonicalMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            snippet: "Can you send the &quot;Q3&quot; numbers?".to_string(),
            headers: MessageHeaders {
                from: Some("ana@example.com".to_string()),
                subject: Some("Q3".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn resolved(action_type: ActionType, fields: &[(ActionField, &str)]) -> ResolvedAction {
        let mut action_fields = ActionFields::default();
        for (field, value) in fields {
            action_fields.set(*field, value.to_string());
        }
        ResolvedAction {
            index: 0,
            action_type,
            fields: action_fields,
        }
    }

    fn ctx(message: &CanonicalMessage) -> ExecutionContext<'_> {
        ExecutionContext {
            email_account_id: "acc-1",
            rule_id: "rule-1",
            rule_name: "Finance",
            message,
        }
    }

    #[tokio::test]
    async fn test_label_applies_through_provider() {
        let h = harness(EmailProviderKind::Google);
        let msg = message();
        h.executor
            .execute(ctx(&msg), &resolved(ActionType::Label, &[(ActionField::Label, "Finance")]))
            .await
            .unwrap();

        assert_eq!(
            h.provider.calls(),
            vec![ProviderCall::ApplyLabel("m1".to_string(), "Finance".to_string())]
        );
    }

    #[tokio::test]
    async fn test_move_folder_unsupported_on_gmail() {
        let h = harness(EmailProviderKind::Google);
        let msg = message();
        let err = h
            .executor
            .execute(
                ctx(&msg),
                &resolved(ActionType::MoveFolder, &[(ActionField::FolderName, "Finance")]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Provider(ProviderError::Unsupported(_))));
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reply_moves_thread_to_awaiting() {
        let h = harness(EmailProviderKind::Microsoft);
        let msg = message();
        h.trackers
            .mark(NewTracker {
                email_account_id: "acc-1".to_string(),
                thread_id: "t1".to_string(),
                message_id: "m1".to_string(),
                tracker_type: ThreadTrackerType::NeedsReply,
                reason: None,
            })
            .await
            .unwrap();

        h.executor
            .execute(ctx(&msg), &resolved(ActionType::Reply, &[(ActionField::Content, "On it")]))
            .await
            .unwrap();

        let unresolved = h.trackers.unresolved("acc-1");
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].r#type, ThreadTrackerType::Awaiting);
        assert!(matches!(h.provider.calls()[0], ProviderCall::SendReply(_, _)));
    }

    #[tokio::test]
    async fn test_missing_field_fails_before_provider_call() {
        let h = harness(EmailProviderKind::Google);
        let msg = message();
        let err = h
            .executor
            .execute(ctx(&msg), &resolved(ActionType::Forward, &[]))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::MissingField(ActionField::To)));
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_digest_enqueues_once() {
        let h = harness(EmailProviderKind::Google);
        let msg = message();
        let action = resolved(ActionType::Digest, &[]);
        h.executor.execute(ctx(&msg), &action).await.unwrap();
        h.executor.execute(ctx(&msg), &action).await.unwrap();

        let items = h.digests.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].snippet, "Can you send the \"Q3\" numbers?");
    }

    #[tokio::test]
    async fn test_call_webhook_posts_rule_action() {
        let h = harness(EmailProviderKind::Google);
        let server = WebhookServer::start(StatusCode::OK, "ok").await;
        let msg = message();
        let url = server.url();

        h.executor
            .execute(
                ctx(&msg),
                &resolved(ActionType::CallWebhook, &[(ActionField::WebhookUrl, url.as_str())]),
            )
            .await
            .unwrap();

        let received = server.received().await;
        assert_eq!(received[0]["action"], "rule_action");
        assert_eq!(received[0]["actionType"], "CALL_WEBHOOK");
        assert_eq!(received[0]["rule"]["name"], "Finance");
        assert_eq!(received[0]["email"]["messageId"], "m1");
        server.shutdown().await;
    }
}
