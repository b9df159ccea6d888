extern crate google_gmail1 as gmail1;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::DateTime;
use futures::future::try_join_all;
use gmail1::api::{Draft, Label, ListLabelsResponse, ListMessagesResponse, Message, Thread, WatchResponse};
use lazy_static::lazy_static;
use leaky_bucket::RateLimiter;
use lib_email_clients::gmail::{
    api_quota::{GMAIL_API_QUOTA, GMAIL_QUOTA_PER_SECOND},
    label_colors::GmailLabelColorMap,
    system_labels,
};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::RwLock;

use crate::{db_core::prelude::EmailProviderKind, HttpClient};

use super::{
    compose::{build_forward, build_reply, encode_raw},
    message::CanonicalMessage,
    provider::{
        check_response, EmailProvider, MessageThread, OutgoingEmail, ProviderError,
        ProviderResult, ProviderSettings, SentMessage, WatchSubscription,
    },
    query::SearchQuery,
};

macro_rules! gmail_url {
    ($($params:expr),*) => {
        {
            let list_params = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", lib_email_clients::gmail::GMAIL_ENDPOINT, path)
        }
    };
}

lazy_static! {
    static ref COLOR_MAP: Lazy<GmailLabelColorMap> = Lazy::new(GmailLabelColorMap::new);
}

pub struct GmailProvider {
    http_client: HttpClient,
    access_token: String,
    email_address: String,
    rate_limiter: Arc<RateLimiter>,
    settings: ProviderSettings,
    /// Lowercased label name -> label id
    label_ids: RwLock<Option<HashMap<String, String>>>,
}

impl GmailProvider {
    pub fn new(
        http_client: HttpClient,
        access_token: String,
        email_address: String,
        settings: ProviderSettings,
    ) -> Self {
        let rate_limiter = Arc::new(
            RateLimiter::builder()
                .initial(GMAIL_QUOTA_PER_SECOND)
                .interval(Duration::from_secs(1))
                .max(GMAIL_QUOTA_PER_SECOND)
                .refill(GMAIL_QUOTA_PER_SECOND)
                .build(),
        );

        Self {
            http_client,
            access_token,
            email_address,
            rate_limiter,
            settings,
            label_ids: RwLock::new(None),
        }
    }

    async fn send<F>(&self, label: &str, cost: usize, build: F) -> ProviderResult<reqwest::Response>
    where
        F: Fn(&HttpClient) -> reqwest::RequestBuilder + Send + Sync,
    {
        let build = &build;
        let this = self;
        self.settings
            .retry
            .run(label, move || async move {
                this.rate_limiter.acquire(cost).await;
                let resp = build(&this.http_client)
                    .bearer_auth(&this.access_token)
                    .timeout(this.settings.timeout)
                    .send()
                    .await?;
                check_response(resp).await
            })
            .await
    }

    async fn send_json<T, F>(&self, label: &str, cost: usize, build: F) -> ProviderResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&HttpClient) -> reqwest::RequestBuilder + Send + Sync,
    {
        let resp = self.send(label, cost, build).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::Other(format!("Could not parse {label} response: {e}")))
    }

    async fn get_raw_message(&self, message_id: &str) -> ProviderResult<Message> {
        self.send_json("messages.get", GMAIL_API_QUOTA.messages_get, |c| {
            c.get(gmail_url!("messages", message_id))
                .query(&[("format", "full")])
        })
        .await
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> ProviderResult<()> {
        let body = json!({
            "addLabelIds": add,
            "removeLabelIds": remove,
        });
        self.send("messages.modify", GMAIL_API_QUOTA.messages_modify, |c| {
            c.post(gmail_url!("messages", message_id, "modify"))
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn load_labels(&self) -> ProviderResult<HashMap<String, String>> {
        if let Some(labels) = self.label_ids.read().await.as_ref() {
            return Ok(labels.clone());
        }

        let response: ListLabelsResponse = self
            .send_json("labels.list", GMAIL_API_QUOTA.labels_list, |c| {
                c.get(gmail_url!("labels"))
            })
            .await?;
        let labels = response
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|l| Some((l.name?.to_lowercase(), l.id?)))
            .collect::<HashMap<_, _>>();

        *self.label_ids.write().await = Some(labels.clone());
        Ok(labels)
    }

    /// Finds a user label by name, creating it when missing.
    async fn ensure_label(&self, name: &str) -> ProviderResult<String> {
        if let Some(id) = self.load_labels().await?.get(&name.to_lowercase()) {
            return Ok(id.clone());
        }

        let label = Label {
            type_: Some("user".to_string()),
            color: Some(COLOR_MAP.get(name)),
            name: Some(name.to_string()),
            message_list_visibility: Some("show".to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            ..Default::default()
        };
        let created: Label = self
            .send_json("labels.create", GMAIL_API_QUOTA.labels_create, |c| {
                c.post(gmail_url!("labels")).json(&label)
            })
            .await?;
        let id = created
            .id
            .ok_or_else(|| ProviderError::Other(format!("Label '{name}' created without an id")))?;

        tracing::info!("Created Gmail label {} for {}", name, self.email_address);
        if let Some(labels) = self.label_ids.write().await.as_mut() {
            labels.insert(name.to_lowercase(), id.clone());
        }
        Ok(id)
    }

    async fn send_raw(&self, raw: String, thread_id: Option<&str>) -> ProviderResult<SentMessage> {
        let mut body = json!({ "raw": raw });
        if let Some(tid) = thread_id {
            body["threadId"] = json!(tid);
        }
        let sent: Message = self
            .send_json("messages.send", GMAIL_API_QUOTA.messages_send, |c| {
                c.post(gmail_url!("messages", "send")).json(&body)
            })
            .await?;

        Ok(SentMessage {
            id: sent.id,
            thread_id: sent.thread_id,
        })
    }
}

#[async_trait]
impl EmailProvider for GmailProvider {
    fn kind(&self) -> EmailProviderKind {
        EmailProviderKind::Google
    }

    fn email_address(&self) -> &str {
        &self.email_address
    }

    async fn search_emails(
        &self,
        query: &SearchQuery,
        max_results: u32,
    ) -> ProviderResult<Vec<CanonicalMessage>> {
        let params = [
            ("q".to_string(), query.to_gmail_q()),
            ("maxResults".to_string(), max_results.to_string()),
        ];
        let list: ListMessagesResponse = self
            .send_json("messages.list", GMAIL_API_QUOTA.messages_list, |c| {
                c.get(gmail_url!("messages")).query(&params)
            })
            .await?;

        let ids = list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect::<Vec<_>>();

        try_join_all(ids.iter().map(|id| self.get_message(id))).await
    }

    async fn get_message(&self, message_id: &str) -> ProviderResult<CanonicalMessage> {
        let message = self.get_raw_message(message_id).await?;
        Ok(CanonicalMessage::from_gmail_message(&message))
    }

    async fn get_thread(&self, thread_id: &str) -> ProviderResult<MessageThread> {
        let thread: Thread = self
            .send_json("threads.get", GMAIL_API_QUOTA.threads_get, |c| {
                c.get(gmail_url!("threads", thread_id))
                    .query(&[("format", "full")])
            })
            .await?;

        Ok(MessageThread {
            id: thread.id.unwrap_or_else(|| thread_id.to_string()),
            messages: thread
                .messages
                .unwrap_or_default()
                .iter()
                .map(CanonicalMessage::from_gmail_message)
                .collect(),
        })
    }

    async fn unread_count(&self) -> ProviderResult<u64> {
        let inbox: Label = self
            .send_json("labels.get", GMAIL_API_QUOTA.labels_get, |c| {
                c.get(gmail_url!("labels", system_labels::INBOX))
            })
            .await?;
        Ok(inbox.messages_unread.unwrap_or(0).max(0) as u64)
    }

    async fn apply_label(&self, message: &CanonicalMessage, label: &str) -> ProviderResult<()> {
        let label_id = self.ensure_label(label).await?;
        self.modify_labels(&message.id, &[label_id.as_str()], &[]).await
    }

    async fn move_to_folder(
        &self,
        _message: &CanonicalMessage,
        folder: &str,
    ) -> ProviderResult<()> {
        Err(ProviderError::Unsupported(format!(
            "Gmail has no folders, cannot move to '{folder}'"
        )))
    }

    async fn archive(&self, message: &CanonicalMessage) -> ProviderResult<()> {
        self.modify_labels(&message.id, &[], &[system_labels::INBOX])
            .await
    }

    async fn mark_read(&self, message: &CanonicalMessage) -> ProviderResult<()> {
        self.modify_labels(&message.id, &[], &[system_labels::UNREAD])
            .await
    }

    async fn mark_spam(&self, message: &CanonicalMessage) -> ProviderResult<()> {
        self.modify_labels(&message.id, &[system_labels::SPAM], &[system_labels::INBOX])
            .await
    }

    async fn send_reply(
        &self,
        original: &CanonicalMessage,
        reply: &OutgoingEmail,
    ) -> ProviderResult<SentMessage> {
        let (message, context) = build_reply(&self.email_address, original, reply)?;
        self.send_raw(encode_raw(&message), context.thread_id.as_deref())
            .await
    }

    async fn create_draft(
        &self,
        original: &CanonicalMessage,
        reply: &OutgoingEmail,
    ) -> ProviderResult<SentMessage> {
        let (message, context) = build_reply(&self.email_address, original, reply)?;
        let mut draft_message = json!({ "raw": encode_raw(&message) });
        if let Some(tid) = &context.thread_id {
            draft_message["threadId"] = json!(tid);
        }
        let body = json!({ "message": draft_message });

        let draft: Draft = self
            .send_json("drafts.create", GMAIL_API_QUOTA.drafts_create, |c| {
                c.post(gmail_url!("drafts")).json(&body)
            })
            .await?;

        Ok(SentMessage {
            id: draft.id,
            thread_id: context.thread_id,
        })
    }

    async fn send_forward(
        &self,
        original: &CanonicalMessage,
        forward: &OutgoingEmail,
    ) -> ProviderResult<SentMessage> {
        let message = build_forward(&self.email_address, original, forward)?;
        self.send_raw(encode_raw(&message), None).await
    }

    async fn watch(&self) -> ProviderResult<WatchSubscription> {
        let body = json!({
            "topicName": self.settings.gmail_topic,
            "labelIds": [system_labels::INBOX],
            "labelFilterBehavior": "INCLUDE",
        });
        let resp: WatchResponse = self
            .send_json("watch", GMAIL_API_QUOTA.watch, |c| {
                c.post(gmail_url!("watch")).json(&body)
            })
            .await?;

        let history_id = resp.history_id.map(|h| h.to_string());
        Ok(WatchSubscription {
            // Gmail has no subscription id; the starting history id identifies the watch.
            subscription_id: history_id.clone().unwrap_or_else(|| self.email_address.clone()),
            expiration: resp.expiration.and_then(DateTime::from_timestamp_millis),
            history_id,
        })
    }

    async fn unwatch(&self, _subscription_id: Option<&str>) -> ProviderResult<()> {
        self.send("stop", GMAIL_API_QUOTA.stop, |c| c.post(gmail_url!("stop")))
            .await?;
        Ok(())
    }
}
