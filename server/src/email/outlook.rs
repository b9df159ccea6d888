use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use leaky_bucket::RateLimiter;
use lib_email_clients::outlook::{
    category_color, well_known_folders, GRAPH_ENDPOINT, GRAPH_SUBSCRIPTIONS_ENDPOINT,
    MAX_SUBSCRIPTION_MINUTES,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::{db_core::prelude::EmailProviderKind, util::new_id, HttpClient};

use super::{
    compose::{format_forward_body_html, parse_mailboxes, reply_recipients, reply_subject},
    message::{Attachment, CanonicalMessage, MessageHeaders, INBOX_LABEL, UNREAD_LABEL},
    provider::{
        check_response, EmailProvider, MessageThread, OutgoingEmail, ProviderError,
        ProviderResult, ProviderSettings, SentMessage, WatchSubscription,
    },
    query::SearchQuery,
};

macro_rules! graph_url {
    ($($params:expr),*) => {
        {
            let list_params = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", GRAPH_ENDPOINT, path)
        }
    };
}

const GRAPH_REQUESTS_PER_SECOND: usize = 10;

const MESSAGE_SELECT: &str = "id,conversationId,subject,from,toRecipients,ccRecipients,\
bccRecipients,replyTo,receivedDateTime,bodyPreview,body,isRead,categories,\
internetMessageId,parentFolderId,internetMessageHeaders";

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    value: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Recipient {
    #[serde(rename = "emailAddress")]
    email_address: EmailAddress,
}

impl Recipient {
    fn display(&self) -> String {
        let address = self.email_address.address.as_deref().unwrap_or_default();
        match self.email_address.name.as_deref() {
            Some(name) if !name.is_empty() && name != address => format!("{name} <{address}>"),
            _ => address.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ItemBody {
    #[serde(rename = "contentType")]
    content_type: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct InternetHeader {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment {
    id: Option<String>,
    name: Option<String>,
    content_type: Option<String>,
    size: Option<u64>,
    #[serde(default)]
    is_inline: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    conversation_id: Option<String>,
    subject: Option<String>,
    from: Option<Recipient>,
    #[serde(default)]
    to_recipients: Vec<Recipient>,
    #[serde(default)]
    cc_recipients: Vec<Recipient>,
    #[serde(default)]
    bcc_recipients: Vec<Recipient>,
    #[serde(default)]
    reply_to: Vec<Recipient>,
    received_date_time: Option<String>,
    body_preview: Option<String>,
    body: Option<ItemBody>,
    #[serde(default)]
    is_read: bool,
    #[serde(default)]
    categories: Vec<String>,
    internet_message_id: Option<String>,
    parent_folder_id: Option<String>,
    #[serde(default)]
    internet_message_headers: Vec<InternetHeader>,
    #[serde(default)]
    attachments: Vec<GraphAttachment>,
}

fn join_recipients(recipients: &[Recipient]) -> Option<String> {
    if recipients.is_empty() {
        return None;
    }
    Some(
        recipients
            .iter()
            .map(Recipient::display)
            .collect::<Vec<_>>()
            .join(", "),
    )
}

fn to_recipients(addresses: &[String]) -> Vec<Value> {
    addresses
        .iter()
        .flat_map(|value| match parse_mailboxes("recipient", value) {
            Ok(mailboxes) => mailboxes
                .into_iter()
                .map(|mb| match mb.name {
                    Some(name) => json!({ "emailAddress": { "name": name, "address": mb.email.to_string() } }),
                    None => json!({ "emailAddress": { "address": mb.email.to_string() } }),
                })
                .collect::<Vec<_>>(),
            Err(_) => vec![json!({ "emailAddress": { "address": value } })],
        })
        .collect()
}

impl GraphMessage {
    fn into_canonical(self, inbox_folder_id: Option<&str>) -> CanonicalMessage {
        let header = |name: &str| {
            self.internet_message_headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone())
        };

        let headers = MessageHeaders {
            subject: self.subject.clone(),
            from: self.from.as_ref().map(Recipient::display),
            to: join_recipients(&self.to_recipients),
            cc: join_recipients(&self.cc_recipients),
            bcc: join_recipients(&self.bcc_recipients),
            date: self.received_date_time.clone(),
            message_id: self.internet_message_id.clone(),
            reply_to: join_recipients(&self.reply_to),
            in_reply_to: header("In-Reply-To"),
            references: header("References"),
        };

        let mut label_ids = self.categories.iter().cloned().collect::<IndexSet<_>>();
        if !self.is_read {
            label_ids.insert(UNREAD_LABEL.to_string());
        }
        if inbox_folder_id.is_some() && self.parent_folder_id.as_deref() == inbox_folder_id {
            label_ids.insert(INBOX_LABEL.to_string());
        }

        let (text_plain, text_html) = match self.body {
            Some(body) if body.content_type.eq_ignore_ascii_case("html") => {
                (None, Some(body.content))
            }
            Some(body) => (Some(body.content), None),
            None => (None, None),
        };

        let (inline, attachments): (Vec<_>, Vec<_>) = self
            .attachments
            .into_iter()
            .map(|a| {
                let is_inline = a.is_inline;
                let attachment = Attachment {
                    filename: a.name.unwrap_or_default(),
                    mime_type: a.content_type.unwrap_or_default(),
                    size: a.size.unwrap_or(0),
                    attachment_id: a.id.unwrap_or_default(),
                    headers: IndexMap::new(),
                };
                (is_inline, attachment)
            })
            .partition(|(is_inline, _)| *is_inline);

        CanonicalMessage {
            thread_id: self.conversation_id.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            history_id: String::new(),
            headers,
            snippet: self.body_preview.unwrap_or_default(),
            text_plain,
            text_html,
            label_ids,
            attachments: attachments.into_iter().map(|(_, a)| a).collect(),
            inline: inline.into_iter().map(|(_, a)| a).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailFolder {
    id: String,
    display_name: Option<String>,
    unread_item_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterCategory {
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Subscription {
    id: String,
    expiration_date_time: Option<DateTime<Utc>>,
}

pub struct OutlookProvider {
    http_client: HttpClient,
    access_token: String,
    email_address: String,
    rate_limiter: Arc<RateLimiter>,
    settings: ProviderSettings,
    /// Lowercased folder display name -> folder id
    folder_ids: RwLock<HashMap<String, String>>,
}

impl OutlookProvider {
    pub fn new(
        http_client: HttpClient,
        access_token: String,
        email_address: String,
        settings: ProviderSettings,
    ) -> Self {
        let rate_limiter = Arc::new(
            RateLimiter::builder()
                .initial(GRAPH_REQUESTS_PER_SECOND)
                .interval(Duration::from_secs(1))
                .max(GRAPH_REQUESTS_PER_SECOND)
                .refill(GRAPH_REQUESTS_PER_SECOND)
                .build(),
        );

        Self {
            http_client,
            access_token,
            email_address,
            rate_limiter,
            settings,
            folder_ids: RwLock::new(HashMap::new()),
        }
    }

    async fn send<F>(&self, label: &str, build: F) -> ProviderResult<reqwest::Response>
    where
        F: Fn(&HttpClient) -> reqwest::RequestBuilder + Send + Sync,
    {
        let build = &build;
        let this = self;
        self.settings
            .retry
            .run(label, move || async move {
                this.rate_limiter.acquire_one().await;
                let resp = build(&this.http_client)
                    .bearer_auth(&this.access_token)
                    .timeout(this.settings.timeout)
                    .send()
                    .await?;
                check_response(resp).await
            })
            .await
    }

    async fn send_json<T, F>(&self, label: &str, build: F) -> ProviderResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&HttpClient) -> reqwest::RequestBuilder + Send + Sync,
    {
        let resp = self.send(label, build).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::Other(format!("Could not parse {label} response: {e}")))
    }

    async fn inbox_folder(&self) -> ProviderResult<MailFolder> {
        self.send_json("mailFolders.get", |c| {
            c.get(graph_url!("mailFolders", well_known_folders::INBOX))
        })
        .await
    }

    async fn fetch_messages(&self, url: String, params: Vec<(String, String)>) -> ProviderResult<Vec<CanonicalMessage>> {
        let list: GraphList<GraphMessage> = self
            .send_json("messages.list", |c| c.get(&url).query(&params))
            .await?;
        let inbox_id = self.inbox_folder().await.ok().map(|f| f.id);

        Ok(list
            .value
            .into_iter()
            .map(|m| m.into_canonical(inbox_id.as_deref()))
            .collect())
    }

    /// Resolves a folder by display name, creating it when missing.
    async fn ensure_folder(&self, name: &str) -> ProviderResult<String> {
        let key = name.to_lowercase();
        if let Some(id) = self.folder_ids.read().await.get(&key) {
            return Ok(id.clone());
        }

        let filter = format!("displayName eq '{}'", name.replace('\'', "''"));
        let existing: GraphList<MailFolder> = self
            .send_json("mailFolders.list", |c| {
                c.get(graph_url!("mailFolders"))
                    .query(&[("$filter", filter.as_str())])
            })
            .await?;

        let id = match existing.value.into_iter().next() {
            Some(folder) => folder.id,
            None => {
                let body = json!({ "displayName": name });
                let created: MailFolder = self
                    .send_json("mailFolders.create", |c| {
                        c.post(graph_url!("mailFolders")).json(&body)
                    })
                    .await?;
                tracing::info!(
                    "Created Outlook folder {} for {}",
                    created.display_name.as_deref().unwrap_or(name),
                    self.email_address
                );
                created.id
            }
        };

        self.folder_ids.write().await.insert(key, id.clone());
        Ok(id)
    }

    async fn ensure_category(&self, name: &str) -> ProviderResult<()> {
        let categories: GraphList<MasterCategory> = self
            .send_json("masterCategories.list", |c| {
                c.get(graph_url!("outlook", "masterCategories"))
            })
            .await?;
        if categories
            .value
            .iter()
            .any(|c| c.display_name.eq_ignore_ascii_case(name))
        {
            return Ok(());
        }

        let body = json!({ "displayName": name, "color": category_color(name) });
        match self
            .send("masterCategories.create", |c| {
                c.post(graph_url!("outlook", "masterCategories")).json(&body)
            })
            .await
        {
            Ok(_) => Ok(()),
            // Created concurrently
            Err(ProviderError::Other(msg)) if msg.contains("409") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn move_message(&self, message_id: &str, destination_id: &str) -> ProviderResult<()> {
        let body = json!({ "destinationId": destination_id });
        self.send("messages.move", |c| {
            c.post(graph_url!("messages", message_id, "move")).json(&body)
        })
        .await?;
        Ok(())
    }

    fn reply_body(original: &CanonicalMessage, reply: &OutgoingEmail) -> Value {
        let mut message = json!({
            "toRecipients": to_recipients(&reply_recipients(original, reply)),
            "ccRecipients": to_recipients(&reply.cc),
            "bccRecipients": to_recipients(&reply.bcc),
        });
        if let Some(subject) = &reply.subject {
            message["subject"] = json!(subject);
        } else {
            message["subject"] = json!(reply_subject(original.subject()));
        }
        json!({ "message": message, "comment": reply.content })
    }
}

#[async_trait]
impl EmailProvider for OutlookProvider {
    fn kind(&self) -> EmailProviderKind {
        EmailProviderKind::Microsoft
    }

    fn email_address(&self) -> &str {
        &self.email_address
    }

    async fn search_emails(
        &self,
        query: &SearchQuery,
        max_results: u32,
    ) -> ProviderResult<Vec<CanonicalMessage>> {
        let url = if query.in_inbox {
            graph_url!("mailFolders", well_known_folders::INBOX, "messages")
        } else {
            graph_url!("messages")
        };

        let mut params = vec![
            ("$top".to_string(), max_results.to_string()),
            ("$select".to_string(), MESSAGE_SELECT.to_string()),
        ];
        // Graph rejects $search combined with $filter or $orderby, so those
        // clauses are applied locally when free text is present.
        let search = query.to_graph_search();
        match &search {
            Some(search) => params.push(("$search".to_string(), search.clone())),
            None => {
                if let Some(filter) = query.to_graph_filter() {
                    params.push(("$filter".to_string(), filter));
                }
                params.push(("$orderby".to_string(), "receivedDateTime desc".to_string()));
            }
        }

        let messages = self.fetch_messages(url, params).await?;
        if search.is_none() {
            return Ok(messages);
        }

        let after = query.after_datetime();
        Ok(messages
            .into_iter()
            .filter(|m| !query.unread || m.is_unread())
            .filter(|m| match (after, m.headers.date.as_deref()) {
                (Some(after), Some(date)) => DateTime::parse_from_rfc3339(date)
                    .map(|d| d.with_timezone(&Utc) >= after)
                    .unwrap_or(true),
                _ => true,
            })
            .collect())
    }

    async fn get_message(&self, message_id: &str) -> ProviderResult<CanonicalMessage> {
        let message: GraphMessage = self
            .send_json("messages.get", |c| {
                c.get(graph_url!("messages", message_id)).query(&[
                    ("$select", MESSAGE_SELECT),
                    ("$expand", "attachments($select=id,name,contentType,size,isInline)"),
                ])
            })
            .await?;
        let inbox_id = self.inbox_folder().await.ok().map(|f| f.id);
        Ok(message.into_canonical(inbox_id.as_deref()))
    }

    async fn get_thread(&self, thread_id: &str) -> ProviderResult<MessageThread> {
        let params = vec![
            (
                "$filter".to_string(),
                format!("conversationId eq '{}'", thread_id.replace('\'', "''")),
            ),
            ("$select".to_string(), MESSAGE_SELECT.to_string()),
        ];
        let mut messages = self.fetch_messages(graph_url!("messages"), params).await?;
        messages.sort_by(|a, b| a.headers.date.cmp(&b.headers.date));

        Ok(MessageThread {
            id: thread_id.to_string(),
            messages,
        })
    }

    async fn unread_count(&self) -> ProviderResult<u64> {
        let inbox = self.inbox_folder().await?;
        Ok(inbox.unread_item_count.unwrap_or(0).max(0) as u64)
    }

    async fn apply_label(&self, message: &CanonicalMessage, label: &str) -> ProviderResult<()> {
        self.ensure_category(label).await?;

        let mut categories = message
            .label_ids
            .iter()
            .filter(|l| l.as_str() != UNREAD_LABEL && l.as_str() != INBOX_LABEL)
            .cloned()
            .collect::<IndexSet<_>>();
        categories.insert(label.to_string());
        let body = json!({ "categories": categories });

        self.send("messages.update", |c| {
            c.patch(graph_url!("messages", message.id.as_str())).json(&body)
        })
        .await?;
        Ok(())
    }

    async fn move_to_folder(&self, message: &CanonicalMessage, folder: &str) -> ProviderResult<()> {
        let folder_id = self.ensure_folder(folder).await?;
        self.move_message(&message.id, &folder_id).await
    }

    async fn archive(&self, message: &CanonicalMessage) -> ProviderResult<()> {
        self.move_message(&message.id, well_known_folders::ARCHIVE)
            .await
    }

    async fn mark_read(&self, message: &CanonicalMessage) -> ProviderResult<()> {
        let body = json!({ "isRead": true });
        self.send("messages.update", |c| {
            c.patch(graph_url!("messages", message.id.as_str())).json(&body)
        })
        .await?;
        Ok(())
    }

    async fn mark_spam(&self, message: &CanonicalMessage) -> ProviderResult<()> {
        self.move_message(&message.id, well_known_folders::JUNK)
            .await
    }

    async fn send_reply(
        &self,
        original: &CanonicalMessage,
        reply: &OutgoingEmail,
    ) -> ProviderResult<SentMessage> {
        let body = Self::reply_body(original, reply);
        self.send("messages.reply", |c| {
            c.post(graph_url!("messages", original.id.as_str(), "reply"))
                .json(&body)
        })
        .await?;

        // Graph answers 202 without the sent message.
        Ok(SentMessage {
            id: None,
            thread_id: Some(original.thread_id.clone()),
        })
    }

    async fn create_draft(
        &self,
        original: &CanonicalMessage,
        reply: &OutgoingEmail,
    ) -> ProviderResult<SentMessage> {
        let body = Self::reply_body(original, reply);
        let draft: GraphMessage = self
            .send_json("messages.createReply", |c| {
                c.post(graph_url!("messages", original.id.as_str(), "createReply"))
                    .json(&body)
            })
            .await?;

        Ok(SentMessage {
            thread_id: draft
                .conversation_id
                .or_else(|| Some(original.thread_id.clone())),
            id: Some(draft.id),
        })
    }

    async fn send_forward(
        &self,
        original: &CanonicalMessage,
        forward: &OutgoingEmail,
    ) -> ProviderResult<SentMessage> {
        if forward.to.is_empty() {
            return Err(ProviderError::Other("Forward requires a recipient".to_string()));
        }
        let body = json!({
            "toRecipients": to_recipients(&forward.to),
            "comment": format_forward_body_html(&forward.content, original),
        });
        self.send("messages.forward", |c| {
            c.post(graph_url!("messages", original.id.as_str(), "forward"))
                .json(&body)
        })
        .await?;

        Ok(SentMessage {
            id: None,
            thread_id: None,
        })
    }

    async fn watch(&self) -> ProviderResult<WatchSubscription> {
        let expiration = Utc::now() + chrono::Duration::minutes(MAX_SUBSCRIPTION_MINUTES);
        let body = json!({
            "changeType": "created",
            "notificationUrl": self.settings.graph_notification_url,
            "resource": "/me/mailFolders('inbox')/messages",
            "expirationDateTime": expiration.to_rfc3339(),
            "clientState": new_id(),
        });
        let subscription: Subscription = self
            .send_json("subscriptions.create", |c| {
                c.post(GRAPH_SUBSCRIPTIONS_ENDPOINT).json(&body)
            })
            .await?;

        Ok(WatchSubscription {
            subscription_id: subscription.id,
            expiration: subscription.expiration_date_time.or(Some(expiration)),
            history_id: None,
        })
    }

    async fn unwatch(&self, subscription_id: Option<&str>) -> ProviderResult<()> {
        let Some(id) = subscription_id else {
            return Ok(());
        };
        let url = format!("{}/{}", GRAPH_SUBSCRIPTIONS_ENDPOINT, id);
        match self.send("subscriptions.delete", |c| c.delete(&url)).await {
            Ok(_) | Err(ProviderError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_message() -> GraphMessage {
        serde_json::from_value(json!({
            "id": "AAMk1",
            "conversationId": "conv-1",
            "subject": "Quarterly report",
            "from": { "emailAddress": { "name": "Ana", "address": "ana@example.com" } },
            "toRecipients": [{ "emailAddress": { "address": "me@example.com" } }],
            "receivedDateTime": "2026-10-01T09:30:00Z",
            "bodyPreview": "Numbers attached",
            "body": { "contentType": "html", "content": "<p>Numbers attached</p>" },
            "isRead": false,
            "categories": ["Finance"],
            "internetMessageId": "<abc@example.com>",
            "parentFolderId": "inbox-id",
            "internetMessageHeaders": [
                { "name": "In-Reply-To", "value": "<prev@example.com>" }
            ],
            "attachments": [
                { "id": "att-1", "name": "q3.pdf", "contentType": "application/pdf", "size": 2048, "isInline": false },
                { "id": "att-2", "name": "logo.png", "contentType": "image/png", "size": 10, "isInline": true }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_graph_message_to_canonical() {
        let message = graph_message().into_canonical(Some("inbox-id"));

        assert_eq!(message.id, "AAMk1");
        assert_eq!(message.thread_id, "conv-1");
        assert_eq!(message.from(), "Ana <ana@example.com>");
        assert_eq!(message.headers.to.as_deref(), Some("me@example.com"));
        assert_eq!(message.headers.in_reply_to.as_deref(), Some("<prev@example.com>"));
        assert_eq!(message.text_html.as_deref(), Some("<p>Numbers attached</p>"));
        assert!(message.text_plain.is_none());
        assert!(message.is_unread());
        assert!(message.label_ids.contains("Finance"));
        assert!(message.label_ids.contains(INBOX_LABEL));
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].filename, "q3.pdf");
        assert_eq!(message.inline.len(), 1);
    }

    #[test]
    fn test_read_message_outside_inbox() {
        let mut graph = graph_message();
        graph.is_read = true;
        let message = graph.into_canonical(Some("other-folder"));
        assert!(!message.is_unread());
        assert!(!message.label_ids.contains(INBOX_LABEL));
    }

    #[test]
    fn test_reply_body_defaults_to_sender() {
        let original = graph_message().into_canonical(None);
        let reply = OutgoingEmail {
            content: "Thanks!".to_string(),
            ..Default::default()
        };
        let body = OutlookProvider::reply_body(&original, &reply);
        assert_eq!(body["comment"], "Thanks!");
        assert_eq!(body["message"]["subject"], "Re: Quarterly report");
        let recipient = &body["message"]["toRecipients"][0]["emailAddress"];
        assert_eq!(recipient["address"], "ana@example.com");
        assert_eq!(recipient["name"], "Ana");
    }
}
