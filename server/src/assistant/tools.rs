//! Tools the assistant's language model can call on behalf of the user.
//!
//! Every call resolves to a JSON result. Failures come back as
//! `{"success": false, "message": ...}` so the model can explain them.

use chrono::{Duration, Utc};
use derive_more::derive::Display;
use indoc::indoc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{EnumIter, EnumString, IntoEnumIterator};

use crate::{
    db_core::prelude::*,
    email::{
        message::{decode_snippet, CanonicalMessage},
        provider::{DynEmailProvider, ProviderError},
        query::SearchQuery,
    },
    model::thread_tracker::{DynTrackerStore, NewTracker, TrackerCounts},
    notify::WebhookClient,
};

const NO_WEBHOOK_MESSAGE: &str =
    "No webhook URL configured. Please configure a webhook in Settings to enable task creation.";
const DEFAULT_NEEDS_REPLY_REASON: &str = "Marked as needs reply by AI assistant";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, EnumString, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum AssistantTool {
    GetTodaysEmails,
    MarkNeedsReply,
    CreateTaskFromEmail,
    GetEmailDetails,
    GetInboxStats,
}

impl AssistantTool {
    /// Stable name used in logs.
    pub fn log_name(self) -> &'static str {
        match self {
            AssistantTool::GetTodaysEmails => "get_todays_emails",
            AssistantTool::MarkNeedsReply => "mark_needs_reply",
            AssistantTool::CreateTaskFromEmail => "create_task_from_email",
            AssistantTool::GetEmailDetails => "get_email_details",
            AssistantTool::GetInboxStats => "get_inbox_stats",
        }
    }

    fn description(self) -> &'static str {
        match self {
            AssistantTool::GetTodaysEmails => indoc! {"
                Get emails received today (or in the last N hours). Returns unread emails with \
                subject, sender, and snippet. Use this to answer questions about today's inbox \
                or recent important emails."},
            AssistantTool::MarkNeedsReply => indoc! {"
                Mark an email thread as 'needs reply'. This adds it to the user's reply tracking \
                system so they can manage it later in the Reply Tracker."},
            AssistantTool::CreateTaskFromEmail => indoc! {"
                Create a task from an email by sending it to the user's configured task \
                management webhook. The webhook should be configured in settings first. Use this \
                when an email requires action that should become a task."},
            AssistantTool::GetEmailDetails => indoc! {"
                Get full details of a specific email including complete message content, \
                headers, and thread context. Use this when you need to deeply analyze an \
                email's content."},
            AssistantTool::GetInboxStats => indoc! {"
                Get statistics about the user's inbox including unread count, threads needing \
                reply, threads awaiting reply, and threads needing action."},
        }
    }

    fn input_schema(self) -> Value {
        match self {
            AssistantTool::GetTodaysEmails => json!({
                "type": "object",
                "properties": {
                    "hours": {
                        "type": "number",
                        "default": 24,
                        "description": "How many hours back to search (default: 24)"
                    },
                    "maxResults": {
                        "type": "number",
                        "default": 20,
                        "description": "Maximum number of emails to return (default: 20)"
                    },
                    "unreadOnly": {
                        "type": "boolean",
                        "default": true,
                        "description": "Only return unread emails (default: true)"
                    }
                }
            }),
            AssistantTool::MarkNeedsReply => json!({
                "type": "object",
                "properties": {
                    "threadId": { "type": "string", "description": "The thread ID to mark as needs reply" },
                    "messageId": { "type": "string", "description": "The message ID within the thread" },
                    "reason": { "type": "string", "description": "Optional note about why this needs a reply" }
                },
                "required": ["threadId", "messageId"]
            }),
            AssistantTool::CreateTaskFromEmail => json!({
                "type": "object",
                "properties": {
                    "threadId": { "type": "string", "description": "The thread ID" },
                    "messageId": { "type": "string", "description": "The message ID" },
                    "taskTitle": { "type": "string", "description": "Short title for the task" },
                    "taskDescription": { "type": "string", "description": "Description of what needs to be done" },
                    "priority": {
                        "type": "string",
                        "enum": ["low", "medium", "high"],
                        "description": "Task priority level"
                    },
                    "dueDate": { "type": "string", "description": "Due date in ISO format (YYYY-MM-DD)" }
                },
                "required": ["threadId", "messageId", "taskTitle", "taskDescription"]
            }),
            AssistantTool::GetEmailDetails => json!({
                "type": "object",
                "properties": {
                    "messageId": { "type": "string", "description": "The message ID to retrieve" },
                    "includeThread": {
                        "type": "boolean",
                        "default": false,
                        "description": "Include other messages in the thread"
                    }
                },
                "required": ["messageId"]
            }),
            AssistantTool::GetInboxStats => json!({ "type": "object", "properties": {} }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    AssistantTool::iter()
        .map(|tool| ToolDefinition {
            name: tool.to_string(),
            description: tool.description(),
            input_schema: tool.input_schema(),
        })
        .collect()
}

#[derive(Debug, Display)]
enum ToolError {
    #[display("Unknown tool '{_0}'")]
    UnknownTool(String),
    #[display("Invalid arguments: {_0}")]
    InvalidArguments(serde_json::Error),
    #[display("Invalid arguments: hours must be a positive number of at most 8784")]
    InvalidHours,
    #[display("Email account is not connected. Please reconnect your email account.")]
    NoProvider,
    #[display("{_0}")]
    Provider(ProviderError),
    #[display("Storage error: {_0}")]
    Store(DbErr),
}

impl From<ProviderError> for ToolError {
    fn from(e: ProviderError) -> Self {
        ToolError::Provider(e)
    }
}

impl From<DbErr> for ToolError {
    fn from(e: DbErr) -> Self {
        ToolError::Store(e)
    }
}

#[derive(Debug, Serialize)]
struct ToolFailure {
    success: bool,
    message: String,
}

impl ToolFailure {
    fn new(message: impl ToString) -> Self {
        Self {
            success: false,
            message: message.to_string(),
        }
    }
}

/// Longest window `getTodaysEmails` will search back over.
const MAX_LOOKBACK_HOURS: f64 = 24.0 * 366.0;

fn default_hours() -> f64 {
    24.0
}

fn default_max_results() -> u32 {
    20
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TodaysEmailsArgs {
    #[serde(default = "default_hours")]
    hours: f64,
    #[serde(default = "default_max_results")]
    max_results: u32,
    #[serde(default = "default_true")]
    unread_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailSummary {
    id: String,
    thread_id: String,
    from: Option<String>,
    subject: String,
    snippet: String,
    date: Option<String>,
    labels: Vec<String>,
    is_unread: bool,
}

impl From<&CanonicalMessage> for EmailSummary {
    fn from(message: &CanonicalMessage) -> Self {
        Self {
            id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            from: message.headers.from.clone(),
            subject: message
                .headers
                .subject
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "(No subject)".to_string()),
            snippet: decode_snippet(&message.snippet),
            date: message.headers.date.clone(),
            labels: message.label_ids.iter().cloned().collect(),
            is_unread: message.is_unread(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TodaysEmails {
    count: usize,
    emails: Vec<EmailSummary>,
    summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkNeedsReplyArgs {
    thread_id: String,
    message_id: String,
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkNeedsReplyResult {
    success: bool,
    message: String,
    tracker_id: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskArgs {
    thread_id: String,
    message_id: String,
    task_title: String,
    task_description: String,
    priority: Option<TaskPriority>,
    due_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskResult {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_response: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailDetailsArgs {
    message_id: String,
    #[serde(default)]
    include_thread: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentSummary {
    filename: String,
    mime_type: String,
    size: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThreadEntry {
    id: String,
    from: Option<String>,
    subject: Option<String>,
    date: Option<String>,
    snippet: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailDetails {
    id: String,
    thread_id: String,
    from: Option<String>,
    to: Option<String>,
    cc: Option<String>,
    subject: Option<String>,
    date: Option<String>,
    snippet: String,
    text_plain: Option<String>,
    text_html: Option<String>,
    labels: Vec<String>,
    attachments: Vec<AttachmentSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread: Option<Vec<ThreadEntry>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InboxStats {
    unread_in_inbox: Option<u64>,
    needs_reply: u64,
    awaiting_reply: u64,
    needs_action: u64,
    summary: String,
}

/// The tool set bound to one email account.
pub struct AssistantTools {
    email: String,
    email_account_id: String,
    /// `None` when the account has no usable access token.
    provider: Option<DynEmailProvider>,
    trackers: DynTrackerStore,
    webhooks: WebhookClient,
    webhook_url: Option<String>,
}

impl AssistantTools {
    pub fn new(
        email: String,
        email_account_id: String,
        provider: Option<DynEmailProvider>,
        trackers: DynTrackerStore,
        webhooks: WebhookClient,
        webhook_url: Option<String>,
    ) -> Self {
        Self {
            email,
            email_account_id,
            provider,
            trackers,
            webhooks,
            webhook_url: webhook_url.filter(|u| !u.trim().is_empty()),
        }
    }

    /// Runs a tool by name. Never fails; errors are returned as a failure result.
    pub async fn execute(&self, name: &str, args: Value) -> Value {
        let result = match name.parse::<AssistantTool>() {
            Ok(tool) => {
                tracing::info!(tool = tool.log_name(), email = %self.email, "Tool call");
                self.dispatch(tool, args).await
            }
            Err(_) => Err(ToolError::UnknownTool(name.to_string())),
        };

        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Tool {} failed for {}: {}", name, self.email, e);
                json!(ToolFailure::new(e))
            }
        }
    }

    async fn dispatch(&self, tool: AssistantTool, args: Value) -> Result<Value, ToolError> {
        match tool {
            AssistantTool::GetTodaysEmails => to_json(self.get_todays_emails(parse(args)?).await?),
            AssistantTool::MarkNeedsReply => to_json(self.mark_needs_reply(parse(args)?).await?),
            AssistantTool::CreateTaskFromEmail => {
                to_json(self.create_task_from_email(parse(args)?).await)
            }
            AssistantTool::GetEmailDetails => to_json(self.get_email_details(parse(args)?).await?),
            AssistantTool::GetInboxStats => to_json(self.get_inbox_stats().await?),
        }
    }

    fn provider(&self) -> Result<&DynEmailProvider, ToolError> {
        self.provider.as_ref().ok_or(ToolError::NoProvider)
    }

    async fn get_todays_emails(&self, args: TodaysEmailsArgs) -> Result<TodaysEmails, ToolError> {
        let provider = self.provider()?;
        if !args.hours.is_finite() || args.hours <= 0.0 || args.hours > MAX_LOOKBACK_HOURS {
            return Err(ToolError::InvalidHours);
        }
        let cutoff = Duration::try_seconds((args.hours * 3600.0) as i64)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or(ToolError::InvalidHours)?;
        let mut query = SearchQuery::new().after(cutoff.timestamp());
        if args.unread_only {
            query = query.unread();
        }

        let messages = provider.search_emails(&query, args.max_results).await?;
        let unread = if args.unread_only { "unread " } else { "" };
        if messages.is_empty() {
            return Ok(TodaysEmails {
                count: 0,
                emails: vec![],
                summary: format!("No {unread}emails found in the last {} hours.", args.hours),
            });
        }

        let emails: Vec<EmailSummary> = messages.iter().map(EmailSummary::from).collect();
        Ok(TodaysEmails {
            count: emails.len(),
            summary: format!(
                "Found {} {unread}emails in the last {} hours.",
                emails.len(),
                args.hours
            ),
            emails,
        })
    }

    async fn mark_needs_reply(
        &self,
        args: MarkNeedsReplyArgs,
    ) -> Result<MarkNeedsReplyResult, ToolError> {
        let outcome = self
            .trackers
            .mark(NewTracker {
                email_account_id: self.email_account_id.clone(),
                thread_id: args.thread_id,
                message_id: args.message_id,
                tracker_type: ThreadTrackerType::NeedsReply,
                reason: Some(
                    args.reason
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_NEEDS_REPLY_REASON.to_string()),
                ),
            })
            .await?;

        let message = if outcome.created {
            "Thread marked as needs reply. You can manage this in your Reply Tracker."
        } else {
            "This thread is already being tracked"
        };
        Ok(MarkNeedsReplyResult {
            success: true,
            message: message.to_string(),
            tracker_id: outcome.tracker.id,
        })
    }

    /// Every failure, including a missing webhook, is a `success: false` result.
    async fn create_task_from_email(&self, args: CreateTaskArgs) -> CreateTaskResult {
        let failure = |message: String| CreateTaskResult {
            success: false,
            message,
            webhook_response: None,
        };

        let Some(webhook_url) = self.webhook_url.as_deref() else {
            return failure(NO_WEBHOOK_MESSAGE.to_string());
        };
        let message = match self.provider() {
            Ok(provider) => provider.get_message(&args.message_id).await,
            Err(e) => return failure(format!("Failed to create task: {e}")),
        };
        let message = match message {
            Ok(message) => message,
            Err(e) => return failure(format!("Failed to create task: {e}")),
        };

        let mut task = json!({
            "title": args.task_title,
            "description": args.task_description,
            "priority": args.priority.unwrap_or_default(),
        });
        if let Some(due_date) = args.due_date {
            task["dueDate"] = json!(due_date);
        }
        let payload = json!({
            "action": "create_task",
            "task": task,
            "email": {
                "threadId": args.thread_id,
                "messageId": args.message_id,
                "subject": message.headers.subject,
                "from": message.headers.from,
                "snippet": decode_snippet(&message.snippet),
                "date": message.headers.date,
            },
        });

        match self.webhooks.post_json(webhook_url, &payload).await {
            Ok(response) => CreateTaskResult {
                success: true,
                message: format!("Task created: \"{}\"", args.task_title),
                webhook_response: Some(response),
            },
            Err(e) => {
                tracing::error!("Error calling task webhook: {}", e);
                failure(format!("Failed to create task: {e}"))
            }
        }
    }

    async fn get_email_details(&self, args: EmailDetailsArgs) -> Result<EmailDetails, ToolError> {
        let provider = self.provider()?;
        let message = provider.get_message(&args.message_id).await?;

        let thread = if args.include_thread {
            let thread = provider.get_thread(&message.thread_id).await?;
            Some(
                thread
                    .messages
                    .iter()
                    .map(|m| ThreadEntry {
                        id: m.id.clone(),
                        from: m.headers.from.clone(),
                        subject: m.headers.subject.clone(),
                        date: m.headers.date.clone(),
                        snippet: decode_snippet(&m.snippet),
                    })
                    .collect(),
            )
        } else {
            None
        };

        Ok(EmailDetails {
            snippet: decode_snippet(&message.snippet),
            labels: message.label_ids.iter().cloned().collect(),
            attachments: message
                .attachments
                .iter()
                .map(|a| AttachmentSummary {
                    filename: a.filename.clone(),
                    mime_type: a.mime_type.clone(),
                    size: a.size,
                })
                .collect(),
            id: message.id,
            thread_id: message.thread_id,
            from: message.headers.from,
            to: message.headers.to,
            cc: message.headers.cc,
            subject: message.headers.subject,
            date: message.headers.date,
            text_plain: message.text_plain,
            text_html: message.text_html,
            thread,
        })
    }

    async fn get_inbox_stats(&self) -> Result<InboxStats, ToolError> {
        let counts = self.trackers.count_unresolved(&self.email_account_id).await?;
        let unread = match &self.provider {
            Some(provider) => self.unread_in_inbox(provider).await,
            None => None,
        };

        Ok(InboxStats {
            unread_in_inbox: unread,
            needs_reply: counts.needs_reply,
            awaiting_reply: counts.awaiting_reply,
            needs_action: counts.needs_action,
            summary: stats_summary(unread, &counts),
        })
    }

    async fn unread_in_inbox(&self, provider: &DynEmailProvider) -> Option<u64> {
        match provider.unread_count().await {
            Ok(count) => return Some(count),
            Err(e) => tracing::warn!("Unread count unavailable for {}: {}", self.email, e),
        }
        let query = SearchQuery::new().unread().in_inbox();
        match provider.search_emails(&query, 500).await {
            Ok(messages) => Some(messages.len() as u64),
            Err(e) => {
                tracing::error!("Error getting unread count for {}: {}", self.email, e);
                None
            }
        }
    }
}

fn stats_summary(unread: Option<u64>, counts: &TrackerCounts) -> String {
    let unread = unread
        .map(|n| format!("{n} unread emails, "))
        .unwrap_or_default();
    format!(
        "You have {unread}{} threads needing reply, {} awaiting reply, and {} needing action.",
        counts.needs_reply, counts.awaiting_reply, counts.needs_action
    )
}

fn parse<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    // Tools without inputs may be called with `null`.
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(ToolError::InvalidArguments)
}

fn to_json<T: Serialize>(value: T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(ToolError::InvalidArguments)
}
