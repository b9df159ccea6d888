//! In-memory stand-ins for the provider, the language model and the stores.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration as StdDuration,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{
    db_core::prelude::*,
    email::{
        message::{CanonicalMessage, INBOX_LABEL},
        provider::{
            EmailProvider, MessageThread, OutgoingEmail, ProviderError, ProviderResult,
            SentMessage, WatchSubscription,
        },
        query::SearchQuery,
    },
    model::{
        digest::{DigestQueue, NewDigestItem},
        execution::{ExecutionLedger, ExecutionRecord},
        rule::RuleStore,
        scheduled_action::ActionScheduler,
        thread_tracker::{MarkOutcome, NewTracker, TrackerCounts, TrackerStore},
    },
    prompt::{Judgement, LanguageModel, ModelError},
    rules::{model::Rule, resolver::DeferredJob},
    util::new_id,
};

/// Language model with canned answers that counts its calls.
#[derive(Default)]
pub struct ScriptedModel {
    judgement: Option<bool>,
    replies: HashMap<String, String>,
    fail: bool,
    latency: StdDuration,
    judge_calls: AtomicUsize,
    generate_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn judging(matched: bool) -> Self {
        Self {
            judgement: Some(matched),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Answers placeholder instructions from `replies`; unknown instructions fail.
    pub fn generating(replies: &[(&str, &str)]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    /// Every answer takes `latency` to arrive.
    pub fn with_latency(mut self, latency: StdDuration) -> Self {
        self.latency = latency;
        self
    }

    pub fn judge_calls(&self) -> usize {
        self.judge_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn judge(
        &self,
        _message: &CanonicalMessage,
        instruction: &str,
    ) -> Result<Judgement, ModelError> {
        self.judge_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if self.fail {
            return Err(ModelError::Transient("scripted failure".to_string()));
        }
        match self.judgement {
            Some(matched) => Ok(Judgement {
                matched,
                rationale: format!("scripted answer for '{instruction}'"),
            }),
            None => Err(ModelError::Rejected("no judgement scripted".to_string())),
        }
    }

    async fn generate(
        &self,
        _message: &CanonicalMessage,
        instruction: &str,
    ) -> Result<String, ModelError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if self.fail {
            return Err(ModelError::Transient("scripted failure".to_string()));
        }
        self.replies
            .get(instruction)
            .cloned()
            .ok_or_else(|| ModelError::InvalidResponse(format!("no reply for '{instruction}'")))
    }
}

/// A mutating call made against [`FakeProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    ApplyLabel(String, String),
    MoveToFolder(String, String),
    Archive(String),
    MarkRead(String),
    MarkSpam(String),
    SendReply(String, OutgoingEmail),
    CreateDraft(String, OutgoingEmail),
    SendForward(String, OutgoingEmail),
    Watch,
    Unwatch(Option<String>),
}

/// In-memory mailbox. Records mutating calls in order; reads are not recorded.
pub struct FakeProvider {
    kind: EmailProviderKind,
    messages: Mutex<Vec<CanonicalMessage>>,
    calls: Mutex<Vec<ProviderCall>>,
    failures: Mutex<HashMap<String, ProviderError>>,
    unread_count: Mutex<Option<u64>>,
}

impl FakeProvider {
    pub fn new(kind: EmailProviderKind) -> Self {
        Self {
            kind,
            messages: Mutex::new(vec![]),
            calls: Mutex::new(vec![]),
            failures: Mutex::new(HashMap::new()),
            unread_count: Mutex::new(None),
        }
    }

    pub fn add_message(&self, message: CanonicalMessage) {
        self.messages.lock().unwrap().push(message);
    }

    /// Makes every call to `operation` (the trait method name) fail with `error`.
    pub fn fail_on(&self, operation: &str, error: ProviderError) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation.to_string(), error);
    }

    pub fn set_unread_count(&self, count: u64) {
        *self.unread_count.lock().unwrap() = Some(count);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, operation: &str) -> ProviderResult<()> {
        match self.failures.lock().unwrap().get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, operation: &str, call: ProviderCall) -> ProviderResult<()> {
        self.check(operation)?;
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    fn sent(original: &CanonicalMessage) -> SentMessage {
        SentMessage {
            id: Some(new_id()),
            thread_id: Some(original.thread_id.clone()),
        }
    }
}

fn message_time(message: &CanonicalMessage) -> Option<DateTime<Utc>> {
    message
        .headers
        .date
        .as_deref()
        .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
        .map(|d| d.with_timezone(&Utc))
}

#[async_trait]
impl EmailProvider for FakeProvider {
    fn kind(&self) -> EmailProviderKind {
        self.kind
    }

    fn email_address(&self) -> &str {
        "me@example.com"
    }

    async fn search_emails(
        &self,
        query: &SearchQuery,
        max_results: u32,
    ) -> ProviderResult<Vec<CanonicalMessage>> {
        self.check("search_emails")?;
        let after = query.after_datetime();
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !query.unread || m.is_unread())
            .filter(|m| !query.in_inbox || m.label_ids.contains(INBOX_LABEL))
            .filter(|m| match (after, message_time(m)) {
                (Some(after), Some(sent)) => sent > after,
                _ => true,
            })
            .take(max_results as usize)
            .cloned()
            .collect())
    }

    async fn get_message(&self, message_id: &str) -> ProviderResult<CanonicalMessage> {
        self.check("get_message")?;
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(message_id.to_string()))
    }

    async fn get_thread(&self, thread_id: &str) -> ProviderResult<MessageThread> {
        self.check("get_thread")?;
        let messages: Vec<_> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect();
        if messages.is_empty() {
            return Err(ProviderError::NotFound(thread_id.to_string()));
        }
        Ok(MessageThread {
            id: thread_id.to_string(),
            messages,
        })
    }

    async fn unread_count(&self) -> ProviderResult<u64> {
        self.check("unread_count")?;
        if let Some(count) = *self.unread_count.lock().unwrap() {
            return Ok(count);
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.is_unread() && m.label_ids.contains(INBOX_LABEL))
            .count() as u64)
    }

    async fn apply_label(&self, message: &CanonicalMessage, label: &str) -> ProviderResult<()> {
        self.record(
            "apply_label",
            ProviderCall::ApplyLabel(message.id.clone(), label.to_string()),
        )
    }

    async fn move_to_folder(
        &self,
        message: &CanonicalMessage,
        folder: &str,
    ) -> ProviderResult<()> {
        if !self.capabilities().folders {
            return Err(ProviderError::Unsupported("folders".to_string()));
        }
        self.record(
            "move_to_folder",
            ProviderCall::MoveToFolder(message.id.clone(), folder.to_string()),
        )
    }

    async fn archive(&self, message: &CanonicalMessage) -> ProviderResult<()> {
        self.record("archive", ProviderCall::Archive(message.id.clone()))
    }

    async fn mark_read(&self, message: &CanonicalMessage) -> ProviderResult<()> {
        self.record("mark_read", ProviderCall::MarkRead(message.id.clone()))
    }

    async fn mark_spam(&self, message: &CanonicalMessage) -> ProviderResult<()> {
        self.record("mark_spam", ProviderCall::MarkSpam(message.id.clone()))
    }

    async fn send_reply(
        &self,
        original: &CanonicalMessage,
        reply: &OutgoingEmail,
    ) -> ProviderResult<SentMessage> {
        self.record(
            "send_reply",
            ProviderCall::SendReply(original.id.clone(), reply.clone()),
        )?;
        Ok(Self::sent(original))
    }

    async fn create_draft(
        &self,
        original: &CanonicalMessage,
        reply: &OutgoingEmail,
    ) -> ProviderResult<SentMessage> {
        self.record(
            "create_draft",
            ProviderCall::CreateDraft(original.id.clone(), reply.clone()),
        )?;
        Ok(Self::sent(original))
    }

    async fn send_forward(
        &self,
        original: &CanonicalMessage,
        forward: &OutgoingEmail,
    ) -> ProviderResult<SentMessage> {
        self.record(
            "send_forward",
            ProviderCall::SendForward(original.id.clone(), forward.clone()),
        )?;
        Ok(SentMessage {
            id: Some(new_id()),
            thread_id: None,
        })
    }

    async fn watch(&self) -> ProviderResult<WatchSubscription> {
        self.record("watch", ProviderCall::Watch)?;
        Ok(WatchSubscription {
            subscription_id: "sub-1".to_string(),
            expiration: Some(Utc::now() + Duration::days(7)),
            history_id: Some("1000".to_string()),
        })
    }

    async fn unwatch(&self, subscription_id: Option<&str>) -> ProviderResult<()> {
        self.record(
            "unwatch",
            ProviderCall::Unwatch(subscription_id.map(str::to_string)),
        )
    }
}

#[derive(Default)]
pub struct InMemoryTrackerStore {
    trackers: Mutex<Vec<thread_tracker::Model>>,
}

impl InMemoryTrackerStore {
    pub fn unresolved(&self, email_account_id: &str) -> Vec<thread_tracker::Model> {
        self.trackers
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.email_account_id == email_account_id && !t.resolved)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TrackerStore for InMemoryTrackerStore {
    async fn mark(&self, new: NewTracker) -> Result<MarkOutcome, DbErr> {
        let mut trackers = self.trackers.lock().unwrap();
        if let Some(existing) = trackers.iter().find(|t| {
            t.email_account_id == new.email_account_id && t.thread_id == new.thread_id && !t.resolved
        }) {
            return Ok(MarkOutcome {
                tracker: existing.clone(),
                created: false,
            });
        }

        let now = Utc::now().fixed_offset();
        let tracker = thread_tracker::Model {
            id: new_id(),
            email_account_id: new.email_account_id,
            thread_id: new.thread_id,
            message_id: new.message_id,
            r#type: new.tracker_type,
            resolved: false,
            sent_at: now,
            reason: new.reason,
            created_at: now,
            updated_at: now,
        };
        trackers.push(tracker.clone());
        Ok(MarkOutcome {
            tracker,
            created: true,
        })
    }

    async fn resolve(&self, tracker_id: &str) -> Result<bool, DbErr> {
        let mut trackers = self.trackers.lock().unwrap();
        match trackers.iter_mut().find(|t| t.id == tracker_id && !t.resolved) {
            Some(tracker) => {
                tracker.resolved = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn resolve_thread(
        &self,
        email_account_id: &str,
        thread_id: &str,
        tracker_type: ThreadTrackerType,
    ) -> Result<u64, DbErr> {
        let mut resolved = 0;
        for tracker in self.trackers.lock().unwrap().iter_mut().filter(|t| {
            t.email_account_id == email_account_id
                && t.thread_id == thread_id
                && t.r#type == tracker_type
                && !t.resolved
        }) {
            tracker.resolved = true;
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn count_unresolved(&self, email_account_id: &str) -> Result<TrackerCounts, DbErr> {
        let mut counts = TrackerCounts::default();
        for tracker in self.unresolved(email_account_id) {
            counts.add(tracker.r#type, 1);
        }
        Ok(counts)
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    records: Mutex<HashMap<(String, String), ExecutionRecord>>,
    markers: Mutex<HashSet<(String, String, usize)>>,
}

impl InMemoryLedger {
    pub fn status(&self, email_account_id: &str, message_id: &str) -> Option<ExecutedRuleStatus> {
        self.records
            .lock()
            .unwrap()
            .get(&(email_account_id.to_string(), message_id.to_string()))
            .map(|r| r.status)
    }
}

#[async_trait]
impl ExecutionLedger for InMemoryLedger {
    async fn begin(
        &self,
        email_account_id: &str,
        message_id: &str,
        _thread_id: &str,
    ) -> Result<bool, DbErr> {
        let mut records = self.records.lock().unwrap();
        let key = (email_account_id.to_string(), message_id.to_string());
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(
            key,
            ExecutionRecord {
                rule_id: None,
                status: ExecutedRuleStatus::Applying,
                matched_by: None,
                action_outcomes: None,
            },
        );
        Ok(true)
    }

    async fn finish(
        &self,
        email_account_id: &str,
        message_id: &str,
        record: ExecutionRecord,
    ) -> Result<(), DbErr> {
        self.records
            .lock()
            .unwrap()
            .insert((email_account_id.to_string(), message_id.to_string()), record);
        Ok(())
    }

    async fn action_executed(
        &self,
        rule_id: &str,
        message_id: &str,
        action_index: usize,
    ) -> Result<bool, DbErr> {
        Ok(self.markers.lock().unwrap().contains(&(
            rule_id.to_string(),
            message_id.to_string(),
            action_index,
        )))
    }

    async fn mark_action_executed(
        &self,
        rule_id: &str,
        message_id: &str,
        action_index: usize,
    ) -> Result<bool, DbErr> {
        Ok(self.markers.lock().unwrap().insert((
            rule_id.to_string(),
            message_id.to_string(),
            action_index,
        )))
    }
}

#[derive(Default)]
pub struct InMemoryScheduler {
    jobs: Mutex<Vec<scheduled_action::Model>>,
}

impl InMemoryScheduler {
    pub fn jobs(&self) -> Vec<scheduled_action::Model> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionScheduler for InMemoryScheduler {
    async fn schedule(&self, email_account_id: &str, job: &DeferredJob) -> Result<bool, DbErr> {
        let mut jobs = self.jobs.lock().unwrap();
        let index = job.action_index as i32;
        if jobs
            .iter()
            .any(|j| j.rule_id == job.rule_id && j.message_id == job.message_id && j.action_index == index)
        {
            return Ok(false);
        }

        let now = Utc::now().fixed_offset();
        jobs.push(scheduled_action::Model {
            id: new_id(),
            email_account_id: email_account_id.to_string(),
            rule_id: job.rule_id.clone(),
            message_id: job.message_id.clone(),
            thread_id: job.thread_id.clone(),
            action_index: index,
            scheduled_for: job.run_at.fixed_offset(),
            status: ScheduledActionStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        });
        Ok(true)
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<scheduled_action::Model>, DbErr> {
        let mut due: Vec<_> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.status == ScheduledActionStatus::Pending && j.scheduled_for <= now)
            .cloned()
            .collect();
        due.sort_by_key(|j| j.scheduled_for);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn complete(
        &self,
        id: &str,
        status: ScheduledActionStatus,
        error: Option<String>,
    ) -> Result<(), DbErr> {
        if let Some(job) = self
            .jobs
            .lock()
            .unwrap()
            .iter_mut()
            .find(|j| j.id == id && j.status == ScheduledActionStatus::Pending)
        {
            job.status = status;
            job.error = error;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDigestQueue {
    items: Mutex<Vec<digest_item::Model>>,
}

impl InMemoryDigestQueue {
    pub fn items(&self) -> Vec<digest_item::Model> {
        self.items.lock().unwrap().clone()
    }
}

#[async_trait]
impl DigestQueue for InMemoryDigestQueue {
    async fn enqueue(&self, item: NewDigestItem) -> Result<bool, DbErr> {
        let mut items = self.items.lock().unwrap();
        if items.iter().any(|i| {
            i.email_account_id == item.email_account_id
                && i.message_id == item.message_id
                && i.rule_id == item.rule_id
        }) {
            return Ok(false);
        }
        items.push(digest_item::Model {
            id: new_id(),
            email_account_id: item.email_account_id,
            rule_id: item.rule_id,
            message_id: item.message_id,
            thread_id: item.thread_id,
            subject: item.subject,
            sender: item.sender,
            snippet: item.snippet,
            created_at: Utc::now().fixed_offset(),
        });
        Ok(true)
    }
}

pub struct InMemoryRuleStore {
    rules: Vec<Rule>,
}

impl InMemoryRuleStore {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn enabled_rules(&self, email_account_id: &str) -> Result<Vec<Rule>, DbErr> {
        let mut rules: Vec<_> = self
            .rules
            .iter()
            .filter(|r| r.email_account_id == email_account_id && r.enabled)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.position);
        Ok(rules)
    }

    async fn rule_by_id(&self, rule_id: &str) -> Result<Option<Rule>, DbErr> {
        Ok(self.rules.iter().find(|r| r.id == rule_id).cloned())
    }
}
