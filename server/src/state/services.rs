use std::sync::Arc;

use crate::{
    db_core::prelude::*,
    email::provider::{create_email_provider, DynEmailProvider, ProviderSettings},
    error::AppResult,
    model::{
        digest::{DigestCtrl, DynDigestQueue},
        execution::ExecutionLedgerCtrl,
        rule::RuleCtrl,
        scheduled_action::{DynActionScheduler, ScheduledActionCtrl},
        thread_tracker::{DynTrackerStore, ThreadTrackerCtrl},
    },
    notify::WebhookClient,
    prompt::{ChatModel, DynLanguageModel},
    rate_limiters::RateLimiters,
    rules::{ActionExecutor, ActionResolver, ConditionEvaluator, RuleEngine},
    server_config::cfg,
    HttpClient,
};

/// Rule engine and stores shared by request handlers and background jobs.
#[derive(Clone)]
pub struct Services {
    pub engine: RuleEngine,
    pub trackers: DynTrackerStore,
    pub digests: DynDigestQueue,
    pub scheduler: DynActionScheduler,
    pub webhooks: WebhookClient,
    provider_settings: ProviderSettings,
    token_key: Arc<str>,
}

impl Services {
    pub fn new(
        conn: DatabaseConnection,
        model: DynLanguageModel,
        webhooks: WebhookClient,
        provider_settings: ProviderSettings,
        token_key: &str,
    ) -> Self {
        let scheduler: DynActionScheduler = Arc::new(ScheduledActionCtrl::new(conn.clone()));
        let engine = RuleEngine::new(
            ConditionEvaluator::new(model.clone()),
            ActionResolver::new(model),
            Arc::new(RuleCtrl::new(conn.clone())),
            Arc::new(ExecutionLedgerCtrl::new(conn.clone())),
            scheduler.clone(),
        );

        Self {
            engine,
            trackers: Arc::new(ThreadTrackerCtrl::new(conn.clone())),
            digests: Arc::new(DigestCtrl::new(conn)),
            scheduler,
            webhooks,
            provider_settings,
            token_key: Arc::from(token_key),
        }
    }

    pub fn from_config(
        http_client: HttpClient,
        conn: DatabaseConnection,
        rate_limiters: RateLimiters,
    ) -> Self {
        let model: DynLanguageModel =
            Arc::new(ChatModel::from_config(http_client.clone(), rate_limiters));
        Self::new(
            conn,
            model,
            WebhookClient::from_config(http_client),
            ProviderSettings::from_config(),
            &cfg.token_encryption_key,
        )
    }

    pub fn provider_for(
        &self,
        http_client: &HttpClient,
        account: &email_account::Model,
    ) -> AppResult<DynEmailProvider> {
        create_email_provider(
            http_client,
            account,
            self.provider_settings.clone(),
            self.token_key.as_bytes(),
        )
    }

    pub fn executor(&self, provider: DynEmailProvider) -> ActionExecutor {
        ActionExecutor::new(
            provider,
            self.trackers.clone(),
            self.digests.clone(),
            self.webhooks.clone(),
        )
    }
}
