use derive_more::derive::Display;
use futures::future::join_all;
use serde::Serialize;

use crate::{
    db_core::prelude::*,
    email::message::CanonicalMessage,
    model::{
        execution::{DynExecutionLedger, ExecutionRecord},
        rule::DynRuleStore,
        scheduled_action::DynActionScheduler,
    },
};

use super::{
    condition::{ConditionEvaluator, ConditionTree, MatchReason},
    executor::{ActionExecutor, ExecutionContext},
    model::Rule,
    resolver::{ActionResolver, Resolution, ResolvedAction},
};

/// Where a message is in its trip through the engine. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum Phase {
    #[display("RECEIVED")]
    Received,
    #[display("EVALUATING")]
    Evaluating,
    #[display("MATCHED")]
    Matched,
    #[display("NO_MATCH")]
    NoMatch,
    #[display("RESOLVING_ACTIONS")]
    ResolvingActions,
    #[display("EXECUTING")]
    Executing,
    #[display("DONE")]
    Done,
    #[display("FAILED")]
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Applied,
    PartiallyFailed,
    Failed,
    NoMatch,
    AlreadyProcessed,
}

impl ApplicationStatus {
    fn ledger_status(self) -> ExecutedRuleStatus {
        match self {
            ApplicationStatus::Applied | ApplicationStatus::AlreadyProcessed => {
                ExecutedRuleStatus::Applied
            }
            ApplicationStatus::PartiallyFailed => ExecutedRuleStatus::PartiallyFailed,
            ApplicationStatus::Failed => ExecutedRuleStatus::Failed,
            ApplicationStatus::NoMatch => ExecutedRuleStatus::NoMatch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Executed,
    Scheduled,
    /// An executed-action marker already existed.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub index: usize,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub status: ActionStatus,
    pub error: Option<String>,
}

impl ActionOutcome {
    fn new(index: usize, action_type: ActionType, status: ActionStatus) -> Self {
        Self {
            index,
            action_type,
            status,
            error: None,
        }
    }

    fn failed(index: usize, action_type: ActionType, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(index, action_type, ActionStatus::Failed)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationReport {
    pub message_id: String,
    pub status: ApplicationStatus,
    pub rule_id: Option<String>,
    pub rule_name: Option<String>,
    pub matched_by: Vec<MatchReason>,
    pub actions: Vec<ActionOutcome>,
    pub error: Option<String>,
}

impl ApplicationReport {
    fn new(message_id: &str, status: ApplicationStatus) -> Self {
        Self {
            message_id: message_id.to_string(),
            status,
            rule_id: None,
            rule_name: None,
            matched_by: vec![],
            actions: vec![],
            error: None,
        }
    }

    pub fn succeeded(&self) -> Vec<usize> {
        self.indices(|s| s != ActionStatus::Failed)
    }

    pub fn failed(&self) -> Vec<usize> {
        self.indices(|s| s == ActionStatus::Failed)
    }

    fn indices(&self, pred: impl Fn(ActionStatus) -> bool) -> Vec<usize> {
        self.actions
            .iter()
            .filter(|a| pred(a.status))
            .map(|a| a.index)
            .collect()
    }

    fn record(&self) -> ExecutionRecord {
        ExecutionRecord {
            rule_id: self.rule_id.clone(),
            status: self.status.ledger_status(),
            matched_by: (!self.matched_by.is_empty())
                .then(|| serde_json::to_value(&self.matched_by).ok())
                .flatten(),
            action_outcomes: (!self.actions.is_empty())
                .then(|| serde_json::to_value(&self.actions).ok())
                .flatten(),
        }
    }
}

fn overall_status(outcomes: &[ActionOutcome]) -> ApplicationStatus {
    let failed = outcomes
        .iter()
        .filter(|o| o.status == ActionStatus::Failed)
        .count();
    match failed {
        0 => ApplicationStatus::Applied,
        n if n == outcomes.len() => ApplicationStatus::Failed,
        _ => ApplicationStatus::PartiallyFailed,
    }
}

/// Runs an account's rules against incoming messages, first match wins.
#[derive(Clone)]
pub struct RuleEngine {
    evaluator: ConditionEvaluator,
    resolver: ActionResolver,
    rules: DynRuleStore,
    ledger: DynExecutionLedger,
    scheduler: DynActionScheduler,
}

impl RuleEngine {
    pub fn new(
        evaluator: ConditionEvaluator,
        resolver: ActionResolver,
        rules: DynRuleStore,
        ledger: DynExecutionLedger,
        scheduler: DynActionScheduler,
    ) -> Self {
        Self {
            evaluator,
            resolver,
            rules,
            ledger,
            scheduler,
        }
    }

    pub async fn process_message(
        &self,
        email_account_id: &str,
        message: &CanonicalMessage,
        executor: &ActionExecutor,
    ) -> Result<ApplicationReport, DbErr> {
        tracing::debug!("[{}] message {}", Phase::Received, message.id);

        if !self
            .ledger
            .begin(email_account_id, &message.id, &message.thread_id)
            .await?
        {
            tracing::info!("Message {} was already processed, skipping", message.id);
            return Ok(ApplicationReport::new(
                &message.id,
                ApplicationStatus::AlreadyProcessed,
            ));
        }

        let report = match self.apply(email_account_id, message, executor).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("[{}] message {}: {:?}", Phase::Failed, message.id, e);
                let mut report = ApplicationReport::new(&message.id, ApplicationStatus::Failed);
                report.error = Some(e.to_string());
                report
            }
        };

        self.ledger
            .finish(email_account_id, &message.id, report.record())
            .await?;

        Ok(report)
    }

    async fn apply(
        &self,
        email_account_id: &str,
        message: &CanonicalMessage,
        executor: &ActionExecutor,
    ) -> Result<ApplicationReport, DbErr> {
        let rules = self.rules.enabled_rules(email_account_id).await?;
        tracing::debug!(
            "[{}] message {} against {} rules",
            Phase::Evaluating,
            message.id,
            rules.len()
        );

        let mut matched = None;
        for rule in &rules {
            let tree = ConditionTree::Leaf(rule.condition.clone());
            match self.evaluator.evaluate_tree(message, &tree).await {
                Ok(result) if result.matched => {
                    matched = Some((rule, result.reasons));
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    // Skipping to the next rule could let a later rule win that
                    // should not have; stop instead.
                    tracing::warn!(
                        "[{}] rule \"{}\" on message {}: {}",
                        Phase::Failed,
                        rule.name,
                        message.id,
                        e
                    );
                    let mut report =
                        ApplicationReport::new(&message.id, ApplicationStatus::Failed);
                    report.rule_id = Some(rule.id.clone());
                    report.rule_name = Some(rule.name.clone());
                    report.error = Some(e.to_string());
                    return Ok(report);
                }
            }
        }

        let Some((rule, reasons)) = matched else {
            tracing::info!("[{}] message {}", Phase::NoMatch, message.id);
            return Ok(ApplicationReport::new(&message.id, ApplicationStatus::NoMatch));
        };
        tracing::info!(
            "[{}] message {} by rule \"{}\"",
            Phase::Matched,
            message.id,
            rule.name
        );

        let actions = self
            .run_actions(email_account_id, rule, message, executor)
            .await?;

        let status = overall_status(&actions);
        let report = ApplicationReport {
            message_id: message.id.clone(),
            status,
            rule_id: Some(rule.id.clone()),
            rule_name: Some(rule.name.clone()),
            matched_by: reasons,
            actions,
            error: None,
        };
        tracing::info!(
            "[{}] message {} rule \"{}\": {:?} (ok: {:?}, failed: {:?})",
            Phase::Done,
            message.id,
            rule.name,
            status,
            report.succeeded(),
            report.failed()
        );

        Ok(report)
    }

    /// Resolves every action before executing any, then executes in list order.
    async fn run_actions(
        &self,
        email_account_id: &str,
        rule: &Rule,
        message: &CanonicalMessage,
        executor: &ActionExecutor,
    ) -> Result<Vec<ActionOutcome>, DbErr> {
        tracing::debug!(
            "[{}] {} actions",
            Phase::ResolvingActions,
            rule.actions.len()
        );
        let resolutions = join_all(
            rule.actions
                .iter()
                .enumerate()
                .map(|(index, action)| self.resolver.prepare(&rule.id, message, index, action)),
        )
        .await;

        tracing::debug!("[{}] rule \"{}\"", Phase::Executing, rule.name);
        let ctx = ExecutionContext {
            email_account_id,
            rule_id: &rule.id,
            rule_name: &rule.name,
            message,
        };

        let mut outcomes = Vec::with_capacity(resolutions.len());
        for ((index, action), resolution) in rule.actions.iter().enumerate().zip(resolutions) {
            let outcome = match resolution {
                Ok(Resolution::Ready(resolved)) => {
                    self.execute_once(ctx, &resolved, executor).await?
                }
                Ok(Resolution::Deferred(job)) => {
                    let queued = self.scheduler.schedule(email_account_id, &job).await?;
                    tracing::info!(
                        "Action #{} of rule \"{}\" deferred until {} (new: {})",
                        index,
                        rule.name,
                        job.run_at,
                        queued
                    );
                    ActionOutcome::new(index, action.action_type, ActionStatus::Scheduled)
                }
                Err(e) => {
                    tracing::warn!("Action #{} of rule \"{}\": {}", index, rule.name, e);
                    ActionOutcome::failed(index, action.action_type, e)
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn execute_once(
        &self,
        ctx: ExecutionContext<'_>,
        action: &ResolvedAction,
        executor: &ActionExecutor,
    ) -> Result<ActionOutcome, DbErr> {
        let message_id = &ctx.message.id;
        if self
            .ledger
            .action_executed(ctx.rule_id, message_id, action.index)
            .await?
        {
            return Ok(ActionOutcome::new(
                action.index,
                action.action_type,
                ActionStatus::Skipped,
            ));
        }

        match executor.execute(ctx, action).await {
            Ok(()) => {
                self.ledger
                    .mark_action_executed(ctx.rule_id, message_id, action.index)
                    .await?;
                Ok(ActionOutcome::new(
                    action.index,
                    action.action_type,
                    ActionStatus::Executed,
                ))
            }
            Err(e) => {
                tracing::warn!(
                    "Action #{} of rule \"{}\" failed on message {}: {}",
                    action.index,
                    ctx.rule_name,
                    message_id,
                    e
                );
                Ok(ActionOutcome::failed(action.index, action.action_type, e))
            }
        }
    }

    /// Runs a deferred action that has come due. The action is resolved against
    /// the message as it is now.
    pub async fn run_deferred(
        &self,
        job: &scheduled_action::Model,
        executor: &ActionExecutor,
    ) -> Result<ScheduledActionStatus, DbErr> {
        let (status, error) = match self.try_run_deferred(job, executor).await? {
            Ok(outcome) if outcome.status == ActionStatus::Skipped => {
                (ScheduledActionStatus::Skipped, None)
            }
            Ok(outcome) if outcome.status == ActionStatus::Failed => {
                (ScheduledActionStatus::Failed, outcome.error)
            }
            Ok(_) => (ScheduledActionStatus::Completed, None),
            Err(reason) => (ScheduledActionStatus::Skipped, Some(reason)),
        };

        tracing::info!(
            "Deferred action #{} of rule {} on message {}: {:?}",
            job.action_index,
            job.rule_id,
            job.message_id,
            status
        );
        self.scheduler.complete(&job.id, status, error).await?;
        Ok(status)
    }

    /// Inner `Err` means the job no longer applies.
    async fn try_run_deferred(
        &self,
        job: &scheduled_action::Model,
        executor: &ActionExecutor,
    ) -> Result<Result<ActionOutcome, String>, DbErr> {
        let Some(rule) = self.rules.rule_by_id(&job.rule_id).await? else {
            return Ok(Err("Rule no longer exists".to_string()));
        };
        if !rule.enabled {
            return Ok(Err("Rule is disabled".to_string()));
        }
        let index = job.action_index as usize;
        let Some(action) = rule.actions.get(index) else {
            return Ok(Err(format!("Rule has no action #{index}")));
        };

        let message = match executor.provider().get_message(&job.message_id).await {
            Ok(message) => message,
            Err(e) => return Ok(Ok(ActionOutcome::failed(index, action.action_type, e))),
        };

        let resolved = match self.resolver.resolve(&message, index, action).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(Ok(ActionOutcome::failed(index, action.action_type, e))),
        };

        let ctx = ExecutionContext {
            email_account_id: &job.email_account_id,
            rule_id: &rule.id,
            rule_name: &rule.name,
            message: &message,
        };
        self.execute_once(ctx, &resolved, executor).await.map(Ok)
    }
}
