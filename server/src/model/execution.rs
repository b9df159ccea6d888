use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::ActiveEnum;

use crate::{db_core::prelude::*, util::new_id};

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub rule_id: Option<String>,
    pub status: ExecutedRuleStatus,
    pub matched_by: Option<Json>,
    pub action_outcomes: Option<Json>,
}

/// Persistent idempotency markers for rule applications and single actions.
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// Claims a message for processing. False when it was already claimed.
    async fn begin(
        &self,
        email_account_id: &str,
        message_id: &str,
        thread_id: &str,
    ) -> Result<bool, DbErr>;

    async fn finish(
        &self,
        email_account_id: &str,
        message_id: &str,
        record: ExecutionRecord,
    ) -> Result<(), DbErr>;

    async fn action_executed(
        &self,
        rule_id: &str,
        message_id: &str,
        action_index: usize,
    ) -> Result<bool, DbErr>;

    /// Records an executed action. False when the marker already existed.
    async fn mark_action_executed(
        &self,
        rule_id: &str,
        message_id: &str,
        action_index: usize,
    ) -> Result<bool, DbErr>;
}

pub type DynExecutionLedger = Arc<dyn ExecutionLedger>;

#[derive(Clone)]
pub struct ExecutionLedgerCtrl {
    conn: DatabaseConnection,
}

impl ExecutionLedgerCtrl {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(
        conn: &DatabaseConnection,
        email_account_id: &str,
        message_id: &str,
    ) -> Result<Option<executed_rule::Model>, DbErr> {
        ExecutedRule::find()
            .filter(executed_rule::Column::EmailAccountId.eq(email_account_id))
            .filter(executed_rule::Column::MessageId.eq(message_id))
            .one(conn)
            .await
    }
}

#[async_trait]
impl ExecutionLedger for ExecutionLedgerCtrl {
    async fn begin(
        &self,
        email_account_id: &str,
        message_id: &str,
        thread_id: &str,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let claim = executed_rule::ActiveModel {
            id: Set(new_id()),
            email_account_id: Set(email_account_id.to_string()),
            message_id: Set(message_id.to_string()),
            thread_id: Set(thread_id.to_string()),
            rule_id: Set(None),
            status: Set(ExecutedRuleStatus::Applying),
            matched_by: Set(None),
            action_outcomes: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = ExecutedRule::insert(claim)
            .on_conflict(
                OnConflict::columns([
                    executed_rule::Column::EmailAccountId,
                    executed_rule::Column::MessageId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;

        Ok(inserted > 0)
    }

    async fn finish(
        &self,
        email_account_id: &str,
        message_id: &str,
        record: ExecutionRecord,
    ) -> Result<(), DbErr> {
        ExecutedRule::update_many()
            .col_expr(executed_rule::Column::RuleId, Expr::value(record.rule_id))
            .col_expr(
                executed_rule::Column::Status,
                Expr::val(record.status).as_enum(ExecutedRuleStatus::name()),
            )
            .col_expr(executed_rule::Column::MatchedBy, Expr::value(record.matched_by))
            .col_expr(
                executed_rule::Column::ActionOutcomes,
                Expr::value(record.action_outcomes),
            )
            .col_expr(
                executed_rule::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(executed_rule::Column::EmailAccountId.eq(email_account_id))
            .filter(executed_rule::Column::MessageId.eq(message_id))
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    async fn action_executed(
        &self,
        rule_id: &str,
        message_id: &str,
        action_index: usize,
    ) -> Result<bool, DbErr> {
        let count = ExecutedAction::find()
            .filter(executed_action::Column::RuleId.eq(rule_id))
            .filter(executed_action::Column::MessageId.eq(message_id))
            .filter(executed_action::Column::ActionIndex.eq(action_index as i32))
            .count(&self.conn)
            .await?;

        Ok(count > 0)
    }

    async fn mark_action_executed(
        &self,
        rule_id: &str,
        message_id: &str,
        action_index: usize,
    ) -> Result<bool, DbErr> {
        let marker = executed_action::ActiveModel {
            id: Set(new_id()),
            rule_id: Set(rule_id.to_string()),
            message_id: Set(message_id.to_string()),
            action_index: Set(action_index as i32),
            executed_at: Set(Utc::now().fixed_offset()),
        };

        let inserted = ExecutedAction::insert(marker)
            .on_conflict(
                OnConflict::columns([
                    executed_action::Column::RuleId,
                    executed_action::Column::MessageId,
                    executed_action::Column::ActionIndex,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;

        Ok(inserted > 0)
    }
}
