use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveEnum, Select};

use crate::{db_core::prelude::*, rules::resolver::DeferredJob, util::new_id};

/// Deferred rule actions waiting for their due time.
#[async_trait]
pub trait ActionScheduler: Send + Sync {
    /// Queues a job. Re-scheduling the same (rule, message, action) is a no-op.
    async fn schedule(&self, email_account_id: &str, job: &DeferredJob) -> Result<bool, DbErr>;

    async fn due(&self, now: DateTime<Utc>, limit: u64)
        -> Result<Vec<scheduled_action::Model>, DbErr>;

    async fn complete(
        &self,
        id: &str,
        status: ScheduledActionStatus,
        error: Option<String>,
    ) -> Result<(), DbErr>;
}

pub type DynActionScheduler = Arc<dyn ActionScheduler>;

#[derive(Clone)]
pub struct ScheduledActionCtrl {
    conn: DatabaseConnection,
}

impl ScheduledActionCtrl {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn due_query(now: DateTime<Utc>, limit: u64) -> Select<ScheduledAction> {
        ScheduledAction::find()
            .filter(scheduled_action::Column::Status.eq(ScheduledActionStatus::Pending))
            .filter(scheduled_action::Column::ScheduledFor.lte(now.fixed_offset()))
            .order_by_asc(scheduled_action::Column::ScheduledFor)
            .limit(limit)
    }
}

#[async_trait]
impl ActionScheduler for ScheduledActionCtrl {
    async fn schedule(&self, email_account_id: &str, job: &DeferredJob) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let active_model = scheduled_action::ActiveModel {
            id: Set(new_id()),
            email_account_id: Set(email_account_id.to_string()),
            rule_id: Set(job.rule_id.clone()),
            message_id: Set(job.message_id.clone()),
            thread_id: Set(job.thread_id.clone()),
            action_index: Set(job.action_index as i32),
            scheduled_for: Set(job.run_at.fixed_offset()),
            status: Set(ScheduledActionStatus::Pending),
            error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = ScheduledAction::insert(active_model)
            .on_conflict(
                OnConflict::columns([
                    scheduled_action::Column::RuleId,
                    scheduled_action::Column::MessageId,
                    scheduled_action::Column::ActionIndex,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;

        Ok(inserted > 0)
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<scheduled_action::Model>, DbErr> {
        Self::due_query(now, limit).all(&self.conn).await
    }

    async fn complete(
        &self,
        id: &str,
        status: ScheduledActionStatus,
        error: Option<String>,
    ) -> Result<(), DbErr> {
        ScheduledAction::update_many()
            .col_expr(
                scheduled_action::Column::Status,
                Expr::val(status).as_enum(ScheduledActionStatus::name()),
            )
            .col_expr(scheduled_action::Column::Error, Expr::value(error))
            .col_expr(
                scheduled_action::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(scheduled_action::Column::Id.eq(id))
            .filter(scheduled_action::Column::Status.eq(ScheduledActionStatus::Pending))
            .exec(&self.conn)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_query_shape() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let sql = ScheduledActionCtrl::due_query(now, 50)
            .build(DbBackend::Postgres)
            .to_string();

        assert!(sql.contains(r#""scheduled_action"."status" = "#));
        assert!(sql.contains("'PENDING'"));
        assert!(sql.contains(r#"ORDER BY "scheduled_action"."scheduled_for" ASC"#));
        assert!(sql.ends_with("LIMIT 50"));
    }
}
