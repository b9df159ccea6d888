use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{Select, TransactionTrait};
use serde::Serialize;

use crate::{db_core::prelude::*, error::is_write_conflict, util::new_id};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTracker {
    pub email_account_id: String,
    pub thread_id: String,
    pub message_id: String,
    pub tracker_type: ThreadTrackerType,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkOutcome {
    pub tracker: thread_tracker::Model,
    /// False when an unresolved tracker already existed for the thread.
    pub created: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerCounts {
    pub needs_reply: u64,
    pub awaiting_reply: u64,
    pub needs_action: u64,
}

impl TrackerCounts {
    pub fn add(&mut self, tracker_type: ThreadTrackerType, count: u64) {
        match tracker_type {
            ThreadTrackerType::NeedsReply => self.needs_reply += count,
            ThreadTrackerType::Awaiting => self.awaiting_reply += count,
            ThreadTrackerType::NeedsAction => self.needs_action += count,
        }
    }
}

/// Reply-state markers per thread. At most one unresolved tracker exists per thread.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Returns the thread's unresolved tracker if there is one, else creates it.
    async fn mark(&self, new: NewTracker) -> Result<MarkOutcome, DbErr>;

    async fn resolve(&self, tracker_id: &str) -> Result<bool, DbErr>;

    /// Resolves the thread's unresolved trackers of one type.
    async fn resolve_thread(
        &self,
        email_account_id: &str,
        thread_id: &str,
        tracker_type: ThreadTrackerType,
    ) -> Result<u64, DbErr>;

    async fn count_unresolved(&self, email_account_id: &str) -> Result<TrackerCounts, DbErr>;
}

pub type DynTrackerStore = Arc<dyn TrackerStore>;

#[derive(Clone)]
pub struct ThreadTrackerCtrl {
    conn: DatabaseConnection,
}

impl ThreadTrackerCtrl {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn unresolved_query(email_account_id: &str, thread_id: &str) -> Select<ThreadTracker> {
        ThreadTracker::find()
            .filter(thread_tracker::Column::EmailAccountId.eq(email_account_id))
            .filter(thread_tracker::Column::ThreadId.eq(thread_id))
            .filter(thread_tracker::Column::Resolved.eq(false))
            .order_by_asc(thread_tracker::Column::CreatedAt)
    }

    async fn try_mark(&self, new: &NewTracker) -> Result<MarkOutcome, DbErr> {
        let txn = self
            .conn
            .begin_with_config(Some(IsolationLevel::Serializable), None)
            .await?;

        if let Some(existing) = Self::unresolved_query(&new.email_account_id, &new.thread_id)
            .one(&txn)
            .await?
        {
            txn.commit().await?;
            return Ok(MarkOutcome {
                tracker: existing,
                created: false,
            });
        }

        let now = Utc::now().fixed_offset();
        let tracker = thread_tracker::ActiveModel {
            id: Set(new_id()),
            email_account_id: Set(new.email_account_id.clone()),
            thread_id: Set(new.thread_id.clone()),
            message_id: Set(new.message_id.clone()),
            r#type: Set(new.tracker_type),
            resolved: Set(false),
            sent_at: Set(now),
            reason: Set(new.reason.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        Ok(MarkOutcome {
            tracker,
            created: true,
        })
    }
}

#[async_trait]
impl TrackerStore for ThreadTrackerCtrl {
    async fn mark(&self, new: NewTracker) -> Result<MarkOutcome, DbErr> {
        match self.try_mark(&new).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if is_write_conflict(&e) => {
                // A concurrent call won the race; its tracker is the answer.
                tracing::warn!(
                    "Tracker write conflict for thread {}: {}. Re-reading",
                    new.thread_id,
                    e
                );
                match Self::unresolved_query(&new.email_account_id, &new.thread_id)
                    .one(&self.conn)
                    .await?
                {
                    Some(existing) => Ok(MarkOutcome {
                        tracker: existing,
                        created: false,
                    }),
                    None => self.try_mark(&new).await,
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve(&self, tracker_id: &str) -> Result<bool, DbErr> {
        let result = ThreadTracker::update_many()
            .col_expr(thread_tracker::Column::Resolved, Expr::value(true))
            .col_expr(
                thread_tracker::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(thread_tracker::Column::Id.eq(tracker_id))
            .filter(thread_tracker::Column::Resolved.eq(false))
            .exec(&self.conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn resolve_thread(
        &self,
        email_account_id: &str,
        thread_id: &str,
        tracker_type: ThreadTrackerType,
    ) -> Result<u64, DbErr> {
        let result = ThreadTracker::update_many()
            .col_expr(thread_tracker::Column::Resolved, Expr::value(true))
            .col_expr(
                thread_tracker::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(thread_tracker::Column::EmailAccountId.eq(email_account_id))
            .filter(thread_tracker::Column::ThreadId.eq(thread_id))
            .filter(thread_tracker::Column::Type.eq(tracker_type))
            .filter(thread_tracker::Column::Resolved.eq(false))
            .exec(&self.conn)
            .await?;

        Ok(result.rows_affected)
    }

    async fn count_unresolved(&self, email_account_id: &str) -> Result<TrackerCounts, DbErr> {
        let rows: Vec<(ThreadTrackerType, i64)> = ThreadTracker::find()
            .select_only()
            .column(thread_tracker::Column::Type)
            .column_as(thread_tracker::Column::Id.count(), "count")
            .filter(thread_tracker::Column::EmailAccountId.eq(email_account_id))
            .filter(thread_tracker::Column::Resolved.eq(false))
            .group_by(thread_tracker::Column::Type)
            .into_tuple()
            .all(&self.conn)
            .await?;

        let mut counts = TrackerCounts::default();
        for (tracker_type, count) in rows {
            counts.add(tracker_type, count.max(0) as u64);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_query_shape() {
        let sql = ThreadTrackerCtrl::unresolved_query("acc-1", "thread-1")
            .build(DbBackend::Postgres)
            .to_string();

        assert!(sql.contains(r#""thread_tracker"."email_account_id" = 'acc-1'"#));
        assert!(sql.contains(r#""thread_tracker"."thread_id" = 'thread-1'"#));
        assert!(sql.contains(r#""thread_tracker"."resolved" = FALSE"#));
        assert!(sql.contains(r#"ORDER BY "thread_tracker"."created_at" ASC"#));
    }

    #[test]
    fn test_tracker_counts_add() {
        let mut counts = TrackerCounts::default();
        counts.add(ThreadTrackerType::NeedsReply, 2);
        counts.add(ThreadTrackerType::Awaiting, 1);
        assert_eq!(
            counts,
            TrackerCounts {
                needs_reply: 2,
                awaiting_reply: 1,
                needs_action: 0
            }
        );
    }

    #[cfg(feature = "integration")]
    mod integration {
        use super::*;
        use crate::testing::common::setup;

        async fn seed_account(conn: &DatabaseConnection) -> (String, String) {
            let now = Utc::now().fixed_offset();
            let user_id = new_id();
            user::ActiveModel {
                id: Set(user_id.clone()),
                email: Set(format!("{user_id}@example.com")),
                webhook_url: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await
            .unwrap();

            let account_id = new_id();
            email_account::ActiveModel {
                id: Set(account_id.clone()),
                user_id: Set(user_id.clone()),
                email: Set(format!("{account_id}@example.com")),
                provider: Set(EmailProviderKind::Google),
                access_token: Set(None),
                expires_at: Set(None),
                needs_reauthentication: Set(false),
                watch_emails_subscription_id: Set(None),
                watch_emails_expiration_date: Set(None),
                last_history_id: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await
            .unwrap();

            (user_id, account_id)
        }

        fn needs_reply(account_id: &str, thread_id: &str, message_id: &str) -> NewTracker {
            NewTracker {
                email_account_id: account_id.to_string(),
                thread_id: thread_id.to_string(),
                message_id: message_id.to_string(),
                tracker_type: ThreadTrackerType::NeedsReply,
                reason: None,
            }
        }

        #[tokio::test]
        async fn test_concurrent_marks_share_one_tracker() {
            let (conn, _) = setup().await;
            let (user_id, account_id) = seed_account(&conn).await;
            let ctrl = ThreadTrackerCtrl::new(conn.clone());

            for round in 0..5 {
                let thread_id = format!("thread-{round}");
                let first = tokio::spawn({
                    let ctrl = ctrl.clone();
                    let new = needs_reply(&account_id, &thread_id, "m1");
                    async move { ctrl.mark(new).await }
                });
                let second = tokio::spawn({
                    let ctrl = ctrl.clone();
                    let new = needs_reply(&account_id, &thread_id, "m2");
                    async move { ctrl.mark(new).await }
                });
                let first = first.await.unwrap().unwrap();
                let second = second.await.unwrap().unwrap();

                assert_eq!(first.tracker.id, second.tracker.id);
                assert_eq!(
                    [first.created, second.created].iter().filter(|c| **c).count(),
                    1
                );
            }

            let counts = ctrl.count_unresolved(&account_id).await.unwrap();
            assert_eq!(counts.needs_reply, 5);

            User::delete_by_id(user_id).exec(&conn).await.unwrap();
        }
    }
}
