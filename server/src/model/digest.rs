use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::{db_core::prelude::*, util::new_id};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDigestItem {
    pub email_account_id: String,
    pub rule_id: String,
    pub message_id: String,
    pub thread_id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub snippet: String,
}

/// Messages queued for the user's digest email.
#[async_trait]
pub trait DigestQueue: Send + Sync {
    /// False when the message was already queued for this rule.
    async fn enqueue(&self, item: NewDigestItem) -> Result<bool, DbErr>;
}

pub type DynDigestQueue = Arc<dyn DigestQueue>;

#[derive(Clone)]
pub struct DigestCtrl {
    conn: DatabaseConnection,
}

impl DigestCtrl {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn pending_for_account(
        conn: &DatabaseConnection,
        email_account_id: &str,
    ) -> Result<Vec<digest_item::Model>, DbErr> {
        DigestItem::find()
            .filter(digest_item::Column::EmailAccountId.eq(email_account_id))
            .order_by_asc(digest_item::Column::CreatedAt)
            .all(conn)
            .await
    }
}

#[async_trait]
impl DigestQueue for DigestCtrl {
    async fn enqueue(&self, item: NewDigestItem) -> Result<bool, DbErr> {
        let active_model = digest_item::ActiveModel {
            id: Set(new_id()),
            email_account_id: Set(item.email_account_id),
            rule_id: Set(item.rule_id),
            message_id: Set(item.message_id),
            thread_id: Set(item.thread_id),
            subject: Set(item.subject),
            sender: Set(item.sender),
            snippet: Set(item.snippet),
            created_at: Set(Utc::now().fixed_offset()),
        };

        let inserted = DigestItem::insert(active_model)
            .on_conflict(
                OnConflict::columns([
                    digest_item::Column::EmailAccountId,
                    digest_item::Column::MessageId,
                    digest_item::Column::RuleId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;

        Ok(inserted > 0)
    }
}
