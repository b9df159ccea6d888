use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::{
    db_core::prelude::*,
    email::provider::WatchSubscription,
    error::{AppError, AppResult},
};

pub struct EmailAccountCtrl;

/// Push-notification state of an account as shown in settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStatus {
    pub is_watching: bool,
    pub subscription_id: Option<String>,
    pub expiration_date: Option<DateTime<FixedOffset>>,
}

impl From<&email_account::Model> for WatchStatus {
    fn from(account: &email_account::Model) -> Self {
        Self {
            is_watching: account.watch_emails_subscription_id.is_some(),
            subscription_id: account.watch_emails_subscription_id.clone(),
            expiration_date: account.watch_emails_expiration_date,
        }
    }
}

impl EmailAccountCtrl {
    pub async fn get_by_id(
        conn: &DatabaseConnection,
        email_account_id: &str,
    ) -> AppResult<email_account::Model> {
        EmailAccount::find_by_id(email_account_id)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Email account not found".to_string()))
    }

    pub async fn get_by_email(
        conn: &DatabaseConnection,
        email: &str,
    ) -> AppResult<email_account::Model> {
        EmailAccount::find()
            .filter(email_account::Column::Email.eq(email.to_lowercase()))
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Email account not found".to_string()))
    }

    pub async fn get_by_subscription_id(
        conn: &DatabaseConnection,
        subscription_id: &str,
    ) -> AppResult<email_account::Model> {
        EmailAccount::find()
            .filter(email_account::Column::WatchEmailsSubscriptionId.eq(subscription_id))
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Email account not found".to_string()))
    }

    pub async fn watch_status(
        conn: &DatabaseConnection,
        email_account_id: &str,
    ) -> AppResult<WatchStatus> {
        let account = Self::get_by_id(conn, email_account_id).await?;
        Ok(WatchStatus::from(&account))
    }

    pub async fn set_watch(
        conn: &DatabaseConnection,
        email_account_id: &str,
        subscription: &WatchSubscription,
    ) -> AppResult<email_account::Model> {
        let mut active_model: email_account::ActiveModel =
            Self::get_by_id(conn, email_account_id).await?.into();
        active_model.watch_emails_subscription_id = Set(Some(subscription.subscription_id.clone()));
        active_model.watch_emails_expiration_date =
            Set(subscription.expiration.map(|e| e.fixed_offset()));
        if let Some(history_id) = &subscription.history_id {
            active_model.last_history_id = Set(Some(history_id.clone()));
        }
        active_model.updated_at = Set(Utc::now().fixed_offset());

        Ok(active_model.update(conn).await?)
    }

    pub async fn clear_watch(
        conn: &DatabaseConnection,
        email_account_id: &str,
    ) -> AppResult<email_account::Model> {
        let mut active_model: email_account::ActiveModel =
            Self::get_by_id(conn, email_account_id).await?.into();
        active_model.watch_emails_subscription_id = Set(None);
        active_model.watch_emails_expiration_date = Set(None);
        active_model.updated_at = Set(Utc::now().fixed_offset());

        Ok(active_model.update(conn).await?)
    }

    pub async fn set_last_history_id(
        conn: &DatabaseConnection,
        email_account_id: &str,
        history_id: &str,
    ) -> AppResult<()> {
        EmailAccount::update_many()
            .col_expr(
                email_account::Column::LastHistoryId,
                Expr::value(Some(history_id.to_string())),
            )
            .filter(email_account::Column::Id.eq(email_account_id))
            .exec(conn)
            .await?;

        Ok(())
    }

    /// Watched accounts whose subscription lapses before `cutoff`.
    pub async fn watches_expiring_before(
        conn: &DatabaseConnection,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<email_account::Model>> {
        let accounts = EmailAccount::find()
            .filter(email_account::Column::WatchEmailsSubscriptionId.is_not_null())
            .filter(email_account::Column::NeedsReauthentication.eq(false))
            .filter(
                Condition::any()
                    .add(email_account::Column::WatchEmailsExpirationDate.is_null())
                    .add(email_account::Column::WatchEmailsExpirationDate.lt(cutoff.fixed_offset())),
            )
            .all(conn)
            .await?;

        Ok(accounts)
    }

    pub async fn flag_needs_reauthentication(
        conn: &DatabaseConnection,
        email_account_id: &str,
    ) -> AppResult<()> {
        tracing::warn!("Flagging email account {} for reauthentication", email_account_id);
        EmailAccount::update_many()
            .col_expr(email_account::Column::NeedsReauthentication, Expr::value(true))
            .filter(email_account::Column::Id.eq(email_account_id))
            .exec(conn)
            .await?;

        Ok(())
    }
}
