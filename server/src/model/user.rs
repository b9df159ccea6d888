use sea_orm::{JoinType, RelationTrait};

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult},
};

pub struct UserCtrl;

impl UserCtrl {
    pub async fn get_by_id(conn: &DatabaseConnection, user_id: &str) -> AppResult<user::Model> {
        User::find_by_id(user_id)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Task webhook configured by the account's owner, if any.
    pub async fn webhook_url_for_account(
        conn: &DatabaseConnection,
        email_account_id: &str,
    ) -> AppResult<Option<String>> {
        let webhook_url: Option<Option<String>> = User::find()
            .select_only()
            .column(user::Column::WebhookUrl)
            .join(JoinType::InnerJoin, user::Relation::EmailAccount.def())
            .filter(email_account::Column::Id.eq(email_account_id))
            .into_tuple()
            .one(conn)
            .await?;

        Ok(webhook_url
            .flatten()
            .filter(|url| !url.trim().is_empty()))
    }
}
