use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{Select, TransactionTrait};

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult, DatabaseErrorCode, extract_database_error_code},
    rules::{model, schema::CreateRuleSchema},
    util::new_id,
};

/// Read access to an account's rules for the engine.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Enabled rules in evaluation order.
    async fn enabled_rules(&self, email_account_id: &str) -> Result<Vec<model::Rule>, DbErr>;

    async fn rule_by_id(&self, rule_id: &str) -> Result<Option<model::Rule>, DbErr>;
}

pub type DynRuleStore = Arc<dyn RuleStore>;

#[derive(Clone)]
pub struct RuleCtrl {
    conn: DatabaseConnection,
}

impl RuleCtrl {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn enabled_query(email_account_id: &str) -> Select<Rule> {
        Rule::find()
            .filter(rule::Column::EmailAccountId.eq(email_account_id))
            .filter(rule::Column::Enabled.eq(true))
            .order_by_asc(rule::Column::Position)
            .order_by_asc(rule::Column::CreatedAt)
    }

    pub async fn list(
        conn: &DatabaseConnection,
        email_account_id: &str,
    ) -> AppResult<Vec<model::Rule>> {
        let rules = Rule::find()
            .filter(rule::Column::EmailAccountId.eq(email_account_id))
            .order_by_asc(rule::Column::Position)
            .find_with_related(Action)
            .all(conn)
            .await?;

        Ok(rules
            .into_iter()
            .map(|(rule, actions)| model::Rule::from_models(rule, actions))
            .collect())
    }

    /// Persists a validated rule after the account's existing rules.
    pub async fn create(
        conn: &DatabaseConnection,
        email_account_id: &str,
        schema: &CreateRuleSchema,
    ) -> AppResult<model::Rule> {
        let txn = conn.begin().await?;

        let last_position: Option<i32> = Rule::find()
            .select_only()
            .column_as(rule::Column::Position.max(), "position")
            .filter(rule::Column::EmailAccountId.eq(email_account_id))
            .into_tuple::<Option<i32>>()
            .one(&txn)
            .await?
            .flatten();

        let condition = schema.to_condition();
        let static_condition = condition.static_condition.clone().unwrap_or_default();
        let now = Utc::now().fixed_offset();
        let rule_id = new_id();

        let rule_model = rule::ActiveModel {
            id: Set(rule_id.clone()),
            email_account_id: Set(email_account_id.to_string()),
            name: Set(schema.name.trim().to_string()),
            position: Set(last_position.map_or(0, |p| p + 1)),
            enabled: Set(true),
            conditional_operator: Set(condition.conditional_operator),
            condition_combinator: Set(condition.condition_combinator),
            ai_instructions: Set(condition.ai_instructions.clone()),
            static_from: Set(static_condition.from),
            static_to: Set(static_condition.to),
            static_subject: Set(static_condition.subject),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| match extract_database_error_code(&e) {
            Some(code) if code == DatabaseErrorCode::UniqueViolation as u32 => {
                AppError::Conflict(format!("A rule named '{}' already exists", schema.name.trim()))
            }
            _ => AppError::from(e),
        })?;

        let mut action_models = vec![];
        for (position, action) in schema.to_actions().into_iter().enumerate() {
            let fields = action.fields;
            let action_model = action::ActiveModel {
                id: Set(new_id()),
                rule_id: Set(rule_id.clone()),
                position: Set(position as i32),
                r#type: Set(action.action_type),
                label: Set(fields.label),
                to: Set(fields.to),
                cc: Set(fields.cc),
                bcc: Set(fields.bcc),
                subject: Set(fields.subject),
                content: Set(fields.content),
                webhook_url: Set(fields.webhook_url),
                folder_name: Set(fields.folder_name),
                delay_in_minutes: Set(action.delay_in_minutes.map(|d| d as i32)),
            }
            .insert(&txn)
            .await?;
            action_models.push(action_model);
        }

        txn.commit().await?;
        tracing::info!(
            "Created rule {} with {} actions for account {}",
            rule_model.name,
            action_models.len(),
            email_account_id
        );

        Ok(model::Rule::from_models(rule_model, action_models))
    }
}

#[async_trait]
impl RuleStore for RuleCtrl {
    async fn enabled_rules(&self, email_account_id: &str) -> Result<Vec<model::Rule>, DbErr> {
        let rules = Self::enabled_query(email_account_id)
            .find_with_related(Action)
            .all(&self.conn)
            .await?;

        Ok(rules
            .into_iter()
            .map(|(rule, actions)| model::Rule::from_models(rule, actions))
            .collect())
    }

    async fn rule_by_id(&self, rule_id: &str) -> Result<Option<model::Rule>, DbErr> {
        let found = Rule::find_by_id(rule_id)
            .find_with_related(Action)
            .all(&self.conn)
            .await?;

        Ok(found
            .into_iter()
            .next()
            .map(|(rule, actions)| model::Rule::from_models(rule, actions)))
    }
}
