//! Rule documents submitted by the rule editor or AI-assisted rule creation.

use derive_more::derive::Display;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{db_core::prelude::*, email::provider::ProviderCapabilities};

use super::{
    model::{ActionField, ActionFields, RuleAction, RuleCondition, StaticCondition},
    template::Template,
};

/// Upper bound for deferred actions, in minutes (30 days).
pub const MAX_DELAY_MINUTES: i64 = 43_200;

#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize)]
#[display("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSchema {
    pub conditional_operator: Option<LogicalOperator>,
    pub condition_combinator: Option<LogicalOperator>,
    pub ai_instructions: Option<String>,
    #[serde(rename = "static")]
    pub static_condition: Option<StaticCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSchema {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub fields: Option<ActionFields>,
    pub delay_in_minutes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleSchema {
    pub name: String,
    pub condition: ConditionSchema,
    pub actions: Vec<ActionSchema>,
}

/// Email actions the provider supports, in display order.
pub fn available_actions(capabilities: ProviderCapabilities) -> Vec<ActionType> {
    let mut actions = vec![ActionType::Label];
    if capabilities.folders {
        actions.push(ActionType::MoveFolder);
    }
    actions.extend([
        ActionType::Archive,
        ActionType::MarkRead,
        ActionType::DraftEmail,
        ActionType::Reply,
        ActionType::Forward,
        ActionType::MarkSpam,
    ]);
    actions
}

/// Actions available regardless of provider.
pub fn extra_actions() -> Vec<ActionType> {
    vec![ActionType::Digest, ActionType::CallWebhook]
}

pub fn allowed_actions(capabilities: ProviderCapabilities) -> Vec<ActionType> {
    let mut actions = available_actions(capabilities);
    actions.extend(extra_actions());
    actions
}

/// Fields an action of this type needs before it can run.
fn required_fields(action_type: ActionType) -> &'static [ActionField] {
    match action_type {
        ActionType::Label => &[ActionField::Label],
        ActionType::MoveFolder => &[ActionField::FolderName],
        ActionType::DraftEmail | ActionType::Reply => &[ActionField::Content],
        ActionType::Forward => &[ActionField::To],
        ActionType::CallWebhook => &[ActionField::WebhookUrl],
        ActionType::Archive | ActionType::MarkRead | ActionType::MarkSpam | ActionType::Digest => {
            &[]
        }
    }
}

impl CreateRuleSchema {
    /// Checks the document against the account's provider before anything is stored.
    pub fn validate(&self, capabilities: ProviderCapabilities) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "Rule name is required"));
        }

        let has_ai = self
            .condition
            .ai_instructions
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        let has_static = self
            .condition
            .static_condition
            .as_ref()
            .is_some_and(|s| !s.is_empty());
        if !has_ai && !has_static {
            return Err(ValidationError::new(
                "condition",
                "A rule needs AI instructions or at least one static condition",
            ));
        }

        if self.actions.is_empty() {
            return Err(ValidationError::new("actions", "A rule needs at least one action"));
        }

        let allowed = allowed_actions(capabilities);
        for (index, action) in self.actions.iter().enumerate() {
            validate_action(index, action, &allowed, capabilities)?;
        }

        Ok(())
    }

    pub fn to_condition(&self) -> RuleCondition {
        RuleCondition {
            conditional_operator: self.condition.conditional_operator,
            condition_combinator: self
                .condition
                .condition_combinator
                .unwrap_or(LogicalOperator::And),
            ai_instructions: self
                .condition
                .ai_instructions
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            static_condition: self
                .condition
                .static_condition
                .clone()
                .filter(|s| !s.is_empty()),
        }
    }

    /// Only valid after `validate` succeeded.
    pub fn to_actions(&self) -> Vec<RuleAction> {
        self.actions
            .iter()
            .map(|a| RuleAction {
                action_type: a.action_type,
                fields: a.fields.clone().unwrap_or_default(),
                delay_in_minutes: a
                    .delay_in_minutes
                    .filter(|d| *d > 0)
                    .and_then(|d| u32::try_from(d).ok()),
            })
            .collect()
    }
}

fn validate_action(
    index: usize,
    action: &ActionSchema,
    allowed: &[ActionType],
    capabilities: ProviderCapabilities,
) -> Result<(), ValidationError> {
    let prefix = format!("actions[{index}]");

    if !allowed.contains(&action.action_type) {
        return Err(ValidationError::new(
            format!("{prefix}.type"),
            format!(
                "{} is not available for this email provider",
                action_type_name(action.action_type)
            ),
        ));
    }

    let fields = action.fields.clone().unwrap_or_default();
    if !capabilities.folders && fields.folder_name.is_some() {
        return Err(ValidationError::new(
            format!("{prefix}.fields.folderName"),
            "Folders are not available for this email provider",
        ));
    }

    for field in required_fields(action.action_type) {
        if fields.get(*field).is_none() {
            return Err(ValidationError::new(
                format!("{prefix}.fields.{field}"),
                format!(
                    "{} requires {field}",
                    action_type_name(action.action_type)
                ),
            ));
        }
    }

    for (field, value) in fields.present() {
        Template::parse(value).map_err(|e| {
            ValidationError::new(format!("{prefix}.fields.{field}"), e.to_string())
        })?;
    }

    if let Some(url) = fields.get(ActionField::WebhookUrl) {
        // A fully dynamic URL can only be checked once resolved
        let is_dynamic = !Template::parse(url).map(|t| t.is_literal()).unwrap_or(true);
        if !is_dynamic {
            let parsed = Url::parse(url).map_err(|e| {
                ValidationError::new(
                    format!("{prefix}.fields.webhookUrl"),
                    format!("Invalid webhook URL: {e}"),
                )
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ValidationError::new(
                    format!("{prefix}.fields.webhookUrl"),
                    "Webhook URL must use http or https",
                ));
            }
        }
    }

    if let Some(delay) = action.delay_in_minutes {
        if !(0..=MAX_DELAY_MINUTES).contains(&delay) {
            return Err(ValidationError::new(
                format!("{prefix}.delayInMinutes"),
                format!("Delay must be between 0 and {MAX_DELAY_MINUTES} minutes"),
            ));
        }
    }

    Ok(())
}

pub fn action_type_name(action_type: ActionType) -> String {
    serde_json::to_value(action_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{action_type:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(actions: serde_json::Value) -> CreateRuleSchema {
        serde_json::from_value(json!({
            "name": "Receipts",
            "condition": {
                "aiInstructions": "Receipts and invoices",
                "static": { "from": "billing@" }
            },
            "actions": actions
        }))
        .unwrap()
    }

    #[test]
    fn test_available_actions_by_capability() {
        let gmail = available_actions(ProviderCapabilities::GMAIL);
        assert!(!gmail.contains(&ActionType::MoveFolder));
        assert_eq!(gmail.len(), 7);

        let outlook = available_actions(ProviderCapabilities::OUTLOOK);
        assert_eq!(outlook[1], ActionType::MoveFolder);
        assert_eq!(extra_actions(), vec![ActionType::Digest, ActionType::CallWebhook]);
    }

    #[test]
    fn test_move_folder_rejected_without_folders() {
        let doc = schema(json!([
            { "type": "MOVE_FOLDER", "fields": { "folderName": "Receipts" } }
        ]));
        let err = doc.validate(ProviderCapabilities::GMAIL).unwrap_err();
        assert_eq!(err.field, "actions[0].type");
        assert!(err.message.contains("MOVE_FOLDER"));

        assert!(doc.validate(ProviderCapabilities::OUTLOOK).is_ok());
    }

    #[test]
    fn test_folder_name_rejected_without_folders() {
        let doc = schema(json!([
            { "type": "LABEL", "fields": { "label": "Receipts", "folderName": "Receipts" } }
        ]));
        let err = doc.validate(ProviderCapabilities::GMAIL).unwrap_err();
        assert_eq!(err.field, "actions[0].fields.folderName");
    }

    #[test]
    fn test_required_fields() {
        let doc = schema(json!([{ "type": "ARCHIVE" }, { "type": "FORWARD", "fields": {} }]));
        let err = doc.validate(ProviderCapabilities::GMAIL).unwrap_err();
        assert_eq!(err.field, "actions[1].fields.to");

        let doc = schema(json!([{ "type": "REPLY", "fields": { "content": "   " } }]));
        let err = doc.validate(ProviderCapabilities::GMAIL).unwrap_err();
        assert_eq!(err.field, "actions[0].fields.content");
    }

    #[test]
    fn test_unterminated_placeholder() {
        let doc = schema(json!([
            { "type": "REPLY", "fields": { "content": "Hi {{name, thanks" } }
        ]));
        let err = doc.validate(ProviderCapabilities::GMAIL).unwrap_err();
        assert_eq!(err.field, "actions[0].fields.content");
        assert!(err.message.contains("Unterminated"));
    }

    #[test]
    fn test_webhook_url() {
        let doc = schema(json!([
            { "type": "CALL_WEBHOOK", "fields": { "webhookUrl": "ftp://example.com/hook" } }
        ]));
        assert!(doc.validate(ProviderCapabilities::GMAIL).is_err());

        let doc = schema(json!([
            { "type": "CALL_WEBHOOK", "fields": { "webhookUrl": "https://example.com/hook" } }
        ]));
        assert!(doc.validate(ProviderCapabilities::GMAIL).is_ok());
    }

    #[test]
    fn test_delay_bounds() {
        let doc = schema(json!([{ "type": "ARCHIVE", "delayInMinutes": 43_201 }]));
        let err = doc.validate(ProviderCapabilities::GMAIL).unwrap_err();
        assert_eq!(err.field, "actions[0].delayInMinutes");

        let doc = schema(json!([{ "type": "ARCHIVE", "delayInMinutes": 60 }]));
        assert!(doc.validate(ProviderCapabilities::GMAIL).is_ok());
        assert_eq!(doc.to_actions()[0].delay_in_minutes, Some(60));
    }

    #[test]
    fn test_condition_required() {
        let doc: CreateRuleSchema = serde_json::from_value(json!({
            "name": "Empty",
            "condition": { "static": { "from": " " } },
            "actions": [{ "type": "ARCHIVE" }]
        }))
        .unwrap();
        let err = doc.validate(ProviderCapabilities::GMAIL).unwrap_err();
        assert_eq!(err.field, "condition");
    }

    #[test]
    fn test_to_condition_defaults_to_and() {
        let doc = schema(json!([{ "type": "ARCHIVE" }]));
        let condition = doc.to_condition();
        assert_eq!(condition.condition_combinator, LogicalOperator::And);
        assert_eq!(condition.ai_instructions(), Some("Receipts and invoices"));
        assert_eq!(
            condition.static_condition().and_then(|s| s.from.as_deref()),
            Some("billing@")
        );
    }
}
