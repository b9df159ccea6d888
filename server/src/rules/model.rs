use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::db_core::prelude::*;

/// Field-level match on sender, recipient and subject. Present fields are AND-ed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCondition {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
}

impl StaticCondition {
    pub fn is_empty(&self) -> bool {
        [&self.from, &self.to, &self.subject]
            .iter()
            .all(|f| f.as_deref().map_or(true, |v| v.trim().is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    /// Combines this condition with sibling conditions.
    pub conditional_operator: Option<LogicalOperator>,
    /// Combines the static block with the AI instruction.
    pub condition_combinator: LogicalOperator,
    pub ai_instructions: Option<String>,
    #[serde(rename = "static")]
    pub static_condition: Option<StaticCondition>,
}

impl RuleCondition {
    pub fn ai_instructions(&self) -> Option<&str> {
        self.ai_instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn static_condition(&self) -> Option<&StaticCondition> {
        self.static_condition.as_ref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum ActionField {
    Label,
    To,
    Cc,
    Bcc,
    Subject,
    Content,
    WebhookUrl,
    FolderName,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionFields {
    pub label: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub webhook_url: Option<String>,
    pub folder_name: Option<String>,
}

impl ActionFields {
    fn slot(&self, field: ActionField) -> &Option<String> {
        match field {
            ActionField::Label => &self.label,
            ActionField::To => &self.to,
            ActionField::Cc => &self.cc,
            ActionField::Bcc => &self.bcc,
            ActionField::Subject => &self.subject,
            ActionField::Content => &self.content,
            ActionField::WebhookUrl => &self.webhook_url,
            ActionField::FolderName => &self.folder_name,
        }
    }

    fn slot_mut(&mut self, field: ActionField) -> &mut Option<String> {
        match field {
            ActionField::Label => &mut self.label,
            ActionField::To => &mut self.to,
            ActionField::Cc => &mut self.cc,
            ActionField::Bcc => &mut self.bcc,
            ActionField::Subject => &mut self.subject,
            ActionField::Content => &mut self.content,
            ActionField::WebhookUrl => &mut self.webhook_url,
            ActionField::FolderName => &mut self.folder_name,
        }
    }

    /// Non-blank value of a field.
    pub fn get(&self, field: ActionField) -> Option<&str> {
        self.slot(field)
            .as_deref()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn set(&mut self, field: ActionField, value: String) {
        *self.slot_mut(field) = Some(value);
    }

    /// Present fields in declaration order.
    pub fn present(&self) -> Vec<(ActionField, &str)> {
        ActionField::iter()
            .filter_map(|f| self.get(f).map(|v| (f, v)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub fields: ActionFields,
    pub delay_in_minutes: Option<u32>,
}

impl RuleAction {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            fields: ActionFields::default(),
            delay_in_minutes: None,
        }
    }

    pub fn with_field(mut self, field: ActionField, value: &str) -> Self {
        self.fields.set(field, value.to_string());
        self
    }

    pub fn with_delay(mut self, minutes: u32) -> Self {
        self.delay_in_minutes = Some(minutes);
        self
    }

    pub fn is_delayed(&self) -> bool {
        self.delay_in_minutes.is_some_and(|d| d > 0)
    }
}

impl From<action::Model> for RuleAction {
    fn from(model: action::Model) -> Self {
        Self {
            action_type: model.r#type,
            fields: ActionFields {
                label: model.label,
                to: model.to,
                cc: model.cc,
                bcc: model.bcc,
                subject: model.subject,
                content: model.content,
                webhook_url: model.webhook_url,
                folder_name: model.folder_name,
            },
            delay_in_minutes: model
                .delay_in_minutes
                .and_then(|d| u32::try_from(d).ok()),
        }
    }
}

/// A rule with its condition and ordered actions, detached from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub email_account_id: String,
    pub name: String,
    pub position: i32,
    pub enabled: bool,
    pub condition: RuleCondition,
    pub actions: Vec<RuleAction>,
}

impl Rule {
    /// `actions` must belong to `rule`; they are ordered by position here.
    pub fn from_models(rule: rule::Model, mut actions: Vec<action::Model>) -> Self {
        actions.sort_by_key(|a| a.position);

        let static_condition = StaticCondition {
            from: rule.static_from,
            to: rule.static_to,
            subject: rule.static_subject,
        };
        Self {
            id: rule.id,
            email_account_id: rule.email_account_id,
            name: rule.name,
            position: rule.position,
            enabled: rule.enabled,
            condition: RuleCondition {
                conditional_operator: rule.conditional_operator,
                condition_combinator: rule.condition_combinator,
                ai_instructions: rule.ai_instructions,
                static_condition: (!static_condition.is_empty()).then_some(static_condition),
            },
            actions: actions.into_iter().map(RuleAction::from).collect(),
        }
    }
}
