use chrono::{DateTime, Duration, Utc};
use derive_more::derive::Display;
use futures::future::try_join_all;
use serde::Serialize;

use crate::{
    db_core::prelude::ActionType,
    email::message::CanonicalMessage,
    prompt::{DynLanguageModel, ModelError},
};

use super::{
    model::{ActionField, ActionFields, RuleAction},
    template::{Template, TemplateError},
};

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ResolutionCause {
    #[display("{_0}")]
    Template(TemplateError),
    #[display("{_0}")]
    Model(ModelError),
}

/// A placeholder that could not be filled. Fails the whole action.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("Could not resolve {field} placeholder '{span}': {source}")]
pub struct ResolutionError {
    pub field: ActionField,
    pub span: String,
    pub source: ResolutionCause,
}

impl std::error::Error for ResolutionError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAction {
    pub index: usize,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub fields: ActionFields,
}

/// Deferred execution keyed by (rule, message, action index).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredJob {
    pub rule_id: String,
    pub message_id: String,
    pub thread_id: String,
    pub action_index: usize,
    pub run_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready(ResolvedAction),
    Deferred(DeferredJob),
}

#[derive(Clone)]
pub struct ActionResolver {
    model: DynLanguageModel,
}

impl ActionResolver {
    pub fn new(model: DynLanguageModel) -> Self {
        Self { model }
    }

    /// Resolves now, or hands back a deferred job when the action has a delay.
    /// Delayed actions are resolved when the job runs.
    pub async fn prepare(
        &self,
        rule_id: &str,
        message: &CanonicalMessage,
        index: usize,
        action: &RuleAction,
    ) -> Result<Resolution, ResolutionError> {
        if let Some(minutes) = action.delay_in_minutes.filter(|_| action.is_delayed()) {
            return Ok(Resolution::Deferred(DeferredJob {
                rule_id: rule_id.to_string(),
                message_id: message.id.clone(),
                thread_id: message.thread_id.clone(),
                action_index: index,
                run_at: Utc::now() + Duration::minutes(minutes as i64),
            }));
        }

        self.resolve(message, index, action)
            .await
            .map(Resolution::Ready)
    }

    pub async fn resolve(
        &self,
        message: &CanonicalMessage,
        index: usize,
        action: &RuleAction,
    ) -> Result<ResolvedAction, ResolutionError> {
        let present = action.fields.present();
        let resolved = try_join_all(
            present
                .iter()
                .map(|(field, value)| self.resolve_field(message, *field, value)),
        )
        .await?;

        let mut fields = ActionFields::default();
        for (field, value) in resolved {
            fields.set(field, value);
        }

        Ok(ResolvedAction {
            index,
            action_type: action.action_type,
            fields,
        })
    }

    async fn resolve_field(
        &self,
        message: &CanonicalMessage,
        field: ActionField,
        value: &str,
    ) -> Result<(ActionField, String), ResolutionError> {
        let template = Template::parse(value).map_err(|e| ResolutionError {
            field,
            span: value.to_string(),
            source: ResolutionCause::Template(e),
        })?;
        if template.is_literal() {
            return Ok((field, value.to_string()));
        }

        let values = try_join_all(template.placeholders().map(|span| async move {
            self.model
                .generate(message, span)
                .await
                .map_err(|e| ResolutionError {
                    field,
                    span: span.to_string(),
                    source: ResolutionCause::Model(e),
                })
        }))
        .await?;

        Ok((field, template.render(&values)))
    }
}
