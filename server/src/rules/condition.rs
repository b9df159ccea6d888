use derive_more::derive::Display;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;

use crate::{
    db_core::prelude::LogicalOperator,
    email::message::CanonicalMessage,
    prompt::{DynLanguageModel, ModelError},
};

use super::model::{RuleCondition, StaticCondition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StaticField {
    #[display("from")]
    From,
    #[display("to")]
    To,
    #[display("subject")]
    Subject,
}

/// What caused a condition to match, kept for audit and display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MatchReason {
    Static { field: StaticField, pattern: String },
    Ai { instruction: String, rationale: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConditionMatch {
    pub matched: bool,
    pub reasons: Vec<MatchReason>,
}

impl ConditionMatch {
    fn no_match() -> Self {
        Self::default()
    }

    fn matched(reasons: Vec<MatchReason>) -> Self {
        Self {
            matched: true,
            reasons,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("AI condition '{instruction}' could not be evaluated: {source}")]
pub struct EvaluationError {
    pub instruction: String,
    pub source: ModelError,
}

impl std::error::Error for EvaluationError {}

/// Nested conditions. A stored rule is a single leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionTree {
    Leaf(RuleCondition),
    All(Vec<ConditionTree>),
    Any(Vec<ConditionTree>),
}

impl ConditionTree {
    /// Joins sibling conditions with the first condition's operator (AND when unset).
    pub fn from_siblings(mut conditions: Vec<RuleCondition>) -> Self {
        if conditions.len() == 1 {
            return ConditionTree::Leaf(conditions.remove(0));
        }
        let operator = conditions
            .first()
            .and_then(|c| c.conditional_operator)
            .unwrap_or(LogicalOperator::And);
        let leaves = conditions.into_iter().map(ConditionTree::Leaf).collect();
        match operator {
            LogicalOperator::And => ConditionTree::All(leaves),
            LogicalOperator::Or => ConditionTree::Any(leaves),
        }
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(&needle.trim().to_lowercase()))
}

/// Matches every present static field; `None` when any field misses.
pub fn match_static(
    message: &CanonicalMessage,
    condition: &StaticCondition,
) -> Option<Vec<MatchReason>> {
    let checks = [
        (StaticField::From, condition.from.as_deref(), message.headers.from.as_deref()),
        (StaticField::To, condition.to.as_deref(), message.headers.to.as_deref()),
        (
            StaticField::Subject,
            condition.subject.as_deref(),
            message.headers.subject.as_deref(),
        ),
    ];

    let mut reasons = vec![];
    for (field, pattern, header) in checks {
        let Some(pattern) = pattern.filter(|p| !p.trim().is_empty()) else {
            continue;
        };
        if !contains_ci(header, pattern) {
            return None;
        }
        reasons.push(MatchReason::Static {
            field,
            pattern: pattern.trim().to_string(),
        });
    }
    Some(reasons)
}

#[derive(Clone)]
pub struct ConditionEvaluator {
    model: DynLanguageModel,
}

impl ConditionEvaluator {
    pub fn new(model: DynLanguageModel) -> Self {
        Self { model }
    }

    /// Evaluates one condition. The static block and AI instruction combine through
    /// `condition_combinator`; the model is only called when the result depends on it.
    pub async fn evaluate(
        &self,
        message: &CanonicalMessage,
        condition: &RuleCondition,
    ) -> Result<ConditionMatch, EvaluationError> {
        let static_result = condition.static_condition().map(|s| match_static(message, s));
        let instruction = condition.ai_instructions();

        match (condition.condition_combinator, static_result, instruction) {
            (_, None, None) => Ok(ConditionMatch::no_match()),
            (_, Some(None), None) => Ok(ConditionMatch::no_match()),
            (_, Some(Some(reasons)), None) => Ok(ConditionMatch::matched(reasons)),
            (LogicalOperator::And, Some(None), Some(_)) => Ok(ConditionMatch::no_match()),
            (LogicalOperator::Or, Some(Some(reasons)), Some(_)) => {
                Ok(ConditionMatch::matched(reasons))
            }
            (LogicalOperator::And, Some(Some(mut reasons)), Some(instruction)) => {
                match self.judge(message, instruction).await? {
                    Some(reason) => {
                        reasons.push(reason);
                        Ok(ConditionMatch::matched(reasons))
                    }
                    None => Ok(ConditionMatch::no_match()),
                }
            }
            (_, _, Some(instruction)) => Ok(self
                .judge(message, instruction)
                .await?
                .map(|reason| ConditionMatch::matched(vec![reason]))
                .unwrap_or_else(ConditionMatch::no_match)),
        }
    }

    pub fn evaluate_tree<'a>(
        &'a self,
        message: &'a CanonicalMessage,
        tree: &'a ConditionTree,
    ) -> BoxFuture<'a, Result<ConditionMatch, EvaluationError>> {
        async move {
            match tree {
                ConditionTree::Leaf(condition) => self.evaluate(message, condition).await,
                ConditionTree::All(children) => {
                    let mut reasons = vec![];
                    for child in children {
                        let result = self.evaluate_tree(message, child).await?;
                        if !result.matched {
                            return Ok(ConditionMatch::no_match());
                        }
                        reasons.extend(result.reasons);
                    }
                    if children.is_empty() {
                        return Ok(ConditionMatch::no_match());
                    }
                    Ok(ConditionMatch::matched(reasons))
                }
                ConditionTree::Any(children) => {
                    for child in children {
                        let result = self.evaluate_tree(message, child).await?;
                        if result.matched {
                            return Ok(result);
                        }
                    }
                    Ok(ConditionMatch::no_match())
                }
            }
        }
        .boxed()
    }

    async fn judge(
        &self,
        message: &CanonicalMessage,
        instruction: &str,
    ) -> Result<Option<MatchReason>, EvaluationError> {
        let judgement = self
            .model
            .judge(message, instruction)
            .await
            .map_err(|source| EvaluationError {
                instruction: instruction.to_string(),
                source,
            })?;

        tracing::debug!(
            "AI judged '{}' for message {}: {} ({})",
            instruction,
            message.id,
            judgement.matched,
            judgement.rationale
        );

        Ok(judgement.matched.then(|| MatchReason::Ai {
            instruction: instruction.to_string(),
            rationale: judgement.rationale,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        email::message::MessageHeaders,
        testing::fakes::ScriptedModel,
    };

    fn message() -> CanonicalMessage {
        CanonicalMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            headers: MessageHeaders {
                from: Some("Billing <billing@shop.example>".to_string()),
                to: Some("me@example.com".to_string()),
                subject: Some("Your Receipt #42".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn condition(
        combinator: LogicalOperator,
        ai: Option<&str>,
        from: Option<&str>,
        subject: Option<&str>,
    ) -> RuleCondition {
        RuleCondition {
            conditional_operator: None,
            condition_combinator: combinator,
            ai_instructions: ai.map(str::to_string),
            static_condition: Some(StaticCondition {
                from: from.map(str::to_string),
                to: None,
                subject: subject.map(str::to_string),
            }),
        }
    }

    #[test]
    fn test_match_static_all_fields_required() {
        let msg = message();
        let both = StaticCondition {
            from: Some("BILLING@shop".to_string()),
            subject: Some("receipt".to_string()),
            to: None,
        };
        let reasons = match_static(&msg, &both).unwrap();
        assert_eq!(reasons.len(), 2);

        let one_misses = StaticCondition {
            subject: Some("invoice".to_string()),
            ..both
        };
        assert!(match_static(&msg, &one_misses).is_none());
    }

    #[tokio::test]
    async fn test_static_only_makes_no_model_calls() {
        let model = Arc::new(ScriptedModel::judging(true));
        let evaluator = ConditionEvaluator::new(model.clone());

        let result = evaluator
            .evaluate(&message(), &condition(LogicalOperator::And, None, Some("billing"), None))
            .await
            .unwrap();
        assert!(result.matched);
        assert_eq!(model.judge_calls(), 0);
    }

    #[tokio::test]
    async fn test_and_static_mismatch_skips_model() {
        let model = Arc::new(ScriptedModel::judging(true));
        let evaluator = ConditionEvaluator::new(model.clone());

        let result = evaluator
            .evaluate(
                &message(),
                &condition(LogicalOperator::And, Some("Receipts"), Some("someone-else"), None),
            )
            .await
            .unwrap();
        assert!(!result.matched);
        assert_eq!(model.judge_calls(), 0);
    }

    #[tokio::test]
    async fn test_and_requires_both() {
        let model = Arc::new(ScriptedModel::judging(false));
        let evaluator = ConditionEvaluator::new(model.clone());

        let result = evaluator
            .evaluate(
                &message(),
                &condition(LogicalOperator::And, Some("Receipts"), Some("billing"), None),
            )
            .await
            .unwrap();
        assert!(!result.matched);
        assert_eq!(model.judge_calls(), 1);
    }

    #[tokio::test]
    async fn test_or_falls_back_to_model() {
        let model = Arc::new(ScriptedModel::judging(true));
        let evaluator = ConditionEvaluator::new(model.clone());

        let result = evaluator
            .evaluate(
                &message(),
                &condition(LogicalOperator::Or, Some("Receipts"), Some("nobody"), None),
            )
            .await
            .unwrap();
        assert!(result.matched);
        assert!(matches!(result.reasons[0], MatchReason::Ai { .. }));
        assert_eq!(model.judge_calls(), 1);

        let result = evaluator
            .evaluate(
                &message(),
                &condition(LogicalOperator::Or, Some("Receipts"), Some("billing"), None),
            )
            .await
            .unwrap();
        assert!(result.matched);
        assert_eq!(model.judge_calls(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_names_instruction() {
        let model = Arc::new(ScriptedModel::failing());
        let evaluator = ConditionEvaluator::new(model);

        let err = evaluator
            .evaluate(&message(), &condition(LogicalOperator::And, Some("Receipts"), None, None))
            .await
            .unwrap_err();
        assert_eq!(err.instruction, "Receipts");
    }

    #[tokio::test]
    async fn test_tree_any_and_all() {
        let model = Arc::new(ScriptedModel::judging(true));
        let evaluator = ConditionEvaluator::new(model);
        let miss = condition(LogicalOperator::And, None, Some("nobody"), None);
        let hit = condition(LogicalOperator::And, None, None, Some("receipt"));

        let any = ConditionTree::Any(vec![
            ConditionTree::Leaf(miss.clone()),
            ConditionTree::Leaf(hit.clone()),
        ]);
        assert!(evaluator.evaluate_tree(&message(), &any).await.unwrap().matched);

        let all = ConditionTree::All(vec![ConditionTree::Leaf(hit), ConditionTree::Leaf(miss)]);
        assert!(!evaluator.evaluate_tree(&message(), &all).await.unwrap().matched);
    }

    #[test]
    fn test_from_siblings() {
        let mut or = condition(LogicalOperator::And, Some("a"), None, None);
        or.conditional_operator = Some(LogicalOperator::Or);
        let tree = ConditionTree::from_siblings(vec![or.clone(), or.clone()]);
        assert!(matches!(tree, ConditionTree::Any(ref c) if c.len() == 2));
        assert!(matches!(
            ConditionTree::from_siblings(vec![or]),
            ConditionTree::Leaf(_)
        ));
    }
}
