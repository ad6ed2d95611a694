/// Branching executors
///
/// A predicate group passes when its predicates pass under its combiner
/// (`all` by default, or `any`). Each passing group `id` opens the output
/// handle `out-<id>`. A group with no predicates and no group-level
/// `validationLogic` never passes.

use crate::runtime::executor::{ExecutionLog, ExecutionLogKind, NodeExecutor, NodeOutcome};
use crate::runtime::logic::evaluate_predicate;
use crate::runtime::template::resolve_path;
use crate::workflow::types::Node;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;

/// Routes along `out-<group id>` for every group that matches
#[derive(Debug, Default)]
pub struct DecisionExecutor;

#[async_trait]
impl NodeExecutor for DecisionExecutor {
    fn node_type(&self) -> &'static str {
        "decision"
    }

    async fn execute(&self, node: &Node, input: &Value) -> anyhow::Result<NodeOutcome> {
        let groups = node
            .config
            .get("decisions")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut matches: Vec<String> = Vec::new();
        for group in groups {
            let Some(id) = group_id(group) else {
                tracing::warn!("⚠️ Decision node '{}' has a group without an id", node.id);
                continue;
            };
            if group_passes(group, input) && !matches.contains(&id) {
                matches.push(id);
            }
        }

        let content = format!(
            "Matched {} outcome(s): {}",
            matches.len(),
            if matches.is_empty() { "none".to_string() } else { matches.join(", ") }
        );

        Ok(NodeOutcome {
            logs: vec![ExecutionLog::new(ExecutionLogKind::Decision, node, content)],
            payload: Some(input.clone()),
            allowed_source_handles: Some(matches.iter().map(|id| format!("out-{}", id)).collect()),
            delay_ms: None,
        })
    }
}

/// Two-way branch: `out-true` when the condition group passes, else `out-false`
#[derive(Debug, Default)]
pub struct IfElseExecutor;

#[async_trait]
impl NodeExecutor for IfElseExecutor {
    fn node_type(&self) -> &'static str {
        "ifElse"
    }

    async fn execute(&self, node: &Node, input: &Value) -> anyhow::Result<NodeOutcome> {
        let passed = node
            .config
            .get("condition")
            .is_some_and(|condition| group_passes(condition, input));
        let branch = if passed { "true" } else { "false" };

        let content = format!("Condition evaluated to {}: taking out-{}", branch, branch);

        Ok(NodeOutcome {
            logs: vec![ExecutionLog::new(ExecutionLogKind::Decision, node, content)],
            payload: Some(input.clone()),
            allowed_source_handles: Some(BTreeSet::from([format!("out-{}", branch)])),
            delay_ms: None,
        })
    }
}

fn group_id(group: &Value) -> Option<String> {
    match group.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Evaluate one predicate group against the input payload
pub fn group_passes(group: &Value, input: &Value) -> bool {
    let predicates = group
        .get("predicates")
        .and_then(Value::as_array)
        .filter(|p| !p.is_empty());

    match predicates {
        Some(predicates) => {
            let mut checks = predicates.iter().map(|p| predicate_passes(p, input));
            match group.get("combiner").and_then(Value::as_str) {
                Some("any") => checks.any(|ok| ok),
                _ => checks.all(|ok| ok),
            }
        }
        None => predicate_passes(group, input),
    }
}

/// `targetField` selects the subject (empty: whole payload); `validationLogic` tests it
fn predicate_passes(predicate: &Value, input: &Value) -> bool {
    let Some(logic) = predicate.get("validationLogic").filter(|l| !l.is_null()) else {
        return false;
    };

    let subject = match predicate.get("targetField").and_then(Value::as_str) {
        Some(field) if !field.is_empty() => resolve_path(input, field).cloned().unwrap_or(Value::Null),
        _ => input.clone(),
    };

    evaluate_predicate(logic, &subject)
}
