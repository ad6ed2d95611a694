use crate::runtime::executor::{ExecutionLog, ExecutionLogKind, NodeExecutor, NodeOutcome};
use crate::workflow::types::Node;
use async_trait::async_trait;
use serde_json::Value;

/// Requests a propagation delay for downstream tasks
///
/// The executor returns immediately; the scheduler applies `delay_ms` when
/// it enqueues the next tasks.
#[derive(Debug, Default)]
pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    fn node_type(&self) -> &'static str {
        "delay"
    }

    async fn execute(&self, node: &Node, input: &Value) -> anyhow::Result<NodeOutcome> {
        let unit = config_field(&node.config, "unit", "delayType")
            .and_then(Value::as_str)
            .unwrap_or("seconds");
        let value = config_field(&node.config, "value", "delayValue")
            .and_then(as_f64)
            .unwrap_or(0.0)
            .max(0.0);

        let delay_ms = (value * unit_millis(unit)).round() as u64;
        let content = format!("Delaying downstream nodes by {} {} ({}ms)", value, unit, delay_ms);

        let mut outcome = NodeOutcome::passthrough(
            input,
            ExecutionLog::new(ExecutionLogKind::Delay, node, content),
        );
        outcome.delay_ms = Some(delay_ms);
        Ok(outcome)
    }
}

fn config_field<'a>(config: &'a Value, key: &str, legacy_key: &str) -> Option<&'a Value> {
    config
        .get(key)
        .filter(|v| !v.is_null())
        .or_else(|| config.get(legacy_key))
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Milliseconds per unit; unknown units count as seconds
fn unit_millis(unit: &str) -> f64 {
    match unit {
        "minutes" => 60_000.0,
        "hours" => 3_600_000.0,
        "days" => 86_400_000.0,
        _ => 1_000.0,
    }
}
