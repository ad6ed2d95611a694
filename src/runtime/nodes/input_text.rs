use crate::runtime::executor::{ExecutionLog, ExecutionLogKind, NodeExecutor, NodeOutcome};
use crate::workflow::types::Node;
use async_trait::async_trait;
use serde_json::Value;

/// Entry node: forwards the run input unchanged
#[derive(Debug, Default)]
pub struct InputTextExecutor;

#[async_trait]
impl NodeExecutor for InputTextExecutor {
    fn node_type(&self) -> &'static str {
        "inputText"
    }

    async fn execute(&self, node: &Node, input: &Value) -> anyhow::Result<NodeOutcome> {
        let content = format!("Input: {}", serde_json::to_string(input)?);
        Ok(NodeOutcome::passthrough(
            input,
            ExecutionLog::new(ExecutionLogKind::Input, node, content),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn logs_and_forwards_input() {
        let node: Node = serde_json::from_value(json!({ "id": "in", "type": "inputText", "name": "Form" })).unwrap();
        let outcome = InputTextExecutor.execute(&node, &json!({ "city": "Oslo" })).await.unwrap();

        assert_eq!(outcome.payload, Some(json!({ "city": "Oslo" })));
        assert_eq!(outcome.logs[0].content, r#"Input: {"city":"Oslo"}"#);
        assert_eq!(outcome.logs[0].name, "Form");
        assert!(outcome.allowed_source_handles.is_none());
    }
}
