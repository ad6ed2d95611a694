use crate::runtime::executor::{ExecutionLog, ExecutionLogKind, NodeExecutor, NodeOutcome};
use crate::runtime::template::interpolate;
use crate::workflow::types::Node;
use async_trait::async_trait;
use serde_json::Value;

/// Renders `config.template` against the input into a notification log
#[derive(Debug, Default)]
pub struct NotificationExecutor;

#[async_trait]
impl NodeExecutor for NotificationExecutor {
    fn node_type(&self) -> &'static str {
        "notification"
    }

    async fn execute(&self, node: &Node, input: &Value) -> anyhow::Result<NodeOutcome> {
        let template = node
            .config
            .get("template")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let content = interpolate(template, input);

        tracing::debug!("🔔 Notification from '{}': {}", node.id, content);

        Ok(NodeOutcome::passthrough(
            input,
            ExecutionLog::new(ExecutionLogKind::Notification, node, content),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn renders_template_without_touching_payload() {
        let node: Node = serde_json::from_value(json!({
            "id": "n",
            "type": "notification",
            "config": { "template": "Alert for {{city}}: {{temp}}°C{{missing}}" }
        }))
        .unwrap();
        let input = json!({ "city": "Oslo", "temp": 31 });

        let outcome = NotificationExecutor.execute(&node, &input).await.unwrap();

        assert_eq!(outcome.logs[0].content, "Alert for Oslo: 31°C");
        assert_eq!(outcome.logs[0].kind, ExecutionLogKind::Notification);
        assert_eq!(outcome.logs[0].name, "notification-n");
        assert_eq!(outcome.payload, Some(input));
    }
}
