/// Outbound HTTP executor
///
/// Renders URL, query params, header values and body through the template
/// interpolator, then performs exactly one request. Transport failures,
/// timeouts and unexpected status codes never fail the task: they come back
/// as `{status, statusText, data, headers, success: false, error}` so a
/// downstream decision can branch on `success`.

use crate::runtime::executor::{ExecutionLog, ExecutionLogKind, NodeExecutor, NodeOutcome};
use crate::runtime::template::{interpolate, interpolate_value};
use crate::workflow::types::Node;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Duration;

const DEFAULT_EXPECTED_STATUS_CODES: &[u16] = &[200, 201, 202, 204];

#[derive(Debug, Clone)]
pub struct ApiCallExecutor {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl ApiCallExecutor {
    pub fn new(client: reqwest::Client, default_timeout: Duration) -> Self {
        Self {
            client,
            default_timeout,
        }
    }
}

#[async_trait]
impl NodeExecutor for ApiCallExecutor {
    fn node_type(&self) -> &'static str {
        "apiCall"
    }

    async fn execute(&self, node: &Node, input: &Value) -> anyhow::Result<NodeOutcome> {
        let config = &node.config;

        let method_name = config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = parse_method(&method_name)?;

        let url_template = config
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("apiCall node '{}' missing 'url'", node.id))?;
        let url = interpolate(url_template, input);

        let timeout = config
            .get("timeoutMs")
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let expected = expected_status_codes(config);

        tracing::debug!("🌍 HTTP Request: {} {}", method_name, url);

        let mut request = self
            .client
            .request(method.clone(), url.as_str())
            .timeout(timeout);

        let query = key_value_pairs(config.get("queryParams"), input);
        if !query.is_empty() {
            request = request.query(&query);
        }

        let headers = key_value_pairs(config.get("headers"), input);
        let has_content_type = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }

        if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
            match config.get("body") {
                Some(Value::String(template)) if !template.is_empty() => {
                    let body = interpolate(template, input);
                    if !has_content_type && serde_json::from_str::<Value>(&body).is_ok() {
                        request = request.header("Content-Type", "application/json");
                    }
                    request = request.body(body);
                }
                Some(body @ (Value::Object(_) | Value::Array(_))) => {
                    request = request.json(&interpolate_value(body, input));
                }
                _ => {}
            }
        }

        let payload = match send(request).await {
            Ok(response) => {
                let success = expected.contains(&response.status);
                let mut payload = json!({
                    "status": response.status,
                    "statusText": response.status_text,
                    "data": response.data,
                    "headers": response.headers,
                    "success": success,
                });
                if !success {
                    payload["error"] = json!(format!("Unexpected status code {}", response.status));
                }
                payload
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("Request timed out after {}ms", timeout.as_millis())
                } else {
                    e.to_string()
                };
                tracing::warn!("⚠️ apiCall '{}' transport failure: {}", node.id, reason);
                json!({
                    "status": 0,
                    "statusText": "",
                    "data": null,
                    "headers": {},
                    "success": false,
                    "error": reason,
                })
            }
        };

        let content = match payload.get("error").and_then(Value::as_str) {
            Some(error) => format!("{} {} failed: {}", method_name, url, error),
            None => format!("{} {} responded {}", method_name, url, payload["status"]),
        };

        tracing::info!("✅ HTTP request completed: {}", content);

        Ok(NodeOutcome {
            logs: vec![ExecutionLog::new(ExecutionLogKind::Api, node, content)],
            payload: Some(payload),
            allowed_source_handles: None,
            delay_ms: None,
        })
    }
}

struct ApiResponse {
    status: u16,
    status_text: String,
    data: Value,
    headers: Map<String, Value>,
}

async fn send(request: reqwest::RequestBuilder) -> Result<ApiResponse, reqwest::Error> {
    let response = request.send().await?;

    let status = response.status();
    let headers: Map<String, Value> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), Value::String(s.to_string()))))
        .collect();
    let is_json = headers
        .get("content-type")
        .and_then(Value::as_str)
        .is_some_and(|ct| ct.contains("json"));

    let text = response.text().await?;
    let data = if is_json {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    } else {
        Value::String(text)
    };

    Ok(ApiResponse {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        data,
        headers,
    })
}

fn parse_method(name: &str) -> anyhow::Result<Method> {
    match name {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        "HEAD" => Ok(Method::HEAD),
        "OPTIONS" => Ok(Method::OPTIONS),
        other => Err(anyhow::anyhow!("Unsupported HTTP method: {}", other)),
    }
}

fn expected_status_codes(config: &Value) -> Vec<u16> {
    let configured: Vec<u16> = config
        .get("expectedStatusCodes")
        .and_then(Value::as_array)
        .map(|codes| {
            codes
                .iter()
                .filter_map(|c| match c {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                })
                .filter_map(|c| u16::try_from(c).ok())
                .collect()
        })
        .unwrap_or_default();

    if configured.is_empty() {
        DEFAULT_EXPECTED_STATUS_CODES.to_vec()
    } else {
        configured
    }
}

/// Accepts `[{key, value}]` lists or plain objects; values are rendered, empty keys dropped
fn key_value_pairs(raw: Option<&Value>, input: &Value) -> Vec<(String, String)> {
    let render = |value: &Value| match value {
        Value::String(s) => interpolate(s, input),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    let pairs: Vec<(String, String)> = match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let key = item.get("key")?.as_str()?;
                Some((key.trim().to_string(), render(item.get("value").unwrap_or(&Value::Null))))
            })
            .collect(),
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.trim().to_string(), render(v))).collect(),
        _ => Vec::new(),
    };

    pairs.into_iter().filter(|(k, _)| !k.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn executor() -> ApiCallExecutor {
        ApiCallExecutor::new(reqwest::Client::new(), Duration::from_secs(5))
    }

    fn node(config: Value) -> Node {
        serde_json::from_value(json!({ "id": "api", "type": "apiCall", "name": "Weather", "config": config })).unwrap()
    }

    #[tokio::test]
    async fn renders_request_and_parses_json_response() {
        let app = Router::new().route(
            "/weather/{city}",
            post(
                |axum::extract::Path(city): axum::extract::Path<String>,
                 Query(q): Query<HashMap<String, String>>,
                 headers: HeaderMap,
                 Json(body): Json<Value>| async move {
                    Json(json!({
                        "city": city,
                        "units": q.get("units"),
                        "token": headers.get("x-token").and_then(|v| v.to_str().ok()),
                        "echo": body,
                    }))
                },
            ),
        );
        let base = serve(app).await;

        let config = json!({
            "method": "post",
            "url": format!("{}/weather/{{{{city}}}}", base),
            "headers": [{ "key": "X-Token", "value": "t-{{user.id}}" }],
            "queryParams": { "units": "metric" },
            "body": { "who": "{{user.id}}" }
        });
        let input = json!({ "city": "Oslo", "user": { "id": 7 } });

        let outcome = executor().execute(&node(config), &input).await.unwrap();
        let payload = outcome.payload.unwrap();

        assert_eq!(payload["status"], 200);
        assert_eq!(payload["statusText"], "OK");
        assert_eq!(payload["success"], true);
        assert!(payload.get("error").is_none());
        assert_eq!(
            payload["data"],
            json!({ "city": "Oslo", "units": "metric", "token": "t-7", "echo": { "who": "7" } })
        );
        assert_eq!(outcome.logs[0].kind, ExecutionLogKind::Api);
    }

    #[tokio::test]
    async fn unexpected_status_is_data_not_an_error() {
        let app = Router::new().route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "nope") }),
        );
        let base = serve(app).await;

        let config = json!({ "url": format!("{}/missing", base) });
        let payload = executor().execute(&node(config), &json!({})).await.unwrap().payload.unwrap();

        assert_eq!(payload["status"], 404);
        assert_eq!(payload["success"], false);
        assert_eq!(payload["data"], "nope");
        assert_eq!(payload["error"], "Unexpected status code 404");
    }

    #[tokio::test]
    async fn configured_status_codes_replace_the_defaults() {
        let app = Router::new().route("/gone", get(|| async { StatusCode::GONE }));
        let base = serve(app).await;

        let config = json!({ "url": format!("{}/gone", base), "expectedStatusCodes": [410] });
        let payload = executor().execute(&node(config), &json!({})).await.unwrap().payload.unwrap();

        assert_eq!(payload["success"], true);
    }

    #[tokio::test]
    async fn timeout_folds_into_payload() {
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let base = serve(app).await;

        let config = json!({ "url": format!("{}/slow", base), "timeoutMs": 100 });
        let payload = executor().execute(&node(config), &json!({})).await.unwrap().payload.unwrap();

        assert_eq!(payload["status"], 0);
        assert_eq!(payload["success"], false);
        assert_eq!(payload["error"], "Request timed out after 100ms");
    }

    #[tokio::test]
    async fn bad_config_is_an_executor_error() {
        assert!(executor().execute(&node(json!({})), &json!({})).await.is_err());
        assert!(executor()
            .execute(&node(json!({ "url": "http://localhost", "method": "BREW" })), &json!({}))
            .await
            .is_err());
    }
}
