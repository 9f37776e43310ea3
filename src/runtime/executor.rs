/// Node executor collaborators
///
/// The scheduler treats running a node's script as an opaque call: a script
/// reference plus resolved parameters go in, a JSON result or an error comes
/// out. The deadline is enforced by the caller; implementations may also use
/// it to bound their own transport.

use crate::errors::NodeError;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Runs one node attempt
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn run(
        &self,
        script_ref: &str,
        params: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, NodeError>;
}

/// Executor that delegates to an external script sandbox over HTTP
///
/// Sends `POST {base_url}/run` with `{script_ref, params, timeout_seconds}`.
/// A 2xx response carrying `{"data": ...}` is the node result; anything else
/// becomes `NodeError::Execution` with the status and body as details.
#[derive(Debug, Clone)]
pub struct HttpNodeExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNodeExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl NodeExecutor for HttpNodeExecutor {
    async fn run(
        &self,
        script_ref: &str,
        params: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, NodeError> {
        let url = format!("{}/run", self.base_url);
        tracing::debug!("🌐 Dispatching script '{}' to {}", script_ref, url);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&json!({
                "script_ref": script_ref,
                "params": params,
                "timeout_seconds": timeout.as_secs(),
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NodeError::Timeout {
                        timeout_seconds: timeout.as_secs(),
                    }
                } else {
                    NodeError::execution(format!("executor request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NodeError::execution(format!("failed to read executor response: {}", e)))?;
        let parsed: Option<Value> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let message = parsed
                .as_ref()
                .and_then(|v| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("executor returned {}", status));

            return Err(NodeError::Execution {
                message,
                details: Some(json!({
                    "status": status.as_u16(),
                    "body": parsed.unwrap_or(Value::String(body)),
                })),
            });
        }

        match parsed {
            Some(Value::Object(mut obj)) if obj.contains_key("data") => {
                Ok(obj.remove("data").unwrap_or(Value::Null))
            }
            _ => Err(NodeError::Execution {
                message: "executor response has no 'data' field".to_string(),
                details: Some(json!({ "status": status.as_u16(), "body": body })),
            }),
        }
    }
}
