//! Tool Router
//!
//! Resolves the server, applies the approval gate and runs the call through
//! the supervisor. Anything that goes wrong while a tool runs comes back as
//! a failed [`ToolInvocationResult`]; only routing problems are errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_core::{
    ApprovalRequest, ToolInvocation, ToolInvocationResult, ToolOutcome, ToolPolicy,
};
use conduit_observability::{record_duration, tool_span};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{Instrument, debug, info, warn};

use crate::classifier::ToolClassifier;
use crate::error::{RouterError, SupervisorError};
use crate::mcp::client::McpConnection;
use crate::mcp::config::McpServerConfig;
use crate::mcp::error::McpResult;
use crate::supervisor::Supervisor;

/// What to do with a tool that has no policy entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnclassifiedPolicy {
    #[default]
    RequireApproval,
    AutoRun,
}

#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    pub unclassified: UnclassifiedPolicy,
}

pub struct ToolRouter {
    supervisor: Arc<Supervisor>,
    classifier: ToolClassifier,
    config: RouterConfig,
}

impl ToolRouter {
    pub fn new(supervisor: Arc<Supervisor>, classifier: ToolClassifier) -> Self {
        Self {
            supervisor,
            classifier,
            config: RouterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn classifier(&self) -> &ToolClassifier {
        &self.classifier
    }

    fn server_config(&self, server_id: &str) -> Result<McpServerConfig, RouterError> {
        self.supervisor.config(server_id).map_err(|e| match e {
            SupervisorError::ConfigNotFound(id) => RouterError::UnknownServer(id),
            other => RouterError::Registry(other.to_string()),
        })
    }

    fn needs_approval(&self, policy: Option<&ToolPolicy>) -> bool {
        match policy {
            Some(policy) => policy.kind.requires_approval(),
            None => self.config.unclassified == UnclassifiedPolicy::RequireApproval,
        }
    }

    /// Runs `operation` on the live client of `server_id` with a deadline.
    ///
    /// A connection that turns out to be dead is reported to the supervisor
    /// after the call has released the client.
    async fn call<T, F>(
        &self,
        server_id: &str,
        timeout: Duration,
        what: &str,
        operation: F,
    ) -> Result<Result<T, String>, RouterError>
    where
        F: for<'a> FnOnce(&'a dyn McpConnection) -> futures::future::BoxFuture<'a, McpResult<T>>,
    {
        let routed = self
            .supervisor
            .with_client(server_id, |connection| async move {
                let result = tokio::time::timeout(timeout, operation(connection.as_ref())).await;
                (connection, result)
            })
            .await;

        let (connection, result) = match routed {
            Ok(pair) => pair,
            Err(SupervisorError::NotFound(_)) | Err(SupervisorError::NotRunning(_)) => {
                return Err(RouterError::NotRunning(server_id.to_string()));
            }
            Err(other) => return Err(RouterError::Registry(other.to_string())),
        };

        match result {
            Ok(Ok(value)) => Ok(Ok(value)),
            Ok(Err(e)) => {
                if e.is_connection_lost() {
                    self.supervisor
                        .mark_crashed(server_id, &connection, &e.to_string())
                        .await;
                }
                Ok(Err(e.to_string()))
            }
            Err(_) => Ok(Err(format!(
                "{} timed out after {}s",
                what,
                timeout.as_secs_f64()
            ))),
        }
    }

    /// Fails fast when the server is configured but has no live connection.
    async fn ensure_running(&self, server_id: &str) -> Result<(), RouterError> {
        match self.supervisor.get_state(server_id).await {
            Some(state) if state.is_running() => Ok(()),
            _ => Err(RouterError::NotRunning(server_id.to_string())),
        }
    }

    /// Routes one tool call.
    ///
    /// Write tools (and unclassified ones unless configured otherwise) come
    /// back as [`ToolOutcome::ApprovalRequired`] until the same invocation is
    /// submitted with `approved` set.
    pub async fn invoke(
        &self,
        server_id: &str,
        invocation: ToolInvocation,
    ) -> Result<ToolOutcome, RouterError> {
        let span = tool_span!(server_id, invocation.name.as_str());
        let started = Instant::now();
        let outcome = self
            .invoke_routed(server_id, invocation)
            .instrument(span.clone())
            .await;
        span.in_scope(|| record_duration("tool.duration_ms", started.elapsed()));
        outcome
    }

    async fn invoke_routed(
        &self,
        server_id: &str,
        invocation: ToolInvocation,
    ) -> Result<ToolOutcome, RouterError> {
        invocation.validate()?;
        let config = self.server_config(server_id)?;
        self.ensure_running(server_id).await?;

        let policy = self.classifier.classify(&invocation.name).cloned();
        if self.needs_approval(policy.as_ref()) && !invocation.approved {
            info!(server = %server_id, tool = %invocation.name, "approval required");
            let mut request = ApprovalRequest::new(server_id, &invocation);
            if let Some(policy) = &policy {
                request = request.with_policy(policy);
            }
            return Ok(ToolOutcome::ApprovalRequired(request));
        }

        if let Some(policy) = &policy {
            debug!(server = %server_id, tool = %invocation.name, "{}", policy.running_label);
        }

        let name = invocation.name.clone();
        let arguments = match invocation.arguments {
            JsonValue::Null => JsonValue::Object(Default::default()),
            other => other,
        };
        let what = format!("tool '{}'", name);
        let result = self
            .call(server_id, config.call_timeout(), &what, move |connection| {
                Box::pin(async move { connection.call_tool(&name, arguments).await })
            })
            .await?;

        let outcome = match result {
            Ok(call) if call.is_error() => {
                let cause = call.joined_text();
                let cause = if cause.is_empty() { "tool reported an error".to_string() } else { cause };
                warn!(server = %server_id, tool = %invocation.name, error = %cause, "tool failed");
                failure(policy.as_ref(), &cause)
                    .with_data(serde_json::to_value(&call).unwrap_or_default())
            }
            Ok(call) => {
                let data = serde_json::to_value(&call).unwrap_or_default();
                let result = ToolInvocationResult::success(data);
                match &policy {
                    Some(policy) => result.with_message(policy.success_label.clone()),
                    None => result,
                }
            }
            Err(cause) => {
                warn!(server = %server_id, tool = %invocation.name, error = %cause, "tool call failed");
                failure(policy.as_ref(), &cause)
            }
        };

        Ok(ToolOutcome::Completed(outcome))
    }

    /// Resources the server advertises. No approval gate.
    pub async fn list_resources(&self, server_id: &str) -> Result<ToolInvocationResult, RouterError> {
        let config = self.server_config(server_id)?;
        let result = self
            .call(server_id, config.call_timeout(), "resources/list", |connection| {
                Box::pin(connection.list_resources())
            })
            .await?;
        Ok(wrap(result))
    }

    pub async fn read_resource(
        &self,
        server_id: &str,
        uri: &str,
    ) -> Result<ToolInvocationResult, RouterError> {
        if uri.trim().is_empty() {
            return Err(RouterError::InvalidInvocation("resource uri is empty".to_string()));
        }
        let config = self.server_config(server_id)?;
        let uri = uri.to_string();
        let result = self
            .call(server_id, config.call_timeout(), "resources/read", move |connection| {
                Box::pin(async move { connection.read_resource(&uri).await })
            })
            .await?;
        Ok(wrap(result))
    }

    pub async fn list_tools(&self, server_id: &str) -> Result<ToolInvocationResult, RouterError> {
        let config = self.server_config(server_id)?;
        let result = self
            .call(server_id, config.call_timeout(), "tools/list", |connection| {
                Box::pin(connection.list_tools())
            })
            .await?;
        Ok(wrap(result))
    }
}

fn failure(policy: Option<&ToolPolicy>, cause: &str) -> ToolInvocationResult {
    match policy {
        Some(policy) => ToolInvocationResult::failure(format!("{}: {}", policy.failure_label, cause)),
        None => ToolInvocationResult::failure(cause),
    }
}

fn wrap<T: Serialize>(result: Result<T, String>) -> ToolInvocationResult {
    match result {
        Ok(value) => match serde_json::to_value(&value) {
            Ok(data) => ToolInvocationResult::success(data),
            Err(e) => ToolInvocationResult::failure(e.to_string()),
        },
        Err(cause) => ToolInvocationResult::failure(cause),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclassified_default_requires_approval() {
        assert_eq!(UnclassifiedPolicy::default(), UnclassifiedPolicy::RequireApproval);
        let json = serde_json::to_string(&UnclassifiedPolicy::AutoRun).unwrap();
        assert_eq!(json, r#""auto_run""#);
    }

    #[test]
    fn test_failure_uses_label() {
        let policy = ToolPolicy::write("Deleting", "Deleted", "Delete failed");
        let result = failure(Some(&policy), "disk full");
        assert!(!result.success);
        assert_eq!(result.message.as_deref(), Some("Delete failed: disk full"));

        let bare = failure(None, "disk full");
        assert_eq!(bare.message.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_wrap() {
        let ok = wrap(Ok(vec!["a", "b"]));
        assert!(ok.success);
        assert_eq!(ok.data.unwrap()[1], "b");

        let err = wrap::<()>(Err("boom".to_string()));
        assert!(!err.success);
        assert_eq!(err.message.as_deref(), Some("boom"));
    }
}
