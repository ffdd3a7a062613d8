use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::CoreError;

/// Whether a tool may run unattended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Side-effect free, executed immediately.
    Read,
    /// Mutates something, requires explicit approval.
    Write,
}

impl ToolKind {
    pub fn requires_approval(self) -> bool {
        matches!(self, ToolKind::Write)
    }
}

impl std::str::FromStr for ToolKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(ToolKind::Read),
            "write" => Ok(ToolKind::Write),
            other => Err(CoreError::UnknownToolKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolKind::Read => f.write_str("read"),
            ToolKind::Write => f.write_str("write"),
        }
    }
}

/// Policy record for one tool name, with the labels a UI shows while the
/// call runs and after it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicy {
    pub kind: ToolKind,
    pub running_label: String,
    pub success_label: String,
    pub failure_label: String,
}

impl ToolPolicy {
    pub fn new(
        kind: ToolKind,
        running_label: impl Into<String>,
        success_label: impl Into<String>,
        failure_label: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            running_label: running_label.into(),
            success_label: success_label.into(),
            failure_label: failure_label.into(),
        }
    }

    pub fn read(
        running_label: impl Into<String>,
        success_label: impl Into<String>,
        failure_label: impl Into<String>,
    ) -> Self {
        Self::new(ToolKind::Read, running_label, success_label, failure_label)
    }

    pub fn write(
        running_label: impl Into<String>,
        success_label: impl Into<String>,
        failure_label: impl Into<String>,
    ) -> Self {
        Self::new(ToolKind::Write, running_label, success_label, failure_label)
    }
}

/// A request to run one tool on one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default = "empty_arguments")]
    pub arguments: JsonValue,
    /// Set by the caller once the user consented to a gated tool.
    #[serde(default)]
    pub approved: bool,
}

fn empty_arguments() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: empty_arguments(),
            approved: false,
        }
    }

    pub fn with_arguments(mut self, arguments: JsonValue) -> Self {
        self.arguments = arguments;
        self
    }

    /// Same invocation, marked as approved.
    pub fn approve(mut self) -> Self {
        self.approved = true;
        self
    }

    /// Rejects invocations no server could ever accept.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidInvocation("tool name is empty".to_string()));
        }
        if !(self.arguments.is_object() || self.arguments.is_null()) {
            return Err(CoreError::InvalidInvocation(format!(
                "arguments for '{}' must be a JSON object",
                self.name
            )));
        }
        Ok(())
    }
}

/// Uniform result of a routed tool or resource call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ToolInvocationResult {
    pub fn success(data: JsonValue) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }
}

/// Everything a presentation layer needs to ask the user for consent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub server_id: String,
    pub tool: String,
    pub arguments: JsonValue,
    /// `None` when the tool has no policy entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_label: Option<String>,
}

impl ApprovalRequest {
    pub fn new(server_id: impl Into<String>, invocation: &ToolInvocation) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            server_id: server_id.into(),
            tool: invocation.name.clone(),
            arguments: invocation.arguments.clone(),
            kind: None,
            running_label: None,
        }
    }

    pub fn with_policy(mut self, policy: &ToolPolicy) -> Self {
        self.kind = Some(policy.kind);
        self.running_label = Some(policy.running_label.clone());
        self
    }
}

/// What the router did with an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Completed(ToolInvocationResult),
    ApprovalRequired(ApprovalRequest),
}

impl ToolOutcome {
    pub fn is_approval_required(&self) -> bool {
        matches!(self, ToolOutcome::ApprovalRequired(_))
    }

    pub fn into_result(self) -> Option<ToolInvocationResult> {
        match self {
            ToolOutcome::Completed(result) => Some(result),
            ToolOutcome::ApprovalRequired(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_kind_parse() {
        assert_eq!("read".parse::<ToolKind>().unwrap(), ToolKind::Read);
        assert_eq!(" WRITE ".parse::<ToolKind>().unwrap(), ToolKind::Write);
        assert!("delete".parse::<ToolKind>().is_err());
    }

    #[test]
    fn test_tool_kind_requires_approval() {
        assert!(ToolKind::Write.requires_approval());
        assert!(!ToolKind::Read.requires_approval());
    }

    #[test]
    fn test_invocation_defaults() {
        let invocation: ToolInvocation = serde_json::from_str(r#"{"name":"read_file"}"#).unwrap();
        assert_eq!(invocation.name, "read_file");
        assert_eq!(invocation.arguments, json!({}));
        assert!(!invocation.approved);
    }

    #[test]
    fn test_invocation_builder() {
        let invocation = ToolInvocation::new("write_file")
            .with_arguments(json!({"path": "/tmp/a"}))
            .approve();
        assert!(invocation.approved);
        assert_eq!(invocation.arguments["path"], "/tmp/a");
    }

    #[test]
    fn test_invocation_validation() {
        assert!(ToolInvocation::new("read").validate().is_ok());
        assert!(ToolInvocation::new("read").with_arguments(JsonValue::Null).validate().is_ok());
        assert!(ToolInvocation::new("  ").validate().is_err());

        let err = ToolInvocation::new("read")
            .with_arguments(json!([1, 2]))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn test_result_serialization() {
        let ok = ToolInvocationResult::success(json!({"text": "hi"}));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains(r#""success":true"#));
        assert!(!json.contains("message"));

        let failed = ToolInvocationResult::failure("server unreachable");
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains(r#""success":false"#));
        assert!(json.contains("server unreachable"));
        assert!(!json.contains("data"));
    }

    #[test]
    fn test_approval_request_from_policy() {
        let invocation = ToolInvocation::new("delete_all");
        let policy = ToolPolicy::write("Deleting", "Deleted", "Delete failed");
        let request = ApprovalRequest::new("files", &invocation).with_policy(&policy);

        assert_eq!(request.server_id, "files");
        assert_eq!(request.tool, "delete_all");
        assert_eq!(request.kind, Some(ToolKind::Write));
        assert_eq!(request.running_label.as_deref(), Some("Deleting"));
        assert!(!request.request_id.is_empty());
    }

    #[test]
    fn test_outcome_tagging() {
        let outcome = ToolOutcome::Completed(ToolInvocationResult::success(json!(1)));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["success"], true);

        let request = ApprovalRequest::new("files", &ToolInvocation::new("rm"));
        let outcome = ToolOutcome::ApprovalRequired(request);
        assert!(outcome.is_approval_required());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "approval_required");
        assert!(outcome.into_result().is_none());
    }
}
