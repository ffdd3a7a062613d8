use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("unknown tool kind: {0}")]
    UnknownToolKind(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_invocation_error() {
        let err = CoreError::InvalidInvocation("empty tool name".to_string());
        assert_eq!(err.to_string(), "invalid invocation: empty tool name");
    }

    #[test]
    fn test_unknown_tool_kind_error() {
        let err = CoreError::UnknownToolKind("delete".to_string());
        assert_eq!(err.to_string(), "unknown tool kind: delete");
    }

    #[test]
    fn test_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json");
        let err = CoreError::from(json_err.unwrap_err());
        assert!(err.to_string().contains("key must be a string"));
    }
}
