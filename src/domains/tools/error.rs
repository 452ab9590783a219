//! Errors raised by the tools domain.

use thiserror::Error;

/// Registration, lookup and argument errors for tools.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    Unknown(String),

    #[error("Tool '{0}' is already registered")]
    Duplicate(String),

    /// Arguments did not match the tool's parameter type.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool is registered but its circuit breaker is missing.
    #[error("Tool '{0}' has no circuit breaker")]
    Unguarded(String),
}

impl ToolError {
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::Unknown(name.into())
    }

    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_tool() {
        assert_eq!(ToolError::unknown("fetch").to_string(), "Unknown tool 'fetch'");
        assert_eq!(
            ToolError::Duplicate("echo".into()).to_string(),
            "Tool 'echo' is already registered"
        );
    }

    #[test]
    fn test_deserialize_failure_is_invalid_arguments() {
        let err = serde_json::from_value::<u32>(serde_json::json!("seven")).unwrap_err();
        assert!(matches!(ToolError::from(err), ToolError::InvalidArguments(msg) if msg.contains("invalid type")));
    }
}
