use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VagrantMcpError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("Missing dependency: {0}")]
    DependencyMissing(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout { operation: String, after: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    /// A failure that still produced a usable result (carried in `data`).
    #[error("{message}")]
    PartialResult {
        message: String,
        data: Box<serde_json::Value>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VagrantMcpError {
    /// Wrap any displayable failure as `OperationFailed`.
    pub fn failed(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        VagrantMcpError::OperationFailed {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Stable tag reported to JSON-RPC clients alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            VagrantMcpError::NotFound(_) => "not_found",
            VagrantMcpError::AlreadyExists(_) => "already_exists",
            VagrantMcpError::InvalidInput(_) => "invalid_input",
            VagrantMcpError::InvalidState(_) => "invalid_state",
            VagrantMcpError::OperationFailed { .. } => "operation_failed",
            VagrantMcpError::DependencyMissing(_) => "dependency_missing",
            VagrantMcpError::NotImplemented(_) => "not_implemented",
            VagrantMcpError::ValidationFailed(_) => "validation_failed",
            VagrantMcpError::PermissionDenied(_) => "permission_denied",
            VagrantMcpError::Timeout { .. } => "timeout",
            VagrantMcpError::Cancelled => "cancelled",
            VagrantMcpError::PartialResult { .. } => "partial_result",
            VagrantMcpError::Io(_) => "io",
            VagrantMcpError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, VagrantMcpError>;
