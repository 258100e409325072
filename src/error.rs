//! Error taxonomy for the orchestration core.
//!
//! External calls report failures as [`Fault`] values so the resilience
//! layer can decide on retries without unwinding. Faults that escape an
//! agent are classified into an [`ErrorKind`] for the final envelope.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable fault codes. Raw upstream error text never travels past an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    Auth,
    Quota,
    InvalidRange,
    InvalidArgument,
    UnknownTool,
    Validation,
    Unavailable,
    Timeout,
    RateLimited,
    CircuitOpen,
    DeadlineExceeded,
}

impl FaultCode {
    /// Faults worth retrying against the same dependency.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FaultCode::Timeout | FaultCode::RateLimited | FaultCode::Unavailable
        )
    }

    /// Faults the model can fix by re-issuing the call with other arguments.
    pub fn is_caller_correctable(self) -> bool {
        matches!(
            self,
            FaultCode::InvalidArgument | FaultCode::InvalidRange | FaultCode::UnknownTool
        )
    }

    /// Whether a failed attempt with this code says anything about the
    /// health of the dependency (and so feeds its circuit breaker).
    pub fn counts_against_dependency(self) -> bool {
        !matches!(
            self,
            FaultCode::InvalidArgument
                | FaultCode::InvalidRange
                | FaultCode::UnknownTool
                | FaultCode::Validation
                | FaultCode::CircuitOpen
                | FaultCode::DeadlineExceeded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FaultCode::Auth => "auth",
            FaultCode::Quota => "quota",
            FaultCode::InvalidRange => "invalid_range",
            FaultCode::InvalidArgument => "invalid_argument",
            FaultCode::UnknownTool => "unknown_tool",
            FaultCode::Validation => "validation",
            FaultCode::Unavailable => "unavailable",
            FaultCode::Timeout => "timeout",
            FaultCode::RateLimited => "rate_limited",
            FaultCode::CircuitOpen => "circuit_open",
            FaultCode::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure from an external call or argument validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub code: FaultCode,
    pub message: String,
}

impl Fault {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(FaultCode::InvalidArgument, message)
    }

    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::new(FaultCode::InvalidRange, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Unavailable, message)
    }

    pub fn circuit_open(dependency: &str) -> Self {
        Self::new(
            FaultCode::CircuitOpen,
            format!("{} is unavailable (circuit open)", dependency),
        )
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(FaultCode::DeadlineExceeded, "query deadline exceeded")
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Fault {}

/// Errors that leave the orchestration core. Agent failures are reported
/// inside the query result, so only a malformed query is an error here.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid query: {0}")]
    Validation(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Error category as reported in a query result's `errors` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ToolExecution,
    Model,
    DependencyUnavailable,
    DeadlineExceeded,
    IterationLimit,
}

impl ErrorKind {
    /// Classify a fault raised by a tool call.
    pub fn for_tool_fault(code: FaultCode) -> Self {
        match code {
            FaultCode::CircuitOpen => ErrorKind::DependencyUnavailable,
            FaultCode::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            FaultCode::Validation => ErrorKind::Validation,
            _ => ErrorKind::ToolExecution,
        }
    }

    /// Classify a fault raised by the model completion call.
    pub fn for_model_fault(code: FaultCode) -> Self {
        match code {
            FaultCode::CircuitOpen => ErrorKind::DependencyUnavailable,
            FaultCode::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            _ => ErrorKind::Model,
        }
    }
}
