//! Error types for the conformance suite.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportError;
use crate::types::ScalarValue;

/// Coarse classification of a failure, used for statistics and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown ids or misuse of the harness.
    Configuration,
    /// The underlying library call reported an error.
    Transport,
    /// The call succeeded but delivered the wrong thing.
    Verification,
    /// Allocation failure.
    Resource,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Transport => "transport",
            ErrorKind::Verification => "verification",
            ErrorKind::Resource => "resource",
        };
        f.write_str(label)
    }
}

/// Details of a verification failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerificationFailure {
    /// Message metadata (source, tag, root, count) differs from what was expected.
    #[error("{what} mismatch after {call}: expected {expected}, got {actual}")]
    Metadata {
        /// Name of the call whose status was inspected.
        call: &'static str,
        /// Which field of the status was wrong.
        what: &'static str,
        /// Expected value, rendered.
        expected: String,
        /// Observed value, rendered.
        actual: String,
    },

    /// Payload differs from the standard pattern.
    #[error("payload mismatch at element {index}{}: expected {expected}, got {actual}", field_suffix(.field))]
    Payload {
        /// Index of the first diverging element.
        index: usize,
        /// Field name for structured types.
        field: Option<&'static str>,
        /// Value the standard pattern prescribes.
        expected: ScalarValue,
        /// Value found in the buffer.
        actual: ScalarValue,
    },

    /// A free-form condition did not hold.
    #[error("{0}")]
    Condition(String),
}

fn field_suffix(field: &Option<&'static str>) -> String {
    field.map(|f| format!(" (field {f})")).unwrap_or_default()
}

/// Errors raised while building, running or verifying a test activation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SuiteError {
    /// Unknown id or harness misuse. Raised before any communication happens.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A transport call failed.
    #[error("Transport error in {call} (code {}): {source}", .source.code())]
    Transport {
        /// Name of the failing call.
        call: &'static str,
        /// Error reported by the transport.
        #[source]
        source: TransportError,
    },

    /// Data or metadata did not match.
    #[error("Verification failed: {0}")]
    Verification(#[from] VerificationFailure),

    /// Buffer allocation failed.
    #[error("Resource error: {0}")]
    Resource(String),
}

impl SuiteError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SuiteError::Configuration(_) => ErrorKind::Configuration,
            SuiteError::Transport { .. } => ErrorKind::Transport,
            SuiteError::Verification(_) => ErrorKind::Verification,
            SuiteError::Resource(_) => ErrorKind::Resource,
        }
    }
}

/// A type alias for `Result<T, SuiteError>`.
pub type SuiteResult<T> = Result<T, SuiteError>;

impl From<serde_json::Error> for SuiteError {
    fn from(err: serde_json::Error) -> Self {
        SuiteError::Configuration(format!("invalid configuration: {err}"))
    }
}
