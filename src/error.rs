//! Error types for rlm-engine.

use thiserror::Error;

/// Result type alias using rlm-engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during RLM operations.
///
/// Variants line up with the error kinds the executor and sandbox
/// contract distinguish: sandbox faults are recoverable (the executor
/// keeps looping), adapter/provider faults and sandbox-fatal faults
/// terminate the current `execute()` call.
#[derive(Error, Debug)]
pub enum Error {
    /// The sandbox subprocess could not be spawned or communicated with.
    #[error("sandbox subprocess communication error: {0}")]
    SubprocessComm(String),

    /// The sandbox interpreter could not be re-acquired after a fault.
    #[error("sandbox fatal error: {message}")]
    SandboxFatal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A sandbox `execute` call exceeded its configured timeout.
    #[error("sandbox execution timed out after {duration_ms}ms")]
    SandboxTimeout { duration_ms: u64 },

    /// No adapter is registered under the requested provider id.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The adapter itself failed (network, auth, malformed response, ...).
    #[error("adapter '{provider}' failed: {message}")]
    AdapterFailure {
        provider: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Recursion depth exceeded the configured budget.
    #[error("maximum recursion depth {max_depth} exceeded")]
    MaxDepthExceeded { max_depth: u32 },

    /// A budget dimension was exhausted.
    #[error("budget exhausted: {resource}")]
    BudgetExhausted { resource: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (subprocess spawn, pipe read/write).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (malformed file, conflicting overrides, unknown provider).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),

    /// A regex pattern handed to a context-inspection helper was rejected:
    /// too long or not compilable.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

impl Error {
    /// Create a sandbox-fatal error.
    pub fn sandbox_fatal(message: impl Into<String>) -> Self {
        Self::SandboxFatal {
            message: message.into(),
            source: None,
        }
    }

    /// Create a sandbox-fatal error wrapping a source.
    pub fn sandbox_fatal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SandboxFatal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an adapter-failure error.
    pub fn adapter_failure(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AdapterFailure {
            provider: provider.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::SandboxTimeout { duration_ms }
    }

    /// Create a max-depth-exceeded error.
    pub fn max_depth_exceeded(max_depth: u32) -> Self {
        Self::MaxDepthExceeded { max_depth }
    }

    /// Create a budget-exhausted error.
    pub fn budget_exhausted(resource: impl Into<String>) -> Self {
        Self::BudgetExhausted {
            resource: resource.into(),
        }
    }

    /// Whether this error indicates the sandbox interpreter is unusable
    /// and must not be reused without re-initialization.
    pub fn is_sandbox_fatal(&self) -> bool {
        matches!(self, Self::SandboxFatal { .. })
    }
}
