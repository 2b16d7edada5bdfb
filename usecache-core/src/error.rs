//! Error types shared by every layer of the engine.

use std::time::Duration;

use thiserror::Error;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by the cached-computation engine.
///
/// The variants fall into the classes a renderer has to tell apart:
///
/// * contract violations ([`CacheError::ContractViolation`],
///   [`CacheError::OutsideWorkUnit`]) are caller bugs and must never be retried
/// * dynamic signals ([`CacheError::Postponed`], [`CacheError::DynamicUsage`])
///   are not failures, they mark output as request-dependent
/// * [`CacheError::Timeout`] is a terminal generation error
/// * [`CacheError::Backend`] is reported by a pluggable store
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("invariant violated: {message}")]
    ContractViolation { message: String },

    #[error("`{expression}` was called outside of a work unit scope")]
    OutsideWorkUnit { expression: String },

    #[error("route {route} postponed rendering at `{expression}`")]
    Postponed { route: String, expression: String },

    #[error("route {route} couldn't be rendered statically because it used `{expression}`")]
    DynamicUsage { route: String, expression: String },

    #[error("filling a cache during prerender of {route} timed out after {timeout:?}")]
    Timeout { route: String, timeout: Duration },

    #[error("cache handler `{handler}` failed: {message}")]
    Backend { handler: String, message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl CacheError {
    pub fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation {
            message: message.into(),
        }
    }

    pub fn outside(expression: impl Into<String>) -> Self {
        Self::OutsideWorkUnit {
            expression: expression.into(),
        }
    }

    pub fn backend(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            handler: handler.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true for errors that only mean "this output is dynamic".
    ///
    /// Renderers must turn these into dynamic holes rather than logging them
    /// as failures.
    pub fn is_dynamic_signal(&self) -> bool {
        matches!(self, Self::Postponed { .. } | Self::DynamicUsage { .. })
    }

    /// Returns true for caller bugs that must not be retried.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::ContractViolation { .. } | Self::OutsideWorkUnit { .. }
        )
    }
}

/// Terminal error recorded inside a byte stream.
///
/// The error is part of the stream's content: every branch of a teed stream,
/// and every later replay of a cached stream, ends with the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("cache generation for {route} exceeded {timeout:?}")]
    Timeout { route: String, timeout: Duration },

    #[error("computation failed: {0}")]
    Computation(String),

    #[error("stream producer went away before finishing")]
    Aborted,
}

/// Failure returned by a wrapped computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ComputationError(pub String);

impl ComputationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Key serialization could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// An argument refers to a route parameter the current pass does not know yet.
    #[error("argument depends on fallback route parameter `{param}`")]
    DynamicAccess { param: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_signals_are_classified() {
        let postponed = CacheError::Postponed {
            route: "/blog/[slug]".to_string(),
            expression: "cookies()".to_string(),
        };
        assert!(postponed.is_dynamic_signal());
        assert!(!postponed.is_contract_violation());

        let violation = CacheError::contract("nested private cache");
        assert!(violation.is_contract_violation());
        assert!(!violation.is_dynamic_signal());
    }

    #[test]
    fn test_stream_error_converts() {
        let err: CacheError = StreamError::Aborted.into();
        assert!(matches!(err, CacheError::Stream(StreamError::Aborted)));
    }
}
