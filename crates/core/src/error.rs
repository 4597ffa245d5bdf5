//! The error taxonomy shared by every `smarterbase` crate.
//!
//! Rather than matching on per-site strings, callers inspect a `StoreError`
//! through its `kind()` or one of the `is_*` predicates. Every error carries
//! a context map (operation, key, and anything the driver wants to attach)
//! so a single error is enough to diagnose and choose retry vs. give up.

use std::collections::BTreeMap;
use std::fmt;

/// Coarse classification of a failure, independent of which driver raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Key absent.
    NotFound,
    /// Entity-tag mismatch or lock already held. Retryable.
    Conflict,
    /// Circuit breaker open, or a driver refusing calls. Retryable after reset.
    BackendUnavailable,
    /// Context canceled; the cause chain is preserved in the context map.
    Canceled,
    /// Operation exceeded its deadline.
    Timeout,
    /// Caller supplied impossible options.
    InvalidConfig,
    /// Empty key, nil value, or empty marshaled payload at a boundary.
    InvalidData,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::InvalidData => "invalid_data",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The error type returned by every public `smarterbase` operation.
#[derive(Debug, Clone, thiserror::Error)]
pub struct StoreError {
    kind: ErrorKind,
    message: String,
    context: BTreeMap<String, String>,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for (k, v) in &self.context {
            write!(f, " {k}={v}")?;
        }
        Ok(())
    }
}

impl StoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, "key not found").with_key(key)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    pub fn canceled(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, "operation canceled").with("cause", cause)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidData, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Wrap any other error as `Internal`, annotated with operation context.
    pub fn wrap(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::internal(err.to_string()).with("operation", operation)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_key(self, key: impl Into<String>) -> Self {
        self.with("key", key)
    }

    pub fn with_operation(self, operation: impl Into<String>) -> Self {
        self.with("operation", operation)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }

    pub fn is_backend_unavailable(&self) -> bool {
        self.kind == ErrorKind::BackendUnavailable
    }

    pub fn is_canceled(&self) -> bool {
        self.kind == ErrorKind::Canceled
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Conflict | ErrorKind::BackendUnavailable)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
