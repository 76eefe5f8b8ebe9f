//! Shared error taxonomy.
//!
//! Every failure that crosses a component boundary is classified into one of
//! the [`ErrorClass`] buckets. Outer layers (HTTP, WebSocket) only ever look at
//! the class; the concrete error stays in logs.

use thiserror::Error;

/// Coarse classification of a failure as seen by a caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Missing, invalid or expired credential.
    Unauthorized,
    /// Authenticated, but policy denies the action.
    Forbidden,
    /// The principal exists but has been deactivated.
    Inactive,
    /// Backing store for policies or clients is unreachable.
    StoreUnavailable,
    /// Peer closed or a write to it failed.
    ConnectionLost,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Unauthorized => "unauthorized",
            ErrorClass::Forbidden => "forbidden",
            ErrorClass::Inactive => "inactive",
            ErrorClass::StoreUnavailable => "store_unavailable",
            ErrorClass::ConnectionLost => "connection_lost",
        }
    }

    /// Whether an automatic retry could ever change the outcome.
    ///
    /// Credential and policy failures are final until someone changes the
    /// credential or the policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::StoreUnavailable)
    }
}

impl core::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every error type that can reach a caller.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Errors raised by the shared primitives themselves.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}
