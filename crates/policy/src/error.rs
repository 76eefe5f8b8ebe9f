use thiserror::Error;

use warden_core::{Classify, ErrorClass};

/// Failure of the persistence adapter behind a [`crate::PolicyStore`].
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("policy storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed policy line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("policy backend unavailable: {0}")]
    Unavailable(String),
}

/// Failure to load or compile an enforcement model definition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("cannot read model file: {0}")]
    Io(String),

    #[error("invalid enforcement model: {0}")]
    Invalid(String),
}

/// A rule field that cannot be stored faithfully.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{field} {reason}")]
pub struct InvalidField {
    pub field: &'static str,
    pub reason: &'static str,
}

/// Errors surfaced by [`crate::PolicyEngine`] and [`crate::PolicyStore`].
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("enforcer error: {0}")]
    Enforcer(String),

    #[error("invalid rule: {0}")]
    InvalidRule(#[from] InvalidField),
}

impl From<casbin::Error> for PolicyError {
    fn from(value: casbin::Error) -> Self {
        PolicyError::Enforcer(value.to_string())
    }
}

impl From<AdapterError> for PolicyError {
    fn from(value: AdapterError) -> Self {
        PolicyError::StoreUnavailable(value.to_string())
    }
}

impl Classify for PolicyError {
    fn class(&self) -> ErrorClass {
        // A broken model can only be detected at startup; at request time it
        // behaves like an unusable store. Rejected rules never reach the
        // store and are mapped by the caller.
        ErrorClass::StoreUnavailable
    }
}
