use thiserror::Error;

use warden_core::{Classify, ClientId, ErrorClass, UserId};
use warden_policy::PolicyError;

/// Why a bearer credential could not be turned into a principal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no credential presented")]
    Missing,

    #[error("malformed credential: {0}")]
    Malformed(String),

    /// Bad signature, or a token signed with an algorithm other than the
    /// configured one.
    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("unknown api key")]
    UnknownKey,

    #[error("credential belongs to an inactive principal")]
    Inactive,

    #[error("client directory unavailable: {0}")]
    DirectoryUnavailable(String),
}

impl Classify for CredentialError {
    fn class(&self) -> ErrorClass {
        match self {
            CredentialError::Inactive => ErrorClass::Inactive,
            CredentialError::DirectoryUnavailable(_) => ErrorClass::StoreUnavailable,
            _ => ErrorClass::Unauthorized,
        }
    }
}

/// Client directory failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("client {0} not found")]
    NotFound(ClientId),

    #[error("a client named '{0}' already exists")]
    DuplicateName(String),

    #[error("client directory unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the client lifecycle operations (register, rotate, ...).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("invalid client name: {0}")]
    InvalidName(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password must be at least {0} characters")]
    TooShort(usize),

    #[error("unusable hashing parameters: {0}")]
    Params(String),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user {0} not found")]
    NotFound(UserId),

    #[error("username '{0}' is taken")]
    DuplicateUsername(String),

    #[error("email '{0}' is already registered")]
    DuplicateEmail(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("user is inactive")]
    Inactive,

    #[error(transparent)]
    Password(PasswordError),

    #[error("invalid user: {0}")]
    Validation(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}
