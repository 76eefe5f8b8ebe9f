use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use warden_auth::{AccessError, ClientError, DirectoryError, PasswordError, UserError};
use warden_core::{Classify, ErrorClass};
use warden_policy::PolicyError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn class_status(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorClass::Forbidden | ErrorClass::Inactive => StatusCode::FORBIDDEN,
        ErrorClass::StoreUnavailable | ErrorClass::ConnectionLost => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Rejections from the access gateway.
pub fn access_error_to_response(err: AccessError) -> axum::response::Response {
    let class = err.class();
    json_error(class_status(class), class.as_str(), err.to_string())
}

pub fn policy_error_to_response(err: PolicyError) -> axum::response::Response {
    if let PolicyError::InvalidRule(_) = err {
        return json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string());
    }
    let class = err.class();
    json_error(class_status(class), class.as_str(), err.to_string())
}

pub fn client_error_to_response(err: ClientError) -> axum::response::Response {
    match err {
        ClientError::Directory(DirectoryError::NotFound(_)) => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        ClientError::Directory(DirectoryError::DuplicateName(_)) => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        ClientError::InvalidName(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string()),
        ClientError::Directory(DirectoryError::Unavailable(_)) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", err.to_string())
        }
        ClientError::Policy(e) => policy_error_to_response(e),
    }
}

pub fn user_error_to_response(err: UserError) -> axum::response::Response {
    match err {
        UserError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        UserError::DuplicateUsername(_) | UserError::DuplicateEmail(_) => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        UserError::InvalidCredentials => json_error(StatusCode::UNAUTHORIZED, "unauthorized", err.to_string()),
        UserError::Inactive => json_error(StatusCode::FORBIDDEN, "inactive", err.to_string()),
        UserError::Validation(_) | UserError::Password(PasswordError::TooShort(_)) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
        UserError::Password(_) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "password_error", err.to_string()),
        UserError::Unavailable(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", err.to_string())
        }
        UserError::Policy(e) => policy_error_to_response(e),
    }
}
