//! User sign-up, login, self-service and administration. Every successful
//! mutation queues a fresh `user_list` for WebSocket subscribers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use warden_auth::{NewUser, ProfileUpdate, Role, User};
use warden_core::UserId;
use warden_policy::validate_field;

use crate::app::dto::{ChangePasswordRequest, LoginRequest, SetActiveRequest, SetRoleRequest};
use crate::app::errors::{self, user_error_to_response};
use crate::app::services::{AppServices, SNAPSHOT_LIMIT, summary};
use crate::context::PrincipalContext;

type Response = axum::response::Response;

fn parse_user_id(raw: &str) -> Result<UserId, Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("'{raw}' is not a user id")))
}

/// `{user, token, token_type, expires_in}` for a freshly authenticated user.
fn session(services: &AppServices, user: User, status: StatusCode) -> Response {
    let tokens = services.gateway.tokens();
    match tokens.mint(&user) {
        Ok(token) => (
            status,
            Json(serde_json::json!({
                "user": user,
                "token": token,
                "token_type": "Bearer",
                "expires_in": tokens.ttl().as_secs(),
            })),
        )
            .into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "token_error", e.to_string()),
    }
}

/// Only the user a token was issued to may change that user.
async fn require_self(services: &AppServices, principal: &PrincipalContext, raw_id: &str) -> Result<UserId, Response> {
    let id = parse_user_id(raw_id)?;
    match services.users.get(id).await {
        Some(user) if user.username == principal.identity() => Ok(id),
        Some(_) => Err(errors::json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "users may only change their own account",
        )),
        None => Err(errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("user {id} not found"))),
    }
}

/// POST /users/register
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewUser>,
) -> Response {
    match services.users.register(body).await {
        Ok(user) => {
            services.notify_users_changed().await;
            session(&services, user, StatusCode::CREATED)
        }
        Err(e) => user_error_to_response(e),
    }
}

/// POST /users/login
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    match services.users.login(&body.username, &body.password).await {
        Ok(user) => session(&services, user, StatusCode::OK),
        Err(e) => user_error_to_response(e),
    }
}

/// PUT /users/:id
pub async fn update_own_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<ProfileUpdate>,
) -> Response {
    let id = match require_self(&services, &principal, &id).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    update_profile_of(&services, id, body).await
}

/// POST /users/:id/change-password
pub async fn change_password(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<ChangePasswordRequest>,
) -> Response {
    let id = match require_self(&services, &principal, &id).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .users
        .change_password(id, &body.old_password, &body.new_password)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => user_error_to_response(e),
    }
}

/// PUT /admin/users/:id
pub async fn update_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<ProfileUpdate>,
) -> Response {
    match parse_user_id(&id) {
        Ok(id) => update_profile_of(&services, id, body).await,
        Err(resp) => resp,
    }
}

async fn update_profile_of(services: &AppServices, id: UserId, update: ProfileUpdate) -> Response {
    match services.users.update_profile(id, update).await {
        Ok(user) => {
            services.notify_users_changed().await;
            Json(user).into_response()
        }
        Err(e) => user_error_to_response(e),
    }
}

/// GET /admin/users
pub async fn list(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let users = services.users.list(usize::MAX).await;
    Json(serde_json::json!({ "users": users })).into_response()
}

/// GET /api/users (API-key clients)
pub async fn summaries(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let users: Vec<_> = services
        .users
        .list(SNAPSHOT_LIMIT)
        .await
        .iter()
        .map(summary)
        .collect();
    Json(serde_json::json!({ "users": users })).into_response()
}

/// POST /admin/users
pub async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewUser>,
) -> Response {
    match services.users.create(body).await {
        Ok(user) => {
            services.notify_users_changed().await;
            (StatusCode::CREATED, Json(user)).into_response()
        }
        Err(e) => user_error_to_response(e),
    }
}

/// PUT /admin/users/:id/role
pub async fn set_role(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<SetRoleRequest>,
) -> Response {
    let id = match parse_user_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(e) = validate_field("role", &body.role) {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string());
    }
    match services.users.set_role(id, Role::from(body.role)).await {
        Ok(user) => {
            services.notify_users_changed().await;
            Json(user).into_response()
        }
        Err(e) => user_error_to_response(e),
    }
}

/// POST /admin/users/:id/active
pub async fn set_active(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<SetActiveRequest>,
) -> Response {
    let id = match parse_user_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.users.set_active(id, body.active).await {
        Ok(user) => {
            services.notify_users_changed().await;
            Json(user).into_response()
        }
        Err(e) => user_error_to_response(e),
    }
}

/// DELETE /admin/users/:id
pub async fn remove(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_user_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.users.remove(id).await {
        Ok(user) => {
            services.notify_users_changed().await;
            Json(user).into_response()
        }
        Err(e) => user_error_to_response(e),
    }
}

/// POST /admin/users/:id/token
///
/// Inactive users get no new tokens; tokens already issued stay valid until
/// they expire.
pub async fn issue_token(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_user_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(user) = services.users.get(id).await else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("user {id} not found"));
    };
    if !user.active {
        return errors::json_error(StatusCode::FORBIDDEN, "inactive", format!("user {id} is inactive"));
    }

    let tokens = services.gateway.tokens();
    match tokens.mint(&user) {
        Ok(token) => Json(serde_json::json!({
            "token": token,
            "token_type": "Bearer",
            "expires_in": tokens.ttl().as_secs(),
        }))
        .into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "token_error", e.to_string()),
    }
}
