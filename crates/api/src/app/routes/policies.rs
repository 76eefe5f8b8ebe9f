//! Policy and role administration.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use warden_policy::InvalidField;

use crate::app::dto::{ExplainQuery, PolicyRequest, RoleQuery, RoleRequest, domain_or_default};
use crate::app::errors::{self, policy_error_to_response};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

type Response = axum::response::Response;

fn invalid(err: InvalidField) -> Response {
    errors::json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
}

/// GET /admin/policies
pub async fn list(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let policies = services.engine.policies().await;
    let groupings = services.engine.groupings().await;
    Json(serde_json::json!({ "policies": policies, "groupings": groupings })).into_response()
}

/// POST /admin/policies
pub async fn add(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<PolicyRequest>,
) -> Response {
    let rule = body.into_rule();
    if let Err(e) = rule.validate() {
        return invalid(e);
    }
    match services.engine.add_policy(rule.clone()).await {
        Ok(changed) => {
            info!(by = principal.identity(), subject = %rule.subject, object = %rule.object, action = %rule.action, changed, "policy added");
            Json(serde_json::json!({ "changed": changed, "rule": rule })).into_response()
        }
        Err(e) => policy_error_to_response(e),
    }
}

/// DELETE /admin/policies
pub async fn remove(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<PolicyRequest>,
) -> Response {
    let rule = body.into_rule();
    match services.engine.remove_policy(rule.clone()).await {
        Ok(changed) => {
            info!(by = principal.identity(), subject = %rule.subject, object = %rule.object, action = %rule.action, changed, "policy removed");
            Json(serde_json::json!({ "changed": changed, "rule": rule })).into_response()
        }
        Err(e) => policy_error_to_response(e),
    }
}

/// POST /admin/policies/reload
pub async fn reload(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.engine.reload().await {
        Ok(rules) => Json(serde_json::json!({ "rules": rules })).into_response(),
        Err(e) => policy_error_to_response(e),
    }
}

/// POST /admin/policies/save
pub async fn save(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.engine.save().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => policy_error_to_response(e),
    }
}

/// GET /admin/roles?user=..  or  ?role=..
pub async fn roles(
    Extension(services): Extension<Arc<AppServices>>,
    Query(q): Query<RoleQuery>,
) -> Response {
    let domain = domain_or_default(q.domain);
    match (q.user, q.role) {
        (Some(user), None) => {
            let roles = services.engine.roles_for_user(&user, &domain).await;
            Json(serde_json::json!({ "user": user, "domain": domain, "roles": roles })).into_response()
        }
        (None, Some(role)) => {
            let users = services.engine.users_for_role(&role, &domain).await;
            Json(serde_json::json!({ "role": role, "domain": domain, "users": users })).into_response()
        }
        _ => errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "pass exactly one of 'user' or 'role'",
        ),
    }
}

/// POST /admin/roles
pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<RoleRequest>,
) -> Response {
    let fact = body.into_fact();
    if let Err(e) = fact.validate() {
        return invalid(e);
    }
    match services
        .engine
        .add_role_for_user(&fact.user, &fact.role, &fact.domain)
        .await
    {
        Ok(changed) => Json(serde_json::json!({ "changed": changed, "grouping": fact })).into_response(),
        Err(e) => policy_error_to_response(e),
    }
}

/// DELETE /admin/roles
pub async fn revoke_role(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<RoleRequest>,
) -> Response {
    let fact = body.into_fact();
    match services
        .engine
        .delete_role_for_user(&fact.user, &fact.role, &fact.domain)
        .await
    {
        Ok(changed) => Json(serde_json::json!({ "changed": changed, "grouping": fact })).into_response(),
        Err(e) => policy_error_to_response(e),
    }
}

/// GET /admin/explain?subject=..&object=..&action=..[&domain=..]
pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    Query(q): Query<ExplainQuery>,
) -> Response {
    match services.engine.explain(&q.into_request()).await {
        Ok(explanation) => (StatusCode::OK, Json(explanation)).into_response(),
        Err(e) => policy_error_to_response(e),
    }
}
