//! API client administration and the key-authenticated client routes.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use warden_core::ClientId;

use crate::app::dto::{ClientNameRequest, SetActiveRequest};
use crate::app::errors::{self, client_error_to_response};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

type Response = axum::response::Response;

fn parse_client_id(raw: &str) -> Result<ClientId, Response> {
    raw.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("'{raw}' is not a client id"))
    })
}

/// GET /admin/clients
pub async fn list(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.gateway.keys().list().await {
        Ok(clients) => Json(serde_json::json!({ "clients": clients })).into_response(),
        Err(e) => client_error_to_response(e),
    }
}

/// POST /admin/clients
///
/// The key is only ever returned here and on rotate.
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<ClientNameRequest>,
) -> Response {
    match services.gateway.keys().register(&body.name).await {
        Ok(issued) => (StatusCode::CREATED, Json(issued)).into_response(),
        Err(e) => client_error_to_response(e),
    }
}

/// POST /admin/clients/:id/rotate
pub async fn rotate(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_client_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.gateway.keys().rotate_key(id).await {
        Ok(issued) => Json(issued).into_response(),
        Err(e) => client_error_to_response(e),
    }
}

/// POST /admin/clients/:id/active
pub async fn set_active(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<SetActiveRequest>,
) -> Response {
    let id = match parse_client_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.gateway.keys().set_active(id, body.active).await {
        Ok(client) => Json(client).into_response(),
        Err(e) => client_error_to_response(e),
    }
}

/// PUT /admin/clients/:id
pub async fn rename(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<ClientNameRequest>,
) -> Response {
    let id = match parse_client_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.gateway.keys().rename(id, &body.name).await {
        Ok(client) => Json(client).into_response(),
        Err(e) => client_error_to_response(e),
    }
}

/// DELETE /admin/clients/:id
pub async fn remove(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_client_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.gateway.keys().remove(id).await {
        Ok(client) => Json(client).into_response(),
        Err(e) => client_error_to_response(e),
    }
}

/// GET /api/clients/me
pub async fn me(Extension(principal): Extension<PrincipalContext>) -> Response {
    Json(serde_json::json!({
        "name": principal.identity(),
        "domain": principal.domain(),
        "kind": principal.kind(),
        "active": principal.principal().active,
    }))
    .into_response()
}
