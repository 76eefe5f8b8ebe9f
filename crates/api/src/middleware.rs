//! Authentication/authorization layers.
//!
//! - [`bearer_auth`]: token required, no policy check (`/whoami`, own account)
//! - [`bearer_enforce`]: token required, `(identity, domain, path, method)` enforced
//! - [`api_key_auth`]: API key required; policy per the key-route setting

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, Request},
    middleware::Next,
    response::Response,
};

use warden_auth::{AccessError, AccessGateway, CredentialError};

use crate::app::errors::access_error_to_response;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub gateway: AccessGateway,
    pub key_header: HeaderName,
}

pub async fn bearer_auth(
    State(state): State<AuthState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers()).map_err(access_error_to_response)?;
    let principal = state
        .gateway
        .authenticate_bearer(token)
        .map_err(access_error_to_response)?;

    req.extensions_mut().insert(PrincipalContext::new(principal));
    Ok(next.run(req).await)
}

pub async fn bearer_enforce(
    State(state): State<AuthState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers()).map_err(access_error_to_response)?;
    let principal = state
        .gateway
        .authorize_bearer(token, req.uri().path(), req.method().as_str())
        .await
        .map_err(access_error_to_response)?;

    req.extensions_mut().insert(PrincipalContext::new(principal));
    Ok(next.run(req).await)
}

pub async fn api_key_auth(
    State(state): State<AuthState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let key = req
        .headers()
        .get(&state.key_header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let principal = state
        .gateway
        .authorize_key(&key, req.uri().path(), req.method().as_str())
        .await
        .map_err(access_error_to_response)?;

    req.extensions_mut().insert(PrincipalContext::new(principal));
    Ok(next.run(req).await)
}

pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AccessError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(CredentialError::Missing)?;

    let header = header
        .to_str()
        .map_err(|_| CredentialError::Malformed("authorization header is not ascii".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| CredentialError::Malformed("expected 'Bearer <token>'".into()))?
        .trim();

    if token.is_empty() {
        return Err(CredentialError::Missing.into());
    }

    Ok(token)
}
