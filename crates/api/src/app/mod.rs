//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: engine, resolvers, directories, hub and background tasks
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request bodies and query strings
//! - `errors.rs`: consistent JSON error responses

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Extension, Router, http::HeaderName, routing::get};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::middleware::{self, AuthState};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, Background};

/// A built application: the router plus what must be stopped with it.
pub struct App {
    pub router: Router,
    pub services: Arc<AppServices>,
    pub background: Background,
}

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub async fn build_app(config: &AppConfig) -> Result<App> {
    let (services, background) = services::build_services(config).await?;

    let auth_state = AuthState {
        gateway: services.gateway.clone(),
        key_header: HeaderName::from_bytes(config.api_key_header.as_bytes())
            .with_context(|| format!("parse API_KEY_HEADER: {}", config.api_key_header))?,
    };

    // Token only.
    let authenticated = routes::authenticated_router().layer(axum::middleware::from_fn_with_state(
        auth_state.clone(),
        middleware::bearer_auth,
    ));

    // Token + policy on (path, method).
    let enforced = routes::admin_router().layer(axum::middleware::from_fn_with_state(
        auth_state.clone(),
        middleware::bearer_enforce,
    ));

    // API key.
    let keyed = routes::client_router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::api_key_auth,
    ));

    let router = Router::new()
        .route("/health", get(routes::system::health))
        .route(crate::ws::USERS_SOCKET_PATH, get(crate::ws::users_socket))
        .merge(routes::public_router())
        .merge(authenticated)
        .merge(enforced)
        .merge(keyed)
        .layer(Extension(services.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    Ok(App {
        router,
        services,
        background,
    })
}
