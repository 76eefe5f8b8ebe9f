use axum::{
    Router,
    routing::{get, post, put},
};

pub mod clients;
pub mod policies;
pub mod system;
pub mod users;

/// Sign-up and login; no credentials required.
pub fn public_router() -> Router {
    Router::new()
        .route("/users/register", post(users::register))
        .route("/users/login", post(users::login))
}

/// Routes that only need a valid token. Account routes check ownership
/// themselves.
pub fn authenticated_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/users/:id", put(users::update_own_profile))
        .route("/users/:id/change-password", post(users::change_password))
}

/// Administration; every request is enforced on `(path, method)`.
pub fn admin_router() -> Router {
    Router::new()
        .route(
            "/admin/policies",
            get(policies::list).post(policies::add).delete(policies::remove),
        )
        .route("/admin/policies/reload", post(policies::reload))
        .route("/admin/policies/save", post(policies::save))
        .route(
            "/admin/roles",
            get(policies::roles).post(policies::assign_role).delete(policies::revoke_role),
        )
        .route("/admin/explain", get(policies::explain))
        .route("/admin/users", get(users::list).post(users::create))
        .route("/admin/users/:id", put(users::update_profile).delete(users::remove))
        .route("/admin/users/:id/role", put(users::set_role))
        .route("/admin/users/:id/active", post(users::set_active))
        .route("/admin/users/:id/token", post(users::issue_token))
        .route("/admin/clients", get(clients::list).post(clients::register))
        .route("/admin/clients/:id", put(clients::rename).delete(clients::remove))
        .route("/admin/clients/:id/rotate", post(clients::rotate))
        .route("/admin/clients/:id/active", post(clients::set_active))
}

/// Routes for API-key clients.
pub fn client_router() -> Router {
    Router::new()
        .route("/api/clients/me", get(clients::me))
        .route("/api/users", get(users::summaries))
}
