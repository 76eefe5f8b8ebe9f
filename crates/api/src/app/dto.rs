use serde::Deserialize;

use warden_core::Domain;
use warden_policy::{AccessRequest, PolicyRule, RoleGroupingFact};

// -------------------------
// Policy administration
// -------------------------

#[derive(Debug, Deserialize)]
pub struct PolicyRequest {
    pub subject: String,
    pub domain: Option<String>,
    pub object: String,
    pub action: String,
}

impl PolicyRequest {
    pub fn into_rule(self) -> PolicyRule {
        PolicyRule::new(self.subject, domain_or_default(self.domain), self.object, self.action)
    }
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub user: String,
    pub role: String,
    pub domain: Option<String>,
}

impl RoleRequest {
    pub fn into_fact(self) -> RoleGroupingFact {
        RoleGroupingFact::new(self.user, self.role, domain_or_default(self.domain))
    }
}

#[derive(Debug, Deserialize)]
pub struct RoleQuery {
    pub user: Option<String>,
    pub role: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub subject: String,
    pub domain: Option<String>,
    pub object: String,
    pub action: String,
}

impl ExplainQuery {
    pub fn into_request(self) -> AccessRequest {
        AccessRequest::new(self.subject, domain_or_default(self.domain), self.object, self.action)
    }
}

// -------------------------
// Users and clients
// -------------------------

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct ClientNameRequest {
    pub name: String,
}

// -------------------------
// WebSocket
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    /// Browsers cannot set headers on a WebSocket handshake.
    pub access_token: Option<String>,
}

pub fn domain_or_default(domain: Option<String>) -> Domain {
    domain
        .filter(|d| !d.trim().is_empty())
        .map(Domain::from)
        .unwrap_or_default()
}
