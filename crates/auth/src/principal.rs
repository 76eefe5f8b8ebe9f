use serde::Serialize;

use warden_core::Domain;

use crate::Role;

/// How the caller proved who it is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// Signed bearer token issued to a user.
    User,
    /// Opaque API key issued to a registered client.
    ApiClient,
}

/// A resolved caller.
///
/// Built once per request by the resolvers and never persisted. The
/// `identity` is the policy subject: a username for users, the client name for
/// API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub identity: String,
    pub domain: Domain,
    pub roles: Vec<Role>,
    pub active: bool,
    pub kind: PrincipalKind,
}

impl Principal {
    pub fn user(identity: impl Into<String>, domain: Domain, roles: Vec<Role>) -> Self {
        Self {
            identity: identity.into(),
            domain,
            roles,
            active: true,
            kind: PrincipalKind::User,
        }
    }

    pub fn api_client(identity: impl Into<String>, active: bool) -> Self {
        Self {
            identity: identity.into(),
            domain: Domain::API,
            roles: Vec::new(),
            active,
            kind: PrincipalKind::ApiClient,
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
