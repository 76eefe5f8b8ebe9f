use warden_auth::{Principal, PrincipalKind, Role};
use warden_core::Domain;

/// Authenticated caller for a request.
///
/// Inserted by the auth middleware; handlers behind it may rely on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn identity(&self) -> &str {
        &self.principal.identity
    }

    pub fn domain(&self) -> &Domain {
        &self.principal.domain
    }

    pub fn roles(&self) -> &[Role] {
        &self.principal.roles
    }

    pub fn kind(&self) -> PrincipalKind {
        self.principal.kind
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}
