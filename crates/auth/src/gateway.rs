//! Access gateway: resolve the credential, then ask the engine.

use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use warden_core::{Classify, Domain, ErrorClass};
use warden_policy::PolicyEngine;

use crate::{ApiKeyResolver, CredentialError, Principal, TokenService};

/// How much checking key-authenticated routes get.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRouteEnforcement {
    /// A known, active key is enough.
    #[default]
    ActiveOnly,
    /// Additionally enforce `(client, api, path, method)`.
    Enforce,
}

impl FromStr for KeyRouteEnforcement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active_only" | "active-only" => Ok(Self::ActiveOnly),
            "enforce" => Ok(Self::Enforce),
            other => Err(format!("expected 'active_only' or 'enforce', got '{other}'")),
        }
    }
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("'{subject}' may not {action} '{object}' in domain '{domain}'")]
    Forbidden {
        subject: String,
        domain: Domain,
        object: String,
        action: String,
    },

    #[error("policy store unavailable: {0}")]
    StoreUnavailable(String),
}

impl Classify for AccessError {
    fn class(&self) -> ErrorClass {
        match self {
            AccessError::Credential(e) => e.class(),
            AccessError::Forbidden { .. } => ErrorClass::Forbidden,
            AccessError::StoreUnavailable(_) => ErrorClass::StoreUnavailable,
        }
    }
}

/// One allow/reject decision per request.
///
/// Holds no state of its own; everything it reads lives in the token service,
/// the client directory and the policy store.
#[derive(Debug, Clone)]
pub struct AccessGateway {
    tokens: Arc<TokenService>,
    keys: ApiKeyResolver,
    engine: Arc<PolicyEngine>,
    key_routes: KeyRouteEnforcement,
}

impl AccessGateway {
    pub fn new(
        tokens: Arc<TokenService>,
        keys: ApiKeyResolver,
        engine: Arc<PolicyEngine>,
        key_routes: KeyRouteEnforcement,
    ) -> Self {
        Self {
            tokens,
            keys,
            engine,
            key_routes,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn keys(&self) -> &ApiKeyResolver {
        &self.keys
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    pub fn key_routes(&self) -> KeyRouteEnforcement {
        self.key_routes
    }

    /// Resolve a bearer token without any policy check.
    pub fn authenticate_bearer(&self, token: &str) -> Result<Principal, AccessError> {
        Ok(self.tokens.verify(token)?)
    }

    /// Token routes: resolve, then enforce `(identity, domain, object, action)`.
    pub async fn authorize_bearer(&self, token: &str, object: &str, action: &str) -> Result<Principal, AccessError> {
        let principal = self.authenticate_bearer(token)?;
        self.enforce(&principal, object, action).await?;
        Ok(principal)
    }

    /// Key routes: resolve, then enforce only if configured to.
    pub async fn authorize_key(&self, key: &str, object: &str, action: &str) -> Result<Principal, AccessError> {
        let principal = self.keys.resolve(key).await?;
        if self.key_routes == KeyRouteEnforcement::Enforce {
            self.enforce(&principal, object, action).await?;
        }
        Ok(principal)
    }

    /// Ask the engine about an already resolved principal. Any engine failure
    /// is a rejection.
    pub async fn enforce(&self, principal: &Principal, object: &str, action: &str) -> Result<(), AccessError> {
        match self
            .engine
            .enforce(&principal.identity, &principal.domain, object, action)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!(
                    subject = %principal.identity,
                    domain = %principal.domain,
                    object,
                    action,
                    "access denied by policy"
                );
                Err(AccessError::Forbidden {
                    subject: principal.identity.clone(),
                    domain: principal.domain.clone(),
                    object: object.to_string(),
                    action: action.to_string(),
                })
            }
            Err(err) => {
                warn!(subject = %principal.identity, error = %err, "enforcement failed; denying");
                Err(AccessError::StoreUnavailable(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{Argon2Hasher, InMemoryClientDirectory, NewUser, Role, UserDirectory};
    use warden_policy::{EnforcementModel, MemoryAdapter, PolicyRule, RoleGroupingFact, StoredRule};

    struct Fixture {
        gateway: AccessGateway,
        users: UserDirectory,
    }

    async fn fixture(key_routes: KeyRouteEnforcement) -> Fixture {
        let adapter = MemoryAdapter::with_rules(vec![
            StoredRule::Policy(PolicyRule::new("admin", "default", "/api/*", "GET")),
            StoredRule::Grouping(RoleGroupingFact::new("alice", "admin", "default")),
        ]);
        let engine = Arc::new(
            PolicyEngine::open(
                EnforcementModel::default(),
                Arc::new(adapter),
                warden_policy::store::DEFAULT_DEADLINE,
            )
            .await
            .unwrap(),
        );
        let tokens = Arc::new(TokenService::new(b"secret", "warden", Duration::from_secs(600)));
        let keys = ApiKeyResolver::new(Arc::new(InMemoryClientDirectory::new()), engine.clone());
        Fixture {
            gateway: AccessGateway::new(tokens, keys, engine.clone(), key_routes),
            users: UserDirectory::with_hasher(engine, Arc::new(Argon2Hasher::new(64, 1, 1).unwrap())),
        }
    }

    async fn token_for(f: &Fixture, name: &str, role: &str) -> String {
        let user = match f.users.find_by_username(name).await {
            Some(u) => u,
            None => f
                .users
                .create(NewUser {
                    username: name.into(),
                    email: format!("{name}@example.com"),
                    password: format!("{name}-password"),
                    role: Role::from(role),
                })
                .await
                .unwrap(),
        };
        f.gateway.tokens().mint(&user).unwrap()
    }

    #[tokio::test]
    async fn admin_member_may_read_but_not_delete() {
        let f = fixture(KeyRouteEnforcement::ActiveOnly).await;
        let token = token_for(&f, "alice", "admin").await;

        let p = f.gateway.authorize_bearer(&token, "/api/clients", "GET").await.unwrap();
        assert_eq!(p.identity, "alice");

        let err = f.gateway.authorize_bearer(&token, "/api/clients", "DELETE").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Forbidden);
    }

    #[tokio::test]
    async fn bad_tokens_are_unauthorized_not_forbidden() {
        let f = fixture(KeyRouteEnforcement::ActiveOnly).await;
        for token in ["", "garbage", "a.b.c"] {
            let err = f.gateway.authorize_bearer(token, "/api/clients", "GET").await.unwrap_err();
            assert_eq!(err.class(), ErrorClass::Unauthorized, "token {token:?}");
        }
    }

    #[tokio::test]
    async fn users_without_rules_are_denied_by_default() {
        let f = fixture(KeyRouteEnforcement::ActiveOnly).await;
        let token = token_for(&f, "mallory", "guest").await;
        let err = f.gateway.authorize_bearer(&token, "/api/clients", "GET").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Forbidden);
    }

    #[tokio::test]
    async fn active_only_key_routes_skip_policy() {
        let f = fixture(KeyRouteEnforcement::ActiveOnly).await;
        let issued = f.gateway.keys().register("ingest").await.unwrap();

        let p = f.gateway.authorize_key(&issued.key, "/api/anything", "POST").await.unwrap();
        assert_eq!(p.identity, "ingest");
    }

    #[tokio::test]
    async fn enforcing_key_routes_apply_the_client_policy() {
        let f = fixture(KeyRouteEnforcement::Enforce).await;
        let issued = f.gateway.keys().register("ingest").await.unwrap();

        assert!(f.gateway.authorize_key(&issued.key, "/api/users", "GET").await.is_ok());
        let err = f.gateway.authorize_key(&issued.key, "/api/users", "POST").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Forbidden);
    }

    #[tokio::test]
    async fn deactivated_clients_are_inactive() {
        let f = fixture(KeyRouteEnforcement::ActiveOnly).await;
        let issued = f.gateway.keys().register("ingest").await.unwrap();
        f.gateway.keys().set_active(issued.client.id, false).await.unwrap();

        let err = f.gateway.authorize_key(&issued.key, "/api/users", "GET").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Inactive);

        let err = f.gateway.authorize_key("nope", "/api/users", "GET").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unauthorized);
    }

    #[test]
    fn key_route_mode_parses() {
        assert_eq!("enforce".parse::<KeyRouteEnforcement>(), Ok(KeyRouteEnforcement::Enforce));
        assert_eq!(
            "ACTIVE_ONLY".parse::<KeyRouteEnforcement>(),
            Ok(KeyRouteEnforcement::ActiveOnly)
        );
        assert!("sometimes".parse::<KeyRouteEnforcement>().is_err());
    }
}
