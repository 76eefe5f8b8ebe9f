//! Opaque API keys.
//!
//! A key is 32 random bytes, hex-encoded, handed out once at registration or
//! rotation. The directory maps keys to clients; every client also owns one
//! policy rule `(name, api, /api/*, GET)` that the resolver keeps in step with
//! the directory.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use tracing::{info, warn};

use warden_core::{ClientId, Domain};
use warden_policy::{Mutation, PolicyEngine, PolicyRule, validate_field};

use crate::{ClientError, CredentialError, DirectoryError, Principal};

const KEY_BYTES: usize = 32;
const CLIENT_OBJECT: &str = "/api/*";
const CLIENT_ACTION: &str = "GET";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiClient {
    pub id: ClientId,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A client together with a freshly issued key. The key is never readable
/// again after this value is dropped.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedKey {
    pub client: ApiClient,
    pub key: String,
}

/// Storage for API clients and their current keys.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn find_by_key(&self, key: &str) -> Result<Option<ApiClient>, DirectoryError>;

    async fn get(&self, id: ClientId) -> Result<Option<ApiClient>, DirectoryError>;

    async fn list(&self) -> Result<Vec<ApiClient>, DirectoryError>;

    /// Fails with `DuplicateName` if the name is taken.
    async fn insert(&self, client: ApiClient, key: String) -> Result<(), DirectoryError>;

    async fn set_active(&self, id: ClientId, active: bool) -> Result<ApiClient, DirectoryError>;

    /// Swap the client's key. Once this returns, the previous key no longer
    /// resolves and `key` does; no lookup observes both or neither.
    async fn replace_key(&self, id: ClientId, key: String) -> Result<ApiClient, DirectoryError>;

    async fn rename(&self, id: ClientId, name: String) -> Result<ApiClient, DirectoryError>;

    /// Forget the client. Returns it with the key it held, so a failed
    /// follow-up step can put both back with [`ClientDirectory::insert`].
    async fn remove(&self, id: ClientId) -> Result<(ApiClient, String), DirectoryError>;
}

#[derive(Debug, Default)]
struct Clients {
    by_id: HashMap<ClientId, (ApiClient, String)>,
    by_key: HashMap<String, ClientId>,
}

/// Process-local directory. Both indexes sit behind one lock, which is what
/// makes `replace_key` atomic.
#[derive(Debug, Default)]
pub struct InMemoryClientDirectory {
    inner: RwLock<Clients>,
}

impl InMemoryClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Clients>, DirectoryError> {
        self.inner
            .read()
            .map_err(|_| DirectoryError::Unavailable("client directory lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Clients>, DirectoryError> {
        self.inner
            .write()
            .map_err(|_| DirectoryError::Unavailable("client directory lock poisoned".into()))
    }
}

#[async_trait]
impl ClientDirectory for InMemoryClientDirectory {
    async fn find_by_key(&self, key: &str) -> Result<Option<ApiClient>, DirectoryError> {
        let clients = self.read()?;
        Ok(clients
            .by_key
            .get(key)
            .and_then(|id| clients.by_id.get(id))
            .map(|(client, _)| client.clone()))
    }

    async fn get(&self, id: ClientId) -> Result<Option<ApiClient>, DirectoryError> {
        Ok(self.read()?.by_id.get(&id).map(|(client, _)| client.clone()))
    }

    async fn list(&self) -> Result<Vec<ApiClient>, DirectoryError> {
        let mut all: Vec<ApiClient> = self.read()?.by_id.values().map(|(c, _)| c.clone()).collect();
        all.sort_by_key(|c| c.id);
        Ok(all)
    }

    async fn insert(&self, client: ApiClient, key: String) -> Result<(), DirectoryError> {
        let mut clients = self.write()?;
        if clients.by_id.values().any(|(c, _)| c.name == client.name) {
            return Err(DirectoryError::DuplicateName(client.name));
        }
        clients.by_key.insert(key.clone(), client.id);
        clients.by_id.insert(client.id, (client, key));
        Ok(())
    }

    async fn set_active(&self, id: ClientId, active: bool) -> Result<ApiClient, DirectoryError> {
        let mut clients = self.write()?;
        let (client, _) = clients.by_id.get_mut(&id).ok_or(DirectoryError::NotFound(id))?;
        client.active = active;
        client.updated_at = Utc::now();
        Ok(client.clone())
    }

    async fn replace_key(&self, id: ClientId, key: String) -> Result<ApiClient, DirectoryError> {
        let mut clients = self.write()?;
        let (client, old_key) = clients.by_id.get_mut(&id).ok_or(DirectoryError::NotFound(id))?;
        let previous = std::mem::replace(old_key, key.clone());
        client.updated_at = Utc::now();
        let client = client.clone();

        clients.by_key.remove(&previous);
        clients.by_key.insert(key, id);
        Ok(client)
    }

    async fn rename(&self, id: ClientId, name: String) -> Result<ApiClient, DirectoryError> {
        let mut clients = self.write()?;
        if clients.by_id.iter().any(|(other, (c, _))| *other != id && c.name == name) {
            return Err(DirectoryError::DuplicateName(name));
        }
        let (client, _) = clients.by_id.get_mut(&id).ok_or(DirectoryError::NotFound(id))?;
        client.name = name;
        client.updated_at = Utc::now();
        Ok(client.clone())
    }

    async fn remove(&self, id: ClientId) -> Result<(ApiClient, String), DirectoryError> {
        let mut clients = self.write()?;
        let (client, key) = clients.by_id.remove(&id).ok_or(DirectoryError::NotFound(id))?;
        clients.by_key.remove(&key);
        Ok((client, key))
    }
}

fn generate_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn validate_name(name: &str) -> Result<(), ClientError> {
    validate_field("name", name).map_err(|e| ClientError::InvalidName(e.to_string()))
}

fn client_rule(name: &str) -> PolicyRule {
    PolicyRule::new(name, Domain::API, CLIENT_OBJECT, CLIENT_ACTION)
}

/// Resolves API keys into principals and runs the client lifecycle.
#[derive(Clone)]
pub struct ApiKeyResolver {
    directory: Arc<dyn ClientDirectory>,
    engine: Arc<PolicyEngine>,
}

impl core::fmt::Debug for ApiKeyResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApiKeyResolver").finish_non_exhaustive()
    }
}

impl ApiKeyResolver {
    pub fn new(directory: Arc<dyn ClientDirectory>, engine: Arc<PolicyEngine>) -> Self {
        Self { directory, engine }
    }

    /// Look `key` up verbatim.
    pub async fn resolve(&self, key: &str) -> Result<Principal, CredentialError> {
        if key.is_empty() {
            return Err(CredentialError::Missing);
        }

        let client = self
            .directory
            .find_by_key(key)
            .await
            .map_err(|e| CredentialError::DirectoryUnavailable(e.to_string()))?
            .ok_or(CredentialError::UnknownKey)?;

        if !client.active {
            return Err(CredentialError::Inactive);
        }
        Ok(Principal::api_client(client.name, client.active))
    }

    pub async fn list(&self) -> Result<Vec<ApiClient>, ClientError> {
        Ok(self.directory.list().await?)
    }

    pub async fn get(&self, id: ClientId) -> Result<ApiClient, ClientError> {
        self.directory
            .get(id)
            .await?
            .ok_or(ClientError::Directory(DirectoryError::NotFound(id)))
    }

    /// Register a client, issue its first key and grant its policy.
    pub async fn register(&self, name: &str) -> Result<IssuedKey, ClientError> {
        validate_name(name)?;

        let now = Utc::now();
        let client = ApiClient {
            id: ClientId::new(),
            name: name.to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        };
        let key = generate_key();
        self.directory.insert(client.clone(), key.clone()).await?;

        if let Err(err) = self.engine.add_policy(client_rule(name)).await {
            warn!(client_id = %client.id, error = %err, "granting client policy failed; rolling back");
            self.directory.remove(client.id).await?;
            return Err(err.into());
        }

        info!(client_id = %client.id, name, "api client registered");
        Ok(IssuedKey { client, key })
    }

    pub async fn rotate_key(&self, id: ClientId) -> Result<IssuedKey, ClientError> {
        let key = generate_key();
        let client = self.directory.replace_key(id, key.clone()).await?;
        info!(client_id = %id, "api key rotated");
        Ok(IssuedKey { client, key })
    }

    pub async fn set_active(&self, id: ClientId, active: bool) -> Result<ApiClient, ClientError> {
        let client = self.directory.set_active(id, active).await?;
        info!(client_id = %id, active, "api client activation changed");
        Ok(client)
    }

    /// Rename a client and move its policy rule along with it.
    pub async fn rename(&self, id: ClientId, name: &str) -> Result<ApiClient, ClientError> {
        validate_name(name)?;

        let before = self.get(id).await?;
        let after = self.directory.rename(id, name.to_string()).await?;

        let swap = [
            Mutation::remove_policy(client_rule(&before.name)),
            Mutation::add_policy(client_rule(name)),
        ];
        if let Err(err) = self.engine.apply(&swap).await {
            warn!(client_id = %id, error = %err, "moving client policy failed; restoring name");
            self.directory.rename(id, before.name).await?;
            return Err(err.into());
        }

        info!(client_id = %id, from = %before.name, to = name, "api client renamed");
        Ok(after)
    }

    /// Forget the client, then revoke its policy.
    ///
    /// Once the directory entry is gone the key no longer resolves, so no
    /// request is let in by the still-present rule. If the revoke fails the
    /// client is put back with its key.
    pub async fn remove(&self, id: ClientId) -> Result<ApiClient, ClientError> {
        let (client, key) = self.directory.remove(id).await?;

        if let Err(err) = self.engine.remove_policy(client_rule(&client.name)).await {
            warn!(client_id = %id, error = %err, "revoking client policy failed; restoring client");
            self.directory.insert(client, key).await?;
            return Err(err.into());
        }

        info!(client_id = %id, name = %client.name, "api client removed");
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use warden_policy::{AdapterError, EnforcementModel, MemoryAdapter, PolicyAdapter, StoredRule};

    /// Memory adapter whose writes can be made to fail.
    #[derive(Default)]
    struct SwitchableAdapter {
        inner: MemoryAdapter,
        down: AtomicBool,
    }

    impl SwitchableAdapter {
        fn check(&self) -> Result<(), AdapterError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(AdapterError::Unavailable("down".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PolicyAdapter for SwitchableAdapter {
        async fn load(&self) -> Result<Vec<StoredRule>, AdapterError> {
            self.inner.load().await
        }
        async fn save(&self, rules: &[StoredRule]) -> Result<(), AdapterError> {
            self.check()?;
            self.inner.save(rules).await
        }
        async fn add_rule(&self, rule: &StoredRule) -> Result<(), AdapterError> {
            self.check()?;
            self.inner.add_rule(rule).await
        }
        async fn remove_rule(&self, rule: &StoredRule) -> Result<(), AdapterError> {
            self.check()?;
            self.inner.remove_rule(rule).await
        }
    }

    async fn resolver_with(adapter: Arc<dyn PolicyAdapter>) -> (ApiKeyResolver, Arc<PolicyEngine>) {
        let engine = Arc::new(
            PolicyEngine::open(
                EnforcementModel::default(),
                adapter,
                warden_policy::store::DEFAULT_DEADLINE,
            )
            .await
            .unwrap(),
        );
        let directory = Arc::new(InMemoryClientDirectory::new());
        (ApiKeyResolver::new(directory, engine.clone()), engine)
    }

    async fn resolver() -> (ApiKeyResolver, Arc<PolicyEngine>) {
        resolver_with(Arc::new(MemoryAdapter::new())).await
    }

    #[tokio::test]
    async fn keys_are_32_random_bytes_in_hex() {
        let a = generate_key();
        let b = generate_key();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn registration_issues_a_key_and_grants_read_access() {
        let (r, engine) = resolver().await;
        let issued = r.register("reporting").await.unwrap();

        let p = r.resolve(&issued.key).await.unwrap();
        assert_eq!(p.identity, "reporting");
        assert_eq!(p.domain, Domain::API);
        assert_eq!(p.kind, crate::PrincipalKind::ApiClient);

        assert!(engine.enforce("reporting", &Domain::API, "/api/users", "GET").await.unwrap());
        assert!(!engine.enforce("reporting", &Domain::API, "/api/users", "POST").await.unwrap());

        assert!(matches!(
            r.register("reporting").await,
            Err(ClientError::Directory(DirectoryError::DuplicateName(_)))
        ));
    }

    #[tokio::test]
    async fn rotation_retires_the_old_key() {
        let (r, _) = resolver().await;
        let k1 = r.register("billing").await.unwrap();
        assert!(r.resolve(&k1.key).await.is_ok());

        let k2 = r.rotate_key(k1.client.id).await.unwrap();
        assert_ne!(k1.key, k2.key);
        assert_eq!(r.resolve(&k1.key).await, Err(CredentialError::UnknownKey));
        assert_eq!(r.resolve(&k2.key).await.unwrap().identity, "billing");
    }

    #[tokio::test]
    async fn inactive_and_unknown_keys_are_distinguished() {
        let (r, _) = resolver().await;
        let issued = r.register("batch").await.unwrap();
        r.set_active(issued.client.id, false).await.unwrap();

        assert_eq!(r.resolve(&issued.key).await, Err(CredentialError::Inactive));
        assert_eq!(r.resolve("deadbeef").await, Err(CredentialError::UnknownKey));
        assert_eq!(r.resolve("").await, Err(CredentialError::Missing));

        r.set_active(issued.client.id, true).await.unwrap();
        assert!(r.resolve(&issued.key).await.is_ok());
    }

    #[tokio::test]
    async fn removal_revokes_key_and_policy() {
        let (r, engine) = resolver().await;
        let issued = r.register("temp").await.unwrap();
        r.remove(issued.client.id).await.unwrap();

        assert_eq!(r.resolve(&issued.key).await, Err(CredentialError::UnknownKey));
        assert!(!engine.enforce("temp", &Domain::API, "/api/x", "GET").await.unwrap());
        assert!(matches!(
            r.remove(issued.client.id).await,
            Err(ClientError::Directory(DirectoryError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn failed_revoke_restores_the_client_and_its_key() {
        let adapter = Arc::new(SwitchableAdapter::default());
        let (r, engine) = resolver_with(adapter.clone()).await;
        let issued = r.register("ledger").await.unwrap();

        adapter.down.store(true, Ordering::SeqCst);
        assert!(matches!(r.remove(issued.client.id).await, Err(ClientError::Policy(_))));
        assert_eq!(r.resolve(&issued.key).await.unwrap().identity, "ledger");
        assert_eq!(r.get(issued.client.id).await.unwrap(), issued.client);
        assert!(engine.enforce("ledger", &Domain::API, "/api/x", "GET").await.unwrap());

        adapter.down.store(false, Ordering::SeqCst);
        r.remove(issued.client.id).await.unwrap();
        assert_eq!(r.resolve(&issued.key).await, Err(CredentialError::UnknownKey));
        assert!(!engine.enforce("ledger", &Domain::API, "/api/x", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn names_that_cannot_be_stored_are_rejected() {
        let (r, engine) = resolver().await;
        for name in ["", "evil\nname", "cr\rlf", " padded", "padded "] {
            assert!(
                matches!(r.register(name).await, Err(ClientError::InvalidName(_))),
                "{name:?} accepted"
            );
        }
        assert!(r.list().await.unwrap().is_empty());
        assert!(engine.policies().await.is_empty());

        let issued = r.register("fine").await.unwrap();
        assert!(matches!(
            r.rename(issued.client.id, "line\nbreak").await,
            Err(ClientError::InvalidName(_))
        ));
        assert_eq!(r.get(issued.client.id).await.unwrap().name, "fine");
    }

    #[tokio::test]
    async fn rename_moves_the_policy() {
        let (r, engine) = resolver().await;
        let issued = r.register("old-name").await.unwrap();
        r.rename(issued.client.id, "new-name").await.unwrap();

        assert!(!engine.enforce("old-name", &Domain::API, "/api/x", "GET").await.unwrap());
        assert!(engine.enforce("new-name", &Domain::API, "/api/x", "GET").await.unwrap());
        assert_eq!(r.resolve(&issued.key).await.unwrap().identity, "new-name");
    }

    #[tokio::test]
    async fn concurrent_lookups_see_exactly_one_key_after_each_rotation() {
        let (r, _) = resolver().await;
        let issued = r.register("busy").await.unwrap();
        let id = issued.client.id;

        let mut current = issued.key;
        for _ in 0..50 {
            let next = r.rotate_key(id).await.unwrap().key;
            let (old, new) = tokio::join!(r.resolve(&current), r.resolve(&next));
            assert_eq!(old, Err(CredentialError::UnknownKey));
            assert!(new.is_ok());
            current = next;
        }
    }
}
