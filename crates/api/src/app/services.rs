//! Service wiring: policy engine, resolvers, directories and the hub.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use warden_auth::{
    AccessGateway, ApiKeyResolver, Argon2Hasher, InMemoryClientDirectory, TokenService, User,
    UserDirectory, random_password,
};
use warden_hub::{
    Hub, HubConfig, HubHandle, SnapshotError, SnapshotPublisher, SnapshotSource, UserSummary,
};
use warden_policy::{EnforcementModel, FileAdapter, MemoryAdapter, PolicyAdapter, PolicyEngine};

use crate::config::AppConfig;

/// Users pushed per snapshot.
pub const SNAPSHOT_LIMIT: usize = 100;

pub struct AppServices {
    pub engine: Arc<PolicyEngine>,
    pub gateway: AccessGateway,
    pub users: Arc<UserDirectory>,
    pub hub: HubHandle,
}

impl AppServices {
    /// Queue a user-list refresh after a user mutation. The hub reads the
    /// directory when it reaches the request, so concurrent mutations never
    /// publish an older list last.
    pub async fn notify_users_changed(&self) {
        if let Err(err) = self.hub.publish_snapshot().await {
            warn!(error = %err, "user change broadcast failed");
        }
    }
}

/// Background tasks owned by the running app.
pub struct Background {
    hub: HubHandle,
    hub_task: JoinHandle<()>,
    publisher: JoinHandle<()>,
}

impl Background {
    /// Stop the hub (closing every connection), then wait for both tasks.
    pub async fn shutdown(self) {
        self.hub.shutdown().await;
        if let Err(err) = self.hub_task.await {
            warn!(error = %err, "hub task ended abnormally");
        }
        if let Err(err) = self.publisher.await {
            warn!(error = %err, "publisher task ended abnormally");
        }
    }
}

/// Snapshot source backed by the user directory.
pub struct DirectorySnapshot {
    users: Arc<UserDirectory>,
}

#[async_trait]
impl SnapshotSource for DirectorySnapshot {
    async fn users(&self) -> Result<Vec<UserSummary>, SnapshotError> {
        Ok(self.users.list(SNAPSHOT_LIMIT).await.iter().map(summary).collect())
    }
}

pub fn summary(user: &User) -> UserSummary {
    UserSummary {
        id: *user.id.as_uuid(),
        username: user.username.clone(),
        email: user.email.clone(),
        role: user.role.to_string(),
        active: user.active,
        created_at: user.created_at,
        updated_at: user.updated_at,
    }
}

pub async fn build_services(config: &AppConfig) -> Result<(Arc<AppServices>, Background)> {
    let model = match &config.model_path {
        Some(path) => EnforcementModel::load(path)
            .with_context(|| format!("load enforcement model {}", path.display()))?,
        None => EnforcementModel::default(),
    };

    let adapter: Arc<dyn PolicyAdapter> = match &config.policy_path {
        Some(path) => {
            info!(path = %path.display(), "using file policy adapter");
            Arc::new(FileAdapter::new(path))
        }
        None => Arc::new(MemoryAdapter::new()),
    };

    let engine = Arc::new(
        PolicyEngine::open(model, adapter, config.store_deadline)
            .await
            .context("open policy engine")?,
    );

    let hasher = Argon2Hasher::new(
        config.argon2_memory_kib,
        config.argon2_iterations,
        config.argon2_parallelism,
    )
    .context("argon2 parameters")?;
    let users = Arc::new(UserDirectory::with_hasher(engine.clone(), Arc::new(hasher)));

    let admin_password = match &config.initial_admin_password {
        Some(password) => password.clone(),
        None => {
            warn!("INITIAL_ADMIN_PASSWORD not set; superadmin seeded with a random password");
            random_password()
        }
    };
    let superadmin = users
        .seed_superadmin(&admin_password)
        .await
        .context("seed superadmin")?;
    info!(username = %superadmin.username, "superadmin ready");

    let tokens = Arc::new(TokenService::new(
        config.jwt_secret.as_bytes(),
        config.jwt_issuer.clone(),
        config.jwt_ttl,
    ));

    let keys = ApiKeyResolver::new(Arc::new(InMemoryClientDirectory::new()), engine.clone());
    let gateway = AccessGateway::new(tokens, keys, engine.clone(), config.key_routes);

    let source = Arc::new(DirectorySnapshot { users: users.clone() });
    let (hub, hub_task) = Hub::spawn(
        source,
        HubConfig {
            snapshot_timeout: config.snapshot_timeout,
            ..HubConfig::default()
        },
    );
    let publisher = SnapshotPublisher::new(hub.clone(), config.broadcast_interval).spawn();

    let services = Arc::new(AppServices {
        engine,
        gateway,
        users,
        hub: hub.clone(),
    });
    let background = Background {
        hub,
        hub_task,
        publisher,
    };
    Ok((services, background))
}
