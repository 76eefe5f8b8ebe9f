//! Process configuration.
//!
//! `.env*` files in the working directory are loaded first (best effort),
//! then every setting is read from the environment with a default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use warden_auth::{Argon2Hasher, KeyRouteEnforcement};

const DEV_SECRET: &str = "warden-dev-secret";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    pub jwt_issuer: String,
    pub api_key_header: String,
    /// Enforcement model file; the embedded default when unset.
    pub model_path: Option<PathBuf>,
    /// Policy file for the file adapter; in-memory when unset.
    pub policy_path: Option<PathBuf>,
    pub key_routes: KeyRouteEnforcement,
    pub broadcast_interval: Duration,
    pub store_deadline: Duration,
    /// Upper bound on one user-list fetch by the hub.
    pub snapshot_timeout: Duration,
    /// Password for the seeded `superadmin`; a random one is generated when unset.
    pub initial_admin_password: Option<String>,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            jwt_secret: DEV_SECRET.to_string(),
            jwt_ttl: Duration::from_secs(24 * 60 * 60),
            jwt_issuer: warden_auth::token::DEFAULT_ISSUER.to_string(),
            api_key_header: "X-API-Key".to_string(),
            model_path: None,
            policy_path: None,
            key_routes: KeyRouteEnforcement::ActiveOnly,
            broadcast_interval: Duration::from_secs(5),
            store_deadline: warden_policy::store::DEFAULT_DEADLINE,
            snapshot_timeout: warden_hub::hub::DEFAULT_SNAPSHOT_TIMEOUT,
            initial_admin_password: None,
            argon2_memory_kib: Argon2Hasher::DEFAULT_MEMORY_KIB,
            argon2_iterations: Argon2Hasher::DEFAULT_ITERATIONS,
            argon2_parallelism: Argon2Hasher::DEFAULT_PARALLELISM,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        load_env_files();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let port = match get("SERVER_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("parse SERVER_PORT: {raw}"))?,
            None => defaults.port,
        };

        let jwt_secret = match get("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET not set; using insecure dev default");
                defaults.jwt_secret
            }
        };

        let jwt_ttl = match get("JWT_EXPIRATION") {
            Some(raw) => parse_secs(&raw).with_context(|| format!("parse JWT_EXPIRATION: {raw}"))?,
            None => defaults.jwt_ttl,
        };

        let key_routes = match get("WARDEN_KEY_ROUTE_ENFORCEMENT") {
            Some(raw) => raw
                .parse::<KeyRouteEnforcement>()
                .map_err(anyhow::Error::msg)
                .context("parse WARDEN_KEY_ROUTE_ENFORCEMENT")?,
            None => defaults.key_routes,
        };

        let broadcast_interval = match get("WARDEN_BROADCAST_INTERVAL") {
            Some(raw) => parse_secs(&raw).with_context(|| format!("parse WARDEN_BROADCAST_INTERVAL: {raw}"))?,
            None => defaults.broadcast_interval,
        };
        if broadcast_interval.is_zero() {
            anyhow::bail!("WARDEN_BROADCAST_INTERVAL must be positive");
        }

        let store_deadline = match get("WARDEN_STORE_DEADLINE_MS") {
            Some(raw) => Duration::from_millis(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("parse WARDEN_STORE_DEADLINE_MS: {raw}"))?,
            ),
            None => defaults.store_deadline,
        };

        let snapshot_timeout = match get("WARDEN_SNAPSHOT_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("parse WARDEN_SNAPSHOT_TIMEOUT_MS: {raw}"))?,
            ),
            None => defaults.snapshot_timeout,
        };

        let argon2_memory_kib = parse_u32(&get, "WARDEN_ARGON2_MEMORY_KIB", defaults.argon2_memory_kib)?;
        let argon2_iterations = parse_u32(&get, "WARDEN_ARGON2_ITERATIONS", defaults.argon2_iterations)?;
        let argon2_parallelism = parse_u32(&get, "WARDEN_ARGON2_PARALLELISM", defaults.argon2_parallelism)?;

        Ok(Self {
            port,
            jwt_secret,
            jwt_ttl,
            jwt_issuer: get("JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            api_key_header: get("API_KEY_HEADER").unwrap_or(defaults.api_key_header),
            model_path: get("WARDEN_MODEL_PATH").map(PathBuf::from),
            policy_path: get("WARDEN_POLICY_PATH").map(PathBuf::from),
            key_routes,
            broadcast_interval,
            store_deadline,
            snapshot_timeout,
            initial_admin_password: get("INITIAL_ADMIN_PASSWORD").filter(|s| !s.is_empty()),
            argon2_memory_kib,
            argon2_iterations,
            argon2_parallelism,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_SECRET
    }
}

fn parse_secs(raw: &str) -> Result<Duration> {
    Ok(Duration::from_secs(raw.trim().parse::<u64>()?))
}

fn parse_u32(get: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> Result<u32> {
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .with_context(|| format!("parse {key}: {raw}")),
        None => Ok(default),
    }
}

/// Load every `.env*` file in the working directory, in name order.
fn load_env_files() {
    let entries = match std::fs::read_dir(".") {
        Ok(entries) => entries,
        Err(err) => {
            warn!(error = %err, "could not scan for .env files");
            return;
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(".env"))
        })
        .collect();
    files.sort();

    for file in files {
        if let Err(err) = dotenvy::from_path(&file) {
            warn!(file = %file.display(), error = %err, "failed to load env file");
        }
    }
}
