//! User directory.
//!
//! Users are the subjects of bearer tokens. The directory keeps the records
//! and keeps the policy engine's grouping facts in step with them: a user's
//! `role` always has a matching `(username, role, default)` fact.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use warden_core::{Domain, UserId};
use warden_policy::{Mutation, PolicyEngine, PolicyRule, RoleGroupingFact, validate_field};

use crate::password::{Argon2Hasher, PasswordHasher, validate_password};
use crate::{Role, UserError};

pub const SUPERADMIN_USERNAME: &str = "superadmin";
pub const SUPERADMIN_EMAIL: &str = "superadmin@localhost";

/// Actions the seeded superadmin role is granted on every object.
const SUPERADMIN_ACTIONS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

impl core::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

fn default_role() -> Role {
    Role::USER
}

impl NewUser {
    fn validate(&self) -> Result<(), UserError> {
        validate_username(&self.username)?;
        validate_email(&self.email)?;
        validate_field("role", self.role.as_str()).map_err(|e| UserError::Validation(e.to_string()))
    }
}

/// Username and/or email change. Absent fields stay as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
}

fn validate_username(username: &str) -> Result<(), UserError> {
    validate_field("username", username).map_err(|e| UserError::Validation(e.to_string()))
}

fn validate_email(email: &str) -> Result<(), UserError> {
    validate_field("email", email).map_err(|e| UserError::Validation(e.to_string()))?;
    if !email.contains('@') {
        return Err(UserError::Validation("email must contain '@'".into()));
    }
    Ok(())
}

pub struct UserDirectory {
    // Keyed by v7 ids, so iteration order is creation order.
    users: RwLock<BTreeMap<UserId, User>>,
    engine: Arc<PolicyEngine>,
    hasher: Arc<dyn PasswordHasher>,
}

impl core::fmt::Debug for UserDirectory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserDirectory")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl UserDirectory {
    pub fn new(engine: Arc<PolicyEngine>) -> Self {
        Self::with_hasher(engine, Arc::new(Argon2Hasher::default()))
    }

    pub fn with_hasher(engine: Arc<PolicyEngine>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            users: RwLock::new(BTreeMap::new()),
            engine,
            hasher,
        }
    }

    async fn hash_password(&self, plaintext: &str) -> Result<String, UserError> {
        validate_password(plaintext).map_err(|e| UserError::Validation(e.to_string()))?;
        let hasher = self.hasher.clone();
        let plaintext = plaintext.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .map_err(|e| UserError::Unavailable(format!("hashing task failed: {e}")))?
            .map_err(UserError::Password)
    }

    async fn verify_password(&self, plaintext: &str, stored: &str) -> bool {
        let hasher = self.hasher.clone();
        let plaintext = plaintext.to_string();
        let stored = stored.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &stored))
            .await
            .unwrap_or(false)
    }

    /// Create a user and assign its role in the default domain.
    pub async fn create(&self, new: NewUser) -> Result<User, UserError> {
        new.validate()?;
        let password_hash = self.hash_password(&new.password).await?;

        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == new.username) {
            return Err(UserError::DuplicateUsername(new.username));
        }
        if users.values().any(|u| u.email == new.email) {
            return Err(UserError::DuplicateEmail(new.email));
        }

        self.engine
            .add_role_for_user(&new.username, new.role.as_str(), &Domain::DEFAULT)
            .await?;

        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            username: new.username,
            email: new.email,
            role: new.role,
            active: true,
            password_hash,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        info!(user_id = %user.id, username = %user.username, role = %user.role, "user created");
        Ok(user)
    }

    /// Self-service sign-up. The requested role is ignored: newcomers get
    /// [`Role::USER`].
    pub async fn register(&self, mut new: NewUser) -> Result<User, UserError> {
        new.role = Role::USER;
        self.create(new).await
    }

    /// Check a username/password pair.
    ///
    /// Unknown users and wrong passwords fail the same way. The password is
    /// checked before the active flag.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, UserError> {
        let Some(user) = self.find_by_username(username).await else {
            debug!(username, "login for unknown user");
            return Err(UserError::InvalidCredentials);
        };
        if !self.verify_password(password, &user.password_hash).await {
            debug!(user_id = %user.id, "login with wrong password");
            return Err(UserError::InvalidCredentials);
        }
        if !user.active {
            return Err(UserError::Inactive);
        }
        info!(user_id = %user.id, "user logged in");
        Ok(user)
    }

    pub async fn change_password(&self, id: UserId, old: &str, new: &str) -> Result<(), UserError> {
        let current = self.get(id).await.ok_or(UserError::NotFound(id))?;
        if !self.verify_password(old, &current.password_hash).await {
            return Err(UserError::InvalidCredentials);
        }
        let password_hash = self.hash_password(new).await?;

        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(UserError::NotFound(id))?;
        user.password_hash = password_hash;
        user.updated_at = Utc::now();
        info!(user_id = %id, "password changed");
        Ok(())
    }

    /// Change username and/or email.
    ///
    /// A new username moves the user's grouping fact in one paired batch.
    pub async fn update_profile(&self, id: UserId, update: ProfileUpdate) -> Result<User, UserError> {
        if let Some(username) = &update.username {
            validate_username(username)?;
        }
        if let Some(email) = &update.email {
            validate_email(email)?;
        }

        let mut users = self.users.write().await;
        let current = users.get(&id).cloned().ok_or(UserError::NotFound(id))?;

        let username = update.username.filter(|u| *u != current.username);
        let email = update.email.filter(|e| *e != current.email);
        if let Some(username) = &username {
            if users.values().any(|u| &u.username == username) {
                return Err(UserError::DuplicateUsername(username.clone()));
            }
        }
        if let Some(email) = &email {
            if users.values().any(|u| &u.email == email) {
                return Err(UserError::DuplicateEmail(email.clone()));
            }
        }

        if let Some(username) = &username {
            self.engine
                .apply(&[
                    Mutation::remove_grouping(RoleGroupingFact::new(
                        current.username.clone(),
                        current.role.to_string(),
                        Domain::DEFAULT,
                    )),
                    Mutation::add_grouping(RoleGroupingFact::new(
                        username.clone(),
                        current.role.to_string(),
                        Domain::DEFAULT,
                    )),
                ])
                .await?;
        }

        let user = users.get_mut(&id).ok_or(UserError::NotFound(id))?;
        if let Some(username) = username {
            info!(user_id = %id, from = %user.username, to = %username, "username changed");
            user.username = username;
        }
        if let Some(email) = email {
            user.email = email;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    pub async fn get(&self, id: UserId) -> Option<User> {
        self.users.read().await.get(&id).cloned()
    }

    pub async fn find_by_username(&self, username: &str) -> Option<User> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned()
    }

    /// First `limit` users in creation order.
    pub async fn list(&self, limit: usize) -> Vec<User> {
        self.users.read().await.values().take(limit).cloned().collect()
    }

    pub async fn set_active(&self, id: UserId, active: bool) -> Result<User, UserError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(UserError::NotFound(id))?;
        user.active = active;
        user.updated_at = Utc::now();
        info!(user_id = %id, active, "user activation changed");
        Ok(user.clone())
    }

    /// Move a user to another role.
    ///
    /// The old grouping fact is removed and the new one added in a single
    /// batch, so no enforcement sees the user with both roles or neither.
    pub async fn set_role(&self, id: UserId, role: Role) -> Result<User, UserError> {
        validate_field("role", role.as_str()).map_err(|e| UserError::Validation(e.to_string()))?;
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(UserError::NotFound(id))?;
        if user.role == role {
            return Ok(user.clone());
        }

        self.engine
            .apply(&[
                Mutation::remove_grouping(RoleGroupingFact::new(
                    user.username.clone(),
                    user.role.to_string(),
                    Domain::DEFAULT,
                )),
                Mutation::add_grouping(RoleGroupingFact::new(
                    user.username.clone(),
                    role.to_string(),
                    Domain::DEFAULT,
                )),
            ])
            .await?;

        info!(user_id = %id, from = %user.role, to = %role, "user role changed");
        user.role = role;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    pub async fn remove(&self, id: UserId) -> Result<User, UserError> {
        let mut users = self.users.write().await;
        let user = users.get(&id).cloned().ok_or(UserError::NotFound(id))?;

        self.engine
            .delete_role_for_user(&user.username, user.role.as_str(), &Domain::DEFAULT)
            .await?;

        users.remove(&id);
        info!(user_id = %id, username = %user.username, "user removed");
        Ok(user)
    }

    /// Ensure the superadmin exists and its role may do anything in the
    /// default domain. Safe to run on every start; an existing superadmin
    /// keeps its password.
    pub async fn seed_superadmin(&self, password: &str) -> Result<User, UserError> {
        let grants: Vec<Mutation> = SUPERADMIN_ACTIONS
            .iter()
            .map(|action| {
                Mutation::add_policy(PolicyRule::new(
                    Role::SUPERADMIN.to_string(),
                    Domain::DEFAULT,
                    "*",
                    *action,
                ))
            })
            .collect();
        self.engine.apply(&grants).await?;

        if let Some(existing) = self.find_by_username(SUPERADMIN_USERNAME).await {
            return Ok(existing);
        }
        self.create(NewUser {
            username: SUPERADMIN_USERNAME.to_string(),
            email: SUPERADMIN_EMAIL.to_string(),
            password: password.to_string(),
            role: Role::SUPERADMIN,
        })
        .await
    }
}
