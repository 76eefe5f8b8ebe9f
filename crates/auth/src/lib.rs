//! `warden-auth`: credentials to principals, principals to decisions.
//!
//! - [`token`]: signed bearer tokens (HS256), minting and verification
//! - [`api_key`]: opaque API keys backed by a [`ClientDirectory`]
//! - [`user`]: the user directory whose members receive domain roles
//! - [`password`]: argon2id password hashing behind [`PasswordHasher`]
//! - [`gateway`]: [`AccessGateway`], one allow/reject decision per request
//!
//! Nothing here knows about HTTP; the API crate maps [`AccessError`] onto
//! status codes.

pub mod api_key;
pub mod claims;
pub mod error;
pub mod gateway;
pub mod password;
pub mod principal;
pub mod roles;
pub mod token;
pub mod user;

pub use api_key::{ApiClient, ApiKeyResolver, ClientDirectory, InMemoryClientDirectory, IssuedKey};
pub use claims::{ClaimsError, TokenClaims, validate_claims};
pub use error::{ClientError, CredentialError, DirectoryError, PasswordError, UserError};
pub use gateway::{AccessError, AccessGateway, KeyRouteEnforcement};
pub use principal::{Principal, PrincipalKind};
pub use roles::Role;
pub use token::TokenService;
pub use password::{Argon2Hasher, PasswordHasher, random_password};
pub use user::{NewUser, ProfileUpdate, User, UserDirectory};
