//! Signed bearer tokens.
//!
//! Only HS256 is accepted. The expected algorithm is pinned before the
//! signature is checked, so a token that names any other algorithm (RS256,
//! HS512, ...) is rejected as an invalid signature instead of being verified
//! with whatever the header asks for.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

use warden_core::Domain;

use crate::claims::{ClaimsError, TokenClaims, validate_claims};
use crate::{CredentialError, Principal, Role, User};

pub const DEFAULT_ISSUER: &str = "warden";

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl core::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl: Duration) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256];
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iat", "iss", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            issuer,
            ttl,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Claims for `user` acting in the default domain, issued at `now`.
    pub fn claims_for(&self, user: &User, now: DateTime<Utc>) -> TokenClaims {
        let iat = now.timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        TokenClaims {
            sub: user.username.clone(),
            uid: user.id.to_string(),
            email: user.email.clone(),
            role: user.role.to_string(),
            dom: Domain::DEFAULT.to_string(),
            iss: self.issuer.clone(),
            iat,
            nbf: iat,
            exp: iat.saturating_add(ttl),
        }
    }

    /// Sign arbitrary claims with the configured secret.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, CredentialError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| CredentialError::Malformed(e.to_string()))
    }

    /// Issue a fresh token for `user`.
    pub fn mint(&self, user: &User) -> Result<String, CredentialError> {
        self.sign(&self.claims_for(user, Utc::now()))
    }

    /// Verify signature, algorithm, issuer and time window.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, CredentialError> {
        if token.is_empty() {
            return Err(CredentialError::Missing);
        }

        let header = jsonwebtoken::decode_header(token).map_err(map_jwt_error)?;
        if header.alg != Algorithm::HS256 {
            debug!(alg = ?header.alg, "rejecting token with unexpected algorithm");
            return Err(CredentialError::InvalidSignature);
        }

        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map_err(map_jwt_error)?;

        validate_claims(&data.claims, Utc::now()).map_err(|e| match e {
            ClaimsError::Expired => CredentialError::Expired,
            ClaimsError::NotYetValid => CredentialError::NotYetValid,
            ClaimsError::InvalidTimeWindow => CredentialError::Malformed(e.to_string()),
        })?;

        Ok(data.claims)
    }

    /// Resolve a bearer token into a principal.
    pub fn verify(&self, token: &str) -> Result<Principal, CredentialError> {
        let claims = self.decode(token)?;
        Ok(Principal::user(
            claims.sub,
            Domain::from(claims.dom),
            vec![Role::from(claims.role)],
        ))
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> CredentialError {
    match err.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm => CredentialError::InvalidSignature,
        ErrorKind::ExpiredSignature => CredentialError::Expired,
        ErrorKind::ImmatureSignature => CredentialError::NotYetValid,
        _ => CredentialError::Malformed(err.to_string()),
    }
}
