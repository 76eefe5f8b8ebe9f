use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by a bearer token.
///
/// Registered claims use the JWT names and unix-second timestamps so that any
/// standard JWT library can read them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Username; the policy subject.
    pub sub: String,
    /// User id.
    pub uid: String,
    #[serde(default)]
    pub email: String,
    pub role: String,
    /// Domain the token acts in.
    #[serde(default = "default_domain")]
    pub dom: String,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

fn default_domain() -> String {
    warden_core::Domain::DEFAULT.to_string()
}

impl TokenClaims {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.iat, 0).single()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat/nbf is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Check the time window of already-decoded claims against `now`.
///
/// Signature checks happen in [`crate::TokenService`]; this is the part that
/// is deterministic given a clock.
pub fn validate_claims(claims: &TokenClaims, now: DateTime<Utc>) -> Result<(), ClaimsError> {
    if claims.exp <= claims.iat {
        return Err(ClaimsError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now < claims.iat || now < claims.nbf {
        return Err(ClaimsError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(ClaimsError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(iat: i64, exp: i64) -> TokenClaims {
        TokenClaims {
            sub: "alice".into(),
            uid: "u1".into(),
            email: "alice@example.com".into(),
            role: "admin".into(),
            dom: "default".into(),
            iss: "warden".into(),
            iat,
            nbf: iat,
            exp,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn window_checks() {
        let c = claims(1_000, 2_000);
        assert_eq!(validate_claims(&c, at(1_500)), Ok(()));
        assert_eq!(validate_claims(&c, at(999)), Err(ClaimsError::NotYetValid));
        assert_eq!(validate_claims(&c, at(2_000)), Err(ClaimsError::Expired));
        assert_eq!(
            validate_claims(&claims(2_000, 2_000), at(2_000)),
            Err(ClaimsError::InvalidTimeWindow)
        );
    }

    #[test]
    fn missing_domain_defaults() {
        let json = r#"{"sub":"a","uid":"1","role":"r","iss":"warden","iat":1,"nbf":1,"exp":2}"#;
        let c: TokenClaims = serde_json::from_str(json).unwrap();
        assert_eq!(c.dom, "default");
        assert_eq!(c.email, "");
    }
}
