//! Access token validation.

use beacon_core::Identity;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::AuthConfig;

/// Reasons a connection attempt is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No token was supplied.
    #[error("missing token")]
    MissingToken,

    /// The token is malformed, has a bad signature, or fails a claim check.
    #[error("invalid token")]
    InvalidToken,

    /// The token was valid but has expired.
    #[error("token expired")]
    ExpiredToken,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject; the identity the connection is bound to.
    pub sub: String,
    /// Expiry as seconds since the epoch.
    pub exp: u64,
    /// Issued-at as seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Account email, recorded in the admission log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Name shown to other users, recorded in the admission log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Turns a bearer credential into an identity.
pub trait Authenticator: Send + Sync + 'static {
    /// Validate `token` and return the identity it names.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ExpiredToken`] for expired tokens and
    /// [`AuthError::InvalidToken`] for anything else that fails validation.
    fn validate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HMAC-signed JWT validation.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Accept HS256/384/512 tokens signed with `secret`, with no clock leeway.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Require the `iss` claim to equal `issuer`.
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self.validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        self
    }

    /// Tolerate `secs` of clock skew on expiry.
    #[must_use]
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.validation.leeway = secs;
        self
    }

    /// Build from the `[auth]` config section.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let auth = Self::new(config.jwt_secret.as_bytes()).with_leeway(config.leeway_secs);
        match &config.issuer {
            Some(issuer) => auth.with_issuer(issuer),
            None => auth,
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            }
        })?;

        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        debug!(
            identity = %claims.sub,
            email = ?claims.email,
            display_name = ?claims.display_name,
            "Token accepted"
        );

        Ok(Identity::new(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, get_current_timestamp, EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret";

    fn token(secret: &[u8], sub: &str, exp: u64, iss: Option<&str>) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp,
            iat: Some(get_current_timestamp()),
            iss: iss.map(str::to_string),
            email: Some("a@example.com".to_string()),
            display_name: None,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn test_valid_token() {
        let auth = JwtAuthenticator::new(SECRET);
        let t = token(SECRET, "user-1", get_current_timestamp() + 900, None);

        assert_eq!(auth.validate(&t), Ok(Identity::new("user-1")));
    }

    #[test]
    fn test_profile_claims_are_optional() {
        let auth = JwtAuthenticator::new(SECRET);
        let exp = get_current_timestamp() + 900;

        let bare = serde_json::json!({ "sub": "user-1", "exp": exp });
        let t = encode(&Header::default(), &bare, &EncodingKey::from_secret(SECRET)).unwrap();
        assert_eq!(auth.validate(&t), Ok(Identity::new("user-1")));

        let full = Claims {
            sub: "user-2".to_string(),
            exp,
            iat: None,
            iss: None,
            email: Some("b@example.com".to_string()),
            display_name: Some("Bea".to_string()),
        };
        let t = encode(&Header::default(), &full, &EncodingKey::from_secret(SECRET)).unwrap();
        assert_eq!(auth.validate(&t), Ok(Identity::new("user-2")));
    }

    #[test]
    fn test_expired_token() {
        let auth = JwtAuthenticator::new(SECRET);
        let t = token(SECRET, "user-1", get_current_timestamp() - 3600, None);

        assert_eq!(auth.validate(&t), Err(AuthError::ExpiredToken));
    }

    #[test]
    fn test_leeway_accepts_recently_expired() {
        let auth = JwtAuthenticator::new(SECRET).with_leeway(120);
        let t = token(SECRET, "user-1", get_current_timestamp() - 30, None);

        assert!(auth.validate(&t).is_ok());
    }

    #[test]
    fn test_wrong_secret() {
        let auth = JwtAuthenticator::new(SECRET);
        let t = token(b"other-secret", "user-1", get_current_timestamp() + 900, None);

        assert_eq!(auth.validate(&t), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_garbage() {
        let auth = JwtAuthenticator::new(SECRET);
        assert_eq!(auth.validate("not.a.jwt"), Err(AuthError::InvalidToken));
        assert_eq!(auth.validate(""), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_empty_subject() {
        let auth = JwtAuthenticator::new(SECRET);
        let t = token(SECRET, "", get_current_timestamp() + 900, None);

        assert_eq!(auth.validate(&t), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_issuer() {
        let auth = JwtAuthenticator::new(SECRET).with_issuer("wakeup");
        let exp = get_current_timestamp() + 900;

        assert!(auth.validate(&token(SECRET, "u", exp, Some("wakeup"))).is_ok());
        assert_eq!(
            auth.validate(&token(SECRET, "u", exp, Some("someone-else"))),
            Err(AuthError::InvalidToken)
        );
        assert_eq!(
            auth.validate(&token(SECRET, "u", exp, None)),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_from_config() {
        let config = AuthConfig {
            jwt_secret: "cfg-secret".to_string(),
            issuer: Some("wakeup".to_string()),
            leeway_secs: 0,
        };
        let auth = JwtAuthenticator::from_config(&config);
        let t = token(b"cfg-secret", "u", get_current_timestamp() + 900, Some("wakeup"));

        assert_eq!(auth.validate(&t), Ok(Identity::new("u")));
    }
}
