//! Session token issuance and verification.
//!
//! Tokens are self-contained JWTs carrying the subject, a role snapshot,
//! issue and expiry instants, and a `kind` discriminator separating access
//! tokens from refresh tokens. Signature and TTLs come from configuration;
//! verification tolerates ±30 s of clock skew.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SigningAlgorithm;

use super::AuthError;

/// Clock skew tolerance applied during verification, in seconds.
const LEEWAY_SECONDS: u64 = 30;

/// Discriminates short-lived access tokens from long-lived refresh tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

/// JWT claim set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the username.
    pub sub: String,
    /// Role snapshot taken at login time.
    pub roles: Vec<String>,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Token kind.
    pub kind: TokenKind,
}

/// A freshly issued token with its lifetime.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: u64,
}

/// Issues and verifies both token kinds with one configured key.
pub struct TokenSigner {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_seconds: u64,
    refresh_ttl_seconds: u64,
}

impl TokenSigner {
    #[must_use]
    pub fn new(
        secret: &[u8],
        algorithm: SigningAlgorithm,
        access_ttl_seconds: u64,
        refresh_ttl_seconds: u64,
    ) -> Self {
        let algorithm = match algorithm {
            SigningAlgorithm::Hs256 => Algorithm::HS256,
            SigningAlgorithm::Hs384 => Algorithm::HS384,
            SigningAlgorithm::Hs512 => Algorithm::HS512,
        };
        Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    /// Lifetime reported alongside access tokens.
    #[must_use]
    pub fn access_ttl_seconds(&self) -> u64 {
        self.access_ttl_seconds
    }

    /// Issue a token of the given kind for a subject and role snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenEncode`] if signing fails.
    pub fn issue(
        &self,
        username: &str,
        roles: &[String],
        kind: TokenKind,
    ) -> Result<IssuedToken, AuthError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_seconds,
            TokenKind::Refresh => self.refresh_ttl_seconds,
        };
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: username.to_string(),
            roles: roles.to_vec(),
            iat: now,
            exp: now + ttl as i64,
            kind,
        };
        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key).map_err(
            |err| AuthError::TokenEncode {
                message: err.to_string(),
            },
        )?;
        Ok(IssuedToken {
            token,
            expires_in: ttl,
        })
    }

    /// Verify signature, expiry, and kind. Every failure mode collapses to
    /// [`AuthError::InvalidToken`]; the distinction only reaches logs.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] on any verification failure.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = LEEWAY_SECONDS;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|err| {
            debug!(%err, "token verification failed");
            AuthError::InvalidToken
        })?;

        if data.claims.kind != expected {
            debug!(
                got = %data.claims.kind,
                expected = %expected,
                "token kind mismatch"
            );
            return Err(AuthError::InvalidToken);
        }

        Ok(data.claims)
    }
}
