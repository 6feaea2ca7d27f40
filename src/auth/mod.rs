//! Authentication and session surface.
//!
//! Three operations, all funnelled through [`AuthService`]:
//!
//! - **login**: credential check against the user store, then issuance of an
//!   access/refresh token pair carrying the role snapshot;
//! - **refresh**: exchange a valid refresh token for a fresh access token
//!   preserving the *refresh token's* role snapshot (role changes require a
//!   full re-login, so a token chain never silently gains authority);
//! - **authenticate**: resolve an access token to a [`CallerIdentity`] that
//!   the retrieval pipeline uses to build its per-request RBAC engine.
//!
//! Unknown usernames and wrong passwords produce byte-identical errors, and
//! the unknown-username path still spends a bcrypt verification, so neither
//! the response body nor its timing enumerates accounts.

pub mod password;
pub mod token;
pub mod users;

use thiserror::Error;
use tracing::info;

use crate::audit::{AuditEvent, AuditHandle};

pub use token::{Claims, IssuedToken, TokenKind, TokenSigner};
pub use users::{NewUser, UserBackend, UserRecord, UserStore};

/// Errors raised by the auth surface.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Bad username or password. One message for both, no enumeration.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Missing, malformed, expired, or wrong-kind token.
    #[error("missing, invalid, or expired token")]
    InvalidToken,

    /// The user store failed.
    #[error("user store failure: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// bcrypt failed to hash a password.
    #[error("password hashing failed: {message}")]
    PasswordHash {
        /// Description of the failure.
        message: String,
    },

    /// JWT signing failed.
    #[error("token encoding failed: {message}")]
    TokenEncode {
        /// Description of the failure.
        message: String,
    },
}

/// The authenticated caller as seen by downstream components.
#[derive(Clone, Debug, PartialEq)]
pub struct CallerIdentity {
    pub username: String,
    /// Raw role names from the token snapshot; canonicalization happens in
    /// the RBAC engine.
    pub roles: Vec<String>,
}

/// Successful login result.
#[derive(Clone, Debug)]
pub struct LoginOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub username: String,
    pub roles: Vec<String>,
}

/// Successful refresh result.
#[derive(Clone, Debug)]
pub struct RefreshOutcome {
    pub access_token: String,
    pub expires_in: u64,
}

/// Credential validation and token lifecycle.
pub struct AuthService {
    users: std::sync::Arc<dyn UserBackend>,
    signer: TokenSigner,
    audit: AuditHandle,
}

impl AuthService {
    #[must_use]
    pub fn new(
        users: std::sync::Arc<dyn UserBackend>,
        signer: TokenSigner,
        audit: AuditHandle,
    ) -> Self {
        Self {
            users,
            signer,
            audit,
        }
    }

    /// Validate credentials and issue a token pair.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for every credential
    /// problem, [`AuthError::Storage`] / [`AuthError::TokenEncode`] for
    /// infrastructure failures.
    pub async fn login(&self, username: &str, pass: &str) -> Result<LoginOutcome, AuthError> {
        let Some(user) = self.users.fetch(username).await? else {
            // Same cost as a real verification; see module docs.
            password::burn_verification(pass);
            self.audit.emit(AuditEvent::auth_attempt(
                username,
                false,
                Some("unknown_user".to_string()),
            ));
            return Err(AuthError::InvalidCredentials);
        };

        if !user.is_active {
            password::burn_verification(pass);
            self.audit.emit(AuditEvent::auth_attempt(
                username,
                false,
                Some("inactive_account".to_string()),
            ));
            return Err(AuthError::InvalidCredentials);
        }

        if !password::verify_password(pass, &user.password_hash) {
            self.audit.emit(AuditEvent::auth_attempt(
                username,
                false,
                Some("bad_password".to_string()),
            ));
            return Err(AuthError::InvalidCredentials);
        }

        let access = self
            .signer
            .issue(&user.username, &user.roles, TokenKind::Access)?;
        let refresh = self
            .signer
            .issue(&user.username, &user.roles, TokenKind::Refresh)?;

        self.audit
            .emit(AuditEvent::auth_attempt(&user.username, true, None));
        info!(username = %user.username, "login succeeded");

        Ok(LoginOutcome {
            access_token: access.token,
            refresh_token: refresh.token,
            expires_in: access.expires_in,
            username: user.username,
            roles: user.roles,
        })
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The new access token carries the refresh token's role snapshot; the
    /// user row is consulted only to confirm the account still exists and is
    /// active.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for any token or account problem.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshOutcome, AuthError> {
        let claims = self.signer.verify(refresh_token, TokenKind::Refresh)?;

        let still_valid = self
            .users
            .fetch(&claims.sub)
            .await?
            .is_some_and(|user| user.is_active);
        if !still_valid {
            self.audit.emit(AuditEvent::auth_attempt(
                &claims.sub,
                false,
                Some("refresh_for_missing_account".to_string()),
            ));
            return Err(AuthError::InvalidToken);
        }

        let access = self
            .signer
            .issue(&claims.sub, &claims.roles, TokenKind::Access)?;
        self.audit.emit(AuditEvent::auth_attempt(
            &claims.sub,
            true,
            Some("refresh".to_string()),
        ));

        Ok(RefreshOutcome {
            access_token: access.token,
            expires_in: access.expires_in,
        })
    }

    /// Resolve an access token to the caller identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] on any verification failure.
    pub fn authenticate(&self, access_token: &str) -> Result<CallerIdentity, AuthError> {
        let claims = self.signer.verify(access_token, TokenKind::Access)?;
        Ok(CallerIdentity {
            username: claims.sub,
            roles: claims.roles,
        })
    }

    /// Access-token lifetime for response bodies.
    #[must_use]
    pub fn access_ttl_seconds(&self) -> u64 {
        self.signer.access_ttl_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditBus, MemorySink};
    use crate::config::SigningAlgorithm;

    const TEST_KEY: &[u8] = b"auth-service-test-key-0123456789";

    async fn service_with(audit: AuditHandle) -> AuthService {
        let users = UserStore::open_in_memory().await.unwrap();
        users
            .upsert(NewUser {
                username: "alice".to_string(),
                password: "correct-horse".to_string(),
                roles: vec!["finance_analyst".to_string()],
                is_active: true,
            })
            .await
            .unwrap();
        users
            .upsert(NewUser {
                username: "mallory".to_string(),
                password: "whatever".to_string(),
                roles: vec!["intern".to_string()],
                is_active: false,
            })
            .await
            .unwrap();
        let signer = TokenSigner::new(TEST_KEY, SigningAlgorithm::Hs256, 900, 7 * 24 * 3600);
        AuthService::new(std::sync::Arc::new(users), signer, audit)
    }

    async fn service() -> AuthService {
        service_with(AuditHandle::disconnected()).await
    }

    #[tokio::test]
    async fn login_issues_verifiable_token_pair() {
        let service = service().await;
        let outcome = service.login("alice", "correct-horse").await.unwrap();

        let identity = service.authenticate(&outcome.access_token).unwrap();
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.roles, vec!["finance_analyst".to_string()]);
        assert_eq!(outcome.expires_in, 900);
    }

    #[tokio::test]
    async fn unknown_user_and_bad_password_yield_identical_errors() {
        let service = service().await;
        let unknown = service.login("nobody", "x").await.unwrap_err();
        let bad_pass = service.login("alice", "wrong").await.unwrap_err();
        assert_eq!(unknown.to_string(), bad_pass.to_string());
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(bad_pass, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn inactive_accounts_cannot_login() {
        let service = service().await;
        let err = service.login("mallory", "whatever").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn refresh_preserves_the_token_snapshot() {
        let service = service().await;
        let outcome = service.login("alice", "correct-horse").await.unwrap();

        // Roles change in the store after login...
        service
            .users
            .upsert(NewUser {
                username: "alice".to_string(),
                password: "correct-horse".to_string(),
                roles: vec!["admin".to_string()],
                is_active: true,
            })
            .await
            .unwrap();

        // ...but the refreshed access token still carries the old snapshot.
        let refreshed = service.refresh(&outcome.refresh_token).await.unwrap();
        let identity = service.authenticate(&refreshed.access_token).unwrap();
        assert_eq!(identity.roles, vec!["finance_analyst".to_string()]);
    }

    #[tokio::test]
    async fn access_tokens_cannot_refresh() {
        let service = service().await;
        let outcome = service.login("alice", "correct-horse").await.unwrap();
        let err = service.refresh(&outcome.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn refresh_for_deactivated_account_is_rejected() {
        let service = service().await;
        let outcome = service.login("alice", "correct-horse").await.unwrap();
        service
            .users
            .upsert(NewUser {
                username: "alice".to_string(),
                password: "correct-horse".to_string(),
                roles: vec!["finance_analyst".to_string()],
                is_active: false,
            })
            .await
            .unwrap();
        let err = service.refresh(&outcome.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn auth_attempts_are_audited() {
        let sink = MemorySink::new();
        let bus = AuditBus::spawn(vec![Box::new(sink.clone())]);
        let service = service_with(bus.handle()).await;

        let _ = service.login("alice", "correct-horse").await;
        let _ = service.login("nobody", "x").await;

        drop(service);
        bus.shutdown().await;

        let events = sink.snapshot();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            AuditEvent::AuthAttempt { success: true, .. }
        ));
        assert!(matches!(
            &events[1],
            AuditEvent::AuthAttempt { success: false, reason: Some(reason), .. }
                if reason == "unknown_user"
        ));
    }
}
