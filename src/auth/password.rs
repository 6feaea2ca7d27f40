//! Password hashing and verification.
//!
//! bcrypt with the crate's default cost. Verification failures of any kind
//! (wrong password, malformed hash) collapse to `false`; the caller maps
//! everything to one uniform credential error.

use bcrypt::{DEFAULT_COST, hash, verify};
use std::sync::LazyLock;

use super::AuthError;

/// A throwaway hash used to keep unknown-username logins as slow as
/// known-username ones.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash("corpusgate.timing.dummy", DEFAULT_COST).unwrap_or_default());

/// Hash a plaintext password for storage.
///
/// # Errors
///
/// Returns [`AuthError::PasswordHash`] if bcrypt fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    hash(password, DEFAULT_COST).map_err(|err| AuthError::PasswordHash {
        message: err.to_string(),
    })
}

/// Verify a plaintext password against a stored hash.
#[must_use]
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    verify(password, password_hash).unwrap_or(false)
}

/// Spend one bcrypt verification on a dummy hash. Called on the
/// unknown-username path so response timing does not reveal whether the
/// account exists.
pub fn burn_verification(password: &str) {
    let _ = verify(password, &DUMMY_HASH);
}
