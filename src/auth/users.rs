//! SQLite-backed user store.
//!
//! One table, read at login time only:
//!
//! ```sql
//! CREATE TABLE users (
//!     username      TEXT PRIMARY KEY,
//!     password_hash TEXT NOT NULL,
//!     roles         TEXT NOT NULL,   -- JSON array of role names
//!     is_active     INTEGER NOT NULL DEFAULT 1
//! );
//! ```
//!
//! Username lookup is exact and case-sensitive; the primary key equality
//! query is the only lookup path, so there is no lowercase fallback to drift
//! out of sync with it.

use async_trait::async_trait;
use tokio_rusqlite::{Connection, OptionalExtension};

use super::{AuthError, password};

/// A user row as stored.
#[derive(Clone, Debug, PartialEq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub is_active: bool,
}

/// Provisioning input; the plaintext password is hashed before storage.
/// Deserializable so seed files can provision users at startup.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub roles: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Storage seam for user records.
///
/// The auth service only needs three operations, so anything from a SQLite
/// file to a directory server can stand behind this trait.
#[async_trait]
pub trait UserBackend: Send + Sync {
    /// Fetch a user by exact, case-sensitive username.
    async fn fetch(&self, username: &str) -> Result<Option<UserRecord>, AuthError>;

    /// Insert or replace a user, hashing the supplied password.
    async fn upsert(&self, user: NewUser) -> Result<(), AuthError>;

    /// Number of provisioned users.
    async fn count(&self) -> Result<usize, AuthError>;
}

/// Async handle over the SQLite users table.
#[derive(Clone)]
pub struct UserStore {
    conn: Connection,
}

impl UserStore {
    /// Open (and initialize) the store at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the database cannot be opened or
    /// migrated.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self, AuthError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(path)
            .await
            .map_err(|err| AuthError::Storage { message: err.to_string() })?;
        Self::init(&conn).await?;
        Ok(Self { conn })
    }

    /// Open an in-memory store; used by tests and local development.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] on initialization failure.
    pub async fn open_in_memory() -> Result<Self, AuthError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| AuthError::Storage { message: err.to_string() })?;
        Self::init(&conn).await?;
        Ok(Self { conn })
    }

    async fn init(conn: &Connection) -> Result<(), AuthError> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS users (
                     username      TEXT PRIMARY KEY,
                     password_hash TEXT NOT NULL,
                     roles         TEXT NOT NULL,
                     is_active     INTEGER NOT NULL DEFAULT 1
                 )",
                [],
            )?;
            Ok(())
        })
        .await
        .map_err(storage_error)
    }
}

#[async_trait]
impl UserBackend for UserStore {
    async fn upsert(&self, user: NewUser) -> Result<(), AuthError> {
        let password_hash = password::hash_password(&user.password)?;
        let roles_json = serde_json::to_string(&user.roles).map_err(|err| AuthError::Storage {
            message: err.to_string(),
        })?;
        let username = user.username;
        let is_active = i64::from(user.is_active);

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO users (username, password_hash, roles, is_active)
                     VALUES (?1, ?2, ?3, ?4)",
                    (username, password_hash, roles_json, is_active),
                )?;
                Ok(())
            })
            .await
            .map_err(storage_error)
    }

    async fn fetch(&self, username: &str) -> Result<Option<UserRecord>, AuthError> {
        let username = username.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT username, password_hash, roles, is_active
                         FROM users WHERE username = ?1",
                    )?;
                let row = stmt
                    .query_row([&username], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    })
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(storage_error)?;

        let Some((username, password_hash, roles_json, is_active)) = row else {
            return Ok(None);
        };

        let roles: Vec<String> =
            serde_json::from_str(&roles_json).map_err(|err| AuthError::Storage {
                message: format!("corrupt roles column for '{username}': {err}"),
            })?;

        Ok(Some(UserRecord {
            username,
            password_hash,
            roles,
            is_active: is_active != 0,
        }))
    }

    async fn count(&self) -> Result<usize, AuthError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(storage_error)
    }
}

fn storage_error(err: tokio_rusqlite::Error) -> AuthError {
    AuthError::Storage {
        message: err.to_string(),
    }
}
