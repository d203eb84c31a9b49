use std::path::Path;

use async_trait::async_trait;
use greenhouse_common::{Error, Result, User};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::connection::SharedConnection;
use crate::migrations::USERS_SCHEMA_V1;

/// Lookup and provisioning of operator accounts. Stores password hashes
/// only; hashing and verification happen in the caller.
#[async_trait]
pub trait UserSource: Send + Sync {
    async fn user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Create the user, or replace the password hash of an existing one.
    async fn upsert_user(&self, username: &str, password_hash: &str) -> Result<User>;
}

/// SQLite-backed [`UserSource`].
pub struct UserStore {
    conn: SharedConnection,
}

impl UserStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::with_connection(SharedConnection::open(db_path, "user store")?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(SharedConnection::in_memory("user store")?)
    }

    fn with_connection(conn: SharedConnection) -> Result<Self> {
        conn.migrate(USERS_SCHEMA_V1.sql)?;
        Ok(Self { conn })
    }
}

fn load_user(conn: &Connection, username: &str) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, username, password_hash FROM users WHERE username = ?1",
        params![username],
        |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                password_hash: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to query user: {e}")))
}

#[async_trait]
impl UserSource for UserStore {
    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let username = username.to_string();
        self.conn.run(move |conn| load_user(conn, &username)).await
    }

    async fn upsert_user(&self, username: &str, password_hash: &str) -> Result<User> {
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(Error::Validation("username must not be empty".into()));
        }
        let password_hash = password_hash.to_string();

        let user = self
            .conn
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO users (username, password_hash) VALUES (?1, ?2)
                     ON CONFLICT(username) DO UPDATE SET password_hash = excluded.password_hash",
                    params![username, password_hash],
                )
                .map_err(|e| Error::Database(format!("failed to upsert user: {e}")))?;
                load_user(conn, &username)?
                    .ok_or_else(|| Error::Database("user row missing after upsert".into()))
            })
            .await?;

        info!(user_id = user.id, username = %user.username, "user saved");
        Ok(user)
    }
}
