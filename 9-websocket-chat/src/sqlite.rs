use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, ffi, params};
use tracing::info;

use crate::{
    error::StoreError,
    store::{Account, CredentialStore},
};

/// Credential store backed by a single SQLite connection.
///
/// rusqlite is blocking, so every query runs on the blocking pool with the
/// connection behind a mutex.
#[derive(Clone)]
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCredentialStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened credential database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                websocket_token TEXT NOT NULL UNIQUE
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&*conn.lock())).await?
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        email: row.get(0)?,
        password_hash: row.get(1)?,
        websocket_token: row.get(2)?,
    })
}

/// Only a UNIQUE clash on `users.email` means the email is taken; any other
/// constraint failure is a store error.
fn is_duplicate_email(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, Some(message))
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                && message.contains("users.email")
    )
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn insert(&self, account: Account) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO users (email, password, websocket_token) VALUES (?1, ?2, ?3)",
                params![account.email, account.password_hash, account.websocket_token],
            );
            match result {
                Ok(_) => Ok(()),
                Err(err) if is_duplicate_email(&err) => {
                    Err(StoreError::DuplicateEmail(account.email))
                }
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let email = email.to_string();
        self.with_conn(move |conn| {
            let account = conn
                .query_row(
                    "SELECT email, password, websocket_token FROM users WHERE email = ?1",
                    params![email],
                    account_from_row,
                )
                .optional()?;
            Ok(account)
        })
        .await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Account>, StoreError> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            let account = conn
                .query_row(
                    "SELECT email, password, websocket_token FROM users WHERE websocket_token = ?1",
                    params![token],
                    account_from_row,
                )
                .optional()?;
            Ok(account)
        })
        .await
    }
}
