//! Credential storage used to admit websocket connections.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub email: String,
    pub password_hash: String,
    pub websocket_token: String,
}

/// Lookup and insertion of accounts. Emails arrive already normalized.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fails with [`StoreError::DuplicateEmail`] if the email is taken.
    async fn insert(&self, account: Account) -> Result<(), StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Account>, StoreError>;
}

#[derive(Default)]
struct Tables {
    by_email: HashMap<String, Account>,
    email_by_token: HashMap<String, String>,
}

/// Process-local store. Accounts vanish when the server stops.
#[derive(Default)]
pub struct MemoryCredentialStore {
    tables: RwLock<Tables>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn insert(&self, account: Account) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.by_email.contains_key(&account.email) {
            return Err(StoreError::DuplicateEmail(account.email));
        }
        tables
            .email_by_token
            .insert(account.websocket_token.clone(), account.email.clone());
        tables.by_email.insert(account.email.clone(), account);
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.by_email.get(email).cloned())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .email_by_token
            .get(token)
            .and_then(|email| tables.by_email.get(email))
            .cloned())
    }
}
