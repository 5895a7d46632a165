use std::{ops::RangeInclusive, sync::Arc};

use tracing::info;
use uuid::Uuid;

use crate::{
    error::ApiError,
    store::{Account, CredentialStore},
};

const PASSWORD_LENGTH: RangeInclusive<usize> = 4..=64;

/// Account creation, password login and token resolution on top of a
/// [`CredentialStore`].
#[derive(Clone)]
pub struct Accounts {
    store: Arc<dyn CredentialStore>,
    bcrypt_cost: u32,
}

impl Accounts {
    pub fn new(store: Arc<dyn CredentialStore>, bcrypt_cost: u32) -> Self {
        Self { store, bcrypt_cost }
    }

    /// Creates an account and returns its freshly issued websocket token.
    pub async fn register(&self, email: &str, password: &str) -> Result<String, ApiError> {
        let email = normalize_email(email)?;
        validate_password(password)?;

        if self.store.find_by_email(&email).await?.is_some() {
            return Err(ApiError::EmailTaken);
        }

        let password = password.to_string();
        let cost = self.bcrypt_cost;
        let password_hash =
            tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
        let websocket_token = Uuid::new_v4().to_string();

        self.store
            .insert(Account {
                email: email.clone(),
                password_hash,
                websocket_token: websocket_token.clone(),
            })
            .await?;

        info!(%email, "account created");
        Ok(websocket_token)
    }

    /// Checks a password and hands back the account's websocket token.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let email = username.trim().to_lowercase();
        let account = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or(ApiError::UserNotFound)?;

        let password = password.to_string();
        let hash = account.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
        if !matches {
            return Err(ApiError::IncorrectPassword);
        }

        Ok(account.websocket_token)
    }

    pub async fn resolve_token(&self, token: &str) -> Result<Option<Account>, ApiError> {
        Ok(self.store.find_by_token(token).await?)
    }
}

/// Trims and lowercases an address after a structural sanity check.
pub fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    let invalid = || ApiError::Validation(format!("'{}' is not a valid email address", raw.trim()));

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(invalid());
    };
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err(invalid());
    }

    Ok(email)
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    let length = password.chars().count();
    if PASSWORD_LENGTH.contains(&length) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "password must be between {} and {} characters",
            PASSWORD_LENGTH.start(),
            PASSWORD_LENGTH.end()
        )))
    }
}
