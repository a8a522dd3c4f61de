// Credential store abstraction

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::TokenPair;
use crate::error::StoreError;

/// Persists, retrieves and erases the access/refresh token pair.
///
/// Writes are atomic per call: `save_tokens` stores both tokens or neither.
/// Reads never fail; a store that cannot read logs the failure and reports `None`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Overwrite the stored pair
    async fn save_tokens(&self, tokens: &TokenPair) -> Result<(), StoreError>;

    async fn access_token(&self) -> Option<String>;

    async fn refresh_token(&self) -> Option<String>;

    /// Erase both tokens
    async fn delete_tokens(&self) -> Result<(), StoreError>;
}

/// In-process credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a pair
    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }

    /// Snapshot of the stored pair
    pub async fn tokens(&self) -> Option<TokenPair> {
        self.tokens.read().await.clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn save_tokens(&self, tokens: &TokenPair) -> Result<(), StoreError> {
        *self.tokens.write().await = Some(tokens.clone());
        Ok(())
    }

    async fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    async fn refresh_token(&self) -> Option<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.refresh_token.clone())
    }

    async fn delete_tokens(&self) -> Result<(), StoreError> {
        *self.tokens.write().await = None;
        Ok(())
    }
}
