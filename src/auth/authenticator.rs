// Bearer credential injection

use std::sync::Arc;

use super::store::CredentialStore;
use super::types::token_preview;
use crate::error::Result;
use crate::request::PendingRequest;

/// Attaches the stored access token to outbound requests
#[derive(Clone)]
pub struct RequestAuthenticator {
    store: Arc<dyn CredentialStore>,
}

impl RequestAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Set `Authorization: Bearer <token>` from the credential store.
    /// Without a stored token the request is left untouched.
    pub async fn authenticate(&self, request: &mut PendingRequest) -> Result<()> {
        match self.store.access_token().await {
            Some(token) => {
                tracing::trace!(
                    request_id = %request.id(),
                    token_preview = %token_preview(&token),
                    "Attaching stored access token"
                );
                request.set_bearer(&token)
            }
            None => {
                tracing::trace!(request_id = %request.id(), "No stored access token");
                Ok(())
            }
        }
    }
}
