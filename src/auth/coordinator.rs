// Authorization failure recovery: refresh the token pair once and replay

use reqwest::Response;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::refresh;
use super::store::CredentialStore;
use super::types::token_preview;
use crate::error::{ClientError, Result};
use crate::http_client::{Dispatcher, SharedToken};
use crate::request::PendingRequest;
use crate::session::SessionSlot;

/// Post-receive hook of the API client.
///
/// Every response passes through [`RefreshCoordinator::handle_response`]. A 401 on a
/// request whose retry marker is unset triggers one refresh-and-replay cycle; all other
/// outcomes pass through untouched.
pub struct RefreshCoordinator {
    store: Arc<dyn CredentialStore>,
    dispatcher: Arc<Dispatcher>,
    session: SessionSlot,
    default_token: SharedToken,
    refresh_url: Url,
    refresh_timeout: Duration,
    coalesce: bool,
    refresh_lock: Mutex<()>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        dispatcher: Arc<Dispatcher>,
        session: SessionSlot,
        default_token: SharedToken,
        refresh_url: Url,
        refresh_timeout: Duration,
        coalesce: bool,
    ) -> Self {
        Self {
            store,
            dispatcher,
            session,
            default_token,
            refresh_url,
            refresh_timeout,
            coalesce,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Inspect the outcome of `request` and recover from a first authorization failure
    pub async fn handle_response(
        &self,
        request: PendingRequest,
        outcome: Result<Response>,
    ) -> Result<Response> {
        match outcome {
            Err(err) if err.is_unauthorized() => self.recover(request, err).await,
            other => other,
        }
    }

    async fn recover(&self, request: PendingRequest, original: ClientError) -> Result<Response> {
        if request.is_retried() {
            tracing::warn!(
                request_id = %request.id(),
                url = %request.url,
                "Authorization denied after refresh, giving up"
            );
            return Err(original);
        }

        let mut request = request.mark_retried();
        tracing::info!(
            request_id = %request.id(),
            url = %request.url,
            "Received 401, refreshing token and replaying"
        );

        let access_token = {
            let _guard = if self.coalesce {
                Some(self.refresh_lock.lock().await)
            } else {
                None
            };

            // A waiter that finds the store already emptied by a failed refresh takes
            // the no-refresh-token branch: second logout, original 401 returned.
            match self.rotated_token(&request).await {
                Some(token) => token,
                None => self.refresh(original).await?,
            }
        };

        request.set_bearer(&access_token)?;
        tracing::debug!(request_id = %request.id(), "Replaying request with refreshed token");

        // The replay is final: its outcome is not inspected for another refresh.
        self.dispatcher.dispatch(&request, true).await
    }

    /// With coalescing, a stored token different from the one this request carried
    /// means another request already rotated the pair.
    async fn rotated_token(&self, request: &PendingRequest) -> Option<String> {
        if !self.coalesce {
            return None;
        }

        let stored = self.store.access_token().await?;
        if request.bearer() == Some(stored.as_str()) {
            return None;
        }

        tracing::debug!(
            request_id = %request.id(),
            token_preview = %token_preview(&stored),
            "Token already rotated by a concurrent refresh"
        );
        Some(stored)
    }

    /// Exchange the stored refresh token; tears the session down on any failure
    async fn refresh(&self, original: ClientError) -> Result<String> {
        let Some(refresh_token) = self.store.refresh_token().await else {
            tracing::warn!("No refresh token stored, logging out");
            self.teardown().await;
            return Err(original);
        };

        let tokens = match refresh::refresh_tokens(
            self.dispatcher.transport(),
            &self.refresh_url,
            &refresh_token,
            self.refresh_timeout,
        )
        .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::error!(error = %e, "Token refresh failed, logging out");
                self.teardown().await;
                return Err(ClientError::Refresh(e));
            }
        };

        if let Err(e) = self.store.save_tokens(&tokens).await {
            tracing::error!(error = %e, "Failed to persist refreshed tokens");
        }

        *self.default_token.write().await = Some(tokens.access_token.clone());

        tracing::info!(
            token_preview = %token_preview(&tokens.access_token),
            "Access token refreshed"
        );

        Ok(tokens.access_token)
    }

    async fn teardown(&self) {
        if !self.session.logout().await {
            tracing::warn!("No session bound to the client, clearing stored credentials directly");
            if let Err(e) = self.store.delete_tokens().await {
                tracing::error!(error = %e, "Failed to delete stored credentials");
            }
        }
        *self.default_token.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryCredentialStore, TokenPair};
    use crate::session::SessionAuthority;
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;
    use tokio::sync::RwLock;

    struct Fixture {
        coordinator: RefreshCoordinator,
        store: Arc<MemoryCredentialStore>,
        session: SessionSlot,
        default_token: SharedToken,
    }

    fn fixture(store: MemoryCredentialStore, coalesce: bool) -> Fixture {
        let store = Arc::new(store);
        let default_token: SharedToken = Arc::new(RwLock::new(Some("A1".to_string())));
        let base_url = Url::parse("https://api.example.com/").unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(reqwest::Client::new()),
            base_url.clone(),
            HeaderMap::new(),
            default_token.clone(),
        ));
        let session = SessionSlot::default();
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            dispatcher,
            session.clone(),
            default_token.clone(),
            base_url.join("api/v1/auth/refresh-token").unwrap(),
            Duration::from_secs(1),
            coalesce,
        );

        Fixture {
            coordinator,
            store,
            session,
            default_token,
        }
    }

    fn bearing(token: &str) -> PendingRequest {
        let mut request = PendingRequest::get("/orders");
        request.set_bearer(token).unwrap();
        request
    }

    #[derive(Default)]
    struct CountingAuthority {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SessionAuthority for CountingAuthority {
        async fn logout(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_rotated_token_ignored_without_coalescing() {
        let f = fixture(MemoryCredentialStore::with_tokens(TokenPair::new("A2", "R2")), false);
        assert!(f.coordinator.rotated_token(&bearing("A1")).await.is_none());
    }

    #[tokio::test]
    async fn test_rotated_token_same_bearer_needs_refresh() {
        let f = fixture(MemoryCredentialStore::with_tokens(TokenPair::new("A1", "R1")), true);
        assert!(f.coordinator.rotated_token(&bearing("A1")).await.is_none());
    }

    #[tokio::test]
    async fn test_rotated_token_different_bearer_reuses_stored() {
        let f = fixture(MemoryCredentialStore::with_tokens(TokenPair::new("A2", "R2")), true);
        assert_eq!(
            f.coordinator.rotated_token(&bearing("A1")).await.as_deref(),
            Some("A2")
        );
    }

    #[tokio::test]
    async fn test_rotated_token_empty_store() {
        let f = fixture(MemoryCredentialStore::new(), true);
        assert!(f.coordinator.rotated_token(&bearing("A1")).await.is_none());
    }

    #[tokio::test]
    async fn test_teardown_without_session_clears_store() {
        let f = fixture(MemoryCredentialStore::with_tokens(TokenPair::new("A1", "R1")), false);
        f.coordinator.teardown().await;

        assert!(f.store.tokens().await.is_none());
        assert!(f.default_token.read().await.is_none());
    }

    #[tokio::test]
    async fn test_teardown_delegates_to_bound_session() {
        let f = fixture(MemoryCredentialStore::with_tokens(TokenPair::new("A1", "R1")), false);
        let authority = Arc::new(CountingAuthority::default());
        let weak: Weak<dyn SessionAuthority> =
            Arc::downgrade(&authority) as Weak<CountingAuthority>;
        f.session.bind(weak);

        f.coordinator.teardown().await;

        assert_eq!(authority.calls.load(Ordering::SeqCst), 1);
        // The authority owns credential deletion
        assert_eq!(f.store.tokens().await, Some(TokenPair::new("A1", "R1")));
        assert!(f.default_token.read().await.is_none());
    }

    #[tokio::test]
    async fn test_retried_request_returns_original_error() {
        let f = fixture(MemoryCredentialStore::with_tokens(TokenPair::new("A1", "R1")), false);
        let outcome = Err(ClientError::Unauthorized {
            message: "jwt expired".into(),
        });

        let err = f
            .coordinator
            .handle_response(bearing("A1").mark_retried(), outcome)
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(f.store.tokens().await, Some(TokenPair::new("A1", "R1")));
        assert_eq!(f.default_token.read().await.as_deref(), Some("A1"));
    }
}
