// Session state and the logout authority consumed by the API client

use async_trait::async_trait;
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::watch;

use crate::auth::{LoginEnvelope, LoginRequest, ProfileEnvelope, UserProfile};
use crate::error::{ClientError, Result};
use crate::http_client::{decode_json, ApiClient};
use crate::request::{bearer_value, PendingRequest};

/// Whoever owns the session; the refresh protocol calls `logout` on irrecoverable failure
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    /// Clear in-memory session state and the stored credentials
    async fn logout(&self);
}

/// Late-bound reference to the session authority.
///
/// The client is constructed before the authority exists, so the slot starts empty
/// and is filled by [`ApiClient::bind_session`].
#[derive(Clone, Default)]
pub struct SessionSlot {
    inner: Arc<RwLock<Option<Weak<dyn SessionAuthority>>>>,
}

impl SessionSlot {
    pub fn bind(&self, authority: Weak<dyn SessionAuthority>) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(authority);
    }

    fn get(&self) -> Option<Arc<dyn SessionAuthority>> {
        let slot = self.inner.read().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_bound(&self) -> bool {
        self.get().is_some()
    }

    /// Log out through the bound authority. Returns false if none is bound (or it was dropped).
    pub async fn logout(&self) -> bool {
        match self.get() {
            Some(authority) => {
                authority.logout().await;
                true
            }
            None => false,
        }
    }
}

/// Process-wide session state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub is_authenticated: bool,
    pub current_user: Option<UserProfile>,
}

/// Application session: owns the API client and publishes state changes
pub struct Session {
    client: Arc<ApiClient>,
    state: watch::Sender<SessionState>,
}

impl Session {
    /// Create the session and bind it into `client`
    pub fn new(client: Arc<ApiClient>) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::default());
        let session = Arc::new(Self { client, state });

        let authority: Weak<dyn SessionAuthority> = Arc::downgrade(&session) as Weak<Session>;
        session.client.bind_session(authority);

        session
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Current state snapshot
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    /// Receive every subsequent state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_authenticated(&self, user: Option<UserProfile>) {
        self.state.send_replace(SessionState {
            is_authenticated: true,
            current_user: user,
        });
    }

    /// Sign in with email and password and store the returned token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionState> {
        tracing::info!("Signing in...");

        let request = PendingRequest::post(self.client.config().login_path.as_str())
            .json(&LoginRequest { email, password })?;
        let response = self.client.execute_anonymous(request).await?;
        let envelope: LoginEnvelope = decode_json(response).await?;

        let data = envelope.data.ok_or_else(|| {
            ClientError::Internal(anyhow::anyhow!("Login response does not contain data"))
        })?;
        let tokens = data.token.and_then(|t| t.into_pair()).ok_or_else(|| {
            ClientError::Internal(anyhow::anyhow!(
                "Login response does not contain both accessToken and refreshToken"
            ))
        })?;
        bearer_value(&tokens.access_token)?;

        if let Err(e) = self.client.store().save_tokens(&tokens).await {
            tracing::error!(error = %e, "Failed to persist tokens after login");
        }
        self.client
            .set_default_token(Some(tokens.access_token.clone()))
            .await;

        let user = match data.user {
            Some(user) => Some(user),
            None => self.fetch_profile().await.ok(),
        };

        self.set_authenticated(user);
        tracing::info!("Signed in");
        Ok(self.state())
    }

    /// Re-establish the session from stored credentials, e.g. at startup
    pub async fn restore(&self) -> Result<SessionState> {
        let Some(access_token) = self.client.store().access_token().await else {
            tracing::debug!("No stored credentials, session stays signed out");
            return Ok(self.state());
        };

        self.client.set_default_token(Some(access_token)).await;

        // May refresh transparently; a failed refresh has already logged us out.
        let user = self.fetch_profile().await?;
        self.set_authenticated(Some(user));
        tracing::info!("Session restored from stored credentials");
        Ok(self.state())
    }

    async fn fetch_profile(&self) -> Result<UserProfile> {
        let envelope: ProfileEnvelope = self
            .client
            .get_json(self.client.config().profile_path.as_str())
            .await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl SessionAuthority for Session {
    async fn logout(&self) {
        tracing::info!("Logging out");

        self.state.send_replace(SessionState::default());
        self.client.set_default_token(None).await;

        if let Err(e) = self.client.store().delete_tokens().await {
            tracing::error!(error = %e, "Failed to delete stored credentials");
        }
    }
}
