use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Request, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::auth::{CredentialStore, RefreshCoordinator, RequestAuthenticator};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::request::{bearer_value, PendingRequest};
use crate::session::{SessionAuthority, SessionSlot};

/// Default `Authorization` token shared by every request built by one client
pub type SharedToken = Arc<RwLock<Option<String>>>;

/// Sends a fully built request and returns whatever the network produced
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> reqwest::Result<Response>;
}

#[async_trait]
impl Transport for Client {
    async fn send(&self, request: Request) -> reqwest::Result<Response> {
        self.execute(request).await
    }
}

/// Builds wire requests from [`PendingRequest`]s and sends them through the transport
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    base_url: Url,
    default_headers: HeaderMap,
    default_token: SharedToken,
}

impl Dispatcher {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        base_url: Url,
        default_headers: HeaderMap,
        default_token: SharedToken,
    ) -> Self {
        Self {
            transport,
            base_url,
            default_headers,
            default_token,
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Resolve a path against the base URL; absolute URLs are used as is
    pub fn resolve(&self, url: &str) -> Result<Url> {
        let resolved = if url.starts_with("http://") || url.starts_with("https://") {
            Url::parse(url)
        } else {
            self.base_url.join(url.trim_start_matches('/'))
        };
        resolved.map_err(|e| ClientError::InvalidRequest(format!("invalid URL {}: {}", url, e)))
    }

    /// Defaults first, then the request's own headers, which win on conflict
    async fn build(&self, pending: &PendingRequest, default_auth: bool) -> Result<Request> {
        let url = self.resolve(&pending.url)?;
        let mut request = Request::new(pending.method.clone(), url);

        let headers = request.headers_mut();
        headers.extend(self.default_headers.clone());

        if default_auth {
            if let Some(token) = self.default_token.read().await.as_deref() {
                headers.insert(AUTHORIZATION, bearer_value(token)?);
            }
        }

        for name in pending.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in pending.headers.iter() {
            headers.append(name.clone(), value.clone());
        }

        if let Some(body) = &pending.body {
            *request.body_mut() = Some(body.clone().into());
        }

        Ok(request)
    }

    /// Send `pending` and map non-2xx statuses to errors
    pub async fn dispatch(&self, pending: &PendingRequest, default_auth: bool) -> Result<Response> {
        let request = self.build(pending, default_auth).await?;
        let url = request.url().clone();

        tracing::debug!(
            request_id = %pending.id(),
            method = %pending.method,
            url = %url,
            retried = pending.is_retried(),
            "Sending HTTP request"
        );

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                // Categorize the error for better debugging
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else if e.is_request() {
                    "request_error"
                } else if e.is_body() {
                    "body_error"
                } else if e.is_decode() {
                    "decode_error"
                } else {
                    "unknown"
                };

                tracing::warn!(
                    request_id = %pending.id(),
                    error_kind = error_kind,
                    error = %e,
                    url = %url,
                    "HTTP request error"
                );
                return Err(ClientError::Transport(e));
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::debug!(request_id = %pending.id(), status = %status, "Request successful");
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        tracing::warn!(
            request_id = %pending.id(),
            status = status.as_u16(),
            url = %url,
            response_body = %error_text,
            "Received error response"
        );

        if status == StatusCode::UNAUTHORIZED {
            Err(ClientError::Unauthorized {
                message: error_text,
            })
        } else {
            Err(ClientError::Status {
                status: status.as_u16(),
                message: error_text,
            })
        }
    }
}

/// The client application code talks to.
///
/// Every request runs authenticate -> send -> handle-response in sequence; a first 401
/// is recovered by refreshing the token pair and replaying the request once.
pub struct ApiClient {
    config: ClientConfig,
    store: Arc<dyn CredentialStore>,
    authenticator: RequestAuthenticator,
    coordinator: RefreshCoordinator,
    dispatcher: Arc<Dispatcher>,
    session: SessionSlot,
    default_token: SharedToken,
}

impl ApiClient {
    /// Create a client with a pooled reqwest transport
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.max_idle_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| {
                ClientError::Internal(anyhow::anyhow!("Failed to create HTTP client: {}", e))
            })?;

        Self::with_transport(config, store, Arc::new(client))
    }

    /// Create a client around an existing transport
    pub fn with_transport(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let base_url = config.parsed_base_url()?;

        let mut default_headers = HeaderMap::new();
        let content_type = HeaderValue::from_str(&config.content_type).map_err(|_| {
            ClientError::InvalidRequest(format!("invalid content type: {}", config.content_type))
        })?;
        default_headers.insert(CONTENT_TYPE, content_type);
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let default_token: SharedToken = Arc::new(RwLock::new(None));
        let session = SessionSlot::default();

        let dispatcher = Arc::new(Dispatcher::new(
            transport,
            base_url,
            default_headers,
            default_token.clone(),
        ));

        let refresh_url = dispatcher.resolve(&config.refresh_path)?;
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            dispatcher.clone(),
            session.clone(),
            default_token.clone(),
            refresh_url,
            Duration::from_secs(config.refresh_timeout),
            config.coalesce_refresh,
        );

        tracing::debug!(
            base_url = %dispatcher.base_url,
            coalesce_refresh = config.coalesce_refresh,
            "API client initialized"
        );

        Ok(Self {
            authenticator: RequestAuthenticator::new(store.clone()),
            config,
            store,
            coordinator,
            dispatcher,
            session,
            default_token,
        })
    }

    /// Second construction phase: wire in the session authority once it exists.
    /// Only a weak reference is kept; the authority owns the client, not the reverse.
    pub fn bind_session(&self, authority: Weak<dyn SessionAuthority>) {
        self.session.bind(authority);
    }

    pub fn is_session_bound(&self) -> bool {
        self.session.is_bound()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Token attached by default to requests built by this client
    pub async fn default_token(&self) -> Option<String> {
        self.default_token.read().await.clone()
    }

    pub async fn set_default_token(&self, token: Option<String>) {
        *self.default_token.write().await = token;
    }

    /// Execute a request through the full authenticate -> send -> refresh pipeline
    pub async fn execute(&self, mut request: PendingRequest) -> Result<Response> {
        self.authenticator.authenticate(&mut request).await?;
        let outcome = self.dispatcher.dispatch(&request, true).await;
        self.coordinator.handle_response(request, outcome).await
    }

    /// Execute without credentials and without refresh handling (login, public endpoints)
    pub async fn execute_anonymous(&self, request: PendingRequest) -> Result<Response> {
        self.dispatcher.dispatch(&request, false).await
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.execute(PendingRequest::get(path)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.execute(PendingRequest::delete(path)).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.execute(PendingRequest::post(path).json(body)?).await
    }

    pub async fn put_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.execute(PendingRequest::put(path).json(body)?).await
    }

    /// GET and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(PendingRequest::get(path)).await
    }

    /// Execute and decode the JSON body
    pub async fn send_json<T: DeserializeOwned>(&self, request: PendingRequest) -> Result<T> {
        let response = self.execute(request).await?;
        decode_json(response).await
    }
}

/// Decode a successful response body as JSON
pub async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryCredentialStore, TokenPair};

    fn client(base_url: &str) -> ApiClient {
        let store = Arc::new(MemoryCredentialStore::with_tokens(TokenPair::new("A1", "R1")));
        ApiClient::new(ClientConfig::new(base_url), store).unwrap()
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let client = client("https://api.example.com/v2");
        assert_eq!(
            client.dispatcher.resolve("/orders").unwrap().as_str(),
            "https://api.example.com/v2/orders"
        );
        assert_eq!(
            client.dispatcher.resolve("orders?page=2").unwrap().as_str(),
            "https://api.example.com/v2/orders?page=2"
        );
        assert_eq!(
            client
                .dispatcher
                .resolve("https://cdn.example.com/audio.mp3")
                .unwrap()
                .as_str(),
            "https://cdn.example.com/audio.mp3"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let store = Arc::new(MemoryCredentialStore::new());
        assert!(ApiClient::new(ClientConfig::new("::nope::"), store).is_err());
    }

    #[tokio::test]
    async fn test_build_applies_defaults_then_explicit_headers() {
        let client = client("https://api.example.com");
        client.set_default_token(Some("D1".into())).await;

        let request = client
            .dispatcher
            .build(&PendingRequest::get("/orders"), true)
            .await
            .unwrap();
        assert_eq!(request.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(request.headers().get(AUTHORIZATION).unwrap(), "Bearer D1");

        let mut pending = PendingRequest::post("/upload")
            .header(CONTENT_TYPE, "multipart/form-data")
            .unwrap();
        pending.set_bearer("E1").unwrap();
        let request = client.dispatcher.build(&pending, true).await.unwrap();
        assert_eq!(request.headers().get(CONTENT_TYPE).unwrap(), "multipart/form-data");
        assert_eq!(request.headers().get(AUTHORIZATION).unwrap(), "Bearer E1");
        assert_eq!(request.headers().get_all(CONTENT_TYPE).iter().count(), 1);
    }

    #[tokio::test]
    async fn test_build_anonymous_skips_default_token() {
        let client = client("https://api.example.com");
        client.set_default_token(Some("D1".into())).await;

        let request = client
            .dispatcher
            .build(&PendingRequest::post("/api/v1/auth/login"), false)
            .await
            .unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_new_client_has_no_session() {
        let client = client("https://api.example.com");
        assert!(!client.is_session_bound());
    }
}
