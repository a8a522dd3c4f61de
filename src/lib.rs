// Test preparation API client - authenticated HTTP client core

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod request;
pub mod session;

pub use auth::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore, TokenPair};
pub use config::ClientConfig;
pub use error::{ClientError, RefreshError, Result};
pub use http_client::{ApiClient, Transport};
pub use request::PendingRequest;
pub use session::{Session, SessionAuthority, SessionState};
