// Authentication module
// Credential storage, bearer injection and the refresh-and-replay protocol

mod authenticator;
mod coordinator;
mod refresh;
mod sqlite;
mod store;
mod types;

pub use authenticator::RequestAuthenticator;
pub use coordinator::RefreshCoordinator;
pub use refresh::{parse_refresh_response, refresh_tokens};
pub use sqlite::SqliteCredentialStore;
pub use store::{CredentialStore, MemoryCredentialStore};
pub use types::{token_preview, TokenPair, UserProfile};

pub(crate) use types::{LoginEnvelope, LoginRequest, ProfileEnvelope};
