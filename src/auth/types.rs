// Authentication types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access/refresh token pair
/// Persisted whole or not at all
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Keep tokens out of debug logs
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &token_preview(&self.access_token))
            .field("refresh_token", &token_preview(&self.refresh_token))
            .finish()
    }
}

/// Short, log-safe prefix of a token
pub fn token_preview(token: &str) -> String {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    format!("{}...", &token[..end])
}

/// Refresh endpoint request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Token object as returned by the backend
/// Both fields are optional on the wire; a pair is only accepted when both are present
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl TokenPayload {
    /// Convert into a complete pair, rejecting partial or empty payloads
    pub fn into_pair(self) -> Option<TokenPair> {
        match (self.access_token, self.refresh_token) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Some(TokenPair::new(access, refresh))
            }
            _ => None,
        }
    }
}

/// `{ "data": { "token": { ... } } }`
#[derive(Debug, Deserialize)]
pub struct RefreshEnvelope {
    pub data: Option<RefreshData>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshData {
    pub token: Option<TokenPayload>,
}

/// Login endpoint request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// `{ "data": { "token": { ... }, "user": { ... } } }`
#[derive(Debug, Deserialize)]
pub struct LoginEnvelope {
    pub data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub token: Option<TokenPayload>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Profile of the signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: serde_json::Value,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Remaining profile fields, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `{ "data": { ...profile } }`
#[derive(Debug, Deserialize)]
pub struct ProfileEnvelope {
    pub data: UserProfile,
}
