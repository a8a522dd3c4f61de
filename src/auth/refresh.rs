// Token refresh logic

use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Request, Url};
use std::time::Duration;

use super::types::{RefreshEnvelope, RefreshRequest, TokenPair};
use crate::error::RefreshError;
use crate::http_client::Transport;
use crate::request::bearer_value;

/// Exchange a refresh token for a new token pair.
///
/// Any non-2xx answer, transport failure or payload without both tokens is a
/// refresh failure.
pub async fn refresh_tokens(
    transport: &dyn Transport,
    refresh_url: &Url,
    refresh_token: &str,
    timeout: Duration,
) -> Result<TokenPair, RefreshError> {
    tracing::info!(url = %refresh_url, "Refreshing access token...");

    let body = serde_json::to_vec(&RefreshRequest { refresh_token })
        .map_err(|e| RefreshError::MalformedPayload(format!("failed to encode request: {}", e)))?;

    let mut request = Request::new(Method::POST, refresh_url.clone());
    request
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    request
        .headers_mut()
        .insert(ACCEPT, HeaderValue::from_static("application/json"));
    *request.body_mut() = Some(body.into());
    *request.timeout_mut() = Some(timeout);

    let response = transport.send(request).await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "Token refresh rejected"
        );
        return Err(RefreshError::Rejected {
            status: status.as_u16(),
            message: error_text,
        });
    }

    let bytes = response.bytes().await?;
    parse_refresh_response(&bytes)
}

/// Extract the token pair from `{ "data": { "token": { accessToken, refreshToken } } }`
pub fn parse_refresh_response(body: &[u8]) -> Result<TokenPair, RefreshError> {
    let envelope: RefreshEnvelope = serde_json::from_slice(body)
        .map_err(|e| RefreshError::MalformedPayload(format!("invalid JSON: {}", e)))?;

    let pair = envelope
        .data
        .and_then(|data| data.token)
        .and_then(|token| token.into_pair())
        .ok_or_else(|| {
            RefreshError::MalformedPayload(
                "response does not contain both accessToken and refreshToken".to_string(),
            )
        })?;

    if bearer_value(&pair.access_token).is_err() {
        return Err(RefreshError::MalformedPayload(
            "accessToken is not a valid header value".to_string(),
        ));
    }

    tracing::info!("Token pair refreshed");
    Ok(pair)
}
