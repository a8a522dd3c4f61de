// Outbound request description threaded through authenticate -> send -> handle

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ClientError, Result};

/// A logical request made through the API client.
///
/// `retried` is the one-shot retry marker: once set, an authorization failure
/// for this request is final and never triggers another refresh.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    id: Uuid,
    pub method: Method,
    /// Path relative to the client's base URL, or an absolute URL
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    retried: bool,
}

impl PendingRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Identifier used in logs to correlate the original send with its replay
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Add or replace a header
    pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        let value = HeaderValue::from_str(value).map_err(|e| {
            ClientError::InvalidRequest(format!("invalid value for {}: {}", name, e))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| ClientError::InvalidRequest(format!("failed to encode body: {}", e)))?;
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Set the retry marker; the request may still be replayed once but never refreshed again
    pub fn mark_retried(mut self) -> Self {
        self.retried = true;
        self
    }

    /// Replace the Authorization header with a bearer credential
    pub fn set_bearer(&mut self, token: &str) -> Result<()> {
        let value = bearer_value(token)?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Bearer token currently carried by the request, if any
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// `Bearer <token>` header value; marked sensitive so it is redacted from debug output
pub fn bearer_value(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        ClientError::InvalidRequest("access token is not a valid header value".into())
    })?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::CONTENT_TYPE;

    #[test]
    fn test_new_request_is_not_retried() {
        let req = PendingRequest::get("/orders");
        assert!(!req.is_retried());
        assert_eq!(req.method, Method::GET);
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
    }

    #[test]
    fn test_mark_retried_keeps_identity() {
        let req = PendingRequest::get("/orders");
        let id = req.id();
        let req = req.mark_retried();
        assert!(req.is_retried());
        assert_eq!(req.id(), id);
    }

    #[test]
    fn test_set_bearer_overwrites() {
        let mut req = PendingRequest::get("/orders");
        req.set_bearer("A1").unwrap();
        req.set_bearer("A2").unwrap();
        assert_eq!(req.headers.get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(req.bearer(), Some("A2"));
    }

    #[test]
    fn test_set_bearer_rejects_control_characters() {
        let mut req = PendingRequest::get("/orders");
        assert!(req.set_bearer("bad\ntoken").is_err());
        assert!(req.bearer().is_none());
    }

    #[test]
    fn test_json_body() {
        let req = PendingRequest::post("/answers")
            .json(&serde_json::json!({ "questionId": 3 }))
            .unwrap();
        assert_eq!(req.body.as_deref(), Some(br#"{"questionId":3}"#.as_slice()));
    }

    #[test]
    fn test_header_builder() {
        let req = PendingRequest::get("/orders")
            .header(CONTENT_TYPE, "text/plain")
            .unwrap();
        assert_eq!(req.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
    }
}
