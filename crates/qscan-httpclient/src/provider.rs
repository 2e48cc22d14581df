//! Vendor boundary for the cached HTTP client.
//!
//! This module defines only the request/response shapes and the provider
//! trait; no concrete vendor wiring, no caching, no retry logic belongs
//! here — those live in [`crate::client`].

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// An HTTP verb the client supports. GET is the only cacheable method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn is_cacheable(self) -> bool {
        matches!(self, Method::Get)
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub priority: i32,
}

impl FetchRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
            priority: 50,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Errors a [`Provider`] implementation may return.
#[derive(Debug)]
pub enum ProviderError {
    Transport(String),
    Api { status: u16, message: String },
    Decode(String),
    Config(String),
}

impl ProviderError {
    /// 5xx and transport failures are retryable; 4xx is not (S4.3).
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::Decode(_) | ProviderError::Config(_) => false,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transport(msg) => write!(f, "transport error: {msg}"),
            ProviderError::Api { status, message } => {
                write!(f, "provider api error status={status}: {message}")
            }
            ProviderError::Decode(msg) => write!(f, "decode error: {msg}"),
            ProviderError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Upstream vendor contract. Implementations must be object-safe so
/// callers can hold a `Box<dyn Provider>` without knowing the concrete
/// type, and `Send + Sync` so they can cross async task boundaries.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, req: &FetchRequest) -> Result<Value, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockProvider {
        response: Value,
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn fetch(&self, _req: &FetchRequest) -> Result<Value, ProviderError> {
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn mock_provider_returns_configured_response() {
        let provider: Box<dyn Provider> = Box::new(MockProvider {
            response: serde_json::json!({"ok": true}),
        });
        let req = FetchRequest::get("/v1/fundamentals/AAPL");
        let result = provider.fetch(&req).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    #[test]
    fn api_5xx_is_retryable_4xx_is_not() {
        let server_err = ProviderError::Api {
            status: 503,
            message: "unavailable".into(),
        };
        let client_err = ProviderError::Api {
            status: 404,
            message: "not found".into(),
        };
        assert!(server_err.is_retryable());
        assert!(!client_err.is_retryable());
    }

    #[test]
    fn transport_error_is_retryable() {
        assert!(ProviderError::Transport("reset".into()).is_retryable());
    }

    #[test]
    fn get_is_cacheable_others_are_not() {
        assert!(Method::Get.is_cacheable());
        assert!(!Method::Post.is_cacheable());
        assert!(!Method::Delete.is_cacheable());
    }
}
