//! Environment-variable seeding for connection strings and vendor
//! credentials (S6). This is the single source of truth for runtime secret
//! resolution — callers invoke [`EnvSecrets::resolve`] once at startup and
//! thread the result through constructors; `std::env::var` calls are not
//! scattered across the codebase. Missing required variables fail fast
//! (CONFIG error) instead of surfacing lazily at first use.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvSecretsError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
}

/// Secrets resolved from the environment. `Debug` redacts every value so
/// logs and panics never leak a credential.
#[derive(Clone)]
pub struct EnvSecrets {
    pub database_url: String,
    pub vendor_api_key: Option<String>,
    pub vendor_base_url: Option<String>,
}

impl std::fmt::Debug for EnvSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvSecrets")
            .field("database_url", &"<REDACTED>")
            .field("vendor_api_key", &self.vendor_api_key.as_ref().map(|_| "<REDACTED>"))
            .field("vendor_base_url", &self.vendor_base_url)
            .finish()
    }
}

impl EnvSecrets {
    /// `MQS_DATABASE_URL` is required; vendor credentials are optional at
    /// this layer (the HTTP client fails per-request if a vendor call is
    /// attempted without them — see qscan-httpclient).
    pub fn resolve() -> Result<Self, EnvSecretsError> {
        let database_url = std::env::var("MQS_DATABASE_URL")
            .map_err(|_| EnvSecretsError::Missing("MQS_DATABASE_URL"))?;
        Ok(Self {
            database_url,
            vendor_api_key: std::env::var("MQS_VENDOR_API_KEY").ok(),
            vendor_base_url: std::env::var("MQS_VENDOR_BASE_URL").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_var_is_an_error() {
        std::env::remove_var("MQS_DATABASE_URL");
        let err = EnvSecrets::resolve().unwrap_err();
        assert!(matches!(err, EnvSecretsError::Missing("MQS_DATABASE_URL")));
    }

    #[test]
    fn debug_redacts_values() {
        let secrets = EnvSecrets {
            database_url: "postgres://user:pw@host/db".to_string(),
            vendor_api_key: Some("sk-secret".to_string()),
            vendor_base_url: Some("https://vendor.example".to_string()),
        };
        let rendered = format!("{secrets:?}");
        assert!(!rendered.contains("pw@host"));
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("vendor.example"));
    }
}
