//! Deterministic, in-memory `Provider` fixture (no network, no randomness):
//! responses are consumed in order from a fixed script, so a test can
//! assert exactly how many times a client fell through to the vendor and
//! with what requests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use qscan_httpclient::provider::{FetchRequest, Provider, ProviderError};
use serde_json::Value;

pub enum Scripted {
    Ok(Value),
    Err(ProviderError),
}

pub struct ScriptedProvider {
    name: &'static str,
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<FetchRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: &'static str, script: Vec<Scripted>) -> Self {
        Self { name, script: Mutex::new(script.into()), calls: Mutex::new(Vec::new()) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, req: &FetchRequest) -> Result<Value, ProviderError> {
        self.calls.lock().unwrap().push(req.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Ok(value)) => Ok(value),
            Some(Scripted::Err(err)) => Err(err),
            None => Err(ProviderError::Config(format!("{}: script exhausted", self.name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumes_script_in_order_and_counts_calls() {
        let provider = ScriptedProvider::new(
            "test-vendor",
            vec![Scripted::Ok(serde_json::json!({"n": 1})), Scripted::Err(ProviderError::Transport("down".into()))],
        );
        let req = FetchRequest::get("/v1/fundamentals/AAPL");

        let first = provider.fetch(&req).await.unwrap();
        assert_eq!(first["n"], 1);

        let second = provider.fetch(&req).await;
        assert!(matches!(second, Err(ProviderError::Transport(_))));

        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_returns_config_error() {
        let provider = ScriptedProvider::new("test-vendor", vec![]);
        let req = FetchRequest::get("/v1/fundamentals/AAPL");
        let result = provider.fetch(&req).await;
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }
}
