//! Deterministic cache-key derivation (S4.3).
//!
//! `method + normalized path + base36(xxh32(sorted query params, body))`.
//! Stable under parameter re-ordering since the params are sorted before
//! hashing.

use crate::provider::{FetchRequest, Method};
use serde_json::Value;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap()
}

fn normalize_path(path: &str) -> String {
    path.trim_start_matches('/').replace('/', "-")
}

/// Build the deterministic cache key for a request. Non-GET requests still
/// get a key (useful for dedup bookkeeping) even though they bypass the
/// cache entirely per S4.3.
pub fn cache_key(req: &FetchRequest) -> String {
    let mut sorted_query = req.query.clone();
    sorted_query.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hash_input = String::new();
    for (k, v) in &sorted_query {
        hash_input.push_str(k);
        hash_input.push('=');
        hash_input.push_str(v);
        hash_input.push('&');
    }
    if let Some(body) = &req.body {
        hash_input.push_str(&canonical_json(body));
    }

    let hash = xxhash_rust::xxh32::xxh32(hash_input.as_bytes(), 0);
    format!(
        "{}:{}:{}",
        req.method.as_str(),
        normalize_path(&req.path),
        to_base36(hash)
    )
}

/// Sort object keys recursively so semantically-identical JSON bodies with
/// different key order hash identically.
fn canonical_json(v: &Value) -> String {
    fn sort_keys(v: &Value) -> Value {
        match v {
            Value::Object(map) => {
                let mut keys: Vec<_> = map.keys().cloned().collect();
                keys.sort();
                let mut new = serde_json::Map::new();
                for k in keys {
                    new.insert(k.clone(), sort_keys(&map[&k]));
                }
                Value::Object(new)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
            _ => v.clone(),
        }
    }
    sort_keys(v).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_stable_under_param_reordering() {
        let a = FetchRequest::get("/v1/fundamentals")
            .with_query("symbol", "AAPL")
            .with_query("period", "annual");
        let b = FetchRequest::get("/v1/fundamentals")
            .with_query("period", "annual")
            .with_query("symbol", "AAPL");
        assert_eq!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn key_differs_on_different_params() {
        let a = FetchRequest::get("/v1/fundamentals").with_query("symbol", "AAPL");
        let b = FetchRequest::get("/v1/fundamentals").with_query("symbol", "MSFT");
        assert_ne!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn key_differs_on_method() {
        let mut a = FetchRequest::get("/v1/x");
        let mut b = FetchRequest::get("/v1/x");
        a.method = Method::Get;
        b.method = Method::Post;
        assert_ne!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn normalize_path_strips_leading_slash_and_replaces_remaining() {
        let req = FetchRequest::get("/v1/fundamentals/AAPL");
        let k = cache_key(&req);
        assert!(k.starts_with("GET:v1-fundamentals-AAPL:"));
    }

    #[test]
    fn body_affects_key() {
        let mut a = FetchRequest::get("/v1/x");
        a.body = Some(serde_json::json!({"a": 1}));
        let mut b = FetchRequest::get("/v1/x");
        b.body = Some(serde_json::json!({"a": 2}));
        assert_ne!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn body_key_order_does_not_affect_key() {
        let mut a = FetchRequest::get("/v1/x");
        a.body = Some(serde_json::json!({"a": 1, "b": 2}));
        let mut b = FetchRequest::get("/v1/x");
        b.body = Some(serde_json::json!({"b": 2, "a": 1}));
        assert_eq!(cache_key(&a), cache_key(&b));
    }
}
