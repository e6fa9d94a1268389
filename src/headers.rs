//! The page's shared request-header attribute.
//!
//! The request layer reads this attribute (a JSON object of header name to
//! value) and attaches every entry to outgoing mutating requests. The refresh
//! loop is the only writer of the token entry.

use crate::types::{RefreshError, Token};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct HeaderStore {
    attribute: Arc<Mutex<Option<String>>>,
}

fn parse_attribute(raw: &str) -> Result<Map<String, Value>, RefreshError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RefreshError::Headers(format!("expected object, got {other}"))),
        Err(e) => Err(RefreshError::Headers(e.to_string())),
    }
}

impl HeaderStore {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            attribute: Arc::new(Mutex::new(initial)),
        }
    }

    pub async fn attribute(&self) -> Option<String> {
        self.attribute.lock().await.clone()
    }

    pub async fn set_attribute(&self, value: Option<String>) {
        *self.attribute.lock().await = value;
    }

    /// Writes `token` under `key`, keeping every other entry.
    pub async fn inject_token(&self, key: &str, token: &Token) -> Result<(), RefreshError> {
        let mut guard = self.attribute.lock().await;
        let mut headers = match guard.as_deref() {
            Some(raw) if !raw.trim().is_empty() => parse_attribute(raw)?,
            _ => Map::new(),
        };
        headers.insert(key.to_string(), Value::String(token.as_str().to_string()));
        *guard = Some(Value::Object(headers).to_string());
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let guard = self.attribute.lock().await;
        let headers = parse_attribute(guard.as_deref()?).ok()?;
        headers.get(key)?.as_str().map(str::to_string)
    }

    /// Headers for the request layer. Entries that are not valid HTTP
    /// headers are skipped.
    pub async fn header_map(&self) -> Result<HeaderMap, RefreshError> {
        let guard = self.attribute.lock().await;
        let mut out = HeaderMap::new();
        let Some(raw) = guard.as_deref() else {
            return Ok(out);
        };
        for (name, value) in parse_attribute(raw)? {
            let Some(value) = value.as_str() else {
                continue;
            };
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                continue;
            };
            out.insert(name, value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(value: &str) -> Token {
        Token::new(value).unwrap()
    }

    #[tokio::test]
    async fn inject_token_preserves_other_keys() {
        let store = HeaderStore::new(Some(
            r#"{"X-CSRF-TOKEN":"old","X-Team":"blue"}"#.to_string(),
        ));
        store
            .inject_token("X-CSRF-TOKEN", &token("abc123"))
            .await
            .unwrap();

        let raw = store.attribute().await.unwrap();
        let json: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["X-CSRF-TOKEN"], "abc123");
        assert_eq!(json["X-Team"], "blue");
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn inject_token_creates_missing_attribute() {
        let store = HeaderStore::default();
        store
            .inject_token("X-CSRF-TOKEN", &token("abc123"))
            .await
            .unwrap();
        assert_eq!(store.get("X-CSRF-TOKEN").await.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn inject_token_rejects_non_object_attribute_and_leaves_it_untouched() {
        let store = HeaderStore::new(Some("[1,2]".to_string()));
        let result = store.inject_token("X-CSRF-TOKEN", &token("abc123")).await;
        assert!(matches!(result, Err(RefreshError::Headers(_))));
        assert_eq!(store.attribute().await.as_deref(), Some("[1,2]"));

        store.set_attribute(Some("{not json".to_string())).await;
        let result = store.inject_token("X-CSRF-TOKEN", &token("abc123")).await;
        assert!(matches!(result, Err(RefreshError::Headers(_))));
    }

    #[tokio::test]
    async fn header_map_skips_invalid_entries() {
        let store = HeaderStore::new(Some(
            r#"{"X-CSRF-TOKEN":"abc123","bad name":"x","X-Count":3}"#.to_string(),
        ));
        let headers = store.header_map().await.unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-csrf-token").unwrap(), "abc123");
    }
}
