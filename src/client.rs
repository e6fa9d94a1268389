use crate::redact::redact_secrets;
use crate::settings::{Settings, SettingsError};
use crate::types::{RefreshError, Token};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, USER_AGENT};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

const CLIENT_USER_AGENT: &str = concat!("csrf-refresh/", env!("CARGO_PKG_VERSION"));

/// Anything that can mint a fresh token. The refresh loop owns exactly one.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<Token, RefreshError>;
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http client error")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

fn build_headers(session_cookie: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
    if let Some(cookie) = session_cookie.map(str::trim).filter(|c| !c.is_empty()) {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            headers.insert(COOKIE, value);
        }
    }
    headers
}

fn parse_token_body(text: &str) -> Result<Token, RefreshError> {
    let parsed: TokenResponse = serde_json::from_str(text)
        .map_err(|e| RefreshError::InvalidResponse(redact_secrets(&e.to_string()).to_string()))?;
    Token::new(parsed.token)
        .ok_or_else(|| RefreshError::InvalidResponse("empty token".to_string()))
}

/// Fetches tokens from `GET <baseUrl><tokenPath>`.
pub struct CsrfTokenClient {
    http: reqwest::Client,
    endpoint: Url,
    headers: HeaderMap,
}

impl CsrfTokenClient {
    pub fn new(settings: &Settings) -> Result<Self, ClientError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            endpoint: settings.token_url()?,
            headers: build_headers(settings.session_cookie.as_deref()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TokenSource for CsrfTokenClient {
    async fn fetch_token(&self) -> Result<Token, RefreshError> {
        let res = self
            .http
            .get(self.endpoint.clone())
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| RefreshError::Network(redact_secrets(&e.to_string()).to_string()))?;

        if !res.status().is_success() {
            return Err(RefreshError::Status(res.status().as_u16()));
        }

        let text = res
            .text()
            .await
            .map_err(|e| RefreshError::Network(redact_secrets(&e.to_string()).to_string()))?;
        parse_token_body(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer) -> Settings {
        Settings {
            base_url: server.uri(),
            ..Settings::default()
        }
    }

    #[test]
    fn parse_token_body_rejects_missing_or_empty_token() {
        assert_eq!(parse_token_body(r#"{"token":"abc123"}"#).unwrap().as_str(), "abc123");
        assert!(matches!(
            parse_token_body(r#"{"csrf":"abc123"}"#),
            Err(RefreshError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_token_body(r#"{"token":""}"#),
            Err(RefreshError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_token_body("<html>login</html>"),
            Err(RefreshError::InvalidResponse(_))
        ));
    }

    #[test]
    fn build_headers_skips_blank_cookie() {
        let headers = build_headers(Some("  "));
        assert!(headers.get(COOKIE).is_none());
        let headers = build_headers(Some("session=abc"));
        assert_eq!(headers.get(COOKIE).unwrap(), "session=abc");
    }

    #[tokio::test]
    async fn fetch_token_reads_token_from_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/csrf-token"))
            .and(header("accept", "application/json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "abc123" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = CsrfTokenClient::new(&settings_for(&server)).unwrap();
        let token = client.fetch_token().await.unwrap();
        assert_eq!(token.as_str(), "abc123");
    }

    #[tokio::test]
    async fn fetch_token_sends_session_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/csrf-token"))
            .and(header("cookie", "session=s3cr3t"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "t0k3n" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let settings = Settings {
            session_cookie: Some("session=s3cr3t".to_string()),
            ..settings_for(&server)
        };
        let client = CsrfTokenClient::new(&settings).unwrap();
        assert_eq!(client.fetch_token().await.unwrap().as_str(), "t0k3n");
    }

    #[tokio::test]
    async fn fetch_token_maps_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/csrf-token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = CsrfTokenClient::new(&settings_for(&server)).unwrap();
        assert_eq!(client.fetch_token().await, Err(RefreshError::Status(500)));
    }

    #[tokio::test]
    async fn fetch_token_reports_unreachable_endpoint_as_network_error() {
        let settings = Settings {
            base_url: "http://127.0.0.1:9".to_string(),
            ..Settings::default()
        };
        let client = CsrfTokenClient::new(&settings).unwrap();
        assert!(matches!(
            client.fetch_token().await,
            Err(RefreshError::Network(_))
        ));
    }
}
