use reqwest::header::HeaderName;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const ENV_BASE_URL: &str = "CSRF_REFRESH_BASE_URL";
pub const ENV_TOKEN_PATH: &str = "CSRF_REFRESH_TOKEN_PATH";
pub const ENV_HEADER_KEY: &str = "CSRF_REFRESH_HEADER_KEY";
pub const ENV_REFRESH_INTERVAL_SECONDS: &str = "CSRF_REFRESH_INTERVAL_SECONDS";
pub const ENV_RETRY_GRACE_MILLIS: &str = "CSRF_REFRESH_RETRY_GRACE_MILLIS";
pub const ENV_INVALID_TOKEN_MARKER: &str = "CSRF_REFRESH_INVALID_TOKEN_MARKER";
pub const ENV_LOGIN_PATH: &str = "CSRF_REFRESH_LOGIN_PATH";
pub const ENV_SESSION_COOKIE: &str = "CSRF_REFRESH_SESSION_COOKIE";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file")]
    Io(#[from] std::io::Error),
    #[error("invalid settings json")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

fn invalid(key: &'static str, message: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        key,
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub base_url: String,
    pub token_path: String,
    pub header_key: String,
    /// Proactive refresh period; tokens live ~30 minutes server-side.
    pub refresh_interval_seconds: u64,
    pub retry_grace_millis: u64,
    pub invalid_token_marker: String,
    pub login_path: String,
    pub session_cookie: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            token_path: "/csrf-token".to_string(),
            header_key: "X-CSRF-TOKEN".to_string(),
            refresh_interval_seconds: 25 * 60,
            retry_grace_millis: 1000,
            invalid_token_marker: "CSRF token invalid".to_string(),
            login_path: "/login".to_string(),
            session_cookie: None,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, SettingsError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| invalid(key, e.to_string()))
}

impl Settings {
    /// Defaults, then the optional JSON file, then `CSRF_REFRESH_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let settings = match path {
            Some(path) => Self::from_json_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        let settings = settings.with_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        if let Some(v) = get(ENV_BASE_URL) {
            self.base_url = v;
        }
        if let Some(v) = get(ENV_TOKEN_PATH) {
            self.token_path = v;
        }
        if let Some(v) = get(ENV_HEADER_KEY) {
            self.header_key = v;
        }
        if let Some(v) = get(ENV_REFRESH_INTERVAL_SECONDS) {
            self.refresh_interval_seconds = parse_u64(ENV_REFRESH_INTERVAL_SECONDS, &v)?;
        }
        if let Some(v) = get(ENV_RETRY_GRACE_MILLIS) {
            self.retry_grace_millis = parse_u64(ENV_RETRY_GRACE_MILLIS, &v)?;
        }
        if let Some(v) = get(ENV_INVALID_TOKEN_MARKER) {
            self.invalid_token_marker = v;
        }
        if let Some(v) = get(ENV_LOGIN_PATH) {
            self.login_path = v;
        }
        if let Some(v) = get(ENV_SESSION_COOKIE) {
            self.session_cookie = Some(v);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.token_url()?;
        HeaderName::from_bytes(self.header_key.as_bytes())
            .map_err(|e| invalid("headerKey", e.to_string()))?;
        if self.refresh_interval_seconds == 0 {
            return Err(invalid("refreshIntervalSeconds", "must be at least 1"));
        }
        if self.invalid_token_marker.trim().is_empty() {
            return Err(invalid("invalidTokenMarker", "must not be empty"));
        }
        if self.login_path.trim().is_empty() {
            return Err(invalid("loginPath", "must not be empty"));
        }
        Ok(())
    }

    pub fn token_url(&self) -> Result<Url, SettingsError> {
        let base = Url::parse(&self.base_url).map_err(|e| invalid("baseUrl", e.to_string()))?;
        base.join(&self.token_path)
            .map_err(|e| invalid("tokenPath", e.to_string()))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds.max(1))
    }

    pub fn retry_grace(&self) -> Duration {
        Duration::from_millis(self.retry_grace_millis)
    }
}
