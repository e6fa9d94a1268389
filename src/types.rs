use crate::redact::redact_token;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Credential attached to state-mutating requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Returns `None` for empty or whitespace-only values. The value is
    /// kept exactly as issued.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Token").field(&redact_token(&self.0)).finish()
    }
}

/// Opaque identity of the page element that issued a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A failed request, as reported by the page's request-dispatch layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvent {
    pub status: u16,
    pub body: String,
    pub element: ElementId,
    /// Interaction type that triggered the request (`click`, `submit`, ...).
    pub trigger: String,
}

impl FailureEvent {
    pub fn new(
        status: u16,
        body: impl Into<String>,
        element: impl Into<ElementId>,
        trigger: impl Into<String>,
    ) -> Self {
        Self {
            status,
            body: body.into(),
            element: element.into(),
            trigger: trigger.into(),
        }
    }

    pub fn is_invalid_token(&self, marker: &str) -> bool {
        self.status == 403 && self.body.contains(marker)
    }
}

/// Something the coordinator asks the page to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageEvent {
    Redispatch { element: ElementId, trigger: String },
    Navigate { location: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("token request failed: {0}")]
    Network(String),
    #[error("token endpoint returned status {0}")]
    Status(u16),
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
    #[error("request headers attribute is not a JSON object: {0}")]
    Headers(String),
    #[error("refresh loop is not available")]
    Unavailable,
}
