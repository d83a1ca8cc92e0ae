//! Short-lived upstream credentials, cached per source system.

mod cache;

pub use cache::TokenCache;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::SystemCredentials;
use crate::domain::SourceSystem;

/// Source of "now", injectable so expiry can be tested without waiting.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Refresh token plus client id/secret for an OAuth refresh grant.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshCredentials {
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
}

impl RefreshCredentials {
    /// `None` unless every part is configured.
    pub fn from_config(credentials: &SystemCredentials) -> Option<Self> {
        Some(Self {
            refresh_token: credentials.refresh_token.clone()?,
            client_id: credentials.client_id.clone()?,
            client_secret: credentials.client_secret.clone()?,
        })
    }
}

impl fmt::Debug for RefreshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCredentials")
            .field("client_id", &self.client_id)
            .field("refresh_token", &"<redacted>")
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Successful exchange response: `{access_token, expires_in}`.
#[derive(Clone, PartialEq, Eq, serde::Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("token exchange failed: {message}")]
pub struct ExchangeError {
    pub status: Option<u16>,
    pub message: String,
}

impl ExchangeError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// The credential-exchange boundary; one HTTP call in production.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, credentials: &RefreshCredentials) -> Result<TokenGrant, ExchangeError>;
}

/// Exchange used when no token endpoint is wired in; always fails, so the
/// cache falls back to the static credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExchange;

#[async_trait]
impl TokenExchange for NoExchange {
    async fn exchange(&self, _credentials: &RefreshCredentials) -> Result<TokenGrant, ExchangeError> {
        Err(ExchangeError::new(None, "no token endpoint configured"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no credentials configured for {system}")]
    NotConfigured { system: SourceSystem },
    #[error("token refresh for {system} failed: {source}")]
    Refresh {
        system: SourceSystem,
        #[source]
        source: ExchangeError,
    },
    #[error("{system} rejected a freshly issued credential")]
    Rejected { system: SourceSystem },
}

/// What the orchestrator needs from a token cache.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn system(&self) -> SourceSystem;
    async fn get_token(&self) -> Result<String, AuthError>;
    /// Drop the cached credential so the next call re-authenticates.
    async fn invalidate(&self);
}
