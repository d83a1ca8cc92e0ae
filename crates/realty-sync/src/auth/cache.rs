use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{
    AuthError, Clock, CredentialProvider, ExchangeError, RefreshCredentials, SystemClock,
    TokenExchange, TokenGrant,
};
use crate::config::SystemCredentials;
use crate::domain::SourceSystem;

const DEFAULT_EXPIRY_BUFFER_MINUTES: i64 = 5;

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now.checked_add_signed(buffer)
            .is_some_and(|threshold| threshold < self.expires_at)
    }
}

/// Single-slot cache of one system's access token.
///
/// Reads take the `RwLock` only; a refresh additionally holds `refresh_gate`
/// so concurrent callers wait for one exchange instead of issuing their own.
pub struct TokenCache<E> {
    system: SourceSystem,
    exchange: E,
    refresh: Option<RefreshCredentials>,
    static_token: Option<String>,
    clock: Arc<dyn Clock>,
    buffer: Duration,
    slot: RwLock<Option<CachedToken>>,
    refresh_gate: Mutex<()>,
}

impl<E: TokenExchange> TokenCache<E> {
    pub fn new(
        system: SourceSystem,
        exchange: E,
        refresh: Option<RefreshCredentials>,
        static_token: Option<String>,
    ) -> Self {
        Self {
            system,
            exchange,
            refresh,
            static_token,
            clock: Arc::new(SystemClock),
            buffer: Duration::minutes(DEFAULT_EXPIRY_BUFFER_MINUTES),
            slot: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn from_config(system: SourceSystem, exchange: E, credentials: &SystemCredentials) -> Self {
        Self::new(
            system,
            exchange,
            RefreshCredentials::from_config(credentials),
            credentials.static_token.clone(),
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn system(&self) -> SourceSystem {
        self.system
    }

    /// Expiry of the cached credential, if one is held.
    pub async fn cached_expiry(&self) -> Option<DateTime<Utc>> {
        self.slot.read().await.as_ref().map(|token| token.expires_at)
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
        debug!(system = %self.system, "token cache invalidated");
    }

    pub async fn get_token(&self) -> Result<String, AuthError> {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let Some(refresh) = &self.refresh else {
            return self.static_or_unconfigured();
        };

        let _gate = self.refresh_gate.lock().await;
        // Another caller may have refreshed while we waited on the gate.
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let exchanged = self
            .exchange
            .exchange(refresh)
            .await
            .and_then(|grant| self.expiry(&grant).map(|expires_at| (grant, expires_at)));

        match exchanged {
            Ok((grant, expires_at)) => {
                *self.slot.write().await = Some(CachedToken {
                    access_token: grant.access_token.clone(),
                    expires_at,
                });
                info!(system = %self.system, %expires_at, "access token refreshed");
                Ok(grant.access_token)
            }
            Err(source) => {
                *self.slot.write().await = None;
                match &self.static_token {
                    Some(token) => {
                        warn!(
                            system = %self.system,
                            error = %source,
                            "token refresh failed, using static credential"
                        );
                        Ok(token.clone())
                    }
                    None => Err(AuthError::Refresh {
                        system: self.system,
                        source,
                    }),
                }
            }
        }
    }

    async fn fresh_token(&self) -> Option<String> {
        let now = self.clock.now();
        self.slot
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_fresh(now, self.buffer))
            .map(|token| token.access_token.clone())
    }

    /// A lifetime that cannot be represented as a timestamp is treated as a
    /// failed exchange.
    fn expiry(&self, grant: &TokenGrant) -> Result<DateTime<Utc>, ExchangeError> {
        Duration::try_seconds(grant.expires_in)
            .and_then(|lifetime| self.clock.now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                ExchangeError::new(
                    None,
                    format!("token lifetime of {}s is out of range", grant.expires_in),
                )
            })
    }

    fn static_or_unconfigured(&self) -> Result<String, AuthError> {
        self.static_token
            .clone()
            .ok_or(AuthError::NotConfigured {
                system: self.system,
            })
    }
}

#[async_trait]
impl<E: TokenExchange> CredentialProvider for TokenCache<E> {
    fn system(&self) -> SourceSystem {
        self.system
    }

    async fn get_token(&self) -> Result<String, AuthError> {
        TokenCache::get_token(self).await
    }

    async fn invalidate(&self) {
        TokenCache::invalidate(self).await
    }
}

impl<E> fmt::Debug for TokenCache<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("system", &self.system)
            .field("refresh_material", &self.refresh.is_some())
            .field("static_token", &self.static_token.as_ref().map(|_| "<redacted>"))
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}
