use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{EntityKind, ExternalRecord, SourceSystem};

/// One page of a paginated list fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub records: Vec<ExternalRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// A failed upstream call, carrying the HTTP status the retry policy inspects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream returned {status}: {message}")]
pub struct UpstreamError {
    pub status: u16,
    pub message: String,
}

impl UpstreamError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn classify(&self) -> UpstreamFailure {
        UpstreamFailure::classify(self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    /// 429 or 5xx: retried with backoff.
    Transient,
    /// Any other status: never retried.
    Permanent,
}

impl UpstreamFailure {
    pub fn classify(status: u16) -> Self {
        match status {
            429 | 500..=599 => Self::Transient,
            _ => Self::Permanent,
        }
    }
}

/// The fetch boundary for one upstream system.
#[async_trait]
pub trait RecordSource: Send + Sync {
    fn system(&self) -> SourceSystem;

    async fn list_page(
        &self,
        kind: EntityKind,
        token: &str,
        page_token: Option<&str>,
    ) -> Result<RecordPage, UpstreamError>;

    async fn fetch_detail(
        &self,
        kind: EntityKind,
        token: &str,
        external_id: &str,
    ) -> Result<ExternalRecord, UpstreamError>;
}
