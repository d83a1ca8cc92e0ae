use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::auth::{AuthError, CredentialProvider};
use crate::domain::{EntityKind, ExternalRecord, SourceSystem};
use crate::store::MemoryEntityStore;
use crate::sync::{
    MemorySyncLog, RecordPage, RecordSource, RetryPolicy, StopSignal, SyncOrchestrator,
    SyncParams, UpstreamError,
};

pub(super) fn record(value: Value) -> ExternalRecord {
    value
        .as_object()
        .cloned()
        .expect("fixture must be a JSON object")
}

pub(super) fn rezen_agent(id: &str, first: &str, email: &str) -> ExternalRecord {
    record(json!({
        "id": id,
        "firstName": first,
        "lastName": "Tester",
        "emailAddress": email,
        "agentStatus": "ACTIVE",
    }))
}

pub(super) fn orchestrator() -> SyncOrchestrator<MemoryEntityStore, MemorySyncLog> {
    SyncOrchestrator::new(
        Arc::new(MemoryEntityStore::new()),
        Arc::new(MemorySyncLog::new()),
    )
}

pub(super) fn params(batch_size: usize, fetch_details: bool) -> SyncParams {
    SyncParams {
        batch_size,
        batch_delay: Duration::ZERO,
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        },
        fetch_details,
        ..SyncParams::default()
    }
}

/// Scripted upstream: fixed pages, optional per-id detail statuses, a set of
/// rejected tokens and an optional stop trigger on detail fetches.
#[derive(Default)]
pub(super) struct ScriptedSource {
    /// Defaults to REZEN.
    pub system: Option<SourceSystem>,
    pub pages: Vec<Vec<ExternalRecord>>,
    pub detail_status: Option<u16>,
    pub detail_extra: Option<Value>,
    pub rejected_tokens: HashSet<String>,
    pub stop_on_detail: Option<StopSignal>,
    pub detail_calls: Mutex<Vec<Instant>>,
    pub list_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn with_pages(pages: Vec<Vec<ExternalRecord>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    pub fn detail_instants(&self) -> Vec<Instant> {
        self.detail_calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl RecordSource for ScriptedSource {
    fn system(&self) -> SourceSystem {
        self.system.unwrap_or(SourceSystem::Rezen)
    }

    async fn list_page(
        &self,
        _kind: EntityKind,
        token: &str,
        page_token: Option<&str>,
    ) -> Result<RecordPage, UpstreamError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.rejected_tokens.contains(token) {
            return Err(UpstreamError::new(401, "token expired"));
        }
        let index: usize = page_token.map_or(0, |token| token.parse().expect("numeric page token"));
        Ok(RecordPage {
            records: self.pages.get(index).cloned().unwrap_or_default(),
            next_page_token: (index + 1 < self.pages.len()).then(|| (index + 1).to_string()),
        })
    }

    async fn fetch_detail(
        &self,
        _kind: EntityKind,
        _token: &str,
        external_id: &str,
    ) -> Result<ExternalRecord, UpstreamError> {
        self.detail_calls
            .lock()
            .expect("calls lock")
            .push(Instant::now());
        if let Some(stop) = &self.stop_on_detail {
            stop.request_stop();
        }
        if let Some(status) = self.detail_status {
            return Err(UpstreamError::new(status, "detail unavailable"));
        }
        let mut detail = record(json!({ "id": external_id }));
        if let Some(Value::Object(extra)) = &self.detail_extra {
            detail.extend(extra.clone());
        }
        Ok(detail)
    }
}

/// Hands out tokens in order; `invalidate` moves to the next one.
pub(super) struct ScriptedCredentials {
    tokens: Vec<&'static str>,
    cursor: AtomicUsize,
    pub invalidations: AtomicUsize,
    fail: bool,
}

impl ScriptedCredentials {
    pub fn new(tokens: Vec<&'static str>) -> Self {
        Self {
            tokens,
            cursor: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }
}

#[async_trait]
impl CredentialProvider for ScriptedCredentials {
    fn system(&self) -> SourceSystem {
        SourceSystem::Rezen
    }

    async fn get_token(&self) -> Result<String, AuthError> {
        if self.fail {
            return Err(AuthError::NotConfigured {
                system: SourceSystem::Rezen,
            });
        }
        let index = self.cursor.load(Ordering::SeqCst).min(self.tokens.len() - 1);
        Ok(self.tokens[index].to_string())
    }

    async fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.cursor.fetch_add(1, Ordering::SeqCst);
    }
}
