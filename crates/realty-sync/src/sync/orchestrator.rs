use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::log::{NewSyncLog, SyncLogEntry, SyncLogError, SyncLogStore, SyncStatus};
use super::retry::RetryPolicy;
use super::source::{RecordPage, RecordSource, UpstreamError};
use crate::auth::{AuthError, CredentialProvider};
use crate::config::SyncConfig;
use crate::domain::{EntityKind, ExternalRecord, InboundAction};
use crate::reconcile::{BatchSummary, ReconcileContext, ReconcileError, Reconciler};
use crate::store::EntityStore;

/// Cooperative stop flag, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run knobs. Batch size and delay are the backpressure levers.
#[derive(Debug, Clone)]
pub struct SyncParams {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub retry: RetryPolicy,
    pub fetch_details: bool,
    pub action: InboundAction,
    /// No new batch starts after this instant.
    pub deadline: Option<Instant>,
    pub stop: StopSignal,
}

impl Default for SyncParams {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl SyncParams {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_delay: config.batch_delay,
            retry: RetryPolicy::from(config),
            fetch_details: config.fetch_details,
            action: InboundAction::Update,
            deadline: None,
            stop: StopSignal::new(),
        }
    }

    fn should_stop(&self) -> bool {
        self.stop.is_stopped() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub log: SyncLogEntry,
    pub summary: BatchSummary,
    pub pages: usize,
    pub batches: usize,
    pub interrupted: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("listing records failed: {0}")]
    Upstream(#[source] UpstreamError),
    #[error(transparent)]
    Unsupported(#[from] ReconcileError),
    #[error("audit log write failed: {0}")]
    Log(#[from] SyncLogError),
}

#[derive(Debug, Default)]
struct Progress {
    summary: BatchSummary,
    pages: usize,
    batches: usize,
    interrupted: bool,
}

impl Progress {
    /// The run's parameters as logged at start, extended with its results.
    fn payload(&self, started: &Value) -> Value {
        let mut payload = started.as_object().cloned().unwrap_or_default();
        payload.insert("summary".to_string(), json!(self.summary));
        payload.insert("pages".to_string(), json!(self.pages));
        payload.insert("batches".to_string(), json!(self.batches));
        payload.insert("interrupted".to_string(), json!(self.interrupted));
        Value::Object(payload)
    }
}

/// Sequences a sync run: credential, paginated fetch, batched reconcile,
/// audit log.
pub struct SyncOrchestrator<S: ?Sized, L: ?Sized> {
    store: Arc<S>,
    log: Arc<L>,
}

impl<S, L> SyncOrchestrator<S, L>
where
    S: EntityStore + ?Sized,
    L: SyncLogStore + ?Sized,
{
    pub fn new(store: Arc<S>, log: Arc<L>) -> Self {
        Self { store, log }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    pub async fn run_sync(
        &self,
        kind: EntityKind,
        source: &dyn RecordSource,
        credentials: &dyn CredentialProvider,
        params: &SyncParams,
    ) -> Result<SyncOutcome, SyncError> {
        let system = source.system();
        let reconciler = Reconciler::new(self.store.clone(), kind, system)?;
        let entry = self.log.begin(NewSyncLog {
            source: system,
            entity_type: kind,
            action: format!("sync:{}", params.action.label()),
            payload: json!({
                "batch_size": params.batch_size,
                "fetch_details": params.fetch_details,
            }),
        })?;
        info!(%system, %kind, log_id = entry.id, "sync run started");

        let mut progress = Progress::default();
        let mut token = match credentials.get_token().await {
            Ok(token) => token,
            Err(err) => return Err(self.fail(&entry, &progress, err.into())),
        };

        let context = ReconcileContext::new(params.action);
        let batch_size = params.batch_size.max(1);
        let mut page_token: Option<String> = None;

        'pages: loop {
            if params.should_stop() {
                progress.interrupted = true;
                break;
            }

            let page = match self
                .fetch_page(kind, source, credentials, &mut token, page_token.as_deref(), params)
                .await
            {
                Ok(page) => page,
                Err(err) => return Err(self.fail(&entry, &progress, err)),
            };
            progress.pages += 1;
            debug!(%system, %kind, page = progress.pages, records = page.records.len(), "page fetched");

            for chunk in page.records.chunks(batch_size) {
                if progress.batches > 0 {
                    if params.should_stop() {
                        progress.interrupted = true;
                        break 'pages;
                    }
                    tokio::time::sleep(params.batch_delay).await;
                }
                if params.should_stop() {
                    progress.interrupted = true;
                    break 'pages;
                }

                let records = if params.fetch_details {
                    self.enrich(&reconciler, source, &token, chunk, params).await
                } else {
                    chunk.to_vec()
                };
                let summary = reconciler.reconcile_batch(&records, &context);
                progress.summary.absorb(summary);
                progress.batches += 1;
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        let (status, message) = if progress.interrupted {
            (
                SyncStatus::Failed,
                Some(format!(
                    "interrupted after {} batch(es); committed batches were kept",
                    progress.batches
                )),
            )
        } else if progress.summary.has_errors() {
            (
                SyncStatus::Failed,
                Some(format!(
                    "{} record(s) could not be reconciled",
                    progress.summary.errors.len()
                )),
            )
        } else {
            (SyncStatus::Success, None)
        };

        let log = self
            .log
            .complete(entry.id, status, progress.payload(&entry.payload), message)?;
        info!(
            %system,
            %kind,
            log_id = log.id,
            status = %log.status,
            total = progress.summary.total,
            created = progress.summary.created,
            updated = progress.summary.updated,
            skipped = progress.summary.skipped,
            "sync run finished"
        );

        Ok(SyncOutcome {
            log,
            summary: progress.summary,
            pages: progress.pages,
            batches: progress.batches,
            interrupted: progress.interrupted,
        })
    }

    /// List one page. A 401 invalidates the credential and the page is
    /// retried once with a fresh one.
    async fn fetch_page(
        &self,
        kind: EntityKind,
        source: &dyn RecordSource,
        credentials: &dyn CredentialProvider,
        token: &mut String,
        page_token: Option<&str>,
        params: &SyncParams,
    ) -> Result<RecordPage, SyncError> {
        let first = {
            let current = token.as_str();
            params
                .retry
                .run("list_page", || source.list_page(kind, current, page_token))
                .await
        };

        match first {
            Ok(page) => Ok(page),
            Err(err) if err.is_unauthorized() => {
                warn!(system = %source.system(), %kind, "credential rejected, re-authenticating");
                credentials.invalidate().await;
                *token = credentials.get_token().await?;

                let current = token.as_str();
                match params
                    .retry
                    .run("list_page", || source.list_page(kind, current, page_token))
                    .await
                {
                    Ok(page) => Ok(page),
                    Err(err) if err.is_unauthorized() => Err(AuthError::Rejected {
                        system: source.system(),
                    }
                    .into()),
                    Err(err) => Err(SyncError::Upstream(err)),
                }
            }
            Err(err) => Err(SyncError::Upstream(err)),
        }
    }

    /// Fetch details for a whole batch concurrently. A record whose detail
    /// cannot be fetched keeps its list-level data.
    async fn enrich(
        &self,
        reconciler: &Reconciler<S>,
        source: &dyn RecordSource,
        token: &str,
        chunk: &[ExternalRecord],
        params: &SyncParams,
    ) -> Vec<ExternalRecord> {
        let kind = reconciler.kind();
        let profile = reconciler.profile();

        let fetches = chunk.iter().map(|record| async move {
            let Some(external_id) = profile.external_id_of(record) else {
                return record.clone();
            };
            let id = external_id.as_str();
            match params
                .retry
                .run("fetch_detail", || source.fetch_detail(kind, token, id))
                .await
            {
                Ok(detail) => {
                    let mut merged = record.clone();
                    merged.extend(detail);
                    merged
                }
                Err(err) => {
                    warn!(
                        system = %source.system(),
                        %kind,
                        external_id = id,
                        status = err.status,
                        "detail fetch failed, using list data"
                    );
                    record.clone()
                }
            }
        });

        join_all(fetches).await
    }

    fn fail(&self, entry: &SyncLogEntry, progress: &Progress, err: SyncError) -> SyncError {
        error!(
            system = %entry.source,
            kind = %entry.entity_type,
            log_id = entry.id,
            error = %err,
            "sync run failed"
        );
        if let Err(log_err) = self.log.complete(
            entry.id,
            SyncStatus::Failed,
            progress.payload(&entry.payload),
            Some(err.to_string()),
        ) {
            error!(log_id = entry.id, error = %log_err, "could not record failed sync run");
        }
        err
    }
}
