use metrics_exporter_prometheus::PrometheusHandle;
use realty_sync::auth::{NoExchange, TokenCache};
use realty_sync::config::{CredentialsConfig, SyncConfig};
use realty_sync::domain::{EntityKind, InboundAction, SourceSystem};
use realty_sync::formula::{FormulaRegistry, ReturnType};
use realty_sync::store::MemoryEntityStore;
use realty_sync::sync::{MemorySyncLog, SyncOrchestrator, SyncParams};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Process-wide sync state: one in-memory store, audit log, formula registry
/// and one token cache per upstream system.
pub(crate) struct SyncHub {
    pub(crate) orchestrator: SyncOrchestrator<MemoryEntityStore, MemorySyncLog>,
    pub(crate) formulas: FormulaRegistry,
    pub(crate) sync: SyncConfig,
    credentials: BTreeMap<SourceSystem, TokenCache<NoExchange>>,
}

impl SyncHub {
    pub(crate) fn new(sync: SyncConfig, credentials: &CredentialsConfig) -> Self {
        let credentials = SourceSystem::ordered()
            .into_iter()
            .map(|system| {
                let cache =
                    TokenCache::from_config(system, NoExchange, credentials.for_system(system));
                (system, cache)
            })
            .collect();

        Self {
            orchestrator: SyncOrchestrator::new(
                Arc::new(MemoryEntityStore::new()),
                Arc::new(MemorySyncLog::new()),
            ),
            formulas: FormulaRegistry::new(),
            sync,
            credentials,
        }
    }

    pub(crate) fn store(&self) -> &Arc<MemoryEntityStore> {
        self.orchestrator.store()
    }

    pub(crate) fn log(&self) -> &Arc<MemorySyncLog> {
        self.orchestrator.log()
    }

    pub(crate) fn credentials(&self, system: SourceSystem) -> Option<&TokenCache<NoExchange>> {
        self.credentials.get(&system)
    }

    /// Run parameters from configuration, with per-request overrides.
    pub(crate) fn params(
        &self,
        action: Option<InboundAction>,
        batch_size: Option<usize>,
        fetch_details: Option<bool>,
    ) -> SyncParams {
        let mut params = SyncParams::from_config(&self.sync);
        if let Some(action) = action {
            params.action = action;
        }
        if let Some(batch_size) = batch_size.filter(|size| *size > 0) {
            params.batch_size = batch_size;
        }
        if let Some(fetch_details) = fetch_details {
            params.fetch_details = fetch_details;
        }
        params
    }
}

pub(crate) fn parse_system(raw: &str) -> Result<SourceSystem, String> {
    raw.parse().map_err(|err| format!("{err}"))
}

pub(crate) fn parse_kind(raw: &str) -> Result<EntityKind, String> {
    raw.parse().map_err(|err| format!("{err}"))
}

pub(crate) fn parse_action(raw: &str) -> Result<InboundAction, String> {
    raw.parse().map_err(|err| format!("{err}"))
}

pub(crate) fn parse_return_type(raw: &str) -> Result<ReturnType, String> {
    raw.parse().map_err(|err| format!("{err}"))
}
