use std::sync::Arc;

use serde_json::{json, Value};

use crate::domain::{EntityKind, ExternalRecord, InboundAction, LocalEntity, SourceSystem};
use crate::reconcile::{BatchSummary, ReconcileContext, Reconciler};
use crate::store::{EntityStore, MemoryEntityStore};

pub(super) fn record(value: Value) -> ExternalRecord {
    value
        .as_object()
        .cloned()
        .expect("fixture must be a JSON object")
}

pub(super) fn reconciler(
    store: &Arc<MemoryEntityStore>,
    kind: EntityKind,
    system: SourceSystem,
) -> Reconciler<MemoryEntityStore> {
    Reconciler::new(store.clone(), kind, system).expect("supported source")
}

pub(super) fn run(
    reconciler: &Reconciler<MemoryEntityStore>,
    action: InboundAction,
    records: Vec<Value>,
) -> BatchSummary {
    let records: Vec<ExternalRecord> = records.into_iter().map(record).collect();
    reconciler.reconcile_batch(&records, &ReconcileContext::new(action))
}

pub(super) fn agents(store: &MemoryEntityStore) -> Vec<LocalEntity> {
    store.all(EntityKind::Agent).expect("agents readable")
}

pub(super) fn rezen_agent(id: &str, name: &str, email: &str) -> Value {
    let (first, last) = name.split_once(' ').unwrap_or((name, ""));
    json!({
        "id": id,
        "firstName": first,
        "lastName": last,
        "emailAddress": email,
        "agentStatus": "ACTIVE",
        "joinDate": "2024-02-01T15:00:00Z",
    })
}

/// Seed an agent directly through the store, bypassing reconciliation.
pub(super) fn seed_agent(
    store: &MemoryEntityStore,
    name: &str,
    email: Option<&str>,
    rezen_id: Option<&str>,
) -> LocalEntity {
    let mut fields = serde_json::Map::new();
    fields.insert("name".to_string(), json!(name));
    if let Some(email) = email {
        fields.insert("email".to_string(), json!(email));
    }
    store
        .create(
            EntityKind::Agent,
            crate::store::EntityPatch {
                external_ref: rezen_id
                    .map(|id| crate::domain::ExternalRef::new(SourceSystem::Rezen, id)),
                fields,
                active: None,
            },
        )
        .expect("seed agent")
}
