use super::mapping::{apply_defaults, derive_name, map_record, MappedRecord};
use super::matching::{resolve, Resolution};
use super::profile::{profile_for, EntityProfile};
use super::{BatchSummary, MappingError, ReconcileError, RecordFailure};
use crate::domain::{EntityId, EntityKind, ExternalRecord, InboundAction, SourceSystem};
use crate::store::{Criteria, EntityChange, EntityPatch, EntityStore};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Batch-wide settings for a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileContext {
    pub action: InboundAction,
}

impl ReconcileContext {
    pub fn new(action: InboundAction) -> Self {
        Self { action }
    }
}

/// What happened to a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Created(EntityId),
    Updated(EntityId),
    /// Number of entities soft-deactivated by a delete.
    Deactivated(usize),
    /// Nothing to do; not an error.
    Skipped(String),
}

pub struct Reconciler<S: ?Sized> {
    store: Arc<S>,
    profile: &'static EntityProfile,
}

impl<S> Reconciler<S>
where
    S: EntityStore + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        kind: EntityKind,
        system: SourceSystem,
    ) -> Result<Self, ReconcileError> {
        let profile = profile_for(kind, system)?;
        Ok(Self { store, profile })
    }

    pub fn profile(&self) -> &'static EntityProfile {
        self.profile
    }

    pub fn kind(&self) -> EntityKind {
        self.profile.kind
    }

    pub fn system(&self) -> SourceSystem {
        self.profile.system
    }

    /// Apply every record independently; a failing record is counted as
    /// skipped and never aborts the batch.
    pub fn reconcile_batch(
        &self,
        records: &[ExternalRecord],
        context: &ReconcileContext,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for (index, record) in records.iter().enumerate() {
            let mapped = map_record(self.profile, record, context.action);
            let key = self.record_key(&mapped, index);
            let result = self.apply(mapped, context.action);

            match &result {
                Ok(outcome) => debug!(
                    kind = %self.kind(),
                    system = %self.system(),
                    %key,
                    ?outcome,
                    "record reconciled"
                ),
                Err(error) => warn!(
                    kind = %self.kind(),
                    system = %self.system(),
                    %key,
                    %error,
                    "record skipped"
                ),
            }
            summary.tally(key, result);
        }

        info!(
            kind = %self.kind(),
            system = %self.system(),
            action = context.action.label(),
            total = summary.total,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "batch reconciled"
        );
        summary
    }

    pub fn reconcile_record(
        &self,
        record: &ExternalRecord,
        action: InboundAction,
    ) -> Result<RecordOutcome, RecordFailure> {
        let mapped = map_record(self.profile, record, action);
        self.apply(mapped, action)
    }

    fn apply(
        &self,
        mapped: MappedRecord,
        action: InboundAction,
    ) -> Result<RecordOutcome, RecordFailure> {
        match action {
            InboundAction::Delete => self.deactivate(mapped),
            InboundAction::Create | InboundAction::Update => self.upsert(mapped),
        }
    }

    fn deactivate(&self, mapped: MappedRecord) -> Result<RecordOutcome, RecordFailure> {
        let reference = mapped
            .external_ref
            .ok_or(MappingError::DeleteWithoutExternalId)?;
        let touched = self.store.update_many(
            self.kind(),
            &Criteria::ExternalRef(reference.clone()),
            EntityChange::Deactivate,
        )?;

        if touched == 0 {
            Ok(RecordOutcome::Skipped(format!(
                "no local {} claims {reference}",
                self.kind()
            )))
        } else {
            Ok(RecordOutcome::Deactivated(touched))
        }
    }

    fn upsert(&self, mapped: MappedRecord) -> Result<RecordOutcome, RecordFailure> {
        let identified = mapped.external_ref.is_some()
            || self
                .profile
                .identity_fields
                .iter()
                .any(|field| mapped.text(field).is_some());
        if !identified {
            return Err(MappingError::MissingIdentity {
                expected: self.profile.identity_fields.join(", "),
            }
            .into());
        }

        let resolution = resolve(
            self.store.as_ref(),
            self.kind(),
            self.profile.match_key,
            &mapped,
        )?;

        match resolution {
            Resolution::Unique { entity, strategy } => {
                debug!(kind = %self.kind(), id = %entity.id, %strategy, "matched existing entity");
                let mut fields = mapped.fields;
                derive_name(&mut fields, Some(&entity.fields), false);
                let patch = EntityPatch {
                    active: self.activation(&fields),
                    external_ref: mapped.external_ref,
                    fields,
                };
                let updated = self.store.update(&entity.id, patch)?;
                Ok(RecordOutcome::Updated(updated.id))
            }
            Resolution::Ambiguous {
                strategy,
                candidates,
            } => Err(MappingError::Ambiguous {
                strategy,
                candidates,
            }
            .into()),
            Resolution::NotFound => {
                let mut fields = mapped.fields;
                derive_name(&mut fields, None, true);
                apply_defaults(self.profile, &mut fields);
                let patch = EntityPatch {
                    active: self.activation(&fields),
                    external_ref: None,
                    fields,
                };

                match mapped.external_ref {
                    Some(reference) => {
                        let (entity, created) =
                            self.store.upsert_by_ref(self.kind(), &reference, patch)?;
                        if created {
                            Ok(RecordOutcome::Created(entity.id))
                        } else {
                            Ok(RecordOutcome::Updated(entity.id))
                        }
                    }
                    None => {
                        let entity = self.store.create(self.kind(), patch)?;
                        Ok(RecordOutcome::Created(entity.id))
                    }
                }
            }
        }
    }

    /// `Some(false)` when a terminal value is present, `Some(true)` when a
    /// lifecycle field is present with any other value.
    fn activation(&self, fields: &Map<String, Value>) -> Option<bool> {
        let mut verdict = None;
        for (field, terminal) in self.profile.terminal_values {
            let text = match fields.get(*field) {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Bool(flag)) => flag.to_string(),
                _ => continue,
            };
            if text == *terminal {
                return Some(false);
            }
            verdict = Some(true);
        }
        verdict
    }

    fn record_key(&self, mapped: &MappedRecord, index: usize) -> String {
        if let Some(reference) = &mapped.external_ref {
            return reference.to_string();
        }
        self.profile
            .identity_fields
            .iter()
            .find_map(|field| mapped.text(field))
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{index}"))
    }
}
