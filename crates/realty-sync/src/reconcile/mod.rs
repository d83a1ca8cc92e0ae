//! Create / update / no-op decisions for externally observed records.
//!
//! One [`Reconciler`] is built per `(entity kind, source system)` pair. It maps
//! each record through that pair's field table, resolves an existing entity via
//! the kind's match key and commits a single atomic write.

mod mapping;
mod matching;
mod normalizer;
mod profile;
mod reconciler;

#[cfg(test)]
mod tests;

pub(crate) use mapping::parse_date;
pub use mapping::{EnumTable, FieldMapping, MappedRecord, Transform};
pub use matching::{MatchStrategy, Resolution};
pub use profile::{profile_for, EntityProfile};
pub use reconciler::{ReconcileContext, Reconciler, RecordOutcome};

use crate::domain::{EntityKind, SourceSystem};
use crate::store::StoreError;
use serde::{Deserialize, Serialize};

/// Aggregate result of reconciling a batch of records.
///
/// This shape is what route handlers and CLI tooling serialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<RecordError>,
}

impl BatchSummary {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Fold another batch's counts into this one.
    pub fn absorb(&mut self, other: BatchSummary) {
        self.total += other.total;
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }

    pub(crate) fn tally(&mut self, key: String, result: Result<RecordOutcome, RecordFailure>) {
        self.total += 1;
        match result {
            Ok(RecordOutcome::Created(_)) => self.created += 1,
            Ok(RecordOutcome::Updated(_)) | Ok(RecordOutcome::Deactivated(_)) => {
                self.updated += 1
            }
            Ok(RecordOutcome::Skipped(_)) => self.skipped += 1,
            Err(failure) => {
                self.skipped += 1;
                self.errors.push(RecordError {
                    key,
                    message: failure.to_string(),
                });
            }
        }
    }
}

/// Identifying key and message for a record that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub key: String,
    pub message: String,
}

/// Record could not be matched to exactly one entity, or lacks identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("record has no external id and no identifying fields ({expected})")]
    MissingIdentity { expected: String },
    #[error("delete requires an external id")]
    DeleteWithoutExternalId,
    #[error("ambiguous match: {candidates} entities matched by {strategy}, none uniquely")]
    Ambiguous {
        strategy: MatchStrategy,
        candidates: usize,
    },
}

/// Per-record failure, always downgraded to a skipped count by the batch.
#[derive(Debug, thiserror::Error)]
pub enum RecordFailure {
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("no field mapping for {kind} records from {system}")]
    UnsupportedSource {
        kind: EntityKind,
        system: SourceSystem,
    },
}
