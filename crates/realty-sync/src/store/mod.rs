//! Persistent store boundary used by the reconciler and orchestrator.

mod memory;

pub use memory::MemoryEntityStore;

use crate::domain::{EntityId, EntityKind, ExternalRef, LocalEntity};
use serde_json::{Map, Value};

/// Lookup criteria understood by every store implementation.
///
/// Text comparisons are case-insensitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    ExternalRef(ExternalRef),
    FieldEquals { field: String, value: String },
    FieldContains { field: String, needle: String },
    Active(bool),
    Any(Vec<Criteria>),
    All(Vec<Criteria>),
}

impl Criteria {
    pub fn field_equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn field_contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::FieldContains {
            field: field.into(),
            needle: needle.into(),
        }
    }

    pub fn matches(&self, entity: &LocalEntity) -> bool {
        match self {
            Criteria::ExternalRef(reference) => entity.claims(reference),
            Criteria::FieldEquals { field, value } => entity
                .text(field)
                .is_some_and(|text| text.trim().eq_ignore_ascii_case(value.trim())),
            Criteria::FieldContains { field, needle } => {
                let needle = needle.trim().to_lowercase();
                !needle.is_empty()
                    && entity
                        .text(field)
                        .is_some_and(|text| text.to_lowercase().contains(&needle))
            }
            Criteria::Active(active) => entity.active == *active,
            Criteria::Any(options) => options.iter().any(|option| option.matches(entity)),
            Criteria::All(parts) => parts.iter().all(|part| part.matches(entity)),
        }
    }
}

/// Field values and correlation to apply in a single write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPatch {
    pub external_ref: Option<ExternalRef>,
    pub fields: Map<String, Value>,
    pub active: Option<bool>,
}

impl EntityPatch {
    pub fn is_empty(&self) -> bool {
        self.external_ref.is_none() && self.fields.is_empty() && self.active.is_none()
    }
}

/// Bulk state transition applied by `update_many`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityChange {
    Deactivate,
    Reactivate,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entity {0} not found")]
    NotFound(EntityId),
    #[error("external id {reference} is already claimed by {owner}")]
    DuplicateExternalRef {
        reference: ExternalRef,
        owner: EntityId,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction so reconciliation can be exercised in isolation.
///
/// Each write method must be atomic on its own; callers never rely on a
/// lookup staying valid until the write.
pub trait EntityStore: Send + Sync {
    fn find_first(
        &self,
        kind: EntityKind,
        criteria: &Criteria,
    ) -> Result<Option<LocalEntity>, StoreError>;

    fn find_many(
        &self,
        kind: EntityKind,
        criteria: &Criteria,
        limit: usize,
    ) -> Result<Vec<LocalEntity>, StoreError>;

    fn create(&self, kind: EntityKind, patch: EntityPatch) -> Result<LocalEntity, StoreError>;

    fn update(&self, id: &EntityId, patch: EntityPatch) -> Result<LocalEntity, StoreError>;

    /// Update the entity claiming `reference`, or create it when none does.
    /// Returns the stored entity and whether it was created.
    fn upsert_by_ref(
        &self,
        kind: EntityKind,
        reference: &ExternalRef,
        patch: EntityPatch,
    ) -> Result<(LocalEntity, bool), StoreError>;

    fn update_many(
        &self,
        kind: EntityKind,
        criteria: &Criteria,
        change: EntityChange,
    ) -> Result<usize, StoreError>;

    fn count(&self, kind: EntityKind, criteria: &Criteria) -> Result<usize, StoreError>;
}
