use super::{Criteria, EntityChange, EntityPatch, EntityStore, StoreError};
use crate::domain::{EntityId, EntityKind, ExternalRef, LocalEntity};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// In-process entity table. One lock guards the table so every write is a
/// single critical section.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    inner: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    entities: BTreeMap<EntityId, LocalEntity>,
    sequences: HashMap<EntityKind, u64>,
}

impl Tables {
    fn next_id(&mut self, kind: EntityKind) -> EntityId {
        let sequence = self.sequences.entry(kind).or_insert(0);
        *sequence += 1;
        EntityId(format!("{}-{:06}", kind.id_prefix(), sequence))
    }

    fn owner_of(&self, kind: EntityKind, reference: &ExternalRef) -> Option<&EntityId> {
        self.entities
            .values()
            .find(|entity| entity.kind == kind && entity.claims(reference))
            .map(|entity| &entity.id)
    }

    fn ensure_unclaimed(
        &self,
        kind: EntityKind,
        reference: &ExternalRef,
        claimant: Option<&EntityId>,
    ) -> Result<(), StoreError> {
        match self.owner_of(kind, reference) {
            Some(owner) if Some(owner) != claimant => Err(StoreError::DuplicateExternalRef {
                reference: reference.clone(),
                owner: owner.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn insert(&mut self, kind: EntityKind, patch: EntityPatch) -> Result<LocalEntity, StoreError> {
        if let Some(reference) = &patch.external_ref {
            self.ensure_unclaimed(kind, reference, None)?;
        }

        let now = Utc::now();
        let id = self.next_id(kind);
        let mut entity = LocalEntity {
            id: id.clone(),
            kind,
            external_refs: BTreeMap::new(),
            fields: patch.fields,
            active: patch.active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        if let Some(reference) = patch.external_ref {
            entity
                .external_refs
                .insert(reference.system, reference.external_id);
        }

        self.entities.insert(id, entity.clone());
        Ok(entity)
    }

    fn apply(&mut self, id: &EntityId, patch: EntityPatch) -> Result<LocalEntity, StoreError> {
        let kind = self
            .entities
            .get(id)
            .map(|entity| entity.kind)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if let Some(reference) = &patch.external_ref {
            self.ensure_unclaimed(kind, reference, Some(id))?;
        }

        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if let Some(reference) = patch.external_ref {
            entity
                .external_refs
                .insert(reference.system, reference.external_id);
        }
        entity.fields.extend(patch.fields);
        if let Some(active) = patch.active {
            entity.active = active;
        }
        entity.updated_at = Utc::now();
        Ok(entity.clone())
    }
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored entity of `kind`, in creation order.
    pub fn all(&self, kind: EntityKind) -> Result<Vec<LocalEntity>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .entities
            .values()
            .filter(|entity| entity.kind == kind)
            .cloned()
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("entity table lock poisoned".to_string()))
    }
}

impl EntityStore for MemoryEntityStore {
    fn find_first(
        &self,
        kind: EntityKind,
        criteria: &Criteria,
    ) -> Result<Option<LocalEntity>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .entities
            .values()
            .find(|entity| entity.kind == kind && criteria.matches(entity))
            .cloned())
    }

    fn find_many(
        &self,
        kind: EntityKind,
        criteria: &Criteria,
        limit: usize,
    ) -> Result<Vec<LocalEntity>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .entities
            .values()
            .filter(|entity| entity.kind == kind && criteria.matches(entity))
            .take(limit)
            .cloned()
            .collect())
    }

    fn create(&self, kind: EntityKind, patch: EntityPatch) -> Result<LocalEntity, StoreError> {
        self.lock()?.insert(kind, patch)
    }

    fn update(&self, id: &EntityId, patch: EntityPatch) -> Result<LocalEntity, StoreError> {
        self.lock()?.apply(id, patch)
    }

    fn upsert_by_ref(
        &self,
        kind: EntityKind,
        reference: &ExternalRef,
        patch: EntityPatch,
    ) -> Result<(LocalEntity, bool), StoreError> {
        let mut tables = self.lock()?;
        let patch = EntityPatch {
            external_ref: Some(reference.clone()),
            ..patch
        };
        match tables.owner_of(kind, reference).cloned() {
            Some(owner) => Ok((tables.apply(&owner, patch)?, false)),
            None => Ok((tables.insert(kind, patch)?, true)),
        }
    }

    fn update_many(
        &self,
        kind: EntityKind,
        criteria: &Criteria,
        change: EntityChange,
    ) -> Result<usize, StoreError> {
        let mut tables = self.lock()?;
        let active = matches!(change, EntityChange::Reactivate);
        let now = Utc::now();
        let mut touched = 0;
        for entity in tables.entities.values_mut() {
            if entity.kind == kind && criteria.matches(entity) {
                entity.active = active;
                entity.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn count(&self, kind: EntityKind, criteria: &Criteria) -> Result<usize, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .entities
            .values()
            .filter(|entity| entity.kind == kind && criteria.matches(entity))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceSystem;
    use serde_json::json;

    fn patch(reference: Option<ExternalRef>, name: &str) -> EntityPatch {
        let mut fields = serde_json::Map::new();
        fields.insert("name".to_string(), json!(name));
        EntityPatch {
            external_ref: reference,
            fields,
            active: None,
        }
    }

    #[test]
    fn create_assigns_prefixed_sequential_ids() {
        let store = MemoryEntityStore::new();
        let first = store
            .create(EntityKind::Agent, patch(None, "Jo Park"))
            .expect("create");
        let second = store
            .create(EntityKind::Listing, patch(None, "12 Elm St"))
            .expect("create");
        assert_eq!(first.id.0, "agt-000001");
        assert_eq!(second.id.0, "lst-000001");
        assert!(first.active);
    }

    #[test]
    fn external_ref_can_only_be_claimed_once() {
        let store = MemoryEntityStore::new();
        let reference = ExternalRef::new(SourceSystem::Rezen, "a-1");
        let owner = store
            .create(EntityKind::Agent, patch(Some(reference.clone()), "Jo Park"))
            .expect("create");
        let other = store
            .create(EntityKind::Agent, patch(None, "Sam Lee"))
            .expect("create");

        match store.update(&other.id, patch(Some(reference.clone()), "Sam Lee")) {
            Err(StoreError::DuplicateExternalRef { owner: claimed, .. }) => {
                assert_eq!(claimed, owner.id)
            }
            other => panic!("expected duplicate ref error, got {other:?}"),
        }
    }

    #[test]
    fn upsert_by_ref_updates_existing_claimant() {
        let store = MemoryEntityStore::new();
        let reference = ExternalRef::new(SourceSystem::Zoho, "z-9");
        let (created, was_created) = store
            .upsert_by_ref(EntityKind::Agent, &reference, patch(None, "Jo Park"))
            .expect("upsert");
        let (updated, was_created_again) = store
            .upsert_by_ref(EntityKind::Agent, &reference, patch(None, "Joanne Park"))
            .expect("upsert");

        assert!(was_created);
        assert!(!was_created_again);
        assert_eq!(created.id, updated.id);
        assert_eq!(updated.text("name"), Some("Joanne Park"));
    }

    #[test]
    fn criteria_match_case_insensitively() {
        let store = MemoryEntityStore::new();
        store
            .create(EntityKind::Agent, patch(None, "Maria Lopez"))
            .expect("create");

        let exact = Criteria::field_equals("name", "maria LOPEZ");
        let contains = Criteria::field_contains("name", "LOP");
        let any = Criteria::Any(vec![Criteria::field_equals("name", "nobody"), contains]);
        assert_eq!(store.count(EntityKind::Agent, &exact).expect("count"), 1);
        assert_eq!(store.count(EntityKind::Agent, &any).expect("count"), 1);
        assert_eq!(
            store
                .count(EntityKind::Agent, &Criteria::field_contains("name", "  "))
                .expect("count"),
            0
        );
    }

    #[test]
    fn update_many_deactivates_without_removing_rows() {
        let store = MemoryEntityStore::new();
        let reference = ExternalRef::new(SourceSystem::Rezen, "l-1");
        store
            .create(EntityKind::Listing, patch(Some(reference.clone()), "1 Main"))
            .expect("create");

        let touched = store
            .update_many(
                EntityKind::Listing,
                &Criteria::ExternalRef(reference),
                EntityChange::Deactivate,
            )
            .expect("update many");
        assert_eq!(touched, 1);
        let rows = store.all(EntityKind::Listing).expect("all");
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].active);
    }
}
