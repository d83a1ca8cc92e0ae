use super::mapping::MappedRecord;
use crate::domain::{EntityKind, LocalEntity};
use crate::store::{Criteria, EntityStore, StoreError};
use std::fmt;

/// Candidates fetched per strategy. Two are enough to detect ambiguity; the
/// rest leave room for candidates dropped by the ownership filter.
const CANDIDATE_SCAN_LIMIT: usize = 25;

/// One lookup in an ordered match key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    ExternalId,
    /// Case-insensitive equality on a local text field.
    Exact(&'static str),
    /// Case-insensitive substring on a local text field.
    Contains(&'static str),
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStrategy::ExternalId => write!(f, "external id"),
            MatchStrategy::Exact(field) => write!(f, "{field} (exact)"),
            MatchStrategy::Contains(field) => write!(f, "{field} (contains)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Unique {
        entity: LocalEntity,
        strategy: MatchStrategy,
    },
    /// No strategy produced a unique hit, but at least one produced several.
    Ambiguous {
        strategy: MatchStrategy,
        candidates: usize,
    },
    NotFound,
}

/// Walk the match key in order; the first strategy with exactly one
/// candidate wins.
pub(crate) fn resolve<S: EntityStore + ?Sized>(
    store: &S,
    kind: EntityKind,
    match_key: &[MatchStrategy],
    mapped: &MappedRecord,
) -> Result<Resolution, StoreError> {
    let mut first_ambiguity: Option<(MatchStrategy, usize)> = None;

    for strategy in match_key {
        let Some(criteria) = criteria_for(*strategy, mapped) else {
            continue;
        };

        let mut candidates = store.find_many(kind, &criteria, CANDIDATE_SCAN_LIMIT)?;
        if *strategy != MatchStrategy::ExternalId {
            candidates.retain(|candidate| !claims_other_id(candidate, mapped));
        }

        match candidates.len() {
            0 => continue,
            1 => {
                return Ok(Resolution::Unique {
                    entity: candidates.remove(0),
                    strategy: *strategy,
                })
            }
            count => {
                first_ambiguity.get_or_insert((*strategy, count));
            }
        }
    }

    Ok(match first_ambiguity {
        Some((strategy, candidates)) => Resolution::Ambiguous {
            strategy,
            candidates,
        },
        None => Resolution::NotFound,
    })
}

fn criteria_for(strategy: MatchStrategy, mapped: &MappedRecord) -> Option<Criteria> {
    match strategy {
        MatchStrategy::ExternalId => mapped.external_ref.clone().map(Criteria::ExternalRef),
        MatchStrategy::Exact(field) => mapped.text(field).map(|value| {
            Criteria::All(vec![
                Criteria::Active(true),
                Criteria::field_equals(field, value),
            ])
        }),
        MatchStrategy::Contains(field) => mapped.text(field).map(|value| {
            Criteria::All(vec![
                Criteria::Active(true),
                Criteria::field_contains(field, value),
            ])
        }),
    }
}

/// A candidate already correlated to a different id in the same system is a
/// different upstream record, whatever its name or email says.
fn claims_other_id(candidate: &LocalEntity, mapped: &MappedRecord) -> bool {
    match &mapped.external_ref {
        Some(reference) => candidate
            .external_id(reference.system)
            .is_some_and(|existing| existing != reference.external_id),
        None => false,
    }
}
