use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{
    EvalError, Formula, FormulaOutput, ReturnType, ValidationError, MAX_CURRENCY_PRECISION,
};
use crate::domain::EntityKind;

/// A named, versioned derived-value definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaField {
    pub id: String,
    pub entity_type: EntityKind,
    pub field_name: String,
    pub display_name: String,
    pub expression: String,
    pub return_type: ReturnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    pub active: bool,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFormulaField {
    pub entity_type: EntityKind,
    pub field_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub expression: String,
    pub return_type: ReturnType,
    #[serde(default)]
    pub precision: Option<u32>,
}

/// Partial edit; absent parts keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaFieldEdit {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub return_type: Option<ReturnType>,
    #[serde(default)]
    pub precision: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaRegistryError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("field name must not be empty")]
    EmptyName,
    #[error("precision {0} is outside 0 to {max}", max = MAX_CURRENCY_PRECISION)]
    Precision(u32),
    #[error("an active formula already defines {entity_type}.{field_name}")]
    Duplicate {
        entity_type: EntityKind,
        field_name: String,
    },
    #[error("formula field {0} not found")]
    NotFound(String),
    #[error("formula field {0} is inactive")]
    Inactive(String),
    #[error("formula registry unavailable: {0}")]
    Unavailable(String),
}

/// One evaluated field from [`FormulaRegistry::compute`].
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedField {
    pub field_name: String,
    pub outcome: Result<FormulaOutput, EvalError>,
}

/// In-process store of formula definitions.
///
/// Definitions are never removed; deactivation keeps them for provenance, and
/// `(entity_type, field_name)` is unique among active definitions only.
#[derive(Debug, Default)]
pub struct FormulaRegistry {
    fields: Mutex<BTreeMap<String, FormulaField>>,
    sequence: AtomicU64,
}

impl FormulaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("fml-{id:06}")
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, FormulaField>>, FormulaRegistryError> {
        self.fields
            .lock()
            .map_err(|_| FormulaRegistryError::Unavailable("lock poisoned".to_string()))
    }

    /// Validate, then store a new active definition at version 1.
    pub fn create(&self, new: NewFormulaField) -> Result<FormulaField, FormulaRegistryError> {
        let field_name = new.field_name.trim().to_string();
        if field_name.is_empty() {
            return Err(FormulaRegistryError::EmptyName);
        }
        Formula::parse(&new.expression)?;
        check_precision(new.precision)?;

        let mut fields = self.lock()?;
        let taken = fields.values().any(|existing| {
            existing.active
                && existing.entity_type == new.entity_type
                && existing.field_name.eq_ignore_ascii_case(&field_name)
        });
        if taken {
            return Err(FormulaRegistryError::Duplicate {
                entity_type: new.entity_type,
                field_name,
            });
        }

        let now = Utc::now();
        let field = FormulaField {
            id: self.next_id(),
            entity_type: new.entity_type,
            display_name: new
                .display_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| field_name.clone()),
            field_name,
            expression: new.expression.trim().to_string(),
            return_type: new.return_type,
            precision: new.precision,
            active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        fields.insert(field.id.clone(), field.clone());
        info!(id = %field.id, entity_type = %field.entity_type, field = %field.field_name, "formula field created");
        Ok(field)
    }

    /// Apply an edit to an active definition, re-validating and bumping the version.
    pub fn edit(&self, id: &str, edit: FormulaFieldEdit) -> Result<FormulaField, FormulaRegistryError> {
        if let Some(expression) = &edit.expression {
            Formula::parse(expression)?;
        }
        check_precision(edit.precision)?;

        let mut fields = self.lock()?;
        let field = fields
            .get_mut(id)
            .ok_or_else(|| FormulaRegistryError::NotFound(id.to_string()))?;
        if !field.active {
            return Err(FormulaRegistryError::Inactive(id.to_string()));
        }

        if let Some(display_name) = edit.display_name {
            field.display_name = display_name.trim().to_string();
        }
        if let Some(expression) = edit.expression {
            field.expression = expression.trim().to_string();
        }
        if let Some(return_type) = edit.return_type {
            field.return_type = return_type;
        }
        if edit.precision.is_some() {
            field.precision = edit.precision;
        }
        field.version += 1;
        field.updated_at = Utc::now();

        info!(id, version = field.version, "formula field edited");
        Ok(field.clone())
    }

    /// Idempotent; the definition stays readable.
    pub fn deactivate(&self, id: &str) -> Result<FormulaField, FormulaRegistryError> {
        let mut fields = self.lock()?;
        let field = fields
            .get_mut(id)
            .ok_or_else(|| FormulaRegistryError::NotFound(id.to_string()))?;
        if field.active {
            field.active = false;
            field.updated_at = Utc::now();
            info!(id, "formula field deactivated");
        }
        Ok(field.clone())
    }

    pub fn get(&self, id: &str) -> Result<Option<FormulaField>, FormulaRegistryError> {
        Ok(self.lock()?.get(id).cloned())
    }

    pub fn list(&self) -> Result<Vec<FormulaField>, FormulaRegistryError> {
        Ok(self.lock()?.values().cloned().collect())
    }

    /// Active definitions for one entity kind, ordered by field name.
    pub fn active_for(&self, kind: EntityKind) -> Result<Vec<FormulaField>, FormulaRegistryError> {
        let mut active: Vec<FormulaField> = self
            .lock()?
            .values()
            .filter(|field| field.active && field.entity_type == kind)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.field_name.cmp(&b.field_name));
        Ok(active)
    }

    /// Evaluate every active definition for `kind` against one entity's values.
    /// A failing field does not stop the others.
    pub fn compute(
        &self,
        kind: EntityKind,
        values: &Map<String, Value>,
    ) -> Result<Vec<ComputedField>, FormulaRegistryError> {
        let computed = self
            .active_for(kind)?
            .into_iter()
            .map(|field| {
                let outcome = Formula::parse(&field.expression)
                    .map_err(EvalError::from)
                    .and_then(|formula| formula.evaluate(values, field.return_type, field.precision));
                if let Err(error) = &outcome {
                    debug!(field = %field.field_name, %error, "formula field not computed");
                }
                ComputedField {
                    field_name: field.field_name,
                    outcome,
                }
            })
            .collect();
        Ok(computed)
    }
}

fn check_precision(precision: Option<u32>) -> Result<(), FormulaRegistryError> {
    match precision {
        Some(places) if places > MAX_CURRENCY_PRECISION => {
            Err(FormulaRegistryError::Precision(places))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn commission() -> NewFormulaField {
        NewFormulaField {
            entity_type: EntityKind::Transaction,
            field_name: "agent_commission".to_string(),
            display_name: Some("Agent Commission".to_string()),
            expression: "gross_commission * split / 100".to_string(),
            return_type: ReturnType::Currency,
            precision: None,
        }
    }

    #[test]
    fn create_rejects_invalid_expressions_without_saving() {
        let registry = FormulaRegistry::new();
        let error = registry
            .create(NewFormulaField {
                expression: "gross_commission * (split".to_string(),
                ..commission()
            })
            .expect_err("invalid");
        assert!(matches!(error, FormulaRegistryError::Invalid(_)));
        assert!(registry.list().expect("readable").is_empty());
    }

    #[test]
    fn precision_beyond_ten_places_is_rejected() {
        let registry = FormulaRegistry::new();
        let error = registry
            .create(NewFormulaField {
                precision: Some(11),
                ..commission()
            })
            .expect_err("out of range");
        assert_eq!(error, FormulaRegistryError::Precision(11));
        assert!(registry.list().expect("readable").is_empty());

        let field = registry
            .create(NewFormulaField {
                precision: Some(10),
                ..commission()
            })
            .expect("ten places is fine");
        let error = registry
            .edit(
                &field.id,
                FormulaFieldEdit {
                    precision: Some(400),
                    ..FormulaFieldEdit::default()
                },
            )
            .expect_err("out of range");
        assert_eq!(error, FormulaRegistryError::Precision(400));
        let stored = registry.get(&field.id).expect("readable").expect("present");
        assert_eq!((stored.precision, stored.version), (Some(10), 1));
    }

    #[test]
    fn active_names_are_unique_per_entity_type() {
        let registry = FormulaRegistry::new();
        let first = registry.create(commission()).expect("created");
        assert_eq!(first.id, "fml-000001");
        assert!(matches!(
            registry.create(commission()),
            Err(FormulaRegistryError::Duplicate { .. })
        ));

        registry
            .create(NewFormulaField {
                entity_type: EntityKind::CommissionPayment,
                ..commission()
            })
            .expect("other entity type is fine");

        registry.deactivate(&first.id).expect("deactivated");
        let replacement = registry.create(commission()).expect("name is free again");
        assert_ne!(replacement.id, first.id);
        assert_eq!(registry.list().expect("readable").len(), 3);
    }

    #[test]
    fn edit_bumps_version_and_revalidates() {
        let registry = FormulaRegistry::new();
        let field = registry.create(commission()).expect("created");

        let edited = registry
            .edit(
                &field.id,
                FormulaFieldEdit {
                    expression: Some("ROUND(gross_commission * split / 100, 0)".to_string()),
                    ..FormulaFieldEdit::default()
                },
            )
            .expect("edited");
        assert_eq!(edited.version, 2);
        assert_eq!(edited.display_name, "Agent Commission");

        let error = registry
            .edit(
                &field.id,
                FormulaFieldEdit {
                    expression: Some("NOPE(1)".to_string()),
                    ..FormulaFieldEdit::default()
                },
            )
            .expect_err("invalid edit");
        assert!(matches!(error, FormulaRegistryError::Invalid(_)));
        let stored = registry.get(&field.id).expect("readable").expect("present");
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn deactivated_fields_are_kept_but_not_computed() {
        let registry = FormulaRegistry::new();
        let field = registry.create(commission()).expect("created");
        registry.deactivate(&field.id).expect("deactivated");

        assert!(registry.active_for(EntityKind::Transaction).expect("readable").is_empty());
        assert!(!registry.get(&field.id).expect("readable").expect("kept").active);
        assert!(matches!(
            registry.edit(&field.id, FormulaFieldEdit::default()),
            Err(FormulaRegistryError::Inactive(_))
        ));
    }

    #[test]
    fn compute_evaluates_each_active_field_independently() {
        let registry = FormulaRegistry::new();
        registry.create(commission()).expect("created");
        registry
            .create(NewFormulaField {
                field_name: "broker_fee".to_string(),
                display_name: None,
                expression: "missing_field * 2".to_string(),
                return_type: ReturnType::Number,
                precision: None,
                entity_type: EntityKind::Transaction,
            })
            .expect("created");

        let computed = registry
            .compute(
                EntityKind::Transaction,
                json!({ "gross_commission": 15000, "split": 70 })
                    .as_object()
                    .expect("object"),
            )
            .expect("computed");

        assert_eq!(computed.len(), 2);
        assert_eq!(computed[0].field_name, "agent_commission");
        assert_eq!(
            computed[0].outcome,
            Ok(FormulaOutput::Currency {
                amount: 10500.0,
                precision: 2
            })
        );
        assert_eq!(
            computed[1].outcome,
            Err(EvalError::UnknownField("missing_field".to_string()))
        );
    }
}
