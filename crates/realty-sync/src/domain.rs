use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Field-name → value mapping exactly as retrieved from an upstream system.
pub type ExternalRecord = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Agent,
    Listing,
    Transaction,
    CommissionPayment,
}

impl EntityKind {
    pub const fn ordered() -> [Self; 4] {
        [
            Self::Agent,
            Self::Listing,
            Self::Transaction,
            Self::CommissionPayment,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Listing => "listing",
            Self::Transaction => "transaction",
            Self::CommissionPayment => "commission_payment",
        }
    }

    pub(crate) const fn id_prefix(self) -> &'static str {
        match self {
            Self::Agent => "agt",
            Self::Listing => "lst",
            Self::Transaction => "txn",
            Self::CommissionPayment => "pay",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "agent" | "agents" => Ok(Self::Agent),
            "listing" | "listings" => Ok(Self::Listing),
            "transaction" | "transactions" => Ok(Self::Transaction),
            "commission_payment" | "commission_payments" | "payment" | "payments" => {
                Ok(Self::CommissionPayment)
            }
            _ => Err(UnknownVariant {
                kind: "entity kind",
                value: value.to_string(),
            }),
        }
    }
}

/// Upstream systems of record the hub reconciles against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    Rezen,
    Zoho,
    Quickbooks,
}

impl SourceSystem {
    pub const fn ordered() -> [Self; 3] {
        [Self::Rezen, Self::Zoho, Self::Quickbooks]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Rezen => "rezen",
            Self::Zoho => "zoho",
            Self::Quickbooks => "quickbooks",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SourceSystem {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rezen" | "real" => Ok(Self::Rezen),
            "zoho" | "zoho_crm" => Ok(Self::Zoho),
            "quickbooks" | "qbo" | "qb" => Ok(Self::Quickbooks),
            _ => Err(UnknownVariant {
                kind: "source system",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// An `externalId@system` correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalRef {
    pub system: SourceSystem,
    pub external_id: String,
}

impl ExternalRef {
    pub fn new(system: SourceSystem, external_id: impl Into<String>) -> Self {
        Self {
            system,
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.external_id, self.system)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inbound change signalled by a fetch or webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundAction {
    Create,
    #[default]
    Update,
    Delete,
}

impl InboundAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for InboundAction {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" | "created" | "insert" => Ok(Self::Create),
            "update" | "updated" | "edit" => Ok(Self::Update),
            "delete" | "deleted" | "remove" => Ok(Self::Delete),
            _ => Err(UnknownVariant {
                kind: "inbound action",
                value: value.to_string(),
            }),
        }
    }
}

/// Locally persisted agent, listing, transaction or commission payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub external_refs: BTreeMap<SourceSystem, String>,
    pub fields: Map<String, Value>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalEntity {
    pub fn external_id(&self, system: SourceSystem) -> Option<&str> {
        self.external_refs.get(&system).map(String::as_str)
    }

    pub fn claims(&self, reference: &ExternalRef) -> bool {
        self.external_id(reference.system) == Some(reference.external_id.as_str())
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_systems_parse_loosely() {
        assert_eq!("Commission-Payments".parse(), Ok(EntityKind::CommissionPayment));
        assert_eq!(" agents ".parse(), Ok(EntityKind::Agent));
        assert_eq!("QBO".parse(), Ok(SourceSystem::Quickbooks));
        assert!("salesforce".parse::<SourceSystem>().is_err());
    }

    #[test]
    fn external_ref_displays_as_id_at_system() {
        let reference = ExternalRef::new(SourceSystem::Zoho, "4876000000123");
        assert_eq!(reference.to_string(), "4876000000123@zoho");
    }
}
