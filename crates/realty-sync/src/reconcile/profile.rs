use super::mapping::{external_id, field, EnumTable, FieldMapping, Transform};
use super::matching::MatchStrategy;
use super::ReconcileError;
use crate::domain::{EntityKind, ExternalRecord, SourceSystem};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Everything the reconciler needs to know about one `(kind, system)` pair.
#[derive(Debug)]
pub struct EntityProfile {
    pub kind: EntityKind,
    pub system: SourceSystem,
    pub external_id_field: &'static str,
    pub fields: &'static [FieldMapping],
    /// Fixed values applied when a record is inserted.
    pub defaults: &'static [(&'static str, &'static str)],
    /// Local fields that can identify a record lacking an external id.
    pub identity_fields: &'static [&'static str],
    pub match_key: &'static [MatchStrategy],
    /// `(field, value)` pairs that soft-deactivate the entity.
    pub terminal_values: &'static [(&'static str, &'static str)],
}

impl EntityProfile {
    /// Upstream id of a raw record, as used for detail fetches and matching.
    pub fn external_id_of(&self, record: &ExternalRecord) -> Option<String> {
        external_id(self, record)
    }
}

static PROFILES: OnceLock<HashMap<(EntityKind, SourceSystem), EntityProfile>> = OnceLock::new();

pub fn profile_for(
    kind: EntityKind,
    system: SourceSystem,
) -> Result<&'static EntityProfile, ReconcileError> {
    profiles()
        .get(&(kind, system))
        .ok_or(ReconcileError::UnsupportedSource { kind, system })
}

fn profiles() -> &'static HashMap<(EntityKind, SourceSystem), EntityProfile> {
    PROFILES.get_or_init(|| {
        let all = [
            agent(SourceSystem::Rezen, "id", REZEN_AGENT, &[]),
            agent(SourceSystem::Zoho, "id", ZOHO_AGENT, &[]),
            agent(SourceSystem::Quickbooks, "Id", QUICKBOOKS_VENDOR, &[]),
            listing(SourceSystem::Rezen, REZEN_LISTING),
            listing(SourceSystem::Zoho, ZOHO_LISTING),
            transaction(SourceSystem::Rezen, "id", REZEN_TRANSACTION),
            transaction(SourceSystem::Zoho, "id", ZOHO_DEAL),
            transaction(SourceSystem::Quickbooks, "Id", QUICKBOOKS_INVOICE),
            payment(SourceSystem::Rezen, "id", REZEN_PAYMENT, &[]),
            payment(
                SourceSystem::Quickbooks,
                "Id",
                QUICKBOOKS_BILL_PAYMENT,
                &[("direction", "outgoing"), ("status", "paid")],
            ),
        ];

        all.into_iter()
            .map(|profile| ((profile.kind, profile.system), profile))
            .collect()
    })
}

fn agent(
    system: SourceSystem,
    external_id_field: &'static str,
    fields: &'static [FieldMapping],
    defaults: &'static [(&'static str, &'static str)],
) -> EntityProfile {
    EntityProfile {
        kind: EntityKind::Agent,
        system,
        external_id_field,
        fields,
        defaults,
        identity_fields: &["name", "email"],
        match_key: AGENT_MATCH_KEY,
        terminal_values: &[("status", "inactive"), ("accounting_active", "false")],
    }
}

fn listing(system: SourceSystem, fields: &'static [FieldMapping]) -> EntityProfile {
    EntityProfile {
        kind: EntityKind::Listing,
        system,
        external_id_field: "id",
        fields,
        defaults: &[],
        identity_fields: &["name", "address", "mls_number"],
        match_key: LISTING_MATCH_KEY,
        terminal_values: &[],
    }
}

fn transaction(
    system: SourceSystem,
    external_id_field: &'static str,
    fields: &'static [FieldMapping],
) -> EntityProfile {
    EntityProfile {
        kind: EntityKind::Transaction,
        system,
        external_id_field,
        fields,
        defaults: &[],
        identity_fields: &["name", "transaction_code", "address"],
        match_key: TRANSACTION_MATCH_KEY,
        terminal_values: &[("stage", "terminated")],
    }
}

fn payment(
    system: SourceSystem,
    external_id_field: &'static str,
    fields: &'static [FieldMapping],
    defaults: &'static [(&'static str, &'static str)],
) -> EntityProfile {
    EntityProfile {
        kind: EntityKind::CommissionPayment,
        system,
        external_id_field,
        fields,
        defaults,
        identity_fields: &["reference_number"],
        match_key: PAYMENT_MATCH_KEY,
        terminal_values: &[("status", "void")],
    }
}

static AGENT_MATCH_KEY: &[MatchStrategy] = &[
    MatchStrategy::ExternalId,
    MatchStrategy::Exact("email"),
    MatchStrategy::Exact("name"),
    MatchStrategy::Contains("name"),
];

static LISTING_MATCH_KEY: &[MatchStrategy] = &[
    MatchStrategy::ExternalId,
    MatchStrategy::Exact("mls_number"),
    MatchStrategy::Exact("address"),
    MatchStrategy::Contains("address"),
];

static TRANSACTION_MATCH_KEY: &[MatchStrategy] = &[
    MatchStrategy::ExternalId,
    MatchStrategy::Exact("transaction_code"),
    MatchStrategy::Exact("address"),
];

static PAYMENT_MATCH_KEY: &[MatchStrategy] = &[
    MatchStrategy::ExternalId,
    MatchStrategy::Exact("reference_number"),
];

pub(crate) static AGENT_STATUS: EnumTable = EnumTable {
    name: "agent status",
    entries: &[
        ("active", "active"),
        ("approved", "active"),
        ("candidate", "onboarding"),
        ("pending", "onboarding"),
        ("onboarding", "onboarding"),
        ("inactive", "inactive"),
        ("terminated", "inactive"),
        ("rejected", "inactive"),
    ],
    default: "active",
};

pub(crate) static DIRECTOR_TYPE: EnumTable = EnumTable {
    name: "director type",
    entries: &[
        ("managing director", "managing"),
        ("managing", "managing"),
        ("regional director", "regional"),
        ("regional", "regional"),
        ("team leader", "team_leader"),
        ("none", "none"),
    ],
    default: "none",
};

pub(crate) static LISTING_STAGE: EnumTable = EnumTable {
    name: "listing stage",
    entries: &[
        ("coming soon", "coming_soon"),
        ("active", "active"),
        ("new", "active"),
        ("under contract", "under_contract"),
        ("pending", "under_contract"),
        ("contingent", "under_contract"),
        ("sold", "closed"),
        ("closed", "closed"),
        ("withdrawn", "withdrawn"),
        ("cancelled", "withdrawn"),
        ("expired", "expired"),
    ],
    default: "draft",
};

pub(crate) static TRANSACTION_STAGE: EnumTable = EnumTable {
    name: "transaction stage",
    entries: &[
        ("new", "open"),
        ("open", "open"),
        ("in progress", "open"),
        ("qualification", "open"),
        ("needs analysis", "open"),
        ("under contract", "under_contract"),
        ("approved for closing", "closing"),
        ("closing", "closing"),
        ("closed", "closed"),
        ("closed won", "closed"),
        ("settled", "closed"),
        ("terminated", "terminated"),
        ("cancelled", "terminated"),
        ("closed lost", "terminated"),
    ],
    default: "open",
};

pub(crate) static PAYMENT_STATUS: EnumTable = EnumTable {
    name: "payment status",
    entries: &[
        ("paid", "paid"),
        ("completed", "paid"),
        ("pending", "pending"),
        ("scheduled", "pending"),
        ("processing", "pending"),
        ("failed", "failed"),
        ("rejected", "failed"),
        ("void", "void"),
        ("voided", "void"),
        ("reversed", "void"),
    ],
    default: "pending",
};

pub(crate) static PAYMENT_DIRECTION: EnumTable = EnumTable {
    name: "payment direction",
    entries: &[
        ("incoming", "incoming"),
        ("inbound", "incoming"),
        ("credit", "incoming"),
        ("outgoing", "outgoing"),
        ("outbound", "outgoing"),
        ("debit", "outgoing"),
    ],
    default: "outgoing",
};

static REZEN_AGENT: &[FieldMapping] = &[
    field("displayName", "name", Transform::Text),
    field("firstName", "first_name", Transform::Text),
    field("lastName", "last_name", Transform::Text),
    field("emailAddress", "email", Transform::Email),
    field("email", "email", Transform::Email),
    field("phoneNumber", "phone", Transform::Text),
    field("agentStatus", "status", Transform::Enum(&AGENT_STATUS)),
    field("status", "status", Transform::Enum(&AGENT_STATUS)),
    field("licenseNumber", "license_number", Transform::Text),
    field("joinDate", "joined_on", Transform::Date),
];

static ZOHO_AGENT: &[FieldMapping] = &[
    field("Full_Name", "name", Transform::Text),
    field("First_Name", "first_name", Transform::Text),
    field("Last_Name", "last_name", Transform::Text),
    field("Email", "email", Transform::Email),
    field("Phone", "phone", Transform::Text),
    field("Agent_Status", "status", Transform::Enum(&AGENT_STATUS)),
    field("Director_Type", "director_type", Transform::Enum(&DIRECTOR_TYPE)),
    field("License_Number", "license_number", Transform::Text),
    field("Join_Date", "joined_on", Transform::Date),
];

static QUICKBOOKS_VENDOR: &[FieldMapping] = &[
    field("DisplayName", "name", Transform::Text),
    field("GivenName", "first_name", Transform::Text),
    field("FamilyName", "last_name", Transform::Text),
    field("PrimaryEmailAddr.Address", "email", Transform::Email),
    field("PrimaryPhone.FreeFormNumber", "phone", Transform::Text),
    field("Active", "accounting_active", Transform::Flag),
    field("Balance", "accounting_balance", Transform::Currency),
];

static REZEN_LISTING: &[FieldMapping] = &[
    field("title", "name", Transform::Text),
    field("address.oneLine", "address", Transform::Text),
    field("listPrice", "list_price", Transform::Currency),
    field("listingStatus", "stage", Transform::Enum(&LISTING_STAGE)),
    field("status", "stage", Transform::Enum(&LISTING_STAGE)),
    field("mlsNumber", "mls_number", Transform::Text),
    field("listingAgentId", "agent_external_id", Transform::Text),
    field("listingDate", "listed_on", Transform::Date),
    field("expirationDate", "expires_on", Transform::Date),
    field("bedrooms", "bedrooms", Transform::Number),
];

static ZOHO_LISTING: &[FieldMapping] = &[
    field("Listing_Name", "name", Transform::Text),
    field("Address", "address", Transform::Text),
    field("List_Price", "list_price", Transform::Currency),
    field("Listing_Status", "stage", Transform::Enum(&LISTING_STAGE)),
    field("MLS_Number", "mls_number", Transform::Text),
    field("Listing_Date", "listed_on", Transform::Date),
    field("Agent.id", "agent_external_id", Transform::Text),
];

static REZEN_TRANSACTION: &[FieldMapping] = &[
    field("code", "transaction_code", Transform::Text),
    field("address.oneLine", "address", Transform::Text),
    field("salePrice.amount", "sale_price", Transform::Currency),
    field("price.amount", "sale_price", Transform::Currency),
    field("lifecycleState.state", "stage", Transform::Enum(&TRANSACTION_STAGE)),
    field("grossCommission.amount", "gross_commission", Transform::Currency),
    field("closingDateEstimated", "expected_close_on", Transform::Date),
    field("closedAt", "closed_on", Transform::Date),
    field("listingId", "listing_external_id", Transform::Text),
    field("transactionType", "transaction_type", Transform::Text),
];

static ZOHO_DEAL: &[FieldMapping] = &[
    field("Deal_Name", "name", Transform::Text),
    field("Transaction_Code", "transaction_code", Transform::Text),
    field("Property_Address", "address", Transform::Text),
    field("Stage", "stage", Transform::Enum(&TRANSACTION_STAGE)),
    field("Amount", "sale_price", Transform::Currency),
    field("Gross_Commission", "gross_commission", Transform::Currency),
    field("Closing_Date", "expected_close_on", Transform::Date),
];

static QUICKBOOKS_INVOICE: &[FieldMapping] = &[
    field("DocNumber", "transaction_code", Transform::Text),
    field("CustomerRef.name", "name", Transform::Text),
    field("ShipAddr.Line1", "address", Transform::Text),
    field("TotalAmt", "gross_commission", Transform::Currency),
    field("Balance", "balance_due", Transform::Currency),
    field("TxnDate", "invoiced_on", Transform::Date),
];

static REZEN_PAYMENT: &[FieldMapping] = &[
    field("reference", "reference_number", Transform::Text),
    field("transactionId", "transaction_external_id", Transform::Text),
    field("payeeId", "agent_external_id", Transform::Text),
    field("payeeName", "payee_name", Transform::Text),
    field("amount.amount", "amount", Transform::Currency),
    field("paymentStatus", "status", Transform::Enum(&PAYMENT_STATUS)),
    field("direction", "direction", Transform::Enum(&PAYMENT_DIRECTION)),
    field("paidAt", "paid_on", Transform::Date),
];

static QUICKBOOKS_BILL_PAYMENT: &[FieldMapping] = &[
    field("DocNumber", "reference_number", Transform::Text),
    field("VendorRef.value", "agent_external_id", Transform::Text),
    field("VendorRef.name", "payee_name", Transform::Text),
    field("TotalAmt", "amount", Transform::Currency),
    field("TxnDate", "paid_on", Transform::Date),
    field("PayType", "payment_method", Transform::Text),
    field("PrivateNote", "memo", Transform::Text),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_at_least_one_source() {
        for kind in EntityKind::ordered() {
            assert!(
                SourceSystem::ordered()
                    .iter()
                    .any(|system| profile_for(kind, *system).is_ok()),
                "{kind} has no mapping"
            );
        }
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        assert_eq!(
            profile_for(EntityKind::Listing, SourceSystem::Quickbooks).err(),
            Some(ReconcileError::UnsupportedSource {
                kind: EntityKind::Listing,
                system: SourceSystem::Quickbooks,
            })
        );
    }

    #[test]
    fn match_keys_lead_with_external_id() {
        for ((kind, system), profile) in profiles() {
            assert_eq!(
                profile.match_key.first(),
                Some(&MatchStrategy::ExternalId),
                "{kind} from {system}"
            );
        }
    }
}
