use std::sync::Arc;

use serde_json::json;

use super::common::*;
use crate::domain::{EntityKind, InboundAction, SourceSystem};
use crate::reconcile::{RecordOutcome, ReconcileError, Reconciler};
use crate::store::MemoryEntityStore;

#[test]
fn reconciling_the_same_record_twice_creates_then_updates() {
    let store = Arc::new(MemoryEntityStore::new());
    let reconciler = reconciler(&store, EntityKind::Agent, SourceSystem::Rezen);
    let payload = rezen_agent("rz-100", "Dana Whitfield", "Dana@Example.com");

    let first = run(&reconciler, InboundAction::Update, vec![payload.clone()]);
    let after_first = agents(&store);
    let second = run(&reconciler, InboundAction::Update, vec![payload]);
    let after_second = agents(&store);

    assert_eq!((first.created, first.updated), (1, 0));
    assert_eq!((second.created, second.updated), (0, 1));
    assert_eq!(after_second.len(), 1);
    assert_eq!(after_first[0].fields, after_second[0].fields);
    assert_eq!(after_second[0].text("email"), Some("dana@example.com"));
    assert_eq!(after_second[0].text("name"), Some("Dana Whitfield"));
}

#[test]
fn failing_record_does_not_abort_the_batch() {
    let store = Arc::new(MemoryEntityStore::new());
    let reconciler = reconciler(&store, EntityKind::Agent, SourceSystem::Rezen);

    let summary = run(
        &reconciler,
        InboundAction::Create,
        vec![
            rezen_agent("rz-1", "Ana Ruiz", "ana@example.com"),
            json!({ "phoneNumber": "555-0100" }),
            rezen_agent("rz-2", "Ben Okafor", "ben@example.com"),
        ],
    );

    assert_eq!(summary.total, 3);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].key, "#1");
    assert!(summary.errors[0].message.contains("no external id"));
}

#[test]
fn delete_without_match_is_a_quiet_skip() {
    let store = Arc::new(MemoryEntityStore::new());
    let reconciler = reconciler(&store, EntityKind::Listing, SourceSystem::Rezen);

    let summary = run(&reconciler, InboundAction::Delete, vec![json!({ "id": "ls-404" })]);

    assert_eq!(summary.skipped, 1);
    assert!(summary.errors.is_empty());
}

#[test]
fn delete_deactivates_matching_entity_without_removing_it() {
    let store = Arc::new(MemoryEntityStore::new());
    let reconciler = reconciler(&store, EntityKind::Agent, SourceSystem::Rezen);
    run(
        &reconciler,
        InboundAction::Create,
        vec![rezen_agent("rz-7", "Lee Chen", "lee@example.com")],
    );

    let outcome = reconciler
        .reconcile_record(&record(json!({ "id": "rz-7" })), InboundAction::Delete)
        .expect("delete applies");

    assert_eq!(outcome, RecordOutcome::Deactivated(1));
    let rows = agents(&store);
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].active);
    assert_eq!(rows[0].text("name"), Some("Lee Chen"));
}

#[test]
fn delete_without_external_id_is_reported() {
    let store = Arc::new(MemoryEntityStore::new());
    let reconciler = reconciler(&store, EntityKind::Agent, SourceSystem::Zoho);

    let summary = run(
        &reconciler,
        InboundAction::Delete,
        vec![json!({ "Full_Name": "No Id" })],
    );

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].message, "delete requires an external id");
}

#[test]
fn void_payment_is_soft_deactivated_on_update() {
    let store = Arc::new(MemoryEntityStore::new());
    let reconciler = reconciler(&store, EntityKind::CommissionPayment, SourceSystem::Rezen);
    let paid = json!({
        "id": "pm-1",
        "reference": "CP-2024-001",
        "amount": { "amount": "4,250.00", "currency": "USD" },
        "paymentStatus": "PAID",
    });
    let voided = json!({ "id": "pm-1", "paymentStatus": "VOIDED" });

    run(&reconciler, InboundAction::Create, vec![paid]);
    let summary = run(&reconciler, InboundAction::Update, vec![voided]);

    assert_eq!(summary.updated, 1);
    let payments = store
        .all(EntityKind::CommissionPayment)
        .expect("payments readable");
    assert_eq!(payments.len(), 1);
    assert!(!payments[0].active);
    assert_eq!(payments[0].text("status"), Some("void"));
    assert_eq!(payments[0].fields.get("amount"), Some(&json!(4250.0)));
}

#[test]
fn later_records_in_a_batch_see_entities_created_earlier() {
    let store = Arc::new(MemoryEntityStore::new());
    let reconciler = reconciler(&store, EntityKind::Transaction, SourceSystem::Zoho);

    let summary = run(
        &reconciler,
        InboundAction::Update,
        vec![
            json!({ "Deal_Name": "14 Birch Ln", "Transaction_Code": "TX-88", "Stage": "Qualification" }),
            json!({ "Transaction_Code": "tx-88", "Stage": "Closed Won", "Amount": 512000 }),
        ],
    );

    assert_eq!((summary.created, summary.updated), (1, 1));
    let deals = store.all(EntityKind::Transaction).expect("readable");
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0].text("stage"), Some("closed"));
}

#[test]
fn unsupported_source_is_rejected_up_front() {
    let store = Arc::new(MemoryEntityStore::new());
    let result = Reconciler::new(store, EntityKind::Listing, SourceSystem::Quickbooks);
    assert!(matches!(
        result,
        Err(ReconcileError::UnsupportedSource { .. })
    ));
}
