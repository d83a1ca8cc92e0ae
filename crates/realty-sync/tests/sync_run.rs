use std::sync::Arc;
use std::time::Duration;

use realty_sync::auth::{NoExchange, TokenCache};
use realty_sync::domain::{EntityKind, SourceSystem};
use realty_sync::store::MemoryEntityStore;
use realty_sync::sync::{
    FixtureSource, MemorySyncLog, RetryPolicy, SyncFixture, SyncLogFilter, SyncLogStore,
    SyncOrchestrator, SyncParams, SyncStatus,
};
use serde_json::json;

fn fixture(value: serde_json::Value) -> SyncFixture {
    serde_json::from_value(value).expect("valid fixture")
}

fn static_credentials(system: SourceSystem) -> TokenCache<NoExchange> {
    TokenCache::new(system, NoExchange, None, Some("static-key".to_string()))
}

fn quick_params(fetch_details: bool) -> SyncParams {
    SyncParams {
        batch_size: 2,
        batch_delay: Duration::from_millis(10),
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
        },
        fetch_details,
        ..SyncParams::default()
    }
}

#[tokio::test]
async fn agent_synced_from_two_systems_is_correlated_by_email() {
    let store = Arc::new(MemoryEntityStore::new());
    let log = Arc::new(MemorySyncLog::new());
    let orchestrator = SyncOrchestrator::new(store.clone(), log.clone());

    let rezen = FixtureSource::new(
        SourceSystem::Rezen,
        fixture(json!({
            "pages": [[
                { "id": "rz-1", "firstName": "Priya", "lastName": "Natarajan",
                  "emailAddress": "priya@brokerage.test", "agentStatus": "ACTIVE" },
                { "id": "rz-2", "firstName": "Tom", "lastName": "Alvarez",
                  "emailAddress": "tom@brokerage.test", "agentStatus": "ACTIVE" }
            ]]
        })),
    );
    let first = orchestrator
        .run_sync(
            EntityKind::Agent,
            &rezen,
            &static_credentials(SourceSystem::Rezen),
            &quick_params(false),
        )
        .await
        .expect("rezen sync");
    assert_eq!(first.summary.created, 2);

    let quickbooks = FixtureSource::new(
        SourceSystem::Quickbooks,
        fixture(json!({
            "pages": [[
                { "Id": "qb-55", "DisplayName": "Priya Natarajan",
                  "PrimaryEmailAddr": { "Address": "PRIYA@brokerage.test" },
                  "Active": true, "Balance": "310.5" }
            ]]
        })),
    );
    let second = orchestrator
        .run_sync(
            EntityKind::Agent,
            &quickbooks,
            &static_credentials(SourceSystem::Quickbooks),
            &quick_params(false),
        )
        .await
        .expect("quickbooks sync");
    assert_eq!((second.summary.created, second.summary.updated), (0, 1));

    let agents = store.all(EntityKind::Agent).expect("agents readable");
    assert_eq!(agents.len(), 2);
    let priya = agents
        .iter()
        .find(|agent| agent.text("email") == Some("priya@brokerage.test"))
        .expect("priya present");
    assert_eq!(priya.external_id(SourceSystem::Rezen), Some("rz-1"));
    assert_eq!(priya.external_id(SourceSystem::Quickbooks), Some("qb-55"));
    assert_eq!(priya.fields["accounting_balance"], json!(310.5));

    let entries = log.list(&SyncLogFilter::default()).expect("log readable");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].source, SourceSystem::Quickbooks, "newest first");
    assert!(entries.iter().all(|entry| entry.status == SyncStatus::Success));
}

#[tokio::test(start_paused = true)]
async fn failing_detail_fetches_fall_back_to_list_data() {
    let store = Arc::new(MemoryEntityStore::new());
    let orchestrator = SyncOrchestrator::new(store.clone(), Arc::new(MemorySyncLog::new()));

    let source = FixtureSource::new(
        SourceSystem::Rezen,
        fixture(json!({
            "pages": [
                [{ "id": "tx-1", "code": "T-101", "address": { "oneLine": "12 Elm St" } }],
                [{ "id": "tx-2", "code": "T-102", "address": { "oneLine": "40 Oak Ave" } }]
            ],
            "details": {
                "tx-1": { "id": "tx-1", "salePrice": { "amount": 450000 } }
            },
            "failures": { "tx-2": 503 }
        })),
    );

    let outcome = orchestrator
        .run_sync(
            EntityKind::Transaction,
            &source,
            &static_credentials(SourceSystem::Rezen),
            &quick_params(true),
        )
        .await
        .expect("sync completes");

    assert_eq!(outcome.pages, 2);
    assert_eq!(outcome.summary.created, 2);
    assert_eq!(outcome.log.status, SyncStatus::Success);
    let transactions = store.all(EntityKind::Transaction).expect("readable");
    assert_eq!(transactions.len(), 2);
    let enriched = transactions
        .iter()
        .find(|tx| tx.text("transaction_code") == Some("T-101"))
        .expect("tx-1 stored");
    assert_eq!(enriched.fields["sale_price"], json!(450000.0));
    let fallback = transactions
        .iter()
        .find(|tx| tx.text("transaction_code") == Some("T-102"))
        .expect("tx-2 stored");
    assert!(fallback.fields.get("sale_price").is_none());
}

#[tokio::test]
async fn missing_credentials_are_reported_without_touching_the_store() {
    let store = Arc::new(MemoryEntityStore::new());
    let log = Arc::new(MemorySyncLog::new());
    let orchestrator = SyncOrchestrator::new(store.clone(), log.clone());
    let source = FixtureSource::new(SourceSystem::Zoho, SyncFixture::default());
    let credentials = TokenCache::new(SourceSystem::Zoho, NoExchange, None, None);

    let result = orchestrator
        .run_sync(EntityKind::Listing, &source, &credentials, &quick_params(false))
        .await;

    assert!(result.is_err());
    let failed = log
        .list(&SyncLogFilter {
            status: Some(SyncStatus::Failed),
            ..SyncLogFilter::default()
        })
        .expect("log readable");
    assert_eq!(failed.len(), 1);
    assert!(store.all(EntityKind::Listing).expect("readable").is_empty());
}
