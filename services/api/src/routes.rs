use crate::infra::{AppState, SyncHub};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use realty_sync::domain::{EntityKind, ExternalRecord, InboundAction, SourceSystem};
use realty_sync::error::AppError;
use realty_sync::formula::{
    evaluate, extract_field_references, validate, FormulaField, FormulaFieldEdit, FormulaOutput,
    NewFormulaField, ReturnType, Validation,
};
use realty_sync::reconcile::{BatchSummary, ReconcileContext, Reconciler};
use realty_sync::sync::{
    FixtureSource, NewSyncLog, SyncFixture, SyncLogEntry, SyncLogFilter, SyncLogStore,
    SyncOutcome, SyncStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Body of a sync run. The captured upstream payload is replayed through the
/// full orchestrator.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SyncRunRequest {
    #[serde(flatten)]
    pub(crate) fixture: SyncFixture,
    #[serde(default)]
    pub(crate) action: Option<InboundAction>,
    #[serde(default)]
    pub(crate) batch_size: Option<usize>,
    #[serde(default)]
    pub(crate) fetch_details: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WebhookPayload {
    #[serde(default)]
    pub(crate) action: InboundAction,
    #[serde(default)]
    pub(crate) records: Vec<ExternalRecord>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExpressionRequest {
    pub(crate) expression: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EvaluateRequest {
    pub(crate) expression: String,
    #[serde(default)]
    pub(crate) values: Map<String, Value>,
    #[serde(default)]
    pub(crate) return_type: Option<ReturnType>,
    #[serde(default)]
    pub(crate) precision: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FormulaFieldQuery {
    #[serde(default)]
    pub(crate) entity_type: Option<EntityKind>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ComputedFieldView {
    pub(crate) field_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) result: Option<FormulaOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

pub(crate) fn with_service_routes(hub: Arc<SyncHub>) -> Router {
    hub_router(hub)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

fn hub_router(hub: Arc<SyncHub>) -> Router {
    Router::new()
        .route("/api/v1/sync/logs", get(sync_logs_endpoint))
        .route("/api/v1/sync/:system/:kind", post(sync_endpoint))
        .route("/api/v1/webhooks/:system/:kind", post(webhook_endpoint))
        .route("/api/v1/formulas/validate", post(validate_endpoint))
        .route("/api/v1/formulas/evaluate", post(evaluate_endpoint))
        .route("/api/v1/formulas/references", post(references_endpoint))
        .route(
            "/api/v1/formula-fields",
            get(list_formula_fields).post(create_formula_field),
        )
        .route(
            "/api/v1/formula-fields/:id",
            get(get_formula_field).put(edit_formula_field),
        )
        .route(
            "/api/v1/formula-fields/:id/deactivate",
            post(deactivate_formula_field),
        )
        .route(
            "/api/v1/entities/:kind/computed-fields",
            post(compute_formula_fields),
        )
        .with_state(hub)
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

fn entity_path(system: &str, kind: &str) -> Result<(SourceSystem, EntityKind), AppError> {
    Ok((system.parse()?, kind.parse()?))
}

pub(crate) async fn sync_endpoint(
    State(hub): State<Arc<SyncHub>>,
    Path((system, kind)): Path<(String, String)>,
    Json(request): Json<SyncRunRequest>,
) -> Result<Json<SyncOutcome>, AppError> {
    let (system, kind) = entity_path(&system, &kind)?;
    let credentials = hub
        .credentials(system)
        .ok_or_else(|| AppError::NotFound(format!("no token cache for {system}")))?;

    let params = hub.params(request.action, request.batch_size, request.fetch_details);
    let source = FixtureSource::new(system, request.fixture);
    let outcome = hub
        .orchestrator
        .run_sync(kind, &source, credentials, &params)
        .await?;
    Ok(Json(outcome))
}

pub(crate) async fn sync_logs_endpoint(
    State(hub): State<Arc<SyncHub>>,
    Query(filter): Query<SyncLogFilter>,
) -> Result<Json<Vec<SyncLogEntry>>, AppError> {
    Ok(Json(hub.log().list(&filter)?))
}

pub(crate) async fn webhook_endpoint(
    State(hub): State<Arc<SyncHub>>,
    Path((system, kind)): Path<(String, String)>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<BatchSummary>, AppError> {
    let (system, kind) = entity_path(&system, &kind)?;
    let reconciler = Reconciler::new(hub.store().clone(), kind, system)?;

    let entry = hub.log().begin(NewSyncLog {
        source: system,
        entity_type: kind,
        action: format!("webhook:{}", payload.action.label()),
        payload: json!({ "records": payload.records.len() }),
    })?;
    let summary =
        reconciler.reconcile_batch(&payload.records, &ReconcileContext::new(payload.action));

    let (status, error) = if summary.has_errors() {
        (
            SyncStatus::Failed,
            Some(format!(
                "{} record(s) could not be reconciled",
                summary.errors.len()
            )),
        )
    } else {
        (SyncStatus::Success, None)
    };
    hub.log()
        .complete(entry.id, status, json!({ "summary": summary }), error)?;

    Ok(Json(summary))
}

pub(crate) async fn validate_endpoint(Json(request): Json<ExpressionRequest>) -> Json<Validation> {
    Json(validate(&request.expression))
}

pub(crate) async fn evaluate_endpoint(
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let return_type = request.return_type.unwrap_or(ReturnType::Number);
    let result = evaluate(
        &request.expression,
        &request.values,
        return_type,
        request.precision,
    )?;
    Ok(Json(json!({ "result": result })))
}

pub(crate) async fn references_endpoint(
    Json(request): Json<ExpressionRequest>,
) -> Json<serde_json::Value> {
    Json(json!({ "fields": extract_field_references(&request.expression) }))
}

pub(crate) async fn list_formula_fields(
    State(hub): State<Arc<SyncHub>>,
    Query(query): Query<FormulaFieldQuery>,
) -> Result<Json<Vec<FormulaField>>, AppError> {
    let fields = match query.entity_type {
        Some(kind) => hub.formulas.active_for(kind)?,
        None => hub.formulas.list()?,
    };
    Ok(Json(fields))
}

pub(crate) async fn create_formula_field(
    State(hub): State<Arc<SyncHub>>,
    Json(new): Json<NewFormulaField>,
) -> Result<impl IntoResponse, AppError> {
    let field = hub.formulas.create(new)?;
    Ok((StatusCode::CREATED, Json(field)))
}

pub(crate) async fn get_formula_field(
    State(hub): State<Arc<SyncHub>>,
    Path(id): Path<String>,
) -> Result<Json<FormulaField>, AppError> {
    hub.formulas
        .get(&id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("formula field {id} not found")))
}

pub(crate) async fn edit_formula_field(
    State(hub): State<Arc<SyncHub>>,
    Path(id): Path<String>,
    Json(edit): Json<FormulaFieldEdit>,
) -> Result<Json<FormulaField>, AppError> {
    Ok(Json(hub.formulas.edit(&id, edit)?))
}

pub(crate) async fn deactivate_formula_field(
    State(hub): State<Arc<SyncHub>>,
    Path(id): Path<String>,
) -> Result<Json<FormulaField>, AppError> {
    Ok(Json(hub.formulas.deactivate(&id)?))
}

pub(crate) async fn compute_formula_fields(
    State(hub): State<Arc<SyncHub>>,
    Path(kind): Path<String>,
    Json(values): Json<Map<String, Value>>,
) -> Result<Json<Vec<ComputedFieldView>>, AppError> {
    let kind: EntityKind = kind.parse()?;
    let computed = hub
        .formulas
        .compute(kind, &values)?
        .into_iter()
        .map(|field| match field.outcome {
            Ok(result) => ComputedFieldView {
                field_name: field.field_name,
                result: Some(result),
                error: None,
            },
            Err(error) => ComputedFieldView {
                field_name: field.field_name,
                result: None,
                error: Some(error.to_string()),
            },
        })
        .collect();
    Ok(Json(computed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use realty_sync::config::{CredentialsConfig, SyncConfig, SystemCredentials};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    fn hub_with_rezen_key() -> Arc<SyncHub> {
        let credentials = CredentialsConfig {
            rezen: SystemCredentials {
                static_token: Some("rezen-key".to_string()),
                ..SystemCredentials::default()
            },
            ..CredentialsConfig::default()
        };
        Arc::new(SyncHub::new(SyncConfig::default(), &credentials))
    }

    async fn send(router: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request builds");

        let response = router.oneshot(request).await.expect("router responds");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn readiness_reflects_startup_flag() {
        let readiness = Arc::new(AtomicBool::new(false));
        let state = AppState {
            readiness: readiness.clone(),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        let router = with_service_routes(hub_with_rezen_key()).layer(Extension(state));

        let (status, body) = send(router.clone(), "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "initializing");

        readiness.store(true, Ordering::Release);
        let (status, _) = send(router, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_reconciles_and_is_audited() {
        let hub = hub_with_rezen_key();
        let router = with_service_routes(hub.clone());

        let (status, summary) = send(
            router.clone(),
            "POST",
            "/api/v1/webhooks/rezen/agent",
            Some(json!({
                "action": "create",
                "records": [
                    { "id": "rz-9", "firstName": "Lena", "lastName": "Park",
                      "emailAddress": "lena@brokerage.test" },
                    { "phoneNumber": "555-0199" }
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["created"], 1);
        assert_eq!(summary["skipped"], 1);
        assert_eq!(summary["errors"].as_array().map(Vec::len), Some(1));

        let (status, logs) = send(
            router,
            "GET",
            "/api/v1/sync/logs?source=rezen&status=FAILED",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(logs.as_array().map(Vec::len), Some(1));
        assert_eq!(logs[0]["action"], "webhook:create");
    }

    #[tokio::test]
    async fn sync_route_replays_a_fixture() {
        let router = with_service_routes(hub_with_rezen_key());

        let (status, outcome) = send(
            router,
            "POST",
            "/api/v1/sync/rezen/listing",
            Some(json!({
                "pages": [[
                    { "id": "ls-1", "title": "Lakeview Bungalow", "mlsNumber": "MLS-7" }
                ]],
                "fetch_details": false
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["summary"]["created"], 1);
        assert_eq!(outcome["log"]["status"], "SUCCESS");
    }

    #[tokio::test]
    async fn sync_without_credentials_is_a_gateway_error() {
        let router = with_service_routes(hub_with_rezen_key());

        let (status, body) = send(
            router,
            "POST",
            "/api/v1/sync/zoho/agent",
            Some(json!({ "pages": [] })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"]
            .as_str()
            .is_some_and(|message| message.contains("no credentials configured for zoho")));
    }

    #[tokio::test]
    async fn unknown_system_is_a_bad_request() {
        let router = with_service_routes(hub_with_rezen_key());

        let (status, body) = send(
            router,
            "POST",
            "/api/v1/webhooks/salesforce/agent",
            Some(json!({ "records": [] })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown source system 'salesforce'");
    }

    #[tokio::test]
    async fn formula_endpoints_validate_evaluate_and_extract() {
        let router = with_service_routes(hub_with_rezen_key());

        let (_, validation) = send(
            router.clone(),
            "POST",
            "/api/v1/formulas/validate",
            Some(json!({ "expression": "IF(price > 0, price" })),
        )
        .await;
        assert_eq!(validation["valid"], false);
        assert!(validation["error"].is_string());

        let (status, evaluated) = send(
            router.clone(),
            "POST",
            "/api/v1/formulas/evaluate",
            Some(json!({
                "expression": "(100 * 3) / 100",
                "return_type": "currency"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(evaluated["result"]["display"], "3.00");

        let (status, _) = send(
            router.clone(),
            "POST",
            "/api/v1/formulas/evaluate",
            Some(json!({ "expression": "price * 2", "values": {} })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, references) = send(
            router,
            "POST",
            "/api/v1/formulas/references",
            Some(json!({ "expression": "SUM(payments.amount) + [Closing Fee]" })),
        )
        .await;
        assert_eq!(references["fields"], json!(["payments", "Closing Fee"]));
    }

    #[tokio::test]
    async fn evaluate_rejects_out_of_range_input() {
        let router = with_service_routes(hub_with_rezen_key());

        let (status, body) = send(
            router.clone(),
            "POST",
            "/api/v1/formulas/evaluate",
            Some(json!({
                "expression": "1 / 3",
                "return_type": "currency",
                "precision": 400
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "precision 400 is outside 0 to 10");

        let deep = format!("{}1{}", "(".repeat(1_000), ")".repeat(1_000));
        let (status, body) = send(
            router,
            "POST",
            "/api/v1/formulas/evaluate",
            Some(json!({ "expression": deep })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .is_some_and(|error| error.contains("nested too deeply")));
    }

    #[tokio::test]
    async fn formula_field_lifecycle() {
        let router = with_service_routes(hub_with_rezen_key());
        let definition = json!({
            "entity_type": "transaction",
            "field_name": "agent_commission",
            "expression": "gross_commission * split / 100",
            "return_type": "currency"
        });

        let (status, created) = send(
            router.clone(),
            "POST",
            "/api/v1/formula-fields",
            Some(definition.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().expect("id assigned").to_string();

        let (status, _) = send(router.clone(), "POST", "/api/v1/formula-fields", Some(definition)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, computed) = send(
            router.clone(),
            "POST",
            "/api/v1/entities/transaction/computed-fields",
            Some(json!({ "gross_commission": 9000, "split": 80 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(computed[0]["result"]["display"], "7200.00");

        let (status, deactivated) = send(
            router.clone(),
            "POST",
            &format!("/api/v1/formula-fields/{id}/deactivate"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deactivated["active"], false);

        let (_, active) = send(
            router,
            "GET",
            "/api/v1/formula-fields?entity_type=transaction",
            None,
        )
        .await;
        assert_eq!(active, json!([]));
    }
}
