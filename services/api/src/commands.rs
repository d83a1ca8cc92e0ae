use crate::infra::{parse_action, parse_kind, parse_return_type, parse_system, SyncHub};
use clap::{Args, Subcommand};
use realty_sync::auth::{CredentialProvider, NoExchange, TokenCache};
use realty_sync::config::AppConfig;
use realty_sync::domain::{EntityKind, InboundAction, SourceSystem};
use realty_sync::error::AppError;
use realty_sync::formula::{
    evaluate, extract_field_references, import_csv, validate, FormulaRegistry, ReturnType,
};
use realty_sync::reconcile::BatchSummary;
use realty_sync::sync::{FixtureSource, SyncFixture, SyncOutcome, SyncParams};
use realty_sync::telemetry;
use serde_json::{Map, Value};
use std::fs::File;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct SyncArgs {
    /// Upstream system the fixture was captured from (rezen, zoho, quickbooks)
    #[arg(long, value_parser = parse_system)]
    pub(crate) system: SourceSystem,
    /// Entity kind to reconcile (agent, listing, transaction, commission_payment)
    #[arg(long, value_parser = parse_kind)]
    pub(crate) kind: EntityKind,
    /// JSON fixture: {"pages": [[...]], "details": {...}, "failures": {...}}
    #[arg(long)]
    pub(crate) fixture: PathBuf,
    /// Inbound action applied to every record
    #[arg(long, value_parser = parse_action, default_value = "update")]
    pub(crate) action: InboundAction,
    /// Override the configured batch size
    #[arg(long)]
    pub(crate) batch_size: Option<usize>,
    /// Skip per-record detail fetches
    #[arg(long)]
    pub(crate) no_details: bool,
    /// Static token to use instead of the configured credentials
    #[arg(long)]
    pub(crate) token: Option<String>,
    /// Print the full outcome as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Subcommand, Debug)]
pub(crate) enum FormulaCommand {
    /// Check an expression's syntax
    Validate { expression: String },
    /// Evaluate an expression against JSON field values
    Evaluate {
        expression: String,
        /// Field values as a JSON object
        #[arg(long, default_value = "{}")]
        values: String,
        /// Output type (currency, number, text, boolean, date)
        #[arg(long, value_parser = parse_return_type, default_value = "number")]
        return_type: ReturnType,
        /// Decimal places for currency output
        #[arg(long)]
        precision: Option<u32>,
    },
    /// List the top-level fields an expression reads
    Refs { expression: String },
    /// Validate a formula field sheet (CSV) row by row
    Import { csv: PathBuf },
}

pub(crate) async fn run_sync(args: SyncArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let fixture: SyncFixture = serde_json::from_reader(File::open(&args.fixture)?)
        .map_err(|err| AppError::BadRequest(format!("invalid fixture: {err}")))?;

    let hub = SyncHub::new(config.sync.clone(), &config.credentials);
    let fetch_details = args.no_details.then_some(false);
    let params = hub.params(Some(args.action), args.batch_size, fetch_details);
    let outcome = replay(
        &hub,
        args.system,
        args.kind,
        fixture,
        args.token,
        &params,
    )
    .await?;

    if args.json {
        let rendered = serde_json::to_string_pretty(&outcome)
            .map_err(|err| AppError::BadRequest(err.to_string()))?;
        println!("{rendered}");
    } else {
        render_outcome(args.system, args.kind, &outcome);
    }
    Ok(())
}

/// Replay a fixture through the orchestrator, with an optional static token
/// standing in for the configured credentials.
pub(crate) async fn replay(
    hub: &SyncHub,
    system: SourceSystem,
    kind: EntityKind,
    fixture: SyncFixture,
    token: Option<String>,
    params: &SyncParams,
) -> Result<SyncOutcome, AppError> {
    let override_cache = token.map(|token| TokenCache::new(system, NoExchange, None, Some(token)));
    let credentials: &dyn CredentialProvider = match &override_cache {
        Some(cache) => cache,
        None => hub
            .credentials(system)
            .ok_or_else(|| AppError::NotFound(format!("no token cache for {system}")))?,
    };

    let source = FixtureSource::new(system, fixture);
    Ok(hub
        .orchestrator
        .run_sync(kind, &source, credentials, params)
        .await?)
}

fn render_outcome(system: SourceSystem, kind: EntityKind, outcome: &SyncOutcome) {
    println!(
        "Sync {} from {} -> {}",
        kind.label(),
        system.label(),
        outcome.log.status
    );
    println!(
        "- {} page(s), {} batch(es){}",
        outcome.pages,
        outcome.batches,
        if outcome.interrupted { ", interrupted" } else { "" }
    );
    render_summary(&outcome.summary);
    if let Some(error) = &outcome.log.error {
        println!("Run error: {error}");
    }
}

fn render_summary(summary: &BatchSummary) {
    println!(
        "- {} total | {} created | {} updated | {} skipped",
        summary.total, summary.created, summary.updated, summary.skipped
    );
    for error in &summary.errors {
        println!("  - {}: {}", error.key, error.message);
    }
}

pub(crate) fn run_formula(command: FormulaCommand) -> Result<(), AppError> {
    match command {
        FormulaCommand::Validate { expression } => {
            let validation = validate(&expression);
            match validation.error {
                None => println!("valid"),
                Some(error) => return Err(AppError::BadRequest(error)),
            }
        }
        FormulaCommand::Evaluate {
            expression,
            values,
            return_type,
            precision,
        } => {
            let values = parse_values(&values)?;
            let output = evaluate(&expression, &values, return_type, precision)?;
            println!("{output}");
        }
        FormulaCommand::Refs { expression } => {
            for field in extract_field_references(&expression) {
                println!("{field}");
            }
        }
        FormulaCommand::Import { csv } => {
            let registry = FormulaRegistry::new();
            let report = import_csv(&registry, File::open(csv)?)?;
            println!("{} formula field(s) accepted", report.imported.len());
            for field in &report.imported {
                println!(
                    "  - {}.{} ({})",
                    field.entity_type,
                    field.field_name,
                    field.return_type.label()
                );
            }
            if !report.rejected.is_empty() {
                println!("{} row(s) rejected", report.rejected.len());
                for row in &report.rejected {
                    println!("  - row {}: {}", row.row, row.error);
                }
            }
        }
    }
    Ok(())
}

fn parse_values(raw: &str) -> Result<Map<String, Value>, AppError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(values)) => Ok(values),
        Ok(_) => Err(AppError::BadRequest(
            "values must be a JSON object".to_string(),
        )),
        Err(err) => Err(AppError::BadRequest(format!("invalid values: {err}"))),
    }
}
