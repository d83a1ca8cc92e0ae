use crate::config::ConfigError;
use crate::domain::UnknownVariant;
use crate::formula::{EvalError, FormulaRegistryError};
use crate::reconcile::ReconcileError;
use crate::sync::{SyncError, SyncLogError};
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Sync(SyncError),
    SyncLog(SyncLogError),
    Reconcile(ReconcileError),
    Formula(FormulaRegistryError),
    Eval(EvalError),
    Import(csv::Error),
    BadRequest(String),
    NotFound(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Sync(SyncError::Auth(_)) | AppError::Sync(SyncError::Upstream(_)) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Sync(SyncError::Unsupported(_)) | AppError::Reconcile(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Sync(SyncError::Log(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::SyncLog(SyncLogError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::SyncLog(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Formula(err) => match err {
                FormulaRegistryError::Invalid(_)
                | FormulaRegistryError::EmptyName
                | FormulaRegistryError::Precision(_) => StatusCode::BAD_REQUEST,
                FormulaRegistryError::Duplicate { .. } | FormulaRegistryError::Inactive(_) => {
                    StatusCode::CONFLICT
                }
                FormulaRegistryError::NotFound(_) => StatusCode::NOT_FOUND,
                FormulaRegistryError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Eval(EvalError::Invalid(_)) | AppError::Eval(EvalError::Precision(_)) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Eval(EvalError::UnknownField(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Import(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Sync(err) => write!(f, "sync failed: {}", err),
            AppError::SyncLog(err) => write!(f, "{}", err),
            AppError::Reconcile(err) => write!(f, "{}", err),
            AppError::Formula(err) => write!(f, "{}", err),
            AppError::Eval(err) => write!(f, "{}", err),
            AppError::Import(err) => write!(f, "formula import failed: {}", err),
            AppError::BadRequest(message) | AppError::NotFound(message) => {
                write!(f, "{}", message)
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Sync(err) => Some(err),
            AppError::SyncLog(err) => Some(err),
            AppError::Reconcile(err) => Some(err),
            AppError::Formula(err) => Some(err),
            AppError::Eval(err) => Some(err),
            AppError::Import(err) => Some(err),
            AppError::BadRequest(_) | AppError::NotFound(_) => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<SyncError> for AppError {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}

impl From<SyncLogError> for AppError {
    fn from(value: SyncLogError) -> Self {
        Self::SyncLog(value)
    }
}

impl From<ReconcileError> for AppError {
    fn from(value: ReconcileError) -> Self {
        Self::Reconcile(value)
    }
}

impl From<FormulaRegistryError> for AppError {
    fn from(value: FormulaRegistryError) -> Self {
        Self::Formula(value)
    }
}

impl From<EvalError> for AppError {
    fn from(value: EvalError) -> Self {
        Self::Eval(value)
    }
}

impl From<csv::Error> for AppError {
    fn from(value: csv::Error) -> Self {
        Self::Import(value)
    }
}

impl From<UnknownVariant> for AppError {
    fn from(value: UnknownVariant) -> Self {
        Self::BadRequest(value.to_string())
    }
}
