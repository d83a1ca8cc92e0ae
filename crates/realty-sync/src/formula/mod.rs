//! Safe expression language for derived (formula) fields.
//!
//! Three entry points are usable without any HTTP or storage around them:
//! [`validate`], [`evaluate`] and [`extract_field_references`].

mod ast;
mod evaluator;
mod import;
mod lexer;
mod output;
mod parser;
mod registry;

pub use ast::{Expr, FieldPath, Function};
pub use import::{import_csv, ImportReport, RejectedRow};
pub use output::{FormulaOutput, ReturnType, DEFAULT_CURRENCY_PRECISION, MAX_CURRENCY_PRECISION};
pub use registry::{
    ComputedField, FormulaField, FormulaFieldEdit, FormulaRegistry, FormulaRegistryError,
    NewFormulaField,
};

use evaluator::Evaluator;
use lexer::{Lexer, Token};
use parser::Parser;
use serde::Serialize;
use serde_json::{Map, Value};

/// Syntax error with the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at position {position}")]
pub struct ValidationError {
    pub message: String,
    pub position: usize,
}

impl ValidationError {
    pub(crate) fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("invalid formula: {0}")]
    Invalid(#[from] ValidationError),
    #[error("field '{0}' is not present in the supplied values")]
    UnknownField(String),
    #[error("precision {0} is outside 0 to {max}", max = MAX_CURRENCY_PRECISION)]
    Precision(u32),
}

/// Result of a syntax-only check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A parsed expression, reusable across evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            source: source.to_string(),
            expr: Parser::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn references(&self) -> Vec<String> {
        self.expr.field_roots()
    }

    pub fn evaluate(
        &self,
        values: &Map<String, Value>,
        return_type: ReturnType,
        precision: Option<u32>,
    ) -> Result<FormulaOutput, EvalError> {
        if let Some(places) = precision.filter(|places| *places > MAX_CURRENCY_PRECISION) {
            return Err(EvalError::Precision(places));
        }
        let raw = Evaluator::new(values).eval(&self.expr)?;
        Ok(return_type.coerce(raw, precision))
    }
}

pub fn validate(expression: &str) -> Validation {
    match Parser::parse(expression) {
        Ok(_) => Validation {
            valid: true,
            error: None,
        },
        Err(error) => Validation {
            valid: false,
            error: Some(error.to_string()),
        },
    }
}

/// Parse and evaluate in one step. `precision` only affects currency.
pub fn evaluate(
    expression: &str,
    values: &Map<String, Value>,
    return_type: ReturnType,
    precision: Option<u32>,
) -> Result<FormulaOutput, EvalError> {
    Formula::parse(expression)?.evaluate(values, return_type, precision)
}

/// Distinct top-level field names, in order of first appearance.
///
/// Works on the token stream only, so it also answers for expressions that
/// do not parse; scanning stops at the first malformed token.
pub fn extract_field_references(expression: &str) -> Vec<String> {
    let mut lexer = Lexer::new(expression);
    let mut tokens = Vec::new();
    while let Ok(spanned) = lexer.next_token() {
        if spanned.token == Token::Eof {
            break;
        }
        tokens.push(spanned.token);
    }

    let mut names: Vec<String> = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        let name = match token {
            Token::Ident(name) if tokens.get(index + 1) != Some(&Token::LeftParen) => {
                FieldPath::dotted(name).root().to_string()
            }
            Token::Field(name) => name.clone(),
            _ => continue,
        };
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
