use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::evaluator::{round_to, Scalar};
use crate::domain::UnknownVariant;
use crate::reconcile::parse_date;

pub const DEFAULT_CURRENCY_PRECISION: u32 = 2;

/// Most decimal places a currency field may declare.
pub const MAX_CURRENCY_PRECISION: u32 = 10;

/// Declared type of a formula field's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    Currency,
    Number,
    Text,
    Boolean,
    Date,
}

impl ReturnType {
    pub fn label(self) -> &'static str {
        match self {
            ReturnType::Currency => "currency",
            ReturnType::Number => "number",
            ReturnType::Text => "text",
            ReturnType::Boolean => "boolean",
            ReturnType::Date => "date",
        }
    }

    /// Apply the declared type to a raw result. Values that cannot take
    /// the type become `Null`.
    pub(crate) fn coerce(self, value: Scalar, precision: Option<u32>) -> FormulaOutput {
        if value.is_null() {
            return FormulaOutput::Null;
        }

        match self {
            ReturnType::Currency => {
                let precision = precision
                    .unwrap_or(DEFAULT_CURRENCY_PRECISION)
                    .min(MAX_CURRENCY_PRECISION);
                value
                    .as_number()
                    .map(|amount| round_to(amount, precision as i32))
                    .filter(|amount| amount.is_finite())
                    .map_or(FormulaOutput::Null, |amount| FormulaOutput::Currency {
                        amount,
                        precision,
                    })
            }
            ReturnType::Number => value
                .as_number()
                .filter(|n| n.is_finite())
                .map_or(FormulaOutput::Null, FormulaOutput::Number),
            ReturnType::Text => FormulaOutput::Text(value.to_string()),
            ReturnType::Boolean => match value {
                Scalar::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                    "true" => FormulaOutput::Boolean(true),
                    "false" => FormulaOutput::Boolean(false),
                    _ => FormulaOutput::Null,
                },
                other => other
                    .truthy()
                    .map_or(FormulaOutput::Null, FormulaOutput::Boolean),
            },
            ReturnType::Date => match value {
                Scalar::Text(text) => parse_date(&text).map_or(FormulaOutput::Null, FormulaOutput::Date),
                _ => FormulaOutput::Null,
            },
        }
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ReturnType {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "currency" | "money" => Ok(Self::Currency),
            "number" | "numeric" | "decimal" => Ok(Self::Number),
            "text" | "string" => Ok(Self::Text),
            "boolean" | "bool" => Ok(Self::Boolean),
            "date" => Ok(Self::Date),
            _ => Err(UnknownVariant {
                kind: "return type",
                value: value.to_string(),
            }),
        }
    }
}

/// Typed result of evaluating a formula.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaOutput {
    Null,
    Currency { amount: f64, precision: u32 },
    Number(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
}

impl FormulaOutput {
    pub fn is_null(&self) -> bool {
        matches!(self, FormulaOutput::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FormulaOutput::Null => "null",
            FormulaOutput::Currency { .. } => "currency",
            FormulaOutput::Number(_) => "number",
            FormulaOutput::Text(_) => "text",
            FormulaOutput::Boolean(_) => "boolean",
            FormulaOutput::Date(_) => "date",
        }
    }

    /// Plain JSON value, suitable for storing next to the entity's fields.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FormulaOutput::Null => serde_json::Value::Null,
            FormulaOutput::Currency { amount, .. } | FormulaOutput::Number(amount) => {
                serde_json::Number::from_f64(*amount)
                    .map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            FormulaOutput::Text(text) => serde_json::Value::from(text.as_str()),
            FormulaOutput::Boolean(flag) => serde_json::Value::Bool(*flag),
            FormulaOutput::Date(date) => serde_json::Value::from(date.format("%Y-%m-%d").to_string()),
        }
    }
}

impl fmt::Display for FormulaOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaOutput::Null => Ok(()),
            FormulaOutput::Currency { amount, precision } => {
                write!(f, "{amount:.prec$}", prec = *precision as usize)
            }
            FormulaOutput::Number(value) => write!(f, "{value}"),
            FormulaOutput::Text(text) => f.write_str(text),
            FormulaOutput::Boolean(flag) => write!(f, "{flag}"),
            FormulaOutput::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

/// Serialized as `{"type", "value", "display"}`.
impl Serialize for FormulaOutput {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("FormulaOutput", 3)?;
        state.serialize_field("type", self.kind())?;
        state.serialize_field("value", &self.to_json())?;
        state.serialize_field("display", &self.to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn currency_rounds_to_declared_precision() {
        let output = ReturnType::Currency.coerce(Scalar::Number(1234.5678), None);
        assert_eq!(
            output,
            FormulaOutput::Currency {
                amount: 1234.57,
                precision: 2
            }
        );
        assert_eq!(output.to_string(), "1234.57");

        let output = ReturnType::Currency.coerce(Scalar::Number(3.0), Some(0));
        assert_eq!(output.to_string(), "3");
    }

    #[test]
    fn non_finite_amounts_become_null() {
        assert_eq!(
            ReturnType::Currency.coerce(Scalar::Number(f64::INFINITY), Some(2)),
            FormulaOutput::Null
        );
        assert_eq!(
            ReturnType::Currency.coerce(Scalar::Number(f64::NAN), None),
            FormulaOutput::Null
        );
        assert_eq!(
            ReturnType::Number.coerce(Scalar::Number(f64::NEG_INFINITY), None),
            FormulaOutput::Null
        );
    }

    #[test]
    fn huge_amounts_keep_their_value_at_any_precision() {
        let output = ReturnType::Currency.coerce(Scalar::Number(1e300), Some(400));
        assert_eq!(
            output,
            FormulaOutput::Currency {
                amount: 1e300,
                precision: MAX_CURRENCY_PRECISION
            }
        );
    }

    #[test]
    fn number_is_left_unrounded() {
        assert_eq!(
            ReturnType::Number.coerce(Scalar::Number(0.125), Some(1)),
            FormulaOutput::Number(0.125)
        );
    }

    #[test]
    fn text_boolean_and_date_coercions() {
        assert_eq!(
            ReturnType::Text.coerce(Scalar::Number(42.0), None),
            FormulaOutput::Text("42".into())
        );
        assert_eq!(
            ReturnType::Boolean.coerce(Scalar::Text("TRUE".into()), None),
            FormulaOutput::Boolean(true)
        );
        assert_eq!(
            ReturnType::Date.coerce(Scalar::Text("2025-06-30T12:00:00Z".into()), None),
            FormulaOutput::Date(NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date"))
        );
        assert_eq!(
            ReturnType::Date.coerce(Scalar::Number(3.0), None),
            FormulaOutput::Null
        );
    }

    #[test]
    fn serializes_with_type_value_and_display() {
        let output = FormulaOutput::Currency {
            amount: 3.0,
            precision: 2,
        };
        assert_eq!(
            serde_json::to_value(&output).expect("serializes"),
            json!({ "type": "currency", "value": 3.0, "display": "3.00" })
        );
    }

    #[test]
    fn parses_return_type_labels() {
        assert_eq!("Currency".parse::<ReturnType>(), Ok(ReturnType::Currency));
        assert!("percent".parse::<ReturnType>().is_err());
    }
}
