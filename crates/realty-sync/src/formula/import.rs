//! Bulk creation of formula fields from an operator-maintained CSV sheet.

use std::io::Read;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use super::registry::{FormulaField, FormulaRegistry, NewFormulaField};
use super::ReturnType;
use crate::domain::EntityKind;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported: Vec<FormulaField>,
    pub rejected: Vec<RejectedRow>,
}

/// `row` is 1-based and counts data rows only (the header is not a row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRow {
    pub row: usize,
    pub error: String,
}

#[derive(Debug, Deserialize)]
struct FormulaRow {
    #[serde(rename = "Entity Type")]
    entity_type: String,
    #[serde(rename = "Field Name")]
    field_name: String,
    #[serde(
        rename = "Display Name",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    display_name: Option<String>,
    #[serde(rename = "Expression")]
    expression: String,
    #[serde(rename = "Return Type")]
    return_type: String,
    #[serde(rename = "Precision", default, deserialize_with = "empty_string_as_none")]
    precision: Option<String>,
}

impl FormulaRow {
    fn into_new_field(self) -> Result<NewFormulaField, String> {
        let entity_type = self
            .entity_type
            .parse::<EntityKind>()
            .map_err(|err| err.to_string())?;
        let return_type = self
            .return_type
            .parse::<ReturnType>()
            .map_err(|err| err.to_string())?;
        let precision = self
            .precision
            .map(|raw| {
                raw.parse::<u32>()
                    .map_err(|_| format!("precision '{raw}' is not a whole number"))
            })
            .transpose()?;

        Ok(NewFormulaField {
            entity_type,
            field_name: self.field_name,
            display_name: self.display_name,
            expression: self.expression,
            return_type,
            precision,
        })
    }
}

/// Each row is created or rejected on its own; one bad row never blocks
/// the rest. Only an unreadable header aborts the import.
pub fn import_csv<R: Read>(
    registry: &FormulaRegistry,
    reader: R,
) -> Result<ImportReport, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    csv_reader.headers()?;

    let mut report = ImportReport::default();
    for (index, row) in csv_reader.deserialize::<FormulaRow>().enumerate() {
        let row_number = index + 1;
        let created = row
            .map_err(|err| err.to_string())
            .and_then(FormulaRow::into_new_field)
            .and_then(|new| registry.create(new).map_err(|err| err.to_string()));

        match created {
            Ok(field) => report.imported.push(field),
            Err(error) => {
                warn!(row = row_number, %error, "formula row rejected");
                report.rejected.push(RejectedRow {
                    row: row_number,
                    error,
                });
            }
        }
    }

    info!(
        imported = report.imported.len(),
        rejected = report.rejected.len(),
        "formula import finished"
    );
    Ok(report)
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "\
Entity Type,Field Name,Display Name,Expression,Return Type,Precision
transaction,agent_commission,Agent Commission,gross_commission * split / 100,currency,2
transaction,net_to_brokerage,,gross_commission - agent_commission,currency,
listing,price_per_bed,Price Per Bed,\"list_price / (bedrooms\",number,
agent,display_label,Label,\"name & ' (' & status & ')'\",text,
payment,late_fee,Late Fee,amount * 0.05,percent,
transaction,agent_commission,Duplicate,gross_commission,currency,2
";

    #[test]
    fn rows_are_imported_or_rejected_independently() {
        let registry = FormulaRegistry::new();
        let report = import_csv(&registry, SHEET.as_bytes()).expect("header readable");

        let names: Vec<&str> = report
            .imported
            .iter()
            .map(|field| field.field_name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["agent_commission", "net_to_brokerage", "display_label"]
        );
        assert_eq!(report.imported[1].display_name, "net_to_brokerage");
        assert_eq!(report.imported[0].precision, Some(2));

        let rejected_rows: Vec<usize> = report.rejected.iter().map(|row| row.row).collect();
        assert_eq!(rejected_rows, vec![3, 5, 6]);
        assert!(report.rejected[0].error.contains("')'"));
        assert!(report.rejected[1].error.contains("return type"));
        assert!(report.rejected[2].error.contains("already defines"));
    }

    #[test]
    fn precision_must_be_a_whole_number() {
        let registry = FormulaRegistry::new();
        let sheet = "Entity Type,Field Name,Display Name,Expression,Return Type,Precision\n\
transaction,fee,Fee,gross_commission,currency,two\n";
        let report = import_csv(&registry, sheet.as_bytes()).expect("header readable");
        assert!(report.imported.is_empty());
        assert_eq!(
            report.rejected,
            vec![RejectedRow {
                row: 1,
                error: "precision 'two' is not a whole number".to_string()
            }]
        );
    }

    #[test]
    fn precision_above_the_cap_is_rejected() {
        let registry = FormulaRegistry::new();
        let sheet = "Entity Type,Field Name,Display Name,Expression,Return Type,Precision\n\
transaction,fee,Fee,gross_commission,currency,400\n\
transaction,split,Split,gross_commission,currency,10\n";
        let report = import_csv(&registry, sheet.as_bytes()).expect("header readable");
        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.imported[0].precision, Some(10));
        assert_eq!(
            report.rejected,
            vec![RejectedRow {
                row: 1,
                error: "precision 400 is outside 0 to 10".to_string()
            }]
        );
    }
}
