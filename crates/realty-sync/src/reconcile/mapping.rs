use super::normalizer::{clean_text, enum_key};
use super::profile::EntityProfile;
use crate::domain::{ExternalRecord, ExternalRef, InboundAction};
use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Number, Value};

/// Upstream vocabulary translated onto local values, with a fallback for
/// anything unrecognised.
#[derive(Debug)]
pub struct EnumTable {
    pub name: &'static str,
    pub entries: &'static [(&'static str, &'static str)],
    pub default: &'static str,
}

impl EnumTable {
    pub fn decode(&self, raw: &str) -> &'static str {
        let key = enum_key(raw);
        self.entries
            .iter()
            .find(|(source, _)| enum_key(source) == key)
            .map(|(_, target)| *target)
            .unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Transform {
    Text,
    Email,
    Number,
    Currency,
    Date,
    Flag,
    Enum(&'static EnumTable),
}

impl Transform {
    /// `None` means the source value is unusable and the mapping is ignored.
    fn apply(self, raw: &Value) -> Option<Value> {
        match self {
            Transform::Enum(table) => scalar_text(raw).map(|text| Value::from(table.decode(&text))),
            _ if raw.is_null() => Some(Value::Null),
            Transform::Text => scalar_text(raw).map(|text| non_empty(clean_text(&text))),
            Transform::Email => {
                scalar_text(raw).map(|text| non_empty(text.trim().to_ascii_lowercase()))
            }
            Transform::Number => parse_number(raw).and_then(Number::from_f64).map(Value::Number),
            Transform::Currency => parse_number(raw)
                .map(|amount| (amount * 100.0).round() / 100.0)
                .and_then(Number::from_f64)
                .map(Value::Number),
            Transform::Date => scalar_text(raw)
                .and_then(|text| parse_date(&text))
                .map(|date| Value::from(date.format("%Y-%m-%d").to_string())),
            Transform::Flag => parse_flag(raw).map(Value::Bool),
        }
    }

    fn enum_table(self) -> Option<&'static EnumTable> {
        match self {
            Transform::Enum(table) => Some(table),
            _ => None,
        }
    }
}

/// One row of a per-entity translation table.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub source: &'static str,
    pub target: &'static str,
    pub transform: Transform,
}

pub(crate) const fn field(
    source: &'static str,
    target: &'static str,
    transform: Transform,
) -> FieldMapping {
    FieldMapping {
        source,
        target,
        transform,
    }
}

/// Local-shaped view of an external record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
    pub external_ref: Option<ExternalRef>,
    pub fields: Map<String, Value>,
}

impl MappedRecord {
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
    }
}

pub(crate) fn map_record(
    profile: &EntityProfile,
    record: &ExternalRecord,
    action: InboundAction,
) -> MappedRecord {
    let external_ref =
        external_id(profile, record).map(|id| ExternalRef::new(profile.system, id));

    let mut mapped = MappedRecord {
        external_ref,
        fields: Map::new(),
    };
    if action == InboundAction::Delete {
        return mapped;
    }

    for mapping in profile.fields {
        if mapped.fields.contains_key(mapping.target) {
            continue;
        }
        if let Some(value) = lookup(record, mapping.source).and_then(|raw| mapping.transform.apply(raw))
        {
            mapped.fields.insert(mapping.target.to_string(), value);
        }
    }

    derive_name(&mut mapped.fields, None, action == InboundAction::Create);
    if action == InboundAction::Create {
        apply_defaults(profile, &mut mapped.fields);
    }
    mapped
}

/// The record's id in its own system, trimmed; blank ids count as absent.
pub(crate) fn external_id(profile: &EntityProfile, record: &ExternalRecord) -> Option<String> {
    lookup(record, profile.external_id_field)
        .and_then(scalar_text)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Fill enum defaults and fixed values for a record about to be inserted.
pub(crate) fn apply_defaults(profile: &EntityProfile, fields: &mut Map<String, Value>) {
    for mapping in profile.fields {
        if let Some(table) = mapping.transform.enum_table() {
            fields
                .entry(mapping.target)
                .or_insert_with(|| Value::from(table.default));
        }
    }
    for (target, value) in profile.defaults {
        fields
            .entry(*target)
            .or_insert_with(|| Value::from(*value));
    }
}

const NAME_PARTS: [&str; 2] = ["first_name", "last_name"];

/// Fill `name` when the record carries name parts but no name. A part the
/// record lacks comes from `stored`; if it is still missing, the name is
/// left alone unless `partial` allows building it from one part.
pub(crate) fn derive_name(
    fields: &mut Map<String, Value>,
    stored: Option<&Map<String, Value>>,
    partial: bool,
) {
    if fields.get("name").is_some_and(|name| !name.is_null()) {
        return;
    }
    if NAME_PARTS.iter().all(|key| text_field(fields, key).is_none()) {
        return;
    }

    let parts: Vec<Option<&str>> = NAME_PARTS
        .iter()
        .map(|key| text_field(fields, key).or_else(|| stored.and_then(|stored| text_field(stored, key))))
        .collect();
    if !partial && parts.iter().any(Option::is_none) {
        return;
    }
    let name = parts.into_iter().flatten().collect::<Vec<_>>().join(" ");
    fields.insert("name".to_string(), Value::from(name));
}

fn text_field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

/// Resolve a possibly dotted path (`PrimaryEmailAddr.Address`).
fn lookup<'a>(record: &'a ExternalRecord, path: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn non_empty(text: String) -> Value {
    if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite()),
        _ => None,
    }
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc().date());
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}
