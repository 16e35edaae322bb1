//! Schema-driven form validation for document payloads.
//!
//! A document type carries a JSON schema of ordered field descriptors;
//! this module compiles that into a validator without generating any types
//! at runtime. Malformed schemas never fail compilation: unknown field
//! types degrade to free text and `table` fields are handled separately as
//! material line items.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

pub const MATERIALS_KEY: &str = "materials";

const MAX_TEXT_LENGTH: usize = 500;
const MAX_UNIT_LENGTH: usize = 30;
const MAX_NOTES_LENGTH: usize = 200;
const NUMBER_MAX_DIGITS: usize = 12;
const NUMBER_DECIMAL_PLACES: usize = 2;

pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Textarea,
    Select,
    Number,
    Date,
    DateTime,
}

impl FieldType {
    fn from_schema(value: Option<&str>) -> FieldType {
        match value {
            Some("textarea") => FieldType::Textarea,
            Some("select") => FieldType::Select,
            Some("number") => FieldType::Number,
            Some("date") => FieldType::Date,
            Some("datetime") => FieldType::DateTime,
            // "text" and anything unrecognized
            _ => FieldType::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub required: bool,
    pub field_type: FieldType,
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FormSchema {
    pub fields: Vec<FieldSpec>,
}

impl FormSchema {
    /// Builds a form from a document type's schema JSON. Never fails:
    /// descriptors without a usable name are skipped, `table` fields are
    /// excluded (see [`validate_materials`]), unknown types become text.
    pub fn from_value(schema: &Value) -> FormSchema {
        let mut fields = Vec::new();
        let raw_fields = schema
            .get("fields")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for raw in raw_fields {
            let Some(name) = raw.get("name").and_then(Value::as_str) else {
                continue;
            };
            if name.is_empty() || name == MATERIALS_KEY {
                continue;
            }
            let type_tag = raw.get("type").and_then(Value::as_str);
            if type_tag == Some("table") {
                continue;
            }

            fields.push(FieldSpec {
                name: name.to_string(),
                label: raw
                    .get("label")
                    .and_then(Value::as_str)
                    .unwrap_or(name)
                    .to_string(),
                required: raw.get("required").and_then(Value::as_bool).unwrap_or(false),
                field_type: FieldType::from_schema(type_tag),
                choices: raw
                    .get("choices")
                    .and_then(Value::as_array)
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            });
        }

        FormSchema { fields }
    }

    /// Validates raw input against the schema. Errors are field-scoped,
    /// one per field; valid input comes back canonicalized (numbers and
    /// dates as normalized strings).
    pub fn validate(&self, raw: &Map<String, Value>) -> Result<Map<String, Value>, FieldErrors> {
        let mut cleaned = Map::new();
        let mut errors = FieldErrors::new();

        for field in &self.fields {
            let value = raw_text(raw.get(&field.name));

            if value.is_empty() {
                if field.required {
                    errors.insert(field.name.clone(), "this field is required".to_string());
                } else {
                    cleaned.insert(field.name.clone(), Value::String(String::new()));
                }
                continue;
            }

            match validate_field(field, &value) {
                Ok(canonical) => {
                    cleaned.insert(field.name.clone(), Value::String(canonical));
                }
                Err(message) => {
                    errors.insert(field.name.clone(), message);
                }
            }
        }

        if errors.is_empty() {
            Ok(cleaned)
        } else {
            Err(errors)
        }
    }
}

fn raw_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn validate_field(field: &FieldSpec, value: &str) -> Result<String, String> {
    match field.field_type {
        FieldType::Text => {
            if value.chars().count() > MAX_TEXT_LENGTH {
                Err(format!("must be at most {MAX_TEXT_LENGTH} characters"))
            } else {
                Ok(value.to_string())
            }
        }
        FieldType::Textarea => Ok(value.to_string()),
        FieldType::Select => {
            if field.choices.iter().any(|choice| choice == value) {
                Ok(value.to_string())
            } else {
                Err("not a valid choice".to_string())
            }
        }
        FieldType::Number => validate_decimal(value),
        FieldType::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(|date| date.format("%Y-%m-%d").to_string())
            .map_err(|_| "enter a valid date (YYYY-MM-DD)".to_string()),
        FieldType::DateTime => parse_datetime(value)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M").to_string())
            .ok_or_else(|| "enter a valid date/time".to_string()),
    }
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    for format in ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    None
}

/// Fixed-precision decimal: at most 12 digits overall, 2 after the point.
/// The canonical form keeps whatever precision was entered.
fn validate_decimal(value: &str) -> Result<String, String> {
    let unsigned = value.strip_prefix('-').unwrap_or(value);
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };

    let valid_digits = !integer.is_empty()
        && integer.chars().all(|c| c.is_ascii_digit())
        && fraction.chars().all(|c| c.is_ascii_digit());

    if !valid_digits {
        return Err("enter a number".to_string());
    }
    if fraction.len() > NUMBER_DECIMAL_PLACES {
        return Err(format!(
            "at most {NUMBER_DECIMAL_PLACES} decimal places allowed"
        ));
    }
    if integer.len() + fraction.len() > NUMBER_MAX_DIGITS {
        return Err(format!("at most {NUMBER_MAX_DIGITS} digits allowed"));
    }

    Ok(value.to_string())
}

/// Validates the fixed-shape material rows that `table` schema fields defer
/// to. Cleaned rows are merged into the document payload under
/// [`MATERIALS_KEY`]. Rows that are entirely empty are dropped, matching
/// blank formset rows.
pub fn validate_materials(rows: &[Value]) -> Result<Vec<Value>, FieldErrors> {
    let mut cleaned = Vec::new();
    let mut errors = FieldErrors::new();

    for (index, row) in rows.iter().enumerate() {
        let name = raw_text(row.get("name"));
        let qty = raw_text(row.get("qty"));
        let unit = raw_text(row.get("unit"));
        let notes = raw_text(row.get("notes"));

        if name.is_empty() && qty.is_empty() && unit.is_empty() && notes.is_empty() {
            continue;
        }

        let mut row_error = |field: &str, message: String| {
            errors.insert(format!("{MATERIALS_KEY}[{index}].{field}"), message);
        };

        if name.is_empty() {
            row_error("name", "this field is required".to_string());
        }
        if unit.is_empty() {
            row_error("unit", "this field is required".to_string());
        } else if unit.chars().count() > MAX_UNIT_LENGTH {
            row_error("unit", format!("must be at most {MAX_UNIT_LENGTH} characters"));
        }
        if notes.chars().count() > MAX_NOTES_LENGTH {
            row_error(
                "notes",
                format!("must be at most {MAX_NOTES_LENGTH} characters"),
            );
        }
        let qty = if qty.is_empty() {
            row_error("qty", "this field is required".to_string());
            String::new()
        } else {
            match validate_decimal(&qty) {
                Ok(canonical) => canonical,
                Err(message) => {
                    row_error("qty", message);
                    String::new()
                }
            }
        };

        cleaned.push(serde_json::json!({
            "name": name,
            "qty": qty,
            "unit": unit,
            "notes": notes,
        }));
    }

    if errors.is_empty() {
        Ok(cleaned)
    } else {
        Err(errors)
    }
}
