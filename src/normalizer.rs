// 📐 Record Normalizer - raw feed records into canonical listings
//
// Every field the normalizer reads must be the sole element of its wrapping
// sequence. Zero or multiple values for an expected-scalar field is a shape
// error, never a silent pick-first.

use crate::db::{Listing, ListingStatus};
use crate::parser::RawRecord;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

const FIELD_UNIQUE_ID: &str = "uniqueID";
const FIELD_AGENT_NAME: &str = "listingAgent.name";
const ATTR_STATUS: &str = "status";
const ATTR_MOD_TIME: &str = "modTime";

/// Accepted modTime forms. The feed writes `2017-06-05-12:30:00`; space and
/// `T` separators appear in older exports.
const MOD_TIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d-%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

// ============================================================================
// SHAPE ERROR
// ============================================================================

/// A record whose raw shape does not match the expected-scalar contract.
#[derive(Debug, Clone)]
pub struct ShapeError {
    pub field: String,
    pub message: String,
}

impl ShapeError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        ShapeError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ShapeError {}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Map one raw record into a Listing. Pure; no side effects.
pub fn normalize(raw: &RawRecord) -> Result<Listing, ShapeError> {
    let unique_id = scalar(raw, FIELD_UNIQUE_ID)?.to_string();
    let status = ListingStatus::parse(attribute(raw, ATTR_STATUS)?);
    let mod_time = parse_mod_time(attribute(raw, ATTR_MOD_TIME)?)?;

    // An absent agent path means "no agent information" and is left for the
    // filter to exclude; a present path must still hold exactly one value.
    let agent_name = optional_scalar(raw, FIELD_AGENT_NAME)?.map(str::to_string);

    let mut attributes = BTreeMap::new();
    for (name, value) in &raw.attrs {
        if name == ATTR_STATUS || name == ATTR_MOD_TIME {
            continue;
        }
        attributes.insert(name.clone(), Value::String(value.clone()));
    }
    for (path, values) in &raw.fields {
        if path == FIELD_UNIQUE_ID || path == FIELD_AGENT_NAME {
            continue;
        }
        attributes.insert(path.clone(), passthrough_value(values));
    }

    Ok(Listing {
        unique_id,
        status,
        agent_name,
        mod_time,
        attributes,
    })
}

/// Single-element wrappers collapse to scalars; anything else stays a list.
fn passthrough_value(values: &[String]) -> Value {
    match values {
        [single] => Value::String(single.clone()),
        many => Value::Array(many.iter().cloned().map(Value::String).collect()),
    }
}

fn scalar<'a>(raw: &'a RawRecord, field: &str) -> Result<&'a str, ShapeError> {
    match optional_scalar(raw, field)? {
        Some(value) => Ok(value),
        None => Err(ShapeError::new(
            field,
            "expected exactly one value, found none",
        )),
    }
}

fn optional_scalar<'a>(raw: &'a RawRecord, field: &str) -> Result<Option<&'a str>, ShapeError> {
    match raw.fields.get(field).map(Vec::as_slice) {
        None | Some([]) => Ok(None),
        Some([value]) => Ok(Some(value.as_str())),
        Some(values) => Err(ShapeError::new(
            field,
            format!("expected exactly one value, found {}", values.len()),
        )),
    }
}

fn attribute<'a>(raw: &'a RawRecord, name: &str) -> Result<&'a str, ShapeError> {
    raw.attrs
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| ShapeError::new(name, "record is missing this attribute"))
}

fn parse_mod_time(raw: &str) -> Result<NaiveDateTime, ShapeError> {
    for format in MOD_TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed);
        }
    }
    Err(ShapeError::new(
        ATTR_MOD_TIME,
        format!("unparseable timestamp '{}'", raw),
    ))
}

// ============================================================================
// TESTS
// ============================================================================
