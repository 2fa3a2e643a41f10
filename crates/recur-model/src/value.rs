//! Field values
//!
//! Records have an open shape, so values are a small closed set of variants
//! decoded from the host's JSON with a field-name-aware table
//! (see [`crate::fields::wire_kind`]).

use crate::datecalc::{self, format_date, format_duration, format_offset};
use crate::fields::{self, WireKind};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Number, Value};

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Free text, or any value that failed typed decoding
    Text(String),
    /// Numeric value
    Number(f64),
    /// Absolute date
    Date(DateTime<Utc>),
    /// Duration; signed when used as an offset from the anchor
    Duration(TimeDelta),
    /// List of strings (tags, dependency references)
    List(Vec<String>),
    /// Annotation entries
    Annotations(Vec<Annotation>),
}

/// Timestamped note attached to a record
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// When the note was added
    pub entry: DateTime<Utc>,
    /// Note text
    pub description: String,
}

impl Annotation {
    /// Create annotation
    #[inline]
    #[must_use]
    pub fn new(entry: DateTime<Utc>, description: impl Into<String>) -> Self {
        Self {
            entry,
            description: description.into(),
        }
    }
}

impl FieldValue {
    /// Text value
    #[inline]
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Integer value
    #[inline]
    #[must_use]
    pub fn integer(value: u32) -> Self {
        Self::Number(f64::from(value))
    }

    /// Borrow as text
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret as a date
    #[must_use]
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            Self::Text(s) => datecalc::parse_date(s).ok(),
            _ => None,
        }
    }

    /// Interpret as a duration
    #[must_use]
    pub fn as_duration(&self) -> Option<TimeDelta> {
        match self {
            Self::Duration(d) => Some(*d),
            Self::Text(s) => datecalc::parse_duration(s).ok(),
            _ => None,
        }
    }

    /// Interpret as a signed offset
    #[must_use]
    pub fn as_offset(&self) -> Option<TimeDelta> {
        match self {
            Self::Duration(d) => Some(*d),
            Self::Text(s) => datecalc::parse_offset(s).ok(),
            _ => None,
        }
    }

    /// Interpret as a non-negative whole number
    #[must_use]
    pub fn as_integer(&self) -> Option<u32> {
        match self {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Self::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(u32::MAX) => {
                Some(*n as u32)
            }
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow as a list
    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as annotations
    #[must_use]
    pub fn as_annotations(&self) -> Option<&[Annotation]> {
        match self {
            Self::Annotations(items) => Some(items),
            _ => None,
        }
    }

    /// Whether the value carries no information (empty text or list)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Annotations(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Decode a JSON value for `field`
    ///
    /// Values that do not match the field's expected kind stay [`FieldValue::Text`]
    /// so they can be reported verbatim.
    #[must_use]
    pub fn decode(field: &str, value: &Value) -> Self {
        match (fields::wire_kind(field), value) {
            (WireKind::Date, Value::String(s)) => datecalc::parse_date(s)
                .map(Self::Date)
                .unwrap_or_else(|_| Self::Text(s.clone())),
            (WireKind::Duration, Value::String(s)) => datecalc::parse_duration(s)
                .map(Self::Duration)
                .unwrap_or_else(|_| Self::Text(s.clone())),
            (WireKind::Offset, Value::String(s)) => datecalc::parse_offset(s)
                .map(Self::Duration)
                .unwrap_or_else(|_| Self::Text(s.clone())),
            (WireKind::Integer, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Self::Number)
                .unwrap_or_else(|_| Self::Text(s.clone())),
            (WireKind::List, Value::String(s)) => Self::List(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            (WireKind::Annotations, Value::Array(items)) => {
                Self::Annotations(items.iter().filter_map(decode_annotation).collect())
            }
            (_, other) => Self::decode_free(other),
        }
    }

    fn decode_free(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s.clone()),
            Value::Number(n) => n
                .as_f64()
                .map_or_else(|| Self::Text(n.to_string()), Self::Number),
            Value::Array(items) => Self::List(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::Bool(b) => Self::Text(b.to_string()),
            Value::Null => Self::Text(String::new()),
            Value::Object(_) => Self::Text(value.to_string()),
        }
    }

    /// Encode for the host's JSON
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Number(n) => number_to_json(*n),
            Self::Date(d) => Value::String(format_date(*d)),
            Self::Duration(d) if *d < TimeDelta::zero() => Value::String(format_offset(*d)),
            Self::Duration(d) => Value::String(format_duration(*d)),
            Self::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
            Self::Annotations(items) => Value::Array(
                items
                    .iter()
                    .map(|a| {
                        let mut obj = Map::new();
                        obj.insert("entry".to_string(), Value::String(format_date(a.entry)));
                        obj.insert(
                            "description".to_string(),
                            Value::String(a.description.clone()),
                        );
                        Value::Object(obj)
                    })
                    .collect(),
            ),
        }
    }

    /// Render as a single command-line token value (`project:<this>`)
    #[must_use]
    pub fn to_wire_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => match number_to_json(*n) {
                Value::Number(num) => num.to_string(),
                other => other.to_string(),
            },
            Self::Date(d) => format_date(*d),
            Self::Duration(d) if *d < TimeDelta::zero() => format_offset(*d),
            Self::Duration(d) => format_duration(*d),
            Self::List(items) => items.join(","),
            Self::Annotations(items) => items
                .iter()
                .map(|a| a.description.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_wire_string())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<TimeDelta> for FieldValue {
    fn from(value: TimeDelta) -> Self {
        Self::Duration(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::integer(value)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn decode_annotation(value: &Value) -> Option<Annotation> {
    let obj = value.as_object()?;
    let description = obj.get("description")?.as_str()?.to_string();
    let entry = obj
        .get("entry")
        .and_then(Value::as_str)
        .and_then(|s| datecalc::parse_date(s).ok())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    Some(Annotation { entry, description })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_by_field_name() {
        assert!(matches!(
            FieldValue::decode("due", &json!("20240131T120000Z")),
            FieldValue::Date(_)
        ));
        assert_eq!(
            FieldValue::decode("r", &json!("7d")),
            FieldValue::Duration(TimeDelta::days(7))
        );
        assert_eq!(
            FieldValue::decode("rwait", &json!("due-2d")),
            FieldValue::Duration(TimeDelta::days(-2))
        );
        assert_eq!(FieldValue::decode("rlast", &json!("3")), FieldValue::Number(3.0));
        assert_eq!(
            FieldValue::decode("depends", &json!("a,b")),
            FieldValue::List(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn undecodable_values_stay_text() {
        assert_eq!(
            FieldValue::decode("r", &json!("weekly")),
            FieldValue::Text("weekly".into())
        );
        assert_eq!(
            FieldValue::decode("due", &json!("someday")),
            FieldValue::Text("someday".into())
        );
    }

    #[test]
    fn encodes_to_wire() {
        assert_eq!(FieldValue::integer(5).to_json(), json!(5));
        assert_eq!(FieldValue::Number(1.5).to_json(), json!(1.5));
        assert_eq!(FieldValue::Duration(TimeDelta::days(-2)).to_json(), json!("-2d"));
        assert_eq!(FieldValue::Duration(TimeDelta::days(7)).to_json(), json!("7d"));
        assert_eq!(FieldValue::integer(5).to_wire_string(), "5");
    }

    #[test]
    fn annotations_round_trip() {
        let raw = json!([{"entry": "20240131T120000Z", "description": "call back"}]);
        let decoded = FieldValue::decode("annotations", &raw);
        assert_eq!(decoded.to_json(), raw);
    }

    #[test]
    fn integer_interpretation() {
        assert_eq!(FieldValue::Number(4.0).as_integer(), Some(4));
        assert_eq!(FieldValue::Number(-1.0).as_integer(), None);
        assert_eq!(FieldValue::Number(1.5).as_integer(), None);
        assert_eq!(FieldValue::text("7").as_integer(), Some(7));
    }
}
