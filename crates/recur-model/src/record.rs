//! Task records
//!
//! A [`Record`] is an ordered map from field name to [`FieldValue`]. Field
//! order follows the host's JSON so that records pass through unchanged when
//! the engine has nothing to say about them.

use crate::fields;
use crate::recurrence::{AnchorField, RecurrenceType};
use crate::value::FieldValue;
use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable record identity (the host's `uuid` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate new task ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, as the host abbreviates identities
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Host task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Waiting,
    Completed,
    Deleted,
    /// Marks a template
    Recurring,
}

impl Status {
    /// Pending-like: counts towards the one-active-instance rule
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Waiting)
    }

    /// Completed or deleted
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Deleted)
    }

    /// Wire spelling
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
            Self::Recurring => "recurring",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "waiting" => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            "deleted" => Ok(Self::Deleted),
            "recurring" => Ok(Self::Recurring),
            _ => Err(RecordError::UnknownStatus(s.to_string())),
        }
    }
}

/// Record decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Input is not valid JSON
    #[error("malformed task JSON: {0}")]
    MalformedJson(String),

    /// JSON is valid but not an object
    #[error("task JSON must be an object")]
    NotAnObject,

    /// Status text not recognised
    #[error("unknown status '{0}'")]
    UnknownStatus(String),
}

/// One changed field between two versions of a record
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<FieldValue>,
    pub after: Option<FieldValue>,
}

impl FieldChange {
    /// Whether the field was removed
    #[inline]
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.after.is_none()
    }
}

/// A task record with an open set of fields
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: IndexMap<String, FieldValue>,
}

impl Record {
    /// Empty record
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Decode a host JSON object
    ///
    /// # Errors
    /// Returns [`RecordError::NotAnObject`] for non-object JSON.
    pub fn from_json_value(value: &Value) -> Result<Self, RecordError> {
        let obj = value.as_object().ok_or(RecordError::NotAnObject)?;
        let fields = obj
            .iter()
            .map(|(name, raw)| (name.clone(), FieldValue::decode(name, raw)))
            .collect();
        Ok(Self { fields })
    }

    /// Decode one line of host JSON
    ///
    /// # Errors
    /// Returns [`RecordError::MalformedJson`] or [`RecordError::NotAnObject`].
    pub fn from_json_str(text: &str) -> Result<Self, RecordError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| RecordError::MalformedJson(e.to_string()))?;
        Self::from_json_value(&value)
    }

    /// Encode as a host JSON object
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        let obj: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        Value::Object(obj)
    }

    /// Encode as a single JSON line
    #[must_use]
    pub fn to_json_string(&self) -> String {
        self.to_json_value().to_string()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Insert or replace a field, keeping its position if it already exists
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Remove a field, preserving the order of the rest
    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.shift_remove(field)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Iterate fields in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Field names in order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy every field of `other` onto this record
    pub fn merge(&mut self, other: &Record) {
        for (name, value) in other.iter() {
            self.set(name, value.clone());
        }
    }

    // ---- typed accessors ----

    /// Stable identity
    #[must_use]
    pub fn uuid(&self) -> Option<TaskId> {
        self.get(fields::UUID)?.as_text()?.parse().ok()
    }

    /// Host's short numeric id (0 or absent for terminal records)
    #[must_use]
    pub fn display_id(&self) -> Option<u32> {
        self.get(fields::ID)?.as_integer().filter(|id| *id > 0)
    }

    /// How to refer to this record in a command: numeric id, else short uuid
    #[must_use]
    pub fn reference(&self) -> String {
        match (self.display_id(), self.uuid()) {
            (Some(id), _) => id.to_string(),
            (None, Some(uuid)) => uuid.short(),
            (None, None) => "?".to_string(),
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<Status> {
        self.get(fields::STATUS)?.as_text()?.parse().ok()
    }

    pub fn set_status(&mut self, status: Status) {
        self.set(fields::STATUS, status.as_str());
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.get(fields::DESCRIPTION)?.as_text()
    }

    /// Date stored in `field`
    #[must_use]
    pub fn date(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get(field)?.as_date()
    }

    /// Recurrence period
    #[must_use]
    pub fn period(&self) -> Option<TimeDelta> {
        self.get(fields::PERIOD)?.as_duration()
    }

    /// Stored recurrence type; an absent or unrecognised value is `Period`
    #[must_use]
    pub fn recurrence_type(&self) -> RecurrenceType {
        self.get(fields::TYPE)
            .and_then(FieldValue::as_text)
            .and_then(RecurrenceType::from_prefix)
            .unwrap_or_default()
    }

    /// Anchor field: explicit `ranchor`, else `due` if present, else
    /// `scheduled` if present
    #[must_use]
    pub fn anchor_field(&self) -> Option<AnchorField> {
        if let Some(explicit) = self
            .get(fields::ANCHOR)
            .and_then(FieldValue::as_text)
            .and_then(AnchorField::parse)
        {
            return Some(explicit);
        }
        if self.contains(fields::DUE) {
            Some(AnchorField::Due)
        } else if self.contains(fields::SCHEDULED) {
            Some(AnchorField::Scheduled)
        } else {
            None
        }
    }

    /// Value of the anchor date field
    #[must_use]
    pub fn anchor_date(&self) -> Option<DateTime<Utc>> {
        self.date(self.anchor_field()?.field_name())
    }

    #[must_use]
    pub fn last_index(&self) -> Option<u32> {
        self.get(fields::LAST_INDEX)?.as_integer()
    }

    #[must_use]
    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.date(fields::END_DATE)
    }

    /// Signed offset stored in one of the relative offset fields
    #[must_use]
    pub fn offset(&self, field: &str) -> Option<TimeDelta> {
        self.get(field)?.as_offset()
    }

    #[must_use]
    pub fn template_ref(&self) -> Option<TaskId> {
        self.get(fields::TEMPLATE_REF)?.as_text()?.parse().ok()
    }

    /// Instance index
    #[must_use]
    pub fn index(&self) -> Option<u32> {
        self.get(fields::INDEX)?.as_integer()
    }

    /// Fields that differ between `self` (before) and `after`, in the order
    /// they appear in `self` followed by fields only present in `after`
    #[must_use]
    pub fn diff(&self, after: &Record) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        for (name, before) in &self.fields {
            match after.get(name) {
                Some(value) if value == before => {}
                other => changes.push(FieldChange {
                    field: name.clone(),
                    before: Some(before.clone()),
                    after: other.cloned(),
                }),
            }
        }
        for (name, value) in &after.fields {
            if !self.fields.contains_key(name) {
                changes.push(FieldChange {
                    field: name.clone(),
                    before: None,
                    after: Some(value.clone()),
                });
            }
        }
        changes
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a FieldValue);
    type IntoIter = indexmap::map::Iter<'a, String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json_value(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEMPLATE_JSON: &str = r#"{"uuid":"5f0c1a52-3a2c-4d4e-9d55-1f2f3c4d5e6f","description":"Water plants","status":"recurring","r":"7d","type":"period","due":"20240131T120000Z","rlast":"1","project":"home"}"#;

    #[test]
    fn decodes_host_json() {
        let record = Record::from_json_str(TEMPLATE_JSON).unwrap();
        assert_eq!(record.status(), Some(Status::Recurring));
        assert_eq!(record.period(), Some(TimeDelta::days(7)));
        assert_eq!(record.recurrence_type(), RecurrenceType::Period);
        assert_eq!(record.anchor_field(), Some(AnchorField::Due));
        assert_eq!(record.last_index(), Some(1));
        assert_eq!(record.description(), Some("Water plants"));
        assert!(record.uuid().is_some());
    }

    #[test]
    fn preserves_field_order() {
        let record = Record::from_json_str(TEMPLATE_JSON).unwrap();
        let names: Vec<_> = record.field_names().collect();
        assert_eq!(names.first(), Some(&"uuid"));
        assert_eq!(names.last(), Some(&"project"));

        let reencoded = Record::from_json_str(&record.to_json_string()).unwrap();
        assert_eq!(reencoded.field_names().collect::<Vec<_>>(), names);
        assert!(record.to_json_string().starts_with("{\"uuid\":"));
    }

    #[test]
    fn rejects_non_objects() {
        assert_eq!(Record::from_json_str("[1,2]"), Err(RecordError::NotAnObject));
        assert!(matches!(
            Record::from_json_str("{not json"),
            Err(RecordError::MalformedJson(_))
        ));
    }

    #[test]
    fn explicit_anchor_field_wins() {
        let record = Record::new()
            .with("due", FieldValue::Date(Utc::now()))
            .with("scheduled", FieldValue::Date(Utc::now()))
            .with("ranchor", "sched");
        assert_eq!(record.anchor_field(), Some(AnchorField::Scheduled));
    }

    #[test]
    fn diff_reports_changes_additions_and_removals() {
        let before = Record::new().with("r", "7d").with("project", "home").with("priority", "H");
        let after = Record::new().with("r", "14d").with("project", "home").with("tags", "x");
        let changed: Vec<_> = before.diff(&after).into_iter().map(|c| c.field).collect();
        assert_eq!(changed, vec!["r", "priority", "tags"]);
    }

    #[test]
    fn status_activity() {
        assert!(Status::Pending.is_active());
        assert!(Status::Waiting.is_active());
        assert!(!Status::Recurring.is_active());
        assert!(Status::Deleted.is_terminal());
    }

    #[test]
    fn reference_prefers_numeric_id() {
        let id = TaskId::new();
        let record = Record::new().with("uuid", id.to_string());
        assert_eq!(record.reference(), id.short());
        let record = record.with("id", 12_u32);
        assert_eq!(record.reference(), "12");
    }
}
