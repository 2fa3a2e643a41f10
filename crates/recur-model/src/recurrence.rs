//! Recurrence type and anchor field

use serde::{Deserialize, Serialize};
use std::fmt;

/// How instance anchors are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceType {
    /// Fixed schedule: `anchor + period × (index − 1)`
    #[default]
    Period,
    /// Completion-relative: `terminal timestamp + period`
    Chain,
}

impl RecurrenceType {
    const SPELLINGS: &'static [(&'static str, Self)] = &[
        ("period", Self::Period),
        ("periodic", Self::Period),
        ("chain", Self::Chain),
        ("chained", Self::Chain),
    ];

    /// Match a case-insensitive prefix of `period`/`chain` (or their
    /// `periodic`/`chained` aliases)
    ///
    /// Returns `None` when the text is empty, matches nothing, or matches both
    /// types.
    #[must_use]
    pub fn from_prefix(text: &str) -> Option<Self> {
        let needle = text.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return None;
        }
        let mut found: Option<Self> = None;
        for (spelling, kind) in Self::SPELLINGS {
            if spelling.starts_with(&needle) {
                match found {
                    Some(existing) if existing != *kind => return None,
                    _ => found = Some(*kind),
                }
            }
        }
        found
    }

    /// Canonical stored spelling
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Period => "period",
            Self::Chain => "chain",
        }
    }

    /// Whether deleting an instance spawns the next one
    #[inline]
    #[must_use]
    pub fn spawns_on_delete(self) -> bool {
        matches!(self, Self::Chain)
    }
}

impl fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which date field the schedule is anchored on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorField {
    #[default]
    Due,
    Scheduled,
}

impl AnchorField {
    /// Parse `due`, `scheduled` or `sched`, ignoring case
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "due" => Some(Self::Due),
            "scheduled" | "sched" => Some(Self::Scheduled),
            _ => None,
        }
    }

    /// Name of the date field on the record
    #[must_use]
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Due => crate::fields::DUE,
            Self::Scheduled => crate::fields::SCHEDULED,
        }
    }
}

impl fmt::Display for AnchorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}
