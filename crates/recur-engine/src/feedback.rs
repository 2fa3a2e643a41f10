//! User-facing feedback
//!
//! Pre-commit notes describe what *will* happen once the host commits;
//! post-commit notes describe what *happened*. Keeping the two apart makes
//! the deferred respawn legible without explaining the channel.

use crate::error::Issue;
use std::fmt;

/// When the described effect takes place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reported before the host commits
    WillHappen,
    /// Reported after the effect was applied
    Happened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One feedback line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackEntry {
    pub phase: Phase,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for FeedbackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Info => write!(f, "{}", self.message),
            Severity::Warning => write!(f, "Warning: {}", self.message),
            Severity::Error => write!(f, "Error: {}", self.message),
        }
    }
}

/// Ordered feedback for one hook invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feedback {
    entries: Vec<FeedbackEntry>,
}

impl Feedback {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Note about an effect that follows the commit
    pub fn will_happen(&mut self, message: impl Into<String>) {
        self.push(Phase::WillHappen, Severity::Info, message);
    }

    /// Note about an effect already applied
    pub fn happened(&mut self, message: impl Into<String>) {
        self.push(Phase::Happened, Severity::Info, message);
    }

    /// Report an issue; validation issues are errors, the rest warnings
    pub fn issue(&mut self, phase: Phase, issue: &Issue) {
        let severity = if issue.is_blocking() {
            Severity::Error
        } else {
            Severity::Warning
        };
        if issue.is_blocking() {
            tracing::error!("{}", issue);
        } else if issue.requires_manual_action() {
            tracing::warn!(manual = true, "{}", issue);
        } else if issue.is_auto_remediated() {
            tracing::info!("{}", issue);
        } else {
            tracing::warn!("{}", issue);
        }
        self.push(phase, severity, issue.to_string());
    }

    /// Report several issues
    pub fn issues<'a>(&mut self, phase: Phase, issues: impl IntoIterator<Item = &'a Issue>) {
        for issue in issues {
            self.issue(phase, issue);
        }
    }

    pub fn push(&mut self, phase: Phase, severity: Severity, message: impl Into<String>) {
        self.entries.push(FeedbackEntry {
            phase,
            severity,
            message: message.into(),
        });
    }

    /// Append all entries of `other`
    pub fn extend(&mut self, other: Feedback) {
        self.entries.extend(other.entries);
    }

    #[must_use]
    pub fn entries(&self) -> &[FeedbackEntry] {
        &self.entries
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest severity reported, if any
    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.entries.iter().map(|e| e.severity).max()
    }

    /// Whether any entry contains `needle`
    #[must_use]
    pub fn mentions(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(needle))
    }

    /// Rendered lines, in order
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}
