//! Error types for the recurrence engine
//!
//! Only [`ValidationError`] blocks an operation. Every other class is
//! collected as an [`Issue`], reported to the user, and the operation
//! proceeds:
//! - [`StructuralWarning`]: auto-remediated (stripped fields, index resync)
//! - [`ConsistencyError`]: not auto-remediated, needs manual action
//! - [`PropagationFailure`]: best-effort propagation did not apply
//! - [`OrphanError`]: an instance's template is gone

use recur_model::{ClassificationError, DateError, FieldClass, RecordError, TaskId};
use std::path::PathBuf;

/// Blocking problems with a proposed record
///
/// Any of these aborts the operation and hands the original record back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Record kind could not be determined
    #[error(transparent)]
    Classification(#[from] ClassificationError),

    /// Template without a usable anchor date
    #[error("recurring task must have a 'due' or 'scheduled' date")]
    MissingAnchor,

    /// `ranchor` names something other than due/scheduled
    #[error("invalid anchor field '{value}' (expected 'due' or 'scheduled')")]
    InvalidAnchorField { value: String },

    /// Period text not understood
    #[error("invalid recurrence period '{value}'")]
    InvalidPeriod { value: String },

    /// Period of zero or less
    #[error("recurrence period must be positive, got '{value}'")]
    NonPositivePeriod { value: String },

    /// A date or relative expression not understood
    #[error("invalid value for '{field}': '{value}'")]
    InvalidDate { field: String, value: String },

    /// Wait must fall strictly before the anchor
    #[error("wait must be before the {anchor_field} date (offset {offset})")]
    WaitNotBeforeAnchor { anchor_field: String, offset: String },

    /// Until must fall strictly after the anchor
    #[error("until must be after the {anchor_field} date (offset {offset})")]
    UntilNotAfterAnchor { anchor_field: String, offset: String },

    /// `rlast` must be a whole number >= 1
    #[error("invalid last index '{value}' (must be a whole number >= 1)")]
    InvalidIndex { value: String },

    /// The period was removed from an existing template
    #[error("cannot remove the recurrence period from a template; delete the template to stop recurrence")]
    PeriodRemoved,

    /// Incoming hook payload could not be decoded
    #[error(transparent)]
    MalformedRecord(#[from] RecordError),
}

/// Non-blocking problems that were fixed automatically
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralWarning {
    /// Legacy or host-native recurrence field removed on template creation
    #[error("removed legacy recurrence field '{field}'")]
    LegacyFieldStripped { field: String },

    /// Field not allowed on this kind of record
    #[error("removed {class} field '{field}' from {kind}")]
    FieldClassStripped {
        field: String,
        class: FieldClass,
        kind: &'static str,
    },

    /// Lineage marker edit undone
    #[error("'{field}' cannot be changed on an instance; edit reverted")]
    ImmutableFieldReverted { field: String },

    /// Unknown recurrence type replaced by the default
    #[error("unknown recurrence type '{value}', using 'period'")]
    UnknownType { value: String },

    /// Template's last index corrected to match its active instance
    #[error("template {template}: last index corrected from {from} to {to} to match its active instance")]
    IndexResynced { template: TaskId, from: u32, to: u32 },
}

/// Invariant violations that the engine refuses to repair by guessing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    /// More than one active instance for one template
    #[error("template {template} has {} active instances ({}); keep one and delete or complete the others",
        .instances.len(), list_instances(.instances))]
    MultipleActiveInstances {
        template: TaskId,
        /// `(instance id, index)` pairs
        instances: Vec<(TaskId, u32)>,
    },
}

fn list_instances(instances: &[(TaskId, u32)]) -> String {
    instances
        .iter()
        .map(|(id, index)| format!("{} #{index}", id.short()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Best-effort propagation that did not take effect
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropagationFailure {
    /// Channel content could not be parsed; it was discarded
    #[error("discarded malformed propagation message: {0}")]
    MalformedMessage(String),

    /// The channel itself could not be read or written
    #[error("propagation channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Message target no longer exists
    #[error("propagation target {0} not found")]
    TargetMissing(TaskId),

    /// A pending message was overwritten before it was applied
    #[error("pending update for template {target} ({reason}) was superseded")]
    Superseded { target: TaskId, reason: String },

    /// Applying updates or respawning failed
    #[error("could not update template {target}: {reason}")]
    ApplyFailed { target: TaskId, reason: String },
}

/// Instance whose template reference resolves to nothing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrphanError {
    #[error("instance {instance} refers to missing template {template}")]
    MissingTemplate { instance: TaskId, template: TaskId },
}

/// External store failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Record does not exist
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// Store command could not be started
    #[error("failed to run store command: {0}")]
    Spawn(String),

    /// Store command exited unsuccessfully
    #[error("store command `{command}` failed ({code}): {stderr}")]
    CommandFailed {
        command: String,
        code: String,
        stderr: String,
    },

    /// Store output could not be decoded
    #[error("unreadable store output: {0}")]
    Decode(String),
}

/// Propagation channel failures
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored content is not a message; already discarded
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Configuration failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

/// Instance computation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    /// Template lacks a field the computation needs
    #[error("template {template} is missing '{field}'")]
    MissingField { template: String, field: &'static str },

    /// Date arithmetic failed
    #[error(transparent)]
    Date(#[from] DateError),

    /// A periodic anchor for index > 1 did not land after the template anchor
    #[error("calculation bug: instance #{index} anchor {anchor} is not after template anchor {base}")]
    CalculationBug {
        index: u32,
        anchor: String,
        base: String,
    },

    /// Respawn refused because the lineage is corrupt
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("spawn failed: {0}")]
    Spawn(#[from] SpawnError),
}

impl EngineError {
    /// Whether the error aborts the current operation
    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// A reported problem of any class
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Issue {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Structural(#[from] StructuralWarning),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    Propagation(#[from] PropagationFailure),

    #[error(transparent)]
    Orphan(#[from] OrphanError),
}

impl Issue {
    /// Check if the issue aborts the operation
    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if the user has to fix something by hand
    #[inline]
    #[must_use]
    pub fn requires_manual_action(&self) -> bool {
        matches!(self, Self::Consistency(_) | Self::Orphan(_))
    }

    /// Check if the engine already repaired it
    #[inline]
    #[must_use]
    pub fn is_auto_remediated(&self) -> bool {
        matches!(self, Self::Structural(_))
    }
}
