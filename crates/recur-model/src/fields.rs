//! Field names and the four field classes
//!
//! Every field a record can carry belongs to exactly one class:
//!
//! | class | copied to instances | allowed on templates | allowed on instances |
//! |-------|---------------------|----------------------|----------------------|
//! | [`FieldClass::TemplateExclusive`] | no | yes | no |
//! | [`FieldClass::InstanceExclusive`] | no | no | yes |
//! | [`FieldClass::System`] | no | yes | yes |
//! | [`FieldClass::Shared`] | yes | yes | yes |
//!
//! The first three are closed, exhaustively enumerated constants; anything
//! not listed is shared.

/// Recurrence period (duration)
pub const PERIOD: &str = "r";
/// Recurrence type (`period` | `chain`)
pub const TYPE: &str = "type";
/// Name of the anchor date field (`due` | `scheduled`)
pub const ANCHOR: &str = "ranchor";
/// Index of the most recently spawned instance
pub const LAST_INDEX: &str = "rlast";
/// Optional end of recurrence
pub const END_DATE: &str = "rend";
/// Wait offset from the anchor
pub const WAIT_OFFSET: &str = "rwait";
/// Scheduled offset from the anchor
pub const SCHEDULED_OFFSET: &str = "rscheduled";
/// Until offset from the anchor
pub const UNTIL_OFFSET: &str = "runtil";

/// Parent template reference
pub const TEMPLATE_REF: &str = "rtemplate";
/// Instance index within its template lineage
pub const INDEX: &str = "rindex";

/// Transient mark carried by mutations the engine issues itself
pub const ORIGIN: &str = "rorigin";

pub const UUID: &str = "uuid";
pub const ID: &str = "id";
pub const STATUS: &str = "status";
pub const DESCRIPTION: &str = "description";
pub const ENTRY: &str = "entry";
pub const MODIFIED: &str = "modified";
pub const START: &str = "start";
pub const END: &str = "end";
pub const DUE: &str = "due";
pub const SCHEDULED: &str = "scheduled";
pub const WAIT: &str = "wait";
pub const UNTIL: &str = "until";
pub const TAGS: &str = "tags";
pub const DEPENDS: &str = "depends";
pub const ANNOTATIONS: &str = "annotations";
pub const URGENCY: &str = "urgency";

/// Fields that only a template may carry
pub const TEMPLATE_EXCLUSIVE_FIELDS: &[&str] = &[
    PERIOD,
    TYPE,
    ANCHOR,
    LAST_INDEX,
    END_DATE,
    WAIT_OFFSET,
    SCHEDULED_OFFSET,
    UNTIL_OFFSET,
];

/// Fields that only an instance may carry
pub const INSTANCE_EXCLUSIVE_FIELDS: &[&str] = &[TEMPLATE_REF, INDEX];

/// Host-managed or per-instance computed fields, never copied verbatim
pub const SYSTEM_FIELDS: &[&str] = &[
    ID,
    UUID,
    STATUS,
    ENTRY,
    MODIFIED,
    START,
    END,
    URGENCY,
    DUE,
    SCHEDULED,
    WAIT,
    UNTIL,
    ORIGIN,
    "mask",
    "imask",
    "parent",
    "recur",
];

/// Recurrence fields from the host's native scheme or retired versions
///
/// Stripped with a warning when a template is created.
pub const LEGACY_RECURRENCE_FIELDS: &[&str] = &["recur", "mask", "imask", "parent", "rlimit"];

/// Field class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldClass {
    /// Recurrence rules; template only
    TemplateExclusive,
    /// Lineage markers; instance only
    InstanceExclusive,
    /// Managed by the host or computed per instance
    System,
    /// Copied from template to instance
    Shared,
}

impl FieldClass {
    /// Human-readable class name
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::TemplateExclusive => "template-only",
            Self::InstanceExclusive => "instance-only",
            Self::System => "system",
            Self::Shared => "shared",
        }
    }
}

impl std::fmt::Display for FieldClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a field name
#[must_use]
pub fn field_class(name: &str) -> FieldClass {
    if TEMPLATE_EXCLUSIVE_FIELDS.contains(&name) {
        FieldClass::TemplateExclusive
    } else if INSTANCE_EXCLUSIVE_FIELDS.contains(&name) {
        FieldClass::InstanceExclusive
    } else if SYSTEM_FIELDS.contains(&name) {
        FieldClass::System
    } else {
        FieldClass::Shared
    }
}

/// Whether a field is copied verbatim from a template onto a new instance
#[inline]
#[must_use]
pub fn is_copied(name: &str) -> bool {
    field_class(name) == FieldClass::Shared
}

/// Whether a legacy or foreign recurrence field
#[inline]
#[must_use]
pub fn is_legacy(name: &str) -> bool {
    LEGACY_RECURRENCE_FIELDS.contains(&name)
}

/// How a field's value is represented on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    /// Absolute date
    Date,
    /// Unsigned duration
    Duration,
    /// Signed offset from the anchor
    Offset,
    /// Integer counter
    Integer,
    /// List of strings
    List,
    /// Annotation entries
    Annotations,
    /// Anything else, decoded from the JSON shape
    Free,
}

/// Wire representation for a field name
#[must_use]
pub fn wire_kind(name: &str) -> WireKind {
    match name {
        DUE | SCHEDULED | WAIT | UNTIL | ENTRY | MODIFIED | START | END | END_DATE => {
            WireKind::Date
        }
        PERIOD => WireKind::Duration,
        WAIT_OFFSET | SCHEDULED_OFFSET | UNTIL_OFFSET => WireKind::Offset,
        LAST_INDEX | INDEX | ID => WireKind::Integer,
        TAGS | DEPENDS => WireKind::List,
        ANNOTATIONS => WireKind::Annotations,
        _ => WireKind::Free,
    }
}
