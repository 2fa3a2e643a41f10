//! Recurrence Model - records, field classes and date calculus
//!
//! The data layer of the recurrence engine:
//! - Open-shape task records decoded from the host's JSON
//! - The four exhaustively enumerated field classes
//! - Classification of records as template, instance or plain
//! - Duration parsing and anchor arithmetic
//!
//! # Core Concepts
//!
//! - **Template**: a record with status `recurring` holding the rules
//!   (`r`, `type`, `ranchor`, `rlast`, offsets).
//! - **Instance**: user-facing work spawned from a template, linked by
//!   `rtemplate` and numbered by `rindex`.
//! - **Anchor**: the date field (`due` or `scheduled`) instance dates are
//!   computed from.
//!
//! # Example
//!
//! ```rust,ignore
//! use recur_model::{classify, datecalc, Record, RecordKind};
//!
//! let record = Record::from_json_str(r#"{"description":"Water plants","r":"7d","due":"20240131T120000Z"}"#)?;
//! assert_eq!(classify(&record)?, RecordKind::Template);
//!
//! let third = datecalc::periodic_anchor(record.anchor_date().unwrap(), record.period().unwrap(), 3)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod classify;
pub mod datecalc;
pub mod fields;
pub mod record;
pub mod recurrence;
pub mod value;

pub use classify::{classify, ClassificationError, RecordKind};
pub use datecalc::DateError;
pub use fields::{field_class, FieldClass};
pub use record::{FieldChange, Record, RecordError, Status, TaskId};
pub use recurrence::{AnchorField, RecurrenceType};
pub use value::{Annotation, FieldValue};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
