//! Record classification
//!
//! Decides from field presence alone whether a record is a template, an
//! instance, or a plain task the engine leaves alone.

use crate::fields;
use crate::record::Record;

/// What a record is, as far as recurrence is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Carries recurrence rules
    Template,
    /// Spawned from a template
    Instance,
    /// Untouched by the engine
    Plain,
}

/// Classification errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassificationError {
    /// Markers of both kinds, or an incomplete set of instance markers
    #[error("ambiguous record kind: {detail}")]
    AmbiguousRecordKind {
        /// Which markers were found
        detail: String,
    },
}

/// Classify a record
///
/// A period without instance markers makes a template even when the anchor
/// date is missing, so that template creation can reject it with a proper
/// validation message instead of letting it through as a plain task.
///
/// # Errors
/// Returns [`ClassificationError::AmbiguousRecordKind`] when template and
/// instance markers coexist, or when only one of `rtemplate`/`rindex` is set.
pub fn classify(record: &Record) -> Result<RecordKind, ClassificationError> {
    let has_period = record.contains(fields::PERIOD);
    let has_template_ref = record.contains(fields::TEMPLATE_REF);
    let has_index = record.contains(fields::INDEX);

    match (has_period, has_template_ref, has_index) {
        (false, false, false) => Ok(RecordKind::Plain),
        (true, false, false) => Ok(RecordKind::Template),
        (false, true, true) => Ok(RecordKind::Instance),
        (true, _, _) => Err(ClassificationError::AmbiguousRecordKind {
            detail: format!(
                "'{}' present alongside instance marker(s) {}",
                fields::PERIOD,
                present_markers(record)
            ),
        }),
        (false, _, _) => Err(ClassificationError::AmbiguousRecordKind {
            detail: format!(
                "incomplete instance markers {}; both '{}' and '{}' are required",
                present_markers(record),
                fields::TEMPLATE_REF,
                fields::INDEX
            ),
        }),
    }
}

fn present_markers(record: &Record) -> String {
    fields::INSTANCE_EXCLUSIVE_FIELDS
        .iter()
        .filter(|name| record.contains(name))
        .map(|name| format!("'{name}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TaskId;

    #[test]
    fn plain_template_instance() {
        let plain = Record::new().with("description", "buy milk");
        assert_eq!(classify(&plain), Ok(RecordKind::Plain));

        let template = plain.clone().with("r", "7d").with("due", "20240131T120000Z");
        assert_eq!(classify(&template), Ok(RecordKind::Template));

        let instance = plain
            .with("rtemplate", TaskId::new().to_string())
            .with("rindex", 1_u32);
        assert_eq!(classify(&instance), Ok(RecordKind::Instance));
    }

    #[test]
    fn period_without_anchor_is_still_a_template() {
        let record = Record::new().with("r", "7d");
        assert_eq!(classify(&record), Ok(RecordKind::Template));
    }

    #[test]
    fn contradictory_markers() {
        let record = Record::new()
            .with("r", "7d")
            .with("rtemplate", TaskId::new().to_string())
            .with("rindex", 2_u32);
        assert!(matches!(
            classify(&record),
            Err(ClassificationError::AmbiguousRecordKind { .. })
        ));
    }

    #[test]
    fn partial_instance_markers() {
        let record = Record::new().with("rindex", 2_u32);
        let err = classify(&record).unwrap_err();
        assert!(err.to_string().contains("'rindex'"));
    }
}
