//! Property tests for the model layer

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use recur_model::datecalc::{
    chained_anchor, format_duration, format_offset, parse_duration, parse_offset, periodic_anchor,
};
use recur_model::fields::{
    field_class, FieldClass, INSTANCE_EXCLUSIVE_FIELDS, SYSTEM_FIELDS, TEMPLATE_EXCLUSIVE_FIELDS,
};
use recur_model::{classify, Record, RecordKind, TaskId};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap()
}

proptest! {
    #[test]
    fn prop_periodic_anchor_is_linear(secs in 1i64..=400 * 86_400, index in 1u32..500) {
        let period = TimeDelta::seconds(secs);
        let anchor = periodic_anchor(base(), period, index).unwrap();
        prop_assert_eq!(anchor, base() + TimeDelta::seconds(secs * i64::from(index - 1)));
        if index > 1 {
            prop_assert!(anchor > base());
        }
    }

    #[test]
    fn prop_consecutive_periodic_anchors_differ_by_period(secs in 1i64..=30 * 86_400, index in 1u32..200) {
        let period = TimeDelta::seconds(secs);
        let this = periodic_anchor(base(), period, index).unwrap();
        let next = periodic_anchor(base(), period, index + 1).unwrap();
        prop_assert_eq!(next - this, period);
    }

    #[test]
    fn prop_chained_anchor_ignores_own_due(
        terminal_offset in -10_000i64..10_000,
        secs in 1i64..=30 * 86_400,
    ) {
        let terminal = base() + TimeDelta::seconds(terminal_offset);
        let next = chained_anchor(terminal, TimeDelta::seconds(secs)).unwrap();
        prop_assert_eq!(next - terminal, TimeDelta::seconds(secs));
    }

    #[test]
    fn prop_rendered_durations_parse_back(secs in 1i64..=10 * 365 * 86_400) {
        let duration = TimeDelta::seconds(secs);
        prop_assert_eq!(parse_duration(&format_duration(duration)).unwrap(), duration);
    }

    #[test]
    fn prop_rendered_offsets_keep_sign(secs in -365i64 * 86_400..=365 * 86_400) {
        let offset = TimeDelta::seconds(secs);
        prop_assert_eq!(parse_offset(&format_offset(offset)).unwrap(), offset);
    }

    #[test]
    fn prop_unknown_fields_are_shared(name in "[a-z]{1,12}") {
        let listed = TEMPLATE_EXCLUSIVE_FIELDS.contains(&name.as_str())
            || INSTANCE_EXCLUSIVE_FIELDS.contains(&name.as_str())
            || SYSTEM_FIELDS.contains(&name.as_str());
        prop_assume!(!listed);
        prop_assert_eq!(field_class(&name), FieldClass::Shared);
    }

    #[test]
    fn prop_classification_never_accepts_mixed_markers(
        with_period in any::<bool>(),
        with_ref in any::<bool>(),
        with_index in any::<bool>(),
    ) {
        let mut record = Record::new().with("description", "x");
        if with_period {
            record.set("r", "7d");
        }
        if with_ref {
            record.set("rtemplate", TaskId::new().to_string());
        }
        if with_index {
            record.set("rindex", 1_u32);
        }
        match classify(&record) {
            Ok(RecordKind::Template) => prop_assert!(with_period && !with_ref && !with_index),
            Ok(RecordKind::Instance) => prop_assert!(!with_period && with_ref && with_index),
            Ok(RecordKind::Plain) => prop_assert!(!with_period && !with_ref && !with_index),
            Err(_) => prop_assert!((with_period && (with_ref || with_index)) || (with_ref != with_index)),
        }
    }
}
