//! Property tests for spawning and respawning

use chrono::TimeDelta;
use proptest::prelude::*;
use recur_engine::validator::enforce_field_classes;
use recur_engine::{Origin, Spawner};
use recur_model::fields::{self, FieldClass};
use recur_model::{FieldValue, Record, RecordKind, TaskId};
use recur_test_utils::{day0, InMemoryStore};

fn template(period_days: i64, last_index: u32) -> Record {
    Record::new()
        .with("uuid", TaskId::new().to_string())
        .with("description", "Water plants")
        .with("status", "recurring")
        .with("r", FieldValue::Duration(TimeDelta::days(period_days)))
        .with("type", "period")
        .with("ranchor", "due")
        .with("due", day0())
        .with("rwait", FieldValue::Duration(TimeDelta::days(-1)))
        .with("rlast", last_index)
}

fn shared_name() -> impl Strategy<Value = String> {
    "[a-z]{2,10}".prop_filter("shared field names only", |name| {
        fields::field_class(name) == FieldClass::Shared
            && !matches!(name.as_str(), "annotations" | "tags" | "depends" | "description")
            && !fields::is_legacy(name)
    })
}

proptest! {
    #[test]
    fn respawn_is_deterministic(period in 1i64..60, index in 1u32..50) {
        let store = InMemoryStore::new();
        store.set_clock(day0());
        let template = template(period, index);
        let id = store.put(template);
        let spawner = Spawner::new(&store, Origin::new("recurrence"), day0());

        spawner.respawn(id, index).unwrap();
        let first = store.active_instances_of(id);
        spawner.respawn(id, index).unwrap();
        let second = store.active_instances_of(id);

        prop_assert_eq!(first.len(), 1);
        prop_assert_eq!(second.len(), 1);
        prop_assert_ne!(first[0].uuid(), second[0].uuid());
        for field in ["due", "wait", "rindex", "description"] {
            prop_assert_eq!(first[0].get(field), second[0].get(field));
        }
        let expected = day0() + TimeDelta::days(period * i64::from(index - 1));
        prop_assert_eq!(second[0].date("due"), Some(expected));
        prop_assert_eq!(second[0].date("wait"), Some(expected - TimeDelta::days(1)));
    }

    #[test]
    fn spawn_copies_every_shared_field(
        extra in prop::collection::btree_map(shared_name(), "[A-Za-z0-9 ]{1,12}", 0..6),
        index in 1u32..10,
    ) {
        let store = InMemoryStore::new();
        let mut template = template(7, index);
        for (name, value) in &extra {
            template.set(name.clone(), value.as_str());
        }
        let id = store.put(template.clone());
        let spawner = Spawner::new(&store, Origin::new("recurrence"), day0());
        spawner.spawn(&template, index, None).unwrap();

        let active = store.active_instances_of(id);
        prop_assert_eq!(active.len(), 1);
        let instance = &active[0];
        for (name, value) in &extra {
            prop_assert_eq!(instance.get(name), Some(&FieldValue::text(value.as_str())));
        }
        for name in fields::TEMPLATE_EXCLUSIVE_FIELDS {
            prop_assert!(!instance.contains(name), "instance carries {}", name);
        }
        prop_assert_eq!(instance.template_ref(), Some(id));
        prop_assert_eq!(instance.index(), Some(index));
    }

    #[test]
    fn enforced_records_never_mix_exclusive_fields(
        template_fields in prop::sample::subsequence(fields::TEMPLATE_EXCLUSIVE_FIELDS.to_vec(), 0..=8),
        instance_fields in prop::sample::subsequence(fields::INSTANCE_EXCLUSIVE_FIELDS.to_vec(), 0..=2),
        as_template in any::<bool>(),
    ) {
        let mut record = Record::new().with("description", "mixed");
        for name in template_fields.iter().chain(&instance_fields) {
            record.set(*name, "x");
        }
        let kind = if as_template { RecordKind::Template } else { RecordKind::Instance };
        let warnings = enforce_field_classes(&mut record, kind);

        let has_template = fields::TEMPLATE_EXCLUSIVE_FIELDS.iter().any(|f| record.contains(f));
        let has_instance = fields::INSTANCE_EXCLUSIVE_FIELDS.iter().any(|f| record.contains(f));
        prop_assert!(!(has_template && has_instance));
        let stripped = if as_template { instance_fields.len() } else { template_fields.len() };
        prop_assert_eq!(warnings.len(), stripped);
        prop_assert!(record.contains("description"));
    }
}
