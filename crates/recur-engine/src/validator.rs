//! Invariant validation
//!
//! Two checks, both scoped to the record being processed:
//! - field-class separation on a single record
//! - the one-active-instance rule for a single template
//!
//! Checks never sweep across templates: repairs stay inside the lineage of
//! the current operation.

use crate::error::{ConsistencyError, StoreError, StructuralWarning};
use crate::store::{Filter, TaskStore};
use recur_model::fields::{self, INSTANCE_EXCLUSIVE_FIELDS, TEMPLATE_EXCLUSIVE_FIELDS};
use recur_model::{Record, RecordKind, TaskId};

/// Result of the one-active-instance check for one template
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateHealth {
    /// No active instance; a spawn is needed
    Missing,
    /// One active instance whose index equals the template's last index
    Consistent { instance: Record, index: u32 },
    /// One active instance, but the template's last index disagrees
    ///
    /// The template is corrected to the instance, never the reverse.
    IndexDrift {
        instance: Record,
        index: u32,
        last_index: Option<u32>,
    },
    /// Two or more active instances; needs manual action
    Corrupt(ConsistencyError),
}

impl TemplateHealth {
    /// The single active instance, when there is exactly one
    #[must_use]
    pub fn instance(&self) -> Option<&Record> {
        match self {
            Self::Consistent { instance, .. } | Self::IndexDrift { instance, .. } => Some(instance),
            Self::Missing | Self::Corrupt(_) => None,
        }
    }

    /// Index of the single active instance
    #[must_use]
    pub fn instance_index(&self) -> Option<u32> {
        match self {
            Self::Consistent { index, .. } | Self::IndexDrift { index, .. } => Some(*index),
            Self::Missing | Self::Corrupt(_) => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}

/// Scoped invariant checks
#[derive(Debug)]
pub struct Validator<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: TaskStore + ?Sized> Validator<'a, S> {
    /// Create validator over `store`
    #[inline]
    #[must_use]
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Check the one-active-instance rule for a template
    ///
    /// # Errors
    /// Returns [`StoreError`] if the active instances cannot be listed.
    pub fn check(
        &self,
        template_id: TaskId,
        last_index: Option<u32>,
    ) -> Result<TemplateHealth, StoreError> {
        let mut active = self
            .store
            .find(&Filter::ActiveInstancesOf(template_id))?;
        active.sort_by_key(|r| r.index().unwrap_or(0));

        let health = match active.len() {
            0 => TemplateHealth::Missing,
            1 => {
                let instance = active.remove(0);
                let index = instance.index().unwrap_or(0);
                if Some(index) == last_index {
                    TemplateHealth::Consistent { instance, index }
                } else {
                    TemplateHealth::IndexDrift {
                        instance,
                        index,
                        last_index,
                    }
                }
            }
            _ => TemplateHealth::Corrupt(ConsistencyError::MultipleActiveInstances {
                template: template_id,
                instances: active
                    .iter()
                    .filter_map(|r| Some((r.uuid()?, r.index().unwrap_or(0))))
                    .collect(),
            }),
        };

        tracing::debug!(template = %template_id, ?last_index, health = health_label(&health), "Template checked");
        Ok(health)
    }
}

/// Strip fields that do not belong on a record of `kind`
///
/// Templates lose instance-exclusive fields, instances lose
/// template-exclusive fields. Plain records are left alone: their
/// fields carry no recurrence meaning.
pub fn enforce_field_classes(record: &mut Record, kind: RecordKind) -> Vec<StructuralWarning> {
    let (forbidden, label): (&[&str], &'static str) = match kind {
        RecordKind::Template => (INSTANCE_EXCLUSIVE_FIELDS, "template"),
        RecordKind::Instance => (TEMPLATE_EXCLUSIVE_FIELDS, "instance"),
        RecordKind::Plain => return Vec::new(),
    };

    forbidden
        .iter()
        .filter_map(|name| {
            record.remove(name).map(|_| StructuralWarning::FieldClassStripped {
                field: (*name).to_string(),
                class: fields::field_class(name),
                kind: label,
            })
        })
        .collect()
}

fn health_label(health: &TemplateHealth) -> &'static str {
    match health {
        TemplateHealth::Missing => "missing",
        TemplateHealth::Consistent { .. } => "consistent",
        TemplateHealth::IndexDrift { .. } => "index-drift",
        TemplateHealth::Corrupt(_) => "corrupt",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Origin;
    use std::cell::RefCell;

    /// Read-only store over a fixed record list
    struct Fixed(RefCell<Vec<Record>>);

    impl TaskStore for Fixed {
        fn get(&self, id: TaskId) -> Result<Option<Record>, StoreError> {
            Ok(self.0.borrow().iter().find(|r| r.uuid() == Some(id)).cloned())
        }
        fn find(&self, filter: &Filter) -> Result<Vec<Record>, StoreError> {
            Ok(self.0.borrow().iter().filter(|r| filter.matches(r)).cloned().collect())
        }
        fn update(&self, _: TaskId, _: &Record, _: &Origin) -> Result<(), StoreError> {
            unreachable!()
        }
        fn create(&self, _: &Record, _: &Origin) -> Result<TaskId, StoreError> {
            unreachable!()
        }
        fn delete(&self, _: TaskId, _: &Origin) -> Result<(), StoreError> {
            unreachable!()
        }
        fn annotate(&self, _: TaskId, _: &str, _: &Origin) -> Result<(), StoreError> {
            unreachable!()
        }
    }

    fn instance(template: TaskId, index: u32, status: &str) -> Record {
        Record::new()
            .with("uuid", TaskId::new().to_string())
            .with("status", status)
            .with("rtemplate", template.to_string())
            .with("rindex", index)
    }

    #[test]
    fn zero_one_many() {
        let template = TaskId::new();
        let store = Fixed(RefCell::new(vec![instance(template, 1, "completed")]));
        let validator = Validator::new(&store);
        assert_eq!(validator.check(template, Some(1)).unwrap(), TemplateHealth::Missing);

        store.0.borrow_mut().push(instance(template, 2, "pending"));
        let health = validator.check(template, Some(2)).unwrap();
        assert!(matches!(health, TemplateHealth::Consistent { index: 2, .. }));

        let health = validator.check(template, Some(5)).unwrap();
        assert!(matches!(
            health,
            TemplateHealth::IndexDrift { index: 2, last_index: Some(5), .. }
        ));

        store.0.borrow_mut().push(instance(template, 3, "waiting"));
        let health = validator.check(template, Some(3)).unwrap();
        match health {
            TemplateHealth::Corrupt(ConsistencyError::MultipleActiveInstances { instances, .. }) => {
                let indices: Vec<_> = instances.iter().map(|(_, i)| *i).collect();
                assert_eq!(indices, vec![2, 3]);
            }
            other => panic!("expected corruption, got {other:?}"),
        }
        // nothing was removed
        assert_eq!(store.0.borrow().len(), 3);
    }

    #[test]
    fn strips_wrong_class_fields() {
        let mut template = Record::new()
            .with("r", "7d")
            .with("rtemplate", TaskId::new().to_string())
            .with("project", "home");
        let warnings = enforce_field_classes(&mut template, RecordKind::Template);
        assert_eq!(warnings.len(), 1);
        assert!(!template.contains("rtemplate"));
        assert!(template.contains("r"));

        let mut inst = Record::new()
            .with("rtemplate", TaskId::new().to_string())
            .with("rindex", 1_u32)
            .with("rwait", "-1d")
            .with("rlast", 3_u32);
        let warnings = enforce_field_classes(&mut inst, RecordKind::Instance);
        assert_eq!(warnings.len(), 2);
        assert!(inst.contains("rindex"));
        assert!(!inst.contains("rwait"));
    }
}
