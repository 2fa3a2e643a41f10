//! Instance edits
//!
//! Instances are ordinary tasks to the user: any shared field may change.
//! The lineage markers may not, and completing or deleting an instance is
//! announced here so the user knows what the post-commit phase will do.

use crate::error::{Issue, OrphanError, StructuralWarning};
use crate::feedback::{Feedback, Phase, Severity};
use crate::spawner::compute_anchor;
use crate::store::TaskStore;
use crate::validator::enforce_field_classes;
use chrono::{DateTime, Utc};
use recur_model::datecalc::format_date;
use recur_model::fields::{self, INSTANCE_EXCLUSIVE_FIELDS};
use recur_model::{Record, RecordKind, RecurrenceType, Status};

/// What the post-commit phase will do after an instance leaves the active set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Successor {
    /// Instance `index` will be created, anchored at `anchor` when known
    Next {
        index: u32,
        anchor: Option<DateTime<Utc>>,
    },
    /// A periodic instance was deleted; the schedule pauses
    Paused { resume_index: u32 },
    /// The recurrence end date has passed
    Ended { end: DateTime<Utc> },
    /// The instance is older than the template's latest
    Stale { last_index: u32 },
    /// The template is no longer recurring
    Inactive,
    /// The template cannot be found
    Orphaned,
    /// `index` is the highest index a lineage can reach
    Exhausted { index: u32 },
}

/// Pre-commit handling of edits to instances
#[derive(Debug)]
pub struct InstanceEditor<'a, S: ?Sized> {
    store: &'a S,
    now: DateTime<Utc>,
}

impl<'a, S: TaskStore + ?Sized> InstanceEditor<'a, S> {
    #[must_use]
    pub fn new(store: &'a S, now: DateTime<Utc>) -> Self {
        Self { store, now }
    }

    /// Shape the record the host is about to commit
    pub fn modify(&self, original: &Record, proposed: &Record, feedback: &mut Feedback) -> Record {
        let mut record = proposed.clone();
        let mut warnings = Vec::new();

        for field in INSTANCE_EXCLUSIVE_FIELDS {
            let before = original.get(field);
            if record.get(field) == before {
                continue;
            }
            match before {
                Some(value) => record.set(*field, value.clone()),
                None => {
                    record.remove(field);
                }
            }
            warnings.push(StructuralWarning::ImmutableFieldReverted {
                field: (*field).to_string(),
            });
        }
        warnings.extend(enforce_field_classes(&mut record, RecordKind::Instance));
        for warning in warnings {
            feedback.issue(Phase::WillHappen, &warning.into());
        }

        let was_active = original.status().is_some_and(Status::is_active);
        let now_terminal = record.status().is_some_and(Status::is_terminal);
        if was_active && now_terminal {
            let successor = self.successor(&record);
            self.announce(&record, &successor, feedback);
        }
        record
    }

    /// Predict what happens once `instance`, already terminal, is committed
    #[must_use]
    pub fn successor(&self, instance: &Record) -> Successor {
        let (Some(template_id), Some(index)) = (instance.template_ref(), instance.index()) else {
            return Successor::Orphaned;
        };
        let template = match self.store.get(template_id) {
            Ok(Some(template)) => template,
            Ok(None) => return Successor::Orphaned,
            Err(e) => {
                tracing::warn!(template = %template_id, "Template lookup failed: {}", e);
                return Successor::Orphaned;
            }
        };

        if template.status() != Some(Status::Recurring) {
            return Successor::Inactive;
        }
        let last_index = template.last_index().unwrap_or(0);
        if index < last_index {
            return Successor::Stale { last_index };
        }

        let kind = template.recurrence_type();
        let Some(next) = index.checked_add(1) else {
            return Successor::Exhausted { index };
        };
        if instance.status() == Some(Status::Deleted) && !kind.spawns_on_delete() {
            return Successor::Paused { resume_index: next };
        }

        let terminal = match kind {
            RecurrenceType::Chain => Some(instance.date(fields::END).unwrap_or(self.now)),
            RecurrenceType::Period => None,
        };
        let anchor = compute_anchor(&template, next, terminal).ok();
        match (anchor, template.end_date()) {
            (Some(anchor), Some(end)) if anchor > end => Successor::Ended { end },
            (anchor, _) => Successor::Next {
                index: next,
                anchor,
            },
        }
    }

    fn announce(&self, instance: &Record, successor: &Successor, feedback: &mut Feedback) {
        let template = instance
            .template_ref()
            .map_or_else(|| "?".to_string(), |id| id.short());
        match successor {
            Successor::Next { index, anchor } => {
                let when = anchor.map(|a| format!(" ({})", format_date(a))).unwrap_or_default();
                feedback.will_happen(format!("Instance #{index} will be created{when}."));
            }
            Successor::Paused { resume_index } => {
                feedback.will_happen(format!(
                    "Deleting a periodic instance does not create the next one. To continue the schedule: task {template} modify rlast:{resume_index}"
                ));
            }
            Successor::Ended { end } => {
                feedback.will_happen(format!(
                    "Recurrence ended on {}; no further instance will be created.",
                    format_date(*end)
                ));
            }
            Successor::Stale { last_index } => {
                tracing::debug!(%template, last_index, "Stale instance closed");
            }
            Successor::Inactive => {
                feedback.will_happen("The template is no longer recurring; no new instance will be created.");
            }
            Successor::Exhausted { index } => {
                feedback.push(
                    Phase::WillHappen,
                    Severity::Warning,
                    format!("Instance #{index} is the highest possible index; no further instance will be created."),
                );
            }
            Successor::Orphaned => {
                if let (Some(id), Some(template_id)) = (instance.uuid(), instance.template_ref()) {
                    let issue: Issue = OrphanError::MissingTemplate {
                        instance: id,
                        template: template_id,
                    }
                    .into();
                    feedback.issue(Phase::WillHappen, &issue);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{Filter, Origin};
    use chrono::{TimeDelta, TimeZone};
    use recur_model::TaskId;

    struct One(Option<Record>);

    impl TaskStore for One {
        fn get(&self, id: TaskId) -> Result<Option<Record>, StoreError> {
            Ok(self.0.clone().filter(|r| r.uuid() == Some(id)))
        }
        fn find(&self, _: &Filter) -> Result<Vec<Record>, StoreError> {
            Ok(Vec::new())
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

    fn day0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap()
    }

    fn template(kind: &str) -> Record {
        Record::new()
            .with("uuid", TaskId::new().to_string())
            .with("status", "recurring")
            .with("description", "Water plants")
            .with("r", "7d")
            .with("type", kind)
            .with("ranchor", "due")
            .with("due", day0())
            .with("rlast", 1_u32)
    }

    fn instance_of(template: &Record, index: u32) -> Record {
        Record::new()
            .with("uuid", TaskId::new().to_string())
            .with("id", 4_u32)
            .with("status", "pending")
            .with("rtemplate", template.uuid().unwrap().to_string())
            .with("rindex", index)
    }

    #[test]
    fn lineage_markers_are_reverted() {
        let template = template("period");
        let store = One(Some(template.clone()));
        let editor = InstanceEditor::new(&store, day0());
        let original = instance_of(&template, 1);
        let proposed = original
            .clone()
            .with("rindex", 9_u32)
            .with("r", "1d")
            .with("project", "garden");

        let mut feedback = Feedback::new();
        let record = editor.modify(&original, &proposed, &mut feedback);
        assert_eq!(record.index(), Some(1));
        assert!(!record.contains("r"));
        assert!(record.contains("project"));
        assert_eq!(feedback.entries().len(), 2);
    }

    #[test]
    fn completion_predicts_next_periodic_instance() {
        let template = template("period");
        let store = One(Some(template.clone()));
        let editor = InstanceEditor::new(&store, day0());
        let mut done = instance_of(&template, 1);
        done.set_status(Status::Completed);
        assert_eq!(
            editor.successor(&done),
            Successor::Next {
                index: 2,
                anchor: Some(day0() + TimeDelta::days(7))
            }
        );
    }

    #[test]
    fn periodic_delete_pauses_chain_delete_continues() {
        let periodic = template("period");
        let store = One(Some(periodic.clone()));
        let editor = InstanceEditor::new(&store, day0());
        let mut gone = instance_of(&periodic, 1);
        gone.set_status(Status::Deleted);
        assert_eq!(editor.successor(&gone), Successor::Paused { resume_index: 2 });

        let chained = template("chain");
        let store = One(Some(chained.clone()));
        let editor = InstanceEditor::new(&store, day0());
        let mut gone = instance_of(&chained, 1);
        gone.set_status(Status::Deleted);
        gone.set("end", day0() + TimeDelta::hours(3));
        assert_eq!(
            editor.successor(&gone),
            Successor::Next {
                index: 2,
                anchor: Some(day0() + TimeDelta::hours(3) + TimeDelta::days(7))
            }
        );
    }

    #[test]
    fn stale_inactive_and_orphaned() {
        let template = template("period").with("rlast", 3_u32);
        let store = One(Some(template.clone()));
        let editor = InstanceEditor::new(&store, day0());
        let mut old = instance_of(&template, 2);
        old.set_status(Status::Completed);
        assert_eq!(editor.successor(&old), Successor::Stale { last_index: 3 });

        let mut stopped = template.clone();
        stopped.set_status(Status::Deleted);
        let store = One(Some(stopped));
        let editor = InstanceEditor::new(&store, day0());
        assert_eq!(editor.successor(&old), Successor::Inactive);

        let maxed = template.clone().with("rlast", u32::MAX);
        let store = One(Some(maxed.clone()));
        let editor = InstanceEditor::new(&store, day0());
        let mut last = instance_of(&maxed, u32::MAX);
        last.set_status(Status::Completed);
        assert_eq!(editor.successor(&last), Successor::Exhausted { index: u32::MAX });

        let store = One(None);
        let editor = InstanceEditor::new(&store, day0());
        let mut feedback = Feedback::new();
        let original = instance_of(&template, 3);
        let mut proposed = original.clone();
        proposed.set_status(Status::Completed);
        editor.modify(&original, &proposed, &mut feedback);
        assert!(feedback.mentions("missing template"));
    }
}
