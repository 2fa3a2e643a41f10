//! Instance spawning
//!
//! An instance is a pure function of its template and its index (plus, for
//! chained recurrence, the terminal timestamp of its predecessor):
//!
//! | index | type | anchor |
//! |-------|------|--------|
//! | 1 | any | template anchor |
//! | i > 1 | period | template anchor + period × (i − 1) |
//! | i > 1 | chain | predecessor terminal timestamp + period |
//!
//! Wait, scheduled and until are resolved against the *instance* anchor.
//! Every shared field is copied; annotations are appended after creation.

use crate::error::{Issue, PropagationFailure, SpawnError, StoreError};
use crate::store::{Filter, Origin, TaskStore};
use crate::validator::{enforce_field_classes, TemplateHealth, Validator};
use chrono::{DateTime, Utc};
use recur_model::datecalc::{self, format_date};
use recur_model::fields::{self, ANNOTATIONS};
use recur_model::{AnchorField, FieldValue, Record, RecordKind, RecurrenceType, Status, TaskId};

/// Offset fields and the instance date each one produces
pub const OFFSET_TARGETS: &[(&str, &str)] = &[
    (fields::WAIT_OFFSET, fields::WAIT),
    (fields::SCHEDULED_OFFSET, fields::SCHEDULED),
    (fields::UNTIL_OFFSET, fields::UNTIL),
];

/// A computed instance, not yet stored
#[derive(Debug, Clone, PartialEq)]
pub struct InstancePlan {
    pub index: u32,
    pub anchor_field: AnchorField,
    pub anchor: DateTime<Utc>,
    pub record: Record,
}

/// What computing an instance produced
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Instance ready to create
    Instance(InstancePlan),
    /// The anchor falls after the template's end date
    Ended {
        index: u32,
        anchor: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Anchor date of instance `index`
///
/// `terminal` is the predecessor's completion or deletion time; it is only
/// consulted for chained templates and, when absent, the periodic formula
/// is used instead.
///
/// # Errors
/// Returns [`SpawnError::MissingField`] when the template lacks a period or
/// anchor, and [`SpawnError::CalculationBug`] when a periodic anchor does not
/// land after the template anchor.
pub fn compute_anchor(
    template: &Record,
    index: u32,
    terminal: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>, SpawnError> {
    let period = template
        .period()
        .ok_or_else(|| missing(template, fields::PERIOD))?;
    let base = template
        .anchor_date()
        .ok_or_else(|| missing(template, fields::ANCHOR))?;

    if index <= 1 {
        return Ok(base);
    }

    match (template.recurrence_type(), terminal) {
        (RecurrenceType::Chain, Some(terminal)) => Ok(datecalc::chained_anchor(terminal, period)?),
        _ => {
            let anchor = datecalc::periodic_anchor(base, period, index)?;
            if anchor <= base {
                return Err(SpawnError::CalculationBug {
                    index,
                    anchor: format_date(anchor),
                    base: format_date(base),
                });
            }
            Ok(anchor)
        }
    }
}

/// Compute instance `index` of `template` without touching the store
///
/// # Errors
/// Returns [`SpawnError`] if the template is incomplete or the date
/// arithmetic fails.
pub fn plan_instance(
    template: &Record,
    index: u32,
    terminal: Option<DateTime<Utc>>,
    id: TaskId,
    now: DateTime<Utc>,
) -> Result<Plan, SpawnError> {
    let template_id = template
        .uuid()
        .ok_or_else(|| missing(template, fields::UUID))?;
    let anchor_field = template
        .anchor_field()
        .ok_or_else(|| missing(template, fields::ANCHOR))?;
    let anchor = compute_anchor(template, index, terminal)?;

    if let Some(end) = template.end_date() {
        if anchor > end {
            return Ok(Plan::Ended { index, anchor, end });
        }
    }

    let mut record = Record::new();
    record.set(fields::UUID, id.to_string());
    record.set(fields::STATUS, Status::Pending.as_str());
    record.set(fields::ENTRY, now);

    for (name, value) in template.iter() {
        if fields::is_copied(name) && name != ANNOTATIONS {
            record.set(name, value.clone());
        }
    }

    record.set(anchor_field.field_name(), anchor);
    for (offset_field, target) in OFFSET_TARGETS {
        if *target == anchor_field.field_name() {
            continue;
        }
        if let Some(offset) = template.offset(offset_field) {
            record.set(*target, datecalc::apply_offset(anchor, offset)?);
        }
    }

    record.set(fields::TEMPLATE_REF, template_id.to_string());
    record.set(fields::INDEX, index);
    enforce_field_classes(&mut record, RecordKind::Instance);

    Ok(Plan::Instance(InstancePlan {
        index,
        anchor_field,
        anchor,
        record,
    }))
}

fn missing(template: &Record, field: &'static str) -> SpawnError {
    SpawnError::MissingField {
        template: template.reference(),
        field,
    }
}

/// Outcome of a spawn or respawn
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnOutcome {
    Created {
        id: TaskId,
        index: u32,
        anchor_field: AnchorField,
        anchor: DateTime<Utc>,
    },
    /// Nothing created: the anchor is past the end date
    Ended {
        index: u32,
        anchor: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Spawn result with everything worth telling the user
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnReport {
    pub template: TaskId,
    pub description: String,
    pub outcome: SpawnOutcome,
    /// Instance removed by a respawn, with its index
    pub replaced: Option<(TaskId, u32)>,
    /// Non-fatal problems (annotation copy, bookkeeping)
    pub issues: Vec<Issue>,
}

impl SpawnReport {
    /// One-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.outcome {
            SpawnOutcome::Created {
                index,
                anchor_field,
                anchor,
                ..
            } => {
                let verb = if self.replaced.is_some() {
                    "Recreated"
                } else {
                    "Created"
                };
                format!(
                    "{verb} instance #{index} of '{}' ({anchor_field}: {}).",
                    self.description,
                    format_date(*anchor)
                )
            }
            SpawnOutcome::Ended { index, end, .. } => format!(
                "Recurrence of '{}' ended: instance #{index} would fall after the end date {}.",
                self.description,
                format_date(*end)
            ),
        }
    }

    /// Created instance, if any
    #[must_use]
    pub fn created(&self) -> Option<TaskId> {
        match self.outcome {
            SpawnOutcome::Created { id, .. } => Some(id),
            SpawnOutcome::Ended { .. } => None,
        }
    }
}

/// Creates instances and keeps the template's last index in step
#[derive(Debug)]
pub struct Spawner<'a, S: ?Sized> {
    store: &'a S,
    origin: Origin,
    now: DateTime<Utc>,
}

impl<'a, S: TaskStore + ?Sized> Spawner<'a, S> {
    /// Create spawner; every mutation carries `origin`
    #[must_use]
    pub fn new(store: &'a S, origin: Origin, now: DateTime<Utc>) -> Self {
        Self { store, origin, now }
    }

    /// Create instance `index` of `template` and record it as the last index
    ///
    /// # Errors
    /// Returns [`SpawnError`] if the instance cannot be computed or created.
    /// Failures after creation are reported in [`SpawnReport::issues`].
    pub fn spawn(
        &self,
        template: &Record,
        index: u32,
        terminal: Option<DateTime<Utc>>,
    ) -> Result<SpawnReport, SpawnError> {
        let template_id = template
            .uuid()
            .ok_or_else(|| missing(template, fields::UUID))?;
        let description = template.description().unwrap_or_default().to_string();

        let plan = match plan_instance(template, index, terminal, TaskId::new(), self.now)? {
            Plan::Instance(plan) => plan,
            Plan::Ended { index, anchor, end } => {
                tracing::info!(template = %template_id, index, "Recurrence ended, not spawning");
                return Ok(SpawnReport {
                    template: template_id,
                    description,
                    outcome: SpawnOutcome::Ended { index, anchor, end },
                    replaced: None,
                    issues: Vec::new(),
                });
            }
        };

        let id = self.store.create(&plan.record, &self.origin)?;
        tracing::info!(template = %template_id, instance = %id, index, "Instance created");

        let mut issues = Vec::new();
        let annotations = template
            .get(ANNOTATIONS)
            .and_then(FieldValue::as_annotations)
            .unwrap_or_default();
        for annotation in annotations {
            if let Err(e) = self.store.annotate(id, &annotation.description, &self.origin) {
                tracing::warn!(instance = %id, "Annotation copy failed: {}", e);
                issues.push(
                    PropagationFailure::ApplyFailed {
                        target: id,
                        reason: format!("annotation '{}' not copied: {e}", annotation.description),
                    }
                    .into(),
                );
            }
        }

        let bookkeeping = Record::new().with(fields::LAST_INDEX, index);
        if let Err(e) = self.store.update(template_id, &bookkeeping, &self.origin) {
            tracing::warn!(template = %template_id, "Last index update failed: {}", e);
            issues.push(
                PropagationFailure::ApplyFailed {
                    target: template_id,
                    reason: format!("last index not set to {index}: {e}"),
                }
                .into(),
            );
        }

        Ok(SpawnReport {
            template: template_id,
            description,
            outcome: SpawnOutcome::Created {
                id,
                index,
                anchor_field: plan.anchor_field,
                anchor: plan.anchor,
            },
            replaced: None,
            issues,
        })
    }

    /// Delete the active instance of a template and recreate it at `index`
    /// with freshly computed dates
    ///
    /// # Errors
    /// Returns [`SpawnError::Store`] if the template is gone,
    /// [`SpawnError::Consistency`] if it has several active instances, or
    /// any spawn failure.
    pub fn respawn(&self, template_id: TaskId, index: u32) -> Result<SpawnReport, SpawnError> {
        let template = self
            .store
            .get(template_id)?
            .ok_or(StoreError::NotFound(template_id))?;

        let health = Validator::new(self.store).check(template_id, template.last_index())?;
        if let TemplateHealth::Corrupt(err) = health {
            return Err(err.into());
        }
        let current = health
            .instance()
            .and_then(|r| Some((r.uuid()?, health.instance_index().unwrap_or(0))));

        let terminal = if template.recurrence_type() == RecurrenceType::Chain && index > 1 {
            self.predecessor_terminal(template_id, index, current.map(|(id, _)| id))?
        } else {
            None
        };

        if let Some((active_id, active_index)) = current {
            self.store.delete(active_id, &self.origin)?;
            tracing::info!(template = %template_id, instance = %active_id, index = active_index, "Active instance deleted for respawn");
        }

        let mut report = self.spawn(&template, index, terminal)?;
        report.replaced = current;
        Ok(report)
    }

    /// Terminal timestamp of the most recent finished instance before `index`
    fn predecessor_terminal(
        &self,
        template_id: TaskId,
        index: u32,
        exclude: Option<TaskId>,
    ) -> Result<Option<DateTime<Utc>>, SpawnError> {
        let instances = self.store.find(&Filter::InstancesOf(template_id))?;
        Ok(instances
            .iter()
            .filter(|r| exclude.is_none() || r.uuid() != exclude)
            .filter(|r| r.status().is_some_and(Status::is_terminal))
            .filter_map(|r| Some((r.index()?, r)))
            .filter(|(i, _)| *i < index)
            .max_by_key(|(i, _)| *i)
            .and_then(|(_, r)| r.date(fields::END)))
    }
}
