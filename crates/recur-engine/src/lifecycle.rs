//! Template lifecycle
//!
//! Runs in the pre-commit phase, while the host holds its store lock. It
//! shapes the template record the host is about to commit and, when the
//! active instance has to follow, leaves a [`PropagationMessage`] for the
//! post-commit phase. It never mutates the instance itself.

use crate::channel::{PropagationChannel, PropagationMessage};
use crate::error::{Issue, PropagationFailure, StructuralWarning, ValidationError};
use crate::feedback::{Feedback, Phase};
use crate::spawner::OFFSET_TARGETS;
use crate::store::TaskStore;
use crate::validator::{enforce_field_classes, TemplateHealth, Validator};
use chrono::{DateTime, TimeDelta, Utc};
use recur_model::datecalc::{self, format_duration, format_offset};
use recur_model::fields::{self, FieldClass, LEGACY_RECURRENCE_FIELDS};
use recur_model::{
    AnchorField, FieldChange, FieldValue, Record, RecordKind, RecurrenceType, Status, TaskId,
};
use std::collections::BTreeSet;

/// Fields whose change requires the active instance to be recreated,
/// in addition to the anchor date field itself
pub const RESPAWN_FIELDS: &[&str] = &[
    fields::PERIOD,
    fields::TYPE,
    fields::ANCHOR,
    fields::WAIT_OFFSET,
    fields::SCHEDULED_OFFSET,
    fields::UNTIL_OFFSET,
    fields::LAST_INDEX,
];

/// How a template edit was classified
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Recurrence-rule changes; the instance must be recreated
    pub respawn: Vec<FieldChange>,
    /// Shared-field or end-date changes; the instance is left alone
    pub informational: Vec<FieldChange>,
}

impl ChangeSet {
    /// Split a field diff between the two classes
    ///
    /// System fields other than the anchor date (modification stamps,
    /// urgency, status) are ignored.
    #[must_use]
    pub fn classify(changes: Vec<FieldChange>, anchor_fields: &[&str]) -> Self {
        let mut set = Self::default();
        for change in changes {
            let name = change.field.as_str();
            if RESPAWN_FIELDS.contains(&name) || anchor_fields.contains(&name) {
                set.respawn.push(change);
            } else if name == fields::END_DATE || fields::field_class(name) == FieldClass::Shared {
                set.informational.push(change);
            }
        }
        set
    }

    /// Whether the last index itself was edited
    #[must_use]
    pub fn is_time_machine(&self) -> bool {
        self.respawn.iter().any(|c| c.field == fields::LAST_INDEX)
    }

    #[must_use]
    pub fn needs_respawn(&self) -> bool {
        !self.respawn.is_empty()
    }

    fn respawn_field_list(&self) -> String {
        self.respawn
            .iter()
            .map(|c| c.field.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Template creation and modification
#[derive(Debug)]
pub struct TemplateLifecycle<'a, S: ?Sized, C: ?Sized> {
    store: &'a S,
    channel: &'a C,
    now: DateTime<Utc>,
}

impl<'a, S, C> TemplateLifecycle<'a, S, C>
where
    S: TaskStore + ?Sized,
    C: PropagationChannel + ?Sized,
{
    #[must_use]
    pub fn new(store: &'a S, channel: &'a C, now: DateTime<Utc>) -> Self {
        Self {
            store,
            channel,
            now,
        }
    }

    /// Turn a proposed record with a period into a template
    ///
    /// # Errors
    /// Returns every blocking problem found; the caller hands the original
    /// record back to the host unchanged.
    pub fn create(
        &self,
        proposed: &Record,
        feedback: &mut Feedback,
    ) -> Result<Record, Vec<ValidationError>> {
        let mut record = proposed.clone();
        let mut warnings = Vec::new();

        for field in LEGACY_RECURRENCE_FIELDS {
            if record.remove(field).is_some() {
                warnings.push(StructuralWarning::LegacyFieldStripped {
                    field: (*field).to_string(),
                });
            }
        }
        warnings.extend(enforce_field_classes(&mut record, RecordKind::Template));

        let rules = normalize_rules(&mut record, &mut warnings)?;
        record.set(fields::LAST_INDEX, 1_u32);
        record.set_status(Status::Recurring);

        tracing::info!(
            template = ?record.uuid(),
            period = %format_duration(rules.period),
            kind = %rules.kind,
            anchor = %rules.anchor_field,
            "Template created"
        );
        report_warnings(feedback, warnings);
        feedback.will_happen(format!(
            "Created recurrence template '{}' (every {}, {}). Instance #1 will be created.",
            record.description().unwrap_or_default(),
            format_duration(rules.period),
            rules.kind
        ));
        Ok(record)
    }

    /// Process an edit to an existing template
    ///
    /// # Errors
    /// Returns every blocking problem found; the caller hands the original
    /// record back to the host unchanged.
    pub fn modify(
        &self,
        original: &Record,
        proposed: &Record,
        feedback: &mut Feedback,
    ) -> Result<Record, Vec<ValidationError>> {
        let description = proposed.description().unwrap_or_default().to_string();

        if proposed.status().is_some_and(Status::is_terminal) {
            tracing::info!(template = ?original.uuid(), status = ?proposed.status(), "Template deactivated");
            feedback.will_happen(format!(
                "Recurrence of '{description}' will stop. The active instance is kept."
            ));
            let mut record = proposed.clone();
            let warnings = enforce_field_classes(&mut record, RecordKind::Template);
            report_warnings(feedback, warnings);
            return Ok(record);
        }

        if !proposed.contains(fields::PERIOD) {
            return Err(vec![ValidationError::PeriodRemoved]);
        }

        let mut record = proposed.clone();
        if !record.contains(fields::LAST_INDEX) {
            if let Some(value) = original.get(fields::LAST_INDEX) {
                record.set(fields::LAST_INDEX, value.clone());
            }
        }

        let mut warnings = enforce_field_classes(&mut record, RecordKind::Template);
        let rules = normalize_rules(&mut record, &mut warnings)?;
        normalize_last_index(&mut record)?;

        let anchor_fields: Vec<&str> = [original.anchor_field(), Some(rules.anchor_field)]
            .into_iter()
            .flatten()
            .map(AnchorField::field_name)
            .collect();
        let changes = ChangeSet::classify(original.diff(&record), &anchor_fields);

        let Some(template_id) = record.uuid().or_else(|| original.uuid()) else {
            report_warnings(feedback, warnings);
            return Ok(record);
        };

        let health = match Validator::new(self.store).check(template_id, original.last_index()) {
            Ok(health) => Some(health),
            Err(e) => {
                tracing::warn!(template = %template_id, "Instance lookup failed: {}", e);
                None
            }
        };

        if let Some(TemplateHealth::IndexDrift { index, .. }) = &health {
            if !changes.is_time_machine() {
                let from = record.last_index().unwrap_or(0);
                record.set(fields::LAST_INDEX, *index);
                warnings.push(StructuralWarning::IndexResynced {
                    template: template_id,
                    from,
                    to: *index,
                });
            }
        }
        report_warnings(feedback, warnings);

        let target = record.last_index().unwrap_or(1);
        match &health {
            Some(TemplateHealth::Corrupt(err)) => {
                feedback.issue(Phase::WillHappen, &err.clone().into());
                if changes.needs_respawn() {
                    feedback.will_happen(format!(
                        "Template '{description}' was updated, but its instances will not be recreated until the duplicates are resolved."
                    ));
                }
            }
            Some(TemplateHealth::Missing) => {
                self.request_respawn(
                    template_id,
                    target,
                    "template has no active instance",
                    feedback,
                );
                feedback.will_happen(format!(
                    "Template '{description}' has no active instance. Instance #{target} will be created."
                ));
            }
            Some(_) | None if changes.needs_respawn() => {
                let changed = changes.respawn_field_list();
                self.request_respawn(template_id, target, &format!("{changed} changed"), feedback);
                if changes.is_time_machine() {
                    feedback.will_happen(format!(
                        "Template '{description}' jumps to instance #{target}. The active instance will be replaced."
                    ));
                } else {
                    feedback.will_happen(format!(
                        "Template '{description}' changed ({changed}). Instance #{target} will be recreated with recalculated dates."
                    ));
                }
            }
            _ => {}
        }

        if let Some(instance) = health.as_ref().and_then(TemplateHealth::instance) {
            if let Some(command) = suggest_instance_command(instance, &changes.informational) {
                feedback.will_happen(format!(
                    "Only the template was changed. To apply the same change to the current instance: {command}"
                ));
            }
        }

        Ok(record)
    }

    fn request_respawn(
        &self,
        template_id: TaskId,
        index: u32,
        reason: &str,
        feedback: &mut Feedback,
    ) {
        let message = PropagationMessage::new(
            template_id,
            Record::new().with(fields::LAST_INDEX, index),
            template_id,
            reason,
            self.now,
        );
        match self.channel.write(&message) {
            Ok(Some(displaced)) => {
                let issue: Issue = PropagationFailure::Superseded {
                    target: displaced.target_id,
                    reason: displaced.reason,
                }
                .into();
                feedback.issue(Phase::WillHappen, &issue);
            }
            Ok(None) => {
                tracing::info!(template = %template_id, index, reason, "Respawn requested");
            }
            Err(e) => {
                let issue: Issue = PropagationFailure::ChannelUnavailable(e.to_string()).into();
                feedback.issue(Phase::WillHappen, &issue);
            }
        }
    }
}

/// Normalised recurrence rules of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    pub period: TimeDelta,
    pub kind: RecurrenceType,
    pub anchor_field: AnchorField,
    pub anchor: DateTime<Utc>,
}

/// Validate and normalise the recurrence fields of a template record
///
/// - period parsed and required to be positive
/// - type resolved by prefix, unknown values defaulting to period
/// - anchor field explicit or inferred, anchor date required
/// - absolute or relative wait/scheduled/until turned into signed offsets
/// - end date resolved to an absolute date
///
/// # Errors
/// Returns every blocking problem found, not just the first.
pub fn normalize_rules(
    record: &mut Record,
    warnings: &mut Vec<StructuralWarning>,
) -> Result<Rules, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let period = match record.get(fields::PERIOD) {
        None => None,
        Some(value) => match value.as_duration() {
            Some(period) if period > TimeDelta::zero() => Some(period),
            Some(_) => {
                errors.push(ValidationError::NonPositivePeriod {
                    value: value.to_wire_string(),
                });
                None
            }
            None => {
                errors.push(ValidationError::InvalidPeriod {
                    value: value.to_wire_string(),
                });
                None
            }
        },
    };
    if let Some(period) = period {
        record.set(fields::PERIOD, period);
    }

    let kind = match record.get(fields::TYPE).map(FieldValue::to_wire_string) {
        None => RecurrenceType::default(),
        Some(text) => RecurrenceType::from_prefix(&text).unwrap_or_else(|| {
            warnings.push(StructuralWarning::UnknownType { value: text });
            RecurrenceType::default()
        }),
    };
    record.set(fields::TYPE, kind.as_str());

    let anchor_field = match record.get(fields::ANCHOR).map(FieldValue::to_wire_string) {
        Some(text) => AnchorField::parse(&text).or_else(|| {
            errors.push(ValidationError::InvalidAnchorField { value: text });
            None
        }),
        None if record.contains(fields::DUE) => Some(AnchorField::Due),
        None if record.contains(fields::SCHEDULED) => Some(AnchorField::Scheduled),
        None => {
            errors.push(ValidationError::MissingAnchor);
            None
        }
    };

    let anchor = anchor_field.and_then(|field| {
        let name = field.field_name();
        match record.get(name) {
            None => {
                errors.push(ValidationError::MissingAnchor);
                None
            }
            Some(value) => value.as_date().or_else(|| {
                errors.push(ValidationError::InvalidDate {
                    field: name.to_string(),
                    value: value.to_wire_string(),
                });
                None
            }),
        }
    });

    if let (Some(field), Some(anchor)) = (anchor_field, anchor) {
        record.set(fields::ANCHOR, field.field_name());
        record.set(field.field_name(), anchor);
        normalize_offsets(record, field, anchor, &mut errors);
        normalize_end_date(record, anchor, &mut errors);
    }

    match (period, anchor_field, anchor) {
        (Some(period), Some(anchor_field), Some(anchor)) if errors.is_empty() => Ok(Rules {
            period,
            kind,
            anchor_field,
            anchor,
        }),
        _ => {
            if period.is_none() && !errors.iter().any(is_period_error) {
                errors.push(ValidationError::InvalidPeriod {
                    value: String::new(),
                });
            }
            Err(errors)
        }
    }
}

fn is_period_error(error: &ValidationError) -> bool {
    matches!(
        error,
        ValidationError::InvalidPeriod { .. } | ValidationError::NonPositivePeriod { .. }
    )
}

fn normalize_offsets(
    record: &mut Record,
    anchor_field: AnchorField,
    anchor: DateTime<Utc>,
    errors: &mut Vec<ValidationError>,
) {
    for (offset_field, target) in OFFSET_TARGETS {
        if *target == anchor_field.field_name() {
            continue;
        }

        let offset = if let Some(value) = record.remove(target) {
            let resolved = value
                .as_date()
                .map(|date| datecalc::offset_between(anchor, date))
                .or_else(|| value.as_offset());
            if resolved.is_none() {
                errors.push(ValidationError::InvalidDate {
                    field: (*target).to_string(),
                    value: value.to_wire_string(),
                });
            }
            resolved
        } else if let Some(value) = record.get(offset_field) {
            let resolved = value.as_offset();
            if resolved.is_none() {
                errors.push(ValidationError::InvalidDate {
                    field: (*offset_field).to_string(),
                    value: value.to_wire_string(),
                });
            }
            resolved
        } else {
            None
        };

        let Some(offset) = offset else {
            continue;
        };

        if *offset_field == fields::WAIT_OFFSET && offset >= TimeDelta::zero() {
            errors.push(ValidationError::WaitNotBeforeAnchor {
                anchor_field: anchor_field.field_name().to_string(),
                offset: format_offset(offset),
            });
        }
        if *offset_field == fields::UNTIL_OFFSET && offset <= TimeDelta::zero() {
            errors.push(ValidationError::UntilNotAfterAnchor {
                anchor_field: anchor_field.field_name().to_string(),
                offset: format_offset(offset),
            });
        }
        record.set(*offset_field, offset);
    }
}

fn normalize_end_date(record: &mut Record, anchor: DateTime<Utc>, errors: &mut Vec<ValidationError>) {
    let Some(value) = record.get(fields::END_DATE) else {
        return;
    };
    let resolved = value.as_date().or_else(|| {
        value
            .as_text()
            .and_then(|text| datecalc::resolve_date(text, anchor).ok())
    });
    match resolved {
        Some(end) => record.set(fields::END_DATE, end),
        None => errors.push(ValidationError::InvalidDate {
            field: fields::END_DATE.to_string(),
            value: value.to_wire_string(),
        }),
    }
}

fn normalize_last_index(record: &mut Record) -> Result<(), Vec<ValidationError>> {
    let Some(value) = record.get(fields::LAST_INDEX) else {
        record.set(fields::LAST_INDEX, 1_u32);
        return Ok(());
    };
    match value.as_integer() {
        Some(index) if index >= 1 => {
            record.set(fields::LAST_INDEX, index);
            Ok(())
        }
        _ => Err(vec![ValidationError::InvalidIndex {
            value: value.to_wire_string(),
        }]),
    }
}

fn report_warnings(feedback: &mut Feedback, warnings: Vec<StructuralWarning>) {
    for warning in warnings {
        feedback.issue(Phase::WillHappen, &warning.into());
    }
}

/// Host command applying shared-field changes to an instance
///
/// Returns `None` when nothing in `changes` can be expressed as a modify.
#[must_use]
pub fn suggest_instance_command(instance: &Record, changes: &[FieldChange]) -> Option<String> {
    let mut args = Vec::new();
    for change in changes {
        let name = change.field.as_str();
        if fields::field_class(name) != FieldClass::Shared || name == fields::ANNOTATIONS {
            continue;
        }
        if name == fields::TAGS {
            let before = tag_set(change.before.as_ref());
            let after = tag_set(change.after.as_ref());
            args.extend(after.difference(&before).map(|t| format!("+{t}")));
            args.extend(before.difference(&after).map(|t| format!("-{t}")));
            continue;
        }
        match &change.after {
            Some(value) => args.push(format!("{name}:{}", quote(&value.to_wire_string()))),
            None => args.push(format!("{name}:")),
        }
    }

    if args.is_empty() {
        None
    } else {
        Some(format!("task {} modify {}", instance.reference(), args.join(" ")))
    }
}

fn tag_set(value: Option<&FieldValue>) -> BTreeSet<String> {
    match value {
        Some(FieldValue::List(tags)) => tags.iter().cloned().collect(),
        Some(FieldValue::Text(tag)) if !tag.is_empty() => std::iter::once(tag.clone()).collect(),
        _ => BTreeSet::new(),
    }
}

fn quote(text: &str) -> String {
    if text.chars().any(char::is_whitespace) || text.is_empty() {
        format!("\"{}\"", text.replace('"', "\\\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn day0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn proposal() -> Record {
        Record::new()
            .with("uuid", TaskId::new().to_string())
            .with("description", "Pay rent")
            .with("status", "pending")
            .with("r", "1mo")
            .with("due", day0())
    }

    #[test]
    fn rules_default_type_and_infer_anchor() {
        let mut record = proposal();
        let mut warnings = Vec::new();
        let rules = normalize_rules(&mut record, &mut warnings).unwrap();
        assert_eq!(rules.kind, RecurrenceType::Period);
        assert_eq!(rules.anchor_field, AnchorField::Due);
        assert_eq!(rules.period, TimeDelta::days(30));
        assert_eq!(record.get("ranchor"), Some(&FieldValue::text("due")));
        assert_eq!(record.get("type"), Some(&FieldValue::text("period")));
        assert!(warnings.is_empty());
    }

    #[test]
    fn absolute_dates_become_offsets() {
        let mut record = proposal()
            .with("wait", day0() - TimeDelta::days(3))
            .with("until", day0() + TimeDelta::days(5))
            .with("scheduled", day0() - TimeDelta::hours(2));
        normalize_rules(&mut record, &mut Vec::new()).unwrap();
        assert!(!record.contains("wait"));
        assert!(!record.contains("until"));
        assert!(!record.contains("scheduled"));
        assert_eq!(record.offset("rwait"), Some(TimeDelta::days(-3)));
        assert_eq!(record.offset("runtil"), Some(TimeDelta::days(5)));
        assert_eq!(record.offset("rscheduled"), Some(TimeDelta::hours(-2)));
    }

    #[test]
    fn collects_all_errors() {
        let mut record = Record::new()
            .with("r", "sometimes")
            .with("ranchor", "start");
        let errors = normalize_rules(&mut record, &mut Vec::new()).unwrap_err();
        assert!(errors.contains(&ValidationError::InvalidPeriod {
            value: "sometimes".into()
        }));
        assert!(errors.contains(&ValidationError::InvalidAnchorField {
            value: "start".into()
        }));
    }

    #[test]
    fn wait_and_until_ordering() {
        let mut record = proposal().with("wait", day0() + TimeDelta::days(1));
        let errors = normalize_rules(&mut record, &mut Vec::new()).unwrap_err();
        assert!(matches!(errors[0], ValidationError::WaitNotBeforeAnchor { .. }));

        let mut record = proposal().with("until", day0());
        let errors = normalize_rules(&mut record, &mut Vec::new()).unwrap_err();
        assert!(matches!(errors[0], ValidationError::UntilNotAfterAnchor { .. }));
    }

    #[test]
    fn unknown_type_warns_and_defaults() {
        let mut record = proposal().with("type", "weekly");
        let mut warnings = Vec::new();
        let rules = normalize_rules(&mut record, &mut warnings).unwrap();
        assert_eq!(rules.kind, RecurrenceType::Period);
        assert_eq!(
            warnings,
            vec![StructuralWarning::UnknownType {
                value: "weekly".into()
            }]
        );
    }

    #[test]
    fn relative_end_date_is_resolved() {
        let mut record = proposal().with("rend", "due+90d");
        normalize_rules(&mut record, &mut Vec::new()).unwrap();
        assert_eq!(record.end_date(), Some(day0() + TimeDelta::days(90)));
    }

    #[test]
    fn change_classification() {
        let before = proposal().with("project", "home").with("rlast", 2_u32);
        let after = before
            .clone()
            .with("r", FieldValue::Duration(TimeDelta::days(14)))
            .with("project", "work")
            .with("modified", day0());
        let set = ChangeSet::classify(before.diff(&after), &["due"]);
        assert_eq!(set.respawn.len(), 1);
        assert_eq!(set.respawn[0].field, "r");
        assert_eq!(set.informational.len(), 1);
        assert_eq!(set.informational[0].field, "project");
        assert!(!set.is_time_machine());
    }

    #[test]
    fn suggestion_command() {
        let instance = Record::new().with("id", 7_u32);
        let before = Record::new()
            .with("project", "home")
            .with("tags", FieldValue::List(vec!["a".into(), "b".into()]));
        let after = Record::new()
            .with("description", "Pay the rent")
            .with("tags", FieldValue::List(vec!["b".into(), "c".into()]));
        let command = suggest_instance_command(&instance, &before.diff(&after)).unwrap();
        assert_eq!(
            command,
            "task 7 modify project: +c -a description:\"Pay the rent\""
        );
    }
}
