//! Engine entry points
//!
//! The host calls into the engine at three points:
//!
//! - [`RecurrenceEngine::on_create`] and [`RecurrenceEngine::on_modify`] run
//!   before the host commits, while it holds its store lock. They may only
//!   shape the record being committed and leave a message on the channel.
//! - [`RecurrenceEngine::on_settle`] runs after the commit, once the lock is
//!   released. It drains the channel, spawns successors of finished
//!   instances and heals touched templates.

use crate::channel::{PropagationChannel, PropagationMessage};
use crate::config::RecurrenceConfig;
use crate::error::{
    ChannelError, EngineError, Issue, OrphanError, PropagationFailure, SpawnError, StructuralWarning,
    ValidationError,
};
use crate::feedback::{Feedback, Phase, Severity};
use crate::instance::InstanceEditor;
use crate::lifecycle::TemplateLifecycle;
use crate::spawner::{SpawnReport, Spawner};
use crate::store::{Filter, Origin, TaskStore};
use crate::validator::{enforce_field_classes, TemplateHealth, Validator};
use chrono::{DateTime, Utc};
use recur_model::fields::{self, INSTANCE_EXCLUSIVE_FIELDS};
use recur_model::{classify, FieldValue, Record, RecordKind, RecurrenceType, Status};
use std::collections::HashSet;

/// Result of a pre-commit entry point
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Commit `record`
    Accepted { record: Record, feedback: Feedback },
    /// Abort; the host keeps `original`
    Rejected {
        original: Record,
        errors: Vec<ValidationError>,
        feedback: Feedback,
    },
}

impl HookOutcome {
    fn accept(record: Record, feedback: Feedback) -> Self {
        Self::Accepted { record, feedback }
    }

    fn reject(original: Record, errors: Vec<ValidationError>, mut feedback: Feedback) -> Self {
        for error in &errors {
            feedback.issue(Phase::WillHappen, &error.clone().into());
        }
        Self::Rejected {
            original,
            errors,
            feedback,
        }
    }

    /// Check if the host should commit
    #[inline]
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// The record to hand back to the host
    #[must_use]
    pub fn record(&self) -> &Record {
        match self {
            Self::Accepted { record, .. } => record,
            Self::Rejected { original, .. } => original,
        }
    }

    #[must_use]
    pub fn feedback(&self) -> &Feedback {
        match self {
            Self::Accepted { feedback, .. } | Self::Rejected { feedback, .. } => feedback,
        }
    }
}

/// Recurrence engine over a store and a propagation channel
#[derive(Debug)]
pub struct RecurrenceEngine<S, C> {
    store: S,
    channel: C,
    config: RecurrenceConfig,
    now: DateTime<Utc>,
}

impl<S: TaskStore, C: PropagationChannel> RecurrenceEngine<S, C> {
    /// Create engine; the clock is read once, here
    #[must_use]
    pub fn new(store: S, channel: C, config: RecurrenceConfig) -> Self {
        Self {
            store,
            channel,
            config,
            now: Utc::now(),
        }
    }

    /// With a fixed clock
    #[must_use]
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn channel(&self) -> &C {
        &self.channel
    }

    #[must_use]
    pub fn config(&self) -> &RecurrenceConfig {
        &self.config
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn origin(&self) -> Origin {
        self.config.origin()
    }

    fn lifecycle(&self) -> TemplateLifecycle<'_, S, C> {
        TemplateLifecycle::new(&self.store, &self.channel, self.now)
    }

    fn spawner(&self) -> Spawner<'_, S> {
        Spawner::new(&self.store, self.origin(), self.now)
    }

    /// Whether `record` carries the engine's own origin mark
    fn is_own_mutation(&self, record: &Record) -> bool {
        record
            .get(fields::ORIGIN)
            .and_then(FieldValue::as_text)
            .is_some_and(|tag| tag == self.config.origin_tag)
    }

    /// Pass an engine-issued mutation through untouched
    ///
    /// The origin mark stays on the committed record so the host's
    /// post-commit hook skips it too; the store adapter clears it once the
    /// mutation has landed.
    fn pass_own(&self, record: Record) -> HookOutcome {
        tracing::debug!(task = ?record.uuid(), "Own mutation passed through");
        HookOutcome::accept(record, Feedback::new())
    }

    /// Pre-commit: a record is about to be added
    #[must_use]
    pub fn on_create(&self, mut proposed: Record) -> HookOutcome {
        if self.is_own_mutation(&proposed) {
            return self.pass_own(proposed);
        }
        proposed.remove(fields::ORIGIN);
        let mut feedback = Feedback::new();

        if proposed.status() == Some(Status::Deleted) {
            return HookOutcome::accept(proposed, feedback);
        }

        match classify(&proposed) {
            Ok(RecordKind::Plain) => HookOutcome::accept(proposed, feedback),
            Ok(RecordKind::Template) => self.create_template(proposed, feedback),
            Ok(RecordKind::Instance) => {
                let mut record = proposed;
                for warning in enforce_field_classes(&mut record, RecordKind::Instance) {
                    feedback.issue(Phase::WillHappen, &warning.into());
                }
                HookOutcome::accept(record, feedback)
            }
            Err(_) if proposed.contains(fields::PERIOD) => self.create_template(proposed, feedback),
            Err(e) => HookOutcome::reject(proposed, vec![e.into()], feedback),
        }
    }

    /// Pre-commit: `original` is about to be replaced by `proposed`
    #[must_use]
    pub fn on_modify(&self, original: Record, mut proposed: Record) -> HookOutcome {
        // a mark inherited from `original` is stale, not a fresh engine write
        if self.is_own_mutation(&proposed) && !self.is_own_mutation(&original) {
            return self.pass_own(proposed);
        }
        proposed.remove(fields::ORIGIN);
        let mut feedback = Feedback::new();

        match classify(&original) {
            Ok(RecordKind::Template) => {
                match self.lifecycle().modify(&original, &proposed, &mut feedback) {
                    Ok(record) => HookOutcome::accept(record, feedback),
                    Err(errors) => HookOutcome::reject(original, errors, feedback),
                }
            }
            Ok(RecordKind::Instance) => {
                let editor = InstanceEditor::new(&self.store, self.now);
                let record = editor.modify(&original, &proposed, &mut feedback);
                HookOutcome::accept(record, feedback)
            }
            Ok(RecordKind::Plain) => self.modify_plain(original, proposed, feedback),
            Err(e) => {
                feedback.push(Phase::WillHappen, Severity::Warning, e.to_string());
                HookOutcome::accept(proposed, feedback)
            }
        }
    }

    fn create_template(&self, proposed: Record, mut feedback: Feedback) -> HookOutcome {
        match self.lifecycle().create(&proposed, &mut feedback) {
            Ok(record) => HookOutcome::accept(record, feedback),
            Err(errors) => HookOutcome::reject(proposed, errors, feedback),
        }
    }

    /// A plain record gaining recurrence fields
    fn modify_plain(&self, original: Record, proposed: Record, mut feedback: Feedback) -> HookOutcome {
        if proposed.status().is_some_and(Status::is_terminal) {
            return HookOutcome::accept(proposed, feedback);
        }
        match classify(&proposed) {
            Ok(RecordKind::Plain) => HookOutcome::accept(proposed, feedback),
            Ok(RecordKind::Template) => match self.lifecycle().create(&proposed, &mut feedback) {
                Ok(record) => HookOutcome::accept(record, feedback),
                Err(errors) => HookOutcome::reject(original, errors, feedback),
            },
            Ok(RecordKind::Instance) => {
                let mut record = proposed;
                for field in INSTANCE_EXCLUSIVE_FIELDS {
                    if record.remove(field).is_some() {
                        feedback.issue(
                            Phase::WillHappen,
                            &StructuralWarning::ImmutableFieldReverted {
                                field: (*field).to_string(),
                            }
                            .into(),
                        );
                    }
                }
                HookOutcome::accept(record, feedback)
            }
            Err(_) if proposed.contains(fields::PERIOD) => {
                match self.lifecycle().create(&proposed, &mut feedback) {
                    Ok(record) => HookOutcome::accept(record, feedback),
                    Err(errors) => HookOutcome::reject(original, errors, feedback),
                }
            }
            Err(e) => HookOutcome::reject(original, vec![e.into()], feedback),
        }
    }

    /// Post-commit: the host has committed `touched`
    ///
    /// Never fails; every problem becomes a feedback entry.
    pub fn on_settle(&self, touched: &[Record]) -> Feedback {
        let mut feedback = Feedback::new();
        let spawner = self.spawner();

        self.drain_channel(&spawner, &mut feedback);

        let mut seen = HashSet::new();
        let touched: Vec<&Record> = touched
            .iter()
            .filter(|r| !self.is_own_mutation(r))
            .filter(|r| r.uuid().map_or(true, |id| seen.insert(id)))
            .collect();

        for record in &touched {
            if matches!(classify(record), Ok(RecordKind::Instance))
                && record.status().is_some_and(Status::is_terminal)
            {
                self.spawn_successor(&spawner, record, &mut feedback);
            }
        }

        for record in &touched {
            if !matches!(classify(record), Ok(RecordKind::Template)) {
                continue;
            }
            match record.status() {
                Some(Status::Deleted | Status::Completed) => {
                    self.deactivation_hints(record, &mut feedback);
                }
                _ => self.heal_template(&spawner, record, &mut feedback),
            }
        }

        feedback
    }

    fn drain_channel(&self, spawner: &Spawner<'_, S>, feedback: &mut Feedback) {
        let failure = match self.channel.take() {
            Ok(None) => return,
            Ok(Some(message)) => match self.apply_message(spawner, &message) {
                Ok(report) => {
                    report_spawn(&report, feedback);
                    return;
                }
                Err(failure) => failure,
            },
            Err(ChannelError::Malformed(detail)) => {
                PropagationFailure::MalformedMessage(detail).into()
            }
            Err(e) => PropagationFailure::ChannelUnavailable(e.to_string()).into(),
        };
        feedback.issue(Phase::Happened, &failure);
    }

    fn apply_message(
        &self,
        spawner: &Spawner<'_, S>,
        message: &PropagationMessage,
    ) -> Result<SpawnReport, Issue> {
        let target = message.target_id;
        let apply_failed = |reason: String| -> Issue {
            PropagationFailure::ApplyFailed { target, reason }.into()
        };

        let template = self
            .store
            .get(target)
            .map_err(|e| apply_failed(e.to_string()))?
            .ok_or_else(|| Issue::from(PropagationFailure::TargetMissing(target)))?;

        if template.status() != Some(Status::Recurring) {
            return Err(PropagationFailure::Superseded {
                target,
                reason: "template is no longer recurring".to_string(),
            }
            .into());
        }
        if !message.updates.is_empty() {
            self.store
                .update(target, &message.updates, &self.origin())
                .map_err(|e| apply_failed(e.to_string()))?;
        }

        let index = message
            .updates
            .last_index()
            .or_else(|| template.last_index())
            .unwrap_or(1)
            .max(1);
        tracing::info!(template = %target, index, reason = %message.reason, "Applying propagation message");

        spawner.respawn(target, index).map_err(|e| match e {
            SpawnError::Consistency(err) => err.into(),
            other => apply_failed(other.to_string()),
        })
    }

    fn spawn_successor(&self, spawner: &Spawner<'_, S>, instance: &Record, feedback: &mut Feedback) {
        let (Some(instance_id), Some(template_id), Some(index)) =
            (instance.uuid(), instance.template_ref(), instance.index())
        else {
            return;
        };

        let template = match self.store.get(template_id) {
            Ok(Some(template)) => template,
            Ok(None) => {
                let issue: Issue = OrphanError::MissingTemplate {
                    instance: instance_id,
                    template: template_id,
                }
                .into();
                feedback.issue(Phase::Happened, &issue);
                return;
            }
            Err(e) => {
                report_failure(feedback, &format!("Could not look up template {template_id}"), e);
                return;
            }
        };

        if template.status() != Some(Status::Recurring) {
            tracing::debug!(template = %template_id, "Template inactive, no successor");
            return;
        }
        let last_index = template.last_index().unwrap_or(0);
        if index < last_index {
            tracing::debug!(template = %template_id, index, last_index, "Stale instance, no successor");
            return;
        }
        let kind = template.recurrence_type();
        if instance.status() == Some(Status::Deleted) && !kind.spawns_on_delete() {
            tracing::debug!(template = %template_id, index, "Periodic instance deleted, no successor");
            return;
        }

        match Validator::new(&self.store).check(template_id, template.last_index()) {
            Ok(TemplateHealth::Missing) => {}
            Ok(TemplateHealth::Corrupt(err)) => {
                feedback.issue(Phase::Happened, &err.into());
                return;
            }
            Ok(_) => {
                tracing::debug!(template = %template_id, "Template already has an active instance");
                return;
            }
            Err(e) => {
                report_failure(feedback, &format!("Could not list instances of {template_id}"), e);
                return;
            }
        }

        let terminal = match kind {
            RecurrenceType::Chain => Some(instance.date(fields::END).unwrap_or(self.now)),
            RecurrenceType::Period => None,
        };
        let Some(next) = index.max(last_index).checked_add(1) else {
            feedback.push(
                Phase::Happened,
                Severity::Warning,
                format!(
                    "'{}' reached the highest possible index; no further instance was created.",
                    template.description().unwrap_or_default()
                ),
            );
            return;
        };
        match spawner.spawn(&template, next, terminal) {
            Ok(report) => report_spawn(&report, feedback),
            Err(e) => report_failure(
                feedback,
                &format!(
                    "Could not create the next instance of '{}'",
                    template.description().unwrap_or_default()
                ),
                e,
            ),
        }
    }

    /// Restore the one-active-instance rule for a touched template
    fn heal_template(&self, spawner: &Spawner<'_, S>, touched: &Record, feedback: &mut Feedback) {
        let Some(template_id) = touched.uuid() else {
            return;
        };
        let template = match self.store.get(template_id) {
            Ok(Some(template)) if template.status() == Some(Status::Recurring) => template,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(template = %template_id, "Template lookup failed: {}", e);
                return;
            }
        };

        let health = match Validator::new(&self.store).check(template_id, template.last_index()) {
            Ok(health) => health,
            Err(e) => {
                tracing::warn!(template = %template_id, "Instance lookup failed: {}", e);
                return;
            }
        };

        match health {
            TemplateHealth::Consistent { .. } => {}
            TemplateHealth::Missing => {
                let index = template.last_index().unwrap_or(1).max(1);
                match spawner.respawn(template_id, index) {
                    Ok(report) => report_spawn(&report, feedback),
                    Err(e) => report_failure(
                        feedback,
                        &format!(
                            "Could not create instance #{index} of '{}'",
                            template.description().unwrap_or_default()
                        ),
                        e,
                    ),
                }
            }
            TemplateHealth::IndexDrift {
                index, last_index, ..
            } => {
                let fix = Record::new().with(fields::LAST_INDEX, index);
                match self.store.update(template_id, &fix, &self.origin()) {
                    Ok(()) => {
                        let warning = StructuralWarning::IndexResynced {
                            template: template_id,
                            from: last_index.unwrap_or(0),
                            to: index,
                        };
                        feedback.issue(Phase::Happened, &warning.into());
                    }
                    Err(e) => tracing::warn!(template = %template_id, "Last index resync failed: {}", e),
                }
            }
            TemplateHealth::Corrupt(err) => feedback.issue(Phase::Happened, &err.into()),
        }
    }

    /// Tell the user how to close the instances a stopped template left
    fn deactivation_hints(&self, template: &Record, feedback: &mut Feedback) {
        let Some(template_id) = template.uuid() else {
            return;
        };
        let description = template.description().unwrap_or_default();
        let (verb, action) = if template.status() == Some(Status::Completed) {
            ("Completed", "done")
        } else {
            ("Deleted", "delete")
        };
        feedback.happened(format!(
            "{verb} template '{description}'; no further instances will be created."
        ));

        let active = match self.store.find(&Filter::ActiveInstancesOf(template_id)) {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!(template = %template_id, "Instance lookup failed: {}", e);
                return;
            }
        };
        let references: Vec<String> = active.iter().map(Record::reference).collect();
        match references.len() {
            0 => {}
            1 => feedback.happened(format!(
                "To {action} the remaining instance: task {} {action}",
                references[0]
            )),
            _ => feedback.happened(format!(
                "To {action} the remaining instances: task {} {action}",
                references.join(" ")
            )),
        }
    }
}

/// Report a post-commit failure; nothing after the commit can block
fn report_failure(feedback: &mut Feedback, context: &str, error: impl Into<EngineError>) {
    let error = error.into();
    let severity = if error.is_blocking() {
        Severity::Error
    } else {
        Severity::Warning
    };
    tracing::warn!("{}: {}", context, error);
    feedback.push(Phase::Happened, severity, format!("{context}: {error}"));
}

fn report_spawn(report: &SpawnReport, feedback: &mut Feedback) {
    feedback.happened(report.summary());
    feedback.issues(Phase::Happened, &report.issues);
}
