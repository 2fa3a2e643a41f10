//! Testing utilities for the recurrence workspace
//!
//! Shared test helpers, fixtures, and a simulated host that drives the
//! engine through the same pre-commit/commit/post-commit sequence a real
//! task manager would.

#![allow(missing_docs)]

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use recur_engine::{
    ChannelError, ChannelState, Feedback, Filter, HookOutcome, Origin, PropagationChannel,
    PropagationMessage, RecurrenceConfig, RecurrenceEngine, StoreError, TaskStore,
};
use recur_model::fields::{self, ANNOTATIONS};
use recur_model::{Annotation, FieldValue, Record, Status, TaskId};
use std::sync::Arc;

/// Kind of store mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Annotate,
}

/// One mutation seen by [`InMemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub kind: MutationKind,
    pub id: TaskId,
    pub origin: String,
}

#[derive(Debug, Default)]
struct StoreState {
    records: Vec<Record>,
    mutations: Vec<Mutation>,
    next_id: u32,
    failing: bool,
    clock: Option<DateTime<Utc>>,
}

impl StoreState {
    fn position(&self, id: TaskId) -> Option<usize> {
        self.records.iter().position(|r| r.uuid() == Some(id))
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn assign_display_id(&mut self, record: &mut Record) {
        if record.status().map_or(true, Status::is_active) && record.display_id().is_none() {
            self.next_id += 1;
            record.set(fields::ID, self.next_id);
        }
    }

    fn check_failing(&self, command: &str) -> Result<(), StoreError> {
        if self.failing {
            return Err(StoreError::CommandFailed {
                command: command.to_string(),
                code: "1".to_string(),
                stderr: "store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Shared in-memory task store
///
/// Clones share the same records, so a test can keep a handle while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the time used for deletion stamps and annotations
    pub fn set_clock(&self, now: DateTime<Utc>) {
        self.inner.lock().clock = Some(now);
    }

    /// Make every mutation fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    /// Store `record` as the host would commit it, replacing any record
    /// with the same uuid; a uuid is assigned when missing
    pub fn put(&self, mut record: Record) -> TaskId {
        let id = record.uuid().unwrap_or_else(TaskId::new);
        record.set(fields::UUID, id.to_string());
        let mut state = self.inner.lock();
        match state.position(id) {
            Some(pos) => state.records[pos] = record,
            None => {
                state.assign_display_id(&mut record);
                state.records.push(record);
            }
        }
        id
    }

    #[must_use]
    pub fn record(&self, id: TaskId) -> Option<Record> {
        let state = self.inner.lock();
        state.position(id).map(|pos| state.records[pos].clone())
    }

    #[must_use]
    pub fn all(&self) -> Vec<Record> {
        self.inner.lock().records.clone()
    }

    /// Instances of a template in index order, any status
    #[must_use]
    pub fn instances_of(&self, template: TaskId) -> Vec<Record> {
        let mut found: Vec<Record> = self
            .inner
            .lock()
            .records
            .iter()
            .filter(|r| Filter::InstancesOf(template).matches(r))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.index().unwrap_or(0));
        found
    }

    /// Active instances of a template in index order
    #[must_use]
    pub fn active_instances_of(&self, template: TaskId) -> Vec<Record> {
        self.instances_of(template)
            .into_iter()
            .filter(|r| r.status().is_some_and(Status::is_active))
            .collect()
    }

    #[must_use]
    pub fn mutations(&self) -> Vec<Mutation> {
        self.inner.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.inner.lock().mutations.clear();
    }
}

impl TaskStore for InMemoryStore {
    fn get(&self, id: TaskId) -> Result<Option<Record>, StoreError> {
        Ok(self.record(id))
    }

    fn find(&self, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .inner
            .lock()
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn update(&self, id: TaskId, updates: &Record, origin: &Origin) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        state.check_failing("modify")?;
        let now = state.now();
        let pos = state.position(id).ok_or(StoreError::NotFound(id))?;
        let record = &mut state.records[pos];
        record.merge(updates);
        record.set(fields::MODIFIED, now);
        state.mutations.push(Mutation {
            kind: MutationKind::Update,
            id,
            origin: origin.tag.clone(),
        });
        Ok(())
    }

    fn create(&self, record: &Record, origin: &Origin) -> Result<TaskId, StoreError> {
        let mut state = self.inner.lock();
        state.check_failing("import")?;
        let id = record.uuid().unwrap_or_else(TaskId::new);
        let mut record = record.clone();
        record.set(fields::UUID, id.to_string());
        state.assign_display_id(&mut record);
        state.records.push(record);
        state.mutations.push(Mutation {
            kind: MutationKind::Create,
            id,
            origin: origin.tag.clone(),
        });
        Ok(id)
    }

    fn delete(&self, id: TaskId, origin: &Origin) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        state.check_failing("delete")?;
        let now = state.now();
        let pos = state.position(id).ok_or(StoreError::NotFound(id))?;
        let record = &mut state.records[pos];
        record.set_status(Status::Deleted);
        record.set(fields::END, now);
        record.remove(fields::ID);
        state.mutations.push(Mutation {
            kind: MutationKind::Delete,
            id,
            origin: origin.tag.clone(),
        });
        Ok(())
    }

    fn annotate(&self, id: TaskId, text: &str, origin: &Origin) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        state.check_failing("annotate")?;
        let now = state.now();
        let pos = state.position(id).ok_or(StoreError::NotFound(id))?;
        let record = &mut state.records[pos];
        let mut annotations = record
            .get(ANNOTATIONS)
            .and_then(FieldValue::as_annotations)
            .map(<[Annotation]>::to_vec)
            .unwrap_or_default();
        annotations.push(Annotation::new(now, text));
        record.set(ANNOTATIONS, FieldValue::Annotations(annotations));
        state.mutations.push(Mutation {
            kind: MutationKind::Annotate,
            id,
            origin: origin.tag.clone(),
        });
        Ok(())
    }
}

/// In-memory propagation channel holding the encoded message
///
/// Clones share the slot, which stands in for two process invocations
/// seeing the same file.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put arbitrary content in the slot
    pub fn inject_raw(&self, content: impl Into<String>) {
        *self.slot.lock() = Some(content.into());
    }

    /// Pending message without consuming it
    #[must_use]
    pub fn peek(&self) -> Option<PropagationMessage> {
        self.slot
            .lock()
            .as_deref()
            .and_then(|text| PropagationMessage::decode(text).ok())
    }
}

impl PropagationChannel for MemoryChannel {
    fn write(&self, message: &PropagationMessage) -> Result<Option<PropagationMessage>, ChannelError> {
        let encoded = message.encode()?;
        let displaced = self.slot.lock().replace(encoded);
        Ok(displaced.and_then(|text| PropagationMessage::decode(&text).ok()))
    }

    fn take(&self) -> Result<Option<PropagationMessage>, ChannelError> {
        match self.slot.lock().take() {
            Some(text) => PropagationMessage::decode(&text).map(Some),
            None => Ok(None),
        }
    }

    fn state(&self) -> ChannelState {
        if self.slot.lock().is_some() {
            ChannelState::Pending
        } else {
            ChannelState::Empty
        }
    }
}

/// Fixed reference time used across tests
#[must_use]
pub fn day0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// A pending record as a user would add it: description, period and due
#[must_use]
pub fn recurring_task(description: &str, period: &str, due: DateTime<Utc>) -> Record {
    Record::new()
        .with(fields::UUID, TaskId::new().to_string())
        .with(fields::DESCRIPTION, description)
        .with(fields::STATUS, "pending")
        .with(fields::ENTRY, due)
        .with(fields::PERIOD, period)
        .with(fields::DUE, due)
}

/// A chained variant of [`recurring_task`]
#[must_use]
pub fn chained_task(description: &str, period: &str, due: DateTime<Utc>) -> Record {
    recurring_task(description, period, due).with(fields::TYPE, "chain")
}

/// A plain pending record
#[must_use]
pub fn plain_task(description: &str) -> Record {
    Record::new()
        .with(fields::UUID, TaskId::new().to_string())
        .with(fields::DESCRIPTION, description)
        .with(fields::STATUS, "pending")
}

/// What one host command produced
#[derive(Debug, Clone)]
pub struct HostRun {
    /// Pre-commit result
    pub outcome: HookOutcome,
    /// Post-commit feedback
    pub settled: Feedback,
}

impl HostRun {
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.outcome.is_accepted()
    }

    /// The committed (or, when rejected, retained) record
    #[must_use]
    pub fn record(&self) -> &Record {
        self.outcome.record()
    }

    /// Identity of the record the command acted on
    #[must_use]
    pub fn id(&self) -> Option<TaskId> {
        self.record().uuid()
    }

    /// Whether either phase produced a line containing `needle`
    #[must_use]
    pub fn mentions(&self, needle: &str) -> bool {
        self.outcome.feedback().mentions(needle) || self.settled.mentions(needle)
    }
}

/// Host stand-in running the engine around each command
///
/// Each command builds a fresh engine, like one host process per command,
/// all sharing one store and one channel.
#[derive(Debug, Clone)]
pub struct SimulatedHost {
    pub store: InMemoryStore,
    pub channel: MemoryChannel,
    pub config: RecurrenceConfig,
    now: DateTime<Utc>,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new(day0())
    }
}

impl SimulatedHost {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        let store = InMemoryStore::new();
        store.set_clock(now);
        Self {
            store,
            channel: MemoryChannel::new(),
            config: RecurrenceConfig::default(),
            now,
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Move the clock
    pub fn set_now(&mut self, now: DateTime<Utc>) {
        self.now = now;
        self.store.set_clock(now);
    }

    #[must_use]
    pub fn engine(&self) -> RecurrenceEngine<InMemoryStore, MemoryChannel> {
        RecurrenceEngine::new(self.store.clone(), self.channel.clone(), self.config.clone())
            .with_now(self.now)
    }

    /// `task add`
    pub fn add(&self, record: Record) -> HostRun {
        let engine = self.engine();
        let outcome = engine.on_create(record);
        let touched = self.commit(&outcome);
        let settled = engine.on_settle(&touched);
        HostRun { outcome, settled }
    }

    /// `task <id> modify`, with the edit applied by `edit`
    ///
    /// # Panics
    /// Panics if `id` is not in the store.
    pub fn modify(&self, id: TaskId, edit: impl FnOnce(&mut Record)) -> HostRun {
        let original = self
            .store
            .record(id)
            .unwrap_or_else(|| panic!("no task {id} in the store"));
        let mut proposed = original.clone();
        edit(&mut proposed);
        proposed.set(fields::MODIFIED, self.now);

        let engine = self.engine();
        let outcome = engine.on_modify(original, proposed);
        let touched = self.commit(&outcome);
        let settled = engine.on_settle(&touched);
        HostRun { outcome, settled }
    }

    /// `task <id> done`
    pub fn complete(&self, id: TaskId) -> HostRun {
        let now = self.now;
        self.modify(id, |r| {
            r.set_status(Status::Completed);
            r.set(fields::END, now);
            r.remove(fields::ID);
        })
    }

    /// `task <id> delete`
    pub fn delete(&self, id: TaskId) -> HostRun {
        let now = self.now;
        self.modify(id, |r| {
            r.set_status(Status::Deleted);
            r.set(fields::END, now);
            r.remove(fields::ID);
        })
    }

    fn commit(&self, outcome: &HookOutcome) -> Vec<Record> {
        match outcome {
            HookOutcome::Accepted { record, .. } => {
                self.store.put(record.clone());
                let committed = record
                    .uuid()
                    .and_then(|id| self.store.record(id))
                    .unwrap_or_else(|| record.clone());
                vec![committed]
            }
            HookOutcome::Rejected { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let store = InMemoryStore::new();
        let handle = store.clone();
        let id = store.put(plain_task("Buy milk"));
        assert_eq!(handle.record(id).and_then(|r| r.display_id()), Some(1));

        let channel = MemoryChannel::new();
        channel.inject_raw("garbage");
        assert_eq!(channel.clone().state(), ChannelState::Pending);
        assert!(channel.take().is_err());
        assert_eq!(channel.state(), ChannelState::Empty);
    }
}
