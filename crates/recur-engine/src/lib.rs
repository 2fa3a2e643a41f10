//! Recurrence Engine - template/instance reconciliation
//!
//! Keeps every recurring template paired with at most one active instance
//! and keeps that instance's dates derived from the template's rules.
//!
//! # Architecture
//!
//! ```text
//!  pre-commit (host locked)             post-commit (host unlocked)
//!  ┌───────────────────────┐            ┌──────────────────────────┐
//!  │ RecurrenceEngine      │            │ RecurrenceEngine         │
//!  │   on_create/on_modify │            │   on_settle              │
//!  │     │                 │  channel   │     │                    │
//!  │     ├─ TemplateLifecycle ──write──▶│     ├─ drain ─▶ Spawner  │
//!  │     └─ InstanceEditor │            │     ├─ successors        │
//!  └───────────────────────┘            │     └─ Validator (heal)  │
//!                                       └──────────────────────────┘
//! ```
//!
//! The pre-commit phase may only shape the record the host is committing.
//! Anything that touches a second record (recreating an instance after a
//! template edit) is written to the single-slot [`PropagationChannel`] and
//! applied by [`RecurrenceEngine::on_settle`].
//!
//! # Example
//!
//! ```rust,ignore
//! use recur_engine::{FileChannel, RecurrenceConfig, RecurrenceEngine};
//!
//! let engine = RecurrenceEngine::new(store, FileChannel::new(path), RecurrenceConfig::default());
//! let outcome = engine.on_modify(original, proposed);
//! // host commits outcome.record() ...
//! let feedback = engine.on_settle(&[outcome.record().clone()]);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod channel;
pub mod config;
pub mod error;
pub mod feedback;
pub mod hooks;
pub mod instance;
pub mod lifecycle;
pub mod spawner;
pub mod store;
pub mod validator;

pub use channel::{ChannelState, FileChannel, PropagationChannel, PropagationMessage};
pub use config::RecurrenceConfig;
pub use error::{
    ChannelError, ConfigError, ConsistencyError, EngineError, Issue, OrphanError,
    PropagationFailure, SpawnError, StoreError, StructuralWarning, ValidationError,
};
pub use feedback::{Feedback, FeedbackEntry, Phase, Severity};
pub use hooks::{HookOutcome, RecurrenceEngine};
pub use instance::{InstanceEditor, Successor};
pub use lifecycle::{ChangeSet, TemplateLifecycle};
pub use spawner::{SpawnOutcome, SpawnReport, Spawner};
pub use store::{Filter, Origin, TaskStore};
pub use validator::{TemplateHealth, Validator};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use recur_model::{Record, Status, TaskId};
    use std::cell::RefCell;

    /// Single-threaded store good enough for one round trip
    #[derive(Default)]
    struct Cells(RefCell<Vec<Record>>);

    impl TaskStore for Cells {
        fn get(&self, id: TaskId) -> Result<Option<Record>, StoreError> {
            Ok(self.0.borrow().iter().find(|r| r.uuid() == Some(id)).cloned())
        }
        fn find(&self, filter: &Filter) -> Result<Vec<Record>, StoreError> {
            Ok(self.0.borrow().iter().filter(|r| filter.matches(r)).cloned().collect())
        }
        fn update(&self, id: TaskId, changes: &Record, _: &Origin) -> Result<(), StoreError> {
            let mut records = self.0.borrow_mut();
            let record = records
                .iter_mut()
                .find(|r| r.uuid() == Some(id))
                .ok_or(StoreError::NotFound(id))?;
            record.merge(changes);
            Ok(())
        }
        fn create(&self, record: &Record, _: &Origin) -> Result<TaskId, StoreError> {
            let id = record.uuid().unwrap_or_else(TaskId::new);
            self.0.borrow_mut().push(record.clone());
            Ok(id)
        }
        fn delete(&self, id: TaskId, _: &Origin) -> Result<(), StoreError> {
            let mut records = self.0.borrow_mut();
            if let Some(record) = records.iter_mut().find(|r| r.uuid() == Some(id)) {
                record.set_status(Status::Deleted);
            }
            Ok(())
        }
        fn annotate(&self, _: TaskId, _: &str, _: &Origin) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Slot(RefCell<Option<PropagationMessage>>);

    impl PropagationChannel for Slot {
        fn write(&self, message: &PropagationMessage) -> Result<Option<PropagationMessage>, ChannelError> {
            Ok(self.0.borrow_mut().replace(message.clone()))
        }
        fn take(&self) -> Result<Option<PropagationMessage>, ChannelError> {
            Ok(self.0.borrow_mut().take())
        }
        fn state(&self) -> ChannelState {
            if self.0.borrow().is_some() {
                ChannelState::Pending
            } else {
                ChannelState::Empty
            }
        }
    }

    #[test]
    fn add_then_settle_creates_first_instance() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
        let engine = RecurrenceEngine::new(Cells::default(), Slot::default(), RecurrenceConfig::default())
            .with_now(now);

        let proposed = Record::new()
            .with("uuid", TaskId::new().to_string())
            .with("description", "Stand-up notes")
            .with("status", "pending")
            .with("r", "1d")
            .with("due", now);
        let outcome = engine.on_create(proposed);
        assert!(outcome.is_accepted());
        let template = outcome.record().clone();
        assert_eq!(template.status(), Some(Status::Recurring));

        engine.store().0.borrow_mut().push(template.clone());
        let feedback = engine.on_settle(&[template]);
        assert!(feedback.mentions("Created instance #1"));
        assert_eq!(engine.store().0.borrow().len(), 2);
    }
}
