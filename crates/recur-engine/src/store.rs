//! External task store seam
//!
//! The engine never talks to the host directly. Everything it reads or
//! writes goes through [`TaskStore`], and every mutation carries an
//! [`Origin`] so the host adapter can keep the mutation from re-entering the
//! hook entry points.

use crate::error::StoreError;
use recur_model::{Record, Status, TaskId};

/// Mark attached to every mutation the engine issues
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    /// Tag recognised by the entry points
    pub tag: String,
}

impl Origin {
    /// Create origin mark
    #[inline]
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

/// Record selection understood by every store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Every instance of a template, any status
    InstancesOf(TaskId),
    /// Pending or waiting instances of a template
    ActiveInstancesOf(TaskId),
}

impl Filter {
    /// Evaluate the filter against a record
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::InstancesOf(template) => record.template_ref() == Some(*template),
            Self::ActiveInstancesOf(template) => {
                record.template_ref() == Some(*template)
                    && record.status().is_some_and(Status::is_active)
            }
        }
    }

    /// Template the filter is scoped to
    #[must_use]
    pub fn template(&self) -> TaskId {
        match self {
            Self::InstancesOf(id) | Self::ActiveInstancesOf(id) => *id,
        }
    }
}

/// Synchronous access to the host's records
///
/// Calls are expected to complete quickly and are never retried.
pub trait TaskStore {
    /// Fetch one record by identity, any status
    ///
    /// # Errors
    /// Returns [`StoreError`] if the store cannot be queried.
    fn get(&self, id: TaskId) -> Result<Option<Record>, StoreError>;

    /// Fetch every record matching `filter`
    ///
    /// # Errors
    /// Returns [`StoreError`] if the store cannot be queried.
    fn find(&self, filter: &Filter) -> Result<Vec<Record>, StoreError>;

    /// Set the fields of `updates` on an existing record
    ///
    /// # Errors
    /// Returns [`StoreError`] if the mutation fails.
    fn update(&self, id: TaskId, updates: &Record, origin: &Origin) -> Result<(), StoreError>;

    /// Create a record; the record's own `uuid` is kept when present
    ///
    /// # Errors
    /// Returns [`StoreError`] if the mutation fails.
    fn create(&self, record: &Record, origin: &Origin) -> Result<TaskId, StoreError>;

    /// Delete a record
    ///
    /// # Errors
    /// Returns [`StoreError`] if the mutation fails.
    fn delete(&self, id: TaskId, origin: &Origin) -> Result<(), StoreError>;

    /// Append an annotation stamped with the store's current time
    ///
    /// # Errors
    /// Returns [`StoreError`] if the mutation fails.
    fn annotate(&self, id: TaskId, text: &str, origin: &Origin) -> Result<(), StoreError>;
}

impl<T: TaskStore + ?Sized> TaskStore for &T {
    fn get(&self, id: TaskId) -> Result<Option<Record>, StoreError> {
        (**self).get(id)
    }

    fn find(&self, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        (**self).find(filter)
    }

    fn update(&self, id: TaskId, updates: &Record, origin: &Origin) -> Result<(), StoreError> {
        (**self).update(id, updates, origin)
    }

    fn create(&self, record: &Record, origin: &Origin) -> Result<TaskId, StoreError> {
        (**self).create(record, origin)
    }

    fn delete(&self, id: TaskId, origin: &Origin) -> Result<(), StoreError> {
        (**self).delete(id, origin)
    }

    fn annotate(&self, id: TaskId, text: &str, origin: &Origin) -> Result<(), StoreError> {
        (**self).annotate(id, text, origin)
    }
}
