//! Propagation channel
//!
//! Bridges the locked pre-commit phase, which detects template edits that
//! need an instance respawn, and the unlocked post-commit phase, which can
//! perform it. The two phases run in separate processes, so the channel is
//! durable: a single slot on disk, written atomically.
//!
//! ```text
//!   EMPTY --write--> PENDING --take--> EMPTY
//!                    PENDING --write--> PENDING   (previous message discarded)
//! ```
//!
//! The slot is last-write-wins. Two respawn-triggering edits before a drain
//! leave only the second; the writer is told which message it displaced.

use crate::error::ChannelError;
use chrono::{DateTime, Utc};
use recur_model::{Record, TaskId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Deferred instruction for the post-commit phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationMessage {
    /// Template to update and respawn
    pub target_id: TaskId,
    /// Fields applied to the target before respawning
    pub updates: Record,
    /// Record whose edit produced the message
    pub origin_id: TaskId,
    /// Human-readable cause
    pub reason: String,
    /// When the message was written
    pub written_at: DateTime<Utc>,
}

impl PropagationMessage {
    /// Create message
    #[must_use]
    pub fn new(
        target_id: TaskId,
        updates: Record,
        origin_id: TaskId,
        reason: impl Into<String>,
        written_at: DateTime<Utc>,
    ) -> Self {
        Self {
            target_id,
            updates,
            origin_id,
            reason: reason.into(),
            written_at,
        }
    }

    /// Encode for storage
    ///
    /// # Errors
    /// Returns [`ChannelError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, ChannelError> {
        serde_json::to_string_pretty(self).map_err(|e| ChannelError::Encode(e.to_string()))
    }

    /// Decode stored content
    ///
    /// # Errors
    /// Returns [`ChannelError::Malformed`] for anything that is not a message.
    pub fn decode(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text).map_err(|e| ChannelError::Malformed(e.to_string()))
    }
}

/// Slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Empty,
    Pending,
}

/// Single-slot message store shared by two process invocations
pub trait PropagationChannel {
    /// Persist `message`, replacing any unconsumed one
    ///
    /// Returns the displaced message, if there was a readable one.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the message could not be persisted.
    fn write(&self, message: &PropagationMessage)
        -> Result<Option<PropagationMessage>, ChannelError>;

    /// Remove and return the pending message
    ///
    /// The slot is empty afterwards whatever the outcome, so malformed
    /// content is reported once and then gone.
    ///
    /// # Errors
    /// Returns [`ChannelError::Malformed`] for unreadable content and
    /// [`ChannelError::Io`] if the slot could not be accessed.
    fn take(&self) -> Result<Option<PropagationMessage>, ChannelError>;

    /// Current slot state
    fn state(&self) -> ChannelState;
}

impl<T: PropagationChannel + ?Sized> PropagationChannel for &T {
    fn write(
        &self,
        message: &PropagationMessage,
    ) -> Result<Option<PropagationMessage>, ChannelError> {
        (**self).write(message)
    }

    fn take(&self) -> Result<Option<PropagationMessage>, ChannelError> {
        (**self).take()
    }

    fn state(&self) -> ChannelState {
        (**self).state()
    }
}

/// Channel backed by one JSON file, replaced atomically on write
#[derive(Debug, Clone)]
pub struct FileChannel {
    path: PathBuf,
}

impl FileChannel {
    /// Channel at `path`; nothing is touched until the first write
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the slot
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ChannelError {
        ChannelError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_existing(&self) -> Result<Option<String>, ChannelError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

impl PropagationChannel for FileChannel {
    fn write(
        &self,
        message: &PropagationMessage,
    ) -> Result<Option<PropagationMessage>, ChannelError> {
        let displaced = match self.read_existing()? {
            Some(text) => match PropagationMessage::decode(&text) {
                Ok(previous) => {
                    tracing::warn!(
                        template = %previous.target_id,
                        reason = %previous.reason,
                        "Overwriting unconsumed propagation message"
                    );
                    Some(previous)
                }
                Err(e) => {
                    tracing::warn!("Overwriting malformed propagation message: {}", e);
                    None
                }
            },
            None => None,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let encoded = message.encode()?;
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path).map_err(|e| self.io_error(e))?;
            file.write_all(encoded.as_bytes())
                .map_err(|e| self.io_error(e))?;
            file.sync_all().map_err(|e| self.io_error(e))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))?;

        tracing::debug!(
            template = %message.target_id,
            path = %self.path.display(),
            "Propagation message written"
        );
        Ok(displaced)
    }

    fn take(&self) -> Result<Option<PropagationMessage>, ChannelError> {
        let Some(text) = self.read_existing()? else {
            return Ok(None);
        };

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.io_error(e)),
        }

        let message = PropagationMessage::decode(&text)?;
        tracing::debug!(template = %message.target_id, "Propagation message drained");
        Ok(Some(message))
    }

    fn state(&self) -> ChannelState {
        if self.path.exists() {
            ChannelState::Pending
        } else {
            ChannelState::Empty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(reason: &str) -> PropagationMessage {
        let template = TaskId::new();
        PropagationMessage::new(
            template,
            Record::new().with("rlast", 2_u32),
            template,
            reason,
            Utc::now(),
        )
    }

    #[test]
    fn empty_until_written() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileChannel::new(dir.path().join("slot.json"));
        assert_eq!(channel.state(), ChannelState::Empty);
        assert!(channel.take().unwrap().is_none());
    }

    #[test]
    fn write_then_take_empties_slot() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileChannel::new(dir.path().join("slot.json"));
        let sent = message("period changed");

        assert!(channel.write(&sent).unwrap().is_none());
        assert_eq!(channel.state(), ChannelState::Pending);

        let received = channel.take().unwrap().unwrap();
        assert_eq!(received.target_id, sent.target_id);
        assert_eq!(received.updates.last_index(), Some(2));
        assert_eq!(received.reason, "period changed");
        assert_eq!(channel.state(), ChannelState::Empty);
    }

    #[test]
    fn second_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileChannel::new(dir.path().join("slot.json"));
        let first = message("first");
        let second = message("second");

        channel.write(&first).unwrap();
        let displaced = channel.write(&second).unwrap().unwrap();
        assert_eq!(displaced.target_id, first.target_id);

        let received = channel.take().unwrap().unwrap();
        assert_eq!(received.target_id, second.target_id);
        assert!(channel.take().unwrap().is_none());
    }

    #[test]
    fn malformed_content_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.json");
        fs::write(&path, "{ not a message").unwrap();

        let channel = FileChannel::new(&path);
        assert!(matches!(channel.take(), Err(ChannelError::Malformed(_))));
        assert_eq!(channel.state(), ChannelState::Empty);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("slot.json");
        let sent = message("crash before drain");
        FileChannel::new(&path).write(&sent).unwrap();

        let reopened = FileChannel::new(&path);
        assert_eq!(reopened.take().unwrap().unwrap().reason, "crash before drain");
    }
}
