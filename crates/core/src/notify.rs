//! Release state-change notifications.
//!
//! Dispatch is fire-and-forget: a full or closed channel is logged and
//! dropped, never reported back to the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::store::{Entry, EntryState};

/// A release reached a new state.
#[derive(Debug, Clone, Serialize)]
pub struct StateNotification {
    pub timestamp: DateTime<Utc>,
    pub entry_id: i64,
    pub show_id: i64,
    pub episode: u32,
    pub state: EntryState,
    pub file_path: Option<String>,
}

impl StateNotification {
    pub fn new(entry: &Entry, state: EntryState) -> Self {
        Self {
            timestamp: Utc::now(),
            entry_id: entry.id,
            show_id: entry.show_id,
            episode: entry.episode,
            state,
            file_path: entry
                .file_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }
}

/// Receives every persisted state transition.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, entry: &Entry, state: EntryState);
}

/// Forwards notifications into a bounded channel for an outbound worker.
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<StateNotification>,
}

impl ChannelDispatcher {
    pub fn new(tx: mpsc::Sender<StateNotification>) -> Self {
        Self { tx }
    }

    /// Create a dispatcher together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StateNotification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl NotificationDispatcher for ChannelDispatcher {
    fn dispatch(&self, entry: &Entry, state: EntryState) {
        if let Err(e) = self.tx.try_send(StateNotification::new(entry, state)) {
            tracing::warn!(entry_id = entry.id, state = %state, "Dropping notification: {}", e);
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

impl NotificationDispatcher for NoopDispatcher {
    fn dispatch(&self, _entry: &Entry, _state: EntryState) {}
}
