use std::sync::Mutex;

use crate::notify::{NotificationDispatcher, StateNotification};
use crate::store::{Entry, EntryState};

/// Keeps every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    received: Mutex<Vec<StateNotification>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<StateNotification> {
        self.received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// `(entry_id, state)` pairs in dispatch order.
    pub fn states(&self) -> Vec<(i64, EntryState)> {
        self.notifications()
            .into_iter()
            .map(|n| (n.entry_id, n.state))
            .collect()
    }

    /// States dispatched for a single release.
    pub fn states_for(&self, entry_id: i64) -> Vec<EntryState> {
        self.notifications()
            .into_iter()
            .filter(|n| n.entry_id == entry_id)
            .map(|n| n.state)
            .collect()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, entry: &Entry, state: EntryState) {
        if let Ok(mut received) = self.received.lock() {
            received.push(StateNotification::new(entry, state));
        }
    }
}
