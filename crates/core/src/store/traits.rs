use std::path::Path;

use chrono::{DateTime, Utc};

use super::{
    EncodeJob, Entry, EntryState, Library, NewEntry, NewShow, SeenRelease, Show, StoreError,
};

/// Durable storage used by every pipeline component.
///
/// Implementations must make each method atomic on its own.
pub trait Store: Send + Sync {
    // Libraries

    /// Create a library. The first library is always the default; passing
    /// `is_default` moves the flag to the new one.
    fn create_library(&self, folder: &Path, is_default: bool) -> Result<Library, StoreError>;

    fn get_library(&self, id: i64) -> Result<Option<Library>, StoreError>;

    fn default_library(&self) -> Result<Option<Library>, StoreError>;

    fn list_libraries(&self) -> Result<Vec<Library>, StoreError>;

    /// Make `id` the only default library.
    fn set_default_library(&self, id: i64) -> Result<(), StoreError>;

    // Shows

    fn create_show(&self, show: &NewShow) -> Result<Show, StoreError>;

    fn get_show(&self, id: i64) -> Result<Option<Show>, StoreError>;

    fn list_shows(&self) -> Result<Vec<Show>, StoreError>;

    // Entries

    /// Insert a release in `Downloading`. Fails with `AlreadyExists` when the
    /// show already has a release for that episode.
    fn create_entry(&self, entry: &NewEntry) -> Result<Entry, StoreError>;

    fn get_entry(&self, id: i64) -> Result<Option<Entry>, StoreError>;

    fn entry_exists(&self, show_id: i64, episode: u32) -> Result<bool, StoreError>;

    /// Releases not yet `Completed` or `Failed`, oldest first.
    fn list_unfinished_entries(&self) -> Result<Vec<Entry>, StoreError>;

    fn list_entries_for_show(&self, show_id: i64) -> Result<Vec<Entry>, StoreError>;

    /// Persist one step from `from` to `to`. `file_path`, when given,
    /// replaces the stored path.
    ///
    /// `to` must be the state right after `from`, or `Failed` from any
    /// non-terminal state. Fails with `Conflict` when the release is no
    /// longer in `from`.
    fn update_entry_state(
        &self,
        id: i64,
        from: EntryState,
        to: EntryState,
        file_path: Option<&Path>,
    ) -> Result<Entry, StoreError>;

    /// Record where the payload is without changing state.
    fn set_entry_file_path(&self, id: i64, path: &Path) -> Result<(), StoreError>;

    // Seen-release ledger

    /// Record a sighting. Returns true when the row was inserted or replaced;
    /// an existing row is replaced only by a later episode or a higher version.
    fn record_seen(&self, seen: &SeenRelease) -> Result<bool, StoreError>;

    fn get_seen(
        &self,
        title: &str,
        release_group: &str,
        resolution: &str,
    ) -> Result<Option<SeenRelease>, StoreError>;

    /// Delete sightings older than `cutoff`; returns how many went.
    fn evict_seen_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    // Encode jobs

    /// Queue (or re-queue) an encode for an entry.
    fn queue_encode_job(&self, entry_id: i64) -> Result<EncodeJob, StoreError>;

    fn start_encode_job(&self, entry_id: i64, initial_size: u64) -> Result<(), StoreError>;

    /// Close a job. `final_size` is `None` when the encode failed.
    fn finish_encode_job(&self, entry_id: i64, final_size: Option<u64>) -> Result<(), StoreError>;

    fn get_encode_job(&self, entry_id: i64) -> Result<Option<EncodeJob>, StoreError>;

    /// Jobs with no `ended_at`, oldest first.
    fn pending_encode_jobs(&self) -> Result<Vec<EncodeJob>, StoreError>;
}
