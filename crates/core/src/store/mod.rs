//! Persistent storage for releases, shows, libraries, the seen-release
//! ledger and encode jobs.
//!
//! The store is the only synchronization point between the poll and
//! reconcile loops: every state transition is one `UPDATE`.

mod sqlite;
mod traits;
mod types;

pub use sqlite::SqliteStore;
pub use traits::Store;
pub use types::*;
