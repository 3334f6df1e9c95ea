//! SQLite-backed store.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::{
    EncodeJob, Entry, EntryState, Library, NewEntry, NewShow, SeenRelease, Show, Store,
    StoreError,
};
use crate::parser::compare_version_strings;

const ENTRY_COLUMNS: &str = "id, show_id, episode, version, state, torrent_hash, file_path, \
                             created_manually, last_update";
const SHOW_COLUMNS: &str = "id, title, library_id, desired_format, desired_folder, season, \
                            episode_offset, watch, post_process, preferred_resolution, \
                            preferred_release_group";
const SEEN_COLUMNS: &str =
    "title, release_group, resolution, episode, version, source_location, seen_at";
const JOB_COLUMNS: &str = "entry_id, started_at, ended_at, initial_size, final_size";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS libraries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                folder TEXT NOT NULL UNIQUE,
                is_default INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS shows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                library_id INTEGER REFERENCES libraries(id) ON DELETE SET NULL,
                desired_format TEXT,
                desired_folder TEXT,
                season INTEGER NOT NULL DEFAULT 1,
                episode_offset INTEGER NOT NULL DEFAULT 0,
                watch INTEGER NOT NULL DEFAULT 1,
                post_process INTEGER NOT NULL DEFAULT 0,
                preferred_resolution TEXT,
                preferred_release_group TEXT,
                created_at TEXT NOT NULL
            );

            -- One release per show episode
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                show_id INTEGER NOT NULL REFERENCES shows(id) ON DELETE CASCADE,
                episode INTEGER NOT NULL,
                version TEXT NOT NULL,
                state TEXT NOT NULL,
                torrent_hash TEXT NOT NULL,
                file_path TEXT,
                created_manually INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_update TEXT NOT NULL,
                UNIQUE(show_id, episode)
            );

            CREATE INDEX IF NOT EXISTS idx_entries_state ON entries(state);

            CREATE TABLE IF NOT EXISTS seen_releases (
                title TEXT NOT NULL,
                release_group TEXT NOT NULL,
                resolution TEXT NOT NULL,
                episode INTEGER NOT NULL,
                version TEXT NOT NULL,
                source_location TEXT NOT NULL,
                seen_at TEXT NOT NULL,
                PRIMARY KEY (title, release_group, resolution)
            );

            CREATE INDEX IF NOT EXISTS idx_seen_releases_seen_at ON seen_releases(seen_at);

            CREATE TABLE IF NOT EXISTS encode_jobs (
                entry_id INTEGER PRIMARY KEY REFERENCES entries(id) ON DELETE CASCADE,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                initial_size INTEGER,
                final_size INTEGER
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn fetch_entry(conn: &Connection, id: i64) -> Result<Option<Entry>, StoreError> {
        let sql = format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS);
        Ok(conn.query_row(&sql, params![id], row_to_entry).optional()?)
    }

    fn fetch_library(conn: &Connection, id: i64) -> Result<Option<Library>, StoreError> {
        Ok(conn
            .query_row(
                "SELECT id, folder, is_default FROM libraries WHERE id = ?1",
                params![id],
                row_to_library,
            )
            .optional()?)
    }

    fn fetch_show(conn: &Connection, id: i64) -> Result<Option<Show>, StoreError> {
        let sql = format!("SELECT {} FROM shows WHERE id = ?1", SHOW_COLUMNS);
        Ok(conn.query_row(&sql, params![id], row_to_show).optional()?)
    }

    fn fetch_seen(
        conn: &Connection,
        title: &str,
        release_group: &str,
        resolution: &str,
    ) -> Result<Option<SeenRelease>, StoreError> {
        let sql = format!(
            "SELECT {} FROM seen_releases WHERE title = ?1 AND release_group = ?2 AND resolution = ?3",
            SEEN_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![title, release_group, resolution], row_to_seen)
            .optional()?)
    }

    fn query_entries(
        conn: &Connection,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Entry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM entries WHERE {} ORDER BY id",
            ENTRY_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Read an RFC 3339 column; `idx` is the column reported on failure.
fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn size_to_sql(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn row_to_entry(row: &Row) -> rusqlite::Result<Entry> {
    let state: String = row.get(4)?;
    let state = state
        .parse::<EntryState>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let file_path: Option<String> = row.get(6)?;
    let last_update: String = row.get(8)?;

    Ok(Entry {
        id: row.get(0)?,
        show_id: row.get(1)?,
        episode: row.get(2)?,
        version: row.get(3)?,
        state,
        torrent_hash: row.get(5)?,
        file_path: file_path.map(PathBuf::from),
        created_manually: row.get(7)?,
        last_update: parse_timestamp(8, &last_update)?,
    })
}

fn row_to_show(row: &Row) -> rusqlite::Result<Show> {
    Ok(Show {
        id: row.get(0)?,
        title: row.get(1)?,
        library_id: row.get(2)?,
        desired_format: row.get(3)?,
        desired_folder: row.get(4)?,
        season: row.get(5)?,
        episode_offset: row.get(6)?,
        watch: row.get(7)?,
        post_process: row.get(8)?,
        preferred_resolution: row.get(9)?,
        preferred_release_group: row.get(10)?,
    })
}

fn row_to_library(row: &Row) -> rusqlite::Result<Library> {
    let folder: String = row.get(1)?;
    Ok(Library {
        id: row.get(0)?,
        folder: PathBuf::from(folder),
        is_default: row.get(2)?,
    })
}

fn row_to_seen(row: &Row) -> rusqlite::Result<SeenRelease> {
    let seen_at: String = row.get(6)?;
    Ok(SeenRelease {
        title: row.get(0)?,
        release_group: row.get(1)?,
        resolution: row.get(2)?,
        episode: row.get(3)?,
        version: row.get(4)?,
        source_location: row.get(5)?,
        seen_at: parse_timestamp(6, &seen_at)?,
    })
}

fn row_to_job(row: &Row) -> rusqlite::Result<EncodeJob> {
    let started_at: String = row.get(1)?;
    let ended_at: Option<String> = row.get(2)?;
    let initial_size: Option<i64> = row.get(3)?;
    let final_size: Option<i64> = row.get(4)?;
    Ok(EncodeJob {
        entry_id: row.get(0)?,
        started_at: parse_timestamp(1, &started_at)?,
        ended_at: ended_at
            .as_deref()
            .map(|s| parse_timestamp(2, s))
            .transpose()?,
        initial_size: initial_size.map(|s| s.max(0) as u64),
        final_size: final_size.map(|s| s.max(0) as u64),
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

impl Store for SqliteStore {
    fn create_library(&self, folder: &Path, is_default: bool) -> Result<Library, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: i64 = tx.query_row("SELECT COUNT(*) FROM libraries", [], |r| r.get(0))?;
        let make_default = is_default || existing == 0;
        if make_default {
            tx.execute("UPDATE libraries SET is_default = 0", [])?;
        }

        tx.execute(
            "INSERT INTO libraries (folder, is_default) VALUES (?1, ?2)",
            params![path_to_sql(folder), make_default],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::AlreadyExists(format!("library {}", folder.display()))
            } else {
                e.into()
            }
        })?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Library {
            id,
            folder: folder.to_path_buf(),
            is_default: make_default,
        })
    }

    fn get_library(&self, id: i64) -> Result<Option<Library>, StoreError> {
        let conn = self.conn()?;
        Self::fetch_library(&conn, id)
    }

    fn default_library(&self) -> Result<Option<Library>, StoreError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, folder, is_default FROM libraries WHERE is_default = 1 LIMIT 1",
                [],
                row_to_library,
            )
            .optional()?)
    }

    fn list_libraries(&self) -> Result<Vec<Library>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, folder, is_default FROM libraries ORDER BY id")?;
        let rows = stmt.query_map([], row_to_library)?;
        let mut libraries = Vec::new();
        for row in rows {
            libraries.push(row?);
        }
        Ok(libraries)
    }

    fn set_default_library(&self, id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if Self::fetch_library(&tx, id)?.is_none() {
            return Err(StoreError::NotFound(format!("library {}", id)));
        }
        tx.execute(
            "UPDATE libraries SET is_default = CASE WHEN id = ?1 THEN 1 ELSE 0 END",
            params![id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn create_show(&self, show: &NewShow) -> Result<Show, StoreError> {
        let conn = self.conn()?;
        if let Some(library_id) = show.library_id {
            if Self::fetch_library(&conn, library_id)?.is_none() {
                return Err(StoreError::NotFound(format!("library {}", library_id)));
            }
        }

        conn.execute(
            "INSERT INTO shows (title, library_id, desired_format, desired_folder, season,
                                episode_offset, watch, post_process, preferred_resolution,
                                preferred_release_group, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                show.title,
                show.library_id,
                show.desired_format,
                show.desired_folder,
                show.season,
                show.episode_offset,
                show.watch,
                show.post_process,
                show.preferred_resolution,
                show.preferred_release_group,
                timestamp(Utc::now()),
            ],
        )?;
        let id = conn.last_insert_rowid();

        Self::fetch_show(&conn, id)?.ok_or_else(|| StoreError::NotFound(format!("show {}", id)))
    }

    fn get_show(&self, id: i64) -> Result<Option<Show>, StoreError> {
        let conn = self.conn()?;
        Self::fetch_show(&conn, id)
    }

    fn list_shows(&self) -> Result<Vec<Show>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM shows ORDER BY id", SHOW_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_show)?;
        let mut shows = Vec::new();
        for row in rows {
            shows.push(row?);
        }
        Ok(shows)
    }

    fn create_entry(&self, entry: &NewEntry) -> Result<Entry, StoreError> {
        let conn = self.conn()?;
        if Self::fetch_show(&conn, entry.show_id)?.is_none() {
            return Err(StoreError::NotFound(format!("show {}", entry.show_id)));
        }

        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO entries (show_id, episode, version, state, torrent_hash, file_path,
                                  created_manually, created_at, last_update)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?7)",
            params![
                entry.show_id,
                entry.episode,
                entry.version,
                EntryState::Downloading.as_str(),
                entry.torrent_hash,
                entry.created_manually,
                now,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::AlreadyExists(format!(
                    "show {} episode {}",
                    entry.show_id, entry.episode
                ))
            } else {
                e.into()
            }
        })?;
        let id = conn.last_insert_rowid();

        Self::fetch_entry(&conn, id)?.ok_or_else(|| StoreError::NotFound(format!("entry {}", id)))
    }

    fn get_entry(&self, id: i64) -> Result<Option<Entry>, StoreError> {
        let conn = self.conn()?;
        Self::fetch_entry(&conn, id)
    }

    fn entry_exists(&self, show_id: i64, episode: u32) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM entries WHERE show_id = ?1 AND episode = ?2",
                params![show_id, episode],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn list_unfinished_entries(&self) -> Result<Vec<Entry>, StoreError> {
        let conn = self.conn()?;
        Self::query_entries(
            &conn,
            "state NOT IN (?1, ?2)",
            &[
                &EntryState::Completed.as_str(),
                &EntryState::Failed.as_str(),
            ],
        )
    }

    fn list_entries_for_show(&self, show_id: i64) -> Result<Vec<Entry>, StoreError> {
        let conn = self.conn()?;
        Self::query_entries(&conn, "show_id = ?1", &[&show_id])
    }

    fn update_entry_state(
        &self,
        id: i64,
        from: EntryState,
        to: EntryState,
        file_path: Option<&Path>,
    ) -> Result<Entry, StoreError> {
        let allowed = from.next() == Some(to) || (to == EntryState::Failed && !from.is_terminal());
        if !allowed {
            return Err(StoreError::Conflict(format!(
                "entry {} cannot go from {} to {}",
                id, from, to
            )));
        }

        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE entries SET state = ?1, file_path = COALESCE(?2, file_path), last_update = ?3
             WHERE id = ?4 AND state = ?5",
            params![
                to.as_str(),
                file_path.map(path_to_sql),
                timestamp(Utc::now()),
                id,
                from.as_str()
            ],
        )?;
        if updated == 0 {
            return match Self::fetch_entry(&conn, id)? {
                None => Err(StoreError::NotFound(format!("entry {}", id))),
                Some(current) => Err(StoreError::Conflict(format!(
                    "entry {} is {}, expected {}",
                    id, current.state, from
                ))),
            };
        }
        Self::fetch_entry(&conn, id)?.ok_or_else(|| StoreError::NotFound(format!("entry {}", id)))
    }

    fn set_entry_file_path(&self, id: i64, path: &Path) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE entries SET file_path = ?1 WHERE id = ?2",
            params![path_to_sql(path), id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("entry {}", id)));
        }
        Ok(())
    }

    fn record_seen(&self, seen: &SeenRelease) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let newer = match Self::fetch_seen(&tx, &seen.title, &seen.release_group, &seen.resolution)?
        {
            None => true,
            Some(old) => match seen.episode.cmp(&old.episode) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => {
                    compare_version_strings(&seen.version, &old.version) == Ordering::Greater
                }
            },
        };

        if newer {
            tx.execute(
                "INSERT OR REPLACE INTO seen_releases
                    (title, release_group, resolution, episode, version, source_location, seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    seen.title,
                    seen.release_group,
                    seen.resolution,
                    seen.episode,
                    seen.version,
                    seen.source_location,
                    timestamp(seen.seen_at),
                ],
            )?;
        }
        tx.commit()?;
        Ok(newer)
    }

    fn get_seen(
        &self,
        title: &str,
        release_group: &str,
        resolution: &str,
    ) -> Result<Option<SeenRelease>, StoreError> {
        let conn = self.conn()?;
        Self::fetch_seen(&conn, title, release_group, resolution)
    }

    fn evict_seen_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM seen_releases WHERE seen_at < ?1",
            params![timestamp(cutoff)],
        )?)
    }

    fn queue_encode_job(&self, entry_id: i64) -> Result<EncodeJob, StoreError> {
        let conn = self.conn()?;
        if Self::fetch_entry(&conn, entry_id)?.is_none() {
            return Err(StoreError::NotFound(format!("entry {}", entry_id)));
        }
        conn.execute(
            "INSERT INTO encode_jobs (entry_id, started_at) VALUES (?1, ?2)
             ON CONFLICT(entry_id) DO UPDATE SET
                started_at = excluded.started_at,
                ended_at = NULL,
                initial_size = NULL,
                final_size = NULL",
            params![entry_id, timestamp(Utc::now())],
        )?;

        let sql = format!("SELECT {} FROM encode_jobs WHERE entry_id = ?1", JOB_COLUMNS);
        Ok(conn.query_row(&sql, params![entry_id], row_to_job)?)
    }

    fn start_encode_job(&self, entry_id: i64, initial_size: u64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE encode_jobs SET started_at = ?1, initial_size = ?2 WHERE entry_id = ?3",
            params![timestamp(Utc::now()), size_to_sql(initial_size), entry_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("encode job {}", entry_id)));
        }
        Ok(())
    }

    fn finish_encode_job(&self, entry_id: i64, final_size: Option<u64>) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE encode_jobs SET ended_at = ?1, final_size = ?2 WHERE entry_id = ?3",
            params![
                timestamp(Utc::now()),
                final_size.map(size_to_sql),
                entry_id
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("encode job {}", entry_id)));
        }
        Ok(())
    }

    fn get_encode_job(&self, entry_id: i64) -> Result<Option<EncodeJob>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM encode_jobs WHERE entry_id = ?1", JOB_COLUMNS);
        Ok(conn.query_row(&sql, params![entry_id], row_to_job).optional()?)
    }

    fn pending_encode_jobs(&self) -> Result<Vec<EncodeJob>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM encode_jobs WHERE ended_at IS NULL ORDER BY started_at, entry_id",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }
}
