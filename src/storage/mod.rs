//! Storage layer for tasksync data.
//!
//! A single SQLite database (`tasks.db`) holds four tables:
//!
//! - `tasks` - materialized view of known tasks, keyed by current id
//! - `outbox` - ordered log of pending mutations, keyed by insertion order
//! - `id_mapping` - client id to server id lookup, one row per promoted task
//! - `meta` - small key/value facts such as the last sync time
//!
//! Each public operation is atomic on its own. Operations that touch more
//! than one table (`promote_task`, `apply_local_change`, `replace_tasks`) run
//! inside one transaction.

mod handle;

pub use handle::StoreHandle;

use crate::models::{OperationKind, OutboxEntry, Task, TaskPatch, TaskStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Database file name inside the data directory.
pub const DB_FILE: &str = "tasks.db";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TSK_DATA_DIR";

const LAST_SYNC_KEY: &str = "last_sync_at";

/// A change to the task table that must land together with an outbox entry.
#[derive(Debug, Clone, Copy)]
pub enum LocalChange<'a> {
    /// Insert or overwrite a task row
    Put(&'a Task),
    /// Remove the task row with this id
    Remove(&'a str),
}

/// Durable local store for tasks, the outbox, and the id mapping.
pub struct LocalStore {
    /// Directory holding the database file
    pub root: PathBuf,
    conn: Connection,
}

impl LocalStore {
    /// Open (creating if needed) the store under `root`.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let conn = Connection::open(root.join(DB_FILE))?;
        Self::init_schema(&conn)?;
        tracing::debug!(path = %root.display(), "opened local store");
        Ok(Self {
            root: root.to_path_buf(),
            conn,
        })
    }

    /// Check if a store database exists under `root`.
    pub fn exists(root: &Path) -> bool {
        root.join(DB_FILE).exists()
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'Pending',
                pending_sync INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS outbox (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                op TEXT NOT NULL,
                client_id TEXT,
                server_id TEXT,
                payload TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS id_mapping (
                client_id TEXT PRIMARY KEY,
                server_id TEXT NOT NULL,
                mapped_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    // === Task Operations ===

    /// Insert or overwrite a task by id.
    pub fn put_task(&self, task: &Task) -> Result<()> {
        put_task_on(&self.conn, task)
    }

    /// Get a task by id.
    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        get_task_on(&self.conn, id)
    }

    /// All known tasks, in storage iteration order.
    pub fn get_all_tasks(&self) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, description, status, pending_sync, created_at, updated_at FROM tasks",
        )?;
        let rows = stmt
            .query_map([], TaskRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Remove a task by id. No-op if absent.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        self.conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Replace the server-known tasks with `tasks`.
    ///
    /// Rows still flagged `pending_sync` survive: they exist nowhere else.
    pub fn replace_tasks(&mut self, tasks: &[Task]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM tasks WHERE pending_sync = 0", [])?;
        for task in tasks {
            put_task_on(&tx, task)?;
        }
        tx.commit()?;
        Ok(())
    }

    // === Outbox Operations ===

    /// Append an entry and return its assigned sequence number.
    pub fn append_outbox(&self, entry: &OutboxEntry) -> Result<u64> {
        append_outbox_on(&self.conn, entry)
    }

    /// All pending entries in insertion order.
    pub fn get_all_outbox(&self) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, op, client_id, server_id, payload, recorded_at FROM outbox ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map([], OutboxRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(OutboxRow::into_entry).collect()
    }

    /// Number of pending entries.
    pub fn outbox_len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove every entry. Sequence numbers are never reused afterwards.
    pub fn clear_outbox(&self) -> Result<()> {
        self.conn.execute("DELETE FROM outbox", [])?;
        Ok(())
    }

    /// Remove every entry with `seq <= through`.
    ///
    /// A sync pass clears exactly the entries it read, so anything recorded
    /// while the pass was running stays queued for the next one.
    pub fn clear_outbox_through(&self, through: u64) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM outbox WHERE seq <= ?1", [through as i64])?;
        Ok(removed)
    }

    /// Apply a task-table change and append its outbox entry atomically.
    ///
    /// Either both land or neither does.
    pub fn apply_local_change(
        &mut self,
        change: LocalChange<'_>,
        entry: &OutboxEntry,
    ) -> Result<u64> {
        let tx = self.conn.transaction()?;
        match change {
            LocalChange::Put(task) => put_task_on(&tx, task)?,
            LocalChange::Remove(id) => {
                tx.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
            }
        }
        let seq = append_outbox_on(&tx, entry)?;
        tx.commit()?;
        Ok(seq)
    }

    // === Mapping Operations ===

    /// Record that `client_id` is known to the server as `server_id`.
    ///
    /// Re-recording the same pair is a no-op; remapping to a different
    /// server id fails with [`Error::MappingConflict`].
    pub fn set_mapping(&self, client_id: &str, server_id: &str) -> Result<()> {
        set_mapping_on(&self.conn, client_id, server_id)
    }

    pub fn get_mapping(&self, client_id: &str) -> Result<Option<String>> {
        get_mapping_on(&self.conn, client_id)
    }

    /// Promote a locally created task to its server id.
    ///
    /// Moves the row from `client_id` to `server_id`, clears `pending_sync`,
    /// and records the mapping, all in one transaction. When no row exists
    /// under `client_id` (deleted locally after being queued) only the
    /// mapping is written.
    pub fn promote_task(&mut self, client_id: &str, server_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        set_mapping_on(&tx, client_id, server_id)?;
        if let Some(mut task) = get_task_on(&tx, client_id)? {
            tx.execute("DELETE FROM tasks WHERE id = ?1", [client_id])?;
            task.id = server_id.to_string();
            task.pending_sync = false;
            put_task_on(&tx, &task)?;
        }
        tx.commit()?;
        tracing::debug!(client_id, server_id, "promoted task");
        Ok(())
    }

    // === Meta Operations ===

    pub fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![LAST_SYNC_KEY, at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                [LAST_SYNC_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        }))
    }
}

fn put_task_on(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "INSERT INTO tasks (id, title, description, status, pending_sync, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            status = excluded.status,
            pending_sync = excluded.pending_sync,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at",
        params![
            task.id,
            task.title,
            task.description,
            task.status.as_str(),
            task.pending_sync,
            task.created_at.to_rfc3339(),
            task.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn get_task_on(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let row = conn
        .query_row(
            "SELECT id, title, description, status, pending_sync, created_at, updated_at
             FROM tasks WHERE id = ?1",
            [id],
            TaskRow::from_row,
        )
        .optional()?;
    row.map(TaskRow::into_task).transpose()
}

fn append_outbox_on(conn: &Connection, entry: &OutboxEntry) -> Result<u64> {
    let payload = serde_json::to_string(&entry.payload)?;
    conn.execute(
        "INSERT INTO outbox (op, client_id, server_id, payload, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.op.as_str(),
            entry.client_id,
            entry.server_id,
            payload,
            entry.recorded_at.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid() as u64)
}

fn get_mapping_on(conn: &Connection, client_id: &str) -> Result<Option<String>> {
    let server_id = conn
        .query_row(
            "SELECT server_id FROM id_mapping WHERE client_id = ?1",
            [client_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(server_id)
}

fn set_mapping_on(conn: &Connection, client_id: &str, server_id: &str) -> Result<()> {
    match get_mapping_on(conn, client_id)? {
        Some(existing) if existing == server_id => Ok(()),
        Some(existing) => Err(Error::MappingConflict {
            client_id: client_id.to_string(),
            existing,
            requested: server_id.to_string(),
        }),
        None => {
            conn.execute(
                "INSERT INTO id_mapping (client_id, server_id, mapped_at) VALUES (?1, ?2, ?3)",
                params![client_id, server_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        }
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Raw column values of a `tasks` row.
struct TaskRow {
    id: String,
    title: String,
    description: Option<String>,
    status: String,
    pending_sync: bool,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            pending_sync: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            title: self.title,
            description: self.description,
            status: TaskStatus::parse(&self.status)?,
            pending_sync: self.pending_sync,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

/// Raw column values of an `outbox` row.
struct OutboxRow {
    seq: i64,
    op: String,
    client_id: Option<String>,
    server_id: Option<String>,
    payload: String,
    recorded_at: String,
}

impl OutboxRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            op: row.get(1)?,
            client_id: row.get(2)?,
            server_id: row.get(3)?,
            payload: row.get(4)?,
            recorded_at: row.get(5)?,
        })
    }

    fn into_entry(self) -> Result<OutboxEntry> {
        let payload: TaskPatch = serde_json::from_str(&self.payload)?;
        Ok(OutboxEntry {
            seq: self.seq as u64,
            op: OperationKind::parse(&self.op)?,
            client_id: self.client_id,
            server_id: self.server_id,
            payload,
            recorded_at: parse_timestamp(&self.recorded_at),
        })
    }
}

/// Get the data directory for the given API base URL.
///
/// `TSK_DATA_DIR` wins when set. Otherwise a hash of the API URL selects a
/// profile directory under the platform data dir (`~/.local/share/tasksync/`),
/// so two servers never share an outbox.
pub fn get_data_dir(api_url: &str) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    let data_dir = dirs::data_dir()
        .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("tasksync").join(profile_hash(api_url)))
}

/// Short stable hash naming the profile directory for an API URL.
pub fn profile_hash(api_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_url.trim_end_matches('/').as_bytes());
    let hash_hex = format!("{:x}", hasher.finalize());
    hash_hex[..12].to_string()
}
