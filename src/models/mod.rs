//! Data models for tasksync.
//!
//! This module defines the core data structures:
//! - `Task` - A to-do item, keyed by a client id until promoted to a server id
//! - `TaskPatch` - The subset of task fields carried by an outbox entry
//! - `OutboxEntry` - One recorded mutation awaiting transmission
//! - `IdPair` - A client id promoted to a server id
//! - `Resolution` - Where an update or delete entry should be sent
//! - `SyncReport` - What one completed sync pass changed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Task status in the workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "in_progress")]
    InProgress,
    #[serde(alias = "completed")]
    Completed,
}

impl TaskStatus {
    /// Parse a status string, case-insensitive.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" | "in-progress" | "inprogress" => Ok(TaskStatus::InProgress),
            "completed" | "done" => Ok(TaskStatus::Completed),
            _ => Err(Error::InvalidInput(format!("Invalid status: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::InProgress => "InProgress",
            TaskStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A task known to this device.
///
/// While `pending_sync` is true the `id` is a client-generated UUID that the
/// server has never seen. Promotion replaces it with the server's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Current identifier (client id until promoted, then server id)
    #[serde(alias = "_id", deserialize_with = "deserialize_id")]
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub status: TaskStatus,

    /// True while the task is only known locally
    #[serde(default)]
    pub pending_sync: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task with the given ID and title.
    pub fn new(id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            description: None,
            status: TaskStatus::default(),
            pending_sync: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a task that exists only on this device, with a fresh client id.
    pub fn new_local(title: String) -> Self {
        let mut task = Self::new(generate_client_id(), title);
        task.pending_sync = true;
        task
    }
}

/// Generate a client-side task identifier.
pub fn generate_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Task fields carried by an outbox entry or sent in an update request.
///
/// `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    /// A patch carrying every user-editable field of `task`.
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: Some(task.title.clone()),
            description: task.description.clone(),
            status: Some(task.status),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.status.is_none()
    }

    /// Apply the set fields to `task` and bump its update time.
    pub fn apply(&self, task: &mut Task) {
        if let Some(ref title) = self.title {
            task.title = title.clone();
        }
        if let Some(ref description) = self.description {
            task.description = Some(description.clone());
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        task.updated_at = Utc::now();
    }
}

/// Kind of mutation recorded in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            _ => Err(Error::InvalidInput(format!("Invalid operation kind: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A mutation recorded locally and not yet confirmed by the server.
///
/// Every entry refers to exactly one logical task, through `client_id` when
/// the task had not been promoted at record time, or `server_id` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Insertion key, assigned by the store (0 before the entry is appended)
    pub seq: u64,

    pub op: OperationKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,

    #[serde(default)]
    pub payload: TaskPatch,

    pub recorded_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Build an unsaved entry for `op` on `task`.
    pub fn for_task(op: OperationKind, task: &Task) -> Self {
        let (client_id, server_id) = if task.pending_sync {
            (Some(task.id.clone()), None)
        } else {
            (None, Some(task.id.clone()))
        };
        let payload = match op {
            OperationKind::Delete => TaskPatch::default(),
            OperationKind::Create | OperationKind::Update => TaskPatch::from_task(task),
        };
        Self {
            seq: 0,
            op,
            client_id,
            server_id,
            payload,
            recorded_at: Utc::now(),
        }
    }

    /// Identifier shown to users: the client id if any, else the server id.
    pub fn task_ref(&self) -> Option<&str> {
        self.client_id.as_deref().or(self.server_id.as_deref())
    }
}

/// A client id that the server acknowledged under a new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdPair {
    pub client_id: String,
    pub server_id: String,
}

/// Outcome of resolving the remote target of an update or delete entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The entry's client id is mapped to this server id
    Resolved(String),
    /// No mapping; the entry's recorded server id is used as-is
    Unmapped(String),
    /// Neither a mapping nor a recorded id exists
    Invalid,
}

impl Resolution {
    /// The id to send to the remote, if there is one.
    pub fn target(&self) -> Option<&str> {
        match self {
            Resolution::Resolved(id) | Resolution::Unmapped(id) => Some(id),
            Resolution::Invalid => None,
        }
    }
}

/// Result of a completed sync pass, handed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Tasks promoted from client ids to server ids
    pub promoted: Vec<IdPair>,
    /// Server ids that received an update
    pub updated: Vec<String>,
    /// Server ids deleted remotely
    pub deleted: Vec<String>,
    /// Sequence numbers of entries with no usable target
    pub skipped: Vec<u64>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn new() -> Self {
        Self {
            promoted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            skipped: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    /// Number of remote operations the pass applied.
    pub fn applied(&self) -> usize {
        self.promoted.len() + self.updated.len() + self.deleted.len()
    }
}

impl Default for SyncReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept task ids sent as either JSON strings or JSON numbers.
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Str(String),
        Int(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Str(s) => s,
        RawId::Int(n) => n.to_string(),
    })
}
