//! tasksync - an offline-first task list that reconciles with a remote API.
//!
//! The library owns the reconciliation core: a durable local store, an
//! outbox of mutations recorded while the remote is unreachable, and the
//! synchronizer that drains that outbox once connectivity returns. The `tsk`
//! binary is a thin shell over these pieces.

pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod models;
pub mod recorder;
pub mod remote;
pub mod service;
pub mod storage;
pub mod sync;


/// Library-level error type for tasksync operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Client id {client_id} is already mapped to {existing}, refusing to remap to {requested}")]
    MappingConflict {
        client_id: String,
        existing: String,
        requested: String,
    },

    #[error("Remote API unreachable: {0}")]
    Offline(String),

    #[error("Not authenticated: run `tsk login` first")]
    Unauthorized,

    #[error("Remote API returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means the remote could not be reached at all.
    ///
    /// Only transport failures qualify; an HTTP error status means the
    /// server answered and the request itself was rejected.
    pub fn is_offline(&self) -> bool {
        matches!(self, Error::Offline(_))
    }
}

/// Result type alias for tasksync operations.
pub type Result<T> = std::result::Result<T, Error>;
