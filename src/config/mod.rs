//! Configuration and state management for tasksync.
//!
//! ## config.kdl - User preferences
//!
//! Located at `~/.config/tasksync/config.kdl` (or `$TSK_CONFIG_DIR/config.kdl`).
//!
//! Contains:
//! - `api-url` - Base URL of the remote task API
//! - `output-format` - "json" or "human"
//! - `watch-interval` - Seconds between connectivity probes in watch mode
//!
//! ## state.kdl - Runtime state (contains secrets)
//!
//! Located in the data directory next to `tasks.db`, one per API profile.
//!
//! Contains:
//! - `auth-token` - Bearer token for the remote API
//! - `token-saved-at` - ISO 8601 timestamp of the last login
//! - `last-user` - Email used for the last login
//!
//! `state.kdl` is always written with 0600 permissions.

pub mod resolver;
pub mod schema;

pub use resolver::{
    API_URL_ENV, CONFIG_DIR_ENV, ConfigOverrides, DEFAULT_API_URL, Resolved, ResolvedConfig,
    TOKEN_ENV, ValueSource, config_kdl_path, resolve_config, resolve_token, state_kdl_path,
};
pub use schema::{OutputFormat, TaskSyncConfig, TaskSyncState};
#[cfg(unix)]
pub use schema::STATE_FILE_MODE;
