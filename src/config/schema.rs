//! KDL schema definitions for config.kdl and state.kdl.
//!
//! This module provides:
//! - Rust structs representing the KDL schema
//! - Conversion to and from KDL documents
//! - Validation and reading/writing of the two files

use chrono::{DateTime, Utc};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::{Error, Result};

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Allowed range for `watch-interval`, in seconds.
pub const WATCH_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 1..=3600;

/// User preferences stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// api-url "https://tasks.example.com/api"
/// output-format "human"
/// watch-interval 30
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSyncConfig {
    /// Base URL of the remote task API
    pub api_url: Option<String>,

    /// Default output format for CLI commands
    pub output_format: Option<OutputFormat>,

    /// Seconds between connectivity probes in `tsk watch`
    pub watch_interval: Option<u64>,
}

impl TaskSyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(ref url) = self.api_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("api-url must start with http:// or https://, got {}", url));
            }
        }
        if let Some(interval) = self.watch_interval {
            if !WATCH_INTERVAL_RANGE.contains(&interval) {
                return Err(format!("watch-interval must be 1-3600, got {}", interval));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Unknown or malformed nodes are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(s) = first_string(doc, "api-url") {
            config.api_url = Some(s.to_string());
        }

        if let Some(s) = first_string(doc, "output-format") {
            config.output_format = OutputFormat::parse(s);
        }

        if let Some(node) = doc.get("watch-interval") {
            if let Some(entry) = node.entries().first() {
                if let Some(i) = entry.value().as_integer() {
                    // Negative values become 0 so validation rejects them.
                    config.watch_interval = Some(u64::try_from(i).unwrap_or(0));
                }
            }
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref url) = self.api_url {
            push_string(&mut doc, "api-url", url);
        }

        if let Some(ref format) = self.output_format {
            push_string(&mut doc, "output-format", format.as_str());
        }

        if let Some(interval) = self.watch_interval {
            let mut node = KdlNode::new("watch-interval");
            node.push(KdlEntry::new(KdlValue::Integer(interval as i128)));
            doc.nodes_mut().push(node);
        }

        doc
    }
}

/// Runtime state stored in state.kdl, next to the local store.
///
/// Contains the API token, so the file is written with 0600 permissions.
///
/// # KDL Schema
///
/// ```kdl
/// auth-token "eyJhbGciOi..."
/// token-saved-at "2026-10-16T09:00:00Z"
/// last-user "ana@example.com"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSyncState {
    /// Bearer token for the remote API (sensitive!)
    pub auth_token: Option<String>,

    /// When the token was stored
    pub token_saved_at: Option<DateTime<Utc>>,

    /// Email of the last user who logged in
    pub last_user: Option<String>,
}

impl TaskSyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask the token for display, keeping the first and last 4 characters.
    pub fn masked_token(&self) -> Option<String> {
        self.auth_token.as_deref().map(mask_token)
    }

    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut state = Self::new();

        if let Some(s) = first_string(doc, "auth-token") {
            state.auth_token = Some(s.to_string());
        }

        if let Some(s) = first_string(doc, "token-saved-at") {
            if let Ok(dt) = s.parse::<DateTime<Utc>>() {
                state.token_saved_at = Some(dt);
            }
        }

        if let Some(s) = first_string(doc, "last-user") {
            state.last_user = Some(s.to_string());
        }

        state
    }

    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref token) = self.auth_token {
            push_string(&mut doc, "auth-token", token);
        }

        if let Some(ref saved_at) = self.token_saved_at {
            push_string(&mut doc, "token-saved-at", &saved_at.to_rfc3339());
        }

        if let Some(ref user) = self.last_user {
            push_string(&mut doc, "last-user", user);
        }

        doc
    }
}

/// Mask a token for display purposes.
pub fn mask_token(token: &str) -> String {
    if token.len() <= 12 {
        format!("{}...", &token[..4.min(token.len())])
    } else {
        format!("{}...{}", &token[..4], &token[token.len() - 4..])
    }
}

/// Required permissions for state.kdl (Unix: 0600, owner read/write only).
#[cfg(unix)]
pub const STATE_FILE_MODE: u32 = 0o600;

/// Read and parse a KDL file. A missing file yields an empty document.
pub fn read_kdl(path: &Path) -> Result<KdlDocument> {
    if !path.exists() {
        return Ok(KdlDocument::new());
    }
    let content = fs::read_to_string(path)?;
    content
        .parse::<KdlDocument>()
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Read config.kdl and validate it.
pub fn read_config(path: &Path) -> Result<TaskSyncConfig> {
    let config = TaskSyncConfig::from_kdl(&read_kdl(path)?);
    config
        .validate()
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(config)
}

pub fn read_state(path: &Path) -> Result<TaskSyncState> {
    Ok(TaskSyncState::from_kdl(&read_kdl(path)?))
}

/// Write state.kdl atomically with owner-only permissions.
pub fn write_state(path: &Path, state: &TaskSyncState) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Config(format!("invalid state path: {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(state.to_kdl().to_string().as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(STATE_FILE_MODE))?;
    }
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn first_string<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a str> {
    doc.get(name)?.entries().first()?.value().as_string()
}

fn push_string(doc: &mut KdlDocument, name: &str, value: &str) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::String(value.to_string())));
    doc.nodes_mut().push(node);
}
