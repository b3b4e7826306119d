//! CLI argument definitions for tsk.

use clap::{Parser, Subcommand};

/// tsk - an offline-first task list.
///
/// Changes made while the server is unreachable are queued locally and sent
/// with `tsk sync` (or automatically by `tsk watch`).
#[derive(Parser, Debug)]
#[command(name = "tsk")]
#[command(author, version, long_version = long_version(), about = "Offline-first task list synced with a remote API", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Remote API base URL (overrides TSK_API_URL and config.kdl)
    #[arg(long = "api", global = true, value_name = "URL")]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a task (queued locally if the server is unreachable)
    Add {
        /// Task title
        title: String,

        /// Task description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List tasks from the local store
    List,

    /// Show one task
    Show {
        /// Task id (a client id is followed to its server id once promoted)
        id: String,
    },

    /// Change fields of a task
    Edit {
        /// Task id
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New description
        #[arg(short, long)]
        description: Option<String>,

        /// New status (pending, in_progress, completed)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Delete a task
    Rm {
        /// Task id
        id: String,
    },

    /// Fetch the task list from the server
    Refresh,

    /// Send queued changes to the server
    Sync,

    /// Show outbox size, last sync time, and connectivity
    Status,

    /// List queued changes
    Outbox,

    /// Log in and store the API token
    Login {
        /// Account email
        email: String,

        /// Password (read from stdin if omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Create an account
    Register {
        /// Display name
        name: String,

        /// Account email
        email: String,

        /// Password (read from stdin if omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Forget the stored API token
    Logout,

    /// Probe the server and sync whenever it comes back online
    Watch {
        /// Seconds between probes while online (1-3600)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved configuration and where each value came from
    Show,
}

/// Version string with build metadata for `tsk --version` (long form).
fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("TSK_GIT_COMMIT"),
        " ",
        env!("TSK_BUILD_TIMESTAMP"),
        ")"
    )
}
