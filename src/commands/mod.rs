//! Command implementations for the tsk CLI.
//!
//! Each command returns a result type implementing [`Output`], which the
//! binary prints as JSON (default) or human-readable text (`-H`).

use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::{self, CredentialStore, StateFileCredentials};
use crate::config::{self, ConfigOverrides, OutputFormat, ResolvedConfig};
use crate::models::{OutboxEntry, SyncReport, Task, TaskPatch, TaskStatus};
use crate::remote::{HttpApi, RemoteApi};
use crate::service::{Change, TaskService};
use crate::storage::{self, StoreHandle};
use crate::sync::connectivity::ConnectivityMonitor;
use crate::sync::{SyncOutcome, Synchronizer};
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

/// Everything a command needs: resolved config, the store, and the remote.
pub struct Context {
    pub config: ResolvedConfig,
    pub data_dir: PathBuf,
    pub store: StoreHandle,
    pub credentials: Arc<StateFileCredentials>,
    pub api: Arc<HttpApi>,
}

impl Context {
    pub fn new(overrides: &ConfigOverrides) -> Result<Self> {
        let config = config::resolve_config(overrides)?;
        let data_dir = storage::get_data_dir(config.api_url())?;
        let credentials = Arc::new(StateFileCredentials::new(&data_dir));
        let api = Arc::new(HttpApi::new(config.api_url(), credentials.clone()));
        Ok(Self {
            store: StoreHandle::new(&data_dir),
            config,
            data_dir,
            credentials,
            api,
        })
    }

    pub fn human(&self) -> bool {
        *self.config.output_format() == OutputFormat::Human
    }

    fn service(&self) -> TaskService {
        TaskService::new(self.store.clone(), self.api.clone())
    }

    fn synchronizer(&self) -> Synchronizer {
        Synchronizer::new(self.store.clone(), self.api.clone())
    }
}

fn status_marker(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "[ ]",
        TaskStatus::InProgress => "[~]",
        TaskStatus::Completed => "[x]",
    }
}

fn task_line(task: &Task) -> String {
    let mut line = format!("{} {} {}", status_marker(task.status), task.id, task.title);
    if task.pending_sync {
        line.push_str(" (pending sync)");
    }
    line
}

// === Task commands ===

#[derive(Serialize)]
pub struct TaskChanged {
    pub action: &'static str,
    pub task: Task,
    pub queued: bool,
}

impl TaskChanged {
    fn new(action: &'static str, change: Change) -> Self {
        Self {
            action,
            task: change.task,
            queued: change.queued,
        }
    }
}

impl Output for TaskChanged {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let verb = match self.action {
            "create" => "Created",
            "update" => "Updated",
            _ => "Deleted",
        };
        let mut out = format!("{} task {}: {}", verb, self.task.id, self.task.title);
        if self.queued {
            out.push_str("\n  (server unreachable: queued, will sync when online)");
        }
        out
    }
}

pub fn task_add(ctx: &Context, title: &str, description: Option<&str>) -> Result<TaskChanged> {
    let change = ctx.service().create(title, description)?;
    Ok(TaskChanged::new("create", change))
}

pub fn task_edit(
    ctx: &Context,
    id: &str,
    title: Option<String>,
    description: Option<String>,
    status: Option<&str>,
) -> Result<TaskChanged> {
    let patch = TaskPatch {
        title,
        description,
        status: status.map(TaskStatus::parse).transpose()?,
    };
    let change = ctx.service().update(id, &patch)?;
    Ok(TaskChanged::new("update", change))
}

pub fn task_rm(ctx: &Context, id: &str) -> Result<TaskChanged> {
    let change = ctx.service().delete(id)?;
    Ok(TaskChanged::new("delete", change))
}

#[derive(Serialize)]
pub struct TaskList {
    pub tasks: Vec<Task>,
    pub count: usize,
}

impl Output for TaskList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.tasks.is_empty() {
            return "No tasks.".to_string();
        }
        let mut lines: Vec<String> = self.tasks.iter().map(task_line).collect();
        lines.push(format!("{} task(s)", self.count));
        lines.join("\n")
    }
}

impl TaskList {
    fn new(tasks: Vec<Task>) -> Self {
        Self {
            count: tasks.len(),
            tasks,
        }
    }
}

pub fn task_list(ctx: &Context) -> Result<TaskList> {
    Ok(TaskList::new(ctx.service().list()?))
}

/// Fetch the server's list, then show the merged local view.
pub fn refresh(ctx: &Context) -> Result<TaskList> {
    Ok(TaskList::new(ctx.service().refresh()?))
}

#[derive(Serialize)]
#[serde(transparent)]
pub struct TaskShow(pub Task);

impl Output for TaskShow {
    fn to_json(&self) -> String {
        json(&self.0)
    }

    fn to_human(&self) -> String {
        let task = &self.0;
        let mut lines = vec![
            task_line(task),
            format!("  status:  {}", task.status),
            format!("  created: {}", task.created_at.to_rfc3339()),
            format!("  updated: {}", task.updated_at.to_rfc3339()),
        ];
        if let Some(ref description) = task.description {
            lines.push(format!("  {}", description));
        }
        lines.join("\n")
    }
}

pub fn task_show(ctx: &Context, id: &str) -> Result<TaskShow> {
    Ok(TaskShow(ctx.service().get(id)?))
}

// === Sync commands ===

#[derive(Serialize)]
pub struct SyncResult {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
}

impl Output for SyncResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match (self.outcome, &self.report) {
            ("skipped", _) => "A sync is already running.".to_string(),
            (_, Some(report)) => format_report(report),
            _ => "Nothing to sync.".to_string(),
        }
    }
}

fn format_report(report: &SyncReport) -> String {
    let mut lines = vec![format!(
        "Synced: {} created, {} updated, {} deleted",
        report.promoted.len(),
        report.updated.len(),
        report.deleted.len()
    )];
    for pair in &report.promoted {
        lines.push(format!("  {} -> {}", pair.client_id, pair.server_id));
    }
    if !report.skipped.is_empty() {
        lines.push(format!(
            "  skipped {} unresolvable entr{}",
            report.skipped.len(),
            if report.skipped.len() == 1 { "y" } else { "ies" }
        ));
    }
    lines.join("\n")
}

/// Run one sync pass. A failed pass is reported as an error.
pub fn sync(ctx: &Context) -> Result<SyncResult> {
    match ctx.synchronizer().sync_now() {
        SyncOutcome::Skipped => Ok(SyncResult {
            outcome: "skipped",
            report: None,
        }),
        SyncOutcome::Idle => Ok(SyncResult {
            outcome: "idle",
            report: None,
        }),
        SyncOutcome::Completed(report) => Ok(SyncResult {
            outcome: "completed",
            report: Some(report),
        }),
        SyncOutcome::Failed { error } => Err(error),
    }
}

#[derive(Serialize)]
pub struct StatusResult {
    pub api_url: String,
    pub data_dir: PathBuf,
    pub online: bool,
    pub authenticated: bool,
    pub outbox_len: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Output for StatusResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let last_sync = self
            .last_sync_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        [
            format!("Server:    {} ({})", self.api_url, if self.online { "online" } else { "offline" }),
            format!("Logged in: {}", if self.authenticated { "yes" } else { "no" }),
            format!("Queued:    {} change(s)", self.outbox_len),
            format!("Last sync: {}", last_sync),
            format!("Data:      {}", self.data_dir.display()),
        ]
        .join("\n")
    }
}

pub fn status(ctx: &Context) -> Result<StatusResult> {
    let (outbox_len, last_sync_at) = ctx
        .store
        .with(|store| Ok((store.outbox_len()?, store.get_last_sync_at()?)))?;
    Ok(StatusResult {
        api_url: ctx.config.api_url().to_string(),
        data_dir: ctx.data_dir.clone(),
        online: ctx.api.ping(),
        authenticated: ctx.credentials.token().is_some(),
        outbox_len,
        last_sync_at,
    })
}

#[derive(Serialize)]
pub struct OutboxList {
    pub entries: Vec<OutboxEntry>,
    pub count: usize,
}

impl Output for OutboxList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "Outbox is empty.".to_string();
        }
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|e| {
                format!(
                    "#{} {} {} ({})",
                    e.seq,
                    e.op,
                    e.task_ref().unwrap_or("?"),
                    e.recorded_at.to_rfc3339()
                )
            })
            .collect();
        lines.push(format!("{} queued change(s)", self.count));
        lines.join("\n")
    }
}

pub fn outbox(ctx: &Context) -> Result<OutboxList> {
    let entries = ctx.store.with(|store| store.get_all_outbox())?;
    Ok(OutboxList {
        count: entries.len(),
        entries,
    })
}

#[derive(Serialize)]
pub struct WatchResult {
    pub passes: usize,
}

impl Output for WatchResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Stopped watching after {} sync pass(es).", self.passes)
    }
}

/// Probe the server until `stop` is set, syncing on every reconnect.
///
/// Each completed pass is printed as it happens.
pub fn watch(ctx: &Context, interval: Option<u64>, stop: &AtomicBool) -> Result<WatchResult> {
    let interval = match interval {
        Some(secs) if config::schema::WATCH_INTERVAL_RANGE.contains(&secs) => secs,
        Some(secs) => {
            return Err(Error::InvalidInput(format!(
                "watch interval must be 1-3600 seconds, got {}",
                secs
            )));
        }
        None => ctx.config.watch_interval(),
    };

    let sync = Arc::new(ctx.synchronizer());
    let passes = Arc::new(Mutex::new(0usize));
    let human = ctx.human();
    {
        let passes = Arc::clone(&passes);
        sync.subscribe(move |report| {
            if let Ok(mut n) = passes.lock() {
                *n += 1;
            }
            let line = if human {
                format_report(report)
            } else {
                json(report)
            };
            println!("{}", line);
        });
    }

    let monitor = ConnectivityMonitor::new();
    sync.attach(&monitor);
    tracing::info!(interval, url = ctx.config.api_url(), "watching remote API");
    monitor.run(|| ctx.api.ping(), Duration::from_secs(interval), stop);

    let passes = passes.lock().map(|n| *n).unwrap_or(0);
    Ok(WatchResult { passes })
}

// === Auth commands ===

#[derive(Serialize)]
pub struct AuthResult {
    pub action: &'static str,
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Output for AuthResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let user = self.user.as_deref().unwrap_or("unknown user");
        match self.action {
            "login" => format!("Logged in as {}", user),
            "register" => format!("Registered {}. Run `tsk login {}` next.", user, user),
            _ => "Logged out.".to_string(),
        }
    }
}

fn read_password(provided: Option<String>) -> Result<String> {
    if let Some(password) = provided {
        return Ok(password);
    }
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprint!("Password: ");
        std::io::stderr().flush()?;
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

pub fn login(ctx: &Context, email: &str, password: Option<String>) -> Result<AuthResult> {
    auth::validate_email(email)?;
    let password = read_password(password)?;
    auth::validate_password(&password)?;
    let token = ctx.api.login(email.trim(), &password)?;
    Ok(AuthResult {
        action: "login",
        user: Some(email.trim().to_string()),
        token: Some(config::schema::mask_token(&token)),
    })
}

pub fn register(
    ctx: &Context,
    name: &str,
    email: &str,
    password: Option<String>,
) -> Result<AuthResult> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("name must not be empty".to_string()));
    }
    auth::validate_email(email)?;
    let password = read_password(password)?;
    auth::validate_password(&password)?;
    ctx.api.register(name.trim(), email.trim(), &password)?;
    Ok(AuthResult {
        action: "register",
        user: Some(email.trim().to_string()),
        token: None,
    })
}

pub fn logout(ctx: &Context) -> Result<AuthResult> {
    let user = ctx.credentials.state()?.last_user;
    ctx.credentials.clear()?;
    Ok(AuthResult {
        action: "logout",
        user,
        token: None,
    })
}

// === Config commands ===

#[derive(Serialize)]
pub struct ConfigShow {
    pub api_url: String,
    pub api_url_source: String,
    pub output_format: String,
    pub output_format_source: String,
    pub watch_interval: u64,
    pub watch_interval_source: String,
    pub config_path: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub token: Option<String>,
    pub token_source: Option<String>,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let config_path = self
            .config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string());
        let token = match (&self.token, &self.token_source) {
            (Some(token), Some(source)) => format!("{} [{}]", token, source),
            _ => "(not logged in)".to_string(),
        };
        [
            format!("api-url:        {} [{}]", self.api_url, self.api_url_source),
            format!("output-format:  {} [{}]", self.output_format, self.output_format_source),
            format!("watch-interval: {} [{}]", self.watch_interval, self.watch_interval_source),
            format!("token:          {}", token),
            format!("config file:    {}", config_path),
            format!("data dir:       {}", self.data_dir.display()),
        ]
        .join("\n")
    }
}

pub fn config_show(ctx: &Context) -> Result<ConfigShow> {
    let token = config::resolve_token(&ctx.data_dir)?;
    let cfg = &ctx.config;
    Ok(ConfigShow {
        api_url: cfg.api_url().to_string(),
        api_url_source: cfg.api_url.source.to_string(),
        output_format: cfg.output_format().as_str().to_string(),
        output_format_source: cfg.output_format.source.to_string(),
        watch_interval: cfg.watch_interval(),
        watch_interval_source: cfg.watch_interval.source.to_string(),
        config_path: config::config_kdl_path(),
        data_dir: ctx.data_dir.clone(),
        token: token.as_ref().map(|t| config::schema::mask_token(&t.value)),
        token_source: token.map(|t| t.source.to_string()),
    })
}
