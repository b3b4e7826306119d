//! Common test utilities for tsk integration tests.
//!
//! Provides `TestEnv` for isolated data and config directories, and
//! `StubServer`, a minimal in-process stand-in for the remote task API.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use assert_cmd::Command;
use serde_json::{Value, json};
pub use tempfile::TempDir;

/// A test environment with isolated data storage.
///
/// `tsk()` returns a `Command` that sets `TSK_DATA_DIR` and `TSK_CONFIG_DIR`
/// per invocation and clears the other `TSK_*` variables, so tests can run
/// in parallel without touching the user's files.
pub struct TestEnv {
    pub data_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// A Command for the tsk binary with no API URL configured.
    pub fn tsk(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tsk"));
        cmd.env("TSK_DATA_DIR", self.data_dir.path());
        cmd.env("TSK_CONFIG_DIR", self.config_dir.path());
        cmd.env_remove("TSK_API_URL");
        cmd.env_remove("TSK_TOKEN");
        cmd.env_remove("TSK_LOG");
        cmd
    }

    /// A Command for the tsk binary talking to `api_url`.
    pub fn tsk_at(&self, api_url: &str) -> Command {
        let mut cmd = self.tsk();
        cmd.env("TSK_API_URL", api_url);
        cmd
    }

    /// Run `args` against `api_url`, assert success, and parse stdout as JSON.
    pub fn json(&self, api_url: &str, args: &[&str]) -> Value {
        let output = self.tsk_at(api_url).args(args).assert().success();
        let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
        serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
            panic!("stdout of {:?} is not JSON ({}): {}", args, e, stdout)
        })
    }

    pub fn data_path(&self) -> &std::path::Path {
        self.data_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// An API URL nothing is listening on.
pub fn offline_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/api", port)
}

/// One request received by the stub.
#[derive(Debug, Clone)]
pub struct Received {
    pub method: String,
    pub path: String,
    pub body: Value,
}

#[derive(Default)]
struct StubState {
    requests: Vec<Received>,
    tasks: BTreeMap<String, Value>,
    next_id: u64,
}

/// In-process HTTP server implementing the task API endpoints.
///
/// Server ids are "1", "2", ... in creation order. When built with
/// [`StubServer::with_token`], task endpoints answer 401 unless the request
/// carries `Authorization: Bearer <token>`. `POST /login` accepts any email
/// with the password `secret1`.
pub struct StubServer {
    url: String,
    state: Arc<Mutex<StubState>>,
}

impl StubServer {
    pub fn start() -> Self {
        Self::spawn(None)
    }

    pub fn with_token(token: &str) -> Self {
        Self::spawn(Some(token.to_string()))
    }

    fn spawn(token: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());
        let state = Arc::new(Mutex::new(StubState {
            next_id: 1,
            ..Default::default()
        }));

        let shared = Arc::clone(&state);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let _ = handle(stream, &shared, token.as_deref());
            }
        });

        Self { url, state }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Add a task as if another client had created it.
    pub fn seed(&self, title: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id.to_string();
        state.next_id += 1;
        state.tasks.insert(
            id.clone(),
            json!({"id": id, "title": title, "status": "Pending"}),
        );
        id
    }

    pub fn requests(&self) -> Vec<Received> {
        self.state.lock().unwrap().requests.clone()
    }

    /// `METHOD path` of every request so far.
    pub fn request_lines(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }

    pub fn task(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().tasks.get(id).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }
}

fn handle(
    stream: TcpStream,
    state: &Arc<Mutex<StubState>>,
    token: Option<&str>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let full_path = parts.next().unwrap_or_default().to_string();
    let path = full_path
        .strip_prefix("/api")
        .unwrap_or(&full_path)
        .to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "authorization" => authorization = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    let mut raw = vec![0u8; content_length];
    reader.read_exact(&mut raw)?;
    let body: Value = serde_json::from_slice(&raw).unwrap_or(Value::Null);

    let (status, response) = {
        let mut state = state.lock().unwrap();
        state.requests.push(Received {
            method: method.clone(),
            path: path.clone(),
            body: body.clone(),
        });
        route(&mut state, &method, &path, &body, authorization.as_deref(), token)
    };

    let payload = response.to_string();
    let reason = match status {
        200 => "OK",
        201 => "Created",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Error",
    };
    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        payload.len(),
        payload
    )?;
    stream.flush()
}

fn route(
    state: &mut StubState,
    method: &str,
    path: &str,
    body: &Value,
    authorization: Option<&str>,
    token: Option<&str>,
) -> (u16, Value) {
    match (method, path) {
        ("POST", "/login") => {
            if body["password"] == "secret1" {
                (200, json!({"token": "tok-abc123456789"}))
            } else {
                (401, json!({"message": "Invalid credentials"}))
            }
        }
        ("POST", "/auth/register") => (201, json!({"message": "registered"})),
        _ => {
            if let Some(token) = token {
                if authorization != Some(format!("Bearer {}", token).as_str()) {
                    return (401, json!({"message": "Unauthorized"}));
                }
            }
            route_tasks(state, method, path, body)
        }
    }
}

fn route_tasks(state: &mut StubState, method: &str, path: &str, body: &Value) -> (u16, Value) {
    match (method, path) {
        ("GET", "/tasks") => (200, Value::Array(state.tasks.values().cloned().collect())),
        ("POST", "/tasks") => {
            let id = mint(state);
            let task = json!({
                "id": id,
                "title": body["title"],
                "description": body["description"],
                "status": "Pending",
            });
            state.tasks.insert(id, task.clone());
            (201, task)
        }
        ("POST", "/tasks/batch") => {
            let mut created = Vec::new();
            for item in body["tasks"].as_array().cloned().unwrap_or_default() {
                let id = mint(state);
                state.tasks.insert(
                    id.clone(),
                    json!({
                        "id": id,
                        "title": item["title"],
                        "description": item["description"],
                        "status": "Pending",
                    }),
                );
                created.push(json!({"clientId": item["clientId"], "id": id}));
            }
            (201, Value::Array(created))
        }
        (_, p) if p.starts_with("/tasks/") => {
            let id = p.trim_start_matches("/tasks/").to_string();
            match method {
                "PUT" => match state.tasks.get_mut(&id) {
                    Some(task) => {
                        if let (Some(task), Some(patch)) = (task.as_object_mut(), body.as_object()) {
                            for (key, value) in patch {
                                task.insert(key.clone(), value.clone());
                            }
                        }
                        (200, task.clone())
                    }
                    None => (404, json!({"message": "Task not found"})),
                },
                "DELETE" => {
                    state.tasks.remove(&id);
                    (200, json!({}))
                }
                _ => (404, json!({"message": "Not found"})),
            }
        }
        _ => (404, json!({"message": "Not found"})),
    }
}

fn mint(state: &mut StubState) -> String {
    let id = state.next_id.to_string();
    state.next_id += 1;
    id
}
