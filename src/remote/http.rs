//! Blocking HTTP implementation of [`RemoteApi`] on top of `ureq`.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::CredentialStore;
use crate::models::{Task, TaskPatch, TaskStatus};
use crate::remote::{
    BatchCreateBody, CreateRequest, CreatedId, LoginBody, LoginResponse, NewTaskBody, RegisterBody,
    RemoteApi,
};
use crate::{Error, Result};

/// User-Agent sent with every request
const USER_AGENT: &str = concat!("tasksync/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the remote task API.
pub struct HttpApi {
    base_url: String,
    agent: ureq::Agent,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpApi {
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialStore>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange credentials for a token and store it.
    pub fn login(&self, email: &str, password: &str) -> Result<String> {
        let request = self.request("POST", "/login");
        let response = self.execute_public(request, Some(&LoginBody { email, password }))?;
        let body: LoginResponse = parse_json(response)?;
        self.credentials.save(&body.token, Some(email))?;
        tracing::info!(user = email, "logged in");
        Ok(body.token)
    }

    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<()> {
        let request = self.request("POST", "/auth/register");
        self.execute_public(
            request,
            Some(&RegisterBody {
                name,
                email,
                password,
            }),
        )?;
        tracing::info!(user = email, "registered account");
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let mut request = self
            .agent
            .request(method, &self.url(path))
            .set("Accept", "application/json");
        if let Some(token) = self.credentials.token() {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        request
    }

    /// Send a request to an authenticated endpoint.
    ///
    /// A 401 clears the stored token before surfacing [`Error::Unauthorized`].
    fn execute<B: Serialize>(&self, request: ureq::Request, body: Option<&B>) -> Result<ureq::Response> {
        let method = request.method().to_string();
        let url = request.url().to_string();
        tracing::debug!(%method, %url, "remote call");

        match send(request, body) {
            Err(ureq::Error::Status(401, _)) => {
                tracing::warn!(%url, "remote rejected credentials, clearing stored token");
                if let Err(e) = self.credentials.clear() {
                    tracing::error!(error = %e, "failed to clear stored token");
                }
                Err(Error::Unauthorized)
            }
            other => map_response(other),
        }
    }

    /// Send a request to an endpoint that does not require a token.
    fn execute_public<B: Serialize>(
        &self,
        request: ureq::Request,
        body: Option<&B>,
    ) -> Result<ureq::Response> {
        tracing::debug!(url = %request.url(), "remote call");
        map_response(send(request, body))
    }
}

fn send<B: Serialize>(
    request: ureq::Request,
    body: Option<&B>,
) -> std::result::Result<ureq::Response, ureq::Error> {
    match body {
        Some(body) => request.send_json(body),
        None => request.call(),
    }
}

fn map_response(
    result: std::result::Result<ureq::Response, ureq::Error>,
) -> Result<ureq::Response> {
    match result {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(status, response)) => Err(Error::Remote {
            status,
            message: error_message(response),
        }),
        Err(ureq::Error::Transport(transport)) => Err(Error::Offline(transport.to_string())),
    }
}

/// Extract `{"message": ...}` from an error body, falling back to the raw text.
fn error_message(response: ureq::Response) -> String {
    let body = response.into_string().unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body)
}

fn parse_json<T: DeserializeOwned>(response: ureq::Response) -> Result<T> {
    response
        .into_json::<T>()
        .map_err(|e| Error::Other(format!("Failed to parse remote response: {}", e)))
}

/// Validate an id before splicing it into a URL path.
fn path_segment(id: &str) -> Result<&str> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));
    if valid {
        Ok(id)
    } else {
        Err(Error::InvalidInput(format!("Invalid task id: {:?}", id)))
    }
}

impl RemoteApi for HttpApi {
    fn list_tasks(&self) -> Result<Vec<Task>> {
        let response = self.execute::<()>(self.request("GET", "/tasks"), None)?;
        parse_json(response)
    }

    fn create_task(&self, title: &str, description: Option<&str>) -> Result<Task> {
        let body = NewTaskBody {
            title,
            description,
            status: TaskStatus::Pending.as_str(),
        };
        let response = self.execute(self.request("POST", "/tasks"), Some(&body))?;
        parse_json(response)
    }

    fn create_many(&self, requests: &[CreateRequest]) -> Result<Vec<CreatedId>> {
        let body = BatchCreateBody { tasks: requests };
        let response = self.execute(self.request("POST", "/tasks/batch"), Some(&body))?;
        parse_json(response)
    }

    fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task> {
        let path = format!("/tasks/{}", path_segment(id)?);
        let response = self.execute(self.request("PUT", &path), Some(patch))?;
        parse_json(response)
    }

    fn delete_task(&self, id: &str) -> Result<()> {
        let path = format!("/tasks/{}", path_segment(id)?);
        self.execute::<()>(self.request("DELETE", &path), None)?;
        Ok(())
    }

    fn ping(&self) -> bool {
        match self.request("GET", "/tasks").call() {
            Ok(_) | Err(ureq::Error::Status(_, _)) => true,
            Err(ureq::Error::Transport(_)) => false,
        }
    }
}
