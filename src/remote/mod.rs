//! Remote task API.
//!
//! The server is a black box reached over HTTP. [`RemoteApi`] is the seam the
//! synchronizer and the task service depend on; [`HttpApi`] is the real
//! implementation, and tests substitute in-memory fakes.
//!
//! Endpoints used:
//! - `GET /tasks` - list the user's tasks
//! - `POST /tasks` - create one task
//! - `POST /tasks/batch` - create many tasks, each tagged with its client id
//! - `PUT /tasks/{id}` - update fields of a task
//! - `DELETE /tasks/{id}` - delete a task
//! - `POST /login`, `POST /auth/register` - authentication

mod http;

pub use http::HttpApi;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::models::{Task, TaskPatch, deserialize_id};

/// Operations the reconciliation core needs from the server.
pub trait RemoteApi: Send + Sync {
    fn list_tasks(&self) -> Result<Vec<Task>>;

    fn create_task(&self, title: &str, description: Option<&str>) -> Result<Task>;

    /// Create all `requests` in one round trip.
    ///
    /// The response pairs each client id with the id the server assigned.
    fn create_many(&self, requests: &[CreateRequest]) -> Result<Vec<CreatedId>>;

    fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task>;

    fn delete_task(&self, id: &str) -> Result<()>;

    /// Whether the server answers at all. Never fails.
    fn ping(&self) -> bool;
}

/// One element of a `POST /tasks/batch` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub client_id: String,
    pub title: String,
    pub description: String,
}

/// Body of `POST /tasks/batch`.
#[derive(Debug, Serialize)]
pub struct BatchCreateBody<'a> {
    pub tasks: &'a [CreateRequest],
}

/// One element of the `POST /tasks/batch` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedId {
    pub client_id: String,
    #[serde(alias = "_id", deserialize_with = "deserialize_id")]
    pub id: String,
}

/// Body of `POST /tasks`.
#[derive(Debug, Serialize)]
pub struct NewTaskBody<'a> {
    pub title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub status: &'a str,
}

/// Body of `POST /login`.
#[derive(Debug, Serialize)]
pub struct LoginBody<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Serialize)]
pub struct RegisterBody<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}
