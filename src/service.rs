//! Online-first task operations with an offline fallback.
//!
//! Each mutation tries the remote API first and caches the server's answer.
//! When the remote cannot be reached the change is applied locally and
//! queued in the outbox instead. Only transport failures trigger the
//! fallback; an HTTP error (including 401) is returned to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{OperationKind, Task, TaskPatch};
use crate::recorder::MutationRecorder;
use crate::remote::RemoteApi;
use crate::storage::StoreHandle;
use crate::sync::resolve_target;
use crate::{Error, Result};

/// A task after a mutation, and whether it reached the server.
#[derive(Debug, Clone)]
pub struct Change {
    pub task: Task,
    /// True if the change was only recorded in the outbox
    pub queued: bool,
}

impl Change {
    fn applied(task: Task) -> Self {
        Self {
            task,
            queued: false,
        }
    }

    fn queued(task: Task) -> Self {
        Self { task, queued: true }
    }
}

pub struct TaskService {
    store: StoreHandle,
    remote: Arc<dyn RemoteApi>,
    recorder: MutationRecorder,
}

impl TaskService {
    pub fn new(store: StoreHandle, remote: Arc<dyn RemoteApi>) -> Self {
        let recorder = MutationRecorder::new(store.clone());
        Self {
            store,
            remote,
            recorder,
        }
    }

    /// All local tasks, oldest first.
    pub fn list(&self) -> Result<Vec<Task>> {
        let mut tasks = self.store.with(|store| store.get_all_tasks())?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// A task by its current id, or by a client id that has since been promoted.
    pub fn get(&self, id: &str) -> Result<Task> {
        self.store.with(|store| {
            if let Some(task) = store.get_task(id)? {
                return Ok(task);
            }
            let promoted = match store.get_mapping(id)? {
                Some(server_id) => store.get_task(&server_id)?,
                None => None,
            };
            promoted.ok_or_else(|| Error::NotFound(id.to_string()))
        })
    }

    pub fn create(&self, title: &str, description: Option<&str>) -> Result<Change> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("title must not be empty".to_string()));
        }

        match self.remote.create_task(title, description) {
            Ok(task) => {
                self.store.with(|store| store.put_task(&task))?;
                tracing::debug!(task = %task.id, "created task remotely");
                Ok(Change::applied(task))
            }
            Err(e) if e.is_offline() => {
                tracing::info!(error = %e, "remote unreachable, queueing create");
                self.recorder.create_offline(title, description).map(Change::queued)
            }
            Err(e) => Err(e),
        }
    }

    pub fn update(&self, id: &str, patch: &TaskPatch) -> Result<Change> {
        if patch.is_empty() {
            return Err(Error::InvalidInput("nothing to update".to_string()));
        }
        let local = self.get(id)?;
        if !self.can_go_direct(&local)? {
            return self.recorder.update_offline(&local.id, patch).map(Change::queued);
        }

        match self.remote.update_task(&local.id, patch) {
            Ok(task) => {
                self.store.with(|store| store.put_task(&task))?;
                tracing::debug!(task = %task.id, "updated task remotely");
                Ok(Change::applied(task))
            }
            Err(e) if e.is_offline() => {
                tracing::info!(error = %e, "remote unreachable, queueing update");
                self.recorder.update_offline(&local.id, patch).map(Change::queued)
            }
            Err(e) => Err(e),
        }
    }

    pub fn delete(&self, id: &str) -> Result<Change> {
        let local = self.get(id)?;
        if !self.can_go_direct(&local)? {
            return self.recorder.delete_offline(&local.id).map(Change::queued);
        }

        match self.remote.delete_task(&local.id) {
            Ok(()) => {
                self.store.with(|store| store.delete_task(&local.id))?;
                tracing::debug!(task = %local.id, "deleted task remotely");
                Ok(Change::applied(local))
            }
            Err(e) if e.is_offline() => {
                tracing::info!(error = %e, "remote unreachable, queueing delete");
                self.recorder.delete_offline(&local.id).map(Change::queued)
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the cached server tasks with a fresh listing.
    ///
    /// Local-only tasks are kept, and updates or deletes still waiting in the
    /// outbox are applied on top of the listing.
    pub fn refresh(&self) -> Result<Vec<Task>> {
        let listing = self.remote.list_tasks()?;
        let fetched = listing.len();

        self.store.with(|store| {
            let mut tasks: HashMap<String, Task> = listing
                .into_iter()
                .map(|mut task| {
                    task.pending_sync = false;
                    (task.id.clone(), task)
                })
                .collect();

            for entry in store.get_all_outbox()? {
                if entry.op == OperationKind::Create {
                    continue;
                }
                let resolution = resolve_target(store, &entry)?;
                let Some(target) = resolution.target() else {
                    continue;
                };
                match entry.op {
                    OperationKind::Update => {
                        if let Some(task) = tasks.get_mut(target) {
                            entry.payload.apply(task);
                        }
                    }
                    OperationKind::Delete => {
                        tasks.remove(target);
                    }
                    OperationKind::Create => {}
                }
            }

            let merged: Vec<Task> = tasks.into_values().collect();
            store.replace_tasks(&merged)
        })?;

        tracing::debug!(fetched, "refreshed task cache");
        self.list()
    }

    /// Whether a mutation of `task` may bypass the outbox.
    fn can_go_direct(&self, task: &Task) -> Result<bool> {
        if task.pending_sync {
            return Ok(false);
        }
        Ok(self.store.with(|store| store.outbox_len())? == 0)
    }
}
