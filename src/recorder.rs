//! Mutation recorder: turns local task changes into outbox entries.
//!
//! Used when the remote API cannot be reached, or optimistically before a
//! remote call is attempted. An operation that could not be queued must not
//! be reported as successful, so every method returns the store error as-is.

use crate::models::{OperationKind, OutboxEntry, Task, TaskPatch};
use crate::storage::{LocalChange, StoreHandle};
use crate::{Error, Result};

/// Appends outbox entries through a shared store handle.
#[derive(Clone)]
pub struct MutationRecorder {
    store: StoreHandle,
}

impl MutationRecorder {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Append one entry describing `op` on `task`.
    ///
    /// Returns once the entry is durably stored.
    pub fn record(&self, op: OperationKind, task: &Task) -> Result<()> {
        let entry = OutboxEntry::for_task(op, task);
        let seq = self.store.with(|store| store.append_outbox(&entry))?;
        tracing::debug!(seq, op = %op, task = %task.id, "recorded outbox entry");
        Ok(())
    }

    /// Create a task locally and queue its creation.
    pub fn create_offline(&self, title: &str, description: Option<&str>) -> Result<Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("title must not be empty".to_string()));
        }

        let mut task = Task::new_local(title.to_string());
        task.description = description.map(str::to_string);
        let entry = OutboxEntry::for_task(OperationKind::Create, &task);

        let seq = self
            .store
            .with(|store| store.apply_local_change(LocalChange::Put(&task), &entry))?;
        tracing::debug!(seq, task = %task.id, "queued offline create");
        Ok(task)
    }

    /// Apply `patch` to a local task and queue the update.
    pub fn update_offline(&self, id: &str, patch: &TaskPatch) -> Result<Task> {
        if patch.is_empty() {
            return Err(Error::InvalidInput("nothing to update".to_string()));
        }

        let task = self.store.with(|store| {
            let mut task = store
                .get_task(id)?
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            patch.apply(&mut task);

            let mut entry = OutboxEntry::for_task(OperationKind::Update, &task);
            entry.payload = patch.clone();
            store.apply_local_change(LocalChange::Put(&task), &entry)?;
            Ok(task)
        })?;
        tracing::debug!(task = %task.id, "queued offline update");
        Ok(task)
    }

    /// Remove a local task and queue its deletion.
    pub fn delete_offline(&self, id: &str) -> Result<Task> {
        let task = self.store.with(|store| {
            let task = store
                .get_task(id)?
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            let entry = OutboxEntry::for_task(OperationKind::Delete, &task);
            store.apply_local_change(LocalChange::Remove(&task.id), &entry)?;
            Ok(task)
        })?;
        tracing::debug!(task = %task.id, "queued offline delete");
        Ok(task)
    }
}
