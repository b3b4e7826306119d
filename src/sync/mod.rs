//! Outbox synchronization.
//!
//! A [`Synchronizer`] drains the outbox against a [`RemoteApi`]:
//!
//! 1. All queued creates go out in one `create_many` call. Each returned
//!    `(client id, server id)` pair promotes the local task. A create the
//!    response leaves out fails the pass.
//! 2. Updates and deletes replay in insertion order, each sent to the id
//!    returned by [`resolve_target`].
//! 3. If every call succeeded, the entries read at the start of the pass are
//!    removed and the completion time is stored.
//!
//! The first failing remote or store call aborts the pass. The outbox is left
//! untouched so the next trigger retries everything. At most one pass runs at
//! a time; a trigger that arrives while one is running is dropped.

pub mod connectivity;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use crate::models::{IdPair, OperationKind, OutboxEntry, Resolution, SyncReport};
use crate::remote::{CreateRequest, RemoteApi};
use crate::storage::{LocalStore, StoreHandle};
use crate::{Error, Result};

use connectivity::ConnectivityMonitor;

type Subscriber = Box<dyn Fn(&SyncReport) + Send + Sync>;

/// How a call to [`Synchronizer::sync_now`] ended.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Another pass was already running
    Skipped,
    /// The outbox was empty; no remote calls were made
    Idle,
    /// Every entry was applied (or skipped as unresolvable)
    Completed(SyncReport),
    /// The pass stopped at `error`; the outbox is unchanged
    Failed { error: Error },
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Holds the in-flight flag for the duration of a pass.
///
/// Dropping the guard releases the flag, including on early return or panic.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Drains the outbox against the remote API, one pass at a time.
pub struct Synchronizer {
    store: StoreHandle,
    remote: Arc<dyn RemoteApi>,
    in_flight: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Synchronizer {
    pub fn new(store: StoreHandle, remote: Arc<dyn RemoteApi>) -> Self {
        Self {
            store,
            remote,
            in_flight: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Whether a pass is currently running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Register an observer called with the report of every completed pass.
    pub fn subscribe(&self, subscriber: impl Fn(&SyncReport) + Send + Sync + 'static) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(Box::new(subscriber));
        }
    }

    /// Run a pass on every offline to online transition seen by `monitor`.
    pub fn attach(self: &Arc<Self>, monitor: &ConnectivityMonitor) {
        let sync = Arc::clone(self);
        monitor.on_reconnect(move || {
            tracing::info!("connectivity restored, draining outbox");
            sync.sync_now();
        });
    }

    /// Run one synchronization pass.
    ///
    /// Errors never escape: a failed pass is logged and reported as
    /// [`SyncOutcome::Failed`].
    pub fn sync_now(&self) -> SyncOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::debug!("sync already in flight, dropping trigger");
            return SyncOutcome::Skipped;
        };

        match self.run_pass() {
            Ok(None) => {
                tracing::debug!("outbox empty, nothing to sync");
                SyncOutcome::Idle
            }
            Ok(Some(report)) => {
                tracing::info!(
                    promoted = report.promoted.len(),
                    updated = report.updated.len(),
                    deleted = report.deleted.len(),
                    skipped = report.skipped.len(),
                    "sync pass completed"
                );
                self.notify(&report);
                SyncOutcome::Completed(report)
            }
            Err(error) => {
                tracing::error!(error = %error, "sync pass failed, outbox kept for retry");
                SyncOutcome::Failed { error }
            }
        }
    }

    fn notify(&self, report: &SyncReport) {
        match self.subscribers.lock() {
            Ok(subscribers) => {
                for subscriber in subscribers.iter() {
                    subscriber(report);
                }
            }
            Err(_) => tracing::warn!("subscriber list poisoned, report not delivered"),
        }
    }

    fn run_pass(&self) -> Result<Option<SyncReport>> {
        let entries = self.store.with(|store| store.get_all_outbox())?;
        let Some(last_seq) = entries.iter().map(|e| e.seq).max() else {
            return Ok(None);
        };
        tracing::debug!(entries = entries.len(), "starting sync pass");

        let mut report = SyncReport::new();
        self.push_creates(&entries, &mut report)?;
        self.replay_changes(&entries, &mut report)?;

        report.finished_at = Utc::now();
        let finished_at = report.finished_at;
        self.store.with(|store| {
            store.clear_outbox_through(last_seq)?;
            store.set_last_sync_at(finished_at)
        })?;
        Ok(Some(report))
    }

    fn push_creates(&self, entries: &[OutboxEntry], report: &mut SyncReport) -> Result<()> {
        let mut requests = Vec::new();
        let mut queued = HashSet::new();

        for entry in entries.iter().filter(|e| e.op == OperationKind::Create) {
            let Some(client_id) = entry.client_id.as_deref() else {
                tracing::warn!(seq = entry.seq, "create entry has no client id, skipping");
                report.skipped.push(entry.seq);
                continue;
            };
            if !queued.insert(client_id) {
                continue;
            }

            // Created by an earlier pass that failed before clearing the outbox.
            if let Some(server_id) = self.store.with(|store| store.get_mapping(client_id))? {
                tracing::debug!(client_id, %server_id, "create already acknowledged, not resending");
                self.store
                    .with(|store| store.promote_task(client_id, &server_id))?;
                continue;
            }

            requests.push(CreateRequest {
                client_id: client_id.to_string(),
                title: entry.payload.title.clone().unwrap_or_default(),
                description: entry.payload.description.clone().unwrap_or_default(),
            });
        }

        if requests.is_empty() {
            return Ok(());
        }

        tracing::debug!(count = requests.len(), "sending batched create");
        let created = self.remote.create_many(&requests)?;
        let mut unacknowledged: HashSet<&str> =
            requests.iter().map(|r| r.client_id.as_str()).collect();
        for pair in created {
            if !queued.contains(pair.client_id.as_str()) {
                tracing::warn!(client_id = %pair.client_id, "server acknowledged an unknown client id");
                continue;
            }
            self.store
                .with(|store| store.promote_task(&pair.client_id, &pair.id))?;
            unacknowledged.remove(pair.client_id.as_str());
            report.promoted.push(IdPair {
                client_id: pair.client_id,
                server_id: pair.id,
            });
        }

        // Acknowledged creates are mapped now, so a retry only resends the rest.
        if !unacknowledged.is_empty() {
            let mut missing: Vec<&str> = unacknowledged.into_iter().collect();
            missing.sort_unstable();
            return Err(Error::Other(format!(
                "batch create did not acknowledge {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    fn replay_changes(&self, entries: &[OutboxEntry], report: &mut SyncReport) -> Result<()> {
        for entry in entries.iter().filter(|e| e.op != OperationKind::Create) {
            let resolution = self.store.with(|store| resolve_target(store, entry))?;
            let Some(target) = resolution.target() else {
                tracing::warn!(
                    seq = entry.seq,
                    op = %entry.op,
                    task = entry.task_ref().unwrap_or("-"),
                    "no mapping and no recorded id, skipping entry"
                );
                report.skipped.push(entry.seq);
                continue;
            };

            match entry.op {
                OperationKind::Update => {
                    self.remote.update_task(target, &entry.payload)?;
                    report.updated.push(target.to_string());
                }
                OperationKind::Delete => {
                    self.remote.delete_task(target)?;
                    self.store.with(|store| {
                        store.delete_task(target)?;
                        if let Some(client_id) = entry.client_id.as_deref() {
                            store.delete_task(client_id)?;
                        }
                        Ok(())
                    })?;
                    report.deleted.push(target.to_string());
                }
                OperationKind::Create => {}
            }
        }
        Ok(())
    }
}

/// Decide where an update or delete entry should be sent.
///
/// A mapped client id wins over the entry's recorded server id.
pub fn resolve_target(store: &LocalStore, entry: &OutboxEntry) -> Result<Resolution> {
    if let Some(client_id) = entry.client_id.as_deref() {
        if let Some(server_id) = store.get_mapping(client_id)? {
            return Ok(Resolution::Resolved(server_id));
        }
    }
    Ok(match entry.server_id.as_deref() {
        Some(id) if !id.is_empty() => Resolution::Unmapped(id.to_string()),
        _ => Resolution::Invalid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskPatch, TaskStatus};
    use crate::recorder::MutationRecorder;
    use crate::remote::CreatedId;
    use crate::test_utils::{Call, FakeRemote, TestEnv};
    use std::sync::mpsc;

    fn setup() -> (TestEnv, Arc<FakeRemote>, Synchronizer) {
        let env = TestEnv::new();
        let remote = Arc::new(FakeRemote::new());
        let sync = Synchronizer::new(env.handle(), remote.clone());
        (env, remote, sync)
    }

    fn update_entry(client_id: Option<&str>, server_id: Option<&str>) -> OutboxEntry {
        OutboxEntry {
            seq: 0,
            op: OperationKind::Update,
            client_id: client_id.map(str::to_string),
            server_id: server_id.map(str::to_string),
            payload: TaskPatch {
                status: Some(TaskStatus::Completed),
                ..Default::default()
            },
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_batched_create_promotes_task() {
        let (env, remote, sync) = setup();
        let mut task = Task::new_local("Buy milk".to_string());
        task.id = "c1".to_string();
        let store = env.handle();
        store
            .with(|s| {
                s.put_task(&task)?;
                s.append_outbox(&OutboxEntry::for_task(OperationKind::Create, &task))
            })
            .unwrap();
        remote.script_batch(vec![CreatedId {
            client_id: "c1".to_string(),
            id: "42".to_string(),
        }]);

        let outcome = sync.sync_now();
        let report = outcome.report().expect("pass should complete");
        assert_eq!(
            report.promoted,
            vec![IdPair {
                client_id: "c1".to_string(),
                server_id: "42".to_string()
            }]
        );

        store
            .with(|s| {
                assert!(s.get_task("c1")?.is_none());
                let promoted = s.get_task("42")?.expect("promoted task");
                assert!(!promoted.pending_sync);
                assert_eq!(promoted.title, "Buy milk");
                assert_eq!(s.get_mapping("c1")?.as_deref(), Some("42"));
                assert_eq!(s.outbox_len()?, 0);
                assert!(s.get_last_sync_at()?.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_partial_batch_ack_keeps_unacknowledged_create() {
        let (env, remote, sync) = setup();
        let store = env.handle();
        let recorder = MutationRecorder::new(store.clone());
        let a = recorder.create_offline("First", None).unwrap();
        let b = recorder.create_offline("Second", None).unwrap();
        remote.script_batch(vec![CreatedId {
            client_id: a.id.clone(),
            id: "42".to_string(),
        }]);

        let outcome = sync.sync_now();
        match outcome {
            SyncOutcome::Failed { ref error } => {
                assert!(!error.is_offline());
                assert!(error.to_string().contains(&b.id));
            }
            other => panic!("expected failed pass, got {other:?}"),
        }
        store
            .with(|s| {
                assert_eq!(s.outbox_len()?, 2);
                assert_eq!(s.get_mapping(&a.id)?.as_deref(), Some("42"));
                assert!(s.get_mapping(&b.id)?.is_none());
                assert!(s.get_task(&b.id)?.expect("still local").pending_sync);
                assert!(s.get_last_sync_at()?.is_none());
                Ok(())
            })
            .unwrap();

        let report = sync.sync_now().report().cloned().expect("retry completes");
        assert_eq!(
            report.promoted,
            vec![IdPair {
                client_id: b.id.clone(),
                server_id: "100".to_string()
            }]
        );
        assert_eq!(
            remote.calls().last(),
            Some(&Call::CreateMany(vec![b.id.clone()]))
        );
        store
            .with(|s| {
                assert_eq!(s.outbox_len()?, 0);
                assert_eq!(s.get_mapping(&b.id)?.as_deref(), Some("100"));
                assert!(!s.get_task("100")?.expect("promoted").pending_sync);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_all_creates_go_out_in_one_call() {
        let (env, remote, sync) = setup();
        let recorder = MutationRecorder::new(env.handle());
        let ids: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|t| recorder.create_offline(t, None).unwrap().id)
            .collect();

        assert!(sync.sync_now().is_completed());
        assert_eq!(remote.calls(), vec![Call::CreateMany(ids.clone())]);

        let tasks = env.handle().with(|s| s.get_all_tasks()).unwrap();
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| !t.pending_sync));
        assert!(tasks.iter().all(|t| !ids.contains(&t.id)));
    }

    #[test]
    fn test_updates_and_deletes_replay_in_order() {
        let (env, remote, sync) = setup();
        let store = env.handle();
        for id in ["1", "2", "3"] {
            store
                .with(|s| s.put_task(&Task::new(id.to_string(), format!("t{id}"))))
                .unwrap();
        }
        let recorder = MutationRecorder::new(store.clone());
        let patch = TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        recorder.update_offline("2", &patch).unwrap();
        recorder.delete_offline("1").unwrap();
        recorder.update_offline("3", &patch).unwrap();
        recorder.delete_offline("2").unwrap();

        let outcome = sync.sync_now();
        let report = outcome.report().unwrap();
        assert_eq!(
            remote.calls(),
            vec![
                Call::Update("2".to_string()),
                Call::Delete("1".to_string()),
                Call::Update("3".to_string()),
                Call::Delete("2".to_string()),
            ]
        );
        assert_eq!(report.updated, vec!["2", "3"]);
        assert_eq!(report.deleted, vec!["1", "2"]);
    }

    #[test]
    fn test_empty_outbox_makes_no_calls() {
        let (_env, remote, sync) = setup();
        assert!(matches!(sync.sync_now(), SyncOutcome::Idle));
        assert!(matches!(sync.sync_now(), SyncOutcome::Idle));
        assert!(remote.calls().is_empty());
    }

    #[test]
    fn test_update_uses_mapped_id() {
        let (env, remote, sync) = setup();
        let store = env.handle();
        store
            .with(|s| {
                s.set_mapping("c1", "s1")?;
                s.append_outbox(&update_entry(Some("c1"), Some("stale")))
            })
            .unwrap();

        assert!(sync.sync_now().is_completed());
        assert_eq!(remote.calls(), vec![Call::Update("s1".to_string())]);
    }

    #[test]
    fn test_resolve_target_three_ways() {
        let env = TestEnv::new();
        let store = env.open_store();
        store.set_mapping("c1", "s1").unwrap();

        assert_eq!(
            resolve_target(&store, &update_entry(Some("c1"), None)).unwrap(),
            Resolution::Resolved("s1".to_string())
        );
        assert_eq!(
            resolve_target(&store, &update_entry(Some("c9"), Some("7"))).unwrap(),
            Resolution::Unmapped("7".to_string())
        );
        assert_eq!(
            resolve_target(&store, &update_entry(Some("c9"), None)).unwrap(),
            Resolution::Invalid
        );
        assert_eq!(
            resolve_target(&store, &update_entry(None, None)).unwrap(),
            Resolution::Invalid
        );
    }

    #[test]
    fn test_unresolvable_entry_is_skipped() {
        let (env, remote, sync) = setup();
        let seq = env
            .handle()
            .with(|s| s.append_outbox(&update_entry(Some("c1"), None)))
            .unwrap();

        let outcome = sync.sync_now();
        let report = outcome.report().unwrap();
        assert_eq!(report.skipped, vec![seq]);
        assert!(remote.calls().is_empty());
        assert_eq!(env.handle().with(|s| s.outbox_len()).unwrap(), 0);
    }

    #[test]
    fn test_failure_keeps_outbox_and_releases_flag() {
        let (env, remote, sync) = setup();
        let store = env.handle();
        store
            .with(|s| {
                s.put_task(&Task::new("5".to_string(), "x".to_string()))?;
                Ok(())
            })
            .unwrap();
        let recorder = MutationRecorder::new(store.clone());
        recorder.delete_offline("5").unwrap();
        remote.fail_on(Call::Delete("5".to_string()));

        let outcome = sync.sync_now();
        assert!(matches!(outcome, SyncOutcome::Failed { ref error } if error.is_offline()));
        assert!(!sync.is_syncing());
        assert_eq!(store.with(|s| s.outbox_len()).unwrap(), 1);
        assert!(store.with(|s| s.get_last_sync_at()).unwrap().is_none());
    }

    #[test]
    fn test_retry_after_partial_failure_does_not_recreate() {
        let (env, remote, sync) = setup();
        let recorder = MutationRecorder::new(env.handle());
        let created = recorder.create_offline("Write report", None).unwrap();
        let patch = TaskPatch {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        };
        recorder.update_offline(&created.id, &patch).unwrap();
        remote.fail_on(Call::Update("100".to_string()));

        assert!(matches!(sync.sync_now(), SyncOutcome::Failed { .. }));
        // The create landed server-side before the update failed.
        assert_eq!(
            env.handle().with(|s| s.get_mapping(&created.id)).unwrap().as_deref(),
            Some("100")
        );

        remote.fail_on(Call::List);
        assert!(sync.sync_now().is_completed());
        assert_eq!(
            remote.calls(),
            vec![
                Call::CreateMany(vec![created.id.clone()]),
                Call::Update("100".to_string()),
                Call::Update("100".to_string()),
            ]
        );
    }

    #[test]
    fn test_delete_of_offline_created_task_after_create() {
        let (env, remote, sync) = setup();
        let recorder = MutationRecorder::new(env.handle());
        let created = recorder.create_offline("temp", None).unwrap();
        recorder.delete_offline(&created.id).unwrap();

        let outcome = sync.sync_now();
        let report = outcome.report().unwrap();
        assert_eq!(report.deleted, vec!["100"]);
        assert_eq!(
            remote.calls(),
            vec![
                Call::CreateMany(vec![created.id.clone()]),
                Call::Delete("100".to_string())
            ]
        );
        assert!(env.handle().with(|s| s.get_all_tasks()).unwrap().is_empty());
    }

    #[test]
    fn test_subscribers_receive_report() {
        let (env, _remote, sync) = setup();
        let recorder = MutationRecorder::new(env.handle());
        recorder.create_offline("a", None).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        sync.subscribe(move |report| {
            tx.lock().unwrap().send(report.promoted.len()).unwrap();
        });

        assert!(sync.sync_now().is_completed());
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!(matches!(sync.sync_now(), SyncOutcome::Idle));
        assert!(rx.try_recv().is_err());
    }

    /// Remote whose batched create blocks until released.
    struct BlockingRemote {
        inner: FakeRemote,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl RemoteApi for BlockingRemote {
        fn list_tasks(&self) -> Result<Vec<Task>> {
            self.inner.list_tasks()
        }

        fn create_task(&self, title: &str, description: Option<&str>) -> Result<Task> {
            self.inner.create_task(title, description)
        }

        fn create_many(&self, requests: &[CreateRequest]) -> Result<Vec<CreatedId>> {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            self.inner.create_many(requests)
        }

        fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task> {
            self.inner.update_task(id, patch)
        }

        fn delete_task(&self, id: &str) -> Result<()> {
            self.inner.delete_task(id)
        }

        fn ping(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_concurrent_trigger_is_dropped() {
        let env = TestEnv::new();
        MutationRecorder::new(env.handle())
            .create_offline("slow", None)
            .unwrap();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let remote = Arc::new(BlockingRemote {
            inner: FakeRemote::new(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let sync = Arc::new(Synchronizer::new(env.handle(), remote.clone()));

        let worker = {
            let sync = Arc::clone(&sync);
            std::thread::spawn(move || sync.sync_now())
        };
        entered_rx.recv().unwrap();
        assert!(sync.is_syncing());
        assert!(matches!(sync.sync_now(), SyncOutcome::Skipped));

        release_tx.send(()).unwrap();
        assert!(worker.join().unwrap().is_completed());
        assert!(!sync.is_syncing());
        assert_eq!(remote.inner.calls().len(), 1);
    }
}
