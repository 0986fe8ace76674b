//! Sync manager: owns the operation queue and drives handlers over it.
//!
//! Operations are grouped by path. Each path with queued work gets one
//! worker task that drains it in FIFO order, so paths proceed concurrently
//! while a later operation never overtakes an earlier one on the same path.
//! `queue_operation` only touches in-memory state behind a short lock and
//! never waits on a gateway or the disk.

use crate::error::{SyncError, SyncResult};
use crate::gateway::{LocalStore, RemoteStore};
use crate::handler::SyncHandler;
use crate::journal::OperationJournal;
use crate::mapper::Mapper;
use crate::operation::SyncOperation;
use crate::retry::{
    DEFAULT_BASE_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF_MS, RetryPolicy,
};
use crate::status::{FailedOperation, FailureReport, SyncEvent, SyncStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tandem_types::RecordId;
use tokio::runtime::Handle;
use tokio::sync::{Notify, broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Configuration for the sync manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Bound on each gateway call (ms).
    pub call_timeout_ms: u64,
    /// Attempts per operation, including the first.
    pub max_attempts: u32,
    /// First retry delay (ms).
    pub base_backoff_ms: u64,
    /// Retry delay ceiling (ms).
    pub max_backoff_ms: u64,
    /// Buffered events per subscriber before the slowest one lags.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms.max(self.base_backoff_ms)),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct QueuedOperation<M> {
    seq: u64,
    operation: SyncOperation<M>,
}

struct DispatchState<M> {
    /// A path has a running worker exactly while it has an entry here.
    queues: HashMap<String, VecDeque<QueuedOperation<M>>>,
    /// Queued plus in-flight operations.
    pending: usize,
    closed: bool,
    failed_since_idle: bool,
    dead_letters: Vec<FailedOperation<M>>,
}

enum JournalCommand<M> {
    Append(u64, SyncOperation<M>),
    Remove(u64),
    Flush(oneshot::Sender<()>),
}

/// Record ids claimed by in-flight operations.
struct IdLocks {
    held: Mutex<HashSet<RecordId>>,
    released: Notify,
}

struct IdGuard<'a> {
    locks: &'a IdLocks,
    ids: Vec<RecordId>,
}

impl IdLocks {
    fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Notify::new(),
        }
    }

    /// Waits until none of `ids` is held, then claims all of them at once.
    async fn acquire(&self, ids: Vec<RecordId>) -> IdGuard<'_> {
        loop {
            let released = self.released.notified();
            {
                let mut held = lock(&self.held);
                if ids.iter().all(|id| !held.contains(id)) {
                    held.extend(ids.iter().cloned());
                    return IdGuard { locks: self, ids };
                }
            }
            released.await;
        }
    }
}

impl Drop for IdGuard<'_> {
    fn drop(&mut self) {
        let mut held = lock(&self.locks.held);
        for id in &self.ids {
            held.remove(id);
        }
        drop(held);
        self.locks.released.notify_waiters();
    }
}

struct Shared<M: Mapper, R, L> {
    handler: SyncHandler<M, R, L>,
    policy: RetryPolicy,
    state: Mutex<DispatchState<M::Model>>,
    status: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
    id_locks: IdLocks,
    journal: Option<mpsc::UnboundedSender<JournalCommand<M::Model>>>,
    next_seq: AtomicU64,
    runtime: Handle,
}

/// Owns the queue and the status value; dispatches operations to a
/// [`SyncHandler`] with retry and backoff.
pub struct SyncManager<M: Mapper, R, L> {
    shared: Arc<Shared<M, R, L>>,
    config: SyncConfig,
    to_restore: Mutex<Vec<(u64, SyncOperation<M::Model>)>>,
}

impl<M, R, L> SyncManager<M, R, L>
where
    M: Mapper,
    R: RemoteStore<Model = M::Model> + 'static,
    L: LocalStore<Entity = M::Entity> + 'static,
{
    /// Creates an in-memory manager. Must be called within a Tokio runtime;
    /// workers are spawned on it.
    pub fn new(remote: Arc<R>, local: Arc<L>, mapper: M, config: SyncConfig) -> SyncResult<Self> {
        Self::build(remote, local, mapper, config, None, Vec::new())
    }

    /// Creates a manager whose queue is persisted to `journal`.
    ///
    /// Operations left in the journal by a previous run are loaded now and
    /// dispatched by [`SyncManager::restore`].
    pub fn with_journal(
        remote: Arc<R>,
        local: Arc<L>,
        mapper: M,
        config: SyncConfig,
        journal: Arc<dyn OperationJournal<M::Model>>,
    ) -> SyncResult<Self> {
        let pending = journal.load()?;
        if !pending.is_empty() {
            info!("Loaded {} pending operations from journal", pending.len());
        }
        let tx = spawn_journal_writer(journal)?;
        Self::build(remote, local, mapper, config, Some(tx), pending)
    }

    fn build(
        remote: Arc<R>,
        local: Arc<L>,
        mapper: M,
        config: SyncConfig,
        journal: Option<mpsc::UnboundedSender<JournalCommand<M::Model>>>,
        to_restore: Vec<(u64, SyncOperation<M::Model>)>,
    ) -> SyncResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SyncError::Runtime(format!("sync manager needs a Tokio runtime: {e}")))?;
        let next_seq = to_restore.iter().map(|(seq, _)| *seq).max().unwrap_or(0) + 1;
        let (status, _) = watch::channel(SyncStatus::Idle);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let shared = Shared {
            handler: SyncHandler::new(remote, local, mapper).with_call_timeout(config.call_timeout()),
            policy: config.retry_policy(),
            state: Mutex::new(DispatchState {
                queues: HashMap::new(),
                pending: 0,
                closed: false,
                failed_since_idle: false,
                dead_letters: Vec::new(),
            }),
            status,
            events,
            id_locks: IdLocks::new(),
            journal,
            next_seq: AtomicU64::new(next_seq),
            runtime,
        };

        Ok(Self {
            shared: Arc::new(shared),
            config,
            to_restore: Mutex::new(to_restore),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Appends an operation to its path's queue and returns immediately.
    ///
    /// Operations still waiting in the journal are dispatched first, so a
    /// new operation never overtakes an older one on the same path.
    /// Fails only with [`SyncError::QueueClosed`] after [`SyncManager::shutdown`].
    pub fn queue_operation(&self, operation: SyncOperation<M::Model>) -> SyncResult<()> {
        let mut to_restore = lock(&self.to_restore);
        self.dispatch_restored(&mut to_restore)?;
        let seq = self.shared.next_seq.fetch_add(1, Ordering::SeqCst);
        Shared::enqueue(&self.shared, seq, operation, true)
    }

    /// Dispatches operations loaded from the journal. Returns how many were
    /// re-queued; later calls return zero.
    ///
    /// The first [`SyncManager::queue_operation`] does this implicitly.
    pub fn restore(&self) -> SyncResult<usize> {
        let mut to_restore = lock(&self.to_restore);
        self.dispatch_restored(&mut to_restore)
    }

    fn dispatch_restored(
        &self,
        to_restore: &mut Vec<(u64, SyncOperation<M::Model>)>,
    ) -> SyncResult<usize> {
        if to_restore.is_empty() {
            return Ok(0);
        }
        let pending = std::mem::take(to_restore);
        let count = pending.len();
        for (seq, operation) in pending {
            Shared::enqueue(&self.shared, seq, operation, false)?;
        }
        info!("Restored {} operations from journal", count);
        Ok(count)
    }

    /// Re-queues every dead-lettered operation. Returns how many.
    pub fn retry_failed(&self) -> SyncResult<usize> {
        let failed = {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return Err(SyncError::QueueClosed);
            }
            std::mem::take(&mut state.dead_letters)
        };
        let count = failed.len();
        for entry in failed {
            let seq = self.shared.next_seq.fetch_add(1, Ordering::SeqCst);
            Shared::enqueue(&self.shared, seq, entry.operation, true)?;
        }
        info!("Re-queued {} failed operations", count);
        Ok(count)
    }

    /// Drops every dead-lettered operation without retrying it. Returns how
    /// many were dropped.
    pub fn clear_failed(&self) -> usize {
        let dropped = std::mem::take(&mut lock(&self.shared.state).dead_letters);
        if !dropped.is_empty() {
            info!("Discarded {} failed operations", dropped.len());
        }
        dropped.len()
    }

    /// Operations that failed terminally and have not been retried.
    pub fn failed_operations(&self) -> Vec<FailedOperation<M::Model>> {
        lock(&self.shared.state).dead_letters.clone()
    }

    /// Queued plus in-flight operations.
    pub fn pending_operations(&self) -> usize {
        lock(&self.shared.state).pending
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        *self.shared.status.borrow()
    }

    /// Live view of status transitions.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    /// Subscribes to operation and failure events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// Resolves once nothing is queued or in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.status.subscribe();
        let _ = rx.wait_for(|status| *status != SyncStatus::Syncing).await;
    }

    /// Waits until the journal writer has applied every earlier command.
    pub async fn flush_journal(&self) {
        if let Some(tx) = &self.shared.journal {
            let (done, wait) = oneshot::channel();
            if tx.send(JournalCommand::Flush(done)).is_ok() {
                let _ = wait.await;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    /// Stops accepting operations and waits for queued work to finish.
    pub async fn shutdown(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return;
            }
            state.closed = true;
        }
        info!("Sync manager shutting down");
        self.wait_idle().await;
        self.flush_journal().await;
    }
}

impl<M, R, L> Shared<M, R, L>
where
    M: Mapper,
    R: RemoteStore<Model = M::Model> + 'static,
    L: LocalStore<Entity = M::Entity> + 'static,
{
    fn enqueue(
        this: &Arc<Self>,
        seq: u64,
        operation: SyncOperation<M::Model>,
        journal: bool,
    ) -> SyncResult<()> {
        let path = operation.path().to_string();
        let start_worker = {
            let mut state = lock(&this.state);
            if state.closed {
                return Err(SyncError::QueueClosed);
            }
            if journal {
                this.journal_send(JournalCommand::Append(seq, operation.clone()));
            }
            debug!("Queued {} {} on {} (seq {})", operation.kind(), operation.id(), path, seq);

            state.pending += 1;
            if state.pending == 1 {
                this.status.send_if_modified(|status| {
                    let changed = *status != SyncStatus::Syncing;
                    *status = SyncStatus::Syncing;
                    changed
                });
            }

            let start_worker = !state.queues.contains_key(&path);
            state
                .queues
                .entry(path.clone())
                .or_default()
                .push_back(QueuedOperation { seq, operation });
            start_worker
        };

        if start_worker {
            let shared = Arc::clone(this);
            this.runtime.spawn(async move { shared.run_path(path).await });
        }
        Ok(())
    }

    /// Drains one path's queue in FIFO order, then retires.
    async fn run_path(self: Arc<Self>, path: String) {
        debug!("Worker started for {}", path);
        loop {
            let next = {
                let mut state = lock(&self.state);
                match state.queues.get_mut(&path).and_then(VecDeque::pop_front) {
                    Some(next) => next,
                    None => {
                        state.queues.remove(&path);
                        break;
                    }
                }
            };
            self.execute(next).await;
        }
        debug!("Worker finished for {}", path);
    }

    /// Runs one operation through all of its attempts.
    async fn execute(&self, queued: QueuedOperation<M::Model>) {
        let QueuedOperation { seq, operation } = queued;
        let mut current = operation.clone();
        let mut attempt = 1;
        let mut failures: Vec<FailureReport> = Vec::new();

        loop {
            let outcome = {
                let ids = self.handler.record_ids(&current);
                let _claimed = self.id_locks.acquire(ids).await;
                self.handler.handle(&current).await
            };

            let retryable = outcome.transient_failures();
            let exhausted = !retryable.is_empty() && !self.policy.should_retry(attempt);
            for (id, error) in outcome.failures() {
                if exhausted || !retryable.contains(id) {
                    failures.push(FailureReport {
                        operation_id: operation.id(),
                        kind: operation.kind(),
                        path: operation.path().to_string(),
                        record_id: Some(id.clone()),
                        error: error.clone(),
                        attempts: attempt,
                    });
                }
            }
            if retryable.is_empty() || exhausted {
                break;
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                "{} on {}: {} records failed transiently (attempt {}/{}), retrying in {:?}",
                operation.kind(),
                operation.path(),
                retryable.len(),
                attempt,
                self.policy.max_attempts,
                delay
            );
            let mut records: Vec<RecordId> = retryable.iter().cloned().collect();
            records.sort();
            let _ = self.events.send(SyncEvent::RetryScheduled {
                operation_id: operation.id(),
                path: operation.path().to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                records,
            });

            tokio::time::sleep(delay).await;
            attempt += 1;
            current = self.handler.retain_records(&current, &retryable);
        }

        for report in &failures {
            warn!("{}", report);
            let _ = self.events.send(SyncEvent::RecordFailed(report.clone()));
        }
        info!(
            "{} {} on {} finished after {} attempt(s), {} failed",
            operation.kind(),
            operation.id(),
            operation.path(),
            attempt,
            failures.len()
        );
        let _ = self.events.send(SyncEvent::OperationCompleted {
            operation_id: operation.id(),
            kind: operation.kind(),
            path: operation.path().to_string(),
            attempts: attempt,
            failed: failures.len(),
        });

        self.journal_send(JournalCommand::Remove(seq));
        self.finish(operation, failures);
    }

    fn finish(&self, operation: SyncOperation<M::Model>, failures: Vec<FailureReport>) {
        let mut state = lock(&self.state);
        if !failures.is_empty() {
            state.failed_since_idle = true;
            let failed_ids: HashSet<RecordId> =
                failures.iter().filter_map(|r| r.record_id.clone()).collect();
            state.dead_letters.push(FailedOperation {
                operation: self.handler.retain_records(&operation, &failed_ids),
                failures,
            });
        }

        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            let next = if state.failed_since_idle {
                SyncStatus::Error
            } else {
                SyncStatus::Idle
            };
            state.failed_since_idle = false;
            info!("Queue drained, status {}", next);
            self.status.send_replace(next);
        }
    }

    fn journal_send(&self, command: JournalCommand<M::Model>) {
        if let Some(tx) = &self.journal {
            if tx.send(command).is_err() {
                warn!("Journal writer is gone; operation not persisted");
            }
        }
    }
}

/// Applies journal commands on a dedicated thread, in submission order.
fn spawn_journal_writer<M>(
    journal: Arc<dyn OperationJournal<M>>,
) -> SyncResult<mpsc::UnboundedSender<JournalCommand<M>>>
where
    M: Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<JournalCommand<M>>();
    std::thread::Builder::new()
        .name("tandem-journal".to_string())
        .spawn(move || {
            while let Some(command) = rx.blocking_recv() {
                let result = match command {
                    JournalCommand::Append(seq, operation) => journal.append(seq, &operation),
                    JournalCommand::Remove(seq) => journal.remove(seq),
                    JournalCommand::Flush(done) => {
                        let _ = done.send(());
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    warn!("Journal write failed: {}", e);
                }
            }
            debug!("Journal writer stopped");
        })
        .map_err(|e| SyncError::Runtime(format!("failed to start journal writer: {e}")))?;
    Ok(tx)
}
