//! In-memory gateways for tests and embedding.
//!
//! Both stores keep a call log, count successful writes, and accept
//! injected failures and artificial latency so retry and timeout paths can
//! be driven deterministically.

use super::{FetchOutcome, LocalStore, LocalStoreError, RemoteError, RemoteStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tandem_types::{Record, RecordId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A remote gateway call, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCall {
    Create,
    Fetch,
    Delete,
    DeletePath,
}

/// A local gateway call, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalCall {
    Insert,
    Update,
    Delete,
    Get,
}

#[derive(Debug, Clone)]
struct Injected<E> {
    error: E,
    /// `None` fails forever.
    remaining: Option<u32>,
}

/// Failure table keyed by (call, id). Consuming an entry decrements its
/// remaining count and drops it at zero.
#[derive(Debug)]
struct FailureTable<C, E> {
    entries: Mutex<HashMap<(C, RecordId), Injected<E>>>,
}

impl<C: Copy + Eq + std::hash::Hash, E: Clone> FailureTable<C, E> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, call: C, id: RecordId, error: E, remaining: Option<u32>) {
        lock(&self.entries).insert((call, id), Injected { error, remaining });
    }

    fn clear(&self) {
        lock(&self.entries).clear();
    }

    fn take(&self, call: C, id: &RecordId) -> Option<E> {
        let mut entries = lock(&self.entries);
        let key = (call, id.clone());
        let entry = entries.get_mut(&key)?;
        let error = entry.error.clone();
        if let Some(n) = entry.remaining.as_mut() {
            *n = n.saturating_sub(1);
            if *n == 0 {
                entries.remove(&key);
            }
        }
        Some(error)
    }
}

/// In-memory [`RemoteStore`].
///
/// Models one collection: records are keyed by id only, so
/// `delete_path` clears the whole store whatever path it is given.
#[derive(Debug)]
pub struct MemoryRemoteStore<M> {
    records: Mutex<HashMap<RecordId, M>>,
    failures: FailureTable<RemoteCall, RemoteError>,
    calls: Mutex<Vec<(RemoteCall, RecordId)>>,
    writes: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

impl<M: Record + Clone + Send + Sync + 'static> Default for MemoryRemoteStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Record + Clone + Send + Sync + 'static> MemoryRemoteStore<M> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            failures: FailureTable::new(),
            calls: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
            latency: Mutex::new(None),
        }
    }

    /// Creates a store pre-populated with records. Seeding is not counted
    /// as a write.
    pub fn with_records(records: impl IntoIterator<Item = M>) -> Self {
        let store = Self::new();
        for record in records {
            store.seed(record);
        }
        store
    }

    /// Places a record without logging a call or counting a write.
    pub fn seed(&self, record: M) {
        lock(&self.records).insert(record.id(), record);
    }

    /// Returns the stored copy of a record.
    pub fn get(&self, id: &str) -> Option<M> {
        lock(&self.records).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    /// Makes every `call` for `id` fail with `error` until cleared.
    pub fn fail(&self, call: RemoteCall, id: impl Into<RecordId>, error: RemoteError) {
        self.failures.set(call, id.into(), error, None);
    }

    /// Makes the next `times` calls of `call` for `id` fail with `error`.
    pub fn fail_times(
        &self,
        call: RemoteCall,
        id: impl Into<RecordId>,
        error: RemoteError,
        times: u32,
    ) {
        self.failures.set(call, id.into(), error, Some(times));
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(RemoteCall, RecordId)> {
        lock(&self.calls).clone()
    }

    /// Number of calls of one kind.
    pub fn call_count(&self, call: RemoteCall) -> usize {
        lock(&self.calls).iter().filter(|(c, _)| *c == call).count()
    }

    /// Number of successful mutations (create, delete, delete_path).
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: RemoteCall, id: &RecordId) -> Result<(), RemoteError> {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        lock(&self.calls).push((call, id.clone()));
        match self.failures.take(call, id) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<M: Record + Clone + Send + Sync + 'static> RemoteStore for MemoryRemoteStore<M> {
    type Model = M;

    async fn create(&self, model: &M) -> Result<(), RemoteError> {
        let id = model.id();
        self.enter(RemoteCall::Create, &id).await?;
        lock(&self.records).insert(id, model.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(&self, id: &RecordId) -> Result<FetchOutcome<M>, RemoteError> {
        self.enter(RemoteCall::Fetch, id).await?;
        Ok(match lock(&self.records).get(id) {
            Some(model) => FetchOutcome::Found(model.clone()),
            None => FetchOutcome::NotFound,
        })
    }

    async fn delete(&self, id: &RecordId) -> Result<(), RemoteError> {
        self.enter(RemoteCall::Delete, id).await?;
        match lock(&self.records).remove(id) {
            Some(_) => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(RemoteError::NotFound),
        }
    }

    /// Clears every record; the store holds a single collection.
    async fn delete_path(&self, path: &str) -> Result<(), RemoteError> {
        self.enter(RemoteCall::DeletePath, &RecordId::from(path)).await?;
        lock(&self.records).clear();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory [`LocalStore`].
///
/// `insert` refuses ids that already exist and `update` refuses ids that do
/// not, mirroring a relational store with a primary key.
#[derive(Debug)]
pub struct MemoryLocalStore<E> {
    records: Mutex<HashMap<RecordId, E>>,
    failures: FailureTable<LocalCall, LocalStoreError>,
    calls: Mutex<Vec<(LocalCall, RecordId)>>,
    writes: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

impl<E: Record + Clone + Send + Sync + 'static> Default for MemoryLocalStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Record + Clone + Send + Sync + 'static> MemoryLocalStore<E> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            failures: FailureTable::new(),
            calls: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
            latency: Mutex::new(None),
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = E>) -> Self {
        let store = Self::new();
        for record in records {
            store.seed(record);
        }
        store
    }

    /// Places a record without logging a call or counting a write.
    pub fn seed(&self, record: E) {
        lock(&self.records).insert(record.id(), record);
    }

    pub fn get_record(&self, id: &str) -> Option<E> {
        lock(&self.records).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    pub fn fail(&self, call: LocalCall, id: impl Into<RecordId>, error: LocalStoreError) {
        self.failures.set(call, id.into(), error, None);
    }

    pub fn fail_times(
        &self,
        call: LocalCall,
        id: impl Into<RecordId>,
        error: LocalStoreError,
        times: u32,
    ) {
        self.failures.set(call, id.into(), error, Some(times));
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    pub fn calls(&self) -> Vec<(LocalCall, RecordId)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, call: LocalCall) -> usize {
        lock(&self.calls).iter().filter(|(c, _)| *c == call).count()
    }

    /// Number of successful mutations (insert, update, delete).
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: LocalCall, id: &RecordId) -> Result<(), LocalStoreError> {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        lock(&self.calls).push((call, id.clone()));
        match self.failures.take(call, id) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<E: Record + Clone + Send + Sync + 'static> LocalStore for MemoryLocalStore<E> {
    type Entity = E;

    async fn insert(&self, entity: &E) -> Result<(), LocalStoreError> {
        let id = entity.id();
        self.enter(LocalCall::Insert, &id).await?;
        let mut records = lock(&self.records);
        if records.contains_key(&id) {
            return Err(LocalStoreError::new(format!("duplicate id {id}")));
        }
        records.insert(id, entity.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, entity: &E) -> Result<(), LocalStoreError> {
        let id = entity.id();
        self.enter(LocalCall::Update, &id).await?;
        let mut records = lock(&self.records);
        match records.get_mut(&id) {
            Some(slot) => {
                *slot = entity.clone();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(LocalStoreError::new(format!("no record with id {id}"))),
        }
    }

    async fn delete(&self, entity: &E) -> Result<(), LocalStoreError> {
        let id = entity.id();
        self.enter(LocalCall::Delete, &id).await?;
        if lock(&self.records).remove(&id).is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<E>, LocalStoreError> {
        self.enter(LocalCall::Get, id).await?;
        Ok(lock(&self.records).get(id).cloned())
    }
}
