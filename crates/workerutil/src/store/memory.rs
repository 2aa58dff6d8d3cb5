//! In-memory implementation of Store for testing

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::store::*;

/// Predicate deciding whether a record may be claimed for a given extra argument
pub type DequeueFilter<R> = Arc<dyn Fn(&R, &serde_json::Value) -> bool + Send + Sync>;

/// Internal record state
struct RecordEntry<R> {
    record: R,
    state: RecordState,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    num_failures: u32,
    failure_message: Option<String>,
}

/// In-memory implementation of [`Store`]
///
/// Records are claimed in insertion order. Errored records go back into the
/// claimable pool until they have failed `max_num_retries` times, after which
/// they are moved to the terminal failed state.
///
/// # Example
///
/// ```
/// use workerutil::{InMemoryStore, Record, RecordId};
///
/// #[derive(Clone)]
/// struct Job(RecordId);
///
/// impl Record for Job {
///     fn record_id(&self) -> RecordId {
///         self.0
///     }
/// }
///
/// let store = InMemoryStore::new().with_max_num_retries(3);
/// store.push(Job(1));
/// assert_eq!(store.queued_count(), 1);
/// ```
pub struct InMemoryStore<R> {
    records: RwLock<Vec<RecordEntry<R>>>,
    max_num_retries: u32,
    filter: Option<DequeueFilter<R>>,
}

impl<R: Record + Clone> InMemoryStore<R> {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            max_num_retries: 0,
            filter: None,
        }
    }

    /// Allow errored records to be claimed again up to `retries` times
    pub fn with_max_num_retries(mut self, retries: u32) -> Self {
        self.max_num_retries = retries;
        self
    }

    /// Restrict which records a dequeue with an extra argument may claim
    pub fn with_dequeue_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&R, &serde_json::Value) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Enqueue a record
    pub fn push(&self, record: R) -> RecordId {
        let id = record.record_id();
        self.records.write().push(RecordEntry {
            record,
            state: RecordState::Queued,
            claimed_by: None,
            claimed_at: None,
            last_heartbeat_at: None,
            num_failures: 0,
            failure_message: None,
        });
        id
    }

    /// Return a processing record to the queue, as a reaper would for a stale lease
    pub fn requeue(&self, id: RecordId) -> bool {
        let mut records = self.records.write();
        match records
            .iter_mut()
            .find(|e| e.record.record_id() == id && e.state == RecordState::Processing)
        {
            Some(entry) => {
                entry.state = RecordState::Queued;
                entry.claimed_by = None;
                entry.claimed_at = None;
                true
            }
            None => false,
        }
    }

    /// Get the state of a record
    pub fn state(&self, id: RecordId) -> Option<RecordState> {
        self.with_entry(id, |e| e.state)
    }

    /// Get the last failure message recorded for a record
    pub fn failure_message(&self, id: RecordId) -> Option<String> {
        self.with_entry(id, |e| e.failure_message.clone()).flatten()
    }

    /// Get the worker hostname that last claimed a record
    pub fn claimed_by(&self, id: RecordId) -> Option<String> {
        self.with_entry(id, |e| e.claimed_by.clone()).flatten()
    }

    /// Get when a record was last claimed
    pub fn claimed_at(&self, id: RecordId) -> Option<DateTime<Utc>> {
        self.with_entry(id, |e| e.claimed_at).flatten()
    }

    /// Get the last heartbeat time of a record
    pub fn last_heartbeat_at(&self, id: RecordId) -> Option<DateTime<Utc>> {
        self.with_entry(id, |e| e.last_heartbeat_at).flatten()
    }

    /// Get how many times a record has errored or failed
    pub fn num_failures(&self, id: RecordId) -> u32 {
        self.with_entry(id, |e| e.num_failures).unwrap_or(0)
    }

    /// Get the number of records in a given state
    pub fn count(&self, state: RecordState) -> usize {
        self.records.read().iter().filter(|e| e.state == state).count()
    }

    /// Get the number of records waiting to be claimed
    pub fn queued_count(&self) -> usize {
        self.records
            .read()
            .iter()
            .filter(|e| self.is_claimable(e))
            .count()
    }

    /// Total number of records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.records.write().clear();
    }

    fn with_entry<T>(&self, id: RecordId, f: impl FnOnce(&RecordEntry<R>) -> T) -> Option<T> {
        self.records
            .read()
            .iter()
            .find(|e| e.record.record_id() == id)
            .map(f)
    }

    // Errored entries past their retry budget have already been moved to Failed.
    fn is_claimable(&self, entry: &RecordEntry<R>) -> bool {
        matches!(entry.state, RecordState::Queued | RecordState::Errored)
    }

    fn finish(
        &self,
        id: RecordId,
        state: RecordState,
        failure_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write();
        let Some(entry) = records
            .iter_mut()
            .find(|e| e.record.record_id() == id && e.state == RecordState::Processing)
        else {
            return Ok(false);
        };

        entry.claimed_by = None;
        entry.failure_message = failure_message.map(str::to_string);
        entry.state = state;
        if state != RecordState::Completed {
            entry.num_failures += 1;
        }
        if state == RecordState::Errored && entry.num_failures > self.max_num_retries {
            entry.state = RecordState::Failed;
        }
        Ok(true)
    }
}

impl<R: Record + Clone> Default for InMemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Record + Clone> Store<R> for InMemoryStore<R> {
    async fn dequeue(
        &self,
        worker_hostname: &str,
        extra: Option<serde_json::Value>,
    ) -> Result<Option<R>, StoreError> {
        let mut records = self.records.write();
        let filter = self.filter.as_ref();

        let position = records.iter().position(|entry| {
            self.is_claimable(entry)
                && match (filter, extra.as_ref()) {
                    (Some(filter), Some(extra)) => filter(&entry.record, extra),
                    _ => true,
                }
        });

        let Some(position) = position else {
            return Ok(None);
        };

        let now = Utc::now();
        let entry = &mut records[position];
        entry.state = RecordState::Processing;
        entry.claimed_by = Some(worker_hostname.to_string());
        entry.claimed_at = Some(now);
        entry.last_heartbeat_at = Some(now);

        Ok(Some(entry.record.clone()))
    }

    async fn mark_complete(&self, id: RecordId) -> Result<bool, StoreError> {
        self.finish(id, RecordState::Completed, None)
    }

    async fn mark_errored(&self, id: RecordId, failure_message: &str) -> Result<bool, StoreError> {
        self.finish(id, RecordState::Errored, Some(failure_message))
    }

    async fn mark_failed(&self, id: RecordId, failure_message: &str) -> Result<bool, StoreError> {
        self.finish(id, RecordState::Failed, Some(failure_message))
    }

    async fn heartbeat(&self, ids: &[RecordId]) -> Result<Vec<RecordId>, StoreError> {
        let now = Utc::now();
        let mut records = self.records.write();
        let mut owned = Vec::with_capacity(ids.len());

        for entry in records.iter_mut() {
            let id = entry.record.record_id();
            if entry.state == RecordState::Processing && ids.contains(&id) {
                entry.last_heartbeat_at = Some(now);
                owned.push(id);
            }
        }

        Ok(owned)
    }
}
