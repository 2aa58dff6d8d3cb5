//! In-flight record tracking

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::store::RecordId;

/// Records currently being handled by one worker
///
/// Every read and write goes through a single mutex; the dequeue loop, the
/// heartbeat loop, and handler tasks all touch it concurrently.
#[derive(Default)]
pub(crate) struct RunningSet {
    records: Mutex<HashMap<RecordId, CancellationToken>>,
}

impl RunningSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a record; returns false if it is already in flight
    pub fn add(&self, id: RecordId, cancellation: CancellationToken) -> bool {
        let mut records = self.records.lock();
        if records.contains_key(&id) {
            return false;
        }
        records.insert(id, cancellation);
        true
    }

    pub fn remove(&self, id: RecordId) -> bool {
        self.records.lock().remove(&id).is_some()
    }

    /// Sorted snapshot of in-flight ids
    pub fn ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.records.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Signal the handler of a record to stop; returns false if it is not in flight
    pub fn cancel(&self, id: RecordId) -> bool {
        match self.records.lock().get(&id) {
            Some(cancellation) => {
                cancellation.cancel();
                true
            }
            None => false,
        }
    }
}
