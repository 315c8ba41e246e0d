//! Instance tracker: registry of executing instances and their cancel tokens.
//!
//! At most one entry exists per instance id. The dedup check and the insert
//! happen under the same lock, so concurrent run requests for one id yield
//! exactly one execution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Entry {
    token: CancellationToken,
    generation: u64,
}

/// Handle to one registered execution.
///
/// The generation distinguishes this execution from a later one that reuses
/// the same instance id after a stop.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pub instance_id: i64,
    pub generation: u64,
    pub token: CancellationToken,
}

pub struct InstanceTracker {
    root: CancellationToken,
    entries: Mutex<HashMap<i64, Entry>>,
    next_generation: AtomicU64,
}

impl InstanceTracker {
    /// Execution tokens are children of `root`, so cancelling it reaches
    /// every running handler.
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh execution for `instance_id`.
    ///
    /// Returns `None` when the instance is already tracked.
    pub fn try_start(&self, instance_id: i64) -> Option<ExecutionHandle> {
        let mut entries = self.lock();
        if entries.contains_key(&instance_id) {
            return None;
        }

        let token = self.root.child_token();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            instance_id,
            Entry {
                token: token.clone(),
                generation,
            },
        );
        debug!(instance_id, generation, "Instance tracked");

        Some(ExecutionHandle {
            instance_id,
            generation,
            token,
        })
    }

    pub fn get(&self, instance_id: i64) -> Option<ExecutionHandle> {
        self.lock().get(&instance_id).map(|e| ExecutionHandle {
            instance_id,
            generation: e.generation,
            token: e.token.clone(),
        })
    }

    /// Cancel and remove the entry. Returns false when nothing was tracked.
    pub fn stop(&self, instance_id: i64) -> bool {
        let removed = self.lock().remove(&instance_id);
        match removed {
            Some(entry) => {
                entry.token.cancel();
                debug!(instance_id, "Instance stopped");
                true
            }
            None => false,
        }
    }

    /// Whether `generation` still owns the entry for `instance_id`.
    pub fn owns(&self, instance_id: i64, generation: u64) -> bool {
        self.lock()
            .get(&instance_id)
            .is_some_and(|e| e.generation == generation)
    }

    /// Remove the entry if it still belongs to `generation`.
    pub fn release(&self, instance_id: i64, generation: u64) -> bool {
        let mut entries = self.lock();
        if entries
            .get(&instance_id)
            .is_some_and(|e| e.generation == generation)
        {
            entries.remove(&instance_id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
