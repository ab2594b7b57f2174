//! # Fair Queue
//!
//! A deduplicating, blocking queue that cycles items round-robin.
//!
//! Every item lives in the `known` set for as long as it is wanted. It is in the
//! backing list exactly when it is known and not checked out by `get`. Calling
//! `done` puts a still-known item at the back of the list, so continuously
//! re-queued items are serviced in turn without any of them being duplicated.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

struct State<T> {
    items: VecDeque<T>,
    known: HashSet<T>,
    processing: HashSet<T>,
    shutdown: bool,
}

pub struct FairQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> Default for FairQueue<T>
where
    T: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FairQueue<T>
where
    T: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                known: HashSet::new(),
                processing: HashSet::new(),
                shutdown: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // No invariant spans a panic point inside the critical sections
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an item unless it is already known
    ///
    /// Returns `true` if the item was new. After shutdown this is a no-op.
    pub fn add(&self, item: T) -> bool {
        let mut state = self.lock();
        if state.shutdown || state.known.contains(&item) {
            return false;
        }
        state.known.insert(item.clone());
        // A known item that is still checked out goes back on `done`
        if !state.processing.contains(&item) {
            state.items.push_back(item);
            drop(state);
            self.notify.notify_one();
        }
        true
    }

    /// Forget an item; a checked-out copy is not re-queued on `done`
    ///
    /// Returns `true` if the item was known.
    pub fn remove(&self, item: &T) -> bool {
        let mut state = self.lock();
        if !state.known.remove(item) {
            return false;
        }
        state.items.retain(|queued| queued != item);
        true
    }

    /// Wait for the next item
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutdown {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark a checked-out item as processed
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        if !state.processing.remove(item) {
            return;
        }
        if !state.shutdown && state.known.contains(item) {
            state.items.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.lock().known.contains(item)
    }

    /// Number of items waiting in the backing list
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every known item, queued or checked out
    pub fn known(&self) -> Vec<T> {
        self.lock().known.iter().cloned().collect()
    }

    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }
}
