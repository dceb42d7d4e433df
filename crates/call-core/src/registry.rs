//! Call list
//!
//! Owns the set of live calls of a phone and is the only place that switches
//! the primary designation between them. Switch requests are queued and
//! applied one at a time by whichever caller holds the arbitration lock:
//! the previous primary is demoted before the next one is promoted, so at
//! most one call is primary at any point. A listener that requests a switch
//! while one is being applied has its request applied right after.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::call::{Call, CallId};

/// A queued primary change
#[derive(Debug, Clone, PartialEq, Eq)]
enum Arbitration {
    Promote(CallId),
    Clear,
}

/// Registry of live calls
#[derive(Default)]
pub struct CallList {
    calls: DashMap<CallId, Arc<Call>>,
    /// Insertion order, used when listing
    order: Mutex<Vec<CallId>>,
    pending: Mutex<VecDeque<Arbitration>>,
    switching: Mutex<()>,
}

impl CallList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, call: Arc<Call>) {
        let id = call.id().clone();
        if self.calls.insert(id.clone(), call).is_none() {
            self.order.lock().push(id.clone());
        }
        tracing::debug!(call_id = %id, total = self.calls.len(), "Call added to list");
    }

    pub fn remove(&self, call_id: &CallId) -> Option<Arc<Call>> {
        let removed = self.calls.remove(call_id).map(|(_, call)| call);
        if removed.is_some() {
            self.order.lock().retain(|id| id != call_id);
            tracing::debug!(call_id = %call_id, "Call removed from list");
        }
        removed
    }

    pub fn get(&self, call_id: &CallId) -> Option<Arc<Call>> {
        self.calls.get(call_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Calls in the order they were added
    pub fn calls(&self) -> Vec<Arc<Call>> {
        self.order
            .lock()
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// The current primary call, if any
    pub fn primary(&self) -> Option<Arc<Call>> {
        self.calls().into_iter().find(|call| call.is_primary())
    }

    /// Make `call_id` the primary call.
    ///
    /// The previous primary is demoted with `pause` (held if established)
    /// before the target is promoted with `resume`. Returns `false` for an
    /// unknown call. When called from a notification listener during another
    /// switch, the request is applied once that switch has completed.
    pub fn switch_to(&self, call_id: &CallId) -> bool {
        if !self.calls.contains_key(call_id) {
            tracing::warn!(call_id = %call_id, "Cannot switch to unknown call");
            return false;
        }

        self.request(Arbitration::Promote(call_id.clone()));
        true
    }

    /// Demote the primary call without promoting another
    pub fn clear_primary(&self) {
        self.request(Arbitration::Clear);
    }

    /// Drop calls whose session has ended; returns how many were removed
    pub fn prune(&self) -> usize {
        let terminated: Vec<CallId> = self
            .calls
            .iter()
            .filter(|entry| entry.value().is_terminated())
            .map(|entry| entry.key().clone())
            .collect();

        terminated
            .iter()
            .filter(|id| self.remove(id).is_some())
            .count()
    }

    fn request(&self, change: Arbitration) {
        self.pending.lock().push_back(change);

        loop {
            // whoever holds the lock drains the queue, including this request
            let Some(guard) = self.switching.try_lock() else {
                return;
            };

            loop {
                let next = self.pending.lock().pop_front();
                match next {
                    Some(change) => self.apply(change),
                    None => break,
                }
            }

            drop(guard);
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    fn apply(&self, change: Arbitration) {
        match change {
            Arbitration::Promote(call_id) => {
                let Some(target) = self.get(&call_id) else {
                    tracing::debug!(call_id = %call_id, "Switch target left the list, skipped");
                    return;
                };

                for call in self.calls() {
                    if call.id() != &call_id && call.is_primary() {
                        call.clear_primary(true);
                    }
                }

                target.set_primary(true);
            }
            Arbitration::Clear => {
                for call in self.calls() {
                    call.clear_primary(true);
                }
            }
        }
    }
}

impl std::fmt::Debug for CallList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallList")
            .field("calls", &*self.order.lock())
            .finish()
    }
}
