//! Task observers and the copy-on-write list that holds them.

use crate::error::SharedError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Receives the events of a running task.
///
/// Events arrive on the task's own thread of control, in order: any number
/// of `status` calls, then at most one of `result` or `error`, then
/// `finished`. Every method defaults to a no-op so observers only implement
/// what they care about.
pub trait TaskListener<S, R>: Send + Sync {
    /// The task has finished. Always the last event.
    fn finished(&self) {}

    /// The task reported intermediate progress or data.
    fn status(&self, _status: &S) {}

    /// The task produced its result.
    fn result(&self, _result: &R) {}

    /// The task failed.
    fn error(&self, _error: &SharedError) {}
}

/// Identifies a registered listener so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Registration<S, R> = (ListenerId, Arc<dyn TaskListener<S, R>>);

/// Listener collection replaced wholesale on every change.
///
/// Notifiers iterate an immutable snapshot, so listeners may register or
/// unregister (even from inside a callback) without affecting a
/// notification already in progress.
pub(crate) struct ListenerList<S, R> {
    current: RwLock<Arc<[Registration<S, R>]>>,
}

impl<S, R> ListenerList<S, R> {
    pub(crate) fn new() -> Self {
        Self {
            current: RwLock::new(Arc::from(Vec::new())),
        }
    }

    pub(crate) fn add(&self, listener: Arc<dyn TaskListener<S, R>>) -> ListenerId {
        let id = ListenerId::next();
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<Registration<S, R>> = current.iter().cloned().collect();
        next.push((id, listener));
        *current = next.into();
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next: Vec<Registration<S, R>> = current
            .iter()
            .filter(|(registered, _)| *registered != id)
            .cloned()
            .collect();
        let removed = next.len() != current.len();
        *current = next.into();
        removed
    }

    pub(crate) fn snapshot(&self) -> Arc<[Registration<S, R>]> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.snapshot().len()
    }
}
