//! Cancellable background tasks with observers.
//!
//! A [`Task`] wraps one unit of [`Work`] and runs it on its own tokio task.
//! The work reports progress through its [`TaskContext`] and ends with a
//! [`Completion`], which the runner turns into the terminal events seen by
//! listeners: `result` + `finished`, `error` + `finished`, or `finished`
//! alone.
//!
//! Cancellation is cooperative: [`Task::cancel`] only sets a flag that the
//! work polls through [`TaskContext::is_cancelled`].

mod listener;

pub use listener::{ListenerId, TaskListener};

use crate::error::{QueryTaskError, Result, SharedError};
use async_trait::async_trait;
use futures::FutureExt;
use listener::ListenerList;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a unit of work ended.
#[derive(Debug)]
pub enum Completion<R> {
    /// The work produced a result.
    Result(R),
    /// The work failed.
    Error(SharedError),
    /// The work ended without a result, either because it was cancelled or
    /// because its output was already delivered as status events.
    NoResult,
}

/// A unit of work that can run inside a [`Task`].
#[async_trait]
pub trait Work: Send + Sized + 'static {
    /// Payload of status events.
    type Status: Clone + Send + Sync + 'static;

    /// Payload of the result event.
    type Output: Clone + Send + Sync + 'static;

    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Runs the work to completion.
    async fn run(self, ctx: TaskContext<Self::Status, Self::Output>) -> Completion<Self::Output>;
}

struct TaskState<S, R> {
    name: &'static str,
    cancel: CancellationToken,
    finished: AtomicBool,
    finished_notify: Notify,
    last_status: Mutex<Option<S>>,
    result: OnceLock<R>,
    error: OnceLock<SharedError>,
    listeners: ListenerList<S, R>,
}

impl<S: Clone, R: Clone> TaskState<S, R> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            cancel: CancellationToken::new(),
            finished: AtomicBool::new(false),
            finished_notify: Notify::new(),
            last_status: Mutex::new(None),
            result: OnceLock::new(),
            error: OnceLock::new(),
            listeners: ListenerList::new(),
        }
    }

    fn report_status(&self, status: S) {
        *self.last_status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status.clone());
        for (_, listener) in self.listeners.snapshot().iter() {
            listener.status(&status);
        }
    }

    fn report_result(&self, result: R) {
        if self.result.set(result.clone()).is_err() {
            warn!(task = self.name, "Ignoring second result");
            return;
        }
        for (_, listener) in self.listeners.snapshot().iter() {
            listener.result(&result);
        }
    }

    fn report_error(&self, error: SharedError) {
        if self.error.set(Arc::clone(&error)).is_err() {
            warn!(task = self.name, "Ignoring second error");
            return;
        }
        for (_, listener) in self.listeners.snapshot().iter() {
            listener.error(&error);
        }
    }

    fn report_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
        for (_, listener) in self.listeners.snapshot().iter() {
            listener.finished();
        }
        self.finished_notify.notify_waiters();
    }

    fn complete(&self, completion: Completion<R>) {
        match completion {
            Completion::Result(result) => self.report_result(result),
            Completion::Error(error) => self.report_error(error),
            Completion::NoResult => {}
        }
        self.report_finished();
        debug!(task = self.name, "Task finished");
    }
}

/// Handle given to running work for reporting and cancellation checks.
pub struct TaskContext<S, R> {
    state: Arc<TaskState<S, R>>,
}

impl<S: Clone, R: Clone> TaskContext<S, R> {
    /// Notifies listeners of intermediate progress or data.
    ///
    /// Payloads are shared with every listener; never mutate one after
    /// reporting it.
    pub fn report_status(&self, status: S) {
        self.state.report_status(status);
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancel.is_cancelled()
    }
}

/// A cancellable, observable unit of background work.
pub struct Task<W: Work> {
    state: Arc<TaskState<W::Status, W::Output>>,
    work: Mutex<Option<W>>,
}

impl<W: Work> Task<W> {
    /// Wraps `work` in a task. Nothing runs until [`Task::start`].
    pub fn new(work: W) -> Self {
        Self {
            state: Arc::new(TaskState::new(work.name())),
            work: Mutex::new(Some(work)),
        }
    }

    /// Starts the work on its own tokio task.
    ///
    /// Must be called from within a tokio runtime, and at most once. Work
    /// that is already cancelled when it is picked up finishes without
    /// running; work that panics is reported as an internal error.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| QueryTaskError::internal(format!("no async runtime: {e}")))?;
        let work = self
            .work
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| QueryTaskError::internal("task already started"))?;

        let state = Arc::clone(&self.state);
        runtime.spawn(async move {
            if state.cancel.is_cancelled() {
                debug!(task = state.name, "Task cancelled before it started");
                state.complete(Completion::NoResult);
                return;
            }

            debug!(task = state.name, "Task started");
            let ctx = TaskContext {
                state: Arc::clone(&state),
            };
            let completion = AssertUnwindSafe(work.run(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Completion::Error(Arc::new(QueryTaskError::internal(format!(
                        "{} task panicked",
                        state.name
                    ))))
                });
            state.complete(completion);
        });

        Ok(())
    }

    /// Requests cancellation. One-way and idempotent.
    pub fn cancel(&self) {
        if !self.state.cancel.is_cancelled() {
            debug!(task = self.state.name, "Cancellation requested");
        }
        self.state.cancel.cancel();
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    /// Returns true once the finished event has been emitted.
    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }

    /// Waits until the finished event has been emitted.
    pub async fn wait(&self) {
        loop {
            let notified = self.state.finished_notify.notified();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }

    /// The most recently reported status, if any.
    pub fn status(&self) -> Option<W::Status> {
        self.state
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The reported result, if any.
    pub fn result(&self) -> Option<W::Output> {
        self.state.result.get().cloned()
    }

    /// Returns true if a result was reported.
    pub fn has_result(&self) -> bool {
        self.state.result.get().is_some()
    }

    /// The reported error, if any.
    pub fn error(&self) -> Option<SharedError> {
        self.state.error.get().cloned()
    }

    /// Returns true if an error was reported.
    pub fn has_error(&self) -> bool {
        self.state.error.get().is_some()
    }

    /// Registers a listener for all subsequent events.
    pub fn add_listener(
        &self,
        listener: Arc<dyn TaskListener<W::Status, W::Output>>,
    ) -> ListenerId {
        self.state.listeners.add(listener)
    }

    /// Unregisters a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.state.listeners.remove(id)
    }
}
