//! The query pipeline behind a single task.
//!
//! A [`QueryOrchestrator`] runs a [`StatementExecution`] and, when the winning
//! outcome is a row-set, a [`ResultStream`] over it. Listeners of the query
//! task see one event sequence: column and row statuses from the stream, a
//! row count result, or an error, always followed by `finished`.
//!
//! Cancellation works on two levels. The orchestrator polls its own flag and
//! cooperatively cancels the running child; while the statement is still
//! executing it also asks the driver to interrupt it, since a long-running
//! statement never gets to check a flag.

use super::statement::{Outcome, StatementExecution};
use super::stream::{ResultStream, StreamStatus};
use crate::config::PipelineConfig;
use crate::db::{Connection, Statement, StatementCanceller};
use crate::error::{QueryTaskError, Result, SharedError};
use crate::task::{Completion, Task, TaskContext, TaskListener, Work};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A running (or runnable) query.
pub type QueryTask = Task<QueryOrchestrator>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryPhase {
    Init,
    RunningStatement,
    RunningStream,
    DoneResult,
    DoneError,
    Finished,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::RunningStatement => "running-statement",
            Self::RunningStream => "running-stream",
            Self::DoneResult => "done-result",
            Self::DoneError => "done-error",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

struct PhaseTracker(QueryPhase);

impl PhaseTracker {
    fn enter(&mut self, next: QueryPhase) {
        debug!(from = %self.0, to = %next, "Query phase change");
        self.0 = next;
    }
}

/// Runs one statement and streams its row-set, if any.
pub struct QueryOrchestrator {
    statement: Box<dyn Statement>,
    config: PipelineConfig,
}

impl QueryOrchestrator {
    /// Creates an orchestrator for an already prepared statement.
    pub fn new(statement: Box<dyn Statement>, config: PipelineConfig) -> Self {
        Self { statement, config }
    }

    /// Wraps a prepared statement in a query task, ready to start.
    pub fn task(statement: Box<dyn Statement>, config: PipelineConfig) -> QueryTask {
        Task::new(Self::new(statement, config))
    }

    /// Prepares `sql` on `connection` and wraps it in a query task.
    ///
    /// Prepare errors are returned here rather than reported as task events.
    pub async fn prepare(
        connection: &dyn Connection,
        sql: &str,
        config: PipelineConfig,
    ) -> Result<QueryTask> {
        let statement = connection.prepare(sql).await?;
        Ok(Self::task(statement, config))
    }

    async fn stream(
        ctx: &TaskContext<StreamStatus, Option<u64>>,
        phase: &mut PhaseTracker,
        stream: ResultStream,
        poll_interval: Duration,
    ) -> Completion<Option<u64>> {
        let child = match Child::start(stream) {
            Ok(child) => child,
            Err(e) => {
                phase.enter(QueryPhase::DoneError);
                return Completion::Error(Arc::new(e));
            }
        };
        phase.enter(QueryPhase::RunningStream);

        let end = child
            .supervise(ctx, poll_interval, || {}, |status| ctx.report_status(status))
            .await;

        match end.error {
            Some(error) => {
                phase.enter(QueryPhase::DoneError);
                Completion::Error(error)
            }
            None => Completion::NoResult,
        }
    }
}

#[async_trait]
impl Work for QueryOrchestrator {
    type Status = StreamStatus;
    type Output = Option<u64>;

    fn name(&self) -> &'static str {
        "query"
    }

    async fn run(self, ctx: TaskContext<StreamStatus, Option<u64>>) -> Completion<Option<u64>> {
        let Self { statement, config } = self;
        let poll_interval = config.poll_interval();
        let mut phase = PhaseTracker(QueryPhase::Init);
        let mut interrupter = Interrupter::new(statement.canceller());

        let execution = match Child::start(StatementExecution::new(statement)) {
            Ok(child) => child,
            Err(e) => return Completion::Error(Arc::new(e)),
        };
        phase.enter(QueryPhase::RunningStatement);

        let end = execution
            .supervise(&ctx, poll_interval, || interrupter.interrupt(), |()| {})
            .await;

        let completion = if ctx.is_cancelled() {
            if end.result.is_some() {
                debug!("Discarding statement outcome of cancelled query");
            }
            Completion::NoResult
        } else if let Some(error) = end.error {
            phase.enter(QueryPhase::DoneError);
            Completion::Error(error)
        } else {
            match end.result {
                Some(Outcome::RowCount(count)) => {
                    info!(?count, "Query updated rows");
                    phase.enter(QueryPhase::DoneResult);
                    Completion::Result(count)
                }
                Some(Outcome::RowSet(handle)) => match handle.take() {
                    Some(cursor) => {
                        let stream = ResultStream::new(cursor, &config);
                        Self::stream(&ctx, &mut phase, stream, poll_interval).await
                    }
                    None => Completion::Error(Arc::new(QueryTaskError::internal(
                        "row-set cursor was already taken",
                    ))),
                },
                None => Completion::NoResult,
            }
        };

        phase.enter(QueryPhase::Finished);
        completion
    }
}

/// Best-effort driver-level interrupt of the executing statement.
struct Interrupter {
    canceller: Arc<dyn StatementCanceller>,
    done: bool,
}

impl Interrupter {
    fn new(canceller: Arc<dyn StatementCanceller>) -> Self {
        Self {
            canceller,
            done: false,
        }
    }

    /// Asks the driver to interrupt. Gives up for good once the driver has
    /// accepted or reported that it cannot cancel; other failures are retried
    /// on the next call.
    fn interrupt(&mut self) {
        if self.done {
            return;
        }
        match self.canceller.cancel() {
            Ok(()) => {
                debug!("Driver interrupted statement");
                self.done = true;
            }
            Err(e) if e.is_cancel_unsupported() => {
                debug!(error = %e, "Driver cannot interrupt statement, waiting for it to finish");
                self.done = true;
            }
            Err(e) => warn!(error = %e, "Driver interrupt failed"),
        }
    }
}

enum ChildEvent<S, R> {
    Status(S),
    Result(R),
    Error(SharedError),
    Finished,
}

/// Listener that moves a child's events onto the supervising task.
struct Forward<S, R> {
    events: mpsc::UnboundedSender<ChildEvent<S, R>>,
}

impl<S, R> Forward<S, R> {
    fn send(&self, event: ChildEvent<S, R>) {
        // The receiver outlives the child unless the supervisor was dropped.
        let _ = self.events.send(event);
    }
}

impl<S: Clone + Send, R: Clone + Send> TaskListener<S, R> for Forward<S, R> {
    fn finished(&self) {
        self.send(ChildEvent::Finished);
    }

    fn status(&self, status: &S) {
        self.send(ChildEvent::Status(status.clone()));
    }

    fn result(&self, result: &R) {
        self.send(ChildEvent::Result(result.clone()));
    }

    fn error(&self, error: &SharedError) {
        self.send(ChildEvent::Error(Arc::clone(error)));
    }
}

struct ChildEnd<R> {
    result: Option<R>,
    error: Option<SharedError>,
}

/// A started child task and the channel carrying its events.
struct Child<W: Work> {
    task: Task<W>,
    events: mpsc::UnboundedReceiver<ChildEvent<W::Status, W::Output>>,
}

impl<W: Work> Child<W> {
    fn start(work: W) -> Result<Self> {
        let task = Task::new(work);
        let (tx, events) = mpsc::unbounded_channel();
        task.add_listener(Arc::new(Forward { events: tx }));
        task.start()?;
        Ok(Self { task, events })
    }

    /// Waits for the child's finished event.
    ///
    /// Statuses are handed to `on_status` as they arrive. The supervisor's
    /// own cancellation is checked at least once per `poll_interval`; once
    /// seen, the child is cancelled and `on_cancel` runs on every later check.
    async fn supervise<S, R>(
        mut self,
        ctx: &TaskContext<S, R>,
        poll_interval: Duration,
        mut on_cancel: impl FnMut() + Send,
        mut on_status: impl FnMut(W::Status) + Send,
    ) -> ChildEnd<W::Output>
    where
        S: Clone + Send + Sync,
        R: Clone + Send + Sync,
    {
        let mut end = ChildEnd {
            result: None,
            error: None,
        };

        loop {
            match timeout(poll_interval, self.events.recv()).await {
                Ok(Some(ChildEvent::Status(status))) => on_status(status),
                Ok(Some(ChildEvent::Result(result))) => end.result = Some(result),
                Ok(Some(ChildEvent::Error(error))) => end.error = Some(error),
                Ok(Some(ChildEvent::Finished)) | Ok(None) => return end,
                Err(_) => {}
            }

            if ctx.is_cancelled() {
                self.task.cancel();
                on_cancel();
            }
        }
    }
}
