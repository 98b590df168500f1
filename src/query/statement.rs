//! Statement execution and outcome selection.
//!
//! Some drivers return several results from one statement: declaring a
//! variable before a `SELECT` yields an update count for the declaration and
//! a row-set for the query. The execution walks that chain and picks one
//! outcome: the *first* row-set if there is any, otherwise the *last* update
//! count. The walk stops at the winning row-set because advancing further
//! would close it.

use crate::db::{Cursor, Statement};
use crate::error::{QueryTaskError, Result};
use crate::task::{Completion, TaskContext, Work};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// The winning outcome of one statement execution.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Rows affected, or `None` if the driver reported no count at all.
    RowCount(Option<u64>),
    /// A row-set, read through the contained cursor.
    RowSet(RowSetHandle),
}

/// Hands the cursor of a row-set outcome to exactly one consumer.
#[derive(Clone)]
pub struct RowSetHandle {
    cursor: Arc<Mutex<Option<Box<dyn Cursor>>>>,
}

impl RowSetHandle {
    fn new(cursor: Box<dyn Cursor>) -> Self {
        Self {
            cursor: Arc::new(Mutex::new(Some(cursor))),
        }
    }

    /// Takes the cursor. Returns `None` if it was already taken.
    pub fn take(&self) -> Option<Box<dyn Cursor>> {
        self.cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl fmt::Debug for RowSetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let taken = self
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none();
        f.debug_struct("RowSetHandle").field("taken", &taken).finish()
    }
}

/// Executes one statement and reports its winning [`Outcome`].
///
/// Driver errors are reported unless the task was cancelled first: an
/// interrupted statement usually fails, and that failure is not the user's
/// concern.
pub struct StatementExecution {
    statement: Box<dyn Statement>,
}

impl StatementExecution {
    /// Creates an execution of `statement`.
    pub fn new(statement: Box<dyn Statement>) -> Self {
        Self { statement }
    }

    /// Walks the outcome chain. `Ok(None)` means cancellation was observed.
    async fn walk(&mut self, ctx: &TaskContext<(), Outcome>) -> Result<Option<Outcome>> {
        let is_row_set = self.statement.execute().await?;

        if ctx.is_cancelled() {
            return Ok(None);
        }
        if is_row_set {
            return self.row_set().map(Some);
        }

        let mut update_count = self.statement.update_count();
        let mut last_count = None;

        while update_count.is_some() {
            if ctx.is_cancelled() {
                return Ok(None);
            }

            let is_row_set = self.statement.more_results().await?;
            last_count = update_count;
            update_count = self.statement.update_count();

            if is_row_set {
                debug!(skipped_count = ?last_count, "Row-set follows update count");
                return self.row_set().map(Some);
            }
        }

        Ok(Some(Outcome::RowCount(last_count)))
    }

    fn row_set(&mut self) -> Result<Outcome> {
        self.statement
            .take_row_set()
            .map(|cursor| Outcome::RowSet(RowSetHandle::new(cursor)))
            .ok_or_else(|| {
                QueryTaskError::internal("driver reported a row-set but returned no cursor")
            })
    }
}

#[async_trait]
impl Work for StatementExecution {
    type Status = ();
    type Output = Outcome;

    fn name(&self) -> &'static str {
        "statement"
    }

    async fn run(mut self, ctx: TaskContext<(), Outcome>) -> Completion<Outcome> {
        match self.walk(&ctx).await {
            Ok(Some(outcome)) => {
                debug!(?outcome, "Statement outcome selected");
                Completion::Result(outcome)
            }
            Ok(None) => {
                debug!("Statement execution cancelled");
                Completion::NoResult
            }
            Err(e) if ctx.is_cancelled() => {
                debug!(error = %e, "Suppressing statement error after cancellation");
                Completion::NoResult
            }
            Err(e) => {
                warn!(error = %e, "Statement execution failed");
                Completion::Error(Arc::new(e))
            }
        }
    }
}
