//! Driver capabilities consumed by the query pipeline.
//!
//! The pipeline never talks to a database directly. It is handed a prepared
//! [`Statement`], walks its chain of outcomes, and reads a [`Cursor`] when one
//! of those outcomes is a row-set. Statement and cursor handles belong to the
//! driver and are only borrowed for the lifetime of a single execution.

mod mock;
mod sqlx_driver;
mod types;

pub use mock::{MockCanceller, MockConnection, MockCursor, MockOutcome, MockStatement};
pub use sqlx_driver::{SqlxConnection, SqlxCursor, SqlxStatement};
pub use types::{ColumnInfo, Row, Value};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// An open database connection able to prepare statements.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Prepares a statement for the given SQL text.
    async fn prepare(&self, sql: &str) -> Result<Box<dyn Statement>>;

    /// Closes the connection.
    async fn close(&self) -> Result<()>;
}

/// A prepared statement whose execution may yield several outcomes.
///
/// Drivers expose the outcomes as a chain: each one is either a row-set or
/// an update count, and the chain ends when neither is available.
#[async_trait]
pub trait Statement: Send {
    /// Executes the statement. Returns true if the first outcome is a row-set.
    async fn execute(&mut self) -> Result<bool>;

    /// Advances to the next outcome. Returns true if it is a row-set.
    ///
    /// Advancing closes any row-set produced by the previous outcome.
    async fn more_results(&mut self) -> Result<bool>;

    /// Update count of the current outcome, or `None` if the current outcome
    /// is a row-set or the chain is exhausted.
    fn update_count(&self) -> Option<u64>;

    /// Takes the cursor of the current outcome, if it is a row-set.
    fn take_row_set(&mut self) -> Option<Box<dyn Cursor>>;

    /// Returns a handle that can interrupt this statement from another task.
    fn canceller(&self) -> Arc<dyn StatementCanceller>;
}

/// Best-effort, driver-level interruption of a running statement.
pub trait StatementCanceller: Send + Sync {
    /// Requests that the statement stop.
    ///
    /// Drivers that cannot interrupt statements return
    /// [`QueryTaskError::CancelUnsupported`](crate::error::QueryTaskError::CancelUnsupported).
    fn cancel(&self) -> Result<()>;
}

/// A forward-only cursor over a row-set, positioned before the first row.
#[async_trait]
pub trait Cursor: Send {
    /// Column metadata for the row-set.
    fn columns(&self) -> Result<Vec<ColumnInfo>>;

    /// Moves to the next row. Returns false once the row-set is exhausted.
    async fn advance(&mut self) -> Result<bool>;

    /// Values of the row the cursor is positioned on.
    fn current_row(&self) -> Result<Row>;
}
