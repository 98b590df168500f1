//! Time-batched streaming of a row-set.
//!
//! The column header is reported once, then rows are reported in batches:
//! rows accumulate until the flush interval has elapsed since the previous
//! flush, so a slow cursor still shows progress and a fast one does not flood
//! listeners with tiny batches.

use crate::config::PipelineConfig;
use crate::db::{ColumnInfo, Cursor, Row};
use crate::error::Result;
use crate::task::{Completion, TaskContext, Work};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Status events of a [`ResultStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamStatus {
    /// Column metadata. Always the first status.
    Columns(Arc<[ColumnInfo]>),
    /// The next batch of rows, in cursor order.
    Rows(Arc<[Row]>),
}

/// Reads a cursor to exhaustion, reporting rows as [`StreamStatus`] events.
///
/// Cancellation is checked before the column header and after every flush.
/// Cursor errors are always reported, even after cancellation, because rows
/// may already have been delivered.
pub struct ResultStream {
    cursor: Box<dyn Cursor>,
    flush_interval: Duration,
    flush_trailing_batch: bool,
}

impl ResultStream {
    /// Creates a stream over `cursor`, timed by `config`.
    pub fn new(cursor: Box<dyn Cursor>, config: &PipelineConfig) -> Self {
        Self {
            cursor,
            flush_interval: config.flush_interval(),
            flush_trailing_batch: config.flush_trailing_batch,
        }
    }

    async fn pump(&mut self, ctx: &TaskContext<StreamStatus, ()>) -> Result<()> {
        if ctx.is_cancelled() {
            return Ok(());
        }

        let columns = self.cursor.columns()?;
        ctx.report_status(StreamStatus::Columns(columns.into()));

        let mut batch: Vec<Row> = Vec::new();
        let mut delivered = 0usize;
        let mut last_flush = Instant::now();

        while self.cursor.advance().await? {
            batch.push(self.cursor.current_row()?);

            if last_flush.elapsed() >= self.flush_interval {
                delivered += batch.len();
                debug!(rows = batch.len(), delivered, "Flushing row batch");
                ctx.report_status(StreamStatus::Rows(std::mem::take(&mut batch).into()));
                last_flush = Instant::now();

                if ctx.is_cancelled() {
                    debug!(delivered, "Result stream cancelled");
                    return Ok(());
                }
            }
        }

        if !batch.is_empty() && self.flush_trailing_batch && !ctx.is_cancelled() {
            delivered += batch.len();
            ctx.report_status(StreamStatus::Rows(batch.into()));
        }
        debug!(delivered, "Result stream exhausted");
        Ok(())
    }
}

#[async_trait]
impl Work for ResultStream {
    type Status = StreamStatus;
    type Output = ();

    fn name(&self) -> &'static str {
        "result-stream"
    }

    async fn run(mut self, ctx: TaskContext<StreamStatus, ()>) -> Completion<()> {
        match self.pump(&ctx).await {
            Ok(()) => Completion::NoResult,
            Err(e) => {
                warn!(error = %e, "Result stream failed");
                Completion::Error(Arc::new(e))
            }
        }
    }
}
