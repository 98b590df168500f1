//! Console rendering of query events.
//!
//! [`ConsolePrinter`] listens to a query task and writes what it sees: the
//! column header, each row batch with a running record count, the number of
//! updated rows, or the error. In JSON mode every event is one line.

use crate::db::{ColumnInfo, Row};
use crate::error::SharedError;
use crate::query::StreamStatus;
use crate::task::TaskListener;
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Output format of the console printer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Tab-separated rows with a record count after each batch.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid output format: {s}. Expected: text or json")),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JsonEvent<'a> {
    Columns { columns: &'a [ColumnInfo] },
    Rows { rows: &'a [Row], total: usize },
    Updated { rows: Option<u64> },
    Error { category: &'static str, message: String },
    Finished { cancelled: bool },
}

struct PrinterState<W> {
    out: W,
    records: usize,
}

/// Writes query events to `W`.
pub struct ConsolePrinter<W> {
    format: OutputFormat,
    state: Mutex<PrinterState<W>>,
    cancelled: AtomicBool,
}

impl<W: Write + Send> ConsolePrinter<W> {
    /// Creates a printer writing to `out` in the given format.
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            format,
            state: Mutex::new(PrinterState { out, records: 0 }),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Marks the query as cancelled; errors reported from now on are not shown.
    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Number of records printed so far.
    pub fn records(&self) -> usize {
        self.lock().records
    }

    /// Consumes the printer, returning the writer.
    pub fn into_inner(self) -> W {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PrinterState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn write_json(out: &mut W, event: &JsonEvent<'_>) {
        match serde_json::to_string(event) {
            Ok(line) => {
                let _ = writeln!(out, "{line}");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
        }
    }
}

impl<W: Write + Send> TaskListener<StreamStatus, Option<u64>> for ConsolePrinter<W> {
    fn status(&self, status: &StreamStatus) {
        let mut state = self.lock();
        let PrinterState { out, records } = &mut *state;

        // Console write failures (closed pipe) are not worth failing the query for.
        match (self.format, status) {
            (OutputFormat::Text, StreamStatus::Columns(columns)) => {
                let header: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                let _ = writeln!(out, "{}", header.join("\t"));
            }
            (OutputFormat::Text, StreamStatus::Rows(rows)) => {
                for row in rows.iter() {
                    let cells: Vec<String> = row.iter().map(|v| v.to_display_string()).collect();
                    let _ = writeln!(out, "{}", cells.join("\t"));
                }
                *records += rows.len();
                let _ = writeln!(out, "{records} records");
            }
            (OutputFormat::Json, StreamStatus::Columns(columns)) => {
                Self::write_json(out, &JsonEvent::Columns { columns });
            }
            (OutputFormat::Json, StreamStatus::Rows(rows)) => {
                *records += rows.len();
                let total = *records;
                Self::write_json(out, &JsonEvent::Rows { rows, total });
            }
        }
        let _ = out.flush();
    }

    fn result(&self, result: &Option<u64>) {
        let mut state = self.lock();
        match self.format {
            OutputFormat::Text => {
                let _ = writeln!(state.out, "{} records updated.", result.unwrap_or(0));
            }
            OutputFormat::Json => {
                Self::write_json(&mut state.out, &JsonEvent::Updated { rows: *result })
            }
        }
    }

    fn error(&self, error: &SharedError) {
        if self.is_cancelled() {
            tracing::debug!(error = %error, "Not showing error of cancelled query");
            return;
        }
        let mut state = self.lock();
        match self.format {
            OutputFormat::Text => {
                let _ = writeln!(state.out, "{error}");
            }
            OutputFormat::Json => Self::write_json(
                &mut state.out,
                &JsonEvent::Error {
                    category: error.category(),
                    message: error.to_string(),
                },
            ),
        }
    }

    fn finished(&self) {
        let cancelled = self.is_cancelled();
        let mut state = self.lock();
        match self.format {
            OutputFormat::Text if cancelled => {
                let _ = writeln!(state.out, "Query cancelled.");
            }
            OutputFormat::Text => {}
            OutputFormat::Json => {
                Self::write_json(&mut state.out, &JsonEvent::Finished { cancelled })
            }
        }
        let _ = state.out.flush();
    }
}
