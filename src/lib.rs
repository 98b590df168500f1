//! db-querytask - Cancellable, streaming SQL query tasks.
//!
//! A query runs as a [`task::Task`] that executes one statement, picks its
//! winning outcome (first row-set, else last update count) and streams
//! row-sets to listeners in time-bounded batches. This library exposes the
//! core modules for use by the binary and integration tests.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod output;
pub mod query;
pub mod task;
