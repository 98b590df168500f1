//! sqlx-backed driver.
//!
//! Statements run through `sqlx::raw_sql(..).fetch_many(..)`, which yields an
//! interleaved stream of rows and per-statement query results. A pump task
//! feeds that stream into a bounded channel and the statement/cursor pair
//! reads the channel back as an outcome chain: a run of rows is a row-set,
//! and a query result that is not closing such a run is an update count.
//!
//! A `SELECT` returning no rows only produces a query result, so it shows up
//! as an update count of zero.

use super::{ColumnInfo, Connection, Cursor, Row, Statement, StatementCanceller, Value};
use crate::error::{QueryTaskError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::AnyPool;
use sqlx::{Column as SqlxColumn, Either, Row as SqlxRow, TypeInfo, ValueRef};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

/// Items buffered between the pump task and the reader.
const CHANNEL_CAPACITY: usize = 256;

type StreamItem = std::result::Result<Either<u64, AnyRow>, sqlx::Error>;

/// Connection to any database supported by the installed sqlx drivers.
pub struct SqlxConnection {
    pool: AnyPool,
}

impl SqlxConnection {
    /// Connects to the database at `url` (`postgres://…` or `sqlite:…`).
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|e| QueryTaskError::connection(e.to_string()))?;

        debug!("Successfully connected to database");
        Ok(Self { pool })
    }
}

#[async_trait]
impl Connection for SqlxConnection {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn Statement>> {
        if sql.trim().is_empty() {
            return Err(QueryTaskError::statement("empty statement"));
        }
        Ok(Box::new(SqlxStatement::new(self.pool.clone(), sql)))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Aborts the pump task of a running statement.
#[derive(Default)]
struct PumpCanceller {
    interrupted: AtomicBool,
    pump: Mutex<Option<AbortHandle>>,
}

impl PumpCanceller {
    fn attach(&self, pump: AbortHandle) {
        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

impl StatementCanceller for PumpCanceller {
    fn cancel(&self) -> Result<()> {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            pump.abort();
        }
        Ok(())
    }
}

/// A statement executed through sqlx.
pub struct SqlxStatement {
    pool: AnyPool,
    sql: String,
    items: Option<mpsc::Receiver<StreamItem>>,
    update_count: Option<u64>,
    row_set: Option<SqlxCursor>,
    canceller: Arc<PumpCanceller>,
}

impl SqlxStatement {
    fn new(pool: AnyPool, sql: &str) -> Self {
        Self {
            pool,
            sql: sql.to_string(),
            items: None,
            update_count: None,
            row_set: None,
            canceller: Arc::new(PumpCanceller::default()),
        }
    }

    async fn next_outcome(&mut self) -> Result<bool> {
        self.update_count = None;
        self.row_set = None;

        let Some(items) = self.items.as_mut() else {
            return Ok(false);
        };

        match items.recv().await {
            Some(Ok(Either::Left(rows_affected))) => {
                self.update_count = Some(rows_affected);
                Ok(false)
            }
            Some(Ok(Either::Right(first_row))) => {
                if let Some(items) = self.items.take() {
                    self.row_set = Some(SqlxCursor::new(
                        first_row,
                        items,
                        Arc::clone(&self.canceller),
                    ));
                }
                Ok(true)
            }
            Some(Err(e)) => Err(QueryTaskError::statement(e.to_string())),
            None if self.canceller.is_interrupted() => {
                Err(QueryTaskError::statement("statement cancelled"))
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Statement for SqlxStatement {
    async fn execute(&mut self) -> Result<bool> {
        if self.items.is_some() {
            return Err(QueryTaskError::statement("statement already executed"));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let pool = self.pool.clone();
        let sql = self.sql.clone();

        let pump = tokio::spawn(async move {
            let mut stream = sqlx::raw_sql(&sql).fetch_many(&pool);
            while let Some(item) = stream.next().await {
                let item = item.map(|either| either.map_left(|done| done.rows_affected()));
                if tx.send(item).await.is_err() {
                    // Reader is gone; dropping the stream ends the query.
                    break;
                }
            }
        });

        self.canceller.attach(pump.abort_handle());
        self.items = Some(rx);
        self.next_outcome().await
    }

    async fn more_results(&mut self) -> Result<bool> {
        self.next_outcome().await
    }

    fn update_count(&self) -> Option<u64> {
        self.update_count
    }

    fn take_row_set(&mut self) -> Option<Box<dyn Cursor>> {
        self.row_set
            .take()
            .map(|cursor| Box::new(cursor) as Box<dyn Cursor>)
    }

    fn canceller(&self) -> Arc<dyn StatementCanceller> {
        self.canceller.clone()
    }
}

/// Cursor over one run of rows from a sqlx statement.
pub struct SqlxCursor {
    columns: Vec<ColumnInfo>,
    pending: Option<AnyRow>,
    current: Option<AnyRow>,
    items: mpsc::Receiver<StreamItem>,
    canceller: Arc<PumpCanceller>,
    exhausted: bool,
}

impl SqlxCursor {
    fn new(
        first_row: AnyRow,
        items: mpsc::Receiver<StreamItem>,
        canceller: Arc<PumpCanceller>,
    ) -> Self {
        let columns = first_row
            .columns()
            .iter()
            .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
            .collect();

        Self {
            columns,
            pending: Some(first_row),
            current: None,
            items,
            canceller,
            exhausted: false,
        }
    }
}

#[async_trait]
impl Cursor for SqlxCursor {
    fn columns(&self) -> Result<Vec<ColumnInfo>> {
        Ok(self.columns.clone())
    }

    async fn advance(&mut self) -> Result<bool> {
        self.current = None;
        if self.exhausted {
            return Ok(false);
        }

        if let Some(row) = self.pending.take() {
            self.current = Some(row);
            return Ok(true);
        }

        match self.items.recv().await {
            Some(Ok(Either::Right(row))) => {
                self.current = Some(row);
                Ok(true)
            }
            // The query result closing this run of rows.
            Some(Ok(Either::Left(_))) => {
                self.exhausted = true;
                Ok(false)
            }
            Some(Err(e)) => Err(QueryTaskError::cursor(e.to_string())),
            None if self.canceller.is_interrupted() => {
                Err(QueryTaskError::cursor("statement cancelled"))
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    fn current_row(&self) -> Result<Row> {
        self.current
            .as_ref()
            .map(convert_row)
            .ok_or_else(|| QueryTaskError::cursor("cursor is not positioned on a row"))
    }
}

/// Converts an AnyRow to our Row type.
fn convert_row(row: &AnyRow) -> Row {
    (0..row.columns().len())
        .map(|index| convert_value(row, index))
        .collect()
}

/// Converts a single column value, using the runtime type of the value.
fn convert_value(row: &AnyRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_uppercase(),
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "BOOLEAN" => row
            .try_get_unchecked::<bool, _>(index)
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "SMALLINT" => row
            .try_get_unchecked::<i16, _>(index)
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INTEGER" => row
            .try_get_unchecked::<i32, _>(index)
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "BIGINT" => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "REAL" => row
            .try_get_unchecked::<f32, _>(index)
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "DOUBLE" => row
            .try_get_unchecked::<f64, _>(index)
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        // Text, and anything else the driver can render as text
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
