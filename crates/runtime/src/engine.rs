//! DuckDB execution.
//!
//! One process-wide connection owns the database file; each query clones it
//! (clones share the underlying database and can read concurrently) and runs
//! on the blocking thread pool so the async runtime is never stalled by a
//! scan. Every call is wrapped in a wall-clock timeout; on expiry the
//! blocking task is abandoned and the caller gets a transient timeout error.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::Connection;
use granary_error::{ErrorCode, ErrorContext, GranaryError};
use granary_sql::sanitize::validate_identifier;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::{debug, warn};

use crate::rows::{ResultSet, Value};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Days between the julian-day epoch and the unix epoch.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

/// Abstract engine surface, so sessions can be tested without DuckDB.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Run a SELECT and materialize all rows.
    async fn fetch(&self, sql: &str) -> Result<ResultSet, GranaryError>;

    /// Run one or more statements that return no rows (DDL, COPY).
    async fn execute_batch(&self, sql: &str) -> Result<(), GranaryError>;

    /// Column names of a table, in table order.
    async fn table_columns(&self, table: &str) -> Result<Vec<String>, GranaryError>;
}

/// DuckDB-backed engine.
pub struct DuckDbEngine {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl DuckDbEngine {
    /// Open (or create) a database file.
    pub fn open(path: &Path, timeout: Duration) -> Result<Self, GranaryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    GranaryError::new(
                        ErrorCode::EngineConnect,
                        format!("cannot create {}: {e}", parent.display()),
                    )
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            GranaryError::new(
                ErrorCode::EngineConnect,
                format!("cannot open database {}: {e}", path.display()),
            )
            .with_hint("Check the path and that no other writer holds the file")
        })?;
        debug!(path = %path.display(), "opened database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout,
        })
    }

    /// In-memory database, mainly for tests.
    pub fn open_in_memory(timeout: Duration) -> Result<Self, GranaryError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            GranaryError::new(
                ErrorCode::EngineConnect,
                format!("cannot open in-memory database: {e}"),
            )
        })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout,
        })
    }

    fn clone_connection(&self) -> Result<Connection, GranaryError> {
        let guard = self.conn.lock().map_err(|_| {
            GranaryError::new(ErrorCode::Internal, "engine connection mutex poisoned")
        })?;
        guard.try_clone().map_err(|e| {
            GranaryError::new(
                ErrorCode::EngineConnect,
                format!("cannot clone engine connection: {e}"),
            )
        })
    }

    async fn run_blocking<T, F>(&self, sql: &str, op: F) -> Result<T, GranaryError>
    where
        T: Send + 'static,
        F: FnOnce(Connection) -> Result<T, duckdb::Error> + Send + 'static,
    {
        let conn = self.clone_connection()?;
        let sql_owned = sql.to_string();
        let task = tokio::task::spawn_blocking(move || op(conn));

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                // The blocking task keeps running to completion but nobody
                // will observe its result.
                warn!(timeout = ?self.timeout, "query timed out, abandoning engine call");
                Err(GranaryError::new(
                    ErrorCode::ExecutionTimeout,
                    format!("query exceeded the {:?} budget", self.timeout),
                )
                .with_context(execution_context(&sql_owned, "timeout"))
                .with_hint("Narrow the query or raise limits.query_timeout_secs"))
            }
            Ok(Err(join_err)) => Err(GranaryError::new(
                ErrorCode::Internal,
                format!("engine worker failed: {join_err}"),
            )),
            Ok(Ok(result)) => result.map_err(|e| classify_engine_error(&e, &sql_owned)),
        }
    }
}

#[async_trait]
impl QueryEngine for DuckDbEngine {
    async fn fetch(&self, sql: &str) -> Result<ResultSet, GranaryError> {
        let sql_owned = sql.to_string();
        self.run_blocking(sql, move |conn| {
            let mut stmt = conn.prepare(&sql_owned)?;
            let mut rows = stmt.query([])?;
            let mut columns: Option<Vec<String>> = None;
            let mut data: Vec<Vec<Value>> = Vec::new();
            while let Some(row) = rows.next()? {
                let stmt_ref: &duckdb::Statement<'_> = row.as_ref();
                if columns.is_none() {
                    columns = Some(
                        stmt_ref
                            .column_names()
                            .into_iter()
                            .map(|c| c.to_string())
                            .collect(),
                    );
                }
                let width = stmt_ref.column_count();
                let mut out = Vec::with_capacity(width);
                for i in 0..width {
                    out.push(value_from_ref(row.get_ref(i)?));
                }
                data.push(out);
            }
            drop(rows);
            let columns = columns.unwrap_or_else(|| {
                stmt.column_names().into_iter().map(|c| c.to_string()).collect()
            });
            Ok(ResultSet {
                columns,
                rows: data,
            })
        })
        .await
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), GranaryError> {
        let sql_owned = sql.to_string();
        self.run_blocking(sql, move |conn| conn.execute_batch(&sql_owned))
            .await
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>, GranaryError> {
        validate_identifier(table).map_err(|e| e.to_granary_error())?;
        let pragma = format!("PRAGMA table_info(\"{table}\")");
        let table_owned = table.to_string();
        let result = self
            .run_blocking(&pragma, {
                let pragma = pragma.clone();
                move |conn| {
                    let mut stmt = conn.prepare(&pragma)?;
                    let mut rows = stmt.query([])?;
                    let mut names = Vec::new();
                    while let Some(row) = rows.next()? {
                        names.push(row.get::<_, String>(1)?);
                    }
                    Ok(names)
                }
            })
            .await;

        match result {
            Err(e) if e.code == ErrorCode::EngineRejected => Err(GranaryError::new(
                ErrorCode::UnknownEntity,
                format!("table '{table_owned}' does not exist"),
            )
            .with_hint("Run the build step to create the dataset and rollups")),
            other => other,
        }
    }
}

fn execution_context(sql: &str, source: &str) -> ErrorContext {
    let mut sql = sql.to_string();
    if sql.len() > 500 {
        let mut end = 500;
        while !sql.is_char_boundary(end) {
            end -= 1;
        }
        sql.truncate(end);
    }
    ErrorContext::Execution {
        sql,
        source: source.to_string(),
        fingerprint: String::new(),
    }
}

/// Map a DuckDB failure onto the error taxonomy. Resource pressure is
/// transient; everything the engine rejects outright is fatal for this
/// query and must surface, never silently fall back.
fn classify_engine_error(e: &duckdb::Error, sql: &str) -> GranaryError {
    let detail = e.to_string();
    let code = if detail.contains("Out of Memory") || detail.contains("IO Error") {
        ErrorCode::ResourceExhausted
    } else {
        ErrorCode::EngineRejected
    };
    GranaryError::new(code, format!("engine error: {detail}"))
        .with_context(execution_context(sql, &detail))
}

/// Convert one DuckDB cell to a result value. Dates and timestamps are
/// rendered as their canonical text so results match CSV ground truth.
fn value_from_ref(cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::Int(i64::from(i)),
        ValueRef::SmallInt(i) => Value::Int(i64::from(i)),
        ValueRef::Int(i) => Value::Int(i64::from(i)),
        ValueRef::BigInt(i) => Value::Int(i),
        ValueRef::HugeInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or(Value::Float(i as f64)),
        ValueRef::UTinyInt(i) => Value::Int(i64::from(i)),
        ValueRef::USmallInt(i) => Value::Int(i64::from(i)),
        ValueRef::UInt(i) => Value::Int(i64::from(i)),
        ValueRef::UBigInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or(Value::Float(i as f64)),
        ValueRef::Float(f) => Value::Float(f64::from(f)),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(format!("<blob {} bytes>", bytes.len())),
        ValueRef::Date32(days) => render_date(days),
        ValueRef::Timestamp(unit, v) => render_timestamp(unit, v),
        other => {
            warn!(?other, "unsupported engine value, rendering null");
            Value::Null
        }
    }
}

fn render_date(days_since_epoch: i32) -> Value {
    Date::from_julian_day(UNIX_EPOCH_JULIAN_DAY + days_since_epoch)
        .ok()
        .and_then(|d| d.format(DATE_FORMAT).ok())
        .map(Value::Text)
        .unwrap_or(Value::Null)
}

fn render_timestamp(unit: TimeUnit, value: i64) -> Value {
    let micros: i128 = match unit {
        TimeUnit::Second => i128::from(value) * 1_000_000,
        TimeUnit::Millisecond => i128::from(value) * 1_000,
        TimeUnit::Microsecond => i128::from(value),
        TimeUnit::Nanosecond => i128::from(value) / 1_000,
    };
    OffsetDateTime::from_unix_timestamp_nanos(micros * 1_000)
        .ok()
        .and_then(|ts| ts.format(TIMESTAMP_FORMAT).ok())
        .map(Value::Text)
        .unwrap_or(Value::Null)
}
