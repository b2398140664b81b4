//! [`Store`] backed by an embedded DuckDB connection
//!
//! The connection is synchronous, so every call takes the mutex on tokio's
//! blocking pool rather than on a runtime worker.

use crate::error::{EngineError, Result};
use crate::store::{ExistingIndex, Statement, Store, StoreColumn};
use crate::value::{Cell, SqlParam};
use async_trait::async_trait;
use duckdb::types::{TimeUnit, ToSqlOutput, Value as DuckValue};
use duckdb::{Connection, ToSql, params_from_iter};
use std::path::Path;
use std::sync::{Arc, Mutex};

impl ToSql for SqlParam {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            SqlParam::Null => DuckValue::Null,
            SqlParam::Bool(b) => DuckValue::Boolean(*b),
            SqlParam::Int(i) => DuckValue::BigInt(*i),
            SqlParam::Float(f) => DuckValue::Double(*f),
            SqlParam::Text(s) => DuckValue::Text(s.clone()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

#[derive(Clone)]
pub struct DuckStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckStore {
    /// Open or create a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        diagnostics::log_info!(
            "Opened DuckDB store at {path}",
            path: path.as_ref().display().to_string()
        );
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` with the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| EngineError::backend_unavailable("store connection lock poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| EngineError::backend_unavailable(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl Store for DuckStore {
    async fn fetch_rows(&self, statement: Statement, width: usize) -> Result<Vec<Vec<Cell>>> {
        diagnostics::log_debug!("SQL: {sql}", sql: statement.sql.as_str());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&statement.sql)?;
            let mut rows = stmt.query(params_from_iter(statement.params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(width);
                for i in 0..width {
                    let value: DuckValue = row.get(i)?;
                    cells.push(cell_from_duck(value));
                }
                out.push(cells);
            }
            Ok(out)
        })
        .await
    }

    async fn fetch_count(&self, statement: Statement) -> Result<u64> {
        diagnostics::log_debug!("SQL: {sql}", sql: statement.sql.as_str());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&statement.sql)?;
            let count: i64 =
                stmt.query_row(params_from_iter(statement.params.iter()), |row| row.get(0))?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }

    async fn execute(&self, statement: Statement) -> Result<u64> {
        diagnostics::log_debug!("SQL: {sql}", sql: statement.sql.as_str());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&statement.sql)?;
            let affected = stmt.execute(params_from_iter(statement.params.iter()))?;
            Ok(affected as u64)
        })
        .await
    }

    async fn list_indexes(&self, table: &str) -> Result<Vec<ExistingIndex>> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT index_name, sql FROM duckdb_indexes() WHERE table_name = ?")?;
            let mut rows = stmt.query([table.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let name: String = row.get(0)?;
                let sql: Option<String> = row.get(1)?;
                out.push(ExistingIndex {
                    name,
                    columns: sql.as_deref().map(index_columns).unwrap_or_default(),
                });
            }
            Ok(out)
        })
        .await
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<StoreColumn>> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
                 WHERE table_name = ? ORDER BY ordinal_position",
            )?;
            let mut rows = stmt.query([table.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let name: String = row.get(0)?;
                let data_type: String = row.get(1)?;
                let nullable: String = row.get(2)?;
                out.push(StoreColumn {
                    name,
                    data_type,
                    nullable: nullable.eq_ignore_ascii_case("YES"),
                });
            }
            Ok(out)
        })
        .await
    }

    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT table_name FROM information_schema.tables ORDER BY table_name",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let name: String = row.get(0)?;
                if name.starts_with(&prefix) {
                    out.push(name);
                }
            }
            Ok(out)
        })
        .await
    }
}

/// Column list of a `CREATE INDEX ... ON t (a, "b")` statement
fn index_columns(sql: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (sql.find('('), sql.rfind(')')) else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }
    sql[open + 1..close]
        .split(',')
        .map(|c| c.trim().trim_matches('"').replace("\"\"", "\""))
        .filter(|c| !c.is_empty())
        .collect()
}

fn cell_from_duck(value: DuckValue) -> Cell {
    match value {
        DuckValue::Null => Cell::Null,
        DuckValue::Boolean(b) => Cell::Bool(b),
        DuckValue::TinyInt(i) => Cell::Int(i64::from(i)),
        DuckValue::SmallInt(i) => Cell::Int(i64::from(i)),
        DuckValue::Int(i) => Cell::Int(i64::from(i)),
        DuckValue::BigInt(i) => Cell::Int(i),
        DuckValue::HugeInt(i) => Cell::BigInt(i),
        DuckValue::UTinyInt(i) => Cell::Int(i64::from(i)),
        DuckValue::USmallInt(i) => Cell::Int(i64::from(i)),
        DuckValue::UInt(i) => Cell::Int(i64::from(i)),
        DuckValue::UBigInt(i) => Cell::BigInt(i128::from(i)),
        DuckValue::Float(f) => Cell::Float(f64::from(f)),
        DuckValue::Double(f) => Cell::Float(f),
        DuckValue::Decimal(d) => Cell::Decimal(d.to_string()),
        DuckValue::Text(s) => Cell::Text(s),
        DuckValue::Date32(days) => Cell::Text(date_text(days)),
        DuckValue::Timestamp(unit, raw) => Cell::Text(timestamp_text(unit, raw)),
        DuckValue::Blob(bytes) => Cell::Text(hex::encode(bytes)),
        other => Cell::Text(format!("{other:?}")),
    }
}

fn date_text(days: i32) -> String {
    chrono::DateTime::from_timestamp(i64::from(days) * 86_400, 0)
        .map(|dt| dt.date_naive().format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| days.to_string())
}

fn timestamp_text(unit: TimeUnit, raw: i64) -> String {
    let micros = match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    };
    chrono::DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
        .unwrap_or_else(|| raw.to_string())
}
