//! The relational store seam
//!
//! The engine only ever hands the store parameterized statements; identifiers
//! inside `sql` come from validated descriptors and every value is a bound
//! [`SqlParam`].

use crate::error::Result;
use crate::value::{Cell, SqlParam};
use async_trait::async_trait;
use serde::Serialize;

/// A statement and its bound parameters, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn new<S: Into<String>>(sql: S, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A statement without parameters
    pub fn bare<S: Into<String>>(sql: S) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// One column of a physical table, as reported by the store's catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// An index that already exists on a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingIndex {
    pub name: String,
    /// Indexed columns, when the catalog exposes them
    pub columns: Vec<String>,
}

/// Relational store operations used by the engine
#[async_trait]
pub trait Store: Send + Sync {
    /// Run a query and return every row, each with exactly `width` cells
    async fn fetch_rows(&self, statement: Statement, width: usize) -> Result<Vec<Vec<Cell>>>;

    /// Run a single-value count query
    async fn fetch_count(&self, statement: Statement) -> Result<u64>;

    /// Run a statement that returns no rows; yields the affected row count
    async fn execute(&self, statement: Statement) -> Result<u64>;

    async fn list_indexes(&self, table: &str) -> Result<Vec<ExistingIndex>>;

    /// Columns of `table` in ordinal order; empty when the table does not exist
    async fn describe_table(&self, table: &str) -> Result<Vec<StoreColumn>>;

    /// Names of tables starting with `prefix`, sorted
    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>>;
}
