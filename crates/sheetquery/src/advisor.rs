//! Index advisor
//!
//! Best-effort index creation for columns that are likely to be filtered on.
//! Nothing here affects query results; every failure is logged and collected
//! into the report instead of being returned.

use crate::descriptor::{PRIMARY_KEY, SemanticType, TableDescriptor, quote_ident};
use crate::error::{EngineError, Result};
use crate::store::{Statement, Store};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Column-name fragments that suggest a column is filtered on
pub const NAME_PATTERNS: &[&str] = &[
    "name", "title", "code", "no", "number", "id", "key", "date", "time", "created", "updated",
    "status", "type", "category", "user", "customer", "order", "product",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    pub name: String,
    pub table_name: String,
    pub columns: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A planned single-column index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPlan {
    pub name: String,
    pub table_name: String,
    pub column: String,
}

impl IndexPlan {
    #[must_use]
    pub fn statement(&self) -> Statement {
        Statement::bare(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&self.name),
            quote_ident(&self.table_name),
            quote_ident(&self.column)
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorReport {
    pub table_name: String,
    pub created: Vec<IndexDescriptor>,
    /// Names of planned indexes that already existed
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

/// Deterministic index name: `idx_<datasetId>_<first 8 hex of sha256(column)>`
#[must_use]
pub fn index_name(dataset_id: &str, column: &str) -> String {
    let digest = hex::encode(Sha256::digest(column.as_bytes()));
    format!("idx_{dataset_id}_{}", &digest[..8])
}

fn wants_index(name: &str, semantic: SemanticType) -> bool {
    if matches!(semantic, SemanticType::Number | SemanticType::Date) {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    NAME_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Indexes the heuristic wants for `descriptor`: the primary key first, then
/// matching columns in descriptor order
#[must_use]
pub fn plan(descriptor: &TableDescriptor) -> Vec<IndexPlan> {
    let make = |column: &str| IndexPlan {
        name: index_name(&descriptor.dataset_id, column),
        table_name: descriptor.physical_name.clone(),
        column: column.to_string(),
    };
    std::iter::once(make(PRIMARY_KEY))
        .chain(
            descriptor
                .columns
                .iter()
                .filter(|c| wants_index(&c.name, c.semantic_type))
                .map(|c| make(&c.name)),
        )
        .collect()
}

pub struct IndexAdvisor {
    store: Arc<dyn Store>,
    advised: Mutex<HashSet<String>>,
}

impl IndexAdvisor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            advised: Mutex::new(HashSet::new()),
        }
    }

    /// True once a table has been advised in this process
    #[must_use]
    pub fn is_advised(&self, table: &str) -> bool {
        self.advised
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(table)
    }

    /// Inspect existing indexes and create the missing planned ones.
    ///
    /// Fails only when the table cannot be inspected at all.
    pub async fn advise_and_create(&self, descriptor: &TableDescriptor) -> Result<AdvisorReport> {
        let table = descriptor.physical_name.as_str();
        if self.store.describe_table(table).await?.is_empty() {
            return Err(EngineError::NotFound(format!("table {table}")));
        }
        let existing = self.store.list_indexes(table).await?;

        let mut report = AdvisorReport {
            table_name: table.to_string(),
            ..AdvisorReport::default()
        };
        for planned in plan(descriptor) {
            let covered = existing.iter().any(|idx| {
                idx.name == planned.name || idx.columns.as_slice() == [planned.column.as_str()]
            });
            if covered {
                report.skipped.push(planned.name);
                continue;
            }
            match self.store.execute(planned.statement()).await {
                Ok(_) => {
                    diagnostics::log_info!(
                        "Created index {name} on {table}({column})",
                        name: planned.name.as_str(),
                        table: table,
                        column: planned.column.as_str()
                    );
                    report.created.push(IndexDescriptor {
                        name: planned.name,
                        table_name: planned.table_name,
                        columns: vec![planned.column],
                        created_at: Utc::now(),
                    });
                }
                Err(e) => {
                    diagnostics::log_warn!(
                        "Index {name} on {table} failed: {error}",
                        name: planned.name.as_str(),
                        table: table,
                        error: e
                    );
                    report.errors.push(format!("{}: {e}", planned.name));
                }
            }
        }

        _ = self
            .advised
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string());
        Ok(report)
    }

    /// Advise in the background unless this table was already handled or is
    /// in flight. Returns the task handle when one was started.
    pub fn spawn(self: &Arc<Self>, descriptor: Arc<TableDescriptor>) -> Option<JoinHandle<()>> {
        {
            let mut advised = self.advised.lock().unwrap_or_else(PoisonError::into_inner);
            if !advised.insert(descriptor.physical_name.clone()) {
                return None;
            }
        }
        let advisor = Arc::clone(self);
        Some(tokio::spawn(async move {
            match advisor.advise_and_create(&descriptor).await {
                Ok(report) => diagnostics::log_debug!(
                    "Index advice for {table}: {created} created, {skipped} skipped, {errors} failed",
                    table: report.table_name.as_str(),
                    created: report.created.len(),
                    skipped: report.skipped.len(),
                    errors: report.errors.len()
                ),
                Err(e) => {
                    diagnostics::log_warn!(
                        "Index advice for {table} failed: {error}",
                        table: descriptor.physical_name.as_str(),
                        error: e
                    );
                    // Allow a later read to try again
                    _ = advisor
                        .advised
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&descriptor.physical_name);
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RawColumnDef;
    use crate::duck_store::DuckStore;
    use crate::testing::create_table;

    const DS: &str = "0123456789abcdef0123456789abcdef";

    fn descriptor() -> TableDescriptor {
        TableDescriptor::from_raw(
            DS,
            &[
                RawColumnDef::new("customer_name", "string"),
                RawColumnDef::new("notes", "string"),
                RawColumnDef::new("amount", "number"),
                RawColumnDef::new("shipped", "date"),
                RawColumnDef::new("flag", "boolean"),
            ],
        )
        .expect("descriptor")
    }

    #[test]
    fn test_plan_heuristic() {
        let columns: Vec<String> = plan(&descriptor()).into_iter().map(|p| p.column).collect();
        // "notes" contains "no"
        assert_eq!(columns, vec!["id", "customer_name", "notes", "amount", "shipped"]);
    }

    #[test]
    fn test_index_name_is_deterministic() {
        let a = index_name(DS, "amount");
        assert_eq!(a, index_name(DS, "amount"));
        assert_ne!(a, index_name(DS, "shipped"));
        assert!(a.starts_with(&format!("idx_{DS}_")));
        assert_eq!(a.len(), "idx_".len() + DS.len() + 1 + 8);
    }

    #[tokio::test]
    async fn test_advise_and_create_skips_existing() -> anyhow::Result<()> {
        let store = Arc::new(DuckStore::open_in_memory()?);
        let desc = descriptor();
        create_table(store.as_ref(), &desc).await?;
        _ = store
            .execute(Statement::bare(format!(
                "CREATE INDEX manual_amount ON {} (amount)",
                quote_ident(&desc.physical_name)
            )))
            .await?;

        let advisor = IndexAdvisor::new(store.clone());
        let report = advisor.advise_and_create(&desc).await?;
        assert_eq!(report.created.len(), 4);
        assert_eq!(report.skipped, vec![index_name(DS, "amount")]);
        assert!(report.errors.is_empty());
        assert!(advisor.is_advised(&desc.physical_name));

        let again = advisor.advise_and_create(&desc).await?;
        assert!(again.created.is_empty());
        assert_eq!(again.skipped.len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_table_is_an_error() -> anyhow::Result<()> {
        let store = Arc::new(DuckStore::open_in_memory()?);
        let advisor = Arc::new(IndexAdvisor::new(store));
        assert!(advisor.advise_and_create(&descriptor()).await.is_err());

        // A failed background run can be retried
        let handle = advisor.spawn(Arc::new(descriptor())).expect("first spawn");
        handle.await?;
        assert!(!advisor.is_advised(&descriptor().physical_name));
        Ok(())
    }

    #[tokio::test]
    async fn test_spawn_runs_once() -> anyhow::Result<()> {
        let store = Arc::new(DuckStore::open_in_memory()?);
        let desc = Arc::new(descriptor());
        create_table(store.as_ref(), &desc).await?;
        let advisor = Arc::new(IndexAdvisor::new(store.clone()));

        let handle = advisor.spawn(Arc::clone(&desc)).expect("first spawn");
        assert!(advisor.spawn(Arc::clone(&desc)).is_none());
        handle.await?;
        assert_eq!(store.list_indexes(&desc.physical_name).await?.len(), 5);
        Ok(())
    }
}
