//! Table descriptor registry
//!
//! The only owner of [`TableDescriptor`] values. Everyone else receives
//! shared, read-only handles.

use crate::cache::TieredCache;
use crate::descriptor::{RawColumnDef, TABLE_PREFIX, TableDescriptor, physical_table_name, validate_dataset_id};
use crate::error::{EngineError, Result};
use crate::store::Store;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Default)]
pub struct Registry {
    tables: RwLock<HashMap<String, Arc<TableDescriptor>>>,
    cache: Option<Arc<TieredCache>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that purges cache namespaces when descriptors change or go away
    #[must_use]
    pub fn with_cache(cache: Arc<TieredCache>) -> Self {
        Self {
            tables: RwLock::default(),
            cache: Some(cache),
        }
    }

    /// Register a dataset's columns. Identical re-registration is a no-op
    /// returning the existing descriptor; different columns replace it.
    pub async fn register(
        &self,
        dataset_id: &str,
        raw_columns: &[RawColumnDef],
    ) -> Result<Arc<TableDescriptor>> {
        let candidate = TableDescriptor::from_raw(dataset_id, raw_columns)?;

        let replaced = {
            let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = tables.get(dataset_id) {
                if existing.same_shape(&candidate) {
                    return Ok(Arc::clone(existing));
                }
            }
            let descriptor = Arc::new(candidate);
            let replaced = tables
                .insert(dataset_id.to_string(), Arc::clone(&descriptor))
                .is_some();
            diagnostics::log_info!(
                "Registered {dataset_id} with {count} columns",
                dataset_id: dataset_id,
                count: descriptor.columns.len()
            );
            replaced
        };

        if replaced {
            self.purge(dataset_id).await;
        }
        self.get(dataset_id)
    }

    pub fn get(&self, dataset_id: &str) -> Result<Arc<TableDescriptor>> {
        validate_dataset_id(dataset_id)?;
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(dataset_id.to_string()))
    }

    /// Forget a dataset and purge its cache namespace. The physical table is untouched.
    pub async fn drop(&self, dataset_id: &str) -> Result<bool> {
        validate_dataset_id(dataset_id)?;
        let removed = self
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(dataset_id)
            .is_some();
        if removed {
            diagnostics::log_info!("Dropped descriptor for {dataset_id}", dataset_id: dataset_id);
            self.purge(dataset_id).await;
        }
        Ok(removed)
    }

    /// Every registered descriptor, ordered by dataset id
    #[must_use]
    pub fn list(&self) -> Vec<Arc<TableDescriptor>> {
        let mut out: Vec<_> = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        out.sort_by(|a, b| a.dataset_id.cmp(&b.dataset_id));
        out
    }

    /// Record the latest unfiltered row count
    pub fn update_row_count(&self, dataset_id: &str, rows: u64) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = tables.get_mut(dataset_id) {
            if existing.row_count_hint != rows {
                Arc::make_mut(existing).row_count_hint = rows;
            }
        }
    }

    /// Register a dataset from the physical table's catalog entry
    pub async fn register_from_store(
        &self,
        dataset_id: &str,
        store: &dyn Store,
    ) -> Result<Arc<TableDescriptor>> {
        validate_dataset_id(dataset_id)?;
        let table = physical_table_name(dataset_id);
        let columns = store.describe_table(&table).await?;
        if columns.is_empty() {
            return Err(EngineError::NotFound(dataset_id.to_string()));
        }
        let raw: Vec<RawColumnDef> = columns
            .into_iter()
            .map(|c| RawColumnDef {
                name: c.name,
                declared_type: c.data_type,
                nullable: Some(c.nullable),
            })
            .collect();
        self.register(dataset_id, &raw).await
    }

    /// Dataset ids that have a physical table in `store`
    pub async fn discover(store: &dyn Store) -> Result<Vec<String>> {
        let tables = store.list_tables(TABLE_PREFIX).await?;
        Ok(tables
            .into_iter()
            .filter_map(|t| t.strip_prefix(TABLE_PREFIX).map(str::to_string))
            .filter(|id| validate_dataset_id(id).is_ok())
            .collect())
    }

    async fn purge(&self, dataset_id: &str) {
        if let Some(cache) = &self.cache {
            _ = cache.invalidate_namespace(dataset_id).await;
        }
    }
}
