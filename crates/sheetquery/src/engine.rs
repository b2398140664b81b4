//! Engine facade: the read API and the write path
//!
//! A read goes cache lookup, then compile, then execute, then cache fill, and
//! finally kicks off index advice for the table in the background. Every write
//! invalidates the dataset's cache namespace before it returns.

use crate::advisor::{AdvisorReport, IndexAdvisor};
use crate::cache::{CacheStats, TieredCache};
use crate::config::EngineConfig;
use crate::descriptor::{RawColumnDef, TableDescriptor, validate_dataset_id};
use crate::error::{EngineError, Result};
use crate::executor::{QueryExecutor, write_values};
use crate::filter::{FilterCompiler, Pagination};
use crate::registry::Registry;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::sync::Arc;

/// One page of a filtered read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    pub rows: Vec<Map<String, Json>>,
    pub total_count: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub affected: u64,
    /// Written fields the table does not have
    pub dropped_fields: Vec<String>,
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn Store>,
    registry: Registry,
    compiler: FilterCompiler,
    executor: QueryExecutor,
    cache: Arc<TieredCache>,
    advisor: Arc<IndexAdvisor>,
}

impl Engine {
    /// Validate `config`, connect the cache tiers and build the engine
    pub async fn open(store: Arc<dyn Store>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let cache = TieredCache::initialize(&config.cache).await;
        Ok(Self::with_cache(store, config, Arc::new(cache)))
    }

    /// Build around an existing cache
    #[must_use]
    pub fn with_cache(store: Arc<dyn Store>, config: EngineConfig, cache: Arc<TieredCache>) -> Self {
        Self {
            registry: Registry::with_cache(Arc::clone(&cache)),
            compiler: FilterCompiler::new(config.query.max_in_list),
            executor: QueryExecutor::new(Arc::clone(&store), config.query.numeric_string_threshold),
            advisor: Arc::new(IndexAdvisor::new(Arc::clone(&store))),
            store,
            cache,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    #[must_use]
    pub fn advisor(&self) -> &Arc<IndexAdvisor> {
        &self.advisor
    }

    pub async fn register(
        &self,
        dataset_id: &str,
        columns: &[RawColumnDef],
    ) -> Result<Arc<TableDescriptor>> {
        self.registry.register(dataset_id, columns).await
    }

    /// Register a dataset by reading its physical table's columns
    pub async fn register_from_store(&self, dataset_id: &str) -> Result<Arc<TableDescriptor>> {
        self.registry
            .register_from_store(dataset_id, self.store.as_ref())
            .await
    }

    pub async fn drop_dataset(&self, dataset_id: &str) -> Result<bool> {
        self.registry.drop(dataset_id).await
    }

    /// Paginated, filtered read of one dataset
    pub async fn query(
        &self,
        dataset_id: &str,
        filter: &Json,
        page: u64,
        limit: u64,
    ) -> Result<QueryPage> {
        validate_dataset_id(dataset_id)?;
        let pagination = Pagination::new(page, limit)?;
        let descriptor = self.registry.get(dataset_id)?;

        let key = self.cache.key_for(dataset_id, page, limit, filter);
        if let Some(cached) = self.cache.get_json::<QueryPage>(&key).await {
            return Ok(cached);
        }

        let compiled = self.compiler.compile(&descriptor, filter, pagination)?;
        let result = self.executor.execute(&compiled).await?;
        if compiled.is_unfiltered() {
            self.registry.update_row_count(dataset_id, result.total_count);
        }

        let page = QueryPage {
            rows: result.rows,
            total_count: result.total_count,
            page,
            limit,
            total_pages: pagination.total_pages(result.total_count),
        };
        diagnostics::log_debug!(
            "Query on {dataset_id} matched {total} rows",
            dataset_id: dataset_id,
            total: page.total_count
        );
        _ = self.cache.set_json(&key, &page, None).await;

        if self.config.advisor.enabled {
            _ = self.advisor.spawn(descriptor);
        }
        Ok(page)
    }

    /// Per-tier cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Insert JSON objects as new rows; ids are assigned by the store
    pub async fn insert_rows(&self, dataset_id: &str, rows: &[Json]) -> Result<WriteOutcome> {
        let descriptor = self.registry.get(dataset_id)?;
        let mut objects = Vec::with_capacity(rows.len());
        let mut dropped_fields = Vec::new();
        for row in rows {
            let Json::Object(map) = row else {
                return Err(EngineError::validation("each inserted row must be a JSON object"));
            };
            for field in write_values(&descriptor, map)?.dropped_fields {
                if !dropped_fields.contains(&field) {
                    dropped_fields.push(field);
                }
            }
            objects.push(map.clone());
        }

        let result = self.executor.insert_rows(&descriptor, &objects).await;
        // Earlier rows may have landed even when a later one failed
        _ = self.cache.invalidate_namespace(dataset_id).await;
        Ok(WriteOutcome {
            affected: result?,
            dropped_fields,
        })
    }

    /// Set `values` on every row matching `filter`. An empty filter is refused.
    pub async fn update_where(
        &self,
        dataset_id: &str,
        filter: &Json,
        values: &Json,
    ) -> Result<WriteOutcome> {
        let descriptor = self.registry.get(dataset_id)?;
        let compiled = self
            .compiler
            .compile(&descriptor, filter, Pagination::default())?;
        if compiled.is_unfiltered() {
            return Err(EngineError::validation(
                "update requires a filter matching known columns",
            ));
        }
        let Json::Object(map) = values else {
            return Err(EngineError::validation("update values must be a JSON object"));
        };
        let values = write_values(&descriptor, map)?;

        let result = self.executor.update(&compiled, &values).await;
        _ = self.cache.invalidate_namespace(dataset_id).await;
        Ok(WriteOutcome {
            affected: result?,
            dropped_fields: values.dropped_fields,
        })
    }

    /// Delete every row matching `filter`. An empty filter is refused.
    pub async fn delete_where(&self, dataset_id: &str, filter: &Json) -> Result<WriteOutcome> {
        let descriptor = self.registry.get(dataset_id)?;
        let compiled = self
            .compiler
            .compile(&descriptor, filter, Pagination::default())?;
        if compiled.is_unfiltered() {
            return Err(EngineError::validation(
                "delete requires a filter matching known columns",
            ));
        }

        let result = self.executor.delete(&compiled).await;
        _ = self.cache.invalidate_namespace(dataset_id).await;
        Ok(WriteOutcome {
            affected: result?,
            dropped_fields: Vec::new(),
        })
    }

    /// Run index advice now and wait for the report
    pub async fn advise(&self, dataset_id: &str) -> Result<AdvisorReport> {
        let descriptor = self.registry.get(dataset_id)?;
        self.advisor.advise_and_create(&descriptor).await
    }

    /// Release the cache tiers
    pub fn close(&self) {
        self.cache.close();
    }
}
