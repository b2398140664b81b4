//! Test utilities and fixtures
//!
//! Table creation from a descriptor, row seeding, and an in-process
//! distributed tier whose failures can be switched on and off.

use crate::cache::DistributedTier;
use crate::descriptor::{PRIMARY_KEY, SemanticType, TableDescriptor, quote_ident};
use crate::error::{CacheError, Result};
use crate::executor::{insert_statement, write_values};
use crate::store::{Statement, Store};
use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Column type used for each semantic type in fixture tables
#[must_use]
pub fn sql_type(semantic: SemanticType) -> &'static str {
    match semantic {
        SemanticType::String => "VARCHAR",
        SemanticType::Number => "DOUBLE",
        SemanticType::Date => "DATE",
        SemanticType::Boolean => "BOOLEAN",
    }
}

/// Create the physical table for `descriptor`
pub async fn create_table(store: &dyn Store, descriptor: &TableDescriptor) -> Result<()> {
    let mut columns = vec![format!("{} BIGINT NOT NULL", quote_ident(PRIMARY_KEY))];
    for column in &descriptor.columns {
        let null = if column.nullable { "" } else { " NOT NULL" };
        columns.push(format!(
            "{} {}{null}",
            quote_ident(&column.name),
            sql_type(column.semantic_type)
        ));
    }
    let sql = format!(
        "CREATE TABLE {} ({})",
        quote_ident(&descriptor.physical_name),
        columns.join(", ")
    );
    _ = store.execute(Statement::bare(sql)).await?;
    Ok(())
}

/// Insert JSON objects as rows; ids are assigned 1, 2, 3... in order
pub async fn seed_rows(store: &dyn Store, descriptor: &TableDescriptor, rows: &[Json]) -> Result<()> {
    for row in rows {
        let Some(map) = row.as_object() else {
            return Err(crate::error::EngineError::validation("seed rows must be objects"));
        };
        let values = write_values(descriptor, map)?;
        _ = store
            .execute(insert_statement(descriptor, &values.assignments)?)
            .await?;
    }
    Ok(())
}

/// Distributed tier backed by a shared map. Clones share state, so a test
/// can keep one handle while the cache owns another.
#[derive(Clone, Default)]
pub struct ScriptedTier {
    entries: Arc<Mutex<HashMap<String, String>>>,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicU64>,
}

impl ScriptedTier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent command fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn insert(&self, key: &str, value: &str) {
        _ = self.map().insert(key.to_string(), value.to_string());
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.map().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Commands received, including failed ones
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> std::result::Result<(), CacheError> {
        _ = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DistributedTier for ScriptedTier {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError> {
        self.check()?;
        Ok(self.map().get(key).cloned())
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        _ttl: Duration,
    ) -> std::result::Result<(), CacheError> {
        self.check()?;
        self.insert(key, value);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> std::result::Result<u64, CacheError> {
        self.check()?;
        let mut map = self.map();
        Ok(keys.iter().filter(|k| map.remove(*k).is_some()).count() as u64)
    }

    async fn keys(&self, pattern: &str) -> std::result::Result<Vec<String>, CacheError> {
        self.check()?;
        let map = self.map();
        let matched = match pattern.strip_suffix('*') {
            Some(prefix) => map.keys().filter(|k| k.starts_with(prefix)).cloned().collect(),
            None => map.keys().filter(|k| k.as_str() == pattern).cloned().collect(),
        };
        Ok(matched)
    }

    fn is_connected(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}
