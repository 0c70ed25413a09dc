//! Bounded metadata cache for target tables.
//!
//! Entries are keyed by a hash of (driver URL, catalog, schema) plus the table
//! name, so the same table reached through a different database or schema
//! override gets its own entry.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use siphasher::sip::SipHasher13;
use tracing::{debug, instrument, trace, warn};

use crate::driver::WarehouseConnection;
use crate::error::{CoreError, Result};
use crate::types::{ColumnMeta, SqlValue};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    scope: u64,
    table: String,
}

impl CacheKey {
    pub fn new(url: &str, catalog: Option<&str>, schema: Option<&str>, table: &str) -> Self {
        let mut hasher = SipHasher13::new_with_key(&[0u8; 16]);
        url.hash(&mut hasher);
        catalog.hash(&mut hasher);
        schema.hash(&mut hasher);
        Self {
            scope: hasher.finish(),
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

/// Cached description of one table.
#[derive(Debug, Clone, Default)]
pub struct TableMetadata {
    /// Columns in ordinal order.
    pub columns: Vec<ColumnMeta>,
    /// Evaluated default of every column that declares one.
    pub defaults: BTreeMap<String, SqlValue>,
}

impl TableMetadata {
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        Self {
            columns,
            defaults: BTreeMap::new(),
        }
    }

    /// Look up a column, exact name first, then ignoring ASCII case.
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    pub fn default_value(&self, column: &str) -> Option<&SqlValue> {
        self.defaults.get(column)
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Access-ordered cache with a fixed maximum entry count.
pub struct MetadataCache {
    entries: LruCache<CacheKey, Arc<TableMetadata>>,
    stats: CacheStats,
}

impl MetadataCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<TableMetadata>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.stats.hits += 1;
                trace!(table = key.table(), "metadata cache hit");
                Some(Arc::clone(entry))
            }
            None => {
                self.stats.misses += 1;
                trace!(table = key.table(), "metadata cache miss");
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, metadata: TableMetadata) -> Arc<TableMetadata> {
        let entry = Arc::new(metadata);
        if let Some((old_key, _)) = self.entries.push(key.clone(), Arc::clone(&entry)) {
            if old_key != key {
                self.stats.evictions += 1;
                debug!(table = old_key.table(), "evicted table metadata");
            }
        }
        entry
    }

    /// Cached metadata for `key`, loading and inserting it on a miss.
    pub fn get_or_load<F>(&mut self, key: CacheKey, load: F) -> Result<Arc<TableMetadata>>
    where
        F: FnOnce() -> Result<TableMetadata>,
    {
        if let Some(entry) = self.get(&key) {
            return Ok(entry);
        }
        let metadata = load()?;
        Ok(self.insert(key, metadata))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

/// Read column metadata and evaluate declared defaults.
///
/// Defaults are resolved in two steps: the column listing names the columns
/// that declare one, then each expression is evaluated with a `SELECT`.
#[instrument(skip(conn))]
pub fn load_table_metadata(
    conn: &mut dyn WarehouseConnection,
    catalog: Option<&str>,
    schema: Option<&str>,
    table: &str,
) -> Result<TableMetadata> {
    let columns = conn.columns(catalog, schema, table).map_err(|err| {
        CoreError::Validation(format!("failed to read metadata for table {table}: {err}"))
    })?;
    let mut metadata = TableMetadata::new(columns);

    let with_defaults = metadata
        .columns
        .iter()
        .filter_map(|c| c.default_expr.as_deref().map(|expr| (c.name.clone(), expr.to_string())))
        .collect::<Vec<_>>();

    for (column, expr) in with_defaults {
        let sql = format!("SELECT {expr}");
        let mut cursor = conn
            .query(&sql, &[])
            .map_err(|err| CoreError::execution(err, &sql, format!("default of {table}.{column}")))?;
        let value = if cursor
            .advance()
            .map_err(|err| CoreError::execution(err, &sql, format!("default of {table}.{column}")))?
        {
            cursor
                .value(0)
                .map_err(|err| CoreError::execution(err, &sql, format!("default of {table}.{column}")))?
        } else {
            SqlValue::Null
        };
        if let Err(err) = cursor.close() {
            warn!(table, column = %column, error = %err, "failed to close default lookup cursor");
        }
        if !value.is_null() {
            metadata.defaults.insert(column, value);
        }
    }

    debug!(
        columns = metadata.columns.len(),
        defaults = metadata.defaults.len(),
        "loaded table metadata"
    );
    Ok(metadata)
}
