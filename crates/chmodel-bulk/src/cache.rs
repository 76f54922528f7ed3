//! Per-model property metadata cache.
//!
//! Building a model's [`EntityPropertyInfo`] walks its property list and
//! renders the quoted column list once. Repeated bulk inserts against the
//! same model reuse the cached entry.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use chmodel_core::{Model, PropertyMapping, quote_ident};

/// Column metadata for one model, immutable once built.
pub struct EntityPropertyInfo<T> {
    table_name: String,
    quoted_table_name: String,
    /// Stored column names in order; nested properties contribute one
    /// `Name.Field` entry per field.
    columns: Vec<String>,
    column_list: String,
    properties: Vec<PropertyMapping<T>>,
}

impl<T> Clone for EntityPropertyInfo<T> {
    fn clone(&self) -> Self {
        Self {
            table_name: self.table_name.clone(),
            quoted_table_name: self.quoted_table_name.clone(),
            columns: self.columns.clone(),
            column_list: self.column_list.clone(),
            properties: self.properties.clone(),
        }
    }
}

impl<T> std::fmt::Debug for EntityPropertyInfo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityPropertyInfo")
            .field("quoted_table_name", &self.quoted_table_name)
            .field("column_list", &self.column_list)
            .field("properties", &self.properties.len())
            .finish()
    }
}

impl<T: Model> EntityPropertyInfo<T> {
    /// Build metadata from the model's table name and property list.
    pub fn build() -> Self {
        Self::from_parts(T::TABLE_NAME, T::properties())
    }
}

impl<T> EntityPropertyInfo<T> {
    pub fn from_parts(table_name: &str, properties: Vec<PropertyMapping<T>>) -> Self {
        let columns: Vec<String> = properties
            .iter()
            .flat_map(PropertyMapping::store_columns)
            .collect();
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            table_name: table_name.to_string(),
            quoted_table_name: quote_ident(table_name),
            columns,
            column_list,
            properties,
        }
    }

    /// The same columns written to a different table.
    pub fn with_table(&self, table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            quoted_table_name: quote_ident(table_name),
            ..self.clone()
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn quoted_table_name(&self) -> &str {
        &self.quoted_table_name
    }

    /// Comma-joined quoted column names.
    pub fn column_list(&self) -> &str {
        &self.column_list
    }

    /// Unquoted stored column names, in column-list order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn properties(&self) -> &[PropertyMapping<T>] {
        &self.properties
    }

    /// A model with no mapped properties cannot be inserted.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Memoizes [`EntityPropertyInfo`] per model type.
///
/// Reads take a shared lock. A miss takes the write lock and re-checks
/// before building, so each type is built at most once per cache.
#[derive(Default)]
pub struct PropertyCache {
    entries: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> &'static PropertyCache {
        static GLOBAL: OnceLock<PropertyCache> = OnceLock::new();
        GLOBAL.get_or_init(PropertyCache::new)
    }

    /// Get (building on first use) the metadata for `T`.
    pub fn get<T: Model>(&self) -> Arc<EntityPropertyInfo<T>> {
        let key = TypeId::of::<T>();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(&key) {
                if let Ok(info) = Arc::clone(entry).downcast::<EntityPropertyInfo<T>>() {
                    return info;
                }
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(key).or_insert_with(|| {
            let info = EntityPropertyInfo::<T>::build();
            tracing::debug!(
                table = %info.quoted_table_name,
                columns = info.columns.len(),
                "Built property metadata"
            );
            Arc::new(info)
        });
        Arc::clone(entry)
            .downcast::<EntityPropertyInfo<T>>()
            .unwrap_or_else(|_| Arc::new(EntityPropertyInfo::<T>::build()))
    }

    /// Number of cached model types.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for PropertyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyCache")
            .field("entries", &self.len())
            .finish()
    }
}
