//! Prepared statement management and caching.
//!
//! This module provides:
//! - `PreparedStatement`: A server-side prepared statement
//! - `StatementCache`: O(1) LRU cache of prepared statements per connection

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::protocol::{FieldDescription, SharedColumns};
use crate::types::Oid;

// ============================================================================
// Prepared Statement
// ============================================================================

/// A prepared statement that has been parsed by the server.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Server-side name for this statement (e.g., "__pgrt_1")
    pub name: String,
    /// The SQL query text
    pub query: String,
    /// Parameter type OIDs (from ParameterDescription)
    pub param_types: Vec<Oid>,
    /// Result column descriptions (from RowDescription)
    pub columns: SharedColumns,
}

impl PreparedStatement {
    /// Create a new prepared statement.
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            param_types: Vec::new(),
            columns: Arc::new(Vec::new()),
        }
    }

    /// Set the parameter types after receiving ParameterDescription.
    pub fn with_param_types(mut self, types: Vec<Oid>) -> Self {
        self.param_types = types;
        self
    }

    /// Set the column descriptions after receiving RowDescription.
    pub fn with_columns(mut self, columns: Vec<FieldDescription>) -> Self {
        self.columns = Arc::new(columns);
        self
    }

    /// Check if this statement returns rows.
    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }
}

// ============================================================================
// Statement Cache (O(1) LRU)
// ============================================================================

/// LRU cache of prepared statements for one connection.
///
/// Keys are either a caller-chosen statement name or, for statements prepared
/// implicitly by `query`, the SQL text itself. The cache lives beside the
/// connection in the pool, so it survives across checkouts.
pub struct StatementCache {
    cache: LruCache<String, Arc<PreparedStatement>>,
    next_id: u32,
}

impl StatementCache {
    /// Create a new statement cache with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
            next_id: 0,
        }
    }

    /// Get a cached statement without touching LRU order.
    pub fn get(&self, key: &str) -> Option<Arc<PreparedStatement>> {
        self.cache.peek(key).map(Arc::clone)
    }

    /// Get a cached statement and mark it recently used.
    pub fn get_and_touch(&mut self, key: &str) -> Option<Arc<PreparedStatement>> {
        self.cache.get(key).map(Arc::clone)
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains(key)
    }

    /// Insert a prepared statement into the cache.
    ///
    /// Returns the statement that had to make room: either the least recently
    /// used entry, or the previous statement under the same key. The caller
    /// owns releasing it on the server.
    pub fn insert(
        &mut self,
        key: String,
        statement: PreparedStatement,
    ) -> Option<Arc<PreparedStatement>> {
        self.cache
            .push(key, Arc::new(statement))
            .map(|(_, displaced)| displaced)
    }

    /// Remove a statement from the cache.
    pub fn remove(&mut self, key: &str) -> Option<Arc<PreparedStatement>> {
        self.cache.pop(key)
    }

    /// Generate a unique statement name for this connection.
    pub fn next_statement_name(&mut self) -> String {
        self.next_id += 1;
        format!("__pgrt_{}", self.next_id)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        // Default capacity of 100 statements per connection
        Self::new(100)
    }
}
