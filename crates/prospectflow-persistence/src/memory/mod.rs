//! In-Memory Repository Implementation
//!
//! Memory backend for tests and single-process runs

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::PersistenceResult;
use crate::repository::{validate_key, Repository};

/// Thread-safe in-memory implementation of [`Repository`]
///
/// Uses RwLock for concurrent read access with exclusive write access.
/// Stores cloned values to maintain isolation.
#[derive(Debug)]
pub struct InMemoryRepository<T> {
    items: RwLock<HashMap<String, T>>,
}

impl<T> InMemoryRepository<T> {
    /// Create a new empty in-memory repository
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Create with initial values (useful for testing)
    pub fn with_items(items: Vec<(String, T)>) -> Self {
        Self {
            items: RwLock::new(items.into_iter().collect()),
        }
    }

    /// Clear all values (for testing)
    pub fn clear(&self) {
        self.items.write().clear();
    }
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Repository<T> for InMemoryRepository<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn save(&self, key: &str, value: &T) -> PersistenceResult<()> {
        validate_key(key)?;
        self.items.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn find(&self, key: &str) -> PersistenceResult<Option<T>> {
        Ok(self.items.read().get(key).cloned())
    }

    async fn list_entries(&self) -> PersistenceResult<Vec<(String, T)>> {
        Ok(self
            .items
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn list(&self) -> PersistenceResult<Vec<T>> {
        Ok(self.items.read().values().cloned().collect())
    }

    async fn delete(&self, key: &str) -> PersistenceResult<bool> {
        Ok(self.items.write().remove(key).is_some())
    }

    async fn count(&self) -> PersistenceResult<usize> {
        Ok(self.items.read().len())
    }
}
