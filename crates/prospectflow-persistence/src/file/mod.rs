//! JSON file repository
//!
//! Stores one pretty-printed JSON document per key under a base directory:
//! `{base_dir}/{key}.json`.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::error::{PersistenceError, PersistenceResult};
use crate::repository::{validate_key, Repository};

/// File-backed implementation of [`Repository`]
#[derive(Debug, Clone)]
pub struct JsonFileRepository<T> {
    base_dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileRepository<T> {
    /// Create a repository rooted at `base_dir`, creating the directory
    pub fn new(base_dir: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;

        debug!("JsonFileRepository initialized at {:?}", base_dir);

        Ok(Self {
            base_dir,
            _marker: PhantomData,
        })
    }

    /// Directory holding the documents
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn document_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl<T> Repository<T> for JsonFileRepository<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn save(&self, key: &str, value: &T) -> PersistenceResult<()> {
        validate_key(key)?;

        let json = serde_json::to_string_pretty(value)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

        // Temp file plus rename; readers never see a partial document
        let path = self.document_path(key);
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", key));
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!("Document saved: {} at {:?}", key, path);
        Ok(())
    }

    async fn find(&self, key: &str) -> PersistenceResult<Option<T>> {
        validate_key(key)?;

        let path = self.document_path(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let value = serde_json::from_str::<T>(&content).map_err(|e| {
            PersistenceError::Deserialization(format!("{}: {}", path.display(), e))
        })?;

        Ok(Some(value))
    }

    async fn list_entries(&self) -> PersistenceResult<Vec<(String, T)>> {
        let mut documents = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            match tokio::fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<T>(&content) {
                    Ok(value) => documents.push((key, value)),
                    Err(e) => {
                        error!("Failed to deserialize document from {:?}: {}", path, e);
                    }
                },
                Err(e) => {
                    error!("Failed to read document {:?}: {}", path, e);
                }
            }
        }

        Ok(documents)
    }

    async fn delete(&self, key: &str) -> PersistenceResult<bool> {
        validate_key(key)?;

        match tokio::fs::remove_file(self.document_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
