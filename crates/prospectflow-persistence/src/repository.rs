//! Repository contract shared by all storage backends

use async_trait::async_trait;

use crate::error::{PersistenceError, PersistenceResult};

/// Keyed storage for one aggregate type.
///
/// Keys are session ids. Implementations store clones so that callers never
/// hold references into the backend; read-modify-write sequences must be
/// serialized by the caller (see `SessionLocks` in `prospectflow-workflows`).
#[async_trait]
pub trait Repository<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Insert or overwrite the value stored under `key`
    async fn save(&self, key: &str, value: &T) -> PersistenceResult<()>;

    /// Load the value stored under `key`
    async fn find(&self, key: &str) -> PersistenceResult<Option<T>>;

    /// Load every stored value with the key it was saved under (unordered)
    async fn list_entries(&self) -> PersistenceResult<Vec<(String, T)>>;

    /// Load every stored value (unordered)
    async fn list(&self) -> PersistenceResult<Vec<T>> {
        Ok(self
            .list_entries()
            .await?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Remove the value stored under `key`, returning whether it existed
    async fn delete(&self, key: &str) -> PersistenceResult<bool>;

    /// Number of stored values
    async fn count(&self) -> PersistenceResult<usize> {
        Ok(self.list().await?.len())
    }

    /// Whether a value is stored under `key`
    async fn exists(&self, key: &str) -> PersistenceResult<bool> {
        Ok(self.find(key).await?.is_some())
    }
}

/// Reject keys that cannot be mapped to a single storage slot.
///
/// Keys end up as file names in the JSON backend, so path separators and
/// relative components are refused for every backend alike.
pub fn validate_key(key: &str) -> PersistenceResult<()> {
    if key.is_empty() {
        return Err(PersistenceError::InvalidKey("key cannot be empty".to_string()));
    }

    if key == "." || key == ".." {
        return Err(PersistenceError::InvalidKey(format!(
            "'{}' is a reserved path component",
            key
        )));
    }

    if key
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(PersistenceError::InvalidKey(format!(
            "'{}' contains path separators or control characters",
            key
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_validate_key_accepts_uuid() {
        assert!(validate_key("6f1c2b8e-7f5b-4a8c-9d41-2c1b7e9a0f11").is_ok());
    }

    #[test]
    fn test_validate_key_rejects_empty_and_traversal() {
        assert!(validate_key("").is_err());
        assert!(validate_key("..").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a\\b").is_err());
    }

    proptest! {
        #[test]
        fn prop_alphanumeric_keys_are_valid(key in "[a-zA-Z0-9_-]{1,40}") {
            prop_assert!(validate_key(&key).is_ok());
        }

        #[test]
        fn prop_keys_with_slash_are_rejected(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
            let key = format!("{}/{}", prefix, suffix);
            prop_assert!(validate_key(&key).is_err());
        }
    }
}
