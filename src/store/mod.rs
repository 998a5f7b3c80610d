//! Key-value persistence abstraction with file and in-memory implementations.

mod file;
mod memory;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::error::StorageError;

/// Logical keys persisted by the local store and the sync engine.
pub mod keys {
   pub const TAGS: &str = "tags";
   pub const PAGES: &str = "pages";
   pub const PENDING_CHANGES: &str = "sync.pending_changes";
   pub const LAST_INCREMENTAL_AT: &str = "sync.last_incremental_at";
   pub const LAST_FULL_SYNC_AT: &str = "sync.last_full_sync_at";
   pub const SHADOW_MAP: &str = "sync.shadow_map";
   pub const SYNC_LOCK: &str = "sync.lock";
}

/// Narrow asynchronous key-value contract; every call may fail independently.
#[async_trait]
pub trait Backend: Send + Sync {
   async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

   async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

   async fn remove(&self, keys: &[&str]) -> Result<(), StorageError>;
}

/// Reads and decodes a typed value.
pub async fn load<T: DeserializeOwned>(
   backend: &dyn Backend,
   key: &str,
) -> Result<Option<T>, StorageError> {
   match backend.get(key).await? {
      Some(value) => serde_json::from_value(value)
         .map(Some)
         .map_err(|source| StorageError::Corrupt { key: key.to_string(), source }),
      None => Ok(None),
   }
}

/// Encodes and writes a typed value.
pub async fn save<T: Serialize + ?Sized>(
   backend: &dyn Backend,
   key: &str,
   value: &T,
) -> Result<(), StorageError> {
   let value = serde_json::to_value(value)
      .map_err(|e| StorageError::Write { key: key.to_string(), reason: e.to_string() })?;
   backend.set(key, value).await
}

/// Keys must map to a single file name.
pub(crate) fn is_valid_key(key: &str) -> bool {
   !key.is_empty()
      && !key.starts_with('.')
      && key
         .chars()
         .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn key_validation() {
      assert!(is_valid_key(keys::PENDING_CHANGES));
      assert!(is_valid_key("tags"));
      assert!(!is_valid_key("../tags"));
      assert!(!is_valid_key(".hidden"));
      assert!(!is_valid_key(""));
   }

   #[tokio::test]
   async fn typed_round_trip() {
      let backend = MemoryBackend::new();
      save(&backend, "numbers", &vec![1, 2, 3]).await.expect("save");
      let loaded: Option<Vec<i32>> = load(&backend, "numbers").await.expect("load");
      assert_eq!(loaded, Some(vec![1, 2, 3]));
   }

   #[tokio::test]
   async fn corrupt_value_is_reported() {
      let backend = MemoryBackend::new();
      backend.set("numbers", Value::String("nope".into())).await.expect("set");
      let err = load::<Vec<i32>>(&backend, "numbers").await.expect_err("corrupt");
      assert!(matches!(err, StorageError::Corrupt { .. }));
   }
}
