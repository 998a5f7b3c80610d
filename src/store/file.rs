//! JSON-file backend: one document per key under a profile directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use super::{Backend, is_valid_key};
use crate::{error::StorageError, util};

#[derive(Debug, Clone)]
pub struct FileBackend {
   root: PathBuf,
}

impl FileBackend {
   pub fn new(root: impl Into<PathBuf>) -> Self {
      Self { root: root.into() }
   }

   pub fn root(&self) -> &Path {
      &self.root
   }

   fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
      if !is_valid_key(key) {
         return Err(StorageError::Write {
            key:    key.to_string(),
            reason: "invalid key".to_string(),
         });
      }
      Ok(self.root.join(format!("{key}.json")))
   }
}

#[async_trait]
impl Backend for FileBackend {
   async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
      let path = self.path_for(key)?;
      let raw = match tokio::fs::read(&path).await {
         Ok(raw) => raw,
         Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
         Err(e) => {
            return Err(StorageError::Read { key: key.to_string(), reason: e.to_string() });
         },
      };
      serde_json::from_slice(&raw)
         .map(Some)
         .map_err(|source| StorageError::Corrupt { key: key.to_string(), source })
   }

   async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
      let path = self.path_for(key)?;
      let data = serde_json::to_vec_pretty(&value)
         .map_err(|e| StorageError::Write { key: key.to_string(), reason: e.to_string() })?;
      let owned_key = key.to_string();
      tokio::task::spawn_blocking(move || util::write_atomic(&path, &data))
         .await
         .map_err(|e| StorageError::Write { key: owned_key.clone(), reason: e.to_string() })?
         .map_err(|e| StorageError::Write { key: owned_key, reason: e.to_string() })
   }

   async fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
      for key in keys {
         let path = self.path_for(key)?;
         match tokio::fs::remove_file(&path).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => {
               return Err(StorageError::Write { key: (*key).to_string(), reason: e.to_string() });
            },
         }
      }
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use serde_json::json;

   use super::*;

   #[tokio::test]
   async fn set_get_remove() {
      let dir = tempfile::tempdir().expect("tempdir");
      let backend = FileBackend::new(dir.path().join("profile"));

      assert_eq!(backend.get("tags").await.expect("get"), None);
      backend.set("tags", json!({"a": 1})).await.expect("set");
      assert_eq!(backend.get("tags").await.expect("get"), Some(json!({"a": 1})));

      backend.remove(&["tags", "missing"]).await.expect("remove");
      assert_eq!(backend.get("tags").await.expect("get"), None);
   }

   #[tokio::test]
   async fn rejects_path_traversal() {
      let dir = tempfile::tempdir().expect("tempdir");
      let backend = FileBackend::new(dir.path());
      assert!(backend.set("../escape", json!(1)).await.is_err());
   }
}
