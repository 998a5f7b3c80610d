//! In-memory backend used by tests and throwaway profiles.

use std::{
   collections::HashMap,
   sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::Backend;
use crate::error::StorageError;

#[derive(Debug, Default)]
pub struct MemoryBackend {
   values:      Mutex<HashMap<String, Value>>,
   fail_reads:  AtomicBool,
   fail_writes: AtomicBool,
   reads:       AtomicUsize,
}

impl MemoryBackend {
   pub fn new() -> Self {
      Self::default()
   }

   /// Makes subsequent reads fail until reset.
   pub fn fail_reads(&self, fail: bool) {
      self.fail_reads.store(fail, Ordering::SeqCst);
   }

   /// Makes subsequent writes and removals fail until reset.
   pub fn fail_writes(&self, fail: bool) {
      self.fail_writes.store(fail, Ordering::SeqCst);
   }

   /// Number of `get` calls served so far.
   pub fn read_count(&self) -> usize {
      self.reads.load(Ordering::SeqCst)
   }

   pub fn contains(&self, key: &str) -> bool {
      self.values.lock().contains_key(key)
   }

   /// Writes directly, bypassing failure injection.
   pub fn insert_raw(&self, key: &str, value: Value) {
      self.values.lock().insert(key.to_string(), value);
   }
}

#[async_trait]
impl Backend for MemoryBackend {
   async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
      self.reads.fetch_add(1, Ordering::SeqCst);
      // Yield so concurrent loaders genuinely overlap.
      tokio::task::yield_now().await;
      if self.fail_reads.load(Ordering::SeqCst) {
         return Err(StorageError::Read { key: key.to_string(), reason: "injected".to_string() });
      }
      Ok(self.values.lock().get(key).cloned())
   }

   async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
      if self.fail_writes.load(Ordering::SeqCst) {
         return Err(StorageError::Write { key: key.to_string(), reason: "injected".to_string() });
      }
      self.values.lock().insert(key.to_string(), value);
      Ok(())
   }

   async fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
      if self.fail_writes.load(Ordering::SeqCst) {
         return Err(StorageError::Write {
            key:    keys.join(","),
            reason: "injected".to_string(),
         });
      }
      let mut values = self.values.lock();
      for key in keys {
         values.remove(*key);
      }
      Ok(())
   }
}
