//! Single-flight guard for sync runs.
//!
//! The in-process flag is claimed with a compare-and-swap before any await.
//! A persisted `{holder, acquiredAtMs}` record then keeps a second process on
//! the same profile out, and expires after a TTL if its holder died.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::{
   Result,
   store::{self, Backend, keys},
   util::now_millis,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
   pub holder:         String,
   pub acquired_at_ms: i64,
}

impl LockRecord {
   fn is_stale(&self, now_ms: i64, ttl_ms: u64) -> bool {
      now_ms.saturating_sub(self.acquired_at_ms) > ttl_ms as i64
   }
}

pub struct SyncLock {
   holder: String,
   ttl_ms: u64,
   held:   AtomicBool,
}

impl SyncLock {
   pub fn new(ttl_ms: u64) -> Self {
      Self { holder: uuid::Uuid::new_v4().to_string(), ttl_ms, held: AtomicBool::new(false) }
   }

   pub fn holder(&self) -> &str {
      &self.holder
   }

   pub fn is_held(&self) -> bool {
      self.held.load(Ordering::SeqCst)
   }

   /// Returns `None` when another run (here or in another process) holds it.
   pub async fn try_acquire(&self, backend: &dyn Backend) -> Result<Option<SyncGuard<'_>>> {
      if self
         .held
         .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
         .is_err()
      {
         return Ok(None);
      }
      let guard = SyncGuard { lock: self };

      let now = now_millis();
      let existing: Option<LockRecord> = store::load(backend, keys::SYNC_LOCK).await?;
      if let Some(record) = existing {
         if record.holder != self.holder && !record.is_stale(now, self.ttl_ms) {
            tracing::debug!(holder = %record.holder, "sync lock held by another process");
            return Ok(None);
         }
         if record.holder != self.holder {
            tracing::warn!(holder = %record.holder, "taking over stale sync lock");
         }
      }

      let record = LockRecord { holder: self.holder.clone(), acquired_at_ms: now };
      store::save(backend, keys::SYNC_LOCK, &record).await?;
      Ok(Some(guard))
   }
}

/// Clears the in-process flag on drop. Call [`SyncGuard::release`] to also
/// remove the persisted record.
pub struct SyncGuard<'a> {
   lock: &'a SyncLock,
}

impl SyncGuard<'_> {
   pub async fn release(self, backend: &dyn Backend) {
      if let Err(e) = backend.remove(&[keys::SYNC_LOCK]).await {
         tracing::warn!("failed to clear sync lock record: {e}");
      }
   }
}

impl Drop for SyncGuard<'_> {
   fn drop(&mut self) {
      self.lock.held.store(false, Ordering::SeqCst);
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::store::MemoryBackend;

   #[tokio::test]
   async fn second_acquire_is_refused_until_release() {
      let backend = MemoryBackend::new();
      let lock = SyncLock::new(60_000);
      let guard = lock.try_acquire(&backend).await.expect("acquire").expect("free");
      assert!(lock.try_acquire(&backend).await.expect("acquire").is_none());
      guard.release(&backend).await;
      assert!(!lock.is_held());
      assert!(!backend.contains(keys::SYNC_LOCK));
      assert!(lock.try_acquire(&backend).await.expect("acquire").is_some());
   }

   #[tokio::test]
   async fn fresh_foreign_record_blocks_and_stale_one_does_not() {
      let backend = MemoryBackend::new();
      let lock = SyncLock::new(60_000);

      let foreign = LockRecord { holder: "other".into(), acquired_at_ms: now_millis() };
      store::save(&backend, keys::SYNC_LOCK, &foreign).await.expect("save");
      assert!(lock.try_acquire(&backend).await.expect("acquire").is_none());
      assert!(!lock.is_held());

      let stale = LockRecord { holder: "other".into(), acquired_at_ms: now_millis() - 120_000 };
      store::save(&backend, keys::SYNC_LOCK, &stale).await.expect("save");
      let guard = lock.try_acquire(&backend).await.expect("acquire");
      assert!(guard.is_some());
   }
}
