//! Durable queue of changes awaiting upload.
//!
//! Every operation loads, mutates, and persists the queue while holding one
//! mutex, so racing producers never lose each other's entries.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
   Result,
   store::{self, Backend, keys},
   types::{ChangeOp, PendingChange},
};

pub struct PendingQueue {
   backend: Arc<dyn Backend>,
   lock:    Mutex<()>,
}

impl PendingQueue {
   pub fn new(backend: Arc<dyn Backend>) -> Self {
      Self { backend, lock: Mutex::new(()) }
   }

   async fn read(&self) -> Result<Vec<PendingChange>> {
      Ok(store::load(self.backend.as_ref(), keys::PENDING_CHANGES)
         .await?
         .unwrap_or_default())
   }

   async fn write(&self, entries: &[PendingChange]) -> Result<()> {
      store::save(self.backend.as_ref(), keys::PENDING_CHANGES, entries).await?;
      Ok(())
   }

   pub async fn entries(&self) -> Result<Vec<PendingChange>> {
      let _guard = self.lock.lock().await;
      self.read().await
   }

   pub async fn len(&self) -> Result<usize> {
      Ok(self.entries().await?.len())
   }

   /// The queued change for `entity_key`. Coalescing keeps at most one.
   pub async fn get(&self, entity_key: &str) -> Result<Option<PendingChange>> {
      Ok(self
         .entries()
         .await?
         .into_iter()
         .find(|c| c.entity_key() == entity_key))
   }

   /// Appends `change`, replacing any queued entry for the same entity.
   pub async fn enqueue(&self, change: PendingChange) -> Result<()> {
      let _guard = self.lock.lock().await;
      let mut entries = self.read().await?;
      coalesce(&mut entries, change);
      self.write(&entries).await
   }

   /// Removes entries that were delivered, unless they were superseded meanwhile.
   pub async fn remove_delivered(&self, delivered: &[PendingChange]) -> Result<()> {
      if delivered.is_empty() {
         return Ok(());
      }
      let _guard = self.lock.lock().await;
      let mut entries = self.read().await?;
      entries.retain(|e| !delivered.contains(e));
      self.write(&entries).await
   }

   /// Entity keys with a queued delete (`tag:<id>`, `page:<id>`).
   pub async fn delete_keys(&self) -> Result<Vec<String>> {
      Ok(self
         .entries()
         .await?
         .iter()
         .filter(|c| c.operation == ChangeOp::Delete)
         .map(PendingChange::entity_key)
         .collect())
   }
}

fn coalesce(entries: &mut Vec<PendingChange>, mut change: PendingChange) {
   let key = change.entity_key();
   if let Some(pos) = entries.iter().position(|e| e.entity_key() == key) {
      let previous = entries.remove(pos);
      // Never-uploaded creates stay creates.
      if previous.operation == ChangeOp::Create && change.operation == ChangeOp::Update {
         change.operation = ChangeOp::Create;
      }
   }
   entries.push(change);
}

#[cfg(test)]
mod tests {
   use serde_json::json;

   use super::*;
   use crate::{store::MemoryBackend, types::EntityKind};

   fn change(id: &str, operation: ChangeOp, timestamp: i64) -> PendingChange {
      PendingChange {
         entity_type: EntityKind::Tag,
         operation,
         entity_id: id.to_string(),
         payload_snapshot: json!({ "id": id, "ts": timestamp }),
         timestamp,
      }
   }

   #[tokio::test]
   async fn coalesces_by_entity() {
      let queue = PendingQueue::new(Arc::new(MemoryBackend::new()));
      queue.enqueue(change("a", ChangeOp::Create, 1)).await.expect("enqueue");
      queue.enqueue(change("b", ChangeOp::Update, 2)).await.expect("enqueue");
      queue.enqueue(change("a", ChangeOp::Update, 3)).await.expect("enqueue");

      let entries = queue.entries().await.expect("entries");
      assert_eq!(entries.len(), 2);
      let a = queue.get("tag:a").await.expect("get").expect("a queued");
      assert_eq!(a.operation, ChangeOp::Create);
      assert_eq!(a.timestamp, 3);
      assert!(queue.get("tag:missing").await.expect("get").is_none());

      queue.enqueue(change("a", ChangeOp::Delete, 4)).await.expect("enqueue");
      assert_eq!(queue.delete_keys().await.expect("keys"), vec!["tag:a".to_string()]);
   }

   #[tokio::test]
   async fn superseded_entries_survive_delivery() {
      let queue = PendingQueue::new(Arc::new(MemoryBackend::new()));
      let first = change("a", ChangeOp::Update, 1);
      queue.enqueue(first.clone()).await.expect("enqueue");
      queue.enqueue(change("a", ChangeOp::Update, 2)).await.expect("enqueue");
      queue.remove_delivered(&[first]).await.expect("remove");
      assert_eq!(queue.len().await.expect("len"), 1);
   }
}
