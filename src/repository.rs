//! Per-entity persistence with a lazily loaded, write-through read cache.
//!
//! Each repository owns one backend key holding an `id -> entity` JSON map.
//! The first read loads that map into memory; concurrent first readers share
//! the same in-flight load. Writes update the cache before persisting, and
//! persists are serialized so the backend never ends up with an older
//! snapshot than one already written.

use std::{collections::BTreeMap, marker::PhantomData, sync::Arc};

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::{
   Result,
   error::Error,
   store::{self, Backend},
   types::{Entity, Page, Tag},
};

type Entries<T> = Arc<RwLock<BTreeMap<String, T>>>;

pub struct Repository<T: Entity> {
   backend:      Arc<dyn Backend>,
   key:          &'static str,
   cache:        moka::future::Cache<(), Entries<T>>,
   persist_lock: Mutex<()>,
   _marker:      PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
   pub fn new(backend: Arc<dyn Backend>, key: &'static str) -> Self {
      Self {
         backend,
         key,
         cache: moka::future::Cache::builder().initial_capacity(1).build(),
         persist_lock: Mutex::new(()),
         _marker: PhantomData,
      }
   }

   async fn entries(&self) -> Result<Entries<T>> {
      let backend = Arc::clone(&self.backend);
      let key = self.key;
      self
         .cache
         .try_get_with((), async move {
            tracing::debug!(key, "loading repository from backend");
            let map: BTreeMap<String, T> =
               store::load(backend.as_ref(), key).await?.unwrap_or_default();
            Ok::<_, Error>(Arc::new(RwLock::new(map)))
         })
         .await
         .map_err(Error::Shared)
   }

   async fn persist(&self, entries: &Entries<T>) -> Result<()> {
      let _guard = self.persist_lock.lock().await;
      let value = serde_json::to_value(&*entries.read())?;
      self.backend.set(self.key, value).await.map_err(|e| {
         tracing::warn!(key = self.key, "persist failed: {e}");
         e.into()
      })
   }

   pub async fn get_all(&self) -> Result<Vec<T>> {
      let entries = self.entries().await?;
      let all = entries.read().values().cloned().collect();
      Ok(all)
   }

   pub async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
      let entries = self.entries().await?;
      let found = entries.read().get(id).cloned();
      Ok(found)
   }

   pub async fn save(&self, item: T) -> Result<()> {
      let entries = self.entries().await?;
      entries.write().insert(item.id().to_string(), item);
      self.persist(&entries).await
   }

   pub async fn save_batch(&self, items: Vec<T>) -> Result<()> {
      if items.is_empty() {
         return Ok(());
      }
      let entries = self.entries().await?;
      {
         let mut map = entries.write();
         for item in items {
            map.insert(item.id().to_string(), item);
         }
      }
      self.persist(&entries).await
   }

   /// Returns whether the id was present.
   pub async fn delete(&self, id: &str) -> Result<bool> {
      let entries = self.entries().await?;
      let removed = entries.write().remove(id).is_some();
      if removed {
         self.persist(&entries).await?;
      }
      Ok(removed)
   }

   /// Makes the stored set exactly `items`, dropping anything else.
   pub async fn replace_all(&self, items: Vec<T>) -> Result<()> {
      let entries = self.entries().await?;
      {
         let mut map = entries.write();
         map.clear();
         for item in items {
            map.insert(item.id().to_string(), item);
         }
      }
      self.persist(&entries).await
   }

   /// Forces the next read to reload from the backend.
   pub async fn invalidate_cache(&self) {
      self.cache.invalidate(&()).await;
   }
}

/// The two entity repositories sharing one backend.
pub struct Repositories {
   pub tags:  Repository<Tag>,
   pub pages: Repository<Page>,
}

impl Repositories {
   pub fn new(backend: Arc<dyn Backend>) -> Self {
      Self {
         tags:  Repository::new(Arc::clone(&backend), store::keys::TAGS),
         pages: Repository::new(backend, store::keys::PAGES),
      }
   }

   pub async fn invalidate_cache(&self) {
      self.tags.invalidate_cache().await;
      self.pages.invalidate_cache().await;
   }
}

#[cfg(test)]
mod tests {
   use std::collections::BTreeSet;

   use super::*;
   use crate::store::MemoryBackend;

   fn tag(id: &str, name: &str) -> Tag {
      Tag {
         id:          id.to_string(),
         name:        name.to_string(),
         description: None,
         color:       None,
         bindings:    BTreeSet::new(),
         created_at:  1,
         updated_at:  1,
         deleted:     false,
      }
   }

   #[tokio::test]
   async fn delete_reports_presence() {
      let backend = Arc::new(MemoryBackend::new());
      let repo: Repository<Tag> = Repository::new(backend, store::keys::TAGS);
      repo.save(tag("a", "A")).await.expect("save");
      assert!(repo.delete("a").await.expect("delete"));
      assert!(!repo.delete("a").await.expect("delete again"));
      assert!(repo.get_all().await.expect("all").is_empty());
   }

   #[tokio::test]
   async fn replace_all_drops_missing() {
      let backend = Arc::new(MemoryBackend::new());
      let repo: Repository<Tag> = Repository::new(backend, store::keys::TAGS);
      repo
         .save_batch(vec![tag("a", "A"), tag("b", "B")])
         .await
         .expect("batch");
      repo.replace_all(vec![tag("b", "B2")]).await.expect("replace");
      let all = repo.get_all().await.expect("all");
      assert_eq!(all.len(), 1);
      assert_eq!(all[0].name, "B2");
   }
}
