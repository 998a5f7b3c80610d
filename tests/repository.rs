mod support;

use std::sync::Arc;

use marksync::{
   repository::Repository,
   store::{Backend, FileBackend, MemoryBackend, keys},
   types::{Page, Tag},
};
use support::{page, tag};
use tempfile::TempDir;

fn tag_repo(backend: &Arc<MemoryBackend>) -> Repository<Tag> {
   Repository::new(Arc::clone(backend) as Arc<dyn Backend>, keys::TAGS)
}

#[tokio::test]
async fn save_then_get_by_id_round_trips() {
   let backend = Arc::new(MemoryBackend::new());
   let repo = tag_repo(&backend);
   let mut t = tag("t1", "rust", 42);
   t.description = Some("systems".to_string());
   t.bindings.insert("t2".to_string());

   repo.save(t.clone()).await.expect("save");
   assert_eq!(repo.get_by_id("t1").await.expect("get"), Some(t.clone()));

   // Through the backend, not just the cache.
   let cold = tag_repo(&backend);
   assert_eq!(cold.get_by_id("t1").await.expect("get"), Some(t));
}

#[tokio::test]
async fn concurrent_first_reads_share_one_load() {
   let backend = Arc::new(MemoryBackend::new());
   tag_repo(&backend)
      .save_batch(vec![tag("a", "a", 1), tag("b", "b", 1)])
      .await
      .expect("seed");

   let repo = Arc::new(tag_repo(&backend));
   let before = backend.read_count();
   let readers: Vec<_> = (0..8)
      .map(|_| {
         let repo = Arc::clone(&repo);
         tokio::spawn(async move { repo.get_all().await.expect("get_all").len() })
      })
      .collect();
   for reader in readers {
      assert_eq!(reader.await.expect("join"), 2);
   }
   assert_eq!(backend.read_count() - before, 1);
}

#[tokio::test]
async fn invalidate_picks_up_external_writes() {
   let backend = Arc::new(MemoryBackend::new());
   let repo = tag_repo(&backend);
   repo.save(tag("a", "old", 1)).await.expect("save");

   let other = tag_repo(&backend);
   other.save(tag("a", "new", 2)).await.expect("external write");

   assert_eq!(repo.get_by_id("a").await.expect("get").map(|t| t.name), Some("old".into()));
   repo.invalidate_cache().await;
   assert_eq!(repo.get_by_id("a").await.expect("get").map(|t| t.name), Some("new".into()));
}

#[tokio::test]
async fn failed_write_surfaces_but_keeps_the_cache() {
   let backend = Arc::new(MemoryBackend::new());
   let repo = tag_repo(&backend);
   repo.save(tag("a", "a", 1)).await.expect("save");

   backend.fail_writes(true);
   assert!(repo.save(tag("b", "b", 1)).await.is_err());
   assert!(repo.get_by_id("b").await.expect("get").is_some());

   backend.fail_writes(false);
   repo.invalidate_cache().await;
   assert!(repo.get_by_id("b").await.expect("get").is_none());
}

#[tokio::test]
async fn failed_read_propagates() {
   let backend = Arc::new(MemoryBackend::new());
   backend.fail_reads(true);
   let repo = tag_repo(&backend);
   assert!(repo.get_all().await.is_err());

   backend.fail_reads(false);
   assert!(repo.get_all().await.expect("retry").is_empty());
}

#[tokio::test]
async fn delete_and_replace_all() {
   let backend = Arc::new(MemoryBackend::new());
   let repo = tag_repo(&backend);
   repo.save_batch(vec![tag("a", "a", 1), tag("b", "b", 1)]).await.expect("seed");

   assert!(repo.delete("a").await.expect("delete"));
   assert!(!repo.delete("a").await.expect("delete again"));

   repo.replace_all(vec![tag("c", "c", 1)]).await.expect("replace");
   let ids: Vec<_> = repo.get_all().await.expect("all").into_iter().map(|t| t.id).collect();
   assert_eq!(ids, vec!["c".to_string()]);
}

#[tokio::test]
async fn file_backend_persists_across_instances() {
   let dir = TempDir::new().expect("tempdir");
   let backend: Arc<dyn Backend> = Arc::new(FileBackend::new(dir.path().join("data")));
   let repo: Repository<Page> = Repository::new(Arc::clone(&backend), keys::PAGES);
   let p = page("page_1", "https://example.com", 7);
   repo.save(p.clone()).await.expect("save");

   let reopened: Repository<Page> =
      Repository::new(Arc::new(FileBackend::new(dir.path().join("data"))), keys::PAGES);
   assert_eq!(reopened.get_by_id("page_1").await.expect("get"), Some(p));
   assert!(dir.path().join("data").join(format!("{}.json", keys::PAGES)).exists());
}
