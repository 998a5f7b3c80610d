mod support;

use std::sync::Arc;

use marksync::{
   local_store::{LocalStore, PageInput},
   repository::Repositories,
   store::{Backend, MemoryBackend},
   types::ChangeOp,
};
use proptest::prelude::*;

fn repos(backend: &Arc<MemoryBackend>) -> Arc<Repositories> {
   Arc::new(Repositories::new(Arc::clone(backend) as Arc<dyn Backend>))
}

fn fresh_store() -> LocalStore {
   LocalStore::new(repos(&Arc::new(MemoryBackend::new())))
}

fn page_input(url: &str) -> PageInput {
   PageInput { url: url.to_string(), title: "Example".to_string(), ..PageInput::default() }
}

proptest! {
   #[test]
   fn created_tag_names_are_trimmed_and_collapsed(
      lead in "[ \t]{0,3}",
      words in prop::collection::vec("[a-zA-Z0-9]{1,10}", 1..4),
      gaps in prop::collection::vec("[ \t]{1,3}", 3),
      tail in "[ \t]{0,3}",
   ) {
      let mut raw = lead;
      for (i, word) in words.iter().enumerate() {
         if i > 0 {
            raw.push_str(&gaps[i - 1]);
         }
         raw.push_str(word);
      }
      raw.push_str(&tail);

      let mut store = fresh_store();
      let tag = store.create_tag(&raw).expect("valid name");
      prop_assert_eq!(tag.name, words.join(" "));
      prop_assert!(tag.bindings.is_empty());
   }

   #[test]
   fn names_over_the_limit_are_rejected(len in 51usize..80) {
      let mut store = fresh_store();
      prop_assert!(store.create_tag(&"x".repeat(len)).is_err());
   }
}

#[test]
fn blank_names_are_rejected() {
   let mut store = fresh_store();
   for raw in ["", "   ", "\t\n"] {
      assert!(store.create_tag(raw).is_err(), "{raw:?} should be rejected");
   }
   assert!(store.take_changes().is_empty());
}

#[test]
fn delete_tag_cascades_to_pages_and_bindings() {
   let mut store = fresh_store();
   let doomed = store.create_tag("doomed").expect("tag");
   let friend = store.create_tag("friend").expect("tag");
   assert!(store.bind_tags(&doomed.id, &friend.id).expect("bind"));

   let mut page_ids = Vec::new();
   for url in ["https://a.test/one", "https://b.test/two"] {
      let page = store.create_or_update_page(page_input(url)).expect("page");
      assert!(store.add_tag_to_page(&page.id, &doomed.id));
      assert!(store.add_tag_to_page(&page.id, &friend.id));
      page_ids.push(page.id);
   }
   store.take_changes();

   assert!(store.delete_tag(&doomed.id));
   assert!(!store.delete_tag(&doomed.id));

   for page in store.get_all_pages() {
      assert!(!page.tags.contains(&doomed.id));
      assert!(page.tags.contains(&friend.id));
   }
   for tag in store.get_all_tags() {
      assert!(!tag.bindings.contains(&doomed.id));
   }

   let changes = store.take_changes();
   let deletes: Vec<_> = changes.iter().filter(|c| c.operation == ChangeOp::Delete).collect();
   assert_eq!(deletes.len(), 1);
   assert_eq!(deletes[0].id, doomed.id);
   assert_eq!(changes.len(), 1 + page_ids.len() + 1);
}

#[test]
fn page_upsert_keeps_tags_and_manual_titles() {
   let mut store = fresh_store();
   let tag = store.create_tag("reading").expect("tag");
   let page = store
      .create_or_update_page(page_input("https://Example.com/post#intro"))
      .expect("page");
   assert_eq!(page.domain, "example.com");
   store.add_tag_to_page(&page.id, &tag.id);
   store.update_page_title(&page.id, "My title", marksync::types::TitleSource::Manual);

   let again = store
      .create_or_update_page(PageInput {
         url:     "https://example.com/post".to_string(),
         title:   "Fetched title".to_string(),
         favicon: Some("https://example.com/icon.png".to_string()),
         ..PageInput::default()
      })
      .expect("page");
   assert_eq!(again.id, page.id);
   assert_eq!(again.title, "My title");
   assert!(again.tags.contains(&tag.id));
   assert_eq!(again.favicon.as_deref(), Some("https://example.com/icon.png"));
   assert!(again.updated_at > page.updated_at);
   assert_eq!(store.get_all_pages().len(), 1);
}

#[test]
fn page_tag_ops_need_both_ids() {
   let mut store = fresh_store();
   let page = store.create_or_update_page(page_input("https://a.test")).expect("page");
   assert!(!store.add_tag_to_page(&page.id, "missing-tag"));
   let tag = store.create_tag("t").expect("tag");
   assert!(!store.add_tag_to_page("missing-page", &tag.id));
   assert!(!store.remove_tag_from_page("missing-page", &tag.id));
}

#[test]
fn initialize_only_seeds_once() {
   let mut store = fresh_store();
   let seed = support::dataset(vec![support::tag("t1", "seed", 5)], vec![]);
   assert!(store.initialize(seed));
   assert!(!store.initialize(support::dataset(vec![support::tag("t2", "other", 5)], vec![])));
   assert_eq!(store.get_all_tags().len(), 1);
   assert!(store.get_tag("t1").is_some());
}

#[tokio::test]
async fn committed_data_survives_clear_and_reload() {
   let backend = Arc::new(MemoryBackend::new());
   let mut store = LocalStore::new(repos(&backend));

   let tag = store.create_tag("Frontend").expect("tag");
   let page = store
      .create_or_update_page(page_input("https://example.com"))
      .expect("page");
   assert!(store.add_tag_to_page(&page.id, &tag.id));
   store.commit().await.expect("commit");

   store.clear_all_data();
   assert!(store.get_all_tags().is_empty());
   store.load().await.expect("reload");

   let tags = store.get_all_tags();
   let pages = store.get_all_pages();
   assert_eq!(tags.len(), 1);
   assert_eq!(pages.len(), 1);
   assert!(pages[0].tags.contains(&tags[0].id));

   // A second process reading the same backend sees the same thing.
   let mut other = LocalStore::new(repos(&backend));
   other.load().await.expect("load");
   assert_eq!(other.snapshot(), store.snapshot());
}

#[tokio::test]
async fn uncommitted_changes_are_lost_on_reload() {
   let mut store = fresh_store();
   store.create_tag("kept").expect("tag");
   store.commit().await.expect("commit");
   store.create_tag("dropped").expect("tag");
   store.load().await.expect("reload");
   let names: Vec<_> = store.get_all_tags().into_iter().map(|t| t.name).collect();
   assert_eq!(names, vec!["kept".to_string()]);
}
