mod support;

use marksync::{
   merge::{merge, pending_delete_key},
   types::{Dataset, EntityKind, Tag},
};
use proptest::prelude::*;
use support::{dataset, page, tag};

fn arb_tag() -> impl Strategy<Value = Tag> {
   ("[a-e]", "[a-z]{1,8}", 1i64..1_000, any::<bool>()).prop_map(|(id, name, at, deleted)| {
      let mut t = tag(&id, &name, at);
      t.deleted = deleted;
      t
   })
}

fn arb_dataset() -> impl Strategy<Value = Dataset> {
   prop::collection::vec(arb_tag(), 0..6).prop_map(|tags| dataset(tags, vec![]))
}

fn arb_deletes() -> impl Strategy<Value = Vec<String>> {
   prop::collection::vec("[a-e]", 0..3).prop_map(|ids| {
      ids.iter()
         .map(|id| pending_delete_key(EntityKind::Tag, id))
         .collect()
   })
}

proptest! {
   #[test]
   fn merge_is_stable(local in arb_dataset(), remote in arb_dataset(), deletes in arb_deletes()) {
      let once = merge(&local, &remote, &deletes);
      let twice = merge(&once, &remote, &deletes);
      prop_assert_eq!(once, twice);
   }

   #[test]
   fn pending_deletes_never_come_back(
      local in arb_dataset(),
      remote in arb_dataset(),
      deletes in arb_deletes(),
   ) {
      let merged = merge(&local, &remote, &deletes);
      for key in &deletes {
         let id = key.trim_start_matches("tag:");
         prop_assert!(!merged.tags.contains_key(id));
      }
   }

   #[test]
   fn output_holds_only_live_entities(local in arb_dataset(), remote in arb_dataset()) {
      let merged = merge(&local, &remote, &[]);
      prop_assert!(merged.tags.values().all(|t| !t.deleted));
   }

   #[test]
   fn newer_copy_wins(t1 in 1i64..1_000, delta in 0i64..1_000, local_is_newer in any::<bool>()) {
      let t2 = t1 + delta;
      let (lt, rt) = if local_is_newer { (t2, t1) } else { (t1, t2) };
      let local = dataset(vec![tag("a", "local", lt)], vec![]);
      let remote = dataset(vec![tag("a", "remote", rt)], vec![]);

      let merged = merge(&local, &remote, &[]);
      let expected = if delta == 0 || local_is_newer { "local" } else { "remote" };
      prop_assert_eq!(&merged.tags["a"].name, expected);
      prop_assert_eq!(merged.tags["a"].updated_at, t2);
   }
}

#[test]
fn remote_tombstone_wins_over_newer_local() {
   let local = dataset(vec![tag("a", "mine", 900)], vec![]);
   let mut gone = tag("a", "theirs", 10);
   gone.deleted = true;
   let remote = dataset(vec![gone], vec![]);
   assert!(merge(&local, &remote, &[]).tags.is_empty());
}

#[test]
fn one_sided_entities_are_kept() {
   let local = dataset(vec![tag("a", "local only", 5)], vec![page("p1", "https://a.test", 5)]);
   let remote = dataset(vec![tag("b", "remote only", 5)], vec![page("p2", "https://b.test", 5)]);
   let merged = merge(&local, &remote, &[]);
   assert_eq!(merged.tags.len(), 2);
   assert_eq!(merged.pages.len(), 2);
}

#[test]
fn page_deletes_are_scoped_to_pages() {
   let remote = dataset(vec![tag("x", "tag", 5)], vec![page("x", "https://x.test", 5)]);
   let merged = merge(&Dataset::default(), &remote, &[pending_delete_key(EntityKind::Page, "x")]);
   assert!(merged.pages.is_empty());
   assert!(merged.tags.contains_key("x"));
}
