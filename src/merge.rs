//! Last-write-wins merge of a local and a remote dataset.
//!
//! Pure: no I/O, no clock. Pending deletes always win, then remote
//! tombstones, then the newer `updated_at` with ties going to the local copy.

use std::collections::{BTreeMap, HashSet};

use crate::types::{Dataset, Entity, EntityKind};

/// Entity key used in the pending-delete list (`tag:<id>`, `page:<id>`).
pub fn pending_delete_key(kind: EntityKind, id: &str) -> String {
   kind.entity_key(id)
}

/// Merges `local` and `remote` into a dataset holding only live entities.
pub fn merge(local: &Dataset, remote: &Dataset, pending_deletes: &[String]) -> Dataset {
   let deletes: HashSet<&str> = pending_deletes.iter().map(String::as_str).collect();
   Dataset {
      tags:  merge_family(&local.tags, &remote.tags, &deletes),
      pages: merge_family(&local.pages, &remote.pages, &deletes),
   }
}

fn merge_family<T: Entity>(
   local: &BTreeMap<String, T>,
   remote: &BTreeMap<String, T>,
   deletes: &HashSet<&str>,
) -> BTreeMap<String, T> {
   let mut merged = BTreeMap::new();
   for id in local.keys().chain(remote.keys()) {
      if merged.contains_key(id) || deletes.contains(T::KIND.entity_key(id).as_str()) {
         continue;
      }
      // Local tombstones travel through the pending-delete list, not the graph.
      let mine = local.get(id).filter(|e| !e.is_deleted());
      let theirs = remote.get(id);

      let winner = match (mine, theirs) {
         (_, Some(r)) if r.is_deleted() => None,
         (Some(l), Some(r)) => Some(if l.updated_at() >= r.updated_at() { l } else { r }),
         (Some(l), None) => Some(l),
         (None, Some(r)) => Some(r),
         (None, None) => None,
      };
      if let Some(winner) = winner {
         merged.insert(id.clone(), winner.clone());
      }
   }
   merged
}
