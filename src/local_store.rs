//! Authoritative in-memory tag/page graph with referential integrity.
//!
//! All mutations are synchronous and applied in call order. Durability only
//! happens on [`LocalStore::commit`]. Every mutation that should replicate
//! records a [`LocalChange`] in an outbox the owner drains with
//! [`LocalStore::take_changes`].

use std::{
   collections::{BTreeMap, BTreeSet, HashMap},
   sync::Arc,
};

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::{
   Result,
   config::MAX_TAG_NAME_CHARS,
   error::ValidationError,
   repository::Repositories,
   types::{
      ChangeOp, Dataset, Entity, LocalChange, Page, PageId, Tag, TagId, TagWithUsage,
      TitleSource, UserStats,
   },
   util::now_millis,
};

/// Trims, enforces the length limit, and collapses inner whitespace runs.
pub fn normalize_tag_name(raw: &str, max_chars: usize) -> Result<String, ValidationError> {
   let trimmed = raw.trim();
   if trimmed.is_empty() {
      return Err(ValidationError::EmptyTagName);
   }
   let len = trimmed.chars().count();
   if len > max_chars {
      return Err(ValidationError::TagNameTooLong { len, max: max_chars });
   }
   Ok(trimmed.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Canonical form of a page URL: no fragment, no trailing slash.
pub fn normalize_url(raw: &str) -> Result<Url, ValidationError> {
   let mut url = Url::parse(raw.trim())
      .map_err(|e| ValidationError::InvalidUrl(format!("{}: {e}", raw.trim())))?;
   url.set_fragment(None);
   Ok(url)
}

/// Content-addressed page id derived from the normalized URL.
pub fn page_id_for_url(raw: &str) -> Result<PageId, ValidationError> {
   let url = normalize_url(raw)?;
   let mut canonical = url.as_str().to_string();
   if url.query().is_none() {
      while canonical.ends_with('/') && !canonical.ends_with("://") {
         canonical.pop();
      }
   }
   let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
   Ok(format!("page_{}", &digest[..16]))
}

/// Input for [`LocalStore::create_or_update_page`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInput {
   pub url:     String,
   pub title:   String,
   #[serde(default)]
   pub domain:  Option<String>,
   #[serde(default)]
   pub favicon: Option<String>,
}

/// Optional field updates for [`LocalStore::update_tag`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagPatch {
   #[serde(default)]
   pub name:        Option<String>,
   #[serde(default)]
   pub description: Option<String>,
   #[serde(default)]
   pub color:       Option<String>,
}

pub struct LocalStore {
   repos:              Arc<Repositories>,
   tags:               BTreeMap<TagId, Tag>,
   pages:              BTreeMap<PageId, Page>,
   initialized:        bool,
   max_tag_name_chars: usize,
   outbox:             Vec<LocalChange>,
}

impl LocalStore {
   pub fn new(repos: Arc<Repositories>) -> Self {
      Self::with_tag_limit(repos, MAX_TAG_NAME_CHARS)
   }

   pub fn with_tag_limit(repos: Arc<Repositories>, max_tag_name_chars: usize) -> Self {
      Self {
         repos,
         tags: BTreeMap::new(),
         pages: BTreeMap::new(),
         initialized: false,
         max_tag_name_chars,
         outbox: Vec::new(),
      }
   }

   pub const fn is_initialized(&self) -> bool {
      self.initialized
   }

   /// Seeds the graphs once; later calls are ignored. Returns whether it applied.
   pub fn initialize(&mut self, seed: Dataset) -> bool {
      if self.initialized {
         return false;
      }
      self.replace_graphs(seed);
      true
   }

   /// Replaces the graphs with `data` (e.g. a merged sync result).
   pub fn update_data(&mut self, data: Dataset) {
      self.replace_graphs(data);
   }

   fn replace_graphs(&mut self, data: Dataset) {
      self.tags = data.tags.into_iter().filter(|(_, t)| !t.deleted).collect();
      self.pages = data.pages.into_iter().filter(|(_, p)| !p.deleted).collect();
      self.repair_integrity();
      self.initialized = true;
   }

   /// Reloads the graphs from the repository layer.
   pub async fn load(&mut self) -> Result<()> {
      let tags = self.repos.tags.get_all().await?;
      let pages = self.repos.pages.get_all().await?;
      let data = Dataset {
         tags:  tags.into_iter().map(|t| (t.id.clone(), t)).collect(),
         pages: pages.into_iter().map(|p| (p.id.clone(), p)).collect(),
      };
      tracing::debug!(tags = data.tags.len(), pages = data.pages.len(), "loaded local store");
      self.replace_graphs(data);
      Ok(())
   }

   /// Writes the current graphs through the repository layer.
   pub async fn commit(&self) -> Result<()> {
      self
         .repos
         .tags
         .replace_all(self.tags.values().cloned().collect())
         .await?;
      self
         .repos
         .pages
         .replace_all(self.pages.values().cloned().collect())
         .await
   }

   /// Drops everything in memory; the repository is untouched.
   pub fn clear_all_data(&mut self) {
      self.tags.clear();
      self.pages.clear();
      self.outbox.clear();
      self.initialized = false;
   }

   pub fn snapshot(&self) -> Dataset {
      Dataset { tags: self.tags.clone(), pages: self.pages.clone() }
   }

   pub fn take_changes(&mut self) -> Vec<LocalChange> {
      std::mem::take(&mut self.outbox)
   }

   fn record<T: Entity>(&mut self, entity: &T, operation: ChangeOp) {
      match serde_json::to_value(entity) {
         Ok(payload) => self.outbox.push(LocalChange {
            kind: T::KIND,
            id: entity.id().to_string(),
            operation,
            payload,
         }),
         Err(e) => tracing::error!("failed to snapshot {} {}: {e}", T::KIND, entity.id()),
      }
   }

   // Tags

   pub fn create_tag(&mut self, name: &str) -> Result<Tag> {
      let name = normalize_tag_name(name, self.max_tag_name_chars)?;
      let now = now_millis();
      let tag = Tag {
         id: uuid::Uuid::new_v4().to_string(),
         name,
         description: None,
         color: None,
         bindings: BTreeSet::new(),
         created_at: now,
         updated_at: now,
         deleted: false,
      };
      self.tags.insert(tag.id.clone(), tag.clone());
      self.record(&tag, ChangeOp::Create);
      Ok(tag)
   }

   pub fn update_tag(&mut self, id: &str, patch: TagPatch) -> Result<Option<Tag>> {
      let name = patch
         .name
         .as_deref()
         .map(|n| normalize_tag_name(n, self.max_tag_name_chars))
         .transpose()?;
      let Some(tag) = self.tags.get_mut(id) else {
         return Ok(None);
      };
      if let Some(name) = name {
         tag.name = name;
      }
      if let Some(description) = patch.description {
         tag.description = Some(description).filter(|d| !d.trim().is_empty());
      }
      if let Some(color) = patch.color {
         tag.color = Some(color).filter(|c| !c.trim().is_empty());
      }
      tag.updated_at = bump(tag.updated_at);
      let tag = tag.clone();
      self.record(&tag, ChangeOp::Update);
      Ok(Some(tag))
   }

   /// Removes the tag and strips it from every page and bound tag.
   pub fn delete_tag(&mut self, id: &str) -> bool {
      let Some(mut removed) = self.tags.remove(id) else {
         return false;
      };

      let mut touched_pages = Vec::new();
      for page in self.pages.values_mut() {
         if page.tags.remove(id) {
            page.updated_at = bump(page.updated_at);
            touched_pages.push(page.clone());
         }
      }

      let mut touched_tags = Vec::new();
      for other in &removed.bindings {
         if let Some(bound) = self.tags.get_mut(other)
            && bound.bindings.remove(id)
         {
            bound.updated_at = bump(bound.updated_at);
            touched_tags.push(bound.clone());
         }
      }

      for page in &touched_pages {
         self.record(page, ChangeOp::Update);
      }
      for tag in &touched_tags {
         self.record(tag, ChangeOp::Update);
      }
      removed.deleted = true;
      removed.bindings.clear();
      removed.updated_at = bump(removed.updated_at);
      self.record(&removed, ChangeOp::Delete);
      true
   }

   /// Binds two tags symmetrically. Returns false when either is absent.
   pub fn bind_tags(&mut self, a: &str, b: &str) -> Result<bool> {
      if a == b {
         return Err(ValidationError::SelfBinding.into());
      }
      if !self.tags.contains_key(a) || !self.tags.contains_key(b) {
         return Ok(false);
      }
      self.set_binding(a, b, true);
      Ok(true)
   }

   pub fn unbind_tags(&mut self, a: &str, b: &str) -> bool {
      if a == b || !self.tags.contains_key(a) || !self.tags.contains_key(b) {
         return false;
      }
      self.set_binding(a, b, false);
      true
   }

   fn set_binding(&mut self, a: &str, b: &str, bound: bool) {
      for (from, to) in [(a, b), (b, a)] {
         let Some(tag) = self.tags.get_mut(from) else {
            continue;
         };
         let changed = if bound {
            tag.bindings.insert(to.to_string())
         } else {
            tag.bindings.remove(to)
         };
         if changed {
            tag.updated_at = bump(tag.updated_at);
            let tag = tag.clone();
            self.record(&tag, ChangeOp::Update);
         }
      }
   }

   pub fn get_tag(&self, id: &str) -> Option<Tag> {
      self.tags.get(id).cloned()
   }

   /// All tags ordered by name.
   pub fn get_all_tags(&self) -> Vec<Tag> {
      let mut tags: Vec<Tag> = self.tags.values().cloned().collect();
      tags.sort_by(|a, b| {
         a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
      });
      tags
   }

   pub fn get_bound_tags(&self, id: &str) -> Vec<Tag> {
      self
         .tags
         .get(id)
         .map(|tag| {
            tag.bindings
               .iter()
               .filter_map(|b| self.tags.get(b).cloned())
               .collect()
         })
         .unwrap_or_default()
   }

   /// Number of live pages referencing each tag (zero counts included).
   pub fn tag_usage_counts(&self) -> HashMap<TagId, usize> {
      let mut counts: HashMap<TagId, usize> = self.tags.keys().map(|id| (id.clone(), 0)).collect();
      for page in self.pages.values() {
         for tag in &page.tags {
            if let Some(count) = counts.get_mut(tag) {
               *count += 1;
            }
         }
      }
      counts
   }

   pub fn get_all_tags_with_usage(&self) -> Vec<TagWithUsage> {
      let counts = self.tag_usage_counts();
      self
         .get_all_tags()
         .into_iter()
         .map(|tag| {
            let usage_count = counts.get(&tag.id).copied().unwrap_or(0);
            TagWithUsage { tag, usage_count }
         })
         .collect()
   }

   // Pages

   /// Creates the page on first sight of a URL; otherwise refreshes title and
   /// favicon while keeping its tags.
   pub fn create_or_update_page(&mut self, input: PageInput) -> Result<Page> {
      let url = normalize_url(&input.url)?;
      let id = page_id_for_url(&input.url)?;
      let now = now_millis();

      if let Some(page) = self.pages.get_mut(&id) {
         if !page.title_manually_edited.unwrap_or(false) {
            page.title = input.title;
            page.title_source = Some(TitleSource::Page);
         }
         if input.favicon.is_some() {
            page.favicon = input.favicon;
         }
         page.updated_at = bump(page.updated_at);
         let page = page.clone();
         self.record(&page, ChangeOp::Update);
         return Ok(page);
      }

      let domain = input
         .domain
         .filter(|d| !d.trim().is_empty())
         .or_else(|| url.host_str().map(str::to_string))
         .unwrap_or_default();
      let page = Page {
         id: id.clone(),
         url: input.url.trim().to_string(),
         title: input.title,
         domain,
         tags: BTreeSet::new(),
         created_at: now,
         updated_at: now,
         favicon: input.favicon,
         description: None,
         deleted: false,
         title_manually_edited: None,
         title_source: Some(TitleSource::Page),
      };
      self.pages.insert(id, page.clone());
      self.record(&page, ChangeOp::Create);
      Ok(page)
   }

   pub fn update_page_title(
      &mut self,
      id: &str,
      title: &str,
      source: TitleSource,
   ) -> Option<Page> {
      let page = self.pages.get_mut(id)?;
      page.title = title.trim().to_string();
      page.title_source = Some(source);
      page.title_manually_edited = Some(source == TitleSource::Manual);
      page.updated_at = bump(page.updated_at);
      let page = page.clone();
      self.record(&page, ChangeOp::Update);
      Some(page)
   }

   pub fn delete_page(&mut self, id: &str) -> bool {
      let Some(mut page) = self.pages.remove(id) else {
         return false;
      };
      page.deleted = true;
      page.updated_at = bump(page.updated_at);
      self.record(&page, ChangeOp::Delete);
      true
   }

   pub fn add_tag_to_page(&mut self, page_id: &str, tag_id: &str) -> bool {
      self.set_page_tag(page_id, tag_id, true)
   }

   pub fn remove_tag_from_page(&mut self, page_id: &str, tag_id: &str) -> bool {
      self.set_page_tag(page_id, tag_id, false)
   }

   fn set_page_tag(&mut self, page_id: &str, tag_id: &str, present: bool) -> bool {
      if !self.tags.contains_key(tag_id) {
         return false;
      }
      let Some(page) = self.pages.get_mut(page_id) else {
         return false;
      };
      let changed = if present {
         page.tags.insert(tag_id.to_string())
      } else {
         page.tags.remove(tag_id)
      };
      if changed {
         page.updated_at = bump(page.updated_at);
         let page = page.clone();
         self.record(&page, ChangeOp::Update);
      }
      true
   }

   pub fn get_page(&self, id: &str) -> Option<Page> {
      self.pages.get(id).cloned()
   }

   pub fn get_page_by_url(&self, url: &str) -> Option<Page> {
      let id = page_id_for_url(url).ok()?;
      self.get_page(&id)
   }

   /// All pages, most recently updated first.
   pub fn get_all_pages(&self) -> Vec<Page> {
      let mut pages: Vec<Page> = self.pages.values().cloned().collect();
      pages.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
      pages
   }

   pub fn get_pages_by_tag(&self, tag_id: &str) -> Vec<Page> {
      self
         .get_all_pages()
         .into_iter()
         .filter(|p| p.tags.contains(tag_id))
         .collect()
   }

   /// Case-insensitive substring match over title, url, and domain.
   pub fn search_pages(&self, query: &str) -> Vec<Page> {
      let needle = query.trim().to_lowercase();
      if needle.is_empty() {
         return self.get_all_pages();
      }
      self
         .get_all_pages()
         .into_iter()
         .filter(|p| {
            p.title.to_lowercase().contains(&needle)
               || p.url.to_lowercase().contains(&needle)
               || p.domain.to_lowercase().contains(&needle)
         })
         .collect()
   }

   // Statistics

   pub fn get_user_stats(&self) -> UserStats {
      self.user_stats_on(Local::now().date_naive())
   }

   /// Stats relative to `today` (local calendar day).
   pub fn user_stats_on(&self, today: NaiveDate) -> UserStats {
      let days: BTreeSet<NaiveDate> =
         self.pages.values().filter_map(|p| local_day(p.created_at)).collect();
      let today_count = self
         .pages
         .values()
         .filter(|p| local_day(p.created_at) == Some(today))
         .count();

      UserStats {
         today_count,
         streak: streak_ending(&days, today),
         total_pages: self.pages.len(),
         total_tags: self.tags.len(),
      }
   }

   /// Drops self-bindings and dangling references, and restores symmetry.
   fn repair_integrity(&mut self) {
      let live: BTreeSet<TagId> = self.tags.keys().cloned().collect();

      let mut edges = Vec::new();
      for (id, tag) in &mut self.tags {
         tag.bindings.retain(|b| b != id && live.contains(b));
         edges.extend(tag.bindings.iter().map(|b| (b.clone(), id.clone())));
      }
      for (from, to) in edges {
         if let Some(tag) = self.tags.get_mut(&from) {
            tag.bindings.insert(to);
         }
      }

      for page in self.pages.values_mut() {
         page.tags.retain(|t| live.contains(t));
      }
   }
}

/// Next `updated_at`: now, but strictly after the previous value.
fn bump(previous: i64) -> i64 {
   now_millis().max(previous.saturating_add(1))
}

fn local_day(ms: i64) -> Option<NaiveDate> {
   if ms <= 0 {
      return None;
   }
   DateTime::from_timestamp_millis(ms).map(|dt| dt.with_timezone(&Local).date_naive())
}

/// Consecutive days ending today, or ending yesterday when today is empty.
fn streak_ending(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
   let mut cursor = if days.contains(&today) {
      today
   } else {
      match today.pred_opt() {
         Some(yesterday) if days.contains(&yesterday) => yesterday,
         _ => return 0,
      }
   };

   let mut streak = 0;
   while days.contains(&cursor) {
      streak += 1;
      match cursor.pred_opt() {
         Some(prev) => cursor = prev,
         None => break,
      }
   }
   streak
}
