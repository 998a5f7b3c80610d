use std::{
   collections::{BTreeMap, BTreeSet},
   fmt,
};

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;

pub type TagId = String;
pub type PageId = String;

/// Entity families replicated by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
   Tag,
   Page,
}

impl EntityKind {
   pub const fn as_str(self) -> &'static str {
      match self {
         Self::Tag => "tag",
         Self::Page => "page",
      }
   }

   /// Remote table holding rows of this kind.
   pub const fn table(self) -> &'static str {
      match self {
         Self::Tag => "tags",
         Self::Page => "pages",
      }
   }

   /// Key used in pending-delete lists and the shadow map (`tag:<id>`).
   pub fn entity_key(self, id: &str) -> String {
      format!("{}:{id}", self.as_str())
   }
}

impl fmt::Display for EntityKind {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
   Create,
   Update,
   Delete,
}

/// Where a page title came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleSource {
   Page,
   Manual,
   Generated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
   pub id:          TagId,
   pub name:        String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub description: Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub color:       Option<String>,
   #[serde(default)]
   pub bindings:    BTreeSet<TagId>,
   #[serde(default, deserialize_with = "lenient_millis")]
   pub created_at:  i64,
   #[serde(default, deserialize_with = "lenient_millis")]
   pub updated_at:  i64,
   #[serde(default)]
   pub deleted:     bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
   pub id:                     PageId,
   pub url:                    String,
   pub title:                  String,
   pub domain:                 String,
   #[serde(default)]
   pub tags:                   BTreeSet<TagId>,
   #[serde(default, deserialize_with = "lenient_millis")]
   pub created_at:             i64,
   #[serde(default, deserialize_with = "lenient_millis")]
   pub updated_at:             i64,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub favicon:                Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub description:            Option<String>,
   #[serde(default)]
   pub deleted:                bool,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub title_manually_edited:  Option<bool>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub title_source:           Option<TitleSource>,
}

/// Common surface of replicated entities.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
   const KIND: EntityKind;

   fn id(&self) -> &str;
   fn updated_at(&self) -> i64;
   fn is_deleted(&self) -> bool;
}

impl Entity for Tag {
   const KIND: EntityKind = EntityKind::Tag;

   fn id(&self) -> &str {
      &self.id
   }

   fn updated_at(&self) -> i64 {
      self.updated_at
   }

   fn is_deleted(&self) -> bool {
      self.deleted
   }
}

impl Entity for Page {
   const KIND: EntityKind = EntityKind::Page;

   fn id(&self) -> &str {
      &self.id
   }

   fn updated_at(&self) -> i64 {
      self.updated_at
   }

   fn is_deleted(&self) -> bool {
      self.deleted
   }
}

/// Full tag/page graph, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
   #[serde(default)]
   pub tags:  BTreeMap<TagId, Tag>,
   #[serde(default)]
   pub pages: BTreeMap<PageId, Page>,
}

impl Dataset {
   pub fn is_empty(&self) -> bool {
      self.tags.is_empty() && self.pages.is_empty()
   }

   pub fn len(&self) -> usize {
      self.tags.len() + self.pages.len()
   }
}

/// A locally queued change awaiting upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
   pub entity_type:      EntityKind,
   pub operation:        ChangeOp,
   pub entity_id:        String,
   pub payload_snapshot: Value,
   pub timestamp:        i64,
}

impl PendingChange {
   pub fn entity_key(&self) -> String {
      self.entity_type.entity_key(&self.entity_id)
   }
}

/// Mutation recorded by the local store for the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalChange {
   pub kind:      EntityKind,
   pub id:        String,
   pub operation: ChangeOp,
   pub payload:   Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
   pub today_count: usize,
   pub streak:      u32,
   pub total_pages: usize,
   pub total_tags:  usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagWithUsage {
   #[serde(flatten)]
   pub tag:         Tag,
   pub usage_count: usize,
}

/// Accepts integer, float, or numeric-string millisecond timestamps.
///
/// Anything else decodes to 0, which the statistics code treats as missing.
fn lenient_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
   D: Deserializer<'de>,
{
   let value = Value::deserialize(deserializer)?;
   Ok(match value {
      Value::Number(n) => n
         .as_i64()
         .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
         .unwrap_or(0),
      Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
      _ => 0,
   })
}

#[cfg(test)]
mod tests {
   use serde_json::json;

   use super::*;

   #[test]
   fn page_tolerates_garbage_created_at() {
      let page: Page = serde_json::from_value(json!({
         "id": "page_1",
         "url": "https://example.com",
         "title": "Example",
         "domain": "example.com",
         "createdAt": "not-a-number",
         "updatedAt": 5,
      }))
      .expect("decodes");
      assert_eq!(page.created_at, 0);
      assert_eq!(page.updated_at, 5);
      assert!(page.tags.is_empty());
   }

   #[test]
   fn missing_timestamps_decode_as_zero() {
      let tag: Tag =
         serde_json::from_value(json!({ "id": "t1", "name": "rust" })).expect("decodes");
      assert_eq!((tag.created_at, tag.updated_at), (0, 0));

      let page: Page = serde_json::from_value(json!({
         "id": "page_1",
         "url": "https://example.com",
         "title": "Example",
         "domain": "example.com",
         "updatedAt": 7,
      }))
      .expect("decodes");
      assert_eq!(page.created_at, 0);
      assert_eq!(page.updated_at, 7);
   }

   #[test]
   fn entity_key_format() {
      assert_eq!(EntityKind::Tag.entity_key("abc"), "tag:abc");
      assert_eq!(EntityKind::Page.entity_key("p"), "page:p");
   }
}
