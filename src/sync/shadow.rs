//! Per-entity content fingerprints of the last observed remote state.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
   Result,
   store::{self, Backend, keys},
   types::Entity,
};

/// SHA-256 of an entity's canonical JSON, stored as hex.
#[derive(Serialize, Deserialize, Copy, Clone, Default, Eq, PartialEq, Hash)]
#[serde(into = "String", try_from = "String")]
#[repr(transparent)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
   pub fn sum(dat: impl AsRef<[u8]>) -> Self {
      Self(Sha256::digest(dat.as_ref()).into())
   }

   pub fn of<T: Entity>(entity: &T) -> Result<Self> {
      Ok(Self::sum(serde_json::to_vec(entity)?))
   }
}

impl fmt::Display for ContentHash {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}", hex::encode(self.0))
   }
}

impl fmt::Debug for ContentHash {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "Hash({})", hex::encode(self.0))
   }
}

impl From<ContentHash> for String {
   fn from(hash: ContentHash) -> Self {
      hash.to_string()
   }
}

impl TryFrom<String> for ContentHash {
   type Error = String;

   fn try_from(value: String) -> Result<Self, Self::Error> {
      let bytes = hex::decode(&value).map_err(|e| format!("invalid content hash: {e}"))?;
      let (this, rem) = bytes
         .split_first_chunk::<32>()
         .ok_or_else(|| format!("content hash has {} bytes", bytes.len()))?;
      if !rem.is_empty() {
         return Err(format!("content hash has {} bytes", bytes.len()));
      }
      Ok(Self(*this))
   }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowEntry {
   pub content_hash:    ContentHash,
   pub last_updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowMap {
   #[serde(default)]
   entries: BTreeMap<String, ShadowEntry>,
}

impl ShadowMap {
   /// `None` when no map has ever been persisted.
   pub async fn load(backend: &dyn Backend) -> Result<Option<Self>> {
      Ok(store::load(backend, keys::SHADOW_MAP).await?)
   }

   pub async fn save(&self, backend: &dyn Backend) -> Result<()> {
      store::save(backend, keys::SHADOW_MAP, self).await?;
      Ok(())
   }

   pub fn len(&self) -> usize {
      self.entries.len()
   }

   pub fn is_empty(&self) -> bool {
      self.entries.is_empty()
   }

   pub fn get(&self, entity_key: &str) -> Option<&ShadowEntry> {
      self.entries.get(entity_key)
   }

   /// Whether `hash` matches what was last seen for `entity_key`.
   pub fn is_unchanged(&self, entity_key: &str, hash: &ContentHash) -> bool {
      self.entries
         .get(entity_key)
         .is_some_and(|e| e.content_hash == *hash)
   }

   pub fn record(&mut self, entity_key: String, content_hash: ContentHash, last_updated_at: i64) {
      self
         .entries
         .insert(entity_key, ShadowEntry { content_hash, last_updated_at });
   }

   pub fn remove(&mut self, entity_key: &str) {
      self.entries.remove(entity_key);
   }
}
