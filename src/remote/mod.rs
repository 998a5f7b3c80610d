//! Remote replica of the tag/page dataset.
//!
//! Rows are never physically removed remotely; deletes are tombstones so every
//! device eventually observes them.

mod http;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
pub use http::HttpRemote;
pub use memory::MemoryRemote;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::RemoteError, types::Entity};

/// One row of a remote table. `data` holds the entity JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
   pub id:         String,
   pub user_id:    String,
   pub updated_at: i64,
   #[serde(default)]
   pub deleted:    bool,
   pub data:       Value,
}

impl RemoteRow {
   pub fn from_entity<T: Entity>(user_id: &str, entity: &T) -> Result<Self, serde_json::Error> {
      Ok(Self {
         id:         entity.id().to_string(),
         user_id:    user_id.to_string(),
         updated_at: entity.updated_at(),
         deleted:    entity.is_deleted(),
         data:       serde_json::to_value(entity)?,
      })
   }

   /// Decodes `data`, letting the row-level tombstone override the payload.
   /// A payload without `updatedAt` takes the row's column value.
   pub fn into_entity<T: Entity>(self) -> Result<T, RemoteError> {
      let mut data = self.data;
      if let Some(obj) = data.as_object_mut() {
         if self.deleted {
            obj.insert("deleted".to_string(), Value::Bool(true));
         }
         obj.entry("updatedAt").or_insert(Value::from(self.updated_at));
      }
      serde_json::from_value(data).map_err(|e| RemoteError::MalformedRow {
         table:  T::KIND.table(),
         reason: format!("{}: {e}", self.id),
      })
   }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
   /// Rows owned by `user_id`, optionally only those with `updated_at > since`.
   async fn select(
      &self,
      table: &'static str,
      user_id: &str,
      updated_since: Option<i64>,
   ) -> Result<Vec<RemoteRow>, RemoteError>;

   /// Inserts or replaces rows keyed by id.
   async fn upsert(&self, table: &'static str, rows: Vec<RemoteRow>) -> Result<(), RemoteError>;

   /// Marks a row deleted and stamps its `updated_at`.
   async fn soft_delete(
      &self,
      table: &'static str,
      user_id: &str,
      id: &str,
      at: i64,
   ) -> Result<(), RemoteError>;
}

/// Decodes pulled rows into an id map, skipping rows that fail to decode.
pub fn decode_rows<T: Entity>(rows: Vec<RemoteRow>) -> BTreeMap<String, T> {
   let mut out = BTreeMap::new();
   for row in rows {
      let id = row.id.clone();
      match row.into_entity::<T>() {
         Ok(entity) => {
            out.insert(id, entity);
         },
         Err(e) => tracing::warn!("skipping remote row: {e}"),
      }
   }
   out
}
