use std::{
   collections::BTreeMap,
   sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
   time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{RemoteRow, RemoteStore};
use crate::error::RemoteError;

/// In-process remote shared by tests and local development.
#[derive(Default)]
pub struct MemoryRemote {
   tables:      Mutex<BTreeMap<&'static str, BTreeMap<String, RemoteRow>>>,
   offline:     AtomicBool,
   fail_select: AtomicBool,
   fail_writes: AtomicBool,
   latency_ms:  AtomicU64,
   writes:      AtomicUsize,
}

impl MemoryRemote {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
   }

   /// Makes reads fail while writes keep working.
   pub fn fail_select(&self, fail: bool) {
      self.fail_select.store(fail, Ordering::SeqCst);
   }

   /// Makes upserts and soft deletes fail while reads keep working.
   pub fn fail_writes(&self, fail: bool) {
      self.fail_writes.store(fail, Ordering::SeqCst);
   }

   /// Delays every call. Reads capture their rows before the delay, writes
   /// land after it.
   pub fn set_latency(&self, latency: Duration) {
      self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
   }

   /// Successful upserts and soft deletes so far.
   pub fn write_count(&self) -> usize {
      self.writes.load(Ordering::SeqCst)
   }

   pub fn rows(&self, table: &'static str) -> Vec<RemoteRow> {
      self
         .tables
         .lock()
         .get(table)
         .map(|t| t.values().cloned().collect())
         .unwrap_or_default()
   }

   pub fn row(&self, table: &'static str, id: &str) -> Option<RemoteRow> {
      self.tables.lock().get(table).and_then(|t| t.get(id).cloned())
   }

   /// Writes a row directly, as another device would.
   pub fn put(&self, table: &'static str, row: RemoteRow) {
      self
         .tables
         .lock()
         .entry(table)
         .or_default()
         .insert(row.id.clone(), row);
   }

   fn check_online(&self) -> Result<(), RemoteError> {
      if self.offline.load(Ordering::SeqCst) {
         return Err(RemoteError::Offline("memory remote is offline".to_string()));
      }
      Ok(())
   }

   fn check_writable(&self) -> Result<(), RemoteError> {
      self.check_online()?;
      if self.fail_writes.load(Ordering::SeqCst) {
         return Err(RemoteError::Unavailable { status: 503, body: "write failed".to_string() });
      }
      Ok(())
   }

   async fn delay(&self) {
      match self.latency_ms.load(Ordering::SeqCst) {
         0 => tokio::task::yield_now().await,
         ms => tokio::time::sleep(Duration::from_millis(ms)).await,
      }
   }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
   async fn select(
      &self,
      table: &'static str,
      user_id: &str,
      updated_since: Option<i64>,
   ) -> Result<Vec<RemoteRow>, RemoteError> {
      self.check_online()?;
      if self.fail_select.load(Ordering::SeqCst) {
         return Err(RemoteError::Unavailable { status: 503, body: "select failed".to_string() });
      }
      let rows: Vec<RemoteRow> = self
         .tables
         .lock()
         .get(table)
         .map(|t| {
            t.values()
               .filter(|r| r.user_id == user_id)
               .filter(|r| updated_since.is_none_or(|since| r.updated_at > since))
               .cloned()
               .collect()
         })
         .unwrap_or_default();
      self.delay().await;
      Ok(rows)
   }

   async fn upsert(&self, table: &'static str, rows: Vec<RemoteRow>) -> Result<(), RemoteError> {
      self.check_writable()?;
      self.delay().await;
      let mut tables = self.tables.lock();
      let target = tables.entry(table).or_default();
      for row in rows {
         target.insert(row.id.clone(), row);
      }
      self.writes.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }

   async fn soft_delete(
      &self,
      table: &'static str,
      user_id: &str,
      id: &str,
      at: i64,
   ) -> Result<(), RemoteError> {
      self.check_writable()?;
      self.delay().await;
      let mut tables = self.tables.lock();
      if let Some(row) = tables
         .get_mut(table)
         .and_then(|t| t.get_mut(id))
         .filter(|r| r.user_id == user_id)
      {
         row.deleted = true;
         row.updated_at = at;
         if let Some(obj) = row.data.as_object_mut() {
            obj.insert("deleted".to_string(), Value::Bool(true));
            obj.insert("updatedAt".to_string(), Value::from(at));
         }
      }
      self.writes.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }
}
