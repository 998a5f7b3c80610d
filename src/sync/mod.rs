//! Push/pull/merge replication between the local store and the remote store.
//!
//! A run moves `idle -> pushing -> pulling -> merging -> idle`. Each stage
//! catches its own failure: a failed pull leaves the completed push in place,
//! and the cursor only moves after pull, merge, and apply all succeed.
//!
//! Local mutations are queued first and delivered afterwards, outside the
//! store lock. Remote writes are serialized so one entity's changes reach the
//! remote in the order they were queued, and every remote request is bounded
//! by the configured timeout.

mod cursor;
mod lock;
mod queue;
mod shadow;

use std::{
   collections::{BTreeMap, HashSet},
   future::Future,
   slice,
   sync::Arc,
   time::Duration,
};

pub use cursor::{SyncCursor, SyncMode};
pub use lock::{LockRecord, SyncGuard, SyncLock};
use parking_lot::Mutex;
pub use queue::PendingQueue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
pub use shadow::{ContentHash, ShadowEntry, ShadowMap};
use tokio::time;

use crate::{
   Result,
   config::Config,
   error::{Error, RemoteError},
   local_store::LocalStore,
   merge::merge,
   remote::{RemoteRow, RemoteStore, decode_rows},
   session::Session,
   store::{Backend, keys},
   types::{ChangeOp, Dataset, Entity, EntityKind, Page, PendingChange, Tag},
   util::now_millis,
};

/// The local store shared by request handlers and the sync engine.
pub type SharedStore = Arc<tokio::sync::Mutex<LocalStore>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
   #[default]
   Idle,
   Pushing,
   Pulling,
   Merging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
   Completed,
   AlreadyRunning,
   NotAuthenticated,
   FailedStage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
   pub outcome:      SyncOutcome,
   pub state:        SyncState,
   pub mode:         Option<SyncMode>,
   pub failed_stage: Option<String>,
   pub pushed:       usize,
   pub push_failed:  usize,
   pub pulled:       usize,
   pub applied:      usize,
}

impl SyncReport {
   fn new(outcome: SyncOutcome, state: SyncState) -> Self {
      Self {
         outcome,
         state,
         mode: None,
         failed_stage: None,
         pushed: 0,
         push_failed: 0,
         pulled: 0,
         applied: 0,
      }
   }
}

/// Snapshot polled by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
   pub state:               SyncState,
   pub authenticated:       bool,
   pub pending_changes:     usize,
   pub last_error:          Option<String>,
   pub needs_attention:     bool,
   pub last_incremental_at: i64,
   pub last_full_sync_at:   i64,
}

/// Whether [`SyncEngine::mark_change`] reached the remote or was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
   Delivered,
   Queued,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
   pub full_sync_interval_ms: i64,
   pub lock_ttl_ms:           u64,
   pub remote_timeout:        Duration,
}

impl SyncOptions {
   pub fn from_config(cfg: &Config) -> Self {
      Self {
         full_sync_interval_ms: cfg.full_sync_interval().as_millis() as i64,
         lock_ttl_ms:           cfg.sync_lock_ttl_ms,
         remote_timeout:        cfg.remote_timeout(),
      }
   }
}

impl Default for SyncOptions {
   fn default() -> Self {
      Self::from_config(&Config::default())
   }
}

#[derive(Debug, Clone)]
struct LastError {
   message:         String,
   needs_attention: bool,
}

/// Changed remote entities from one pull.
struct Pulled {
   dataset: Dataset,
   rows:    usize,
   hashes:  Vec<(String, ContentHash, i64)>,
}

pub struct SyncEngine {
   backend:        Arc<dyn Backend>,
   remote:         Option<Arc<dyn RemoteStore>>,
   session:        Arc<Session>,
   store:          SharedStore,
   queue:          PendingQueue,
   lock:           SyncLock,
   options:        SyncOptions,
   state:          Mutex<SyncState>,
   last_error:     Mutex<Option<LastError>>,
   recent_deletes: Mutex<HashSet<String>>,
   writes:         tokio::sync::Mutex<()>,
}

impl SyncEngine {
   pub fn new(
      backend: Arc<dyn Backend>,
      remote: Option<Arc<dyn RemoteStore>>,
      session: Arc<Session>,
      store: SharedStore,
      options: SyncOptions,
   ) -> Self {
      Self {
         queue: PendingQueue::new(Arc::clone(&backend)),
         lock: SyncLock::new(options.lock_ttl_ms),
         backend,
         remote,
         session,
         store,
         options,
         state: Mutex::new(SyncState::Idle),
         last_error: Mutex::new(None),
         recent_deletes: Mutex::new(HashSet::new()),
         writes: tokio::sync::Mutex::new(()),
      }
   }

   pub const fn queue(&self) -> &PendingQueue {
      &self.queue
   }

   pub fn state(&self) -> SyncState {
      *self.state.lock()
   }

   fn set_state(&self, state: SyncState) {
      *self.state.lock() = state;
   }

   /// Remote plus user id, when replication is possible right now.
   fn target(&self) -> Option<(Arc<dyn RemoteStore>, String)> {
      let remote = self.remote.as_ref()?;
      let user_id = self.session.user_id()?;
      Some((Arc::clone(remote), user_id))
   }

   fn note_error(&self, stage: &str, err: &Error) {
      tracing::warn!(stage, "sync stage failed: {err}");
      *self.last_error.lock() = Some(LastError {
         message:         format!("{stage}: {err}"),
         needs_attention: err.needs_attention(),
      });
   }

   /// Records a local mutation and tries to deliver it right away.
   pub async fn mark_change(
      &self,
      kind: EntityKind,
      id: &str,
      payload: Value,
      operation: ChangeOp,
   ) -> Result<Delivery> {
      let key = self.record_change(kind, id, payload, operation).await?;
      Ok(self.deliver(&key).await)
   }

   /// Queues a local mutation and returns its entity key. Only touches local
   /// storage, so callers may hold the store lock.
   pub async fn record_change(
      &self,
      kind: EntityKind,
      id: &str,
      payload: Value,
      operation: ChangeOp,
   ) -> Result<String> {
      let change = PendingChange {
         entity_type: kind,
         operation,
         entity_id: id.to_string(),
         payload_snapshot: payload,
         timestamp: now_millis(),
      };
      let key = change.entity_key();
      self.queue.enqueue(change).await?;
      Ok(key)
   }

   /// Uploads the queued change for `key` when signed in. Never waits longer
   /// than the remote timeout for another writer, nor for the remote itself.
   pub async fn deliver(&self, key: &str) -> Delivery {
      let Some((remote, user_id)) = self.target() else {
         return Delivery::Queued;
      };
      let Ok(_writes) = time::timeout(self.options.remote_timeout, self.writes.lock()).await
      else {
         tracing::debug!(%key, "remote writer busy, leaving change queued");
         return Delivery::Queued;
      };

      match self.deliver_key(remote.as_ref(), &user_id, key).await {
         Ok(Some((change, hash))) => {
            self.after_delivery(&change, hash).await;
            Delivery::Delivered
         },
         // A concurrent run already pushed it.
         Ok(None) => Delivery::Delivered,
         Err(e) => {
            tracing::debug!(%key, "immediate write failed, keeping queued: {e}");
            if e.needs_attention() {
               self.note_error("write", &e);
            }
            Delivery::Queued
         },
      }
   }

   /// Pushes the newest queued change for `key` and dequeues it unless it was
   /// superseded meanwhile. Callers hold `writes`.
   async fn deliver_key(
      &self,
      remote: &dyn RemoteStore,
      user_id: &str,
      key: &str,
   ) -> Result<Option<(PendingChange, Option<ContentHash>)>> {
      let Some(change) = self.queue.get(key).await? else {
         return Ok(None);
      };
      let hash = match push_one(remote, user_id, &change, self.options.remote_timeout).await {
         Ok(hash) => hash,
         // A snapshot that no longer decodes will never upload.
         Err(e @ Error::Json(_)) => {
            self.queue.remove_delivered(slice::from_ref(&change)).await?;
            return Err(e);
         },
         Err(e) => return Err(e),
      };
      // Guard the delete before it leaves the queue so a merge always sees one.
      if change.operation == ChangeOp::Delete {
         self.recent_deletes.lock().insert(key.to_string());
      }
      self.queue.remove_delivered(slice::from_ref(&change)).await?;
      Ok(Some((change, hash)))
   }

   async fn after_delivery(&self, change: &PendingChange, hash: Option<ContentHash>) {
      let result: Result<()> = async {
         let Some(mut shadow) = ShadowMap::load(self.backend.as_ref()).await? else {
            return Ok(());
         };
         match hash {
            Some(hash) => shadow.record(change.entity_key(), hash, change.timestamp),
            None => shadow.remove(&change.entity_key()),
         }
         shadow.save(self.backend.as_ref()).await
      }
      .await;
      if let Err(e) = result {
         tracing::debug!("shadow map update skipped: {e}");
      }
   }

   /// Runs push, pull, merge, and apply once. Returns immediately when another
   /// run holds the lock.
   pub async fn sync_all(&self, force_full: bool) -> Result<SyncReport> {
      let Some(guard) = self.lock.try_acquire(self.backend.as_ref()).await? else {
         tracing::debug!("sync already running");
         return Ok(SyncReport::new(SyncOutcome::AlreadyRunning, self.state()));
      };

      let report = match self.target() {
         Some((remote, user_id)) => self.run(remote.as_ref(), &user_id, force_full).await,
         None => {
            tracing::debug!("sync skipped: not authenticated");
            SyncReport::new(SyncOutcome::NotAuthenticated, SyncState::Idle)
         },
      };

      self.set_state(SyncState::Idle);
      guard.release(self.backend.as_ref()).await;
      Ok(report)
   }

   async fn run(&self, remote: &dyn RemoteStore, user_id: &str, force_full: bool) -> SyncReport {
      let mut report = SyncReport::new(SyncOutcome::Completed, SyncState::Idle);

      self.set_state(SyncState::Pushing);
      match self.push(remote, user_id).await {
         Ok((pushed, failed)) => {
            report.pushed = pushed;
            report.push_failed = failed;
         },
         Err(e) => self.note_error("push", &e),
      }

      self.set_state(SyncState::Pulling);
      let pulled_at = now_millis();
      self.recent_deletes.lock().clear();

      let prepared = async {
         let cursor = SyncCursor::load(self.backend.as_ref()).await?;
         let shadow = ShadowMap::load(self.backend.as_ref()).await?;
         let mode = cursor.decide(
            force_full,
            shadow.is_some(),
            pulled_at,
            self.options.full_sync_interval_ms,
         );
         tracing::info!(?mode, since = cursor.last_incremental_at, "pulling");
         let shadow = match mode {
            SyncMode::Full => ShadowMap::default(),
            SyncMode::Incremental => shadow.unwrap_or_default(),
         };
         let since = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => Some(cursor.last_incremental_at),
         };
         let pulled = pull(remote, user_id, since, &shadow, self.options.remote_timeout).await?;
         Ok::<_, Error>((cursor, shadow, mode, pulled))
      }
      .await;

      let (mut cursor, mut shadow, mode, pulled) = match prepared {
         Ok(prepared) => prepared,
         Err(e) => {
            self.note_error("pull", &e);
            report.outcome = SyncOutcome::FailedStage;
            report.failed_stage = Some("pull".to_string());
            return report;
         },
      };
      report.mode = Some(mode);
      report.pulled = pulled.rows;
      report.applied = pulled.dataset.len();

      self.set_state(SyncState::Merging);
      if let Err(e) = self.apply(pulled.dataset).await {
         self.note_error("merge", &e);
         report.outcome = SyncOutcome::FailedStage;
         report.failed_stage = Some("merge".to_string());
         return report;
      }

      for (key, hash, updated_at) in pulled.hashes {
         shadow.record(key, hash, updated_at);
      }
      cursor.advance(mode, pulled_at);
      let persisted = async {
         shadow.save(self.backend.as_ref()).await?;
         cursor.save(self.backend.as_ref()).await
      }
      .await;
      if let Err(e) = persisted {
         self.note_error("apply", &e);
         report.outcome = SyncOutcome::FailedStage;
         report.failed_stage = Some("apply".to_string());
         return report;
      }

      if report.push_failed == 0 {
         *self.last_error.lock() = None;
      }
      tracing::info!(
         pushed = report.pushed,
         pulled = report.pulled,
         applied = report.applied,
         "sync completed"
      );
      report
   }

   /// Uploads queued changes. Failed entries stay queued.
   async fn push(&self, remote: &dyn RemoteStore, user_id: &str) -> Result<(usize, usize)> {
      let keys: Vec<String> = self
         .queue
         .entries()
         .await?
         .iter()
         .map(PendingChange::entity_key)
         .collect();
      if keys.is_empty() {
         return Ok((0, 0));
      }
      tracing::debug!(count = keys.len(), "pushing queued changes");

      let mut pushed = 0;
      let mut failed = 0;
      let mut shadow = ShadowMap::load(self.backend.as_ref()).await?;
      for (idx, key) in keys.iter().enumerate() {
         let outcome = {
            let _writes = self.writes.lock().await;
            self.deliver_key(remote, user_id, key).await
         };
         match outcome {
            Ok(Some((change, hash))) => {
               if let Some(shadow) = shadow.as_mut() {
                  match hash {
                     Some(hash) => shadow.record(change.entity_key(), hash, change.timestamp),
                     None => shadow.remove(key),
                  }
               }
               pushed += 1;
            },
            Ok(None) => {},
            Err(e @ Error::Json(_)) => {
               tracing::error!(%key, "dropped undeliverable change: {e}");
               failed += 1;
            },
            Err(e) if e.needs_attention() => {
               self.note_error("push", &e);
               failed += keys.len() - idx;
               break;
            },
            Err(e) => {
               failed += 1;
               tracing::warn!(%key, "push failed, keeping queued: {e}");
            },
         }
      }

      if let Some(shadow) = shadow {
         shadow.save(self.backend.as_ref()).await?;
      }
      Ok((pushed, failed))
   }

   /// Merges `remote` into the local store and commits the result.
   async fn apply(&self, remote: Dataset) -> Result<()> {
      let mut store = self.store.lock().await;
      let local = store.snapshot();

      let mut deletes = self.queue.delete_keys().await?;
      deletes.extend(self.recent_deletes.lock().iter().cloned());

      let merged = merge(&local, &remote, &deletes);
      if merged == local {
         return Ok(());
      }
      tracing::debug!(before = local.len(), after = merged.len(), "applying merged dataset");
      store.update_data(merged);
      store
         .commit()
         .await
         .map_err(|e| Error::Transaction { stage: "apply", reason: e.to_string() })
   }

   /// Forgets the queue, cursor, and shadow map.
   pub async fn reset(&self) -> Result<()> {
      self.backend
         .remove(&[
            keys::PENDING_CHANGES,
            keys::LAST_INCREMENTAL_AT,
            keys::LAST_FULL_SYNC_AT,
            keys::SHADOW_MAP,
         ])
         .await?;
      *self.last_error.lock() = None;
      self.recent_deletes.lock().clear();
      Ok(())
   }

   pub async fn status(&self) -> Result<SyncStatus> {
      let cursor = SyncCursor::load(self.backend.as_ref()).await?;
      let pending_changes = self.queue.len().await?;
      let last_error = self.last_error.lock().clone();
      Ok(SyncStatus {
         state: self.state(),
         authenticated: self.session.is_authenticated(),
         pending_changes,
         needs_attention: last_error.as_ref().is_some_and(|e| e.needs_attention),
         last_error: last_error.map(|e| e.message),
         last_incremental_at: cursor.last_incremental_at,
         last_full_sync_at: cursor.last_full_sync_at,
      })
   }
}

/// Fails a remote request that does not answer within `limit`.
async fn bounded<T>(
   limit: Duration,
   op: &'static str,
   request: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
   match time::timeout(limit, request).await {
      Ok(result) => result,
      Err(_) => Err(RemoteError::TimedOut { op, ms: limit.as_millis() as u64 }),
   }
}

/// Writes one change. Returns the uploaded content hash (`None` for deletes).
async fn push_one(
   remote: &dyn RemoteStore,
   user_id: &str,
   change: &PendingChange,
   limit: Duration,
) -> Result<Option<ContentHash>> {
   let table = change.entity_type.table();
   if change.operation == ChangeOp::Delete {
      let request = remote.soft_delete(table, user_id, &change.entity_id, change.timestamp);
      bounded(limit, "delete", request).await?;
      return Ok(None);
   }
   let (row, hash) = match change.entity_type {
      EntityKind::Tag => row_for::<Tag>(user_id, &change.payload_snapshot)?,
      EntityKind::Page => row_for::<Page>(user_id, &change.payload_snapshot)?,
   };
   bounded(limit, "upsert", remote.upsert(table, vec![row])).await?;
   Ok(Some(hash))
}

fn row_for<T: Entity>(user_id: &str, payload: &Value) -> Result<(RemoteRow, ContentHash)> {
   let entity: T = serde_json::from_value(payload.clone())?;
   Ok((RemoteRow::from_entity(user_id, &entity)?, ContentHash::of(&entity)?))
}

async fn pull(
   remote: &dyn RemoteStore,
   user_id: &str,
   since: Option<i64>,
   shadow: &ShadowMap,
   limit: Duration,
) -> Result<Pulled> {
   let tag_rows =
      bounded(limit, "select", remote.select(EntityKind::Tag.table(), user_id, since)).await?;
   let page_rows =
      bounded(limit, "select", remote.select(EntityKind::Page.table(), user_id, since)).await?;
   let rows = tag_rows.len() + page_rows.len();

   let mut hashes = Vec::new();
   let tags = changed(decode_rows::<Tag>(tag_rows), shadow, &mut hashes)?;
   let pages = changed(decode_rows::<Page>(page_rows), shadow, &mut hashes)?;
   Ok(Pulled { dataset: Dataset { tags, pages }, rows, hashes })
}

/// Drops entities whose fingerprint matches the shadow map.
fn changed<T: Entity>(
   entities: BTreeMap<String, T>,
   shadow: &ShadowMap,
   hashes: &mut Vec<(String, ContentHash, i64)>,
) -> Result<BTreeMap<String, T>> {
   let mut out = BTreeMap::new();
   for (id, entity) in entities {
      let key = T::KIND.entity_key(&id);
      let hash = ContentHash::of(&entity)?;
      if shadow.is_unchanged(&key, &hash) {
         continue;
      }
      hashes.push((key, hash, entity.updated_at()));
      out.insert(id, entity);
   }
   Ok(out)
}
