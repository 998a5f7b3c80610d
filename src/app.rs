//! Process-wide wiring: one context built at startup and handed to every
//! consumer instead of module-level singletons.

use std::sync::Arc;

use tokio::sync::Mutex;
use url::Url;

use crate::{
   Result,
   config::Config,
   error::ConfigError,
   local_store::LocalStore,
   remote::{HttpRemote, RemoteStore},
   repository::Repositories,
   session::Session,
   store::{Backend, FileBackend},
   sync::{Delivery, SharedStore, SyncEngine, SyncOptions},
};

pub struct AppContext {
   config:  Config,
   backend: Arc<dyn Backend>,
   repos:   Arc<Repositories>,
   store:   SharedStore,
   session: Arc<Session>,
   sync:    Arc<SyncEngine>,
}

impl AppContext {
   pub fn new(
      config: Config,
      backend: Arc<dyn Backend>,
      remote: Option<Arc<dyn RemoteStore>>,
      session: Arc<Session>,
   ) -> Self {
      let repos = Arc::new(Repositories::new(Arc::clone(&backend)));
      let store = Arc::new(Mutex::new(LocalStore::with_tag_limit(
         Arc::clone(&repos),
         config.effective_max_tag_name_chars(),
      )));
      let sync = Arc::new(SyncEngine::new(
         Arc::clone(&backend),
         remote,
         Arc::clone(&session),
         Arc::clone(&store),
         SyncOptions::from_config(&config),
      ));
      Self { config, backend, repos, store, session, sync }
   }

   /// File-backed context for the configured profile, loaded from disk.
   pub async fn open(config: Config) -> Result<Self> {
      config.validate()?;
      let backend: Arc<dyn Backend> = Arc::new(FileBackend::new(config.profile_data_dir()));
      let session = Arc::new(Session::from_config(&config));
      let remote = match config.remote_url.as_deref() {
         Some(raw) => {
            let base = Url::parse(raw)
               .map_err(|source| ConfigError::RemoteUrl { url: raw.to_string(), source })?;
            let remote = HttpRemote::new(
               base,
               config.remote_api_key.clone(),
               Arc::clone(&session),
               config.remote_timeout(),
               config.connect_timeout(),
            )?;
            Some(Arc::new(remote) as Arc<dyn RemoteStore>)
         },
         None => {
            tracing::info!("no remote configured, running local-only");
            None
         },
      };
      let app = Self::new(config, backend, remote, session);
      app.load().await?;
      Ok(app)
   }

   pub const fn config(&self) -> &Config {
      &self.config
   }

   pub fn backend(&self) -> &Arc<dyn Backend> {
      &self.backend
   }

   pub fn repositories(&self) -> &Arc<Repositories> {
      &self.repos
   }

   pub fn store(&self) -> &SharedStore {
      &self.store
   }

   pub fn session(&self) -> &Arc<Session> {
      &self.session
   }

   pub fn sync(&self) -> &Arc<SyncEngine> {
      &self.sync
   }

   /// Reloads the local store from the repositories.
   pub async fn load(&self) -> Result<()> {
      self.repos.invalidate_cache().await;
      self.store.lock().await.load().await
   }

   pub async fn read<R>(&self, f: impl FnOnce(&LocalStore) -> R) -> R {
      f(&*self.store.lock().await)
   }

   /// Applies a mutation, commits it, and queues its changes while still
   /// holding the store, so a concurrent merge never observes the mutation
   /// without its queued change. Delivery to the remote happens after the
   /// store is released and stops at the first change that stays queued.
   pub async fn mutate<R, F>(&self, f: F) -> Result<R>
   where
      F: FnOnce(&mut LocalStore) -> Result<R> + Send,
      R: Send,
   {
      let (out, committed, keys) = {
         let mut store = self.store.lock().await;
         let out = f(&mut store);
         let changes = store.take_changes();
         if changes.is_empty() {
            return out;
         }

         let committed = store.commit().await;
         let mut keys: Vec<String> = Vec::with_capacity(changes.len());
         for change in changes {
            match self
               .sync
               .record_change(change.kind, &change.id, change.payload, change.operation)
               .await
            {
               Ok(key) if !keys.contains(&key) => keys.push(key),
               Ok(_) => {},
               Err(e) => tracing::error!(
                  kind = %change.kind,
                  id = %change.id,
                  "failed to record change: {e}"
               ),
            }
         }
         (out, committed, keys)
      };

      for key in &keys {
         if self.sync.deliver(key).await == Delivery::Queued {
            break;
         }
      }
      committed?;
      out
   }

   /// Drops all local data and sync bookkeeping. The next sync is a full pull.
   pub async fn clear_data(&self) -> Result<()> {
      let mut store = self.store.lock().await;
      store.clear_all_data();
      store.commit().await?;
      self.sync.reset().await?;
      tracing::info!("local data cleared");
      Ok(())
   }
}
