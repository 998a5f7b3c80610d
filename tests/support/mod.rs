#![allow(dead_code)]

use std::{collections::BTreeSet, sync::Arc};

use marksync::{
   app::AppContext,
   config::Config,
   remote::{MemoryRemote, RemoteStore},
   session::Session,
   store::{Backend, MemoryBackend},
   types::{Dataset, Page, Tag},
};

pub const USER: &str = "user-1";

/// App context over in-memory storage and an in-memory remote.
pub struct Harness {
   pub backend: Arc<MemoryBackend>,
   pub remote:  Arc<MemoryRemote>,
   pub session: Arc<Session>,
   pub app:     Arc<AppContext>,
}

impl Harness {
   pub fn new() -> Self {
      Self::with_config(Config::default())
   }

   pub fn with_config(config: Config) -> Self {
      let backend = Arc::new(MemoryBackend::new());
      let remote = Arc::new(MemoryRemote::new());
      let session = Arc::new(Session::default());
      let app = Arc::new(AppContext::new(
         config,
         Arc::clone(&backend) as Arc<dyn Backend>,
         Some(Arc::clone(&remote) as Arc<dyn RemoteStore>),
         Arc::clone(&session),
      ));
      Self { backend, remote, session, app }
   }

   pub fn sign_in(&self) {
      self.session.sign_in(USER, Some("token".to_string()));
   }
}

pub fn tag(id: &str, name: &str, updated_at: i64) -> Tag {
   Tag {
      id: id.to_string(),
      name: name.to_string(),
      description: None,
      color: None,
      bindings: BTreeSet::new(),
      created_at: 1,
      updated_at,
      deleted: false,
   }
}

pub fn page(id: &str, url: &str, updated_at: i64) -> Page {
   Page {
      id: id.to_string(),
      url: url.to_string(),
      title: url.to_string(),
      domain: "example.com".to_string(),
      tags: BTreeSet::new(),
      created_at: 1,
      updated_at,
      favicon: None,
      description: None,
      deleted: false,
      title_manually_edited: None,
      title_source: None,
   }
}

pub fn dataset(tags: Vec<Tag>, pages: Vec<Page>) -> Dataset {
   Dataset {
      tags:  tags.into_iter().map(|t| (t.id.clone(), t)).collect(),
      pages: pages.into_iter().map(|p| (p.id.clone(), p)).collect(),
   }
}
