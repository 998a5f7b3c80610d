//! Credentials used to decide whether remote replication is possible.

use parking_lot::RwLock;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Credentials {
   user_id:      String,
   access_token: Option<String>,
}

#[derive(Debug, Default)]
pub struct Session {
   inner: RwLock<Option<Credentials>>,
}

impl Session {
   pub fn from_config(cfg: &Config) -> Self {
      let session = Self::default();
      if let Some(user_id) = cfg.user_id.as_deref().filter(|u| !u.is_empty()) {
         session.sign_in(user_id, cfg.access_token.clone());
      }
      session
   }

   pub fn sign_in(&self, user_id: &str, access_token: Option<String>) {
      tracing::info!(user_id, "signed in");
      *self.inner.write() = Some(Credentials { user_id: user_id.to_string(), access_token });
   }

   pub fn sign_out(&self) {
      *self.inner.write() = None;
   }

   pub fn is_authenticated(&self) -> bool {
      self.inner.read().is_some()
   }

   pub fn user_id(&self) -> Option<String> {
      self.inner.read().as_ref().map(|c| c.user_id.clone())
   }

   pub fn access_token(&self) -> Option<String> {
      self.inner.read().as_ref().and_then(|c| c.access_token.clone())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn config_user_signs_in() {
      let cfg = Config { user_id: Some("u1".into()), ..Config::default() };
      let session = Session::from_config(&cfg);
      assert!(session.is_authenticated());
      assert_eq!(session.user_id().as_deref(), Some("u1"));
      session.sign_out();
      assert!(!session.is_authenticated());
   }
}
