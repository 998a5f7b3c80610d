//! Configuration management for timeouts, sync cadence, remote access, and paths.

use std::{
   fs,
   path::{Path, PathBuf},
   sync::OnceLock,
   time::Duration,
};

use directories::BaseDirs;
use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub const MAX_TAG_NAME_CHARS: usize = 50;
pub const MAX_MESSAGE_BYTES_CAP: usize = 64 * 1024 * 1024;

/// Application configuration loaded from config file and environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   pub profile: String,

   pub rpc_timeout_ms:     u64,
   pub connect_timeout_ms: u64,
   pub remote_timeout_ms:  u64,
   pub max_message_bytes:  usize,
   pub dev_stack_traces:   bool,

   pub sync_interval_secs:      u64,
   pub full_sync_interval_secs: u64,
   pub sync_lock_ttl_ms:        u64,
   pub max_tag_name_chars:      usize,

   pub retry_attempts:      u32,
   pub retry_base_delay_ms: u64,
   pub retry_max_delay_ms:  u64,

   pub remote_url:     Option<String>,
   pub remote_api_key: Option<String>,
   pub user_id:        Option<String>,
   pub access_token:   Option<String>,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         profile:                 "default".to_string(),
         rpc_timeout_ms:          5000,
         connect_timeout_ms:      500,
         remote_timeout_ms:       4000,
         max_message_bytes:       16 * 1024 * 1024,
         dev_stack_traces:        cfg!(debug_assertions),
         sync_interval_secs:      300,
         full_sync_interval_secs: 24 * 60 * 60,
         sync_lock_ttl_ms:        120_000,
         max_tag_name_chars:      MAX_TAG_NAME_CHARS,
         retry_attempts:          3,
         retry_base_delay_ms:     200,
         retry_max_delay_ms:      5000,
         remote_url:              None,
         remote_api_key:          None,
         user_id:                 None,
         access_token:            None,
      }
   }
}

impl Config {
   pub fn load() -> Self {
      let config_path = ensure_global_config();

      Figment::from(Serialized::defaults(Self::default()))
         .merge(Toml::file(config_path))
         .merge(Env::prefixed("MARKSYNC_").lowercase(true))
         .extract()
         .inspect_err(|e| tracing::warn!("failed to parse config: {e}"))
         .unwrap_or_default()
   }

   fn create_default_config(path: &Path) {
      if let Some(parent) = path.parent() {
         let _ = fs::create_dir_all(parent);
      }
      let default_config = Self::default();
      if let Ok(toml) = toml::to_string_pretty(&default_config) {
         let _ = fs::write(path, toml);
      }
   }

   pub const fn rpc_timeout(&self) -> Duration {
      Duration::from_millis(self.rpc_timeout_ms)
   }

   pub const fn connect_timeout(&self) -> Duration {
      Duration::from_millis(self.connect_timeout_ms)
   }

   /// Upper bound for one request to the remote store.
   pub const fn remote_timeout(&self) -> Duration {
      Duration::from_millis(self.remote_timeout_ms)
   }

   pub const fn sync_interval(&self) -> Duration {
      Duration::from_secs(self.sync_interval_secs)
   }

   pub const fn full_sync_interval(&self) -> Duration {
      Duration::from_secs(self.full_sync_interval_secs)
   }

   pub fn effective_max_message_bytes(&self) -> usize {
      self.max_message_bytes.clamp(1024, MAX_MESSAGE_BYTES_CAP)
   }

   pub fn effective_max_tag_name_chars(&self) -> usize {
      self.max_tag_name_chars.clamp(1, MAX_TAG_NAME_CHARS)
   }

   /// Rejects values that would make the daemon unusable.
   pub fn validate(&self) -> Result<()> {
      if self.rpc_timeout_ms == 0 {
         return Err(ConfigError::Invalid("rpc_timeout_ms must be positive".to_string()).into());
      }
      if self.connect_timeout_ms == 0 {
         return Err(ConfigError::Invalid("connect_timeout_ms must be positive".to_string()).into());
      }
      if self.remote_timeout_ms == 0 {
         return Err(ConfigError::Invalid("remote_timeout_ms must be positive".to_string()).into());
      }
      if self.profile.is_empty()
         || !self
            .profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
      {
         return Err(ConfigError::Invalid(format!("invalid profile name {:?}", self.profile)).into());
      }
      if let Some(url) = &self.remote_url {
         url::Url::parse(url)
            .map_err(|source| ConfigError::RemoteUrl { url: url.clone(), source })?;
      }
      Ok(())
   }

   /// Directory holding the key-value files for this profile.
   pub fn profile_data_dir(&self) -> PathBuf {
      data_dir().join(&self.profile)
   }
}

/// Returns the global configuration instance
pub fn get() -> &'static Config {
   CONFIG.get_or_init(Config::load)
}

/// Returns the base directory for marksync data and configuration
pub fn base_dir() -> &'static PathBuf {
   static ONCE: OnceLock<PathBuf> = OnceLock::new();
   ONCE.get_or_init(|| resolve_base_dir(".marksync"))
}

fn ensure_global_config() -> PathBuf {
   let config_path = config_file_path();
   if !config_path.exists() {
      Config::create_default_config(config_path);
   }
   config_path.to_path_buf()
}

fn resolve_base_dir(dir_name: &str) -> PathBuf {
   if let Ok(custom) = std::env::var("MARKSYNC_HOME") {
      return PathBuf::from(custom);
   }
   BaseDirs::new()
      .map(|d| d.home_dir().join(dir_name))
      .or_else(|| {
         std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(dir_name))
      })
      .unwrap_or_else(|| {
         std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(dir_name)
      })
}

macro_rules! define_paths {
   ($($fn_name:ident: $path:literal),* $(,)?) => {
      $(
         pub fn $fn_name() -> &'static PathBuf {
            static ONCE: OnceLock<PathBuf> = OnceLock::new();
            ONCE.get_or_init(|| base_dir().join($path))
         }
      )*
   };
}

define_paths! {
   config_file_path: "config.toml",
   data_dir: "data",
   socket_dir: "sockets",
}
