//! Utility functions for time and filesystem operations

use std::{
   fs::{self, File},
   io::Write,
   path::{Path, PathBuf},
};

use chrono::Utc;

use crate::Result;

/// Current wall-clock time as Unix milliseconds.
pub fn now_millis() -> i64 {
   Utc::now().timestamp_millis()
}

/// Writes `data` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
   if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
   }
   let tmp_path = temp_path(path);
   {
      let mut file = File::create(&tmp_path)?;
      file.write_all(data)?;
      file.sync_all()?;
   }
   fs::rename(&tmp_path, path)?;
   if let Some(parent) = path.parent() {
      fsync_dir(parent)?;
   }
   Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
   let name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
   path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

#[cfg(unix)]
pub fn fsync_dir(dir: &Path) -> Result<()> {
   File::open(dir)?.sync_all()?;
   Ok(())
}

#[cfg(not(unix))]
pub fn fsync_dir(_dir: &Path) -> Result<()> {
   Ok(())
}

/// Formats a millisecond timestamp for human-readable output.
pub fn format_millis(ms: i64) -> String {
   chrono::DateTime::from_timestamp_millis(ms)
      .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
      .unwrap_or_else(|| "never".to_string())
}
