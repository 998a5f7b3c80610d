//! Unix domain socket plumbing for the background process.
//!
//! Each profile owns a socket and a pid file with the same stem. Paths that
//! would overflow `sun_path` move to a hashed name under `/tmp`.

use std::{fs, io, os::unix::fs::PermissionsExt, path::PathBuf};

use sha2::{Digest, Sha256};
use tokio::net::{UnixListener, UnixStream};

use crate::Result;

/// Errors that can occur during socket operations
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
   #[error("background process already running")]
   AlreadyRunning,

   #[error("failed to connect: {0}")]
   Connect(#[source] io::Error),

   #[error("failed to bind: {0}")]
   Bind(#[source] io::Error),

   #[error("accept failed: {0}")]
   Accept(#[source] io::Error),

   #[error("failed to create socket directory: {0}")]
   CreateDir(#[source] io::Error),

   #[error("failed to remove stale socket: {0}")]
   RemoveStale(#[source] io::Error),
}

const MAX_SOCKET_PATH_LEN: usize = 100;
const SOCKET_HASH_LEN: usize = 12;

/// Connected peer on a profile socket.
pub type Stream = UnixStream;

/// Socket and pid file locations for one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFiles {
   pub socket: PathBuf,
   pub pid:    PathBuf,
}

impl ProfileFiles {
   pub fn for_profile(profile: &str) -> Self {
      let dir = crate::config::socket_dir().clone();
      let stem = dir.join(profile);
      let stem = if stem.with_extension("sock").as_os_str().len() <= MAX_SOCKET_PATH_LEN {
         stem
      } else {
         let digest = hex::encode(Sha256::digest(stem.as_os_str().as_encoded_bytes()));
         // SAFETY: geteuid has no preconditions and cannot fail.
         let uid = unsafe { libc::geteuid() };
         PathBuf::from(format!("/tmp/marksync-{uid}"))
            .join(format!("ms-{}", &digest[..SOCKET_HASH_LEN]))
      };
      Self { socket: stem.with_extension("sock"), pid: stem.with_extension("pid") }
   }

   /// Whether a socket file exists, live or stale.
   pub fn socket_exists(&self) -> bool {
      self.socket.exists()
   }

   pub fn write_pid(&self) {
      if let Some(parent) = self.pid.parent() {
         let _ = fs::create_dir_all(parent);
      }
      let _ = fs::write(&self.pid, std::process::id().to_string());
   }

   pub fn read_pid(&self) -> Option<u32> {
      fs::read_to_string(&self.pid).ok()?.trim().parse().ok()
   }

   pub fn remove_pid(&self) {
      let _ = fs::remove_file(&self.pid);
   }

   /// Removes both files after the owning process is gone.
   pub fn remove_all(&self) {
      let _ = fs::remove_file(&self.socket);
      self.remove_pid();
   }
}

/// Whether a process with `pid` exists (signal 0 check).
pub fn pid_is_alive(pid: u32) -> bool {
   let Ok(pid) = libc::pid_t::try_from(pid) else {
      return false;
   };
   // SAFETY: kill with signal 0 only performs permission and existence checks.
   let rc = unsafe { libc::kill(pid, 0) };
   rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Opens a connection to the profile's background process.
pub async fn connect(profile: &str) -> Result<Stream> {
   let files = ProfileFiles::for_profile(profile);
   Ok(UnixStream::connect(&files.socket)
      .await
      .map_err(SocketError::Connect)?)
}

/// Owner of a profile socket. The socket file is unlinked on drop.
pub struct Listener {
   inner: UnixListener,
   files: ProfileFiles,
}

impl Listener {
   /// Binds the profile's socket, refusing when a live process already owns it.
   pub async fn bind(profile: &str) -> Result<Self> {
      let files = ProfileFiles::for_profile(profile);
      if let Some(parent) = files.socket.parent() {
         fs::create_dir_all(parent).map_err(SocketError::CreateDir)?;
         let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
      }

      if files.socket_exists() {
         // A file nobody answers on is left over from a crash.
         if connect(profile).await.is_ok() {
            return Err(SocketError::AlreadyRunning.into());
         }
         fs::remove_file(&files.socket).map_err(SocketError::RemoveStale)?;
      }

      let inner = UnixListener::bind(&files.socket).map_err(SocketError::Bind)?;
      fs::set_permissions(&files.socket, fs::Permissions::from_mode(0o700))
         .map_err(SocketError::Bind)?;
      Ok(Self { inner, files })
   }

   pub async fn accept(&self) -> Result<Stream> {
      let (stream, _) = self.inner.accept().await.map_err(SocketError::Accept)?;
      Ok(stream)
   }

   pub const fn files(&self) -> &ProfileFiles {
      &self.files
   }
}

impl Drop for Listener {
   fn drop(&mut self) {
      let _ = fs::remove_file(&self.files.socket);
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn socket_and_pid_share_a_stem() {
      let files = ProfileFiles::for_profile("default");
      assert_eq!(files.socket.with_extension("pid"), files.pid);
      assert!(files.socket.as_os_str().len() <= MAX_SOCKET_PATH_LEN + 16);
   }

   #[test]
   fn long_profiles_fall_back_to_a_short_path() {
      let files = ProfileFiles::for_profile(&"p".repeat(200));
      assert!(files.socket.as_os_str().len() <= MAX_SOCKET_PATH_LEN);
      assert!(files.socket.to_string_lossy().contains("/tmp/marksync-"));
   }

   #[test]
   fn current_process_is_alive() {
      assert!(pid_is_alive(std::process::id()));
   }
}
