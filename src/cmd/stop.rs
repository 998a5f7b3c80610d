//! Stop server command.
//!
//! Asks the background process for the current profile to shut down, and
//! cleans up after it when it no longer answers.

use std::{sync::Arc, time::Duration};

use console::style;

use crate::{
   Result,
   config::Config,
   rpc::{Client, SocketTransport},
   usock::{self, ProfileFiles},
};

const RPC_TIMEOUT: Duration = Duration::from_millis(2000);

fn looks_like_marksync_serve(pid: u32) -> bool {
   let Ok(bytes) = std::fs::read(format!("/proc/{pid}/cmdline")) else {
      return false;
   };
   let cmdline = String::from_utf8_lossy(&bytes);
   cmdline.contains("marksync") && cmdline.contains("serve")
}

fn force_kill_if_possible(files: &ProfileFiles) -> bool {
   let Some(pid) = files.read_pid() else {
      return false;
   };
   if !usock::pid_is_alive(pid) || !looks_like_marksync_serve(pid) {
      return false;
   }
   let Ok(pid) = libc::pid_t::try_from(pid) else {
      return false;
   };
   // SAFETY: sending SIGTERM to a pid we just verified belongs to our server.
   unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

fn cleanup(files: &ProfileFiles) {
   _ = force_kill_if_possible(files);
   files.remove_all();
}

/// Executes the stop command.
pub async fn execute(config: &Config) -> Result<()> {
   let profile = config.profile.as_str();

   let files = ProfileFiles::for_profile(profile);
   if !files.socket_exists() {
      println!("{}", style("No server running for this profile").yellow());
      return Ok(());
   }

   let transport = SocketTransport::new(
      profile,
      config.connect_timeout(),
      config.effective_max_message_bytes(),
   );
   let client = Client::new(Arc::new(transport), RPC_TIMEOUT);

   match client.shutdown().await {
      Ok(true) => println!("{}", style("Server stopped").green()),
      Ok(false) => println!("{}", style("Unexpected response from server").yellow()),
      Err(e) => {
         tracing::debug!("shutdown call failed: {e}");
         cleanup(&files);
         println!("{}", style("Server unresponsive; removed socket").yellow());
      },
   }

   Ok(())
}
