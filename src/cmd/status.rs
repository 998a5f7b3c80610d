//! Server status command.
//!
//! Shows whether the background process for the profile is up and where its
//! sync stands.

use console::style;

use crate::{
   Result,
   config::Config,
   rpc::Client,
   sync::{SyncState, SyncStatus},
   usock, util,
};

fn describe_time(ms: i64) -> String {
   if ms <= 0 { "never".to_string() } else { util::format_millis(ms) }
}

fn print_status(status: &SyncStatus) {
   let state = match status.state {
      SyncState::Idle => style("idle").green(),
      SyncState::Pushing => style("pushing").cyan(),
      SyncState::Pulling => style("pulling").cyan(),
      SyncState::Merging => style("merging").cyan(),
   };
   println!("  Sync:             {state}");
   println!(
      "  Signed in:        {}",
      if status.authenticated { style("yes").green() } else { style("no").yellow() }
   );
   println!("  Pending changes:  {}", status.pending_changes);
   println!("  Last incremental: {}", describe_time(status.last_incremental_at));
   println!("  Last full sync:   {}", describe_time(status.last_full_sync_at));
   if let Some(err) = &status.last_error {
      let label = if status.needs_attention { "Needs attention:" } else { "Last error:      " };
      println!("  {} {}", style(label).red(), err);
   }
}

/// Executes the status command.
pub async fn execute(config: &Config, json: bool) -> Result<()> {
   let profile = config.profile.as_str();

   if !usock::ProfileFiles::for_profile(profile).socket_exists() {
      if json {
         println!("{}", serde_json::json!({ "running": false, "profile": profile }));
      } else {
         println!("{}", style("No server running").dim());
      }
      return Ok(());
   }

   let client = Client::connect(config);
   let hello = match client.hello().await {
      Ok(hello) => hello,
      Err(e) => {
         tracing::debug!("hello failed: {e}");
         if json {
            println!("{}", serde_json::json!({ "running": false, "profile": profile, "stale": true }));
         } else {
            println!("  {} {} {}", style("●").red(), profile, style("(stale)").dim());
         }
         return Ok(());
      },
   };
   let status = client.sync_status().await?;

   if json {
      let out = serde_json::json!({
         "running": true,
         "profile": hello.profile,
         "pid": hello.pid,
         "protocolVersion": hello.protocol_version,
         "sync": status,
      });
      println!("{}", serde_json::to_string_pretty(&out)?);
      return Ok(());
   }

   println!(
      "  {} {} {}",
      style("●").green(),
      hello.profile,
      style(format!("(pid {}, v{})", hello.pid, hello.binary_version)).dim()
   );
   print_status(&status);
   Ok(())
}
