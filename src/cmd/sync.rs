//! Trigger a sync in the background process and print the report.

use console::style;

use crate::{
   Result,
   config::Config,
   rpc::Client,
   sync::{SyncOutcome, SyncReport},
};

fn print_report(report: &SyncReport) {
   match report.outcome {
      SyncOutcome::Completed => {
         let mode = report
            .mode
            .map_or_else(|| "sync".to_string(), |m| format!("{m:?}").to_lowercase());
         println!("{} {}", style("✓").green(), style(format!("{mode} sync completed")).bold());
      },
      SyncOutcome::AlreadyRunning => {
         println!("{}", style("A sync is already running").yellow());
         return;
      },
      SyncOutcome::NotAuthenticated => {
         println!("{}", style("Not signed in; changes stay queued locally").yellow());
         return;
      },
      SyncOutcome::FailedStage => {
         let stage = report.failed_stage.as_deref().unwrap_or("unknown");
         println!("{} {}", style("✗").red(), style(format!("sync failed during {stage}")).bold());
      },
   }
   println!("  Pushed:  {}", report.pushed);
   if report.push_failed > 0 {
      println!("  {} {}", style("Queued:").yellow(), report.push_failed);
   }
   println!("  Pulled:  {}", report.pulled);
   println!("  Applied: {}", report.applied);
}

/// Executes the sync command.
pub async fn execute(config: &Config, full: bool, json: bool) -> Result<()> {
   let client = Client::connect(config);
   let report = client.sync_run(full).await?;
   if json {
      println!("{}", serde_json::to_string_pretty(&report)?);
   } else {
      print_report(&report);
   }
   Ok(())
}
