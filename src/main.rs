use clap::{Parser, Subcommand};
use marksync::{Result, cmd, config};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for marksync
#[derive(Parser)]
#[command(name = "marksync")]
#[command(about = "Tag pages locally and keep them in sync")]
#[command(version)]
struct Cli {
   #[arg(long, global = true, env = "MARKSYNC_PROFILE", help = "Profile to operate on")]
   profile: Option<String>,

   #[command(subcommand)]
   command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
   #[command(about = "Run the background process for a profile")]
   Serve,

   #[command(about = "Invoke a method on the background process")]
   Call {
      #[arg(help = "Method name, e.g. tags.create")]
      method: String,

      #[arg(help = "Positional arguments, each parsed as JSON (plain strings allowed)")]
      args: Vec<String>,
   },

   #[command(about = "Push queued changes and pull remote ones")]
   Sync {
      #[arg(long, help = "Force a full pull instead of an incremental one")]
      full: bool,

      #[arg(long, help = "JSON output")]
      json: bool,
   },

   #[command(about = "Show background process and sync status")]
   Status {
      #[arg(long, help = "JSON output")]
      json: bool,
   },

   #[command(about = "Stop the background process")]
   Stop,
}

#[tokio::main]
async fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
      .with_writer(std::io::stderr)
      .init();

   if let Err(err) = run(Cli::parse()).await {
      eprintln!("Error: {err}");
      std::process::exit(err.exit_code());
   }
}

async fn run(cli: Cli) -> Result<()> {
   let mut cfg = config::get().clone();
   if let Some(profile) = cli.profile {
      cfg.profile = profile;
   }
   cfg.validate()?;

   match cli.command {
      Cmd::Serve => cmd::serve::execute(cfg).await,
      Cmd::Call { method, args } => cmd::call::execute(&cfg, &method, &args).await,
      Cmd::Sync { full, json } => cmd::sync::execute(&cfg, full, json).await,
      Cmd::Status { json } => cmd::status::execute(&cfg, json).await,
      Cmd::Stop => cmd::stop::execute(&cfg).await,
   }
}
