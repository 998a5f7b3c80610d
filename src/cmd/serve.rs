//! Long-running background process.
//!
//! Owns the local store and the sync engine, answers calls over the profile's
//! Unix socket, and runs a periodic sync until `system.shutdown` or Ctrl+C.

use std::sync::Arc;

use console::style;
use tokio::{signal, sync::watch};

use crate::{
   Result,
   app::AppContext,
   config::Config,
   error::{Error, IpcError, RpcError},
   rpc::{self, Dispatcher, ErrorCode, RpcRequest, RpcResponse, SocketBuffer},
   scheduler::ScheduledTask,
   usock::{self, SocketError},
};

const SHUTDOWN_METHOD: &str = "system.shutdown";

struct Server {
   dispatcher:        Dispatcher,
   max_message_bytes: usize,
   shutdown:          watch::Sender<bool>,
}

struct PidFileGuard {
   files: usock::ProfileFiles,
}

impl Drop for PidFileGuard {
   fn drop(&mut self) {
      self.files.remove_pid();
   }
}

/// Dispatcher with every domain method plus the process-control ones.
pub fn build_dispatcher(app: &Arc<AppContext>) -> Dispatcher {
   let mut dispatcher = Dispatcher::new(app.config().dev_stack_traces);
   rpc::register_all(&mut dispatcher, app);
   // The accept loop stops after the reply to this call is written.
   dispatcher.register(SHUTDOWN_METHOD, |(): ()| async { Ok::<_, Error>(true) });
   dispatcher
}

fn spawn_sync_task(app: &Arc<AppContext>) -> Option<ScheduledTask> {
   let period = app.config().sync_interval();
   if period.is_zero() {
      tracing::info!("periodic sync disabled");
      return None;
   }
   let app = Arc::clone(app);
   Some(ScheduledTask::spawn("sync", period, true, move || {
      let app = Arc::clone(&app);
      async move {
         match app.sync().sync_all(false).await {
            Ok(report) => tracing::info!(
               outcome = ?report.outcome,
               mode = ?report.mode,
               pushed = report.pushed,
               pulled = report.pulled,
               "periodic sync finished"
            ),
            Err(e) => tracing::warn!("periodic sync failed: {e}"),
         }
      }
   }))
}

/// Executes the serve command.
pub async fn execute(config: Config) -> Result<()> {
   let profile = config.profile.clone();
   let max_message_bytes = config.effective_max_message_bytes();

   let listener = match usock::Listener::bind(&profile).await {
      Ok(l) => l,
      Err(Error::Socket(SocketError::AlreadyRunning)) => {
         println!("{}", style("Server already running").yellow());
         return Ok(());
      },
      Err(e) => return Err(e),
   };

   let files = listener.files().clone();
   files.write_pid();
   let _pid_guard = PidFileGuard { files };

   println!("{}", style("Starting marksync server...").green().bold());
   println!("Listening: {}", style(listener.files().socket.display()).cyan());
   println!("Profile: {}", style(&profile).cyan());

   let app = Arc::new(AppContext::open(config).await?);
   if app.config().remote_url.is_none() {
      println!("{}", style("No remote configured; changes stay local").dim());
   }

   let (shutdown_tx, shutdown_rx) = watch::channel(false);
   let server = Arc::new(Server {
      dispatcher: build_dispatcher(&app),
      max_message_bytes,
      shutdown: shutdown_tx.clone(),
   });

   let sync_task = spawn_sync_task(&app);

   println!("\n{}", style("Server listening").green());
   println!("{}", style("Press Ctrl+C to stop").dim());

   let accept_server = Arc::clone(&server);
   let mut accept_shutdown = shutdown_rx.clone();
   let accept_handle = tokio::spawn(async move {
      loop {
         tokio::select! {
            result = listener.accept() => {
               match result {
                  Ok(stream) => {
                     let client_server = Arc::clone(&accept_server);
                     tokio::spawn(async move { client_server.handle_client(stream).await });
                  }
                  Err(e) => {
                     tracing::error!("accept error: {e}");
                  }
               }
            }
            _ = accept_shutdown.changed() => {
               if *accept_shutdown.borrow() {
                  break;
               }
            }
         }
      }
   });

   tokio::select! {
      _ = signal::ctrl_c() => {
         println!("\n{}", style("Shutting down...").yellow());
         let _ = shutdown_tx.send(true);
      }
      () = async {
         let mut rx = shutdown_rx.clone();
         loop {
            if rx.changed().await.is_err() || *rx.borrow() {
               break;
            }
         }
      } => {}
   }

   accept_handle.abort();
   if let Some(task) = sync_task {
      task.shutdown().await;
   }

   println!("{}", style("Server stopped").green());
   Ok(())
}

impl Server {
   async fn handle_client(self: &Arc<Self>, stream: usock::Stream) {
      if handle_connection(&self.dispatcher, stream, self.max_message_bytes).await {
         let _ = self.shutdown.send(true);
      }
   }
}

/// Serves requests on one connection until the peer hangs up. Returns true
/// when the peer asked the process to shut down. Frames that do not decode as
/// a request get an `InvalidParams` reply with an empty id.
pub async fn handle_connection(
   dispatcher: &Dispatcher,
   mut stream: usock::Stream,
   max_message_bytes: usize,
) -> bool {
   let mut buffer = SocketBuffer::with_limit(max_message_bytes);

   loop {
      let request: RpcRequest = match buffer.recv(&mut stream).await {
         Ok(Some(req)) => req,
         Ok(None) => return false,
         // The whole frame was consumed, so the stream is still aligned.
         Err(Error::Ipc(IpcError::Deserialize(e))) => {
            tracing::debug!("malformed request: {e}");
            let reply = RpcResponse::failure(
               "",
               RpcError::new(ErrorCode::InvalidParams, format!("malformed request: {e}")),
            );
            if buffer.send(&mut stream, &reply).await.is_err() {
               return false;
            }
            continue;
         },
         Err(e) => {
            tracing::debug!("client read error: {e}");
            return false;
         },
      };

      let shutting_down = request.method == SHUTDOWN_METHOD;
      let response = dispatcher.dispatch(request).await;

      if let Err(e) = buffer.send(&mut stream, &response).await {
         tracing::debug!("client write error: {e}");
         return false;
      }

      if shutting_down {
         return true;
      }
   }
}
