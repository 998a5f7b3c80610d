//! Cancellable periodic tasks.

use std::{future::Future, time::Duration};

use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

/// A background task that runs `tick` every `period` until cancelled.
///
/// Ticks never overlap: the next sleep starts after the previous tick
/// finishes. Cancellation only interrupts the sleep, so a tick that started
/// always runs to completion. Dropping the handle aborts the task outright;
/// use [`ScheduledTask::shutdown`] to stop cleanly.
pub struct ScheduledTask {
   name:   &'static str,
   token:  CancellationToken,
   handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
   /// Spawns the task. With `run_immediately` the first tick fires before the
   /// first sleep.
   pub fn spawn<F, Fut>(
      name: &'static str,
      period: Duration,
      run_immediately: bool,
      mut tick: F,
   ) -> Self
   where
      F: FnMut() -> Fut + Send + 'static,
      Fut: Future<Output = ()> + Send + 'static,
   {
      let token = CancellationToken::new();
      let token_clone = token.clone();
      let handle = tokio::spawn(async move {
         if run_immediately && !token_clone.is_cancelled() {
            tick().await;
         }
         loop {
            tokio::select! {
               biased;
               () = token_clone.cancelled() => break,
               () = time::sleep(period) => {},
            }
            tracing::trace!(task = name, "tick");
            tick().await;
         }
         tracing::debug!(task = name, "scheduled task stopped");
      });
      Self { name, token, handle: Some(handle) }
   }

   pub const fn name(&self) -> &'static str {
      self.name
   }

   pub fn is_cancelled(&self) -> bool {
      self.token.is_cancelled()
   }

   pub fn cancel(&self) {
      self.token.cancel();
   }

   /// Cancels the task and waits for a tick in progress to finish.
   pub async fn shutdown(mut self) {
      self.token.cancel();
      if let Some(handle) = self.handle.take() {
         if let Err(e) = handle.await {
            tracing::warn!(task = self.name, "scheduled task ended abnormally: {e}");
         }
      }
   }
}

impl Drop for ScheduledTask {
   fn drop(&mut self) {
      self.token.cancel();
      if let Some(handle) = self.handle.take() {
         handle.abort();
      }
   }
}
