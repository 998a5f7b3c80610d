//! Bounded exponential backoff for retryable failures.

use std::{future::Future, time::Duration};

use tokio::time;

use crate::{Result, config::Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
   /// Total tries, including the first.
   pub attempts:   u32,
   pub base_delay: Duration,
   pub max_delay:  Duration,
}

impl RetryPolicy {
   pub fn from_config(cfg: &Config) -> Self {
      Self {
         attempts:   cfg.retry_attempts.max(1),
         base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
         max_delay:  Duration::from_millis(cfg.retry_max_delay_ms),
      }
   }

   pub const fn none() -> Self {
      Self { attempts: 1, base_delay: Duration::ZERO, max_delay: Duration::ZERO }
   }

   /// Delay before retry number `retry` (1-based).
   pub fn delay_for(&self, retry: u32) -> Duration {
      let factor = 2u32.saturating_pow(retry.saturating_sub(1));
      self.base_delay.saturating_mul(factor).min(self.max_delay)
   }
}

impl Default for RetryPolicy {
   fn default() -> Self {
      Self::from_config(&Config::default())
   }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
   F: FnMut() -> Fut,
   Fut: Future<Output = Result<T>>,
{
   let mut attempt = 1;
   loop {
      match op().await {
         Ok(value) => return Ok(value),
         Err(e) if e.is_retryable() && attempt < policy.attempts => {
            let delay = policy.delay_for(attempt);
            tracing::debug!(attempt, ?delay, "retrying after error: {e}");
            time::sleep(delay).await;
            attempt += 1;
         },
         Err(e) => return Err(e),
      }
   }
}

#[cfg(test)]
mod tests {
   use std::sync::atomic::{AtomicU32, Ordering};

   use super::*;
   use crate::error::{Error, RemoteError, ValidationError};

   fn policy() -> RetryPolicy {
      RetryPolicy {
         attempts:   3,
         base_delay: Duration::from_millis(100),
         max_delay:  Duration::from_millis(150),
      }
   }

   #[test]
   fn delays_double_and_cap() {
      let p = policy();
      assert_eq!(p.delay_for(1), Duration::from_millis(100));
      assert_eq!(p.delay_for(2), Duration::from_millis(150));
   }

   #[tokio::test(start_paused = true)]
   async fn retries_transient_failures() {
      let calls = &AtomicU32::new(0);
      let start = time::Instant::now();
      let out = retry_with_backoff(&policy(), || async move {
         if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(Error::from(RemoteError::Offline("down".into())))
         } else {
            Ok(7)
         }
      })
      .await
      .expect("eventually succeeds");
      assert_eq!(out, 7);
      assert_eq!(calls.load(Ordering::SeqCst), 3);
      let waited = start.elapsed();
      assert!(waited >= Duration::from_millis(250) && waited < Duration::from_millis(300));
   }

   #[tokio::test(start_paused = true)]
   async fn gives_up_on_permanent_errors() {
      let calls = &AtomicU32::new(0);
      let err = retry_with_backoff(&policy(), || async move {
         calls.fetch_add(1, Ordering::SeqCst);
         Err::<(), _>(Error::from(ValidationError::EmptyTagName))
      })
      .await
      .expect_err("fails");
      assert!(matches!(err, Error::Validation(_)));
      assert_eq!(calls.load(Ordering::SeqCst), 1);
   }
}
