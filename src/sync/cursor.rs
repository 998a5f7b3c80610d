use serde::{Deserialize, Serialize};

use crate::{
   Result,
   store::{self, Backend, keys},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
   Full,
   Incremental,
}

/// Timestamps that decide the shape of the next pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
   pub last_incremental_at: i64,
   pub last_full_sync_at:   i64,
}

impl SyncCursor {
   pub async fn load(backend: &dyn Backend) -> Result<Self> {
      Ok(Self {
         last_incremental_at: store::load(backend, keys::LAST_INCREMENTAL_AT)
            .await?
            .unwrap_or(0),
         last_full_sync_at:   store::load(backend, keys::LAST_FULL_SYNC_AT)
            .await?
            .unwrap_or(0),
      })
   }

   pub async fn save(&self, backend: &dyn Backend) -> Result<()> {
      store::save(backend, keys::LAST_INCREMENTAL_AT, &self.last_incremental_at).await?;
      store::save(backend, keys::LAST_FULL_SYNC_AT, &self.last_full_sync_at).await?;
      Ok(())
   }

   /// Full when forced, when there is no shadow map, or when the last full
   /// pull is older than `full_interval_ms`.
   pub fn decide(
      &self,
      force_full: bool,
      has_shadow: bool,
      now_ms: i64,
      full_interval_ms: i64,
   ) -> SyncMode {
      if force_full || !has_shadow || self.last_incremental_at <= 0 {
         return SyncMode::Full;
      }
      if now_ms.saturating_sub(self.last_full_sync_at) >= full_interval_ms {
         return SyncMode::Full;
      }
      SyncMode::Incremental
   }

   /// Moves the cursor to `pulled_at` after a successful apply.
   pub fn advance(&mut self, mode: SyncMode, pulled_at: i64) {
      self.last_incremental_at = self.last_incremental_at.max(pulled_at);
      if mode == SyncMode::Full {
         self.last_full_sync_at = self.last_full_sync_at.max(pulled_at);
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   const DAY: i64 = 86_400_000;

   #[test]
   fn full_when_shadow_missing_or_stale() {
      let cursor = SyncCursor { last_incremental_at: 10 * DAY, last_full_sync_at: 10 * DAY };
      assert_eq!(cursor.decide(false, false, 10 * DAY + 5, DAY), SyncMode::Full);
      assert_eq!(cursor.decide(true, true, 10 * DAY + 5, DAY), SyncMode::Full);
      assert_eq!(cursor.decide(false, true, 10 * DAY + 5, DAY), SyncMode::Incremental);
      assert_eq!(cursor.decide(false, true, 11 * DAY, DAY), SyncMode::Full);
   }

   #[test]
   fn advance_only_moves_forward() {
      let mut cursor = SyncCursor { last_incremental_at: 50, last_full_sync_at: 10 };
      cursor.advance(SyncMode::Incremental, 40);
      assert_eq!(cursor.last_incremental_at, 50);
      cursor.advance(SyncMode::Full, 60);
      assert_eq!(cursor, SyncCursor { last_incremental_at: 60, last_full_sync_at: 60 });
   }
}
