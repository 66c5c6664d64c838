use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use cinemeld_core::types::{MediaKind, SyncCategory};
use cinemeld_db::repo::sync_stamps;
use cinemeld_metadata::trakt::TraktApi;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::debug;

use crate::SyncError;

const KINDS: [MediaKind; 4] = [
    MediaKind::Movie,
    MediaKind::Show,
    MediaKind::Season,
    MediaKind::Episode,
];

/// Remote and locally-applied activity stamps. A category must be reloaded
/// when the remote stamp is newer than the local one.
pub struct SyncClock {
    pool: SqlitePool,
    api: Arc<dyn TraktApi>,
    poll_interval: Duration,
    polled: Mutex<Option<Instant>>,
}

impl SyncClock {
    pub fn new(pool: SqlitePool, api: Arc<dyn TraktApi>, poll_interval: Duration) -> Self {
        Self {
            pool,
            api,
            poll_interval,
            polled: Mutex::new(None),
        }
    }

    /// Fetch the remote stamps unless they were fetched within the poll
    /// interval. Returns whether a fetch happened.
    pub async fn poll(&self, force: bool) -> Result<bool, SyncError> {
        let mut polled = self.polled.lock().await;
        if !force && polled.is_some_and(|at| at.elapsed() < self.poll_interval) {
            return Ok(false);
        }
        let activities = self.api.last_activities().await?;
        for kind in KINDS {
            for category in SyncCategory::ALL {
                if let Some(at) = activities.get(kind, category) {
                    sync_stamps::set_remote(&self.pool, kind.as_str(), category.as_str(), at.timestamp())
                        .await?;
                }
            }
        }
        *polled = Some(Instant::now());
        debug!("remote activity stamps refreshed");
        Ok(true)
    }

    pub async fn activity_remote(
        &self,
        kind: MediaKind,
        category: SyncCategory,
    ) -> Result<Option<DateTime<Utc>>, SyncError> {
        let stamps = sync_stamps::get(&self.pool, kind.as_str(), category.as_str()).await?;
        Ok(to_time(stamps.remote_ts))
    }

    pub async fn activity_local(
        &self,
        kind: MediaKind,
        category: SyncCategory,
    ) -> Result<Option<DateTime<Utc>>, SyncError> {
        let stamps = sync_stamps::get(&self.pool, kind.as_str(), category.as_str()).await?;
        Ok(to_time(stamps.local_ts))
    }

    pub async fn must_refresh(&self, kind: MediaKind, category: SyncCategory) -> Result<bool, SyncError> {
        let stamps = sync_stamps::get(&self.pool, kind.as_str(), category.as_str()).await?;
        Ok(stamps.remote_ts > stamps.local_ts)
    }

    /// Record that the local copy now reflects the remote state.
    pub async fn mark_applied(&self, kind: MediaKind, category: SyncCategory) -> Result<(), SyncError> {
        let stamps = sync_stamps::get(&self.pool, kind.as_str(), category.as_str()).await?;
        sync_stamps::set_local(&self.pool, kind.as_str(), category.as_str(), stamps.remote_ts).await?;
        Ok(())
    }

    pub async fn reset(&self) -> Result<(), SyncError> {
        sync_stamps::reset(&self.pool).await?;
        *self.polled.lock().await = None;
        Ok(())
    }
}

fn to_time(ts: i64) -> Option<DateTime<Utc>> {
    if ts <= 0 {
        return None;
    }
    Utc.timestamp_opt(ts, 0).single()
}
