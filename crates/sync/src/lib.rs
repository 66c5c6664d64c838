//! Watch-state synchronisation with Trakt: activity clock, in-memory lookup
//! tables, the local mirror, and queued mutations.

pub mod action;
pub mod clock;
pub mod local;
pub mod store;
pub mod tables;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::time::Duration;

use cinemeld_core::error::{Classify, ErrorKind};
use cinemeld_metadata::MetadataError;
use thiserror::Error;

pub use action::{ScrobbleAction, SyncAction, UpdateOutcome};
pub use clock::SyncClock;
pub use local::PlaybackStore;
pub use store::{ProgressCandidate, TraktStore};
pub use tables::{Group, HistoryEntry, ProgressEntry, RatingEntry, Tables};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] MetadataError),
    #[error("db error: {0}")]
    Db(#[from] cinemeld_db::DbError),
    #[error("cache error: {0}")]
    Cache(#[from] cinemeld_cache::CacheError),
    #[error("not signed in to trakt")]
    NotAuthenticated,
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(cinemeld_db::DbError::Sqlx(e))
    }
}

impl Classify for SyncError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(e) => e.kind(),
            Self::Db(_) | Self::Cache(_) => ErrorKind::Internal,
            Self::NotAuthenticated => ErrorKind::Authentication,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Minimum time between two `sync/last_activities` calls.
    pub poll_interval: Duration,
    /// Minimum time between two unforced retry-queue drains.
    pub retry_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5 * 60),
            retry_interval: Duration::from_secs(30 * 60),
        }
    }
}
