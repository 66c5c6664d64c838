//! Persistent merged records and their refresh classification.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use cinemeld_core::types::{IdBundle, ItemSeed, MediaKind};
use cinemeld_db::repo::meta;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::record::ShowStatus;
use crate::{MetaRecord, MetadataError};

/// Staleness bucket of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Fresh,
    StaleBackground,
    StaleForeground,
    Complete,
    Incomplete,
}

impl RefreshState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::StaleBackground => "stale_background",
            Self::StaleForeground => "stale_foreground",
            Self::Complete => "complete",
            Self::Incomplete => "incomplete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fresh" => Some(Self::Fresh),
            "stale_background" => Some(Self::StaleBackground),
            "stale_foreground" => Some(Self::StaleForeground),
            "complete" => Some(Self::Complete),
            "incomplete" => Some(Self::Incomplete),
            _ => None,
        }
    }

    /// Whether a caller has to wait for a refresh before using the record.
    pub fn blocks(self) -> bool {
        matches!(self, Self::StaleForeground | Self::Incomplete)
    }
}

/// Release category that picks the staleness windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    Unreleased,
    Recent,
    Old,
}

impl Recency {
    pub fn of(record: &MetaRecord, today: NaiveDate) -> Self {
        if matches!(record.kind, MediaKind::Person | MediaKind::Set | MediaKind::List) {
            return Self::Old;
        }
        let Some(released) = record.release_date() else {
            return Self::Unreleased;
        };
        if released > today {
            Self::Unreleased
        } else if (today - released).num_days() <= 365
            || record.status == Some(ShowStatus::Returning)
        {
            Self::Recent
        } else {
            Self::Old
        }
    }

    /// (foreground, background) staleness ages.
    pub fn windows(self) -> (Duration, Duration) {
        match self {
            Self::Unreleased => (Duration::days(1), Duration::hours(6)),
            Self::Recent => (Duration::days(7), Duration::days(2)),
            Self::Old => (Duration::days(180), Duration::days(30)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedRecord {
    pub record: MetaRecord,
    pub complete: bool,
    pub refreshed_at: DateTime<Utc>,
}

impl CachedRecord {
    pub fn state(&self, now: DateTime<Utc>) -> RefreshState {
        if !self.complete {
            return RefreshState::Incomplete;
        }
        let (foreground, background) = Recency::of(&self.record, now.date_naive()).windows();
        let age = now - self.refreshed_at;
        if age > foreground {
            RefreshState::StaleForeground
        } else if age > background {
            RefreshState::StaleBackground
        } else {
            RefreshState::Fresh
        }
    }
}

/// Seasons and episodes are stored under their show's ids.
fn storage_ids(seed: &ItemSeed) -> &IdBundle {
    match (seed.kind, &seed.show_ids) {
        (MediaKind::Season | MediaKind::Episode, Some(show)) => show,
        _ => &seed.ids,
    }
}

#[derive(Clone)]
pub struct MetaCache {
    pool: SqlitePool,
}

impl MetaCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stored record for the item with the seed's own title and year laid
    /// on top. A stored record whose ids contradict the seed is dropped.
    pub async fn read(&self, seed: &ItemSeed) -> Result<Option<CachedRecord>, MetadataError> {
        let ids = storage_ids(seed);
        if ids.is_empty() {
            return Ok(None);
        }
        let Some(row) = meta::find(&self.pool, seed.kind.as_str(), ids, seed.season, seed.episode).await?
        else {
            return Ok(None);
        };

        if row.ids.conflicts_with(ids) {
            info!(item = %seed.key(), "external id reassigned, dropping stored record");
            meta::delete(&self.pool, row.id).await?;
            return Ok(None);
        }

        let mut record: MetaRecord = match serde_json::from_str(&row.payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(item = %seed.key(), error = %e, "unreadable stored record, dropping");
                meta::delete(&self.pool, row.id).await?;
                return Ok(None);
            }
        };
        if seed.title.is_some() {
            record.title.clone_from(&seed.title);
        }
        if seed.year.is_some() {
            record.year = seed.year;
        }

        Ok(Some(CachedRecord {
            record,
            complete: row.complete,
            refreshed_at: Utc
                .timestamp_opt(row.refresh_ts, 0)
                .single()
                .unwrap_or(DateTime::UNIX_EPOCH),
        }))
    }

    /// Persist a merge result. Incomplete records are never stored; returns
    /// whether a row was written.
    pub async fn write(
        &self,
        seed: &ItemSeed,
        record: &MetaRecord,
        complete: bool,
    ) -> Result<bool, MetadataError> {
        if !complete {
            debug!(item = %seed.key(), "incomplete merge kept in memory");
            return Ok(false);
        }
        let mut ids = storage_ids(seed).clone();
        if !seed.kind.is_episodic() || seed.kind == MediaKind::Show {
            ids.fill_from(&record.ids);
        }
        if ids.is_empty() {
            return Ok(false);
        }
        let payload = serde_json::to_string(record).map_err(|e| MetadataError::Data {
            provider: "cache",
            message: e.to_string(),
        })?;
        meta::upsert(
            &self.pool,
            seed.kind.as_str(),
            &ids,
            seed.season,
            seed.episode,
            &payload,
            true,
            RefreshState::Complete.as_str(),
            cinemeld_db::now_ts(),
        )
        .await?;
        Ok(true)
    }

    pub async fn invalidate(&self, seed: &ItemSeed) -> Result<bool, MetadataError> {
        let ids = storage_ids(seed);
        match meta::find(&self.pool, seed.kind.as_str(), ids, seed.season, seed.episode).await? {
            Some(row) => Ok(meta::delete(&self.pool, row.id).await?),
            None => Ok(false),
        }
    }

    pub async fn count(&self, kind: MediaKind) -> Result<i64, MetadataError> {
        Ok(meta::count(&self.pool, kind.as_str()).await?)
    }
}
