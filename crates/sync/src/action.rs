use chrono::{DateTime, SecondsFormat, Utc};
use cinemeld_core::types::{ItemSeed, SyncCategory};
use cinemeld_metadata::trakt::{Mutation, scrobble_body, sync_body};
use serde_json::{Map, Value, json};

/// Account mutations pushed through [`crate::TraktStore::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    Watched { at: Option<DateTime<Utc>> },
    Unwatched,
    Rate(u8),
    Unrate,
    Watchlist,
    Unwatchlist,
    Collect,
    Uncollect,
    /// Drop the remote resume point with this playback id.
    ClearProgress(u64),
}

impl SyncAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Watched { .. } => "watched",
            Self::Unwatched => "unwatched",
            Self::Rate(_) => "rate",
            Self::Unrate => "unrate",
            Self::Watchlist => "watchlist",
            Self::Unwatchlist => "unwatchlist",
            Self::Collect => "collect",
            Self::Uncollect => "uncollect",
            Self::ClearProgress(_) => "clear_progress",
        }
    }

    /// Table a successful mutation invalidates, if any.
    pub fn category(&self) -> Option<SyncCategory> {
        match self {
            Self::Watched { .. } | Self::Unwatched => Some(SyncCategory::History),
            Self::Rate(_) | Self::Unrate => Some(SyncCategory::Rating),
            Self::ClearProgress(_) => Some(SyncCategory::Progress),
            Self::Watchlist | Self::Unwatchlist | Self::Collect | Self::Uncollect => None,
        }
    }

    pub fn mutation(&self, seed: &ItemSeed) -> Mutation {
        match self {
            Self::Watched { at } => {
                let mut extra = Map::new();
                let at = at.unwrap_or_else(Utc::now);
                extra.insert(
                    "watched_at".into(),
                    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
                );
                Mutation::post("sync/history", sync_body(seed, extra))
            }
            Self::Unwatched => Mutation::post("sync/history/remove", sync_body(seed, Map::new())),
            Self::Rate(rating) => {
                let mut extra = Map::new();
                extra.insert("rating".into(), json!((*rating).clamp(1, 10)));
                extra.insert(
                    "rated_at".into(),
                    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
                );
                Mutation::post("sync/ratings", sync_body(seed, extra))
            }
            Self::Unrate => Mutation::post("sync/ratings/remove", sync_body(seed, Map::new())),
            Self::Watchlist => Mutation::post("sync/watchlist", sync_body(seed, Map::new())),
            Self::Unwatchlist => Mutation::post("sync/watchlist/remove", sync_body(seed, Map::new())),
            Self::Collect => Mutation::post("sync/collection", sync_body(seed, Map::new())),
            Self::Uncollect => Mutation::post("sync/collection/remove", sync_body(seed, Map::new())),
            Self::ClearProgress(id) => Mutation::delete(format!("sync/playback/{id}")),
        }
    }
}

/// Playback events reported to `scrobble/{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrobbleAction {
    Start,
    Pause,
    Stop,
}

impl ScrobbleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Stop => "stop",
        }
    }

    /// `progress` is a fraction in [0, 1].
    pub fn mutation(self, seed: &ItemSeed, progress: f64) -> Mutation {
        Mutation::post(
            format!("scrobble/{}", self.as_str()),
            scrobble_body(seed, progress.clamp(0.0, 1.0) * 100.0),
        )
    }
}

/// How a mutation left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Failed transiently and waits in the retry queue.
    Queued,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cinemeld_core::types::{IdBundle, MediaKind};
    use cinemeld_metadata::trakt::MutationMethod;

    #[test]
    fn watched_episode_nests_under_show() {
        let seed = ItemSeed::episode_of(IdBundle::trakt(1), 1, 2);
        let at = Utc.with_ymd_and_hms(2024, 1, 5, 20, 0, 0).unwrap();
        let m = SyncAction::Watched { at: Some(at) }.mutation(&seed);
        assert_eq!(m.path, "sync/history");
        let body = m.body.unwrap();
        let ep = &body["shows"][0]["seasons"][0]["episodes"][0];
        assert_eq!(ep["number"], 2);
        assert_eq!(ep["watched_at"], "2024-01-05T20:00:00.000Z");
        assert_eq!(body["shows"][0]["ids"]["trakt"], 1);
    }

    #[test]
    fn rating_is_clamped() {
        let seed = ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt0111161"));
        let body = SyncAction::Rate(14).mutation(&seed).body.unwrap();
        assert_eq!(body["movies"][0]["rating"], 10);
        assert_eq!(body["movies"][0]["ids"]["imdb"], "tt0111161");
    }

    #[test]
    fn clear_progress_deletes_playback_row() {
        let seed = ItemSeed::new(MediaKind::Movie, IdBundle::trakt(5));
        let m = SyncAction::ClearProgress(77).mutation(&seed);
        assert_eq!(m.method, MutationMethod::Delete);
        assert_eq!(m.path, "sync/playback/77");
        assert_eq!(SyncAction::ClearProgress(77).category(), Some(SyncCategory::Progress));
    }

    #[test]
    fn scrobble_progress_is_a_percentage() {
        let seed = ItemSeed::new(MediaKind::Movie, IdBundle::trakt(5));
        let m = ScrobbleAction::Pause.mutation(&seed, 0.4242);
        assert_eq!(m.path, "scrobble/pause");
        assert_eq!(m.body.unwrap()["progress"], 42.42);
    }
}
