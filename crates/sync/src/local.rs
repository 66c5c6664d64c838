//! Local mirror of the account tables, used when Trakt is unreachable and to
//! hydrate the in-memory tables on start-up.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use cinemeld_core::types::{IdBundle, ItemSeed, MediaKind};
use cinemeld_db::repo::playback::{self, PlaybackRow};
use sqlx::SqlitePool;
use tracing::debug;

use crate::SyncError;
use crate::tables::{
    Category, Group, HistoryEntry, IdTable, ProgressEntry, RatingEntry, ShowNode, Tables,
};

#[derive(Clone)]
pub struct PlaybackStore {
    pool: SqlitePool,
}

/// Merge key for rows that describe the same item.
type RowKey = (MediaKind, String, Option<u32>, Option<u32>);

impl PlaybackStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Rewrite the mirror of one group from a table snapshot.
    pub async fn reconcile(&self, group: Group, tables: &Tables) -> Result<usize, SyncError> {
        let now = cinemeld_db::now_ts();
        let mut rows: HashMap<RowKey, PlaybackRow> = HashMap::new();
        for_each(&tables.history, group, |e| {
            if let Some(row) = slot(&mut rows, now, e.kind, &e.ids, e.season, e.episode) {
                row.plays = i64::from(e.plays);
                row.last_watched_ts = e.last_watched_at.map(|t| t.timestamp());
            }
        });
        for_each(&tables.progress, group, |e| {
            if let Some(row) = slot(&mut rows, now, e.kind, &e.ids, e.season, e.episode) {
                row.progress = e.progress;
                row.paused_ts = e.paused_at.map(|t| t.timestamp());
            }
        });
        for_each(&tables.rating, group, |e| {
            if let Some(row) = slot(&mut rows, now, e.kind, &e.ids, e.season, e.episode) {
                row.rating = Some(i64::from(e.rating));
                row.rated_ts = e.rated_at.map(|t| t.timestamp());
            }
        });

        let total = rows.len();
        for kind in group.kinds() {
            let of_kind: Vec<PlaybackRow> = rows
                .values()
                .filter(|r| r.media == kind.as_str())
                .cloned()
                .collect();
            playback::replace_media(&self.pool, kind.as_str(), &of_kind).await?;
        }
        debug!(group = group.as_str(), rows = total, "local mirror reconciled");
        Ok(total)
    }

    /// Tables rebuilt from the mirror alone.
    pub async fn load_tables(&self) -> Result<Tables, SyncError> {
        let movies = playback::list(&self.pool, MediaKind::Movie.as_str()).await?;
        let mut show_rows = Vec::new();
        for kind in Group::Shows.kinds() {
            show_rows.extend(playback::list(&self.pool, kind.as_str()).await?);
        }

        let mut tables = Tables::default();
        tables.history.movies = Arc::new(IdTable::build(movies.iter().filter_map(history_of).collect()));
        tables.progress.movies = Arc::new(IdTable::build(movies.iter().filter_map(progress_of).collect()));
        tables.rating.movies = Arc::new(IdTable::build(movies.iter().filter_map(rating_of).collect()));
        tables.history.shows = Arc::new(show_tree(&show_rows, history_of));
        tables.progress.shows = Arc::new(show_tree(&show_rows, progress_of));
        tables.rating.shows = Arc::new(show_tree(&show_rows, rating_of));
        Ok(tables)
    }

    pub async fn find(&self, seed: &ItemSeed) -> Result<Option<PlaybackRow>, SyncError> {
        let ids = row_ids(seed);
        Ok(playback::find(&self.pool, seed.kind.as_str(), ids, seed.season, seed.episode).await?)
    }

    /// Stored progress fraction, 0 when unknown.
    pub async fn progress(&self, seed: &ItemSeed) -> Result<f64, SyncError> {
        Ok(self.find(seed).await?.map(|r| r.progress).unwrap_or(0.0))
    }

    pub async fn record_progress(&self, seed: &ItemSeed, progress: f64) -> Result<(), SyncError> {
        self.modify(seed, |row| {
            row.progress = progress.clamp(0.0, 1.0);
            row.paused_ts = Some(cinemeld_db::now_ts());
        })
        .await
    }

    /// One more play; the resume point is cleared.
    pub async fn record_watched(&self, seed: &ItemSeed, at: DateTime<Utc>) -> Result<(), SyncError> {
        self.modify(seed, |row| {
            row.plays += 1;
            row.last_watched_ts = Some(at.timestamp());
            row.progress = 0.0;
            row.paused_ts = None;
        })
        .await
    }

    pub async fn record_rating(&self, seed: &ItemSeed, rating: Option<u8>) -> Result<(), SyncError> {
        self.modify(seed, |row| {
            row.rating = rating.map(i64::from);
            row.rated_ts = rating.map(|_| cinemeld_db::now_ts());
        })
        .await
    }

    pub async fn clear(&self) -> Result<(), SyncError> {
        playback::clear(&self.pool).await?;
        Ok(())
    }

    async fn modify(&self, seed: &ItemSeed, apply: impl FnOnce(&mut PlaybackRow)) -> Result<(), SyncError> {
        let ids = row_ids(seed);
        if ids.is_empty() {
            return Ok(());
        }
        let mut row = self.find(seed).await?.unwrap_or_else(|| PlaybackRow {
            media: seed.kind.as_str().to_string(),
            ids: ids.clone(),
            season: seed.season,
            episode: seed.episode,
            ..Default::default()
        });
        apply(&mut row);
        row.updated_ts = cinemeld_db::now_ts();
        playback::upsert(&self.pool, &row).await?;
        Ok(())
    }
}

fn slot<'a>(
    rows: &'a mut HashMap<RowKey, PlaybackRow>,
    now: i64,
    kind: MediaKind,
    ids: &IdBundle,
    season: Option<u32>,
    episode: Option<u32>,
) -> Option<&'a mut PlaybackRow> {
    let key = ids.key()?;
    Some(rows.entry((kind, key, season, episode)).or_insert_with(|| PlaybackRow {
        media: kind.as_str().to_string(),
        ids: ids.clone(),
        season,
        episode,
        updated_ts: now,
        ..Default::default()
    }))
}

/// Seasons and episodes are mirrored under their show's ids.
fn row_ids(seed: &ItemSeed) -> &IdBundle {
    match (seed.kind, &seed.show_ids) {
        (MediaKind::Season | MediaKind::Episode, Some(show)) => show,
        _ => &seed.ids,
    }
}

fn for_each<T: crate::tables::Keyed>(category: &Category<T>, group: Group, mut f: impl FnMut(&T)) {
    match group {
        Group::Movies => category.movies.iter().for_each(&mut f),
        Group::Shows => {
            for node in category.shows.iter() {
                node.show.iter().for_each(&mut f);
                node.seasons.values().for_each(&mut f);
                node.episodes.values().for_each(&mut f);
            }
        }
    }
}

fn ts(v: Option<i64>) -> Option<DateTime<Utc>> {
    v.and_then(|t| Utc.timestamp_opt(t, 0).single())
}

fn kind_of(row: &PlaybackRow) -> Option<MediaKind> {
    MediaKind::from_str(&row.media)
}

fn history_of(row: &PlaybackRow) -> Option<HistoryEntry> {
    if row.plays <= 0 {
        return None;
    }
    let kind = kind_of(row)?;
    let plays = u32::try_from(row.plays).unwrap_or(u32::MAX);
    Some(HistoryEntry {
        kind,
        ids: row.ids.clone(),
        title: None,
        year: None,
        season: row.season,
        episode: row.episode,
        plays,
        plays_unique: 1,
        last_watched_at: ts(row.last_watched_ts),
        watched_at: ts(row.last_watched_ts).into_iter().collect(),
    })
}

fn progress_of(row: &PlaybackRow) -> Option<ProgressEntry> {
    if row.progress <= 0.0 {
        return None;
    }
    Some(ProgressEntry {
        kind: kind_of(row)?,
        ids: row.ids.clone(),
        title: None,
        year: None,
        season: row.season,
        episode: row.episode,
        progress: row.progress,
        paused_at: ts(row.paused_ts),
        playback_id: None,
    })
}

fn rating_of(row: &PlaybackRow) -> Option<RatingEntry> {
    let rating = u8::try_from(row.rating?).ok()?;
    Some(RatingEntry {
        kind: kind_of(row)?,
        ids: row.ids.clone(),
        season: row.season,
        episode: row.episode,
        rating,
        rated_at: ts(row.rated_ts),
    })
}

fn show_tree<T: crate::tables::Keyed>(
    rows: &[PlaybackRow],
    entry: impl Fn(&PlaybackRow) -> Option<T>,
) -> IdTable<ShowNode<T>> {
    let mut nodes: Vec<ShowNode<T>> = Vec::new();
    let mut by_show: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let (Some(key), Some(e)) = (row.ids.key(), entry(row)) else {
            continue;
        };
        let pos = *by_show.entry(key).or_insert_with(|| {
            nodes.push(ShowNode::with_ids(row.ids.clone()));
            nodes.len() - 1
        });
        let node = &mut nodes[pos];
        match (row.season, row.episode) {
            (Some(s), Some(n)) => {
                node.episodes.insert((s, n), e);
            }
            (Some(s), None) => {
                node.seasons.insert(s, e);
            }
            _ => node.show = Some(e),
        }
    }
    IdTable::build(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{history_movies, progress_shows};
    use cinemeld_metadata::trakt::wire::{PlaybackItem, WatchedItem};
    use serde_json::json;

    async fn store() -> PlaybackStore {
        PlaybackStore::new(cinemeld_db::open(":memory:").await.unwrap())
    }

    #[tokio::test]
    async fn reconciled_mirror_hydrates_the_same_tables() {
        let store = store().await;
        let watched: Vec<WatchedItem> = serde_json::from_value(json!([
            { "plays": 2, "last_watched_at": "2024-01-05T20:00:00.000Z",
              "movie": { "title": "Heat", "ids": { "trakt": 500, "imdb": "tt0113277" } } }
        ]))
        .unwrap();
        let playback: Vec<PlaybackItem> = serde_json::from_value(json!([
            { "id": 12, "progress": 60.0, "paused_at": "2024-01-03T20:00:00.000Z",
              "episode": { "season": 1, "number": 2, "ids": { "trakt": 91 } },
              "show": { "title": "Dark", "ids": { "trakt": 1, "tvdb": 334824 } } }
        ]))
        .unwrap();
        let mut tables = Tables::default();
        tables.history.movies = Arc::new(history_movies(&watched));
        tables.progress.shows = Arc::new(progress_shows(&playback));

        assert_eq!(store.reconcile(Group::Movies, &tables).await.unwrap(), 1);
        store.reconcile(Group::Shows, &tables).await.unwrap();

        let loaded = store.load_tables().await.unwrap();
        let heat = loaded
            .history
            .lookup(MediaKind::Movie, &IdBundle::imdb("tt0113277"), None, None)
            .unwrap();
        assert_eq!(heat.plays, 2);
        let ep = loaded
            .progress
            .lookup(
                MediaKind::Episode,
                &IdBundle { tvdb: Some(334824), ..Default::default() },
                Some(1),
                Some(2),
            )
            .unwrap();
        assert!((ep.progress - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn watched_clears_resume_point() {
        let store = store().await;
        let seed = ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt0111161"));
        store.record_progress(&seed, 0.42).await.unwrap();
        assert!((store.progress(&seed).await.unwrap() - 0.42).abs() < 1e-9);

        store.record_watched(&seed, Utc::now()).await.unwrap();
        let row = store.find(&seed).await.unwrap().unwrap();
        assert_eq!(row.plays, 1);
        assert_eq!(row.progress, 0.0);
    }
}
