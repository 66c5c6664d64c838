use cinemeld_core::types::{IdBundle, IdType};
use sqlx::SqlitePool;

use super::{bundle_from_cols, id_column, number_col, number_from_col, signed};

/// Local mirror of the watch state for one movie, show, season or episode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackRow {
    pub id: i64,
    pub media: String,
    pub ids: IdBundle,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub plays: i64,
    pub last_watched_ts: Option<i64>,
    pub progress: f64,
    pub paused_ts: Option<i64>,
    pub rating: Option<i64>,
    pub rated_ts: Option<i64>,
    pub updated_ts: i64,
}

type Row = (
    i64,
    String,
    Option<i64>,
    Option<String>,
    Option<i64>,
    Option<i64>,
    i64,
    i64,
    i64,
    Option<i64>,
    f64,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    i64,
);

const COLUMNS: &str = "id, media, id_trakt, id_imdb, id_tmdb, id_tvdb, season, episode, plays, \
                       last_watched_ts, progress, paused_ts, rating, rated_ts, updated_ts";

pub async fn find(
    pool: &SqlitePool,
    media: &str,
    ids: &IdBundle,
    season: Option<u32>,
    episode: Option<u32>,
) -> Result<Option<PlaybackRow>, sqlx::Error> {
    for id_type in IdType::LOOKUP_ORDER {
        let Some(value) = ids.get(id_type) else {
            continue;
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM playback WHERE media = ? AND {} = ? AND season = ? AND episode = ? \
             LIMIT 1",
            id_column(id_type)
        );
        let row: Option<Row> = sqlx::query_as(&sql)
            .bind(media)
            .bind(value)
            .bind(number_col(season))
            .bind(number_col(episode))
            .fetch_optional(pool)
            .await?;
        if let Some(r) = row {
            return Ok(Some(row_to_playback(r)));
        }
    }
    Ok(None)
}

pub async fn list(pool: &SqlitePool, media: &str) -> Result<Vec<PlaybackRow>, sqlx::Error> {
    let sql = format!("SELECT {COLUMNS} FROM playback WHERE media = ? ORDER BY id ASC");
    let rows: Vec<Row> = sqlx::query_as(&sql).bind(media).fetch_all(pool).await?;
    Ok(rows.into_iter().map(row_to_playback).collect())
}

/// Insert the row, or overwrite the one matching its ids. Returns the row id.
pub async fn upsert(pool: &SqlitePool, row: &PlaybackRow) -> Result<i64, sqlx::Error> {
    let existing = find(pool, &row.media, &row.ids, row.season, row.episode).await?;
    match existing {
        Some(e) => {
            sqlx::query(
                "UPDATE playback SET id_trakt = ?, id_imdb = ?, id_tmdb = ?, id_tvdb = ?, plays = ?, \
                 last_watched_ts = ?, progress = ?, paused_ts = ?, rating = ?, rated_ts = ?, \
                 updated_ts = ? WHERE id = ?",
            )
            .bind(signed(row.ids.trakt))
            .bind(row.ids.imdb.as_deref())
            .bind(signed(row.ids.tmdb))
            .bind(signed(row.ids.tvdb))
            .bind(row.plays)
            .bind(row.last_watched_ts)
            .bind(row.progress)
            .bind(row.paused_ts)
            .bind(row.rating)
            .bind(row.rated_ts)
            .bind(row.updated_ts)
            .bind(e.id)
            .execute(pool)
            .await?;
            Ok(e.id)
        }
        None => {
            let result = sqlx::query(
                "INSERT INTO playback (media, id_trakt, id_imdb, id_tmdb, id_tvdb, season, episode, \
                 plays, last_watched_ts, progress, paused_ts, rating, rated_ts, updated_ts) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.media)
            .bind(signed(row.ids.trakt))
            .bind(row.ids.imdb.as_deref())
            .bind(signed(row.ids.tmdb))
            .bind(signed(row.ids.tvdb))
            .bind(number_col(row.season))
            .bind(number_col(row.episode))
            .bind(row.plays)
            .bind(row.last_watched_ts)
            .bind(row.progress)
            .bind(row.paused_ts)
            .bind(row.rating)
            .bind(row.rated_ts)
            .bind(row.updated_ts)
            .execute(pool)
            .await?;
            Ok(result.last_insert_rowid())
        }
    }
}

/// Replace every row of a media kind in one transaction.
pub async fn replace_media(
    pool: &SqlitePool,
    media: &str,
    rows: &[PlaybackRow],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM playback WHERE media = ?")
        .bind(media)
        .execute(&mut *tx)
        .await?;
    for row in rows {
        sqlx::query(
            "INSERT INTO playback (media, id_trakt, id_imdb, id_tmdb, id_tvdb, season, episode, \
             plays, last_watched_ts, progress, paused_ts, rating, rated_ts, updated_ts) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(media)
        .bind(signed(row.ids.trakt))
        .bind(row.ids.imdb.as_deref())
        .bind(signed(row.ids.tmdb))
        .bind(signed(row.ids.tvdb))
        .bind(number_col(row.season))
        .bind(number_col(row.episode))
        .bind(row.plays)
        .bind(row.last_watched_ts)
        .bind(row.progress)
        .bind(row.paused_ts)
        .bind(row.rating)
        .bind(row.rated_ts)
        .bind(row.updated_ts)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn clear(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM playback").execute(pool).await?;
    Ok(())
}

fn row_to_playback(r: Row) -> PlaybackRow {
    PlaybackRow {
        id: r.0,
        media: r.1,
        ids: bundle_from_cols(r.2, r.3, r.4, r.5, None),
        season: number_from_col(r.6),
        episode: number_from_col(r.7),
        plays: r.8,
        last_watched_ts: r.9,
        progress: r.10,
        paused_ts: r.11,
        rating: r.12,
        rated_ts: r.13,
        updated_ts: r.14,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_pool;

    fn movie(imdb: &str, plays: i64) -> PlaybackRow {
        PlaybackRow {
            media: "movie".into(),
            ids: IdBundle::imdb(imdb),
            plays,
            updated_ts: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_then_find_by_any_id() {
        let pool = test_pool().await;
        let mut row = movie("tt0111161", 1);
        row.ids.tmdb = Some(278);
        upsert(&pool, &row).await.unwrap();

        row.progress = 0.42;
        upsert(&pool, &row).await.unwrap();

        let found = find(&pool, "movie", &IdBundle::tmdb(278), None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.plays, 1);
        assert!((found.progress - 0.42).abs() < 1e-9);
        assert_eq!(list(&pool, "movie").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replace_media_swaps_whole_kind() {
        let pool = test_pool().await;
        upsert(&pool, &movie("tt1", 1)).await.unwrap();
        let mut ep = movie("tt9", 2);
        ep.media = "episode".into();
        ep.season = Some(1);
        ep.episode = Some(3);
        upsert(&pool, &ep).await.unwrap();

        replace_media(&pool, "movie", &[movie("tt2", 3), movie("tt3", 1)])
            .await
            .unwrap();

        let movies = list(&pool, "movie").await.unwrap();
        assert_eq!(movies.len(), 2);
        assert!(movies.iter().all(|m| m.ids.imdb.as_deref() != Some("tt1")));
        let episodes = list(&pool, "episode").await.unwrap();
        assert_eq!(episodes[0].season, Some(1));
        assert_eq!(episodes[0].episode, Some(3));
    }
}
