use cinemeld_core::types::{IdBundle, IdType};
use sqlx::SqlitePool;

use super::{bundle_from_cols, id_column, number_col, number_from_col, signed};

#[derive(Debug, Clone)]
pub struct MetaRow {
    pub id: i64,
    pub media: String,
    pub ids: IdBundle,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub payload: String,
    pub complete: bool,
    pub refresh_class: String,
    pub refresh_ts: i64,
}

type Row = (
    i64,
    String,
    Option<i64>,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<String>,
    i64,
    i64,
    String,
    bool,
    String,
    i64,
);

const COLUMNS: &str = "id, media, id_trakt, id_imdb, id_tmdb, id_tvdb, id_slug, season, episode, \
                       payload, complete, refresh_class, refresh_ts";

/// Find the stored record for an item, trying each id type in lookup order.
pub async fn find(
    pool: &SqlitePool,
    media: &str,
    ids: &IdBundle,
    season: Option<u32>,
    episode: Option<u32>,
) -> Result<Option<MetaRow>, sqlx::Error> {
    let mut order: Vec<IdType> = IdType::LOOKUP_ORDER.to_vec();
    if ids.is_empty() {
        order.push(IdType::Slug);
    }
    for id_type in order {
        let Some(value) = ids.get(id_type) else {
            continue;
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM meta WHERE media = ? AND {} = ? AND season = ? AND episode = ? \
             ORDER BY refresh_ts DESC LIMIT 1",
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
            return Ok(Some(row_to_meta(r)));
        }
    }
    Ok(None)
}

/// Write a record, replacing the row that currently matches the ids.
#[allow(clippy::too_many_arguments)]
pub async fn upsert(
    pool: &SqlitePool,
    media: &str,
    ids: &IdBundle,
    season: Option<u32>,
    episode: Option<u32>,
    payload: &str,
    complete: bool,
    refresh_class: &str,
    refresh_ts: i64,
) -> Result<i64, sqlx::Error> {
    if let Some(existing) = find(pool, media, ids, season, episode).await? {
        sqlx::query(
            "UPDATE meta SET id_trakt = ?, id_imdb = ?, id_tmdb = ?, id_tvdb = ?, id_slug = ?, \
             payload = ?, complete = ?, refresh_class = ?, refresh_ts = ? WHERE id = ?",
        )
        .bind(signed(ids.trakt))
        .bind(ids.imdb.as_deref())
        .bind(signed(ids.tmdb))
        .bind(signed(ids.tvdb))
        .bind(ids.slug.as_deref())
        .bind(payload)
        .bind(complete)
        .bind(refresh_class)
        .bind(refresh_ts)
        .bind(existing.id)
        .execute(pool)
        .await?;
        return Ok(existing.id);
    }

    let result = sqlx::query(
        "INSERT INTO meta (media, id_trakt, id_imdb, id_tmdb, id_tvdb, id_slug, season, episode, \
         payload, complete, refresh_class, refresh_ts) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(media)
    .bind(signed(ids.trakt))
    .bind(ids.imdb.as_deref())
    .bind(signed(ids.tmdb))
    .bind(signed(ids.tvdb))
    .bind(ids.slug.as_deref())
    .bind(number_col(season))
    .bind(number_col(episode))
    .bind(payload)
    .bind(complete)
    .bind(refresh_class)
    .bind(refresh_ts)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM meta WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count(pool: &SqlitePool, media: &str) -> Result<i64, sqlx::Error> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM meta WHERE media = ?")
        .bind(media)
        .fetch_one(pool)
        .await?;
    Ok(n)
}

fn row_to_meta(r: Row) -> MetaRow {
    MetaRow {
        id: r.0,
        media: r.1,
        ids: bundle_from_cols(r.2, r.3, r.4, r.5, r.6),
        season: number_from_col(r.7),
        episode: number_from_col(r.8),
        payload: r.9,
        complete: r.10,
        refresh_class: r.11,
        refresh_ts: r.12,
    }
}
