pub mod cache;
pub mod meta;
pub mod playback;
pub mod retry_queue;
pub mod settings;
pub mod sync_stamps;

use cinemeld_core::types::{IdBundle, IdType};

/// Column holding ids of the given type in the `meta` and `playback` tables.
pub(crate) fn id_column(id_type: IdType) -> &'static str {
    match id_type {
        IdType::Trakt => "id_trakt",
        IdType::Imdb => "id_imdb",
        IdType::Tmdb => "id_tmdb",
        IdType::Tvdb => "id_tvdb",
        IdType::Slug => "id_slug",
    }
}

/// Season/episode numbers are stored with `-1` for "not applicable" so they
/// can take part in equality lookups.
pub(crate) fn number_col(n: Option<u32>) -> i64 {
    n.map(i64::from).unwrap_or(-1)
}

pub(crate) fn number_from_col(n: i64) -> Option<u32> {
    u32::try_from(n).ok()
}

pub(crate) fn bundle_from_cols(
    trakt: Option<i64>,
    imdb: Option<String>,
    tmdb: Option<i64>,
    tvdb: Option<i64>,
    slug: Option<String>,
) -> IdBundle {
    IdBundle {
        trakt: trakt.and_then(|v| u64::try_from(v).ok()),
        imdb,
        tmdb: tmdb.and_then(|v| u64::try_from(v).ok()),
        tvdb: tvdb.and_then(|v| u64::try_from(v).ok()),
        slug,
    }
}

pub(crate) fn signed(v: Option<u64>) -> Option<i64> {
    v.and_then(|v| i64::try_from(v).ok())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::SqlitePool {
    let pool = crate::connect(":memory:").await.unwrap();
    crate::migrate::run(&pool).await.unwrap();
    pool
}
