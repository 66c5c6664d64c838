use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stamps {
    pub remote_ts: i64,
    pub local_ts: i64,
}

pub async fn get(pool: &SqlitePool, media: &str, category: &str) -> Result<Stamps, sqlx::Error> {
    let row: Option<(i64, i64)> = sqlx::query_as(
        "SELECT remote_ts, local_ts FROM sync_stamps WHERE media = ? AND category = ?",
    )
    .bind(media)
    .bind(category)
    .fetch_optional(pool)
    .await?;
    Ok(row
        .map(|(remote_ts, local_ts)| Stamps {
            remote_ts,
            local_ts,
        })
        .unwrap_or_default())
}

pub async fn set_remote(
    pool: &SqlitePool,
    media: &str,
    category: &str,
    ts: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sync_stamps (media, category, remote_ts) VALUES (?, ?, ?) \
         ON CONFLICT(media, category) DO UPDATE SET remote_ts = excluded.remote_ts",
    )
    .bind(media)
    .bind(category)
    .bind(ts)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_local(
    pool: &SqlitePool,
    media: &str,
    category: &str,
    ts: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sync_stamps (media, category, local_ts) VALUES (?, ?, ?) \
         ON CONFLICT(media, category) DO UPDATE SET local_ts = excluded.local_ts",
    )
    .bind(media)
    .bind(category)
    .bind(ts)
    .execute(pool)
    .await?;
    Ok(())
}

/// Forget every stamp so the next check reloads everything.
pub async fn reset(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sync_stamps").execute(pool).await?;
    Ok(())
}
