use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct CacheRow {
    pub key: String,
    pub value: Vec<u8>,
    pub compression: String,
    pub updated_ts: i64,
}

pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<CacheRow>, sqlx::Error> {
    let row: Option<(String, Vec<u8>, String, i64)> =
        sqlx::query_as("SELECT key, value, compression, updated_ts FROM cache WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|r| CacheRow {
        key: r.0,
        value: r.1,
        compression: r.2,
        updated_ts: r.3,
    }))
}

/// Insert or overwrite an entry.
pub async fn put(
    pool: &SqlitePool,
    key: &str,
    value: &[u8],
    compression: &str,
    updated_ts: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO cache (key, value, compression, updated_ts) VALUES (?, ?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
         compression = excluded.compression, updated_ts = excluded.updated_ts",
    )
    .bind(key)
    .bind(value)
    .bind(compression)
    .bind(updated_ts)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(pool: &SqlitePool, key: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM cache WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove every entry last written before `cutoff_ts`.
pub async fn purge_older_than(pool: &SqlitePool, cutoff_ts: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM cache WHERE updated_ts < ?")
        .bind(cutoff_ts)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn clear(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM cache").execute(pool).await?;
    Ok(())
}

pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cache")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_pool;

    #[tokio::test]
    async fn put_overwrites_and_purge_respects_cutoff() {
        let pool = test_pool().await;
        put(&pool, "a", b"one", "none", 100).await.unwrap();
        put(&pool, "a", b"two", "zlib", 200).await.unwrap();
        put(&pool, "b", b"old", "none", 50).await.unwrap();

        let row = get(&pool, "a").await.unwrap().unwrap();
        assert_eq!(row.value, b"two");
        assert_eq!(row.compression, "zlib");

        assert_eq!(purge_older_than(&pool, 150).await.unwrap(), 1);
        assert!(get(&pool, "b").await.unwrap().is_none());
        assert_eq!(count(&pool).await.unwrap(), 1);
        assert!(delete(&pool, "a").await.unwrap());
        assert!(!delete(&pool, "a").await.unwrap());
    }
}
