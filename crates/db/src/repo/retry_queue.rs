use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryRow {
    pub id: i64,
    pub link: String,
    pub method: String,
    pub payload: Option<String>,
    pub submitted_ts: i64,
    pub attempts: i64,
}

type Row = (i64, String, String, Option<String>, i64, i64);

pub async fn enqueue(
    pool: &SqlitePool,
    link: &str,
    method: &str,
    payload: Option<&str>,
    submitted_ts: i64,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO retry_queue (link, method, payload, submitted_ts, attempts) \
         VALUES (?, ?, ?, ?, 0)",
    )
    .bind(link)
    .bind(method)
    .bind(payload)
    .bind(submitted_ts)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// All pending entries in arrival order.
pub async fn list(pool: &SqlitePool) -> Result<Vec<RetryRow>, sqlx::Error> {
    let rows: Vec<Row> = sqlx::query_as(
        "SELECT id, link, method, payload, submitted_ts, attempts \
         FROM retry_queue ORDER BY submitted_ts ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_retry).collect())
}

pub async fn remove(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM retry_queue WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn bump_attempts(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE retry_queue SET attempts = attempts + 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Drop entries submitted before `cutoff_ts`.
pub async fn prune_older_than(pool: &SqlitePool, cutoff_ts: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM retry_queue WHERE submitted_ts < ?")
        .bind(cutoff_ts)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM retry_queue")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

fn row_to_retry(r: Row) -> RetryRow {
    RetryRow {
        id: r.0,
        link: r.1,
        method: r.2,
        payload: r.3,
        submitted_ts: r.4,
        attempts: r.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_pool;

    #[tokio::test]
    async fn entries_come_back_in_arrival_order() {
        let pool = test_pool().await;
        let late = enqueue(&pool, "sync/history", "POST", Some("{}"), 200)
            .await
            .unwrap();
        let early = enqueue(&pool, "sync/ratings", "POST", None, 100).await.unwrap();

        let rows = list(&pool).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![early, late]);

        bump_attempts(&pool, early).await.unwrap();
        assert_eq!(list(&pool).await.unwrap()[0].attempts, 1);

        assert_eq!(prune_older_than(&pool, 150).await.unwrap(), 1);
        assert_eq!(count(&pool).await.unwrap(), 1);
        assert!(remove(&pool, late).await.unwrap());
        assert_eq!(count(&pool).await.unwrap(), 0);
    }
}
