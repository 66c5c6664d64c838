use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use cinemeld_db::repo::retry_queue;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::CacheError;

/// Queued requests older than this are dropped instead of replayed.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(28 * 24 * 3600);

/// A mutating request waiting to be replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub id: i64,
    pub link: String,
    pub method: String,
    pub payload: Option<serde_json::Value>,
    pub submitted: DateTime<Utc>,
    pub attempts: i64,
}

/// Durable FIFO of mutating provider requests that failed transiently.
#[derive(Debug, Clone)]
pub struct RetryQueue {
    pool: SqlitePool,
    max_age: Duration,
}

impl RetryQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_max_age(pool, DEFAULT_MAX_AGE)
    }

    pub fn with_max_age(pool: SqlitePool, max_age: Duration) -> Self {
        Self { pool, max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub async fn enqueue(
        &self,
        link: &str,
        method: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<i64, CacheError> {
        self.enqueue_at(link, method, payload, Utc::now()).await
    }

    /// Enqueue with an explicit submission time.
    pub async fn enqueue_at(
        &self,
        link: &str,
        method: &str,
        payload: Option<&serde_json::Value>,
        submitted: DateTime<Utc>,
    ) -> Result<i64, CacheError> {
        let body = payload.map(serde_json::to_string).transpose()?;
        let id = retry_queue::enqueue(
            &self.pool,
            link,
            method,
            body.as_deref(),
            submitted.timestamp(),
        )
        .await?;
        debug!(id, link, method, "request queued for retry");
        Ok(id)
    }

    /// Entries still within their max age, oldest first. Expired entries are
    /// removed as a side effect.
    pub async fn pending(&self) -> Result<Vec<PendingRequest>, CacheError> {
        self.prune().await?;
        let rows = retry_queue::list(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| PendingRequest {
                id: r.id,
                link: r.link,
                method: r.method,
                payload: r.payload.and_then(|p| serde_json::from_str(&p).ok()),
                submitted: Utc
                    .timestamp_opt(r.submitted_ts, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
                attempts: r.attempts,
            })
            .collect())
    }

    /// The request went through; forget it.
    pub async fn complete(&self, id: i64) -> Result<(), CacheError> {
        retry_queue::remove(&self.pool, id).await?;
        Ok(())
    }

    /// The replay failed again; keep it and count the attempt.
    pub async fn failed(&self, id: i64) -> Result<(), CacheError> {
        retry_queue::bump_attempts(&self.pool, id).await?;
        Ok(())
    }

    /// Drop entries older than the max age.
    pub async fn prune(&self) -> Result<u64, CacheError> {
        let cutoff = Utc::now().timestamp() - self.max_age.as_secs() as i64;
        let dropped = retry_queue::prune_older_than(&self.pool, cutoff).await?;
        if dropped > 0 {
            info!(dropped, "expired queued requests dropped");
        }
        Ok(dropped)
    }

    pub async fn len(&self) -> Result<usize, CacheError> {
        Ok(retry_queue::count(&self.pool).await? as usize)
    }

    pub async fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn queue() -> RetryQueue {
        RetryQueue::new(cinemeld_db::open(":memory:").await.unwrap())
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_not_returned() {
        let q = queue().await;
        let body = json!({"movies": [{"ids": {"imdb": "tt0111161"}}]});
        q.enqueue_at(
            "sync/history",
            "POST",
            Some(&body),
            Utc::now() - chrono::Duration::days(29),
        )
        .await
        .unwrap();
        let fresh = q.enqueue("sync/ratings", "POST", Some(&body)).await.unwrap();

        let pending = q.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, fresh);
        assert_eq!(pending[0].payload.as_ref(), Some(&body));
        assert_eq!(q.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn complete_removes_and_failed_counts() {
        let q = queue().await;
        let id = q.enqueue("sync/playback", "DELETE", None).await.unwrap();
        q.failed(id).await.unwrap();
        assert_eq!(q.pending().await.unwrap()[0].attempts, 1);
        q.complete(id).await.unwrap();
        assert!(q.is_empty().await.unwrap());
    }
}
