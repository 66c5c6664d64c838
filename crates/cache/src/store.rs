use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use cinemeld_core::concurrency::NamedLocks;
use cinemeld_db::repo::{cache as rows, settings};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::codec::{self, Codec};
use crate::key::CacheKey;
use crate::tier::{Policy, Tier};
use crate::CacheError;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Payloads at least this large are compressed.
    pub compress_above: usize,
    /// Skip the benchmark and use this codec.
    pub codec: Option<Codec>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            compress_above: 1024,
            codec: None,
        }
    }
}

/// Keyed cache with per-key request coalescing.
///
/// Concurrent fetches of the same key serialize on a named lock. Each
/// successful store bumps a per-key generation, so a caller that waited on
/// the lock can tell a fresh value was produced meanwhile and reuse it
/// instead of computing again.
pub struct Cache {
    pool: SqlitePool,
    codec: Codec,
    config: CacheConfig,
    locks: NamedLocks,
    generations: Mutex<HashMap<String, u64>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("codec", &self.codec)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Cache {
    pub async fn open(pool: SqlitePool, config: CacheConfig) -> Result<Self, CacheError> {
        let codec = match config.codec {
            Some(c) => c,
            None => resolve_codec(&pool).await?,
        };
        Ok(Self {
            pool,
            codec,
            config,
            locks: NamedLocks::new(),
            generations: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Read a stored value no older than `max_age`. Undecodable entries are
    /// treated as misses.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        max_age: Option<Duration>,
    ) -> Option<T> {
        let row = match rows::get(&self.pool, key.as_str()).await {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed");
                return None;
            }
        };

        if let Some(max_age) = max_age {
            let age = cinemeld_db::now_ts() - row.updated_ts;
            if age < 0 || age as u64 > max_age.as_secs() {
                return None;
            }
        }

        let codec = Codec::from_str(&row.compression).unwrap_or(Codec::None);
        let bytes = match codec.decompress(&row.value) {
            Ok(b) => b,
            Err(e) => {
                warn!(key = %key, codec = codec.as_str(), error = %e, "cache entry undecodable");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(key = %key, error = %e, "cache entry has unexpected shape");
                None
            }
        }
    }

    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_vec(value)?;
        let (codec, bytes) = if json.len() >= self.config.compress_above {
            (self.codec, self.codec.compress(&json)?)
        } else {
            (Codec::None, json)
        };
        let _w = self.write_lock.lock().await;
        rows::put(
            &self.pool,
            key.as_str(),
            &bytes,
            codec.as_str(),
            cinemeld_db::now_ts(),
        )
        .await?;
        Ok(())
    }

    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let _w = self.write_lock.lock().await;
        Ok(rows::delete(&self.pool, key.as_str()).await?)
    }

    /// Return the value for `key` under `policy`, computing it when needed.
    ///
    /// A failed computation evicts any stored value for the key before the
    /// error is returned. Storage failures are logged and never fail the call.
    pub async fn fetch<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        policy: Policy,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // Taken before the generation is read so the entry outlives every
        // caller that compares against it.
        let lock = self.locks.handle(key.as_str());
        let result = self.coalesce(key, policy, &lock, compute).await;
        drop(lock);
        if self.locks.release(key.as_str()) {
            self.forget(key.as_str());
        }
        result
    }

    async fn coalesce<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        policy: Policy,
        lock: &tokio::sync::Mutex<()>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let seen = self.generation(key);
        if let Some(age) = policy.serve_age() {
            if let Some(v) = self.get(key, Some(age)).await {
                return Ok(v);
            }
        }

        let _guard = lock.lock().await;
        if self.generation(key) != seen {
            if let Some(v) = self.get(key, None).await {
                debug!(key = %key, "coalesced onto in-flight computation");
                return Ok(v);
            }
        }

        match compute().await {
            Ok(value) => {
                if policy.stores() {
                    match self.put(key, &value).await {
                        Ok(()) => self.bump(key),
                        Err(e) => warn!(key = %key, error = %e, "cache write failed"),
                    }
                } else if let Err(e) = self.invalidate(key).await {
                    warn!(key = %key, error = %e, "cache clear failed");
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(err) = self.invalidate(key).await {
                    warn!(key = %key, error = %err, "cache eviction failed");
                }
                Err(e)
            }
        }
    }

    /// Remove entries older than the longest tier and forget idle key locks.
    pub async fn purge(&self) -> Result<u64, CacheError> {
        let cutoff = cinemeld_db::now_ts() - Tier::Extended.max_age().as_secs() as i64;
        let removed = {
            let _w = self.write_lock.lock().await;
            rows::purge_older_than(&self.pool, cutoff).await?
        };
        self.forget_idle();
        if removed > 0 {
            info!(removed, "purged expired cache entries");
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        {
            let _w = self.write_lock.lock().await;
            rows::clear(&self.pool).await?;
        }
        self.forget_idle();
        Ok(())
    }

    /// Drop idle key locks and the generations nobody compares against.
    fn forget_idle(&self) {
        self.locks.prune();
        let mut map = self.generations.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|key, _| self.locks.contains(key));
    }

    fn forget(&self, key: &str) {
        self.generations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    fn generation(&self, key: &CacheKey) -> u64 {
        let map = self.generations.lock().unwrap_or_else(|e| e.into_inner());
        map.get(key.as_str()).copied().unwrap_or(0)
    }

    fn bump(&self, key: &CacheKey) {
        let mut map = self.generations.lock().unwrap_or_else(|e| e.into_inner());
        *map.entry(key.as_str().to_string()).or_insert(0) += 1;
    }
}

async fn resolve_codec(pool: &SqlitePool) -> Result<Codec, CacheError> {
    if let Some(stored) = settings::get(pool, codec::SETTING_KEY).await? {
        if let Some(c) = Codec::from_str(&stored) {
            return Ok(c);
        }
    }
    let codec = tokio::task::spawn_blocking(|| Codec::benchmark(&codec::benchmark_sample()))
        .await
        .unwrap_or(Codec::Zlib);
    settings::set(pool, codec::SETTING_KEY, codec.as_str()).await?;
    info!(codec = codec.as_str(), "cache compression selected");
    Ok(codec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn cache() -> Cache {
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        Cache::open(
            pool,
            CacheConfig {
                compress_above: 16,
                codec: Some(Codec::Zlib),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn concurrent_cold_readers_compute_once() {
        let cache = Arc::new(cache().await);
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new("trakt.trending", &json!({"page": 1}));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .fetch(&key, Policy::Cached(Tier::Short), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(vec!["tt0111161".to_string(), "tt0068646".to_string()])
                    })
                    .await
            }));
        }

        for h in handles {
            let v = h.await.unwrap().unwrap();
            assert_eq!(v.len(), 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn finished_fetches_leave_no_bookkeeping() {
        let cache = Arc::new(cache().await);
        let mut handles = Vec::new();
        for page in 0..4 {
            for _ in 0..3 {
                let cache = cache.clone();
                handles.push(tokio::spawn(async move {
                    let key = CacheKey::new("tmdb.popular", &json!({ "page": page }));
                    cache
                        .fetch(&key, Policy::Cached(Tier::Medium), || async {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, String>(page)
                        })
                        .await
                }));
            }
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(cache.locks.is_empty());
        assert!(cache.generations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_computation_leaves_no_entry() {
        let cache = cache().await;
        let key = CacheKey::new("tmdb.movie", &json!([278]));
        cache
            .fetch(&key, Policy::Cached(Tier::Long), || async {
                Ok::<_, String>(json!({"title": "The Shawshank Redemption"}))
            })
            .await
            .unwrap();
        assert!(cache.get::<serde_json::Value>(&key, None).await.is_some());

        let err = cache
            .fetch(&key, Policy::Refresh(Tier::Long), || async {
                Err::<serde_json::Value, _>("connection reset".to_string())
            })
            .await
            .unwrap_err();
        assert_eq!(err, "connection reset");
        assert!(cache.get::<serde_json::Value>(&key, None).await.is_none());
    }

    #[tokio::test]
    async fn stale_entry_is_recomputed_for_short_tiers_only() {
        let cache = cache().await;
        let key = CacheKey::new("imdb.list", &json!({"year": 2019}));
        let hour_ago = cinemeld_db::now_ts() - 3600;
        rows::put(cache.pool(), key.as_str(), b"[\"old\"]", "none", hour_ago)
            .await
            .unwrap();

        let medium: Vec<String> = cache
            .fetch(&key, Policy::Cached(Tier::Medium), || async {
                Ok::<_, String>(vec!["new".to_string()])
            })
            .await
            .unwrap();
        assert_eq!(medium, vec!["old"]);

        let quick: Vec<String> = cache
            .fetch(&key, Policy::Cached(Tier::Quick), || async {
                Ok::<_, String>(vec!["new".to_string()])
            })
            .await
            .unwrap();
        assert_eq!(quick, vec!["new"]);
    }

    #[tokio::test]
    async fn clear_policy_always_computes_and_stores_nothing() {
        let cache = cache().await;
        let key = CacheKey::new("fanart.movie", &json!([603]));
        cache.put(&key, &json!({"poster": "a"})).await.unwrap();

        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            cache
                .fetch(&key, Policy::Clear, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(json!({"poster": "b"}))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.get::<serde_json::Value>(&key, None).await.is_none());
    }

    #[tokio::test]
    async fn large_values_are_compressed_transparently() {
        let cache = cache().await;
        let key = CacheKey::new("menu.page", &json!({}));
        let value: Vec<String> = (0..100).map(|i| format!("item {i}")).collect();
        cache.put(&key, &value).await.unwrap();

        let row = rows::get(cache.pool(), key.as_str()).await.unwrap().unwrap();
        assert_eq!(row.compression, "zlib");
        assert_eq!(cache.get::<Vec<String>>(&key, None).await.unwrap(), value);
    }

    #[tokio::test]
    async fn benchmark_result_is_persisted() {
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        let cache = Cache::open(pool.clone(), CacheConfig::default()).await.unwrap();
        let stored = settings::get(&pool, codec::SETTING_KEY).await.unwrap().unwrap();
        assert_eq!(Codec::from_str(&stored), Some(cache.codec()));

        settings::set(&pool, codec::SETTING_KEY, "bz2").await.unwrap();
        let reopened = Cache::open(pool, CacheConfig::default()).await.unwrap();
        assert_eq!(reopened.codec(), Codec::Bzip2);
    }
}
