//! Per-item multi-provider enrichment and the batch orchestrator.
//!
//! `enrich` serves a stored record when it is fresh, serves it and refreshes
//! in the background when it is mildly stale, and otherwise fetches every
//! provider of the detail plan in parallel, merges, and persists the result
//! when the merge is complete. An incomplete merge is laid over whatever was
//! stored, so a failing provider never costs fields the record already had.
//! Foreground merges of one item are serialized by a named lock; callers that
//! were already waiting on that lock reuse an incomplete merge instead of
//! hitting the providers again, while later callers retry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use cinemeld_core::concurrency::{AbortFlag, NamedLocks, ScopedAcquire, WorkerPool, busy_wait_join};
use cinemeld_core::error::Classify;
use cinemeld_core::types::{ItemSeed, MediaKind};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::merge::{Merged, ProviderOutcome, merge};
use crate::meta_cache::{MetaCache, RefreshState};
use crate::provider::{DetailLevel, MetadataProvider};
use crate::{MetaRecord, MetadataError, Provider};

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub detail: DetailLevel,
    /// Drop items for which no primary id can be resolved.
    pub filter_unresolved: bool,
    /// Concurrent background refreshes.
    pub background_limit: usize,
    /// How long an incomplete merge is kept for callers that were waiting
    /// on it.
    pub memo_ttl: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            detail: DetailLevel::Standard,
            filter_unresolved: true,
            background_limit: 3,
            memo_ttl: Duration::from_secs(60),
        }
    }
}

/// How much of a batch is refreshed before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuickPolicy {
    /// Every item goes through `enrich`.
    #[default]
    Classic,
    /// At most this many items are refreshed in the foreground; the rest
    /// are served from cache and refreshed in the background.
    Foreground(usize),
    /// Refresh in the foreground and schedule no background work.
    ForegroundOnly,
    /// Serve whatever is stored and refresh everything in the background.
    CachedOnly,
}

impl QuickPolicy {
    /// Reads the legacy encoding: positive count, negative for foreground
    /// only, `true` for cached only, absent for classic.
    pub fn from_param(s: Option<&str>) -> Self {
        match s.map(str::trim) {
            None | Some("") | Some("none") => Self::Classic,
            Some("true") => Self::CachedOnly,
            Some(v) => match v.parse::<i64>() {
                Ok(n) if n < 0 => Self::ForegroundOnly,
                Ok(n) => Self::Foreground(n as usize),
                Err(_) => Self::Classic,
            },
        }
    }
}

pub struct MetaAggregator {
    config: AggregatorConfig,
    cache: MetaCache,
    providers: HashMap<Provider, Arc<dyn MetadataProvider>>,
    pool: WorkerPool,
    locks: NamedLocks,
    background: Arc<Semaphore>,
    refreshing: Mutex<HashSet<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    memo: Mutex<HashMap<String, (Instant, MetaRecord)>>,
    abort: AbortFlag,
}

impl MetaAggregator {
    pub fn new(config: AggregatorConfig, cache: MetaCache, pool: WorkerPool, abort: AbortFlag) -> Self {
        let background = Arc::new(Semaphore::new(config.background_limit.max(1)));
        Self {
            config,
            cache,
            providers: HashMap::new(),
            pool,
            locks: NamedLocks::new(),
            background,
            refreshing: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
            memo: Mutex::new(HashMap::new()),
            abort,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.providers.insert(provider.provider(), provider);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &MetaCache {
        &self.cache
    }

    pub fn provider(&self, provider: Provider) -> Option<&Arc<dyn MetadataProvider>> {
        self.providers.get(&provider)
    }

    /// Fill in missing ids. `Ok(None)` means the item should be dropped.
    async fn resolve(&self, mut seed: ItemSeed) -> Result<Option<ItemSeed>, MetadataError> {
        if matches!(seed.kind, MediaKind::Season | MediaKind::Episode) && seed.show_ids.is_some() {
            return Ok(Some(seed));
        }
        let trakt = self.providers.get(&Provider::Trakt);
        let mut transient = false;
        for provider in [Provider::Trakt, Provider::Tmdb] {
            if seed.ids.has_primary() {
                break;
            }
            let Some(client) = self.providers.get(&provider) else {
                continue;
            };
            match client.resolve(&seed).await {
                Ok(Some(ids)) => seed.ids.fill_from(&ids),
                Ok(None) => {}
                Err(e) if e.kind().leaves_incomplete() => {
                    debug!(item = %seed.key(), provider = %provider, error = %e, "id resolution failed");
                    transient = true;
                }
                Err(e) => debug!(item = %seed.key(), provider = %provider, error = %e, "id resolution rejected"),
            }
        }

        let unresolved = match trakt {
            Some(_) => !seed.ids.has_primary(),
            None => seed.ids.is_empty(),
        };
        if unresolved && self.config.filter_unresolved && !transient {
            debug!(item = %seed.key(), "dropping unresolved item");
            return Ok(None);
        }
        Ok(Some(seed))
    }

    /// Enriched record for one item, or `None` when the item was filtered.
    pub async fn enrich(self: &Arc<Self>, seed: ItemSeed) -> Result<Option<MetaRecord>, MetadataError> {
        let Some(seed) = self.resolve(seed).await? else {
            return Ok(None);
        };

        let cached = self.cache.read(&seed).await?;
        let state = cached.as_ref().map(|c| c.state(Utc::now()));
        match (cached, state) {
            (Some(c), Some(RefreshState::Fresh)) => return Ok(Some(c.record)),
            (Some(c), Some(RefreshState::StaleBackground)) => {
                self.refresh_in_background(seed);
                return Ok(Some(c.record));
            }
            _ => {}
        }

        self.enrich_foreground(seed).await.map(Some)
    }

    async fn enrich_foreground(&self, seed: ItemSeed) -> Result<MetaRecord, MetadataError> {
        let key = seed.key();
        let result = self.merge_locked(&seed, &key).await;
        self.locks.release(&key);
        result
    }

    async fn merge_locked(&self, seed: &ItemSeed, key: &str) -> Result<MetaRecord, MetadataError> {
        let asked = Instant::now();
        let _guard = self.locks.lock(key).await;

        // Someone may have finished the same merge while we waited.
        let stored = match self.cache.read(seed).await? {
            Some(c) if !c.state(Utc::now()).blocks() => return Ok(c.record),
            other => other.map(|c| c.record),
        };
        if let Some(record) = self.memoized(key, asked) {
            debug!(item = %key, "reusing incomplete merge");
            return Ok(record);
        }

        let merged = self.fetch_all(seed, stored).await;
        self.store(seed, key, &merged).await?;
        Ok(merged.record)
    }

    async fn store(&self, seed: &ItemSeed, key: &str, merged: &Merged) -> Result<(), MetadataError> {
        if merged.complete {
            self.cache.write(seed, &merged.record, true).await?;
            self.lock_memo().remove(key);
        } else {
            self.lock_memo()
                .insert(key.to_string(), (Instant::now(), merged.record.clone()));
        }
        Ok(())
    }

    fn lock_memo(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Instant, MetaRecord)>> {
        self.memo.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// An incomplete merge produced after `asked`.
    fn memoized(&self, key: &str, asked: Instant) -> Option<MetaRecord> {
        let mut memo = self.lock_memo();
        let ttl = self.config.memo_ttl;
        memo.retain(|_, (at, _)| at.elapsed() < ttl);
        memo.get(key)
            .filter(|(at, _)| *at >= asked)
            .map(|(_, r)| r.clone())
    }

    /// Ask every provider of the detail plan in parallel and merge. An
    /// incomplete merge is laid over `stored` when there is one.
    pub async fn fetch_all(&self, seed: &ItemSeed, stored: Option<MetaRecord>) -> Merged {
        let outcomes = self.outcomes(seed).await;
        let merged = merge(MetaRecord::from_seed(seed), outcomes.clone());
        if merged.complete {
            return merged;
        }
        info!(item = %seed.key(), kept_stored = stored.is_some(), "merge incomplete, not persisted");
        match stored {
            Some(stored) => merge(stored, outcomes),
            None => merged,
        }
    }

    async fn outcomes(&self, seed: &ItemSeed) -> Vec<ProviderOutcome> {
        let steps: Vec<_> = self
            .config
            .detail
            .plan()
            .into_iter()
            .filter_map(|step| self.providers.get(&step.provider).map(|p| (step, p.clone())))
            .collect();

        let futs: Vec<_> = steps
            .iter()
            .map(|(step, client)| {
                let client = client.clone();
                let seed = seed.clone();
                let abort = self.abort.clone();
                let step = *step;
                async move {
                    if abort.is_aborted() {
                        return ProviderOutcome {
                            provider: step.provider,
                            complete: false,
                            data: None,
                        };
                    }
                    match client.fetch(&seed, step.full).await {
                        Ok(data) => ProviderOutcome::ok(step.provider, data),
                        Err(e) => {
                            debug!(item = %seed.key(), provider = %step.provider, error = %e, "provider fetch failed");
                            ProviderOutcome::failed(step.provider, &e)
                        }
                    }
                }
            })
            .collect();

        self.pool
            .join_all(futs)
            .await
            .into_iter()
            .zip(&steps)
            .map(|(outcome, (step, _))| {
                outcome.unwrap_or(ProviderOutcome {
                    provider: step.provider,
                    complete: false,
                    data: None,
                })
            })
            .collect()
    }

    /// Refresh an item off the caller's path, at most once at a time per item.
    pub fn refresh_in_background(self: &Arc<Self>, seed: ItemSeed) {
        let key = seed.key();
        {
            let mut refreshing = self.refreshing.lock().unwrap_or_else(|e| e.into_inner());
            if !refreshing.insert(key.clone()) {
                return;
            }
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _slot = ScopedAcquire::acquire(&this.background).await;
            if !this.abort.is_aborted() {
                let guard = this.locks.lock(&key).await;
                let stored = match this.cache.read(&seed).await {
                    Ok(c) => c.map(|c| c.record),
                    Err(e) => {
                        debug!(item = %key, error = %e, "stored record unreadable");
                        None
                    }
                };
                let merged = this.fetch_all(&seed, stored).await;
                if let Err(e) = this.store(&seed, &key, &merged).await {
                    warn!(item = %key, error = %e, "background refresh not stored");
                }
                drop(guard);
                this.locks.release(&key);
            }
            this.refreshing
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
        });
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Wait for every scheduled background refresh.
    pub async fn wait_background(&self) {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Enrich many items. Records come back in input order; filtered items
    /// are left out and items not refreshed in time are served as stored or
    /// as their skeleton.
    pub async fn enrich_batch(self: &Arc<Self>, seeds: Vec<ItemSeed>, policy: QuickPolicy) -> Vec<MetaRecord> {
        if policy == QuickPolicy::Classic {
            return self.run_foreground(seeds).await.into_iter().flatten().collect();
        }

        let now = Utc::now();
        let mut slots: Vec<Option<MetaRecord>> = Vec::with_capacity(seeds.len());
        let mut foreground: Vec<(usize, ItemSeed)> = Vec::new();
        let budget = match policy {
            QuickPolicy::Foreground(n) => n,
            QuickPolicy::ForegroundOnly => usize::MAX,
            _ => 0,
        };

        for (index, seed) in seeds.into_iter().enumerate() {
            let cached = match self.cache.read(&seed).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(item = %seed.key(), error = %e, "cache read failed");
                    None
                }
            };
            let state = cached.as_ref().map(|c| c.state(now));
            let needs_work = state.is_none_or(|s| s.blocks());
            slots.push(Some(
                cached
                    .map(|c| c.record)
                    .unwrap_or_else(|| MetaRecord::from_seed(&seed)),
            ));

            if needs_work && foreground.len() < budget {
                foreground.push((index, seed));
            } else if (needs_work || state == Some(RefreshState::StaleBackground))
                && policy != QuickPolicy::ForegroundOnly
            {
                self.refresh_in_background(seed);
            }
        }

        let (indices, work): (Vec<usize>, Vec<ItemSeed>) = foreground.into_iter().unzip();
        let results = self.run_foreground(work).await;
        for (index, result) in indices.into_iter().zip(results) {
            slots[index] = result;
        }
        slots.into_iter().flatten().collect()
    }

    /// Enrich `seeds` concurrently on a spawned task and busy-wait for it.
    /// Aborting yields an empty result.
    async fn run_foreground(self: &Arc<Self>, seeds: Vec<ItemSeed>) -> Vec<Option<MetaRecord>> {
        if seeds.is_empty() {
            return Vec::new();
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let futs = seeds.into_iter().map(|seed| {
                let this = Arc::clone(&this);
                async move {
                    let key = seed.key();
                    let fallback = MetaRecord::from_seed(&seed);
                    match this.enrich(seed).await {
                        Ok(record) => record,
                        Err(e) => {
                            warn!(item = %key, error = %e, "enrich failed, serving skeleton");
                            Some(fallback)
                        }
                    }
                }
            });
            futures::future::join_all(futs).await
        });
        busy_wait_join(handle, &self.abort).await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinemeld_core::types::IdBundle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        provider: Provider,
        title: Option<&'static str>,
        fail_network: bool,
        calls: AtomicUsize,
        delay: Duration,
        resolves_to: Option<IdBundle>,
    }

    impl FakeProvider {
        fn new(provider: Provider, title: Option<&'static str>) -> Self {
            Self {
                provider,
                title,
                fail_network: false,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                resolves_to: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl MetadataProvider for FakeProvider {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn fetch(&self, seed: &ItemSeed, _full: bool) -> Result<Option<MetaRecord>, MetadataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_network {
                return Err(MetadataError::Network {
                    provider: self.provider.as_str(),
                    message: "timeout".into(),
                });
            }
            let mut record = MetaRecord::from_seed(seed);
            record.title = self.title.map(str::to_string);
            record.year = Some(1994);
            record.premiered = chrono::NaiveDate::from_ymd_opt(1994, 9, 23);
            Ok(Some(record))
        }

        async fn resolve(&self, _seed: &ItemSeed) -> Result<Option<IdBundle>, MetadataError> {
            Ok(self.resolves_to.clone())
        }
    }

    struct Fixture {
        agg: Arc<MetaAggregator>,
        tmdb: Arc<FakeProvider>,
        imdb: Arc<FakeProvider>,
        pool: sqlx::SqlitePool,
    }

    async fn fixture(imdb: FakeProvider, config: AggregatorConfig) -> Fixture {
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        let tmdb = Arc::new(FakeProvider::new(Provider::Tmdb, Some("The Shawshank Redemption")));
        let imdb = Arc::new(imdb);
        let agg = MetaAggregator::new(
            AggregatorConfig {
                detail: DetailLevel::Essential,
                ..config
            },
            MetaCache::new(pool.clone()),
            WorkerPool::new(4),
            AbortFlag::new(),
        )
        .with_provider(tmdb.clone())
        .with_provider(imdb.clone());
        Fixture {
            agg: Arc::new(agg),
            tmdb,
            imdb,
            pool,
        }
    }

    fn seed() -> ItemSeed {
        ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt0111161"))
    }

    fn unfiltered() -> AggregatorConfig {
        AggregatorConfig {
            filter_unresolved: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn complete_merge_is_persisted_and_then_served_from_cache() {
        let f = fixture(FakeProvider::new(Provider::Imdb, Some("Shawshank")), unfiltered()).await;

        let first = f.agg.enrich(seed()).await.unwrap().unwrap();
        assert_eq!(first.title.as_deref(), Some("The Shawshank Redemption"));
        assert_eq!(f.tmdb.calls(), 1);

        let again = f.agg.enrich(seed()).await.unwrap().unwrap();
        assert_eq!(again.title, first.title);
        assert_eq!(f.tmdb.calls(), 1);
        assert_eq!(f.imdb.calls(), 1);
    }

    #[tokio::test]
    async fn network_failure_keeps_the_merge_in_memory_only() {
        let mut imdb = FakeProvider::new(Provider::Imdb, None);
        imdb.fail_network = true;
        let f = fixture(imdb, unfiltered()).await;

        let record = f.agg.enrich(seed()).await.unwrap().unwrap();
        assert_eq!(record.title.as_deref(), Some("The Shawshank Redemption"));
        assert_eq!(f.agg.cache().count(MediaKind::Movie).await.unwrap(), 0);

        // Entering the menu again asks the providers again.
        f.agg.enrich(seed()).await.unwrap();
        assert_eq!(f.imdb.calls(), 2);
        assert_eq!(f.tmdb.calls(), 2);
    }

    #[tokio::test]
    async fn waiting_callers_reuse_an_incomplete_merge() {
        let mut imdb = FakeProvider::new(Provider::Imdb, None);
        imdb.fail_network = true;
        imdb.delay = Duration::from_millis(50);
        let f = fixture(imdb, unfiltered()).await;

        let (a, b, c) = tokio::join!(
            f.agg.enrich(seed()),
            f.agg.enrich(seed()),
            f.agg.enrich(seed())
        );
        for record in [a, b, c] {
            let record = record.unwrap().unwrap();
            assert_eq!(record.title.as_deref(), Some("The Shawshank Redemption"));
        }
        assert_eq!(f.imdb.calls(), 1);
    }

    #[tokio::test]
    async fn failing_provider_keeps_the_stale_record() {
        let mut imdb = FakeProvider::new(Provider::Imdb, None);
        imdb.fail_network = true;
        let f = fixture(imdb, unfiltered()).await;
        let mut stored = MetaRecord::from_seed(&seed());
        stored.title = Some("Old Title".into());
        stored.plot = Some("Stored plot".into());
        stored.premiered = chrono::NaiveDate::from_ymd_opt(1994, 9, 23);
        let two_hundred_days = 200 * 24 * 3600;
        cinemeld_db::repo::meta::upsert(
            &f.pool,
            "movie",
            &seed().ids,
            None,
            None,
            &serde_json::to_string(&stored).unwrap(),
            true,
            "complete",
            cinemeld_db::now_ts() - two_hundred_days,
        )
        .await
        .unwrap();
        let before = f.agg.cache().read(&seed()).await.unwrap().unwrap();
        assert_eq!(before.state(Utc::now()), RefreshState::StaleForeground);

        let served = f.agg.enrich(seed()).await.unwrap().unwrap();
        assert_eq!(served.plot.as_deref(), Some("Stored plot"));
        assert_eq!(served.title.as_deref(), Some("The Shawshank Redemption"));
        assert_eq!(f.imdb.calls(), 1);

        // Not persisted: the stored row still carries the old title.
        let after = f.agg.cache().read(&seed()).await.unwrap().unwrap();
        assert_eq!(after.record.title.as_deref(), Some("Old Title"));
    }

    #[tokio::test]
    async fn item_locks_are_released_after_merging() {
        let f = fixture(FakeProvider::new(Provider::Imdb, Some("Shawshank")), unfiltered()).await;
        f.agg.enrich(seed()).await.unwrap();
        let seeds = (1..=5)
            .map(|n| ItemSeed::new(MediaKind::Movie, IdBundle::imdb(format!("tt{n}"))))
            .collect();
        f.agg.enrich_batch(seeds, QuickPolicy::Foreground(2)).await;
        f.agg.wait_background().await;
        assert_eq!(f.tmdb.calls(), 6);
        assert!(f.agg.locks.is_empty());
    }

    #[tokio::test]
    async fn concurrent_enrich_of_one_item_merges_once() {
        let mut imdb = FakeProvider::new(Provider::Imdb, Some("Shawshank"));
        imdb.delay = Duration::from_millis(50);
        let f = fixture(imdb, unfiltered()).await;

        let (a, b, c) = tokio::join!(
            f.agg.enrich(seed()),
            f.agg.enrich(seed()),
            f.agg.enrich(seed())
        );
        assert!(a.unwrap().is_some() && b.unwrap().is_some() && c.unwrap().is_some());
        assert_eq!(f.imdb.calls(), 1);
    }

    #[tokio::test]
    async fn stale_record_is_served_and_refreshed_in_background() {
        let f = fixture(FakeProvider::new(Provider::Imdb, Some("Shawshank")), unfiltered()).await;
        let mut stored = MetaRecord::from_seed(&seed());
        stored.title = Some("Old Title".into());
        stored.premiered = chrono::NaiveDate::from_ymd_opt(1994, 9, 23);
        let forty_days = 40 * 24 * 3600;
        cinemeld_db::repo::meta::upsert(
            &f.pool,
            "movie",
            &seed().ids,
            None,
            None,
            &serde_json::to_string(&stored).unwrap(),
            true,
            "complete",
            cinemeld_db::now_ts() - forty_days,
        )
        .await
        .unwrap();

        let served = f.agg.enrich(seed()).await.unwrap().unwrap();
        assert_eq!(served.title.as_deref(), Some("Old Title"));

        f.agg.wait_background().await;
        assert_eq!(f.tmdb.calls(), 1);
        let refreshed = f.agg.cache().read(&seed()).await.unwrap().unwrap();
        assert_eq!(refreshed.record.title.as_deref(), Some("The Shawshank Redemption"));
        assert_eq!(refreshed.state(Utc::now()), RefreshState::Fresh);
    }

    #[tokio::test]
    async fn cached_only_batch_returns_skeletons_and_fills_later() {
        let f = fixture(FakeProvider::new(Provider::Imdb, Some("Shawshank")), unfiltered()).await;
        let seeds = vec![seed().with_title("Listed", Some(1994))];

        let records = f.agg.enrich_batch(seeds.clone(), QuickPolicy::CachedOnly).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title.as_deref(), Some("Listed"));

        f.agg.wait_background().await;
        assert_eq!(f.agg.cache().count(MediaKind::Movie).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn foreground_budget_caps_blocking_work() {
        let f = fixture(FakeProvider::new(Provider::Imdb, Some("Shawshank")), unfiltered()).await;
        let seeds = vec![
            ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt1")),
            ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt2")),
            ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt3")),
        ];
        let records = f.agg.enrich_batch(seeds, QuickPolicy::Foreground(1)).await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].title.as_deref(), Some("The Shawshank Redemption"));
        assert_eq!(records[1].title, None);
        f.agg.wait_background().await;
        assert_eq!(f.tmdb.calls(), 3);
    }

    #[tokio::test]
    async fn unresolved_items_are_filtered() {
        let mut trakt = FakeProvider::new(Provider::Trakt, None);
        trakt.resolves_to = None;
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        let agg = Arc::new(
            MetaAggregator::new(
                AggregatorConfig::default(),
                MetaCache::new(pool),
                WorkerPool::new(3),
                AbortFlag::new(),
            )
            .with_provider(Arc::new(trakt)),
        );
        assert!(agg.enrich(seed()).await.unwrap().is_none());
    }

    #[test]
    fn quick_param_encoding() {
        assert_eq!(QuickPolicy::from_param(None), QuickPolicy::Classic);
        assert_eq!(QuickPolicy::from_param(Some("true")), QuickPolicy::CachedOnly);
        assert_eq!(QuickPolicy::from_param(Some("-1")), QuickPolicy::ForegroundOnly);
        assert_eq!(QuickPolicy::from_param(Some("5")), QuickPolicy::Foreground(5));
    }
}
