//! Account tables held in memory and kept current against Trakt.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use cinemeld_cache::RetryQueue;
use cinemeld_core::concurrency::NamedLocks;
use cinemeld_core::error::{Classify, ErrorKind};
use cinemeld_core::host::{Dialog, Notification};
use cinemeld_core::notify::NotificationThrottle;
use cinemeld_core::types::{IdBundle, ItemSeed, MediaKind, SyncCategory};
use cinemeld_metadata::MetadataError;
use cinemeld_metadata::trakt::{Mutation, MutationMethod, TraktApi};
use sqlx::SqlitePool;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::{ScrobbleAction, SyncAction, UpdateOutcome};
use crate::clock::SyncClock;
use crate::local::PlaybackStore;
use crate::tables::{
    self, Group, HistoryEntry, ProgressEntry, RatingEntry, ShowNode, Tables,
};
use crate::{SyncConfig, SyncError};

/// One row of the progress menus: an item with both its play count and its
/// resume point.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressCandidate {
    pub seed: ItemSeed,
    pub plays: u32,
    /// Fraction in [0, 1].
    pub progress: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

struct Notifier {
    dialog: Arc<dyn Dialog>,
    throttle: Arc<NotificationThrottle>,
}

pub struct TraktStore {
    api: Arc<dyn TraktApi>,
    clock: SyncClock,
    local: PlaybackStore,
    queue: RetryQueue,
    config: SyncConfig,
    tables: RwLock<Arc<Tables>>,
    hydrated: OnceCell<()>,
    locks: NamedLocks,
    last_retry: Mutex<Option<Instant>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    notifier: Option<Notifier>,
}

impl TraktStore {
    pub fn new(pool: SqlitePool, api: Arc<dyn TraktApi>, config: SyncConfig) -> Self {
        Self {
            clock: SyncClock::new(pool.clone(), api.clone(), config.poll_interval),
            local: PlaybackStore::new(pool.clone()),
            queue: RetryQueue::new(pool),
            api,
            config,
            tables: RwLock::new(Arc::new(Tables::default())),
            hydrated: OnceCell::new(),
            locks: NamedLocks::new(),
            last_retry: Mutex::new(None),
            background: Mutex::new(Vec::new()),
            notifier: None,
        }
    }

    pub fn with_retry_queue(mut self, queue: RetryQueue) -> Self {
        self.queue = queue;
        self
    }

    /// Surface queued and rejected mutations through the host.
    pub fn with_notifications(mut self, dialog: Arc<dyn Dialog>, throttle: Arc<NotificationThrottle>) -> Self {
        self.notifier = Some(Notifier { dialog, throttle });
        self
    }

    pub fn api(&self) -> &Arc<dyn TraktApi> {
        &self.api
    }

    pub fn clock(&self) -> &SyncClock {
        &self.clock
    }

    pub fn local(&self) -> &PlaybackStore {
        &self.local
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    /// Current tables. Never observes a half-built index.
    pub fn snapshot(&self) -> Arc<Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn install(&self, apply: impl FnOnce(&mut Tables)) {
        let mut guard = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let mut next = Tables::clone(&guard);
        apply(&mut next);
        *guard = Arc::new(next);
    }

    /// Seed the tables from the local mirror once per process.
    async fn hydrate(&self) -> Result<(), SyncError> {
        self.hydrated
            .get_or_try_init(|| async {
                let tables = self.local.load_tables().await?;
                self.install(|t| *t = tables);
                debug!("account tables hydrated from local mirror");
                Ok::<_, SyncError>(())
            })
            .await?;
        Ok(())
    }

    /// Reload one table when Trakt reports newer activity than the copy we
    /// hold. Returns whether a reload happened. When Trakt is unreachable the
    /// current copy keeps being served.
    pub async fn ensure_loaded(&self, group: Group, category: SyncCategory) -> Result<bool, SyncError> {
        self.hydrate().await?;
        if !self.api.is_authenticated().await {
            return Ok(false);
        }
        let _guard = self
            .locks
            .lock(&format!("{}:{}", group.as_str(), category.as_str()))
            .await;

        if let Err(e) = self.clock.poll(false).await {
            return self.soften(e, group, category);
        }
        let mut stale = false;
        for kind in group.kinds() {
            stale |= self.clock.must_refresh(*kind, category).await?;
        }
        if !stale {
            return Ok(false);
        }

        if let Err(e) = self.reload(group, category).await {
            return self.soften(e, group, category);
        }
        for kind in group.kinds() {
            self.clock.mark_applied(*kind, category).await?;
        }
        self.local.reconcile(group, &self.snapshot()).await?;
        info!(group = group.as_str(), category = %category, "account table reloaded");
        Ok(true)
    }

    fn soften(&self, e: SyncError, group: Group, category: SyncCategory) -> Result<bool, SyncError> {
        if e.kind().is_transient() || e.kind() == ErrorKind::Authentication {
            warn!(group = group.as_str(), category = %category, error = %e, "serving stale account table");
            Ok(false)
        } else {
            Err(e)
        }
    }

    /// Bring every table up to date in the background.
    pub fn refresh_in_background(self: &Arc<Self>) {
        let store = self.clone();
        self.track(tokio::spawn(async move {
            for group in [Group::Movies, Group::Shows] {
                for category in SyncCategory::ALL {
                    if let Err(e) = store.ensure_loaded(group, category).await {
                        warn!(group = group.as_str(), category = %category, error = %e, "background reload failed");
                    }
                }
            }
        }));
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.background.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait for background reloads started so far.
    pub async fn settle(&self) {
        let handles: Vec<_> = {
            let mut guard = self.background.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn reload(&self, group: Group, category: SyncCategory) -> Result<(), SyncError> {
        let api = &self.api;
        match (category, group) {
            (SyncCategory::History, Group::Movies) => {
                let table = Arc::new(tables::history_movies(&api.watched(MediaKind::Movie).await?));
                self.install(|t| t.history.movies = table);
            }
            (SyncCategory::History, Group::Shows) => {
                let table = Arc::new(tables::history_shows(&api.watched(MediaKind::Show).await?));
                self.install(|t| t.history.shows = table);
            }
            (SyncCategory::Progress, Group::Movies) => {
                let table = Arc::new(tables::progress_movies(&api.playback(MediaKind::Movie).await?));
                self.install(|t| t.progress.movies = table);
            }
            (SyncCategory::Progress, Group::Shows) => {
                let table = Arc::new(tables::progress_shows(&api.playback(MediaKind::Episode).await?));
                self.install(|t| t.progress.shows = table);
            }
            (SyncCategory::Rating, Group::Movies) => {
                let table = Arc::new(tables::rating_movies(&api.ratings(MediaKind::Movie).await?));
                self.install(|t| t.rating.movies = table);
            }
            (SyncCategory::Rating, Group::Shows) => {
                let mut rated = Vec::new();
                for kind in Group::Shows.kinds() {
                    rated.extend(api.ratings(*kind).await?);
                }
                let table = Arc::new(tables::rating_shows(&rated));
                self.install(|t| t.rating.shows = table);
            }
        }
        Ok(())
    }

    pub async fn history(&self, seed: &ItemSeed) -> Result<Option<HistoryEntry>, SyncError> {
        self.ensure_loaded(Group::of(seed.kind), SyncCategory::History).await?;
        Ok(self.snapshot().history.lookup_seed(seed).cloned())
    }

    pub async fn progress(&self, seed: &ItemSeed) -> Result<Option<ProgressEntry>, SyncError> {
        self.ensure_loaded(Group::of(seed.kind), SyncCategory::Progress).await?;
        Ok(self.snapshot().progress.lookup_seed(seed).cloned())
    }

    pub async fn rating(&self, seed: &ItemSeed) -> Result<Option<RatingEntry>, SyncError> {
        self.ensure_loaded(Group::of(seed.kind), SyncCategory::Rating).await?;
        Ok(self.snapshot().rating.lookup_seed(seed).cloned())
    }

    /// Items with a play or a resume point, most recent activity first.
    /// Shows are represented by their show-level entries.
    pub async fn progress_candidates(&self, group: Group) -> Result<Vec<ProgressCandidate>, SyncError> {
        self.ensure_loaded(group, SyncCategory::History).await?;
        self.ensure_loaded(group, SyncCategory::Progress).await?;
        let tables = self.snapshot();

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |seed: ItemSeed, history: Option<&HistoryEntry>, progress: Option<&ProgressEntry>| {
            if !seen.insert(seed.key()) {
                return;
            }
            out.push(ProgressCandidate {
                plays: history.map_or(0, |h| h.plays),
                progress: progress.map_or(0.0, |p| p.progress),
                last_activity: history
                    .and_then(|h| h.last_watched_at)
                    .max(progress.and_then(|p| p.paused_at)),
                seed,
            });
        };

        match group {
            Group::Movies => {
                for h in tables.history.movies.iter() {
                    let p = tables.progress.movies.get(&h.ids);
                    push(seed_of(MediaKind::Movie, h.ids.clone(), &h.title, h.year), Some(h), p);
                }
                for p in tables.progress.movies.iter() {
                    let h = tables.history.movies.get(&p.ids);
                    push(seed_of(MediaKind::Movie, p.ids.clone(), &p.title, p.year), h, Some(p));
                }
            }
            Group::Shows => {
                for node in tables.history.shows.iter() {
                    let p = tables.progress.shows.get(&node.ids).and_then(show_entry);
                    push(seed_of(MediaKind::Show, node.ids.clone(), &node.title, node.year), show_entry(node), p);
                }
                for node in tables.progress.shows.iter() {
                    let h = tables.history.shows.get(&node.ids).and_then(show_entry);
                    push(
                        seed_of(MediaKind::Show, node.ids.clone(), &node.title, node.year),
                        h,
                        node.show.as_ref(),
                    );
                }
            }
        }
        out.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(out)
    }

    /// Items the user rated, most recent rating first.
    pub async fn rated(&self, kind: MediaKind) -> Result<Vec<(ItemSeed, u8)>, SyncError> {
        let group = Group::of(kind);
        self.ensure_loaded(group, SyncCategory::Rating).await?;
        let tables = self.snapshot();
        let mut out: Vec<(ItemSeed, u8, Option<DateTime<Utc>>)> = match kind {
            MediaKind::Movie => tables
                .rating
                .movies
                .iter()
                .map(|r| (ItemSeed::new(MediaKind::Movie, r.ids.clone()), r.rating, r.rated_at))
                .collect(),
            _ => tables
                .rating
                .shows
                .iter()
                .filter_map(|n| {
                    let r = n.show.as_ref()?;
                    Some((seed_of(MediaKind::Show, n.ids.clone(), &n.title, n.year), r.rating, r.rated_at))
                })
                .collect(),
        };
        out.sort_by(|a, b| b.2.cmp(&a.2));
        Ok(out.into_iter().map(|(s, r, _)| (s, r)).collect())
    }

    /// Push a mutation. Transient failures are queued for replay; rejected
    /// requests are surfaced to the caller. The local mirror only changes
    /// once the mutation was applied or queued.
    pub async fn update(self: &Arc<Self>, seed: &ItemSeed, action: SyncAction) -> Result<UpdateOutcome, SyncError> {
        if !self.api.is_authenticated().await {
            return Err(SyncError::NotAuthenticated);
        }
        let mutation = action.mutation(seed);
        let outcome = self.push(&mutation, action.name()).await?;
        if let Err(e) = self.record_locally(seed, &action).await {
            warn!(action = action.name(), item = %seed.key(), error = %e, "local mirror not updated");
        }
        if let (UpdateOutcome::Applied, Some(category)) = (outcome, action.category()) {
            self.schedule_reload(Group::of(seed.kind), category);
        }
        Ok(outcome)
    }

    /// Undo the category's state for the item.
    pub async fn remove(self: &Arc<Self>, seed: &ItemSeed, category: SyncCategory) -> Result<UpdateOutcome, SyncError> {
        let action = match category {
            SyncCategory::History => SyncAction::Unwatched,
            SyncCategory::Rating => SyncAction::Unrate,
            SyncCategory::Progress => {
                let id = self.progress(seed).await?.and_then(|p| p.playback_id);
                match id {
                    Some(id) => SyncAction::ClearProgress(id),
                    None => {
                        self.local.record_progress(seed, 0.0).await?;
                        return Ok(UpdateOutcome::Applied);
                    }
                }
            }
        };
        self.update(seed, action).await
    }

    /// Report a playback event. `progress` is a fraction. Pause and stop
    /// events are queued when Trakt is unreachable; start events are not.
    pub async fn scrobble(
        &self,
        seed: &ItemSeed,
        action: ScrobbleAction,
        progress: f64,
    ) -> Result<UpdateOutcome, SyncError> {
        if action != ScrobbleAction::Start {
            self.local.record_progress(seed, progress).await?;
        }
        if !self.api.is_authenticated().await {
            return Ok(UpdateOutcome::Queued);
        }
        let mutation = action.mutation(seed, progress);
        if action == ScrobbleAction::Start {
            self.api.submit(&mutation).await?;
            return Ok(UpdateOutcome::Applied);
        }
        self.push(&mutation, "scrobble").await
    }

    async fn push(&self, mutation: &Mutation, name: &str) -> Result<UpdateOutcome, SyncError> {
        match self.api.submit(mutation).await {
            Ok(()) => {
                debug!(action = name, path = %mutation.path, "mutation applied");
                Ok(UpdateOutcome::Applied)
            }
            // The client already spent its retry budget on 429s.
            Err(e) if e.kind() == ErrorKind::RateLimited => {
                warn!(action = name, error = %e, "mutation abandoned after rate limiting");
                self.notify(e.kind(), Notification::error("Trakt", e.to_string())).await;
                Err(e.into())
            }
            Err(e) if e.kind().is_transient() => {
                self.queue
                    .enqueue(&mutation.path, mutation.method.as_str(), mutation.body.as_ref())
                    .await?;
                info!(action = name, error = %e, "mutation queued for retry");
                self.notify(e.kind(), Notification::info("Trakt", "Trakt is unreachable, the change will be sent later"))
                    .await;
                Ok(UpdateOutcome::Queued)
            }
            Err(e) => {
                warn!(action = name, error = %e, "mutation rejected");
                self.notify(e.kind(), Notification::error("Trakt", e.to_string())).await;
                Err(e.into())
            }
        }
    }

    async fn notify(&self, kind: ErrorKind, notification: Notification) {
        if let Some(n) = &self.notifier {
            n.throttle.notify(n.dialog.as_ref(), kind, "trakt", notification).await;
        }
    }

    async fn record_locally(&self, seed: &ItemSeed, action: &SyncAction) -> Result<(), SyncError> {
        match action {
            SyncAction::Watched { at } => self.local.record_watched(seed, at.unwrap_or_else(Utc::now)).await,
            SyncAction::Rate(r) => self.local.record_rating(seed, Some(*r)).await,
            SyncAction::Unrate => self.local.record_rating(seed, None).await,
            SyncAction::ClearProgress(_) => self.local.record_progress(seed, 0.0).await,
            _ => Ok(()),
        }
    }

    fn schedule_reload(self: &Arc<Self>, group: Group, category: SyncCategory) {
        let store = self.clone();
        self.track(tokio::spawn(async move {
            if let Err(e) = store.clock.poll(true).await {
                debug!(error = %e, "activity poll after mutation failed");
                return;
            }
            if let Err(e) = store.ensure_loaded(group, category).await {
                warn!(group = group.as_str(), category = %category, error = %e, "reload after mutation failed");
            }
        }));
    }

    /// Replay queued mutations oldest first. Stops at the first transient
    /// failure; requests Trakt rejects outright are dropped. Unforced calls
    /// run at most once per retry interval.
    pub async fn retry_pending(&self, forced: bool) -> Result<usize, SyncError> {
        {
            let mut last = self.last_retry.lock().unwrap_or_else(|e| e.into_inner());
            if !forced && last.is_some_and(|at| at.elapsed() < self.config.retry_interval) {
                return Ok(0);
            }
            *last = Some(Instant::now());
        }
        if !self.api.is_authenticated().await {
            return Ok(0);
        }

        let mut sent = 0;
        for request in self.queue.pending().await? {
            let Some(method) = MutationMethod::from_str(&request.method) else {
                warn!(id = request.id, method = %request.method, "dropping queued request with unknown method");
                self.queue.complete(request.id).await?;
                continue;
            };
            let mutation = Mutation {
                method,
                path: request.link.clone(),
                body: request.payload.clone(),
            };
            match self.api.submit(&mutation).await {
                Ok(()) => {
                    self.queue.complete(request.id).await?;
                    sent += 1;
                }
                Err(e) if stops_draining(&e) => {
                    self.queue.failed(request.id).await?;
                    info!(id = request.id, error = %e, "retry drain paused");
                    break;
                }
                Err(e) => {
                    warn!(id = request.id, path = %request.link, error = %e, "queued request rejected, dropping");
                    self.queue.complete(request.id).await?;
                }
            }
        }
        if sent > 0 {
            info!(sent, "queued mutations replayed");
        }
        Ok(sent)
    }

    /// Forget the account state, e.g. after signing out.
    pub async fn reset(&self) -> Result<(), SyncError> {
        self.install(|t| *t = Tables::default());
        self.clock.reset().await?;
        self.local.clear().await?;
        Ok(())
    }
}

fn stops_draining(e: &MetadataError) -> bool {
    e.kind().is_transient() || e.kind() == ErrorKind::Authentication
}

fn show_entry<T>(node: &ShowNode<T>) -> Option<&T> {
    node.show.as_ref()
}

fn seed_of(kind: MediaKind, ids: IdBundle, title: &Option<String>, year: Option<i32>) -> ItemSeed {
    let mut seed = ItemSeed::new(kind, ids);
    seed.title.clone_from(title);
    seed.year = year;
    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTrakt;
    use chrono::Duration;
    use cinemeld_core::host::NotificationLevel;
    use cinemeld_core::testing::RecordingDialog;
    use cinemeld_metadata::trakt::wire::{PlaybackItem, WatchedItem};
    use serde_json::json;

    async fn store_with(api: Arc<FakeTrakt>) -> (SqlitePool, Arc<TraktStore>) {
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        let store = TraktStore::new(pool.clone(), api, SyncConfig::default());
        (pool, Arc::new(store))
    }

    fn shawshank() -> ItemSeed {
        ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt0111161"))
    }

    fn partial_movie_account(api: &FakeTrakt) {
        let playback: Vec<PlaybackItem> = serde_json::from_value(json!([
            { "id": 31, "progress": 42.0, "paused_at": "2024-01-03T20:00:00.000Z",
              "movie": { "title": "The Shawshank Redemption", "year": 1994,
                         "ids": { "trakt": 234, "imdb": "tt0111161", "tmdb": 278 } } }
        ]))
        .unwrap();
        api.with(|s| s.playback.insert(MediaKind::Movie, playback));
        api.set_activity(MediaKind::Movie, SyncCategory::Progress, 1_704_312_000);
        api.set_activity(MediaKind::Movie, SyncCategory::History, 1_704_000_000);
    }

    #[tokio::test]
    async fn reload_happens_only_when_remote_is_newer() {
        let api = Arc::new(FakeTrakt::default());
        partial_movie_account(&api);
        let (_pool, store) = store_with(api.clone()).await;

        assert!(store.ensure_loaded(Group::Movies, SyncCategory::Progress).await.unwrap());
        assert!(!store.ensure_loaded(Group::Movies, SyncCategory::Progress).await.unwrap());
        assert_eq!(api.calls("playback"), 1);

        let entry = store.progress(&shawshank()).await.unwrap().unwrap();
        assert!((entry.progress - 0.42).abs() < 1e-9);
        assert_eq!(entry.playback_id, Some(31));

        api.set_activity(MediaKind::Movie, SyncCategory::Progress, 1_704_400_000);
        store.clock().poll(true).await.unwrap();
        assert!(store.ensure_loaded(Group::Movies, SyncCategory::Progress).await.unwrap());
        assert_eq!(api.calls("playback"), 2);
    }

    #[tokio::test]
    async fn progress_candidates_join_history_and_progress() {
        let api = Arc::new(FakeTrakt::default());
        partial_movie_account(&api);
        let watched: Vec<WatchedItem> = serde_json::from_value(json!([
            { "plays": 1, "last_watched_at": "2023-03-01T20:00:00.000Z",
              "movie": { "title": "Heat", "year": 1995, "ids": { "trakt": 500, "imdb": "tt0113277" } } }
        ]))
        .unwrap();
        api.with(|s| s.watched.insert(MediaKind::Movie, watched));
        let (_pool, store) = store_with(api).await;

        let rows = store.progress_candidates(Group::Movies).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].seed.ids.imdb.as_deref(), Some("tt0111161"));
        assert_eq!(rows[0].plays, 0);
        assert!((rows[0].progress - 0.42).abs() < 1e-9);
        assert_eq!(rows[1].plays, 1);
        assert_eq!(rows[1].progress, 0.0);
    }

    #[tokio::test]
    async fn server_error_queues_one_row_and_retry_drains_it() {
        let api = Arc::new(FakeTrakt::default());
        let (_pool, store) = store_with(api.clone()).await;
        api.fail_next_submit(MetadataError::Server { provider: "trakt", status: 503 });

        let outcome = store
            .update(&shawshank(), SyncAction::Rate(9))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Queued);
        assert_eq!(store.queue().len().await.unwrap(), 1);

        assert_eq!(store.retry_pending(true).await.unwrap(), 1);
        assert!(store.queue().is_empty().await.unwrap());
        assert_eq!(api.submitted()[0].path, "sync/ratings");
    }

    #[tokio::test]
    async fn expired_rows_are_dropped_without_retry() {
        let api = Arc::new(FakeTrakt::default());
        let (_pool, store) = store_with(api.clone()).await;
        let old = Utc::now() - Duration::days(29);
        store
            .queue()
            .enqueue_at("sync/history", "POST", Some(&json!({ "movies": [] })), old)
            .await
            .unwrap();

        assert_eq!(store.retry_pending(true).await.unwrap(), 0);
        assert_eq!(api.calls("submit"), 0);
        assert!(store.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn drain_stops_at_first_transient_failure() {
        let api = Arc::new(FakeTrakt::default());
        let (_pool, store) = store_with(api.clone()).await;
        for path in ["sync/history", "sync/ratings"] {
            store.queue().enqueue(path, "POST", Some(&json!({}))).await.unwrap();
        }
        api.fail_next_submit(MetadataError::Network { provider: "trakt", message: "reset".into() });

        assert_eq!(store.retry_pending(true).await.unwrap(), 0);
        assert_eq!(api.calls("submit"), 1);
        assert_eq!(store.queue().len().await.unwrap(), 2);
        assert_eq!(store.retry_pending(false).await.unwrap(), 0);
        assert_eq!(api.calls("submit"), 1);
    }

    #[tokio::test]
    async fn rejected_mutation_is_surfaced_once() {
        let api = Arc::new(FakeTrakt::default());
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        let dialog = Arc::new(RecordingDialog::default());
        let store = Arc::new(
            TraktStore::new(pool, api.clone(), SyncConfig::default())
                .with_notifications(dialog.clone(), Arc::new(NotificationThrottle::default())),
        );
        for _ in 0..2 {
            api.fail_next_submit(MetadataError::Client { provider: "trakt", status: 422 });
            let err = store.update(&shawshank(), SyncAction::Watchlist).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Client);
        }
        assert!(store.queue().is_empty().await.unwrap());
        assert_eq!(dialog.with(|d| d.notifications.len()), 1);
    }

    #[tokio::test]
    async fn rejected_rating_leaves_the_local_mirror_alone() {
        let api = Arc::new(FakeTrakt::default());
        let (_pool, store) = store_with(api.clone()).await;
        api.fail_next_submit(MetadataError::Client { provider: "trakt", status: 422 });

        assert!(store.update(&shawshank(), SyncAction::Rate(9)).await.is_err());
        let row = store.local().find(&shawshank()).await.unwrap();
        assert_eq!(row.and_then(|r| r.rating), None);

        store.update(&shawshank(), SyncAction::Rate(8)).await.unwrap();
        let row = store.local().find(&shawshank()).await.unwrap();
        assert_eq!(row.and_then(|r| r.rating), Some(8));
    }

    #[tokio::test]
    async fn exhausted_rate_limit_is_abandoned_with_an_error() {
        let api = Arc::new(FakeTrakt::default());
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        let dialog = Arc::new(RecordingDialog::default());
        let store = Arc::new(
            TraktStore::new(pool, api.clone(), SyncConfig::default())
                .with_notifications(dialog.clone(), Arc::new(NotificationThrottle::default())),
        );
        api.fail_next_submit(MetadataError::RateLimited { provider: "trakt" });

        let err = store.update(&shawshank(), SyncAction::Watchlist).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(store.queue().is_empty().await.unwrap());
        let levels: Vec<_> = dialog.with(|d| d.notifications.iter().map(|n| n.level).collect());
        assert_eq!(levels, vec![NotificationLevel::Error]);
    }

    #[tokio::test]
    async fn local_mirror_serves_tables_after_restart() {
        let api = Arc::new(FakeTrakt::default());
        partial_movie_account(&api);
        let (pool, store) = store_with(api).await;
        store.ensure_loaded(Group::Movies, SyncCategory::Progress).await.unwrap();

        let offline = Arc::new(FakeTrakt::default());
        offline.with(|s| s.signed_out = true);
        let restarted = TraktStore::new(pool, offline, SyncConfig::default());
        let entry = restarted.progress(&shawshank()).await.unwrap().unwrap();
        assert!((entry.progress - 0.42).abs() < 1e-9);
    }
}
