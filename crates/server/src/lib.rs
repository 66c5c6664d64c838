pub mod actions;
pub mod bridge;
pub mod config;
pub mod error;
pub mod routes;
pub mod sessions;
pub mod settings;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use cinemeld_cache::{Cache, CacheConfig, CacheError, RetryQueue};
use cinemeld_core::concurrency::{AbortFlag, WorkerPool};
use cinemeld_core::host::Settings;
use cinemeld_core::notify::NotificationThrottle;
use cinemeld_menu::{MenuConfig, MenuOrchestrator};
use cinemeld_metadata::aggregator::{AggregatorConfig, MetaAggregator};
use cinemeld_metadata::fanart::FanartClient;
use cinemeld_metadata::imdb::ImdbClient;
use cinemeld_metadata::meta_cache::MetaCache;
use cinemeld_metadata::tmdb::TmdbClient;
use cinemeld_metadata::trakt::TraktClient;
use cinemeld_metadata::trakt::auth::{SettingsCredentials, TraktAuth};
use cinemeld_sync::{SyncConfig, TraktStore};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::config::ServerConfig;
use crate::sessions::Sessions;
use crate::settings::{DbSettings, StringTable};
use crate::state::{AppState, ServerEvent};

/// Same error kind at most once per window.
const NOTICE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Wire providers, caches and stores over an opened database.
pub async fn build_state(config: &ServerConfig, db: SqlitePool) -> Result<AppState, CacheError> {
    let abort = AbortFlag::new();
    let (events, _) = broadcast::channel::<ServerEvent>(256);
    let bridge = Arc::new(Bridge::new(events, config.reply_timeout, abort.clone()));
    let settings: Arc<dyn Settings> = Arc::new(DbSettings::new(db.clone()));
    let host = bridge.host(settings.clone(), Arc::new(StringTable::default()));
    let cache = Arc::new(Cache::open(db.clone(), CacheConfig::default()).await?);
    let workers = config
        .concurrency
        .map(WorkerPool::new)
        .unwrap_or_else(WorkerPool::from_device);

    let imdb = Arc::new(ImdbClient::with_base(&config.imdb_base).with_cache(cache.clone()));
    let mut aggregator = MetaAggregator::new(
        AggregatorConfig::default(),
        MetaCache::new(db.clone()),
        workers,
        abort.clone(),
    )
    .with_provider(imdb.clone());

    let tmdb = config
        .tmdb_key
        .clone()
        .map(|key| Arc::new(TmdbClient::with_base(&config.tmdb_base, key).with_cache(cache.clone())));
    if let Some(tmdb) = &tmdb {
        aggregator = aggregator.with_provider(tmdb.clone());
    }
    if let Some(key) = &config.fanart_key {
        let fanart = FanartClient::with_base(&config.fanart_base, key.clone()).with_cache(cache.clone());
        aggregator = aggregator.with_provider(Arc::new(fanart));
    }

    let mut trakt = None;
    let mut trakt_auth = None;
    if let Some((id, secret)) = config.trakt_credentials() {
        let credentials = Arc::new(SettingsCredentials::new(settings.clone()));
        let auth = Arc::new(TraktAuth::new(&config.trakt_base, id, secret, credentials));
        let client = Arc::new(TraktClient::new(&config.trakt_base, auth.clone()));
        aggregator = aggregator.with_provider(client.clone());
        let throttle = Arc::new(NotificationThrottle::new(NOTICE_WINDOW));
        let store = TraktStore::new(db.clone(), client, SyncConfig::default())
            .with_retry_queue(RetryQueue::new(db.clone()))
            .with_notifications(host.dialog.clone(), throttle);
        trakt = Some(Arc::new(store));
        trakt_auth = Some(auth);
    } else {
        info!("trakt credentials not set; account features disabled");
    }

    let aggregator = Arc::new(aggregator);
    let mut menu = MenuOrchestrator::new(MenuConfig::from_settings(settings.as_ref()).await, aggregator.clone())
        .with_imdb(imdb);
    if let Some(tmdb) = tmdb {
        menu = menu.with_tmdb(tmdb);
    }
    if let Some(store) = &trakt {
        menu = menu.with_trakt(store.clone());
    }

    Ok(AppState {
        db,
        sessions: Arc::new(Sessions::new(bridge.clone(), abort.clone())),
        bridge,
        host,
        cache,
        aggregator,
        menu: Arc::new(menu),
        trakt,
        trakt_auth,
        abort,
    })
}

/// Heartbeat, cache purge and retry-queue draining. Tasks end with the
/// abort flag.
pub fn spawn_background(state: &AppState) {
    {
        let bridge = state.bridge.clone();
        let abort = state.abort.clone();
        tokio::spawn(async move {
            let mut seq = 0u64;
            loop {
                tokio::select! {
                    _ = abort.aborted() => break,
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                }
                bridge.publish(ServerEvent::Heartbeat { seq });
                seq += 1;
            }
        });
    }

    {
        let cache = state.cache.clone();
        let abort = state.abort.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = abort.aborted() => break,
                    _ = tokio::time::sleep(Duration::from_secs(60 * 60)) => {}
                }
                match cache.purge().await {
                    Ok(purged) => info!(purged, "cache purged"),
                    Err(e) => warn!(error = %e, "cache purge failed"),
                }
            }
        });
    }

    if let Some(store) = state.trakt.clone() {
        let abort = state.abort.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = abort.aborted() => break,
                    _ = tokio::time::sleep(Duration::from_secs(5 * 60)) => {}
                }
                // Unforced: the store rate-limits its own drains.
                if let Err(e) = store.retry_pending(false).await {
                    warn!(error = %e, "retry queue drain failed");
                }
            }
        });
    }
}
