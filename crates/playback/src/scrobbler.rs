//! Progress reports for one playback session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cinemeld_core::types::ItemSeed;
use cinemeld_sync::{ScrobbleAction, TraktStore, UpdateOutcome};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::PlaybackError;

/// Playback time after a resume during which small progress values are
/// held back.
const SETTLE: Duration = Duration::from_secs(5);
/// Progress below this is treated as not started.
const MIN_PROGRESS: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrobbleResult {
    Sent(UpdateOutcome),
    /// Held back so an older resume point is not overwritten.
    Suppressed,
    /// No account store is attached.
    Offline,
}

struct ScrobbleState {
    /// Last progress known to the store, as a fraction.
    stored: f64,
    resumed_at: Instant,
    last_report: Option<Instant>,
}

pub struct Scrobbler {
    store: Option<Arc<TraktStore>>,
    seed: ItemSeed,
    interval: Duration,
    // Held across the submit so events of one session stay ordered.
    state: Mutex<ScrobbleState>,
}

impl Scrobbler {
    pub fn new(store: Option<Arc<TraktStore>>, seed: ItemSeed, interval: Duration) -> Self {
        Self {
            store,
            seed,
            interval,
            state: Mutex::new(ScrobbleState {
                stored: 0.0,
                resumed_at: Instant::now(),
                last_report: None,
            }),
        }
    }

    pub fn seed(&self) -> &ItemSeed {
        &self.seed
    }

    /// Fetch the stored resume point: the account's when known, the local
    /// mirror's otherwise.
    pub async fn load_stored(&self) -> Result<f64, PlaybackError> {
        let Some(store) = &self.store else {
            return Ok(0.0);
        };
        let stored = match store.progress(&self.seed).await {
            Ok(Some(entry)) => entry.progress,
            Ok(None) => store.local().progress(&self.seed).await?,
            Err(e) => {
                debug!(item = %self.seed.key(), error = %e, "account progress unavailable, using local mirror");
                store.local().progress(&self.seed).await?
            }
        };
        self.state.lock().await.stored = stored;
        Ok(stored)
    }

    pub async fn stored(&self) -> f64 {
        self.state.lock().await.stored
    }

    pub async fn resumed(&self) {
        self.resumed_at(Instant::now()).await;
    }

    pub async fn resumed_at(&self, now: Instant) {
        self.state.lock().await.resumed_at = now;
    }

    pub async fn report(&self, action: ScrobbleAction, fraction: f64) -> Result<ScrobbleResult, PlaybackError> {
        self.report_at(action, fraction, Instant::now()).await
    }

    /// Periodic report while playing; sent at most once per interval.
    pub async fn playing(&self, fraction: f64) -> Result<ScrobbleResult, PlaybackError> {
        self.playing_at(fraction, Instant::now()).await
    }

    pub async fn playing_at(&self, fraction: f64, now: Instant) -> Result<ScrobbleResult, PlaybackError> {
        {
            let state = self.state.lock().await;
            if state.last_report.is_some_and(|at| now.duration_since(at) < self.interval) {
                return Ok(ScrobbleResult::Suppressed);
            }
        }
        self.report_at(ScrobbleAction::Start, fraction, now).await
    }

    pub async fn report_at(
        &self,
        action: ScrobbleAction,
        fraction: f64,
        now: Instant,
    ) -> Result<ScrobbleResult, PlaybackError> {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut state = self.state.lock().await;
        let settling = now.duration_since(state.resumed_at) < SETTLE;
        if settling && fraction < state.stored.max(MIN_PROGRESS) {
            debug!(
                item = %self.seed.key(),
                action = action.as_str(),
                fraction,
                stored = state.stored,
                "scrobble held back"
            );
            return Ok(ScrobbleResult::Suppressed);
        }
        let Some(store) = &self.store else {
            return Ok(ScrobbleResult::Offline);
        };
        state.last_report = Some(now);
        match store.scrobble(&self.seed, action, fraction).await {
            Ok(outcome) => {
                state.stored = fraction;
                debug!(item = %self.seed.key(), action = action.as_str(), fraction, "scrobbled");
                Ok(ScrobbleResult::Sent(outcome))
            }
            Err(e) => {
                warn!(item = %self.seed.key(), action = action.as_str(), error = %e, "scrobble failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinemeld_core::types::{IdBundle, MediaKind};
    use cinemeld_sync::SyncConfig;
    use cinemeld_sync::testing::FakeTrakt;

    async fn scrobbler(interval: Duration) -> (Arc<FakeTrakt>, Arc<TraktStore>, Scrobbler) {
        let api = Arc::new(FakeTrakt::default());
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        let store = Arc::new(TraktStore::new(pool, api.clone(), SyncConfig::default()));
        let seed = ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt0111161"));
        let scrobbler = Scrobbler::new(Some(store.clone()), seed, interval);
        (api, store, scrobbler)
    }

    #[tokio::test]
    async fn early_low_progress_is_held_back() {
        let (api, store, scrobbler) = scrobbler(Duration::from_secs(900)).await;
        store.local().record_progress(scrobbler.seed(), 0.42).await.unwrap();
        assert_eq!(scrobbler.load_stored().await.unwrap(), 0.42);

        let t0 = Instant::now();
        scrobbler.resumed_at(t0).await;
        let early = scrobbler
            .report_at(ScrobbleAction::Pause, 0.0, t0 + Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(early, ScrobbleResult::Suppressed);
        assert!(api.submitted().is_empty());

        // Past the resume point the update goes through at once.
        let ahead = scrobbler
            .report_at(ScrobbleAction::Pause, 0.43, t0 + Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(ahead, ScrobbleResult::Sent(UpdateOutcome::Applied));

        // After settling, even a lower value is reported.
        let later = scrobbler
            .report_at(ScrobbleAction::Stop, 0.1, t0 + Duration::from_secs(6))
            .await
            .unwrap();
        assert_eq!(later, ScrobbleResult::Sent(UpdateOutcome::Applied));
        let paths: Vec<_> = api.submitted().into_iter().map(|m| m.path).collect();
        assert_eq!(paths, vec!["scrobble/pause", "scrobble/stop"]);
    }

    #[tokio::test]
    async fn periodic_reports_respect_the_interval() {
        let (api, _store, scrobbler) = scrobbler(Duration::from_secs(60)).await;
        let t0 = Instant::now();
        scrobbler.resumed_at(t0).await;
        let at = |s: u64| t0 + Duration::from_secs(s);

        assert!(matches!(scrobbler.playing_at(0.1, at(10)).await.unwrap(), ScrobbleResult::Sent(_)));
        assert_eq!(scrobbler.playing_at(0.2, at(30)).await.unwrap(), ScrobbleResult::Suppressed);
        assert!(matches!(scrobbler.playing_at(0.3, at(75)).await.unwrap(), ScrobbleResult::Sent(_)));
        assert_eq!(api.submitted().len(), 2);
    }

    #[tokio::test]
    async fn without_an_account_nothing_is_sent() {
        let seed = ItemSeed::new(MediaKind::Movie, IdBundle::trakt(1));
        let scrobbler = Scrobbler::new(None, seed, Duration::from_secs(60));
        let result = scrobbler
            .report_at(ScrobbleAction::Pause, 0.5, Instant::now() + Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(result, ScrobbleResult::Offline);
    }
}
