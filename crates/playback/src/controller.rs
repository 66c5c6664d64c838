//! Per-playback state machine.
//!
//! Host player callbacks arrive through [`PlaybackController::handle_event`]
//! and a monitor calls [`PlaybackController::tick`] about once a second.
//! Neither returns errors: failures are logged and the session carries on.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use cinemeld_core::host::{
    Artwork, BingeChoice, BingeDialogStyle, BingePrompt, Host, Notification, PlayItem, PlayerEvent, property,
};
use cinemeld_core::types::{ItemSeed, MediaKind};
use cinemeld_sync::{ScrobbleAction, SyncAction, SyncError, TraktStore};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::audio::select_audio;
use crate::binge::{BingeEngine, BingeStep};
use crate::buffer::{BufferMonitor, BufferSample};
use crate::chapters::{self, SkipWindow};
use crate::scrobbler::Scrobbler;
use crate::subtitle::{SubtitleSelector, SubtitleSource};
use crate::{PlaybackConfig, PlaybackError, ResumePolicy};

/// Stored progress outside this range never offers a resume.
const RESUME_RANGE: (f64, f64) = (0.02, 0.98);
const START_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    PlayRequested,
    Loading,
    Playing,
    Paused,
    Stopped,
    Ended,
}

impl PlaybackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Ended)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PlayRequested => "play_requested",
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Ended => "ended",
        }
    }
}

/// What to play and what it is.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub url: String,
    pub seed: ItemSeed,
    pub title: String,
    /// Spoken languages of the production, most important first.
    pub original_languages: Vec<String>,
    pub artwork: Artwork,
    /// This playback continues a binge.
    pub from_binge: bool,
}

impl PlaybackRequest {
    pub fn new(url: impl Into<String>, seed: ItemSeed) -> Self {
        Self {
            url: url.into(),
            title: seed.title.clone().unwrap_or_default(),
            seed,
            original_languages: Vec::new(),
            artwork: Artwork::new(),
            from_binge: false,
        }
    }

    fn play_item(&self) -> PlayItem {
        let ids = match (&self.seed.show_ids, self.seed.ids.is_empty()) {
            (Some(show), true) => show.clone(),
            _ => self.seed.ids.clone(),
        };
        PlayItem {
            label: self.title.clone(),
            kind: Some(self.seed.kind),
            ids,
            season: self.seed.season,
            episode: self.seed.episode,
            artwork: self.artwork.clone(),
        }
    }
}

struct Session {
    state: PlaybackState,
    duration: f64,
    /// Last position seen while playing.
    time: f64,
    started: bool,
    watched: bool,
    skips: Vec<SkipWindow>,
    offered: HashSet<usize>,
    binge: BingeEngine,
    buffer: BufferMonitor,
}

pub struct PlaybackController {
    host: Host,
    config: PlaybackConfig,
    request: PlaybackRequest,
    store: Option<Arc<TraktStore>>,
    scrobbler: Scrobbler,
    subtitle_source: Option<Arc<dyn SubtitleSource>>,
    subtitles: tokio::sync::Mutex<Option<SubtitleSelector>>,
    session: Mutex<Session>,
}

fn clock(seconds: f64) -> String {
    let s = seconds.max(0.0) as u64;
    if s >= 3600 {
        format!("{}:{:02}:{:02}", s / 3600, s / 60 % 60, s % 60)
    } else {
        format!("{}:{:02}", s / 60, s % 60)
    }
}

impl PlaybackController {
    pub fn new(
        host: Host,
        config: PlaybackConfig,
        store: Option<Arc<TraktStore>>,
        request: PlaybackRequest,
    ) -> Self {
        let scrobbler = Scrobbler::new(store.clone(), request.seed.clone(), config.scrobble_interval);
        let session = Session {
            state: PlaybackState::Idle,
            duration: 0.0,
            time: 0.0,
            started: false,
            watched: false,
            skips: Vec::new(),
            offered: HashSet::new(),
            binge: BingeEngine::new(&config),
            buffer: BufferMonitor::new(config.buffer_notice_interval),
        };
        Self {
            host,
            config,
            request,
            store,
            scrobbler,
            subtitle_source: None,
            subtitles: tokio::sync::Mutex::new(None),
            session: Mutex::new(session),
        }
    }

    pub fn with_subtitle_source(mut self, source: Arc<dyn SubtitleSource>) -> Self {
        self.subtitle_source = Some(source);
        self
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> PlaybackState {
        self.session().state
    }

    pub fn request(&self) -> &PlaybackRequest {
        &self.request
    }

    fn transition(&self, to: PlaybackState) -> bool {
        let mut session = self.session();
        if session.state.is_terminal() {
            return false;
        }
        if session.state != to {
            debug!(item = %self.request.seed.key(), from = session.state.as_str(), to = to.as_str(), "playback state");
            session.state = to;
        }
        true
    }

    /// Ask the player to play, retrying failed or stalled loads.
    pub async fn start(&self) -> Result<(), PlaybackError> {
        self.transition(PlaybackState::PlayRequested);
        let dialog = &self.host.dialog;
        let window = dialog.progress_open(&self.request.title, false).await;
        let result = self.load(window).await;

        dialog.progress_close(window).await;
        match &result {
            Ok(()) => {}
            Err(PlaybackError::Cancelled) => {
                self.session().state = PlaybackState::Stopped;
                info!(item = %self.request.seed.key(), "playback cancelled");
            }
            Err(e) => {
                self.session().state = PlaybackState::Stopped;
                error!(item = %self.request.seed.key(), error = %e, "playback failed");
                dialog
                    .notify(Notification::error("Playback failed", format!("{} could not be played", self.request.title)))
                    .await;
            }
        }
        result
    }

    async fn load(&self, window: u64) -> Result<(), PlaybackError> {
        let item = self.request.play_item();
        let attempts = self.config.retries + 1;
        for attempt in 1..=attempts {
            if self.cancelled(window).await {
                return Err(PlaybackError::Cancelled);
            }
            match self.host.player.play(&self.request.url, &item).await {
                Ok(()) => {
                    self.transition(PlaybackState::Loading);
                    if self.wait_for_start(window).await? {
                        info!(item = %self.request.seed.key(), attempt, "playback started");
                        return Ok(());
                    }
                    warn!(item = %self.request.seed.key(), attempt, "player did not start in time");
                }
                Err(e) => warn!(item = %self.request.seed.key(), attempt, error = %e, "player failed to load"),
            }
            if attempt < attempts {
                self.host.player.stop().await;
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }
        Err(PlaybackError::LoadFailed { attempts })
    }

    async fn cancelled(&self, window: u64) -> bool {
        self.host.process.abort_requested().await || self.host.dialog.progress_cancelled(window).await
    }

    async fn wait_for_start(&self, window: u64) -> Result<bool, PlaybackError> {
        let deadline = tokio::time::Instant::now() + self.config.load_timeout;
        loop {
            if self.host.player.is_playing().await {
                return Ok(true);
            }
            if self.state().is_terminal() {
                return Ok(false);
            }
            if self.cancelled(window).await {
                return Err(PlaybackError::Cancelled);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(START_POLL.min(deadline - now)).await;
        }
    }

    /// Host player callback.
    pub async fn handle_event(&self, event: PlayerEvent) {
        debug!(item = %self.request.seed.key(), event = ?event, "player event");
        match event {
            PlayerEvent::Started => {
                self.transition(PlaybackState::Loading);
            }
            PlayerEvent::AvStarted => {
                let first = {
                    let mut session = self.session();
                    !std::mem::replace(&mut session.started, true)
                };
                if first {
                    self.on_playing().await;
                }
                self.transition(PlaybackState::Playing);
            }
            PlayerEvent::Paused => {
                if self.transition(PlaybackState::Paused) {
                    let fraction = self.fraction().await;
                    self.scrobble(ScrobbleAction::Pause, fraction).await;
                }
            }
            PlayerEvent::Resumed => {
                if self.transition(PlaybackState::Playing) {
                    self.scrobbler.resumed().await;
                    let fraction = self.fraction().await;
                    self.scrobble(ScrobbleAction::Start, fraction).await;
                }
            }
            PlayerEvent::Seek { time } => {
                self.session().time = time;
                self.scrobbler.resumed().await;
            }
            PlayerEvent::Stopped => self.finish(PlaybackState::Stopped).await,
            PlayerEvent::Ended => self.finish(PlaybackState::Ended).await,
            PlayerEvent::Error { message } => {
                warn!(item = %self.request.seed.key(), message = message.as_deref().unwrap_or(""), "player error");
                if self.state() == PlaybackState::Playing || self.state() == PlaybackState::Paused {
                    self.finish(PlaybackState::Stopped).await;
                } else {
                    self.session().state = PlaybackState::Stopped;
                }
            }
            PlayerEvent::AvChange => self.subtitle_stream_changed().await,
        }
    }

    async fn fraction(&self) -> f64 {
        let time = self.host.player.time().await;
        let mut session = self.session();
        if time > 0.0 {
            session.time = time;
        }
        if session.duration <= 0.0 {
            return 0.0;
        }
        (session.time / session.duration).clamp(0.0, 1.0)
    }

    async fn on_playing(&self) {
        let player = &self.host.player;
        let duration = player.total_time().await;
        self.session().duration = duration;

        self.resume(duration).await;
        self.select_streams().await;

        if self.config.chapter_skip && duration > 0.0 {
            let chapters = chapters::classify(&player.chapters().await, duration);
            let skips = chapters::skip_plan(&chapters);
            debug!(item = %self.request.seed.key(), chapters = chapters.len(), skips = skips.len(), "chapters classified");
            let mut session = self.session();
            session.binge.set_outro(chapters::outro_start(&chapters));
            session.skips = skips;
        }

        self.scrobbler.resumed().await;
        let fraction = self.fraction().await;
        self.scrobble(ScrobbleAction::Start, fraction).await;
    }

    async fn resume(&self, duration: f64) {
        let stored = match self.scrobbler.load_stored().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(item = %self.request.seed.key(), error = %e, "stored progress unavailable");
                return;
            }
        };
        if duration <= 0.0 || stored <= RESUME_RANGE.0 || stored >= RESUME_RANGE.1 {
            return;
        }
        let target = (stored * duration - self.config.resume_rewind).max(0.0);
        let player = &self.host.player;
        let resume = match self.config.resume {
            ResumePolicy::Never => false,
            ResumePolicy::Always => true,
            ResumePolicy::Prompt => {
                player.pause().await;
                let yes = self
                    .host
                    .dialog
                    .confirm("Resume", &format!("Resume from {}?", clock(target)))
                    .await;
                if !yes {
                    player.pause().await;
                }
                yes
            }
        };
        if resume {
            player.seek_time(target).await;
            if self.config.resume == ResumePolicy::Prompt {
                player.pause().await;
            }
            {
                let mut session = self.session();
                session.time = target;
                session.binge.started_at(target);
            }
            info!(item = %self.request.seed.key(), target, "resumed");
        }
    }

    async fn select_streams(&self) {
        let player = &self.host.player;
        let tracks = player.audio_streams().await;
        if let Some(index) = select_audio(
            &tracks,
            &self.config.audio_languages,
            &self.request.original_languages,
            self.config.audio_policy,
        ) {
            player.set_audio_stream(index).await;
        }

        if !self.config.subtitles {
            return;
        }
        let mut selector = SubtitleSelector::new(
            player.clone(),
            self.host.dialog.clone(),
            &self.config.subtitle_languages,
            self.config.subtitle_dir.clone(),
        );
        if let Some(source) = &self.subtitle_source {
            selector = selector.with_source(source.clone());
        }
        if let Err(e) = selector.preload().await {
            warn!(error = %e, "subtitle placeholders not loaded");
        }
        let file = player.property(property::FILE_NAME).await.unwrap_or_default();
        if let Err(e) = selector.select(&self.request.seed, self.config.subtitle_mode, &file).await {
            warn!(item = %self.request.seed.key(), error = %e, "subtitle selection failed");
        }
        *self.subtitles.lock().await = Some(selector);
    }

    async fn subtitle_stream_changed(&self) {
        let guard = self.subtitles.lock().await;
        let Some(selector) = guard.as_ref() else {
            return;
        };
        let file = self.host.player.property(property::FILE_NAME).await.unwrap_or_default();
        if let Err(e) = selector.stream_changed(&self.request.seed, &file).await {
            warn!(error = %e, "subtitle change failed");
        }
    }

    async fn scrobble(&self, action: ScrobbleAction, fraction: f64) {
        if let Err(e) = self.scrobbler.report(action, fraction).await {
            debug!(action = action.as_str(), error = %e, "scrobble not sent");
        }
    }

    /// Periodic monitor step while playing.
    pub async fn tick(&self) {
        if self.state() != PlaybackState::Playing {
            return;
        }
        let player = &self.host.player;
        let time = player.time().await;
        let duration = {
            let mut session = self.session();
            session.time = time;
            session.duration
        };
        if duration <= 0.0 {
            return;
        }
        let fraction = (time / duration).clamp(0.0, 1.0);

        if fraction >= self.config.watched_fraction {
            self.mark_watched().await;
        }
        if let Err(e) = self.scrobbler.playing(fraction).await {
            debug!(error = %e, "periodic scrobble not sent");
        }
        self.check_buffer().await;
        self.offer_skip(time).await;
        self.advance_binge(time, duration).await;
    }

    async fn check_buffer(&self) {
        let player = &self.host.player;
        let number = |v: Option<String>| v.and_then(|v| v.trim().parse::<f64>().ok());
        let Some(cache_percent) = number(player.property(property::CACHE_PERCENT).await) else {
            return;
        };
        let sample = BufferSample {
            cache_percent,
            playback_percent: number(player.property(property::PLAYBACK_PERCENT).await).unwrap_or_default(),
            network_speed: number(player.property(property::NETWORK_SPEED).await),
            read_speed: number(player.property(property::READ_SPEED).await),
        };
        let notice = self.session().buffer.observe(sample, Instant::now());
        if let Some(notice) = notice {
            info!(item = %self.request.seed.key(), stalled = ?notice.stalled_for, "buffering");
            self.host.dialog.notify(Notification::info("Buffering", notice.message())).await;
        }
    }

    async fn offer_skip(&self, time: f64) {
        let window = {
            let mut session = self.session();
            let found = session
                .skips
                .iter()
                .find(|w| w.contains(time) && !session.offered.contains(&w.chapter))
                .cloned();
            if let Some(w) = &found {
                session.offered.insert(w.chapter);
            }
            found
        };
        let Some(window) = window else {
            return;
        };
        let visible = Duration::from_secs_f64((window.until - time).max(0.0));
        if self.host.dialog.skip_prompt(window.class.label(), visible).await {
            info!(item = %self.request.seed.key(), chapter = window.chapter, target = window.target, "chapter skipped");
            self.host.player.seek_time(window.target).await;
        }
    }

    async fn advance_binge(&self, time: f64, duration: f64) {
        if !self.config.binge || self.request.seed.kind != MediaKind::Episode {
            return;
        }
        let Some(next) = self.request.seed.next_episode() else {
            return;
        };
        let steps = self.session().binge.due(time, duration);
        for step in steps {
            match step {
                BingeStep::PreScrape => {
                    let mut params = next.params();
                    params.insert("prescrape".into(), "true".into());
                    info!(item = %next.key(), "pre-scraping next episode");
                    if let Err(e) = self.host.process.execute_plugin("scrape", &params).await {
                        warn!(item = %next.key(), error = %e, "pre-scrape failed");
                    }
                }
                BingeStep::Prompt => self.prompt_next(&next, duration - time).await,
            }
        }
    }

    async fn prompt_next(&self, next: &ItemSeed, remaining: f64) {
        let choice = match self.config.binge_style {
            BingeDialogStyle::None => BingeChoice::Continue,
            style => {
                let prompt = BingePrompt {
                    style,
                    title: self.request.title.clone(),
                    next_label: format!(
                        "S{:02}E{:02}",
                        next.season.unwrap_or_default(),
                        next.episode.unwrap_or_default()
                    ),
                    remaining: Duration::from_secs_f64(remaining.max(0.0)),
                };
                self.host.dialog.binge_prompt(&prompt).await
            }
        };
        self.session().binge.decide(choice);
        info!(item = %self.request.seed.key(), choice = ?choice, "next episode prompt answered");
        if choice == BingeChoice::Continue && self.config.binge_interrupt {
            self.host.player.stop().await;
            self.finish(PlaybackState::Stopped).await;
        }
    }

    async fn mark_watched(&self) {
        {
            let mut session = self.session();
            if std::mem::replace(&mut session.watched, true) {
                return;
            }
        }
        let seed = &self.request.seed;
        info!(item = %seed.key(), "watched");
        if let Some(store) = &self.store {
            let now = Utc::now();
            match store.update(seed, SyncAction::Watched { at: Some(now) }).await {
                Ok(outcome) => debug!(item = %seed.key(), outcome = ?outcome, "history updated"),
                Err(SyncError::NotAuthenticated) => {
                    if let Err(e) = store.local().record_watched(seed, now).await {
                        warn!(item = %seed.key(), error = %e, "local history not updated");
                    }
                }
                Err(e) => warn!(item = %seed.key(), error = %e, "history not updated"),
            }
        }
        if self.config.library_add {
            let params = json!({ "item": seed, "title": self.request.title });
            if let Err(e) = self.host.process.execute_json("library.add", params).await {
                warn!(item = %seed.key(), error = %e, "library add failed");
            }
        }
    }

    async fn finish(&self, end: PlaybackState) {
        let (time, duration, started) = {
            let mut session = self.session();
            if session.state.is_terminal() {
                return;
            }
            session.state = end;
            (session.time, session.duration, session.started)
        };
        if !started {
            return;
        }
        let fraction = match (end, duration > 0.0) {
            (PlaybackState::Ended, _) => 1.0,
            (_, true) => (time / duration).clamp(0.0, 1.0),
            _ => 0.0,
        };
        if fraction >= self.config.watched_fraction {
            self.mark_watched().await;
        }
        let (watched, continues, awaiting) = {
            let session = self.session();
            (session.watched, session.binge.continues(), session.binge.awaiting())
        };
        // A partial stop must not clear the remote resume point.
        let action = if watched { ScrobbleAction::Stop } else { ScrobbleAction::Pause };
        self.scrobble(action, fraction).await;
        info!(item = %self.request.seed.key(), state = end.as_str(), fraction, watched, "playback finished");

        if continues {
            self.play_next().await;
        } else if watched && self.config.rating_prompt && !self.request.from_binge && !awaiting {
            self.prompt_rating().await;
        }
    }

    async fn play_next(&self) {
        let Some(next) = self.request.seed.next_episode() else {
            return;
        };
        let mut params = next.params();
        params.insert("binge".into(), "true".into());
        info!(item = %next.key(), "continuing with next episode");
        if let Err(e) = self.host.process.execute_plugin("play", &params).await {
            warn!(item = %next.key(), error = %e, "next episode not started");
        }
    }

    async fn prompt_rating(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let options: Vec<String> = (1..=10).rev().map(|r| r.to_string()).collect();
        let title = format!("Rate {}", self.request.title);
        let Some(choice) = self.host.dialog.select(&title, &options, None).await else {
            return;
        };
        let rating = 10 - choice as u8;
        if let Err(e) = store.update(&self.request.seed, SyncAction::Rate(rating)).await {
            warn!(item = %self.request.seed.key(), error = %e, "rating not sent");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinemeld_core::host::ChapterMarker;
    use cinemeld_core::testing::FakeHost;
    use cinemeld_core::types::IdBundle;
    use cinemeld_sync::SyncConfig;
    use cinemeld_sync::testing::FakeTrakt;

    fn quick_config() -> PlaybackConfig {
        PlaybackConfig {
            retry_delay: Duration::ZERO,
            load_timeout: Duration::ZERO,
            ..Default::default()
        }
    }

    fn movie() -> PlaybackRequest {
        let seed = ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt0111161")).with_title("The Shawshank Redemption", Some(1994));
        PlaybackRequest::new("https://cdn.example/movie.mkv", seed)
    }

    fn episode() -> PlaybackRequest {
        let mut seed = ItemSeed::episode_of(IdBundle::trakt(1390), 1, 1);
        seed.title = Some("Winter Is Coming".into());
        PlaybackRequest::new("https://cdn.example/s01e01.mkv", seed)
    }

    async fn account() -> (Arc<FakeTrakt>, Arc<TraktStore>) {
        let api = Arc::new(FakeTrakt::default());
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        let store = Arc::new(TraktStore::new(pool, api.clone(), SyncConfig::default()));
        (api, store)
    }

    #[tokio::test]
    async fn load_failures_are_retried() {
        let fake = FakeHost::new();
        fake.player.with(|s| s.play_failures = 2);
        let controller = PlaybackController::new(fake.host(), quick_config(), None, movie());

        controller.start().await.unwrap();
        let plays = fake.player.calls().iter().filter(|c| c.starts_with("play:")).count();
        assert_eq!(plays, 3);
        assert_eq!(controller.state(), PlaybackState::Loading);
        assert_eq!(fake.dialog.with(|s| s.progress_closed.len()), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_notify_once() {
        let fake = FakeHost::new();
        fake.player.with(|s| s.start_on_play = false);
        let controller = PlaybackController::new(fake.host(), quick_config(), None, movie());

        let err = controller.start().await.unwrap_err();
        assert!(matches!(err, PlaybackError::LoadFailed { attempts: 3 }));
        assert_eq!(controller.state(), PlaybackState::Stopped);
        assert_eq!(fake.dialog.with(|s| s.notifications.len()), 1);
        assert_eq!(fake.dialog.with(|s| s.progress_closed.len()), 1);
    }

    #[tokio::test]
    async fn user_cancel_stops_without_notice() {
        let fake = FakeHost::new();
        fake.dialog.with(|s| s.progress_cancelled = true);
        let controller = PlaybackController::new(fake.host(), quick_config(), None, movie());
        assert!(matches!(controller.start().await, Err(PlaybackError::Cancelled)));
        assert!(fake.player.calls().is_empty());
        assert!(fake.dialog.with(|s| s.notifications.is_empty()));
    }

    #[tokio::test]
    async fn resume_prompt_seeks_back_from_the_stored_point() {
        let fake = FakeHost::new();
        fake.player.set_position(0.0, 2000.0);
        fake.dialog.with(|s| s.confirm_answer = true);
        let (_api, store) = account().await;
        let request = movie();
        store.local().record_progress(&request.seed, 0.5).await.unwrap();
        let controller = PlaybackController::new(fake.host(), quick_config(), Some(store), request);

        controller.handle_event(PlayerEvent::AvStarted).await;
        assert_eq!(fake.dialog.with(|s| s.confirms.len()), 1);
        assert_eq!(fake.player.with(|s| s.seeks.clone()), vec![990.0]);
        assert!(!fake.player.with(|s| s.paused));
        assert_eq!(controller.state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn no_resume_prompt_near_either_end() {
        for stored in [0.01, 0.99] {
            let fake = FakeHost::new();
            fake.player.set_position(0.0, 2000.0);
            let (_api, store) = account().await;
            let request = movie();
            store.local().record_progress(&request.seed, stored).await.unwrap();
            let controller = PlaybackController::new(fake.host(), quick_config(), Some(store), request);

            controller.handle_event(PlayerEvent::AvStarted).await;
            assert!(fake.dialog.with(|s| s.confirms.is_empty()));
            assert!(fake.player.with(|s| s.seeks.is_empty()));
        }
    }

    #[tokio::test]
    async fn watched_is_recorded_once() {
        let fake = FakeHost::new();
        fake.player.with(|s| s.playing = true);
        fake.player.set_position(0.0, 2000.0);
        let (api, store) = account().await;
        let controller = PlaybackController::new(fake.host(), quick_config(), Some(store), movie());
        controller.handle_event(PlayerEvent::AvStarted).await;

        fake.player.set_position(1500.0, 2000.0);
        controller.tick().await;
        assert!(api.submitted().iter().all(|m| m.path != "sync/history"));

        for t in [1600.0, 1700.0, 1800.0] {
            fake.player.set_position(t, 2000.0);
            controller.tick().await;
        }
        controller.handle_event(PlayerEvent::Stopped).await;
        controller.handle_event(PlayerEvent::Stopped).await;

        let paths: Vec<String> = api.submitted().into_iter().map(|m| m.path).collect();
        assert_eq!(paths.iter().filter(|p| *p == "sync/history").count(), 1);
        assert_eq!(paths.last().map(String::as_str), Some("scrobble/stop"));
        assert_eq!(controller.state(), PlaybackState::Stopped);
    }

    #[tokio::test]
    async fn partial_stop_reports_a_pause() {
        let fake = FakeHost::new();
        fake.player.set_position(0.0, 2000.0);
        let (api, store) = account().await;
        let controller = PlaybackController::new(fake.host(), quick_config(), Some(store), movie());
        controller.handle_event(PlayerEvent::AvStarted).await;
        fake.player.set_position(600.0, 2000.0);
        controller.tick().await;
        controller.handle_event(PlayerEvent::Stopped).await;

        let paths: Vec<String> = api.submitted().into_iter().map(|m| m.path).collect();
        assert_eq!(paths.last().map(String::as_str), Some("scrobble/pause"));
        assert!(!paths.contains(&"sync/history".to_string()));
    }

    #[tokio::test]
    async fn intro_skip_is_offered_inside_the_chapter() {
        let fake = FakeHost::new();
        fake.player.set_position(0.0, 2400.0);
        fake.player.with(|s| {
            s.chapters = [0.0, 3.0, 5.0, 95.0, 100.0]
                .iter()
                .map(|p| ChapterMarker { percent: *p, name: None })
                .collect();
        });
        fake.dialog.with(|s| s.skip_answer = true);
        let controller = PlaybackController::new(fake.host(), quick_config(), None, episode());
        controller.handle_event(PlayerEvent::AvStarted).await;

        fake.player.set_position(60.0, 2400.0);
        controller.tick().await;
        assert!(fake.dialog.with(|s| s.skip_prompts.is_empty()));

        fake.player.set_position(80.0, 2400.0);
        controller.tick().await;
        assert_eq!(fake.dialog.with(|s| s.skip_prompts.clone()), vec!["Skip Intro"]);
        assert_eq!(fake.player.with(|s| s.seeks.clone()), vec![117.0]);

        controller.tick().await;
        fake.player.set_position(2300.0, 2400.0);
        controller.tick().await;
        assert_eq!(fake.dialog.with(|s| s.skip_prompts.len()), 1);
    }

    #[tokio::test]
    async fn binge_prescrapes_prompts_and_continues() {
        let fake = FakeHost::new();
        fake.player.set_position(0.0, 3600.0);
        fake.dialog.with(|s| s.binge_answer = Some(BingeChoice::Continue));
        let controller = PlaybackController::new(fake.host(), quick_config(), None, episode());
        controller.handle_event(PlayerEvent::AvStarted).await;

        fake.player.set_position(2990.0, 3600.0);
        controller.tick().await;
        assert!(fake.process.plugin_calls().is_empty());

        for t in [3000.0, 3010.0, 3400.0] {
            fake.player.set_position(t, 3600.0);
            controller.tick().await;
        }
        let calls = fake.process.plugin_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "scrape");
        assert_eq!(calls[0].1["episode"], "2");
        assert_eq!(calls[0].1["prescrape"], "true");
        assert!(fake.dialog.with(|s| s.binge_prompts.is_empty()));

        fake.player.set_position(3480.0, 3600.0);
        controller.tick().await;
        let prompts = fake.dialog.with(|s| s.binge_prompts.clone());
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].style, BingeDialogStyle::Overlay);
        assert_eq!(prompts[0].next_label, "S01E02");

        assert!(fake.player.calls().contains(&"stop".to_string()));
        assert_eq!(controller.state(), PlaybackState::Stopped);
        let calls = fake.process.plugin_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "play");
        assert_eq!(calls[1].1["season"], "1");
        assert_eq!(calls[1].1["episode"], "2");
        assert_eq!(calls[1].1["show_trakt"], "1390");
    }

    #[tokio::test]
    async fn resumed_episode_waits_before_prescraping() {
        let fake = FakeHost::new();
        fake.player.set_position(0.0, 3600.0);
        fake.dialog.with(|s| s.confirm_answer = true);
        let (_api, store) = account().await;
        let request = episode();
        store.local().record_progress(&request.seed, 0.8).await.unwrap();
        let controller = PlaybackController::new(fake.host(), quick_config(), Some(store), request);
        controller.handle_event(PlayerEvent::AvStarted).await;
        assert_eq!(fake.player.with(|s| s.seeks.len()), 1);

        fake.player.set_position(3010.0, 3600.0);
        controller.tick().await;
        assert!(fake.process.plugin_calls().is_empty());

        fake.player.set_position(3200.0, 3600.0);
        controller.tick().await;
        let calls = fake.process.plugin_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["prescrape"], "true");
    }

    #[tokio::test]
    async fn cancelled_binge_leaves_playback_running() {
        let fake = FakeHost::new();
        fake.player.set_position(0.0, 3600.0);
        let controller = PlaybackController::new(fake.host(), quick_config(), None, episode());
        controller.handle_event(PlayerEvent::AvStarted).await;
        fake.player.set_position(3500.0, 3600.0);
        controller.tick().await;

        assert_eq!(fake.dialog.with(|s| s.binge_prompts.len()), 1);
        assert_eq!(controller.state(), PlaybackState::Playing);
        controller.handle_event(PlayerEvent::Ended).await;
        assert!(fake.process.plugin_calls().iter().all(|(action, _)| action != "play"));
    }

    #[tokio::test]
    async fn rating_prompt_after_a_watched_movie() {
        let fake = FakeHost::new();
        fake.player.set_position(0.0, 2000.0);
        fake.dialog.with(|s| s.select_answer = Some(1));
        let (api, store) = account().await;
        let config = PlaybackConfig {
            rating_prompt: true,
            library_add: true,
            ..quick_config()
        };
        let controller = PlaybackController::new(fake.host(), config, Some(store), movie());
        controller.handle_event(PlayerEvent::AvStarted).await;
        controller.handle_event(PlayerEvent::Ended).await;

        let rating = api.submitted().into_iter().find(|m| m.path == "sync/ratings").unwrap();
        assert_eq!(rating.body.unwrap()["movies"][0]["rating"], 9);
        let json_calls = fake.process.json_calls.lock().unwrap().clone();
        assert_eq!(json_calls.len(), 1);
        assert_eq!(json_calls[0].0, "library.add");
    }
}
