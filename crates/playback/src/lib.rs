//! Playback coordination: the per-session state machine and the pieces it
//! drives (resume, stream selection, chapter skips, buffering notices,
//! scrobbling and next-episode handling).

pub mod audio;
pub mod binge;
pub mod buffer;
pub mod chapters;
pub mod controller;
pub mod scrobbler;
pub mod subtitle;

use std::path::PathBuf;
use std::time::Duration;

use cinemeld_core::error::{Classify, ErrorKind, HostError};
use cinemeld_core::host::{BingeDialogStyle, Settings};
use cinemeld_sync::SyncError;
use thiserror::Error;

pub use audio::AudioPolicy;
pub use controller::{PlaybackController, PlaybackRequest, PlaybackState};
pub use scrobbler::Scrobbler;
pub use subtitle::{SubtitleCandidate, SubtitleMode, SubtitleSource};

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("playback did not start after {attempts} attempts")]
    LoadFailed { attempts: u32 },
    #[error("playback cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for PlaybackError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Host(e) => e.kind(),
            Self::Sync(e) => e.kind(),
            Self::LoadFailed { .. } => ErrorKind::Host,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// What happens to a stored resume point when playback starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePolicy {
    Prompt,
    Always,
    Never,
}

impl ResumePolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "prompt" => Some(Self::Prompt),
            "always" => Some(Self::Always),
            "never" => Some(Self::Never),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub resume: ResumePolicy,
    /// Seconds replayed before the stored resume point.
    pub resume_rewind: f64,
    /// Fraction of the runtime after which the item counts as watched.
    pub watched_fraction: f64,
    /// Playback attempts after the first one.
    pub retries: u32,
    pub retry_delay: Duration,
    /// How long to wait for the player to report playback.
    pub load_timeout: Duration,
    pub audio_policy: AudioPolicy,
    pub audio_languages: Vec<String>,
    pub subtitles: bool,
    pub subtitle_mode: SubtitleMode,
    pub subtitle_languages: Vec<String>,
    /// Where downloaded and placeholder subtitle files are written.
    pub subtitle_dir: PathBuf,
    pub chapter_skip: bool,
    pub binge: bool,
    pub binge_style: BingeDialogStyle,
    /// Fraction of the runtime the next-episode prompt is shown for.
    pub binge_prompt_fraction: f64,
    /// Remaining time at which the next episode is scraped ahead.
    pub prescrape_window: f64,
    /// Minimum playback before the pre-scrape may start.
    pub prescrape_after: f64,
    /// Stop the current episode when the next one is chosen.
    pub binge_interrupt: bool,
    pub rating_prompt: bool,
    pub library_add: bool,
    /// Interval of the progress reports sent while playing.
    pub scrobble_interval: Duration,
    /// Minimum time between two buffering notices.
    pub buffer_notice_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            resume: ResumePolicy::Prompt,
            resume_rewind: 10.0,
            watched_fraction: 0.80,
            retries: 2,
            retry_delay: Duration::from_secs(3),
            load_timeout: Duration::from_secs(300),
            audio_policy: AudioPolicy::Lenient,
            audio_languages: vec!["en".into()],
            subtitles: false,
            subtitle_mode: SubtitleMode::Automatic,
            subtitle_languages: vec!["en".into()],
            subtitle_dir: std::env::temp_dir().join("cinemeld-subtitles"),
            chapter_skip: true,
            binge: true,
            binge_style: BingeDialogStyle::Overlay,
            binge_prompt_fraction: 1.0 / 30.0,
            prescrape_window: 600.0,
            prescrape_after: 300.0,
            binge_interrupt: true,
            rating_prompt: false,
            library_add: false,
            scrobble_interval: Duration::from_secs(15 * 60),
            buffer_notice_interval: Duration::from_secs(5 * 60),
        }
    }
}

fn languages(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl PlaybackConfig {
    pub async fn from_settings(settings: &dyn Settings) -> Self {
        let d = Self::default();
        let resume = settings.get_string("playback.resume", "prompt").await;
        let audio_policy = settings.get_string("playback.audio.policy", "lenient").await;
        let subtitle_mode = settings.get_string("playback.subtitles.mode", "automatic").await;
        let binge_style = settings.get_string("playback.binge.style", "overlay").await;
        let secs = |v: i64| Duration::from_secs(v.max(0) as u64);
        Self {
            resume: ResumePolicy::from_str(&resume).unwrap_or(d.resume),
            resume_rewind: settings.get_float("playback.resume.rewind", d.resume_rewind).await.max(0.0),
            watched_fraction: settings
                .get_float("playback.watched_fraction", d.watched_fraction)
                .await
                .clamp(0.5, 1.0),
            retries: settings.get_int("playback.retries", d.retries as i64).await.clamp(0, 10) as u32,
            retry_delay: secs(settings.get_int("playback.retry_delay", 3).await),
            load_timeout: secs(settings.get_int("playback.load_timeout", 300).await),
            audio_policy: AudioPolicy::from_str(&audio_policy).unwrap_or(d.audio_policy),
            audio_languages: languages(&settings.get_string("playback.audio.languages", "en").await),
            subtitles: settings.get_bool("playback.subtitles", d.subtitles).await,
            subtitle_mode: SubtitleMode::from_str(&subtitle_mode).unwrap_or(d.subtitle_mode),
            subtitle_languages: languages(&settings.get_string("playback.subtitles.languages", "en").await),
            subtitle_dir: d.subtitle_dir,
            chapter_skip: settings.get_bool("playback.chapter_skip", d.chapter_skip).await,
            binge: settings.get_bool("playback.binge", d.binge).await,
            binge_style: BingeDialogStyle::from_str(&binge_style).unwrap_or(d.binge_style),
            binge_prompt_fraction: settings
                .get_float("playback.binge.prompt_fraction", d.binge_prompt_fraction)
                .await
                .clamp(0.0, 0.5),
            prescrape_window: settings.get_float("playback.binge.prescrape_window", d.prescrape_window).await,
            prescrape_after: d.prescrape_after,
            binge_interrupt: settings.get_bool("playback.binge.interrupt", d.binge_interrupt).await,
            rating_prompt: settings.get_bool("playback.rating_prompt", d.rating_prompt).await,
            library_add: settings.get_bool("playback.library_add", d.library_add).await,
            scrobble_interval: secs(settings.get_int("playback.scrobble_interval", 900).await),
            buffer_notice_interval: d.buffer_notice_interval,
        }
    }
}
