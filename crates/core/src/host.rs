//! Capabilities the embedding host must provide.
//!
//! The host renders directories, shows dialogs and owns the video player. The
//! core never talks to it except through these traits, bundled in [`Host`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::types::{IdBundle, MediaKind};

/// Artwork bundle keyed by image type (`poster`, `fanart`, `clearlogo`, ...).
pub type Artwork = BTreeMap<String, String>;

/// Player properties read through [`Player::property`].
pub mod property {
    /// Percentage of the file held in the player cache.
    pub const CACHE_PERCENT: &str = "cache.percent";
    /// Percentage of the file already played.
    pub const PLAYBACK_PERCENT: &str = "playback.percent";
    /// Network fill speed in bytes per second.
    pub const NETWORK_SPEED: &str = "cache.network_speed";
    /// Local cache read speed in bytes per second.
    pub const READ_SPEED: &str = "cache.read_speed";
    /// File name of the playing stream.
    pub const FILE_NAME: &str = "file.name";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub index: usize,
    pub language: Option<String>,
    pub name: Option<String>,
    pub channels: u32,
    pub bitrate: u64,
    pub codec: String,
    #[serde(default)]
    pub commentary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleStreamInfo {
    pub index: usize,
    pub language: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub impaired: bool,
    #[serde(default)]
    pub default: bool,
}

/// A chapter boundary as reported by the player, in percent of the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterMarker {
    pub percent: f64,
    pub name: Option<String>,
}

/// Player callbacks, delivered by the host on its event thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    Started,
    AvStarted,
    Paused,
    Resumed,
    Stopped,
    Ended,
    Error { message: Option<String> },
    AvChange,
    Seek { time: f64 },
}

/// What the player is asked to play.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayItem {
    pub label: String,
    pub kind: Option<MediaKind>,
    #[serde(default)]
    pub ids: IdBundle,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    #[serde(default)]
    pub artwork: Artwork,
}

#[async_trait]
pub trait Player: Send + Sync {
    async fn play(&self, url: &str, item: &PlayItem) -> Result<(), HostError>;
    async fn stop(&self);
    /// Toggle pause.
    async fn pause(&self);
    async fn seek_time(&self, seconds: f64);
    async fn is_playing(&self) -> bool;
    async fn time(&self) -> f64;
    async fn total_time(&self) -> f64;
    async fn property(&self, name: &str) -> Option<String>;
    async fn audio_streams(&self) -> Vec<AudioStreamInfo>;
    async fn set_audio_stream(&self, index: usize);
    async fn subtitle_streams(&self) -> Vec<SubtitleStreamInfo>;
    async fn current_subtitle_stream(&self) -> Option<usize>;
    async fn set_subtitle_stream(&self, index: usize);
    async fn show_subtitles(&self, visible: bool);
    /// Load an external subtitle file under the given display name.
    async fn add_subtitle(&self, path: &str, name: &str) -> Result<(), HostError>;
    async fn chapters(&self) -> Vec<ChapterMarker>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextAction {
    pub label: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryItem {
    pub label: String,
    pub label2: Option<String>,
    pub artwork: Artwork,
    pub command: String,
    pub is_folder: bool,
    pub context: Vec<ContextAction>,
    pub info: serde_json::Value,
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn add_item(&self, item: DirectoryItem);
    async fn finish(&self, content: &str, succeeded: bool);
    async fn refresh(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub level: NotificationLevel,
    pub duration_ms: u64,
}

impl Notification {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            level: NotificationLevel::Info,
            duration_ms: 5000,
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            level: NotificationLevel::Error,
            duration_ms: 8000,
        }
    }
}

/// How the next-episode prompt is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BingeDialogStyle {
    /// No dialog; continue automatically.
    None,
    Full,
    Overlay,
    Button,
}

impl BingeDialogStyle {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "full" => Some(Self::Full),
            "overlay" => Some(Self::Overlay),
            "button" => Some(Self::Button),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BingeChoice {
    Continue,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BingePrompt {
    pub style: BingeDialogStyle,
    pub title: String,
    pub next_label: String,
    pub remaining: Duration,
}

#[async_trait]
pub trait Dialog: Send + Sync {
    async fn notify(&self, notification: Notification);
    async fn confirm(&self, title: &str, message: &str) -> bool;
    async fn select(&self, title: &str, options: &[String], preselect: Option<usize>)
    -> Option<usize>;
    async fn input(&self, title: &str, default: &str) -> Option<String>;
    /// Open a progress window and return its handle.
    async fn progress_open(&self, title: &str, background: bool) -> u64;
    async fn progress_update(&self, id: u64, percent: u8, message: &str);
    async fn progress_close(&self, id: u64);
    async fn progress_cancelled(&self, id: u64) -> bool;
    async fn binge_prompt(&self, prompt: &BingePrompt) -> BingeChoice;
    /// Show a skip button for at most `visible_for`; true when pressed.
    async fn skip_prompt(&self, label: &str, visible_for: Duration) -> bool;
}

/// Typed key/value settings store.
#[async_trait]
pub trait Settings: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str);
    async fn get_blob(&self, key: &str) -> Option<Vec<u8>>;
    async fn set_blob(&self, key: &str, value: &[u8]);

    async fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).await.unwrap_or_else(|| default.to_string())
    }

    async fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).await.as_deref().map(str::trim) {
            Some("true") | Some("1") | Some("yes") => true,
            Some("false") | Some("0") | Some("no") => false,
            _ => default,
        }
    }

    async fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .await
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    async fn get_float(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .await
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

/// Localised string table.
pub trait Translation: Send + Sync {
    fn translate(&self, id: u32) -> String;
}

#[async_trait]
pub trait Process: Send + Sync {
    async fn execute_plugin(
        &self,
        action: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(), HostError>;
    async fn execute_script(&self, script: &str, args: &[String]) -> Result<(), HostError>;
    async fn execute_json(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, HostError>;
    /// Read a setting of a neighbouring add-on.
    async fn addon_setting(&self, addon: &str, key: &str) -> Option<String>;
    /// True once the host wants every worker to wind down.
    async fn abort_requested(&self) -> bool;
}

/// The full capability set handed to the core.
#[derive(Clone)]
pub struct Host {
    pub player: Arc<dyn Player>,
    pub directory: Arc<dyn Directory>,
    pub dialog: Arc<dyn Dialog>,
    pub settings: Arc<dyn Settings>,
    pub translation: Arc<dyn Translation>,
    pub process: Arc<dyn Process>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}
