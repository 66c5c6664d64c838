use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cinemeld_cache::Cache;
use cinemeld_core::concurrency::AbortFlag;
use cinemeld_core::host::{
    AudioStreamInfo, BingePrompt, ChapterMarker, DirectoryItem, Host, Notification, PlayItem, SubtitleStreamInfo,
};
use cinemeld_menu::MenuOrchestrator;
use cinemeld_metadata::aggregator::MetaAggregator;
use cinemeld_metadata::trakt::auth::TraktAuth;
use cinemeld_sync::TraktStore;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::bridge::Bridge;
use crate::sessions::Sessions;

/// Server-sent event types.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Notification(Notification),
    /// Something the host player must do.
    Player(PlayerCommand),
    /// A question for the user; answered through `POST /api/v1/dialog/{id}`.
    Request { id: u64, request: HostRequest },
    Progress(ProgressEvent),
    Container {
        content: String,
        succeeded: bool,
        items: Vec<DirectoryItem>,
    },
    Refresh,
    /// Run one of our own actions through the host, as a menu click would.
    Execute {
        action: String,
        params: BTreeMap<String, String>,
    },
    Script { script: String, args: Vec<String> },
    Playback { session: String, state: String },
    Heartbeat { seq: u64 },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Notification(_) => "notification",
            Self::Player(_) => "player",
            Self::Request { .. } => "request",
            Self::Progress(_) => "progress",
            Self::Container { .. } => "container",
            Self::Refresh => "refresh",
            Self::Execute { .. } => "execute",
            Self::Script { .. } => "script",
            Self::Playback { .. } => "playback",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PlayerCommand {
    Play { url: String, item: PlayItem },
    Stop,
    Pause,
    Seek { time: f64 },
    SetAudio { index: usize },
    SetSubtitle { index: usize },
    ShowSubtitles { visible: bool },
    AddSubtitle { path: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostRequest {
    Confirm { title: String, message: String },
    Select {
        title: String,
        options: Vec<String>,
        preselect: Option<usize>,
    },
    Input { title: String, default: String },
    BingePrompt(BingePrompt),
    SkipPrompt { label: String, visible_ms: u64 },
    Json { method: String, params: serde_json::Value },
    AddonSetting { addon: String, key: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub id: u64,
    pub title: Option<String>,
    pub background: bool,
    pub percent: u8,
    pub message: String,
    pub closed: bool,
}

/// What the host shell last reported about its player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerStatus {
    pub playing: bool,
    pub time: f64,
    pub total: f64,
    pub properties: HashMap<String, String>,
    pub audio: Vec<AudioStreamInfo>,
    pub subtitles: Vec<SubtitleStreamInfo>,
    pub current_subtitle: Option<usize>,
    pub chapters: Vec<ChapterMarker>,
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub bridge: Arc<Bridge>,
    pub host: Host,
    pub cache: Arc<Cache>,
    pub aggregator: Arc<MetaAggregator>,
    pub menu: Arc<MenuOrchestrator>,
    pub trakt: Option<Arc<TraktStore>>,
    pub trakt_auth: Option<Arc<TraktAuth>>,
    pub sessions: Arc<Sessions>,
    pub abort: AbortFlag,
}
