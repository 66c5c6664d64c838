//! Host capabilities backed by the connected host shell.
//!
//! Commands and questions go out on the event stream. Answers come back
//! through the dialog route and are matched to the waiting request by id;
//! a question nobody answers in time resolves to its negative default.
//! Player queries are served from the status the shell reports with every
//! player event.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use cinemeld_core::concurrency::AbortFlag;
use cinemeld_core::error::HostError;
use cinemeld_core::host::{
    AudioStreamInfo, BingeChoice, BingePrompt, ChapterMarker, Dialog, Directory, DirectoryItem, Host,
    Notification, PlayItem, Player, Process, Settings, SubtitleStreamInfo, Translation,
};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::state::{HostRequest, PlayerCommand, PlayerStatus, ProgressEvent, ServerEvent};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Bridge {
    events: broadcast::Sender<ServerEvent>,
    replies: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    cancelled: Mutex<HashSet<u64>>,
    listing: Mutex<Vec<DirectoryItem>>,
    status: RwLock<PlayerStatus>,
    next_id: AtomicU64,
    reply_timeout: Duration,
    abort: AbortFlag,
}

impl Bridge {
    pub fn new(events: broadcast::Sender<ServerEvent>, reply_timeout: Duration, abort: AbortFlag) -> Self {
        Self {
            events,
            replies: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(HashSet::new()),
            listing: Mutex::new(Vec::new()),
            status: RwLock::new(PlayerStatus::default()),
            next_id: AtomicU64::new(1),
            reply_timeout,
            abort,
        }
    }

    /// A Host whose player, dialog, directory and process all go through
    /// this bridge.
    pub fn host(self: &Arc<Self>, settings: Arc<dyn Settings>, translation: Arc<dyn Translation>) -> Host {
        Host {
            player: self.clone(),
            directory: self.clone(),
            dialog: self.clone(),
            settings,
            translation,
            process: self.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Returns false when no host shell is listening.
    pub fn publish(&self, event: ServerEvent) -> bool {
        let name = event.name();
        match self.events.send(event) {
            Ok(_) => true,
            Err(_) => {
                debug!(event = name, "no host shell listening");
                false
            }
        }
    }

    fn command(&self, command: PlayerCommand) -> bool {
        self.publish(ServerEvent::Player(command))
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Ask the host shell and wait for its answer.
    async fn ask(&self, request: HostRequest) -> Option<Value> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        guard(&self.replies).insert(id, tx);
        if !self.publish(ServerEvent::Request { id, request }) {
            guard(&self.replies).remove(&id);
            return None;
        }
        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(_)) => None,
            Err(_) => {
                guard(&self.replies).remove(&id);
                warn!(id, "host shell did not answer");
                None
            }
        }
    }

    /// Deliver the host shell's answer to request `id`. False when nothing
    /// is waiting for it.
    pub fn answer(&self, id: u64, value: Value) -> bool {
        match guard(&self.replies).remove(&id) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn pending_requests(&self) -> usize {
        guard(&self.replies).len()
    }

    pub fn cancel_progress(&self, id: u64) {
        guard(&self.cancelled).insert(id);
    }

    pub fn update_status(&self, status: PlayerStatus) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
    }

    pub fn status(&self) -> PlayerStatus {
        self.status.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn with_status<R>(&self, f: impl FnOnce(&mut PlayerStatus) -> R) -> R {
        f(&mut self.status.write().unwrap_or_else(|e| e.into_inner()))
    }

    fn read_status<R>(&self, f: impl FnOnce(&PlayerStatus) -> R) -> R {
        f(&self.status.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn progress(&self, id: u64, title: Option<String>, background: bool, percent: u8, message: &str, closed: bool) {
        self.publish(ServerEvent::Progress(ProgressEvent {
            id,
            title,
            background,
            percent,
            message: message.to_string(),
            closed,
        }));
    }
}

#[async_trait]
impl Player for Bridge {
    async fn play(&self, url: &str, item: &PlayItem) -> Result<(), HostError> {
        self.update_status(PlayerStatus::default());
        let sent = self.command(PlayerCommand::Play {
            url: url.to_string(),
            item: item.clone(),
        });
        if sent { Ok(()) } else { Err(HostError::Unavailable("player")) }
    }

    async fn stop(&self) {
        self.command(PlayerCommand::Stop);
        self.with_status(|s| s.playing = false);
    }

    async fn pause(&self) {
        self.command(PlayerCommand::Pause);
    }

    async fn seek_time(&self, seconds: f64) {
        self.command(PlayerCommand::Seek { time: seconds });
        self.with_status(|s| s.time = seconds);
    }

    async fn is_playing(&self) -> bool {
        self.read_status(|s| s.playing)
    }

    async fn time(&self) -> f64 {
        self.read_status(|s| s.time)
    }

    async fn total_time(&self) -> f64 {
        self.read_status(|s| s.total)
    }

    async fn property(&self, name: &str) -> Option<String> {
        self.read_status(|s| s.properties.get(name).cloned())
    }

    async fn audio_streams(&self) -> Vec<AudioStreamInfo> {
        self.read_status(|s| s.audio.clone())
    }

    async fn set_audio_stream(&self, index: usize) {
        self.command(PlayerCommand::SetAudio { index });
    }

    async fn subtitle_streams(&self) -> Vec<SubtitleStreamInfo> {
        self.read_status(|s| s.subtitles.clone())
    }

    async fn current_subtitle_stream(&self) -> Option<usize> {
        self.read_status(|s| s.current_subtitle)
    }

    async fn set_subtitle_stream(&self, index: usize) {
        self.command(PlayerCommand::SetSubtitle { index });
        self.with_status(|s| s.current_subtitle = Some(index));
    }

    async fn show_subtitles(&self, visible: bool) {
        self.command(PlayerCommand::ShowSubtitles { visible });
    }

    async fn add_subtitle(&self, path: &str, name: &str) -> Result<(), HostError> {
        if !self.command(PlayerCommand::AddSubtitle {
            path: path.to_string(),
            name: name.to_string(),
        }) {
            return Err(HostError::Unavailable("player"));
        }
        // The shell appends external tracks after the embedded ones.
        self.with_status(|s| {
            let index = s.subtitles.len();
            s.subtitles.push(SubtitleStreamInfo {
                index,
                language: None,
                name: Some(name.to_string()),
                forced: false,
                impaired: false,
                default: false,
            });
        });
        Ok(())
    }

    async fn chapters(&self) -> Vec<ChapterMarker> {
        self.read_status(|s| s.chapters.clone())
    }
}

#[async_trait]
impl Directory for Bridge {
    async fn add_item(&self, item: DirectoryItem) {
        guard(&self.listing).push(item);
    }

    async fn finish(&self, content: &str, succeeded: bool) {
        let items = std::mem::take(&mut *guard(&self.listing));
        self.publish(ServerEvent::Container {
            content: content.to_string(),
            succeeded,
            items,
        });
    }

    async fn refresh(&self) {
        self.publish(ServerEvent::Refresh);
    }
}

#[async_trait]
impl Dialog for Bridge {
    async fn notify(&self, notification: Notification) {
        self.publish(ServerEvent::Notification(notification));
    }

    async fn confirm(&self, title: &str, message: &str) -> bool {
        let request = HostRequest::Confirm {
            title: title.to_string(),
            message: message.to_string(),
        };
        self.ask(request).await.and_then(|v| v.as_bool()).unwrap_or(false)
    }

    async fn select(&self, title: &str, options: &[String], preselect: Option<usize>) -> Option<usize> {
        let request = HostRequest::Select {
            title: title.to_string(),
            options: options.to_vec(),
            preselect,
        };
        let index = self.ask(request).await?.as_u64()? as usize;
        (index < options.len()).then_some(index)
    }

    async fn input(&self, title: &str, default: &str) -> Option<String> {
        let request = HostRequest::Input {
            title: title.to_string(),
            default: default.to_string(),
        };
        self.ask(request).await?.as_str().map(str::to_string)
    }

    async fn progress_open(&self, title: &str, background: bool) -> u64 {
        let id = self.next_id();
        self.progress(id, Some(title.to_string()), background, 0, "", false);
        id
    }

    async fn progress_update(&self, id: u64, percent: u8, message: &str) {
        self.progress(id, None, false, percent.min(100), message, false);
    }

    async fn progress_close(&self, id: u64) {
        guard(&self.cancelled).remove(&id);
        self.progress(id, None, false, 100, "", true);
    }

    async fn progress_cancelled(&self, id: u64) -> bool {
        guard(&self.cancelled).contains(&id)
    }

    async fn binge_prompt(&self, prompt: &BingePrompt) -> BingeChoice {
        self.ask(HostRequest::BingePrompt(prompt.clone()))
            .await
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(BingeChoice::Cancel)
    }

    async fn skip_prompt(&self, label: &str, visible_for: Duration) -> bool {
        let request = HostRequest::SkipPrompt {
            label: label.to_string(),
            visible_ms: visible_for.as_millis() as u64,
        };
        self.ask(request).await.and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

#[async_trait]
impl Process for Bridge {
    async fn execute_plugin(&self, action: &str, params: &BTreeMap<String, String>) -> Result<(), HostError> {
        let event = ServerEvent::Execute {
            action: action.to_string(),
            params: params.clone(),
        };
        if self.publish(event) {
            Ok(())
        } else {
            Err(HostError::Unavailable("process"))
        }
    }

    async fn execute_script(&self, script: &str, args: &[String]) -> Result<(), HostError> {
        let event = ServerEvent::Script {
            script: script.to_string(),
            args: args.to_vec(),
        };
        if self.publish(event) {
            Ok(())
        } else {
            Err(HostError::Unavailable("process"))
        }
    }

    async fn execute_json(&self, method: &str, params: Value) -> Result<Value, HostError> {
        let request = HostRequest::Json {
            method: method.to_string(),
            params,
        };
        self.ask(request)
            .await
            .ok_or_else(|| HostError::Failed(format!("{method}: no reply from host")))
    }

    async fn addon_setting(&self, addon: &str, key: &str) -> Option<String> {
        let request = HostRequest::AddonSetting {
            addon: addon.to_string(),
            key: key.to_string(),
        };
        self.ask(request).await?.as_str().map(str::to_string)
    }

    async fn abort_requested(&self) -> bool {
        self.abort.is_aborted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(timeout: Duration) -> Arc<Bridge> {
        let (tx, _) = broadcast::channel(16);
        Arc::new(Bridge::new(tx, timeout, AbortFlag::new()))
    }

    #[tokio::test]
    async fn questions_are_answered_by_id() {
        let bridge = bridge(Duration::from_secs(5));
        let mut rx = bridge.subscribe();
        let answering = bridge.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let ServerEvent::Request { id, request } = event {
                    let value = match request {
                        HostRequest::Select { .. } => serde_json::json!(1),
                        HostRequest::BingePrompt(_) => serde_json::json!("continue"),
                        _ => serde_json::json!(true),
                    };
                    answering.answer(id, value);
                }
            }
        });

        let options = vec!["Disable".to_string(), "English".to_string()];
        assert_eq!(bridge.select("Subtitles", &options, None).await, Some(1));
        assert!(bridge.confirm("Resume", "Resume from 12:00?").await);
        let prompt = BingePrompt {
            style: cinemeld_core::host::BingeDialogStyle::Overlay,
            title: "Pilot".into(),
            next_label: "S01E02".into(),
            remaining: Duration::from_secs(90),
        };
        assert_eq!(bridge.binge_prompt(&prompt).await, BingeChoice::Continue);
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn unanswered_questions_fall_back() {
        let bridge = bridge(Duration::from_millis(20));
        let _rx = bridge.subscribe();
        assert!(!bridge.confirm("Resume", "?").await);
        assert!(!bridge.skip_prompt("Skip Intro", Duration::from_secs(10)).await);
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn without_a_shell_the_player_is_unavailable() {
        let bridge = bridge(Duration::from_secs(1));
        let err = bridge.play("https://cdn.example/a.mkv", &PlayItem::default()).await.unwrap_err();
        assert_eq!(err, HostError::Unavailable("player"));
    }

    #[tokio::test]
    async fn player_queries_read_the_reported_status() {
        let bridge = bridge(Duration::from_secs(1));
        let mut rx = bridge.subscribe();
        bridge.play("https://cdn.example/a.mkv", &PlayItem::default()).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::Player(PlayerCommand::Play { .. })));

        bridge.update_status(PlayerStatus {
            playing: true,
            time: 30.0,
            total: 1800.0,
            ..Default::default()
        });
        assert!(bridge.is_playing().await);
        bridge.seek_time(600.0).await;
        assert_eq!(bridge.time().await, 600.0);

        bridge.add_subtitle("/tmp/a.srt", "Disable").await.unwrap();
        assert_eq!(bridge.subtitle_streams().await.len(), 1);
    }
}
