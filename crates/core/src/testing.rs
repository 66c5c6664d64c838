//! In-memory host used by tests across the workspace.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::HostError;
use crate::host::*;

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug)]
pub struct PlayerState {
    pub playing: bool,
    pub paused: bool,
    pub start_on_play: bool,
    pub play_failures: usize,
    pub time: f64,
    pub total: f64,
    pub properties: HashMap<String, String>,
    pub audio: Vec<AudioStreamInfo>,
    pub selected_audio: Option<usize>,
    pub subtitles: Vec<SubtitleStreamInfo>,
    pub current_subtitle: Option<usize>,
    pub subtitles_visible: bool,
    pub chapters: Vec<ChapterMarker>,
    pub seeks: Vec<f64>,
    pub calls: Vec<String>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            playing: false,
            paused: false,
            start_on_play: true,
            play_failures: 0,
            time: 0.0,
            total: 0.0,
            properties: HashMap::new(),
            audio: Vec::new(),
            selected_audio: None,
            subtitles: Vec::new(),
            current_subtitle: None,
            subtitles_visible: false,
            chapters: Vec::new(),
            seeks: Vec::new(),
            calls: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakePlayer {
    pub state: Mutex<PlayerState>,
}

impl FakePlayer {
    pub fn with<R>(&self, f: impl FnOnce(&mut PlayerState) -> R) -> R {
        f(&mut guard(&self.state))
    }

    pub fn set_position(&self, time: f64, total: f64) {
        self.with(|s| {
            s.time = time;
            s.total = total;
        });
    }

    pub fn calls(&self) -> Vec<String> {
        guard(&self.state).calls.clone()
    }
}

#[async_trait]
impl Player for FakePlayer {
    async fn play(&self, url: &str, _item: &PlayItem) -> Result<(), HostError> {
        let mut s = guard(&self.state);
        s.calls.push(format!("play:{url}"));
        if s.play_failures > 0 {
            s.play_failures -= 1;
            return Err(HostError::Failed("load failed".into()));
        }
        s.playing = s.start_on_play;
        Ok(())
    }

    async fn stop(&self) {
        let mut s = guard(&self.state);
        s.calls.push("stop".into());
        s.playing = false;
    }

    async fn pause(&self) {
        let mut s = guard(&self.state);
        s.calls.push("pause".into());
        s.paused = !s.paused;
    }

    async fn seek_time(&self, seconds: f64) {
        let mut s = guard(&self.state);
        s.calls.push(format!("seek:{seconds}"));
        s.seeks.push(seconds);
        s.time = seconds;
    }

    async fn is_playing(&self) -> bool {
        guard(&self.state).playing
    }

    async fn time(&self) -> f64 {
        guard(&self.state).time
    }

    async fn total_time(&self) -> f64 {
        guard(&self.state).total
    }

    async fn property(&self, name: &str) -> Option<String> {
        guard(&self.state).properties.get(name).cloned()
    }

    async fn audio_streams(&self) -> Vec<AudioStreamInfo> {
        guard(&self.state).audio.clone()
    }

    async fn set_audio_stream(&self, index: usize) {
        let mut s = guard(&self.state);
        s.calls.push(format!("audio:{index}"));
        s.selected_audio = Some(index);
    }

    async fn subtitle_streams(&self) -> Vec<SubtitleStreamInfo> {
        guard(&self.state).subtitles.clone()
    }

    async fn current_subtitle_stream(&self) -> Option<usize> {
        guard(&self.state).current_subtitle
    }

    async fn set_subtitle_stream(&self, index: usize) {
        let mut s = guard(&self.state);
        s.calls.push(format!("subtitle:{index}"));
        s.current_subtitle = Some(index);
    }

    async fn show_subtitles(&self, visible: bool) {
        guard(&self.state).subtitles_visible = visible;
    }

    async fn add_subtitle(&self, path: &str, name: &str) -> Result<(), HostError> {
        let mut s = guard(&self.state);
        let index = s.subtitles.len();
        s.calls.push(format!("add_subtitle:{name}"));
        s.subtitles.push(SubtitleStreamInfo {
            index,
            language: None,
            name: Some(name.to_string()),
            forced: false,
            impaired: false,
            default: false,
        });
        let _ = path;
        Ok(())
    }

    async fn chapters(&self) -> Vec<ChapterMarker> {
        guard(&self.state).chapters.clone()
    }
}

#[derive(Debug, Default)]
pub struct DialogState {
    pub notifications: Vec<Notification>,
    pub confirms: Vec<String>,
    pub confirm_answer: bool,
    pub selects: Vec<(String, Vec<String>)>,
    pub select_answer: Option<usize>,
    pub input_answer: Option<String>,
    pub binge_prompts: Vec<BingePrompt>,
    /// `None` answers Cancel.
    pub binge_answer: Option<BingeChoice>,
    pub skip_prompts: Vec<String>,
    pub skip_answer: bool,
    pub progress_opened: Vec<u64>,
    pub progress_closed: Vec<u64>,
    pub progress_cancelled: bool,
}

#[derive(Debug, Default)]
pub struct RecordingDialog {
    pub state: Mutex<DialogState>,
}

impl RecordingDialog {
    pub fn with<R>(&self, f: impl FnOnce(&mut DialogState) -> R) -> R {
        f(&mut guard(&self.state))
    }
}

#[async_trait]
impl Dialog for RecordingDialog {
    async fn notify(&self, notification: Notification) {
        guard(&self.state).notifications.push(notification);
    }

    async fn confirm(&self, title: &str, _message: &str) -> bool {
        let mut s = guard(&self.state);
        s.confirms.push(title.to_string());
        s.confirm_answer
    }

    async fn select(
        &self,
        title: &str,
        options: &[String],
        _preselect: Option<usize>,
    ) -> Option<usize> {
        let mut s = guard(&self.state);
        s.selects.push((title.to_string(), options.to_vec()));
        s.select_answer.filter(|i| *i < options.len())
    }

    async fn input(&self, _title: &str, _default: &str) -> Option<String> {
        guard(&self.state).input_answer.clone()
    }

    async fn progress_open(&self, _title: &str, _background: bool) -> u64 {
        let mut s = guard(&self.state);
        let id = s.progress_opened.len() as u64 + 1;
        s.progress_opened.push(id);
        id
    }

    async fn progress_update(&self, _id: u64, _percent: u8, _message: &str) {}

    async fn progress_close(&self, id: u64) {
        guard(&self.state).progress_closed.push(id);
    }

    async fn progress_cancelled(&self, _id: u64) -> bool {
        guard(&self.state).progress_cancelled
    }

    async fn binge_prompt(&self, prompt: &BingePrompt) -> BingeChoice {
        let mut s = guard(&self.state);
        s.binge_prompts.push(prompt.clone());
        s.binge_answer.unwrap_or(BingeChoice::Cancel)
    }

    async fn skip_prompt(&self, label: &str, _visible_for: Duration) -> bool {
        let mut s = guard(&self.state);
        s.skip_prompts.push(label.to_string());
        s.skip_answer
    }
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    pub values: Mutex<HashMap<String, String>>,
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySettings {
    pub fn with_values(pairs: &[(&str, &str)]) -> Self {
        let s = Self::default();
        {
            let mut v = guard(&s.values);
            for (k, val) in pairs {
                v.insert(k.to_string(), val.to_string());
            }
        }
        s
    }
}

#[async_trait]
impl Settings for MemorySettings {
    async fn get(&self, key: &str) -> Option<String> {
        guard(&self.values).get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) {
        guard(&self.values).insert(key.to_string(), value.to_string());
    }

    async fn get_blob(&self, key: &str) -> Option<Vec<u8>> {
        guard(&self.blobs).get(key).cloned()
    }

    async fn set_blob(&self, key: &str, value: &[u8]) {
        guard(&self.blobs).insert(key.to_string(), value.to_vec());
    }
}

#[derive(Debug, Default)]
pub struct CollectingDirectory {
    pub items: Mutex<Vec<DirectoryItem>>,
    pub finished: Mutex<Option<(String, bool)>>,
}

#[async_trait]
impl Directory for CollectingDirectory {
    async fn add_item(&self, item: DirectoryItem) {
        guard(&self.items).push(item);
    }

    async fn finish(&self, content: &str, succeeded: bool) {
        *guard(&self.finished) = Some((content.to_string(), succeeded));
    }

    async fn refresh(&self) {}
}

#[derive(Debug, Default)]
pub struct StaticTranslation;

impl Translation for StaticTranslation {
    fn translate(&self, id: u32) -> String {
        format!("#{id}")
    }
}

#[derive(Debug, Default)]
pub struct RecordingProcess {
    pub plugin_calls: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    pub json_calls: Mutex<Vec<(String, serde_json::Value)>>,
    pub abort: AtomicBool,
}

impl RecordingProcess {
    pub fn plugin_calls(&self) -> Vec<(String, BTreeMap<String, String>)> {
        guard(&self.plugin_calls).clone()
    }
}

#[async_trait]
impl Process for RecordingProcess {
    async fn execute_plugin(
        &self,
        action: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(), HostError> {
        guard(&self.plugin_calls).push((action.to_string(), params.clone()));
        Ok(())
    }

    async fn execute_script(&self, _script: &str, _args: &[String]) -> Result<(), HostError> {
        Ok(())
    }

    async fn execute_json(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, HostError> {
        guard(&self.json_calls).push((method.to_string(), params));
        Ok(serde_json::json!({ "result": "OK" }))
    }

    async fn addon_setting(&self, _addon: &str, _key: &str) -> Option<String> {
        None
    }

    async fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

/// Every fake with handles kept for assertions.
#[derive(Debug, Default, Clone)]
pub struct FakeHost {
    pub player: Arc<FakePlayer>,
    pub directory: Arc<CollectingDirectory>,
    pub dialog: Arc<RecordingDialog>,
    pub settings: Arc<MemorySettings>,
    pub process: Arc<RecordingProcess>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(&self) -> Host {
        Host {
            player: self.player.clone(),
            directory: self.directory.clone(),
            dialog: self.dialog.clone(),
            settings: self.settings.clone(),
            translation: Arc::new(StaticTranslation),
            process: self.process.clone(),
        }
    }
}
