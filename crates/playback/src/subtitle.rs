//! Subtitle choice across the player's own tracks and downloadable files.
//!
//! Two placeholder tracks, `DISABLE` and `SELECT`, are loaded into the player
//! so the host's own subtitle menu can turn subtitles off or reopen the
//! chooser mid-playback.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use cinemeld_core::error::HostError;
use cinemeld_core::host::{Dialog, Player, SubtitleStreamInfo};
use cinemeld_core::types::ItemSeed;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::PlaybackError;
use crate::audio::normalize_language;

pub const DISABLE: &str = "DISABLE";
pub const SELECT: &str = "SELECT";

static RE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9]+").unwrap());

const LANGUAGE_WEIGHT: f64 = 1000.0;
const INTEGRATED_BONUS: f64 = 100_000.0;
/// Name similarity a download needs in exact mode.
const EXACT_SIMILARITY: f64 = 0.7;
/// Downloads tried before giving up.
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleMode {
    /// Player tracks, or downloads released for this exact file.
    Exact,
    /// Best ranked candidate.
    Automatic,
    /// Player tracks automatically, otherwise ask.
    Choice,
    /// Always ask.
    Manual,
}

impl SubtitleMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Self::Exact),
            "automatic" => Some(Self::Automatic),
            "choice" => Some(Self::Choice),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubtitleCandidate {
    /// Source-specific id used to download the file.
    pub id: String,
    pub language: String,
    /// Release or file name.
    pub name: String,
    /// Player stream index of an embedded track.
    pub integrated: Option<usize>,
    pub trusted: bool,
    /// Only covers foreign-language dialogue.
    pub foreign: bool,
    pub default: bool,
    pub impaired: bool,
    pub ai: bool,
    pub machine: bool,
}

impl SubtitleCandidate {
    fn from_stream(stream: &SubtitleStreamInfo) -> Self {
        Self {
            id: format!("stream:{}", stream.index),
            language: stream.language.as_deref().map(normalize_language).unwrap_or_default(),
            name: stream.name.clone().unwrap_or_default(),
            integrated: Some(stream.index),
            foreign: stream.forced,
            default: stream.default,
            impaired: stream.impaired,
            ..Default::default()
        }
    }

    fn label(&self) -> String {
        let origin = if self.integrated.is_some() { "Embedded" } else { "Download" };
        let mut flags = Vec::new();
        if self.foreign {
            flags.push("forced");
        }
        if self.impaired {
            flags.push("SDH");
        }
        let flags = if flags.is_empty() { String::new() } else { format!(" [{}]", flags.join(", ")) };
        format!("{} | {origin} | {}{flags}", self.language.to_uppercase(), self.name)
    }
}

/// External subtitle catalogue.
#[async_trait]
pub trait SubtitleSource: Send + Sync {
    async fn search(&self, seed: &ItemSeed, languages: &[String]) -> Result<Vec<SubtitleCandidate>, PlaybackError>;
    async fn download(&self, candidate: &SubtitleCandidate) -> Result<Vec<u8>, PlaybackError>;
}

fn tokens(s: &str) -> HashSet<String> {
    RE_TOKEN
        .find_iter(&s.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Token overlap of two release names, 0 to 1.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (tokens(a), tokens(b));
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Ranking score. Candidates outside `languages` only score by their flags.
pub fn score(candidate: &SubtitleCandidate, languages: &[String], stream_name: &str) -> f64 {
    let mut score = match languages.iter().position(|l| *l == candidate.language) {
        Some(i) => (languages.len() - i) as f64 * LANGUAGE_WEIGHT,
        None => 0.0,
    };
    if candidate.integrated.is_some() {
        score += INTEGRATED_BONUS;
    }
    score += similarity(&candidate.name, stream_name);
    if candidate.trusted {
        score += 0.5;
    }
    if candidate.default {
        score += 0.3;
    }
    if candidate.foreign {
        score -= 0.2;
    }
    if candidate.impaired {
        score -= 0.4;
    }
    if candidate.ai {
        score -= 0.6;
    }
    if candidate.machine {
        score -= 0.8;
    }
    score
}

/// Preferred-language candidates, best first.
pub fn rank(candidates: Vec<SubtitleCandidate>, languages: &[String], stream_name: &str) -> Vec<SubtitleCandidate> {
    let mut scored: Vec<(f64, SubtitleCandidate)> = candidates
        .into_iter()
        .filter(|c| languages.contains(&c.language))
        .map(|c| (score(&c, languages, stream_name), c))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, c)| c).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleChoice {
    /// Player stream now showing.
    Stream(usize),
    Off,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Placeholders {
    disable: Option<usize>,
    select: Option<usize>,
}

pub struct SubtitleSelector {
    player: Arc<dyn Player>,
    dialog: Arc<dyn Dialog>,
    source: Option<Arc<dyn SubtitleSource>>,
    languages: Vec<String>,
    dir: PathBuf,
    placeholders: Placeholders,
}

impl SubtitleSelector {
    pub fn new(player: Arc<dyn Player>, dialog: Arc<dyn Dialog>, languages: &[String], dir: PathBuf) -> Self {
        Self {
            player,
            dialog,
            source: None,
            languages: languages.iter().map(|l| normalize_language(l)).collect(),
            dir,
            placeholders: Placeholders::default(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn SubtitleSource>) -> Self {
        self.source = Some(source);
        self
    }

    fn is_placeholder(&self, index: usize) -> bool {
        self.placeholders.disable == Some(index) || self.placeholders.select == Some(index)
    }

    /// Load the `DISABLE` and `SELECT` tracks.
    pub async fn preload(&mut self) -> Result<(), PlaybackError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        for name in [DISABLE, SELECT] {
            let path = self.dir.join(format!("{name}.srt"));
            tokio::fs::write(&path, b"1\n00:00:00,000 --> 00:00:00,001\n \n").await?;
            self.player.add_subtitle(&path.to_string_lossy(), name).await?;
        }
        let streams = self.player.subtitle_streams().await;
        let find = |name: &str| streams.iter().rev().find(|s| s.name.as_deref() == Some(name)).map(|s| s.index);
        self.placeholders = Placeholders {
            disable: find(DISABLE),
            select: find(SELECT),
        };
        debug!(placeholders = ?self.placeholders, "subtitle placeholders loaded");
        Ok(())
    }

    async fn candidates(&self, seed: &ItemSeed) -> Vec<SubtitleCandidate> {
        let mut out: Vec<SubtitleCandidate> = self
            .player
            .subtitle_streams()
            .await
            .iter()
            .filter(|s| !self.is_placeholder(s.index))
            .map(SubtitleCandidate::from_stream)
            .collect();
        if let Some(source) = &self.source {
            match source.search(seed, &self.languages).await {
                Ok(found) => out.extend(found.into_iter().map(|mut c| {
                    c.language = normalize_language(&c.language);
                    c
                })),
                Err(e) => warn!(item = %seed.key(), error = %e, "subtitle search failed"),
            }
        }
        out
    }

    /// Choose and show a subtitle for the playing item.
    pub async fn select(
        &self,
        seed: &ItemSeed,
        mode: SubtitleMode,
        stream_name: &str,
    ) -> Result<SubtitleChoice, PlaybackError> {
        let ranked = rank(self.candidates(seed).await, &self.languages, stream_name);
        let picked: Vec<SubtitleCandidate> = match mode {
            SubtitleMode::Exact => ranked
                .into_iter()
                .filter(|c| c.integrated.is_some() || similarity(&c.name, stream_name) >= EXACT_SIMILARITY)
                .collect(),
            SubtitleMode::Automatic => ranked,
            SubtitleMode::Choice if ranked.first().is_some_and(|c| c.integrated.is_some()) => ranked,
            SubtitleMode::Choice | SubtitleMode::Manual => match self.ask(&ranked).await {
                Some(i) => ranked.into_iter().skip(i).collect(),
                None => Vec::new(),
            },
        };
        if picked.is_empty() {
            return self.turn_off().await;
        }
        for candidate in picked.iter().take(MAX_ATTEMPTS) {
            match self.apply(candidate).await {
                Ok(index) => {
                    info!(item = %seed.key(), language = %candidate.language, name = %candidate.name, "subtitle selected");
                    return Ok(SubtitleChoice::Stream(index));
                }
                Err(e) => warn!(name = %candidate.name, error = %e, "subtitle failed to load, trying next"),
            }
        }
        self.turn_off().await
    }

    /// React to the user switching tracks in the host's own menu.
    pub async fn stream_changed(
        &self,
        seed: &ItemSeed,
        stream_name: &str,
    ) -> Result<Option<SubtitleChoice>, PlaybackError> {
        let current = self.player.current_subtitle_stream().await;
        if current.is_some() && current == self.placeholders.select {
            return self.select(seed, SubtitleMode::Manual, stream_name).await.map(Some);
        }
        if current.is_some() && current == self.placeholders.disable {
            self.player.show_subtitles(false).await;
            return Ok(Some(SubtitleChoice::Off));
        }
        Ok(None)
    }

    /// Index into `ranked` the user picked. The first option turns subtitles off.
    async fn ask(&self, ranked: &[SubtitleCandidate]) -> Option<usize> {
        let mut options = vec!["Disable".to_string()];
        options.extend(ranked.iter().map(SubtitleCandidate::label));
        let preselect = (!ranked.is_empty()).then_some(1);
        match self.dialog.select("Subtitles", &options, preselect).await {
            Some(0) | None => None,
            Some(i) => Some(i - 1),
        }
    }

    async fn turn_off(&self) -> Result<SubtitleChoice, PlaybackError> {
        if let Some(index) = self.placeholders.disable {
            self.player.set_subtitle_stream(index).await;
        }
        self.player.show_subtitles(false).await;
        Ok(SubtitleChoice::Off)
    }

    async fn apply(&self, candidate: &SubtitleCandidate) -> Result<usize, PlaybackError> {
        if let Some(index) = candidate.integrated {
            self.player.set_subtitle_stream(index).await;
            self.player.show_subtitles(true).await;
            return Ok(index);
        }
        let source = self
            .source
            .as_ref()
            .ok_or(PlaybackError::Host(HostError::Unavailable("subtitles")))?;
        let bytes = source.download(candidate).await?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                warn!(name = %candidate.name, "subtitle is not utf-8, decoding as latin-1");
                e.into_bytes().iter().map(|b| char::from(*b)).collect()
            }
        };
        tokio::fs::create_dir_all(&self.dir).await?;
        let file = format!("{}.{}.srt", sanitize(&candidate.id), candidate.language);
        let path = self.dir.join(file);
        tokio::fs::write(&path, text.as_bytes()).await?;

        let name = format!("{} {}", candidate.language.to_uppercase(), candidate.name);
        self.player.add_subtitle(&path.to_string_lossy(), &name).await?;
        let index = self
            .player
            .subtitle_streams()
            .await
            .iter()
            .rev()
            .find(|s| s.name.as_deref() == Some(name.as_str()))
            .map(|s| s.index)
            .ok_or_else(|| HostError::Failed("subtitle track missing after load".into()))?;
        self.player.set_subtitle_stream(index).await;
        self.player.show_subtitles(true).await;
        Ok(index)
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinemeld_core::testing::{FakePlayer, RecordingDialog};
    use cinemeld_core::types::{IdBundle, MediaKind};
    use std::sync::Mutex;

    const FILE: &str = "The.Matrix.1999.1080p.BluRay.x264-GROUP.mkv";

    struct FakeSource {
        found: Vec<SubtitleCandidate>,
        broken: HashSet<String>,
        downloads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SubtitleSource for FakeSource {
        async fn search(&self, _seed: &ItemSeed, _languages: &[String]) -> Result<Vec<SubtitleCandidate>, PlaybackError> {
            Ok(self.found.clone())
        }

        async fn download(&self, candidate: &SubtitleCandidate) -> Result<Vec<u8>, PlaybackError> {
            self.downloads.lock().unwrap().push(candidate.id.clone());
            if self.broken.contains(&candidate.id) {
                return Err(HostError::Failed("gone".into()).into());
            }
            Ok(b"1\n00:00:01,000 --> 00:00:02,000\nCaf\xe9\n".to_vec())
        }
    }

    fn stream(index: usize, lang: &str) -> SubtitleStreamInfo {
        SubtitleStreamInfo {
            index,
            language: Some(lang.into()),
            name: None,
            forced: false,
            impaired: false,
            default: false,
        }
    }

    fn download(id: &str, lang: &str, name: &str) -> SubtitleCandidate {
        SubtitleCandidate {
            id: id.into(),
            language: lang.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    fn seed() -> ItemSeed {
        ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt0133093"))
    }

    fn dir(test: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cinemeld-subs-{}-{test}", std::process::id()))
    }

    fn langs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn language_order_then_embedded_then_name() {
        let prefs = langs(&["de", "en"]);
        let en_embedded = SubtitleCandidate {
            integrated: Some(2),
            ..download("a", "en", "")
        };
        let de_download = download("b", "de", FILE);
        let de_other = download("c", "de", "Some.Other.Release");
        let ranked = rank(
            vec![de_other.clone(), en_embedded.clone(), de_download.clone(), download("d", "fr", FILE)],
            &prefs,
            FILE,
        );
        assert_eq!(ranked, vec![en_embedded, de_download, de_other]);
        assert!(similarity(FILE, "the matrix 1999 1080p bluray x264 group mkv") > 0.99);
    }

    #[tokio::test]
    async fn automatic_prefers_the_embedded_track() {
        let player = Arc::new(FakePlayer::default());
        player.with(|s| s.subtitles = vec![stream(0, "fre"), stream(1, "eng")]);
        let dialog = Arc::new(RecordingDialog::default());
        let mut selector = SubtitleSelector::new(player.clone(), dialog, &langs(&["en"]), dir("auto"));
        selector.preload().await.unwrap();

        let choice = selector.select(&seed(), SubtitleMode::Automatic, FILE).await.unwrap();
        assert_eq!(choice, SubtitleChoice::Stream(1));
        assert!(player.with(|s| s.subtitles_visible));
    }

    #[tokio::test]
    async fn broken_download_falls_through_to_the_next() {
        let player = Arc::new(FakePlayer::default());
        let dialog = Arc::new(RecordingDialog::default());
        let source = Arc::new(FakeSource {
            found: vec![download("best", "en", FILE), download("second", "en", "The.Matrix.1999.720p")],
            broken: HashSet::from(["best".to_string()]),
            downloads: Mutex::new(Vec::new()),
        });
        let mut selector =
            SubtitleSelector::new(player.clone(), dialog, &langs(&["en"]), dir("fallback")).with_source(source.clone());
        selector.preload().await.unwrap();

        let choice = selector.select(&seed(), SubtitleMode::Automatic, FILE).await.unwrap();
        assert_eq!(*source.downloads.lock().unwrap(), vec!["best", "second"]);
        let SubtitleChoice::Stream(index) = choice else {
            panic!("expected a subtitle, got {choice:?}");
        };
        let name = player.with(|s| s.subtitles[index].name.clone());
        assert_eq!(name.as_deref(), Some("EN The.Matrix.1999.720p"));
    }

    #[tokio::test]
    async fn select_placeholder_reopens_the_chooser() {
        let player = Arc::new(FakePlayer::default());
        player.with(|s| s.subtitles = vec![stream(0, "eng")]);
        let dialog = Arc::new(RecordingDialog::default());
        dialog.with(|s| s.select_answer = Some(0));
        let mut selector = SubtitleSelector::new(player.clone(), dialog.clone(), &langs(&["en"]), dir("manual"));
        selector.preload().await.unwrap();

        // Host menu: the user picks the SELECT track.
        let select_index = player.with(|s| s.subtitles.iter().position(|t| t.name.as_deref() == Some(SELECT)));
        player.with(|s| s.current_subtitle = select_index);
        let choice = selector.stream_changed(&seed(), FILE).await.unwrap();

        // Answering "Disable" turns subtitles off.
        assert_eq!(choice, Some(SubtitleChoice::Off));
        let selects = dialog.with(|s| s.selects.clone());
        assert_eq!(selects.len(), 1);
        assert_eq!(selects[0].1[0], "Disable");
        assert_eq!(selects[0].1.len(), 2);
        assert!(!player.with(|s| s.subtitles_visible));
    }
}
