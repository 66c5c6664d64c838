//! Audio track choice.

use cinemeld_core::host::AudioStreamInfo;

/// How the item's original language weighs against the user's preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPolicy {
    /// Preferences only.
    Ignore,
    /// Original language first, whether preferred or not.
    Lenient,
    /// Original language first, but only when it is also preferred.
    Strict,
}

impl AudioPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ignore" => Some(Self::Ignore),
            "lenient" => Some(Self::Lenient),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

const UNDEFINED: &[&str] = &["", "und", "unk", "xx", "mis"];

fn is_commentary(track: &AudioStreamInfo) -> bool {
    track.commentary
        || track.name.as_deref().is_some_and(|n| {
            let n = n.to_lowercase();
            n.contains("comment") || n.contains("director")
        })
}

/// Normalised code; three-letter codes of common languages fold to two.
pub fn normalize_language(code: &str) -> String {
    let code = code.trim().to_ascii_lowercase();
    let short = match code.as_str() {
        "eng" => "en",
        "ger" | "deu" => "de",
        "fre" | "fra" => "fr",
        "spa" => "es",
        "ita" => "it",
        "jpn" => "ja",
        "kor" => "ko",
        "chi" | "zho" => "zh",
        "por" => "pt",
        "rus" => "ru",
        "dut" | "nld" => "nl",
        "swe" => "sv",
        "nor" => "no",
        "dan" => "da",
        "fin" => "fi",
        "pol" => "pl",
        "tur" => "tr",
        "hin" => "hi",
        "ara" => "ar",
        other => other,
    };
    short.to_string()
}

fn language_of(track: &AudioStreamInfo) -> String {
    track.language.as_deref().map(normalize_language).unwrap_or_default()
}

fn is_undefined(language: &str) -> bool {
    UNDEFINED.contains(&language)
}

/// Most channels, then highest bitrate, among non-commentary tracks whose
/// language is `language`.
fn best_in(tracks: &[AudioStreamInfo], language: &str, assumed: Option<&str>) -> Option<usize> {
    tracks
        .iter()
        .filter(|t| !is_commentary(t))
        .filter(|t| {
            let lang = language_of(t);
            lang == language || (is_undefined(&lang) && assumed == Some(language))
        })
        .max_by_key(|t| (t.channels, t.bitrate))
        .map(|t| t.index)
}

fn pick(
    tracks: &[AudioStreamInfo],
    preferences: &[String],
    original: &[String],
    policy: AudioPolicy,
    assumed: Option<&str>,
) -> Option<usize> {
    if policy != AudioPolicy::Ignore {
        for code in original {
            if policy == AudioPolicy::Strict && !preferences.contains(code) {
                continue;
            }
            if let Some(index) = best_in(tracks, code, assumed) {
                return Some(index);
            }
        }
    }
    preferences.iter().find_map(|code| best_in(tracks, code, assumed))
}

/// Index of the track to switch to, or `None` to keep the player's default.
pub fn select_audio(
    tracks: &[AudioStreamInfo],
    preferences: &[String],
    original: &[String],
    policy: AudioPolicy,
) -> Option<usize> {
    let preferences: Vec<String> = preferences.iter().map(|l| normalize_language(l)).collect();
    let original: Vec<String> = original.iter().map(|l| normalize_language(l)).collect();
    if let Some(index) = pick(tracks, &preferences, &original, policy, None) {
        return Some(index);
    }
    // Untagged tracks are taken to be in the item's own language.
    let only_undefined = !tracks.is_empty() && tracks.iter().all(|t| is_undefined(&language_of(t)));
    match (only_undefined, original.first()) {
        (true, Some(assumed)) => pick(tracks, &preferences, &original, policy, Some(assumed.as_str())),
        _ => None,
    }
}
