//! Typed Trakt payloads.

use chrono::{DateTime, Utc};
use cinemeld_core::types::{IdBundle, ItemSeed, MediaKind};
use serde::{Deserialize, Serialize};

use crate::record::{MetaRecord, ShowStatus};
use crate::text::{date_of, year_of};
use crate::Provider;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraktIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trakt: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imdb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmdb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvdb: Option<u64>,
}

impl From<TraktIds> for IdBundle {
    fn from(ids: TraktIds) -> Self {
        IdBundle {
            trakt: ids.trakt,
            imdb: ids.imdb.filter(|s| !s.is_empty()),
            tmdb: ids.tmdb,
            tvdb: ids.tvdb,
            slug: ids.slug.filter(|s| !s.is_empty()),
        }
    }
}

impl From<&IdBundle> for TraktIds {
    fn from(ids: &IdBundle) -> Self {
        TraktIds {
            trakt: ids.trakt,
            slug: ids.slug.clone(),
            imdb: ids.imdb.clone(),
            tmdb: ids.tmdb,
            tvdb: ids.tvdb,
        }
    }
}

/// Movie or show summary. The optional fields only arrive with `extended=full`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraktMedia {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub ids: TraktIds,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub released: Option<String>,
    #[serde(default)]
    pub first_aired: Option<String>,
    /// Minutes.
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub votes: Option<u64>,
    #[serde(default)]
    pub certification: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub aired_episodes: Option<u32>,
}

impl TraktMedia {
    pub fn to_record(&self, kind: MediaKind) -> MetaRecord {
        let mut record = MetaRecord::new(kind, self.ids.clone().into());
        record.title.clone_from(&self.title);
        record.year = self.year;
        record.plot.clone_from(&self.overview);
        record.tagline.clone_from(&self.tagline);
        let date = self.released.as_deref().or(self.first_aired.as_deref());
        if let Some(date) = date {
            record.premiered = date_of(date);
            record.year = record.year.or_else(|| year_of(date));
        }
        record.runtime = self.runtime.filter(|m| *m > 0).map(|m| m * 60);
        record.country = self.country.iter().map(|c| c.to_uppercase()).collect();
        record.language = self.language.iter().cloned().collect();
        record.genre = self.genres.iter().map(|g| title_case(g)).collect();
        record.set_provider_rating(Provider::Trakt, self.rating, self.votes);
        record.certification.clone_from(&self.certification);
        record.homepage.clone_from(&self.homepage);
        record.status = self.status.as_deref().and_then(ShowStatus::parse);
        record.network = self.network.iter().cloned().collect();
        record.aired_episodes = self.aired_episodes;
        record
    }

    pub fn to_seed(&self, kind: MediaKind) -> ItemSeed {
        let mut seed = ItemSeed::new(kind, self.ids.clone().into());
        seed.title.clone_from(&self.title);
        seed.year = self.year;
        seed
    }
}

fn title_case(s: &str) -> String {
    s.split('-')
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraktEpisode {
    pub season: u32,
    pub number: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub ids: TraktIds,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub first_aired: Option<String>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub votes: Option<u64>,
}

impl TraktEpisode {
    pub fn to_record(&self) -> MetaRecord {
        let mut record = MetaRecord::new(MediaKind::Episode, self.ids.clone().into());
        record.season = Some(self.season);
        record.episode = Some(self.number);
        record.title.clone_from(&self.title);
        record.plot.clone_from(&self.overview);
        if let Some(date) = self.first_aired.as_deref() {
            record.premiered = date_of(date);
            record.year = year_of(date);
        }
        record.runtime = self.runtime.filter(|m| *m > 0).map(|m| m * 60);
        record.set_provider_rating(Provider::Trakt, self.rating, self.votes);
        record
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraktSeason {
    pub number: u32,
    #[serde(default)]
    pub ids: TraktIds,
    #[serde(default)]
    pub episode_count: Option<u32>,
    #[serde(default)]
    pub aired_episodes: Option<u32>,
    #[serde(default)]
    pub first_aired: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub votes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchedEpisode {
    pub number: u32,
    #[serde(default)]
    pub plays: u32,
    #[serde(default)]
    pub last_watched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchedSeason {
    pub number: u32,
    #[serde(default)]
    pub episodes: Vec<WatchedEpisode>,
}

/// Row of `sync/watched/{movies|shows}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchedItem {
    #[serde(default)]
    pub plays: u32,
    #[serde(default)]
    pub last_watched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub movie: Option<TraktMedia>,
    #[serde(default)]
    pub show: Option<TraktMedia>,
    #[serde(default)]
    pub seasons: Vec<WatchedSeason>,
}

/// Row of `sync/playback/{type}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackItem {
    #[serde(default)]
    pub id: u64,
    /// Percent, 0..=100.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub movie: Option<TraktMedia>,
    #[serde(default)]
    pub show: Option<TraktMedia>,
    #[serde(default)]
    pub episode: Option<TraktEpisode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeasonRef {
    pub number: u32,
    #[serde(default)]
    pub ids: TraktIds,
}

/// Row of `sync/ratings/{type}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatedItem {
    pub rating: u8,
    #[serde(default)]
    pub rated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub movie: Option<TraktMedia>,
    #[serde(default)]
    pub show: Option<TraktMedia>,
    #[serde(default)]
    pub season: Option<SeasonRef>,
    #[serde(default)]
    pub episode: Option<TraktEpisode>,
}

/// Entry shape shared by trending, anticipated, watchlist, history, search
/// and list-item responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraktEntry {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub movie: Option<TraktMedia>,
    #[serde(default)]
    pub show: Option<TraktMedia>,
    #[serde(default)]
    pub episode: Option<TraktEpisode>,
    #[serde(default)]
    pub person: Option<TraktMedia>,
    #[serde(default)]
    pub watched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub listed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub watchers: Option<u64>,
    #[serde(default)]
    pub list_count: Option<u64>,
    #[serde(default)]
    pub score: Option<f64>,
}

impl TraktEntry {
    /// The item the entry points at. Episodes keep their show's ids.
    pub fn seed(&self) -> Option<ItemSeed> {
        if let (Some(show), Some(ep)) = (&self.show, &self.episode) {
            let mut seed = ItemSeed::episode_of(show.ids.clone().into(), ep.season, ep.number);
            seed.ids = ep.ids.clone().into();
            seed.title.clone_from(&ep.title);
            return Some(seed);
        }
        if let Some(movie) = &self.movie {
            return Some(movie.to_seed(MediaKind::Movie));
        }
        if let Some(show) = &self.show {
            return Some(show.to_seed(MediaKind::Show));
        }
        self.person.as_ref().map(|p| {
            let mut seed = ItemSeed::new(MediaKind::Person, p.ids.clone().into());
            seed.title = p.title.clone();
            seed
        })
    }
}

/// Device-code login handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    pub expires_in: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserList {
    pub name: String,
    #[serde(default)]
    pub item_count: u32,
    #[serde(default)]
    pub ids: TraktIds,
}
