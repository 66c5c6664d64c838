use std::collections::BTreeMap;

use chrono::NaiveDate;
use cinemeld_core::host::Artwork;
use cinemeld_core::types::{IdBundle, MediaKind};
use serde::{Deserialize, Serialize};

use crate::Provider;

/// Image categories kept per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    Poster,
    Fanart,
    Banner,
    Logo,
    Clearart,
    Landscape,
    Keyart,
    Photo,
}

impl ImageType {
    pub const ALL: [ImageType; 8] = [
        Self::Poster,
        Self::Fanart,
        Self::Banner,
        Self::Logo,
        Self::Clearart,
        Self::Landscape,
        Self::Keyart,
        Self::Photo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Poster => "poster",
            Self::Fanart => "fanart",
            Self::Banner => "banner",
            Self::Logo => "clearlogo",
            Self::Clearart => "clearart",
            Self::Landscape => "landscape",
            Self::Keyart => "keyart",
            Self::Photo => "photo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Provider score (vote average or like count).
    #[serde(default)]
    pub score: f64,
    /// Position assigned by the provider; lower sorts first.
    #[serde(default)]
    pub priority: u32,
    pub provider: Provider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderRating {
    pub rating: f64,
    #[serde(default)]
    pub votes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowStatus {
    Returning,
    Ended,
    Cancelled,
}

impl ShowStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "returning series" | "returning" | "continuing" | "in production" | "planned"
            | "upcoming" | "pilot" => Some(Self::Returning),
            "ended" => Some(Self::Ended),
            "canceled" | "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Franchise reference; the collection itself is stored as its own record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRef {
    pub name: String,
    pub ids: IdBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonInfo {
    pub number: u32,
    #[serde(default)]
    pub episodes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aired: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premiered: Option<NaiveDate>,
}

/// Merged metadata for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub kind: MediaKind,
    #[serde(default)]
    pub ids: IdBundle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,

    pub title: Option<String>,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    pub premiered: Option<NaiveDate>,
    /// Runtime in seconds.
    pub runtime: Option<u32>,
    pub plot: Option<String>,
    pub tagline: Option<String>,

    #[serde(default)]
    pub genre: Vec<String>,
    #[serde(default)]
    pub country: Vec<String>,
    #[serde(default)]
    pub language: Vec<String>,
    #[serde(default)]
    pub cast: Vec<Person>,
    #[serde(default)]
    pub director: Vec<String>,
    #[serde(default)]
    pub writer: Vec<String>,
    #[serde(default)]
    pub studio: Vec<String>,
    #[serde(default)]
    pub network: Vec<String>,

    pub rating: Option<f64>,
    pub votes: Option<u64>,
    #[serde(default)]
    pub ratings: BTreeMap<Provider, ProviderRating>,

    #[serde(default)]
    pub images: BTreeMap<ImageType, Vec<Image>>,

    pub collection: Option<CollectionRef>,
    pub homepage: Option<String>,
    pub certification: Option<String>,

    pub aired_episodes: Option<u32>,
    pub status: Option<ShowStatus>,
    #[serde(default)]
    pub seasons: Vec<SeasonInfo>,
}

impl MetaRecord {
    pub fn new(kind: MediaKind, ids: IdBundle) -> Self {
        Self {
            kind,
            ids,
            season: None,
            episode: None,
            title: None,
            original_title: None,
            year: None,
            premiered: None,
            runtime: None,
            plot: None,
            tagline: None,
            genre: Vec::new(),
            country: Vec::new(),
            language: Vec::new(),
            cast: Vec::new(),
            director: Vec::new(),
            writer: Vec::new(),
            studio: Vec::new(),
            network: Vec::new(),
            rating: None,
            votes: None,
            ratings: BTreeMap::new(),
            images: BTreeMap::new(),
            collection: None,
            homepage: None,
            certification: None,
            aired_episodes: None,
            status: None,
            seasons: Vec::new(),
        }
    }

    /// Skeleton built from what a menu already knows about the item.
    pub fn from_seed(seed: &cinemeld_core::types::ItemSeed) -> Self {
        let mut r = Self::new(seed.kind, seed.ids.clone());
        r.title = seed.title.clone();
        r.year = seed.year;
        r.season = seed.season;
        r.episode = seed.episode;
        r
    }

    /// Record a provider's own rating.
    pub fn set_provider_rating(&mut self, provider: Provider, rating: Option<f64>, votes: Option<u64>) {
        if let Some(rating) = rating.filter(|r| *r > 0.0) {
            self.ratings.insert(
                provider,
                ProviderRating {
                    rating,
                    votes: votes.unwrap_or(0),
                },
            );
        }
    }

    pub fn add_image(&mut self, kind: ImageType, image: Image) {
        let list = self.images.entry(kind).or_default();
        if !list.iter().any(|i| i.url == image.url) {
            list.push(image);
        }
    }

    /// Best candidate of a type, by the order images were stored in.
    pub fn best_image(&self, kind: ImageType) -> Option<&str> {
        self.images
            .get(&kind)
            .and_then(|l| l.first())
            .map(|i| i.url.as_str())
    }

    /// One URL per image type, as handed to the host.
    pub fn artwork(&self) -> Artwork {
        ImageType::ALL
            .iter()
            .filter_map(|t| self.best_image(*t).map(|u| (t.as_str().to_string(), u.to_string())))
            .collect()
    }

    /// Premiere date, falling back to the first of January of the year.
    pub fn release_date(&self) -> Option<NaiveDate> {
        self.premiered
            .or_else(|| self.year.and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)))
    }

    pub fn season_info(&self, number: u32) -> Option<&SeasonInfo> {
        self.seasons.iter().find(|s| s.number == number)
    }

    pub fn seed(&self) -> cinemeld_core::types::ItemSeed {
        let mut seed = cinemeld_core::types::ItemSeed::new(self.kind, self.ids.clone());
        seed.title = self.title.clone();
        seed.year = self.year;
        seed.season = self.season;
        seed.episode = self.episode;
        seed
    }
}
