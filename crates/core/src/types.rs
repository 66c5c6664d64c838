use serde::{Deserialize, Serialize};

/// Navigation granularity of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Show,
    Season,
    Episode,
    Person,
    Set,
    List,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Show => "show",
            Self::Season => "season",
            Self::Episode => "episode",
            Self::Person => "person",
            Self::Set => "set",
            Self::List => "list",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "movie" | "movies" => Some(Self::Movie),
            "show" | "shows" | "tvshow" => Some(Self::Show),
            "season" | "seasons" => Some(Self::Season),
            "episode" | "episodes" => Some(Self::Episode),
            "person" | "people" => Some(Self::Person),
            "set" => Some(Self::Set),
            "list" => Some(Self::List),
            _ => None,
        }
    }

    /// Plural form used in provider paths (`sync/watched/movies`).
    pub fn plural(self) -> &'static str {
        match self {
            Self::Movie => "movies",
            Self::Show => "shows",
            Self::Season => "seasons",
            Self::Episode => "episodes",
            Self::Person => "people",
            Self::Set => "sets",
            Self::List => "lists",
        }
    }

    /// Whether the item belongs to a show hierarchy.
    pub fn is_episodic(self) -> bool {
        matches!(self, Self::Show | Self::Season | Self::Episode)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of external identifier carried in an [`IdBundle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    Trakt,
    Imdb,
    Tmdb,
    Tvdb,
    Slug,
}

impl IdType {
    /// Order in which id types are tried during lookups.
    pub const LOOKUP_ORDER: [IdType; 4] = [Self::Trakt, Self::Imdb, Self::Tmdb, Self::Tvdb];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trakt => "trakt",
            Self::Imdb => "imdb",
            Self::Tmdb => "tmdb",
            Self::Tvdb => "tvdb",
            Self::Slug => "slug",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "trakt" => Some(Self::Trakt),
            "imdb" => Some(Self::Imdb),
            "tmdb" => Some(Self::Tmdb),
            "tvdb" => Some(Self::Tvdb),
            "slug" => Some(Self::Slug),
            _ => None,
        }
    }
}

impl std::fmt::Display for IdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of external identifiers for an item. Canonical join key across stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trakt: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imdb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmdb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvdb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

impl IdBundle {
    pub fn imdb(id: impl Into<String>) -> Self {
        Self {
            imdb: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn tmdb(id: u64) -> Self {
        Self {
            tmdb: Some(id),
            ..Default::default()
        }
    }

    pub fn trakt(id: u64) -> Self {
        Self {
            trakt: Some(id),
            ..Default::default()
        }
    }

    /// True when no external id is present. The slug alone does not identify an item.
    pub fn is_empty(&self) -> bool {
        self.trakt.is_none() && self.imdb.is_none() && self.tmdb.is_none() && self.tvdb.is_none()
    }

    pub fn has_primary(&self) -> bool {
        self.trakt.is_some()
    }

    /// The id of the given type rendered as a string.
    pub fn get(&self, id_type: IdType) -> Option<String> {
        match id_type {
            IdType::Trakt => self.trakt.map(|v| v.to_string()),
            IdType::Imdb => self.imdb.clone(),
            IdType::Tmdb => self.tmdb.map(|v| v.to_string()),
            IdType::Tvdb => self.tvdb.map(|v| v.to_string()),
            IdType::Slug => self.slug.clone(),
        }
    }

    /// Set an id from its string form. Numeric ids that fail to parse are ignored.
    pub fn set(&mut self, id_type: IdType, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        match id_type {
            IdType::Trakt => self.trakt = value.parse().ok().or(self.trakt),
            IdType::Imdb => self.imdb = Some(value.to_string()),
            IdType::Tmdb => self.tmdb = value.parse().ok().or(self.tmdb),
            IdType::Tvdb => self.tvdb = value.parse().ok().or(self.tvdb),
            IdType::Slug => self.slug = Some(value.to_string()),
        }
    }

    /// Fill ids missing here from `other`. Present ids are kept.
    pub fn fill_from(&mut self, other: &IdBundle) {
        if self.trakt.is_none() {
            self.trakt = other.trakt;
        }
        if self.imdb.is_none() {
            self.imdb.clone_from(&other.imdb);
        }
        if self.tmdb.is_none() {
            self.tmdb = other.tmdb;
        }
        if self.tvdb.is_none() {
            self.tvdb = other.tvdb;
        }
        if self.slug.is_none() {
            self.slug.clone_from(&other.slug);
        }
    }

    /// Present ids as (type, value) pairs in lookup order.
    pub fn pairs(&self) -> Vec<(IdType, String)> {
        IdType::LOOKUP_ORDER
            .iter()
            .filter_map(|t| self.get(*t).map(|v| (*t, v)))
            .collect()
    }

    /// True when both bundles carry an id of the same type with different values.
    pub fn conflicts_with(&self, other: &IdBundle) -> bool {
        IdType::LOOKUP_ORDER.iter().any(|t| match (self.get(*t), other.get(*t)) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        })
    }

    /// True when both bundles share at least one id.
    pub fn matches(&self, other: &IdBundle) -> bool {
        IdType::LOOKUP_ORDER.iter().any(|t| match (self.get(*t), other.get(*t)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        })
    }

    /// Stable key built from the first available id, e.g. `imdb:tt0111161`.
    pub fn key(&self) -> Option<String> {
        IdType::LOOKUP_ORDER
            .iter()
            .find_map(|t| self.get(*t).map(|v| format!("{t}:{v}")))
            .or_else(|| self.slug.as_ref().map(|s| format!("slug:{s}")))
    }
}

/// Watch-state categories kept in sync with the tracking service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCategory {
    History,
    Progress,
    Rating,
}

impl SyncCategory {
    pub const ALL: [SyncCategory; 3] = [Self::History, Self::Progress, Self::Rating];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Progress => "progress",
            Self::Rating => "rating",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "history" => Some(Self::History),
            "progress" => Some(Self::Progress),
            "rating" => Some(Self::Rating),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal description of an item as it first appears in a menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSeed {
    pub kind: MediaKind,
    #[serde(default)]
    pub ids: IdBundle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    /// Ids of the parent show for seasons and episodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_ids: Option<IdBundle>,
}

impl ItemSeed {
    pub fn new(kind: MediaKind, ids: IdBundle) -> Self {
        Self {
            kind,
            ids,
            title: None,
            year: None,
            season: None,
            episode: None,
            show_ids: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>, year: Option<i32>) -> Self {
        self.title = Some(title.into());
        self.year = year;
        self
    }

    pub fn episode_of(show_ids: IdBundle, season: u32, episode: u32) -> Self {
        Self {
            kind: MediaKind::Episode,
            ids: IdBundle::default(),
            title: None,
            year: None,
            season: Some(season),
            episode: Some(episode),
            show_ids: Some(show_ids),
        }
    }

    /// Flat command parameters: `media`, the ids under their type name, the
    /// show ids prefixed with `show_`, then title, year, season and episode.
    pub fn params(&self) -> std::collections::BTreeMap<String, String> {
        let mut out = std::collections::BTreeMap::new();
        out.insert("media".into(), self.kind.as_str().into());
        for (id_type, value) in self.ids.pairs() {
            out.insert(id_type.as_str().into(), value);
        }
        if let Some(show) = &self.show_ids {
            for (id_type, value) in show.pairs() {
                out.insert(format!("show_{id_type}"), value);
            }
        }
        if let Some(title) = &self.title {
            out.insert("title".into(), title.clone());
        }
        if let Some(year) = self.year {
            out.insert("year".into(), year.to_string());
        }
        if let Some(season) = self.season {
            out.insert("season".into(), season.to_string());
        }
        if let Some(episode) = self.episode {
            out.insert("episode".into(), episode.to_string());
        }
        out
    }

    /// The following episode of the same season.
    pub fn next_episode(&self) -> Option<Self> {
        if self.kind != MediaKind::Episode {
            return None;
        }
        let show = self.show_ids.clone()?;
        Some(Self::episode_of(show, self.season?, self.episode? + 1))
    }

    /// Key used for per-item locks and de-duplication.
    pub fn key(&self) -> String {
        let base = self
            .ids
            .key()
            .or_else(|| self.show_ids.as_ref().and_then(|s| s.key()))
            .unwrap_or_else(|| {
                format!(
                    "title:{}:{}",
                    self.title.as_deref().unwrap_or_default().to_lowercase(),
                    self.year.unwrap_or_default()
                )
            });
        match (self.season, self.episode) {
            (Some(s), Some(e)) => format!("{}:{base}:s{s}e{e}", self.kind),
            (Some(s), None) => format!("{}:{base}:s{s}", self.kind),
            _ => format!("{}:{base}", self.kind),
        }
    }
}
