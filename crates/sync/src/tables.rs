//! Immutable lookup tables built from Trakt's sync endpoints.
//!
//! Every table indexes its top-level items (movies or shows) by each id
//! type, so lookups cost one hash probe per id type. Seasons and episodes
//! hang off their show.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cinemeld_core::types::{IdBundle, IdType, ItemSeed, MediaKind};
use cinemeld_metadata::trakt::wire::{PlaybackItem, RatedItem, TraktMedia, WatchedItem};

/// Movies, or everything that belongs to a show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Movies,
    Shows,
}

impl Group {
    pub fn of(kind: MediaKind) -> Self {
        if kind.is_episodic() {
            Self::Shows
        } else {
            Self::Movies
        }
    }

    /// Kinds whose activity stamps feed this group.
    pub fn kinds(self) -> &'static [MediaKind] {
        match self {
            Self::Movies => &[MediaKind::Movie],
            Self::Shows => &[MediaKind::Show, MediaKind::Season, MediaKind::Episode],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movies => "movies",
            Self::Shows => "shows",
        }
    }
}

pub trait Keyed {
    fn ids(&self) -> &IdBundle;
}

/// Entries indexed by every id type they carry.
#[derive(Debug, Clone)]
pub struct IdTable<T> {
    entries: Vec<T>,
    index: HashMap<IdType, HashMap<String, usize>>,
}

impl<T> Default for IdTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Keyed> IdTable<T> {
    pub fn build(entries: Vec<T>) -> Self {
        let mut index: HashMap<IdType, HashMap<String, usize>> = HashMap::new();
        for (pos, entry) in entries.iter().enumerate() {
            let ids = entry.ids();
            let typed = IdType::LOOKUP_ORDER
                .iter()
                .chain(std::iter::once(&IdType::Slug))
                .filter_map(|t| ids.get(*t).map(|v| (*t, v)));
            for (id_type, value) in typed {
                index.entry(id_type).or_default().entry(value).or_insert(pos);
            }
        }
        Self { entries, index }
    }

    /// First hit in lookup order; the slug is tried only when no id matches.
    pub fn get(&self, ids: &IdBundle) -> Option<&T> {
        IdType::LOOKUP_ORDER
            .iter()
            .chain(std::iter::once(&IdType::Slug))
            .find_map(|t| {
                let value = ids.get(*t)?;
                self.index.get(t)?.get(&value)
            })
            .map(|pos| &self.entries[*pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub kind: MediaKind,
    pub ids: IdBundle,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Every play, rewatches included.
    pub plays: u32,
    /// Distinct items played: 1 for a watched movie or episode, the number
    /// of watched episodes for seasons and shows.
    pub plays_unique: u32,
    pub last_watched_at: Option<DateTime<Utc>>,
    pub watched_at: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEntry {
    pub kind: MediaKind,
    pub ids: IdBundle,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Fraction in [0, 1].
    pub progress: f64,
    pub paused_at: Option<DateTime<Utc>>,
    /// Id of the remote playback row, used to clear it.
    pub playback_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingEntry {
    pub kind: MediaKind,
    pub ids: IdBundle,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// 1 to 10.
    pub rating: u8,
    pub rated_at: Option<DateTime<Utc>>,
}

impl Keyed for HistoryEntry {
    fn ids(&self) -> &IdBundle {
        &self.ids
    }
}

impl Keyed for ProgressEntry {
    fn ids(&self) -> &IdBundle {
        &self.ids
    }
}

impl Keyed for RatingEntry {
    fn ids(&self) -> &IdBundle {
        &self.ids
    }
}

/// One show and the entries below it.
#[derive(Debug, Clone)]
pub struct ShowNode<T> {
    pub ids: IdBundle,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub show: Option<T>,
    pub seasons: BTreeMap<u32, T>,
    pub episodes: BTreeMap<(u32, u32), T>,
}

impl<T> ShowNode<T> {
    pub fn with_ids(ids: IdBundle) -> Self {
        Self {
            ids,
            title: None,
            year: None,
            show: None,
            seasons: BTreeMap::new(),
            episodes: BTreeMap::new(),
        }
    }

    fn new(media: &TraktMedia) -> Self {
        let mut node = Self::with_ids(media.ids.clone().into());
        node.title.clone_from(&media.title);
        node.year = media.year;
        node
    }
}

impl<T> Keyed for ShowNode<T> {
    fn ids(&self) -> &IdBundle {
        &self.ids
    }
}

/// One category's tables. Both halves are shared so a reload of one group
/// leaves the other untouched.
#[derive(Debug, Clone)]
pub struct Category<T> {
    pub movies: Arc<IdTable<T>>,
    pub shows: Arc<IdTable<ShowNode<T>>>,
}

impl<T> Default for Category<T> {
    fn default() -> Self {
        Self {
            movies: Arc::new(IdTable::default()),
            shows: Arc::new(IdTable::default()),
        }
    }
}

impl<T: Keyed> Category<T> {
    /// Seasons and episodes are found through their show's ids.
    pub fn lookup(
        &self,
        kind: MediaKind,
        ids: &IdBundle,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> Option<&T> {
        match kind {
            MediaKind::Movie => self.movies.get(ids),
            MediaKind::Show => self.shows.get(ids)?.show.as_ref(),
            MediaKind::Season => self.shows.get(ids)?.seasons.get(&season?),
            MediaKind::Episode => self.shows.get(ids)?.episodes.get(&(season?, episode?)),
            _ => None,
        }
    }

    pub fn lookup_seed(&self, seed: &ItemSeed) -> Option<&T> {
        let ids = match seed.kind {
            MediaKind::Season | MediaKind::Episode => seed.show_ids.as_ref().unwrap_or(&seed.ids),
            _ => &seed.ids,
        };
        self.lookup(seed.kind, ids, seed.season, seed.episode)
    }
}

/// The three category tables. Replaced as a whole on every reload.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub history: Category<HistoryEntry>,
    pub progress: Category<ProgressEntry>,
    pub rating: Category<RatingEntry>,
}

pub fn history_movies(items: &[WatchedItem]) -> IdTable<HistoryEntry> {
    IdTable::build(
        items
            .iter()
            .filter_map(|item| {
                let movie = item.movie.as_ref()?;
                Some(HistoryEntry {
                    kind: MediaKind::Movie,
                    ids: movie.ids.clone().into(),
                    title: movie.title.clone(),
                    year: movie.year,
                    season: None,
                    episode: None,
                    plays: item.plays,
                    plays_unique: u32::from(item.plays > 0),
                    last_watched_at: item.last_watched_at,
                    watched_at: item.last_watched_at.into_iter().collect(),
                })
            })
            .collect(),
    )
}

pub fn history_shows(items: &[WatchedItem]) -> IdTable<ShowNode<HistoryEntry>> {
    let nodes = items
        .iter()
        .filter_map(|item| {
            let show = item.show.as_ref()?;
            let mut node = ShowNode::new(show);
            let blank = |kind, season, episode| HistoryEntry {
                kind,
                ids: node.ids.clone(),
                title: None,
                year: None,
                season,
                episode,
                plays: 0,
                plays_unique: 0,
                last_watched_at: None,
                watched_at: Vec::new(),
            };

            let mut show_entry = blank(MediaKind::Show, None, None);
            show_entry.title.clone_from(&node.title);
            show_entry.year = node.year;
            let mut seasons = BTreeMap::new();
            let mut episodes = BTreeMap::new();
            for season in &item.seasons {
                let mut season_entry = blank(MediaKind::Season, Some(season.number), None);
                for ep in &season.episodes {
                    let mut entry = blank(MediaKind::Episode, Some(season.number), Some(ep.number));
                    entry.plays = ep.plays;
                    entry.plays_unique = u32::from(ep.plays > 0);
                    entry.last_watched_at = ep.last_watched_at;
                    entry.watched_at = ep.last_watched_at.into_iter().collect();

                    for agg in [&mut season_entry, &mut show_entry] {
                        agg.plays += entry.plays;
                        agg.plays_unique += entry.plays_unique;
                        agg.last_watched_at = agg.last_watched_at.max(entry.last_watched_at);
                    }
                    episodes.insert((season.number, ep.number), entry);
                }
                seasons.insert(season.number, season_entry);
            }
            show_entry.last_watched_at = show_entry.last_watched_at.max(item.last_watched_at);
            node.show = Some(show_entry);
            node.seasons = seasons;
            node.episodes = episodes;
            Some(node)
        })
        .collect();
    IdTable::build(nodes)
}

pub fn progress_movies(items: &[PlaybackItem]) -> IdTable<ProgressEntry> {
    IdTable::build(
        items
            .iter()
            .filter_map(|item| {
                let movie = item.movie.as_ref()?;
                Some(ProgressEntry {
                    kind: MediaKind::Movie,
                    ids: movie.ids.clone().into(),
                    title: movie.title.clone(),
                    year: movie.year,
                    season: None,
                    episode: None,
                    progress: (item.progress / 100.0).clamp(0.0, 1.0),
                    paused_at: item.paused_at,
                    playback_id: Some(item.id),
                })
            })
            .collect(),
    )
}

/// Episode progress grouped by show. The show and season slots hold the most
/// recently paused episode below them.
pub fn progress_shows(items: &[PlaybackItem]) -> IdTable<ShowNode<ProgressEntry>> {
    let mut nodes: Vec<ShowNode<ProgressEntry>> = Vec::new();
    let mut by_show: HashMap<String, usize> = HashMap::new();
    for item in items {
        let (Some(show), Some(ep)) = (&item.show, &item.episode) else {
            continue;
        };
        let ids: IdBundle = show.ids.clone().into();
        let Some(key) = ids.key() else {
            continue;
        };
        let pos = *by_show.entry(key).or_insert_with(|| {
            nodes.push(ShowNode::new(show));
            nodes.len() - 1
        });
        let node = &mut nodes[pos];
        let entry = ProgressEntry {
            kind: MediaKind::Episode,
            ids: node.ids.clone(),
            title: ep.title.clone(),
            year: node.year,
            season: Some(ep.season),
            episode: Some(ep.number),
            progress: (item.progress / 100.0).clamp(0.0, 1.0),
            paused_at: item.paused_at,
            playback_id: Some(item.id),
        };

        let newer = |slot: &Option<&ProgressEntry>| slot.is_none_or(|cur| entry.paused_at > cur.paused_at);
        if newer(&node.seasons.get(&ep.season)) {
            let mut season = entry.clone();
            season.kind = MediaKind::Season;
            node.seasons.insert(ep.season, season);
        }
        if newer(&node.show.as_ref()) {
            let mut show_entry = entry.clone();
            show_entry.kind = MediaKind::Show;
            show_entry.title.clone_from(&node.title);
            node.show = Some(show_entry);
        }
        node.episodes.insert((ep.season, ep.number), entry);
    }
    IdTable::build(nodes)
}

pub fn rating_movies(items: &[RatedItem]) -> IdTable<RatingEntry> {
    IdTable::build(
        items
            .iter()
            .filter_map(|item| {
                let movie = item.movie.as_ref()?;
                Some(RatingEntry {
                    kind: MediaKind::Movie,
                    ids: movie.ids.clone().into(),
                    season: None,
                    episode: None,
                    rating: item.rating,
                    rated_at: item.rated_at,
                })
            })
            .collect(),
    )
}

/// Show, season and episode ratings folded into one tree per show.
pub fn rating_shows(items: &[RatedItem]) -> IdTable<ShowNode<RatingEntry>> {
    let mut nodes: Vec<ShowNode<RatingEntry>> = Vec::new();
    let mut by_show: HashMap<String, usize> = HashMap::new();
    for item in items {
        let Some(show) = &item.show else {
            continue;
        };
        let ids: IdBundle = show.ids.clone().into();
        let Some(key) = ids.key() else {
            continue;
        };
        let pos = *by_show.entry(key).or_insert_with(|| {
            nodes.push(ShowNode::new(show));
            nodes.len() - 1
        });
        let node = &mut nodes[pos];
        let entry = |kind, season, episode| RatingEntry {
            kind,
            ids: ids.clone(),
            season,
            episode,
            rating: item.rating,
            rated_at: item.rated_at,
        };
        match (&item.season, &item.episode) {
            (_, Some(ep)) => {
                node.episodes.insert(
                    (ep.season, ep.number),
                    entry(MediaKind::Episode, Some(ep.season), Some(ep.number)),
                );
            }
            (Some(season), None) => {
                node.seasons
                    .insert(season.number, entry(MediaKind::Season, Some(season.number), None));
            }
            (None, None) => node.show = Some(entry(MediaKind::Show, None, None)),
        }
    }
    IdTable::build(nodes)
}
