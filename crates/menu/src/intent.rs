//! Menu requests as they travel through host commands.

use std::collections::BTreeMap;

use cinemeld_core::types::{IdBundle, IdType, ItemSeed, MediaKind};
use cinemeld_metadata::aggregator::QuickPolicy;

use crate::MenuError;

/// Which catalogue answers a discover query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Catalogue {
    #[default]
    Imdb,
    Tmdb,
}

impl Catalogue {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Imdb => "imdb",
            Self::Tmdb => "tmdb",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "imdb" => Some(Self::Imdb),
            "tmdb" => Some(Self::Tmdb),
            _ => None,
        }
    }
}

/// Filter substituted into a discover template.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiscoverFilter {
    pub catalogue: Catalogue,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub certificate: Option<String>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub company: Option<String>,
    pub keyword: Option<String>,
    /// TMDb person id; their filmography.
    pub person: Option<u64>,
    pub min_rating: Option<f64>,
    pub min_votes: Option<u32>,
}

impl DiscoverFilter {
    fn from_params(params: &BTreeMap<String, String>) -> Result<Self, MenuError> {
        let catalogue = match params.get("catalogue") {
            Some(c) => Catalogue::from_str(c)
                .ok_or_else(|| MenuError::InvalidRequest(format!("unknown catalogue {c}")))?,
            None => Catalogue::default(),
        };
        Ok(Self {
            catalogue,
            genre: text(params, "genre"),
            year: number(params, "year")?,
            certificate: text(params, "certificate"),
            country: text(params, "country"),
            language: text(params, "language"),
            company: text(params, "company"),
            keyword: text(params, "keyword"),
            person: number(params, "person")?,
            min_rating: number(params, "rating")?,
            min_votes: number(params, "votes")?,
        })
    }

    fn write(&self, out: &mut BTreeMap<String, String>) {
        if self.catalogue != Catalogue::default() {
            out.insert("catalogue".into(), self.catalogue.as_str().into());
        }
        let mut put = |k: &str, v: Option<String>| {
            if let Some(v) = v {
                out.insert(k.to_string(), v);
            }
        };
        put("genre", self.genre.clone());
        put("year", self.year.map(|v| v.to_string()));
        put("certificate", self.certificate.clone());
        put("country", self.country.clone());
        put("language", self.language.clone());
        put("company", self.company.clone());
        put("keyword", self.keyword.clone());
        put("person", self.person.map(|v| v.to_string()));
        put("rating", self.min_rating.map(|v| v.to_string()));
        put("votes", self.min_votes.map(|v| v.to_string()));
    }
}

/// Watch-state buckets of the progress menu. `f` is the stored progress
/// fraction and `p` the total number of plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    /// p > 0 or f > 0
    #[default]
    All,
    /// p = 0 and 0 < f <= 0.25
    Started,
    /// p = 0 and 0.25 < f < 0.75
    Partial,
    /// p = 0 and 0.75 <= f < 1
    Conclude,
    /// p = 0 and 0 < f < 1
    Unfinished,
    /// p > 0 and f = 0
    Finished,
    /// p = 1 and f = 0
    Rewatch,
    /// p > 0 and f > 0
    Rewatching,
    /// p > 1
    Rewatched,
}

impl ProgressMode {
    pub const ALL: [ProgressMode; 9] = [
        Self::All,
        Self::Started,
        Self::Partial,
        Self::Conclude,
        Self::Unfinished,
        Self::Finished,
        Self::Rewatch,
        Self::Rewatching,
        Self::Rewatched,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Started => "started",
            Self::Partial => "partial",
            Self::Conclude => "conclude",
            Self::Unfinished => "unfinished",
            Self::Finished => "finished",
            Self::Rewatch => "rewatch",
            Self::Rewatching => "rewatching",
            Self::Rewatched => "rewatched",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }

    pub fn matches(self, plays: u32, f: f64) -> bool {
        let started = f > 0.0;
        match self {
            Self::All => plays > 0 || started,
            Self::Started => plays == 0 && started && f <= 0.25,
            Self::Partial => plays == 0 && f > 0.25 && f < 0.75,
            Self::Conclude => plays == 0 && (0.75..1.0).contains(&f),
            Self::Unfinished => plays == 0 && started && f < 1.0,
            Self::Finished => plays > 0 && !started,
            Self::Rewatch => plays == 1 && !started,
            Self::Rewatching => plays > 0 && started,
            Self::Rewatched => plays > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Discover(DiscoverFilter),
    /// New releases from both catalogues.
    Arrivals,
    Popular,
    Trending,
    Progress(ProgressMode),
    Quick,
    Search { query: String },
    Explore,
    /// One random pick from a discover page.
    Random(DiscoverFilter),
    Awards { group: String },
    Rated,
    Persons { query: Option<String> },
    Watchlist,
    History,
    Seasons { show: IdBundle },
    Episodes { show: IdBundle, season: u32 },
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discover(_) => "discover",
            Self::Arrivals => "arrivals",
            Self::Popular => "popular",
            Self::Trending => "trending",
            Self::Progress(_) => "progress",
            Self::Quick => "quick",
            Self::Search { .. } => "search",
            Self::Explore => "explore",
            Self::Random(_) => "random",
            Self::Awards { .. } => "awards",
            Self::Rated => "rated",
            Self::Persons { .. } => "persons",
            Self::Watchlist => "watchlist",
            Self::History => "history",
            Self::Seasons { .. } => "seasons",
            Self::Episodes { .. } => "episodes",
        }
    }

    /// Intents that need a signed-in Trakt account.
    pub fn needs_account(&self) -> bool {
        matches!(
            self,
            Self::Progress(_) | Self::Rated | Self::Watchlist | Self::History
        )
    }
}

/// A menu pass: what to list, for which media, and which page.
#[derive(Debug, Clone, PartialEq)]
pub struct MenuRequest {
    pub kind: MediaKind,
    pub intent: Intent,
    /// 1-based.
    pub page: u32,
    /// Overrides the configured enrichment policy.
    pub quick: Option<QuickPolicy>,
}

impl MenuRequest {
    pub fn new(kind: MediaKind, intent: Intent) -> Self {
        Self {
            kind,
            intent,
            page: 1,
            quick: None,
        }
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    /// The same request one page further.
    pub fn next(&self) -> Self {
        let mut next = self.clone();
        next.page = self.page + 1;
        next
    }

    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self, MenuError> {
        let kind = match params.get("media").map(String::as_str) {
            None => MediaKind::Movie,
            Some(m) => match MediaKind::from_str(m) {
                Some(k @ (MediaKind::Movie | MediaKind::Show | MediaKind::Person)) => k,
                Some(MediaKind::Season | MediaKind::Episode) => MediaKind::Show,
                _ => return Err(MenuError::InvalidRequest(format!("unknown media {m}"))),
            },
        };
        let name = params.get("intent").map(String::as_str).unwrap_or("discover");
        let intent = match name {
            "discover" => Intent::Discover(DiscoverFilter::from_params(params)?),
            "arrivals" | "home" => Intent::Arrivals,
            "popular" => Intent::Popular,
            "trending" => Intent::Trending,
            "progress" => {
                let mode = params.get("mode").map(String::as_str).unwrap_or("all");
                Intent::Progress(
                    ProgressMode::from_str(mode)
                        .ok_or_else(|| MenuError::InvalidRequest(format!("unknown progress mode {mode}")))?,
                )
            }
            "quick" => Intent::Quick,
            "search" => Intent::Search {
                query: text(params, "query")
                    .ok_or_else(|| MenuError::InvalidRequest("search without a query".into()))?,
            },
            "explore" => Intent::Explore,
            "random" => Intent::Random(DiscoverFilter::from_params(params)?),
            "awards" => Intent::Awards {
                group: text(params, "group")
                    .ok_or_else(|| MenuError::InvalidRequest("awards without a group".into()))?,
            },
            "rated" => Intent::Rated,
            "persons" => Intent::Persons {
                query: text(params, "query"),
            },
            "watchlist" => Intent::Watchlist,
            "history" => Intent::History,
            "seasons" => Intent::Seasons {
                show: required_ids(params, "")?,
            },
            "episodes" => Intent::Episodes {
                show: required_ids(params, "")?,
                season: number(params, "season")?
                    .ok_or_else(|| MenuError::InvalidRequest("episodes without a season".into()))?,
            },
            other => return Err(MenuError::InvalidRequest(format!("unknown intent {other}"))),
        };
        let page = number::<u32>(params, "page")?.unwrap_or(1).max(1);
        let quick = params
            .get("quick")
            .map(|q| QuickPolicy::from_param(Some(q.as_str())));
        Ok(Self {
            kind,
            intent,
            page,
            quick,
        })
    }

    pub fn to_params(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert("intent".into(), self.intent.name().into());
        out.insert("media".into(), self.kind.as_str().into());
        if self.page > 1 {
            out.insert("page".into(), self.page.to_string());
        }
        match &self.intent {
            Intent::Discover(filter) | Intent::Random(filter) => filter.write(&mut out),
            Intent::Progress(mode) => {
                out.insert("mode".into(), mode.as_str().into());
            }
            Intent::Search { query } => {
                out.insert("query".into(), query.clone());
            }
            Intent::Persons { query: Some(query) } => {
                out.insert("query".into(), query.clone());
            }
            Intent::Awards { group } => {
                out.insert("group".into(), group.clone());
            }
            Intent::Seasons { show } => write_ids(show, "", &mut out),
            Intent::Episodes { show, season } => {
                write_ids(show, "", &mut out);
                out.insert("season".into(), season.to_string());
            }
            _ => {}
        }
        if let Some(quick) = self.quick.and_then(quick_param) {
            out.insert("quick".into(), quick);
        }
        out
    }
}

/// Command parameters that identify one item.
pub fn seed_params(seed: &ItemSeed) -> BTreeMap<String, String> {
    seed.params()
}

pub fn seed_from_params(params: &BTreeMap<String, String>) -> Result<ItemSeed, MenuError> {
    let media = params.get("media").map(String::as_str).unwrap_or("movie");
    let kind = MediaKind::from_str(media)
        .ok_or_else(|| MenuError::InvalidRequest(format!("unknown media {media}")))?;
    let ids = read_ids(params, "");
    let show = read_ids(params, "show_");
    let show_ids = (!show.is_empty()).then_some(show);
    if ids.is_empty() && show_ids.is_none() {
        return Err(MenuError::InvalidRequest("item without ids".into()));
    }
    Ok(ItemSeed {
        kind,
        ids,
        title: text(params, "title"),
        year: number(params, "year")?,
        season: number(params, "season")?,
        episode: number(params, "episode")?,
        show_ids,
    })
}

fn write_ids(ids: &IdBundle, prefix: &str, out: &mut BTreeMap<String, String>) {
    for (id_type, value) in ids.pairs() {
        out.insert(format!("{prefix}{id_type}"), value);
    }
}

fn read_ids(params: &BTreeMap<String, String>, prefix: &str) -> IdBundle {
    let mut ids = IdBundle::default();
    for id_type in IdType::LOOKUP_ORDER {
        if let Some(v) = params.get(&format!("{prefix}{id_type}")) {
            ids.set(id_type, v);
        }
    }
    ids
}

fn required_ids(params: &BTreeMap<String, String>, prefix: &str) -> Result<IdBundle, MenuError> {
    let ids = read_ids(params, prefix);
    if ids.is_empty() {
        return Err(MenuError::InvalidRequest("show without ids".into()));
    }
    Ok(ids)
}

fn quick_param(policy: QuickPolicy) -> Option<String> {
    match policy {
        QuickPolicy::Classic => None,
        QuickPolicy::Foreground(n) => Some(n.to_string()),
        QuickPolicy::ForegroundOnly => Some("-1".into()),
        QuickPolicy::CachedOnly => Some("true".into()),
    }
}

fn text(params: &BTreeMap<String, String>, key: &str) -> Option<String> {
    params
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn number<T: std::str::FromStr>(
    params: &BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, MenuError> {
    match text(params, key) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| MenuError::InvalidRequest(format!("{key}={v} is not a number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn progress_modes_partition_by_plays_and_fraction() {
        assert!(ProgressMode::Partial.matches(0, 0.42));
        assert!(!ProgressMode::Partial.matches(0, 0.25));
        assert!(ProgressMode::Started.matches(0, 0.25));
        assert!(ProgressMode::Conclude.matches(0, 0.75));
        assert!(!ProgressMode::Conclude.matches(0, 1.0));
        assert!(ProgressMode::Unfinished.matches(0, 0.9));
        assert!(!ProgressMode::Finished.matches(0, 0.42));
        assert!(ProgressMode::Finished.matches(3, 0.0));
        assert!(ProgressMode::Rewatch.matches(1, 0.0));
        assert!(!ProgressMode::Rewatch.matches(2, 0.0));
        assert!(ProgressMode::Rewatching.matches(1, 0.3));
        assert!(ProgressMode::Rewatched.matches(2, 0.3));
        assert!(!ProgressMode::All.matches(0, 0.0));
    }

    #[test]
    fn request_survives_the_command_line() {
        let req = MenuRequest::from_params(&params(&[
            ("intent", "discover"),
            ("media", "movie"),
            ("year", "2019"),
            ("genre", "horror"),
            ("page", "3"),
        ]))
        .unwrap();
        assert_eq!(req.page, 3);
        let Intent::Discover(filter) = &req.intent else {
            panic!("expected discover");
        };
        assert_eq!(filter.year, Some(2019));
        assert_eq!(MenuRequest::from_params(&req.to_params()).unwrap(), req);
        assert_eq!(req.next().to_params()["page"], "4");
    }

    #[test]
    fn item_params_carry_show_ids() {
        let seed = ItemSeed::episode_of(IdBundle::tmdb(1399), 1, 2);
        let params = seed_params(&seed);
        assert_eq!(params["show_tmdb"], "1399");
        assert_eq!(seed_from_params(&params).unwrap(), seed);

        let req = MenuRequest::new(
            MediaKind::Show,
            Intent::Episodes {
                show: IdBundle::imdb("tt0944947"),
                season: 3,
            },
        );
        assert_eq!(MenuRequest::from_params(&req.to_params()).unwrap(), req);
    }

    #[test]
    fn malformed_requests_are_rejected() {
        assert!(matches!(
            MenuRequest::from_params(&params(&[("intent", "search")])),
            Err(MenuError::InvalidRequest(_))
        ));
        assert!(MenuRequest::from_params(&params(&[("year", "soon")])).is_err());
        assert!(MenuRequest::from_params(&params(&[("intent", "progress"), ("mode", "someday")])).is_err());
    }
}
