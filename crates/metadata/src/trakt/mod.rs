//! Trakt client: sync tables, lists, scrobbling, summaries and id lookups.

pub mod auth;
pub mod wire;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinemeld_core::types::{IdBundle, IdType, ItemSeed, MediaKind, SyncCategory};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

use self::auth::TraktAuth;
use self::wire::{
    PlaybackItem, RatedItem, TraktEntry, TraktEpisode, TraktIds, TraktMedia, TraktSeason,
    UserList, WatchedItem,
};
use crate::http::{Auth, Payload, ProviderHttp, Request};
use crate::provider::MetadataProvider;
use crate::record::MetaRecord;
use crate::text::date_of;
use crate::{MetadataError, Provider};

pub const BASE_URL: &str = "https://api.trakt.tv";

/// Per-kind, per-category stamps from `sync/last_activities`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activities {
    pub all: Option<DateTime<Utc>>,
    stamps: HashMap<(MediaKind, SyncCategory), DateTime<Utc>>,
}

impl Activities {
    pub fn parse(body: &Value) -> Self {
        let stamp = |group: &str, field: &str| {
            body.get(group)
                .and_then(|g| g.get(field))
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
        };

        let mut stamps = HashMap::new();
        let mut put = |kind, category, value: Option<DateTime<Utc>>| {
            if let Some(v) = value {
                stamps.insert((kind, category), v);
            }
        };
        put(MediaKind::Movie, SyncCategory::History, stamp("movies", "watched_at"));
        put(MediaKind::Movie, SyncCategory::Progress, stamp("movies", "paused_at"));
        put(MediaKind::Movie, SyncCategory::Rating, stamp("movies", "rated_at"));
        for kind in [MediaKind::Show, MediaKind::Season, MediaKind::Episode] {
            put(kind, SyncCategory::History, stamp("episodes", "watched_at"));
            put(kind, SyncCategory::Progress, stamp("episodes", "paused_at"));
        }
        put(MediaKind::Show, SyncCategory::Rating, stamp("shows", "rated_at"));
        put(MediaKind::Season, SyncCategory::Rating, stamp("seasons", "rated_at"));
        put(MediaKind::Episode, SyncCategory::Rating, stamp("episodes", "rated_at"));

        Self {
            all: body
                .get("all")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
            stamps,
        }
    }

    pub fn get(&self, kind: MediaKind, category: SyncCategory) -> Option<DateTime<Utc>> {
        self.stamps.get(&(kind, category)).copied()
    }

    pub fn set(&mut self, kind: MediaKind, category: SyncCategory, at: DateTime<Utc>) {
        self.stamps.insert((kind, category), at);
    }
}

/// A 1-based page window. Endpoints that return a full list are sliced
/// client-side with the same window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(number: u32, limit: u32) -> Self {
        Self {
            number: number.max(1),
            limit: limit.max(1),
        }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(1, limit)
    }

    pub fn next(self) -> Self {
        Self::new(self.number + 1, self.limit)
    }

    /// Items of this page and whether more remain after it.
    pub fn slice<T>(self, items: Vec<T>) -> (Vec<T>, bool) {
        let start = ((self.number - 1) * self.limit) as usize;
        let end = start + self.limit as usize;
        let more = items.len() > end;
        let page = items.into_iter().skip(start).take(self.limit as usize).collect();
        (page, more)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedPage {
    pub items: Vec<ItemSeed>,
    pub page: u32,
    pub has_more: bool,
}

/// Lists served by Trakt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    Trending,
    Popular,
    Anticipated,
    Recommendations,
    Watchlist,
    Collection,
    UserList { user: String, slug: String },
}

impl Listing {
    fn paged(&self) -> bool {
        matches!(self, Self::Trending | Self::Popular | Self::Anticipated)
    }

    fn path(&self, kind: MediaKind) -> String {
        let kinds = kind.plural();
        match self {
            Self::Trending => format!("{kinds}/trending"),
            Self::Popular => format!("{kinds}/popular"),
            Self::Anticipated => format!("{kinds}/anticipated"),
            Self::Recommendations => format!("recommendations/{kinds}"),
            Self::Watchlist => format!("sync/watchlist/{kinds}"),
            Self::Collection => format!("sync/collection/{kinds}"),
            Self::UserList { user, slug } => format!("users/{user}/lists/{slug}/items/{kinds}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMethod {
    Post,
    Delete,
}

impl MutationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Some(Self::Post),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A mutating request; stored verbatim in the retry queue when it fails.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub method: MutationMethod,
    pub path: String,
    pub body: Option<Value>,
}

impl Mutation {
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: MutationMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: MutationMethod::Delete,
            path: path.into(),
            body: None,
        }
    }

    fn request(&self) -> Request {
        match self.method {
            MutationMethod::Post => Request::post(&self.path, self.body.clone().unwrap_or(Value::Null)),
            MutationMethod::Delete => Request::delete(&self.path),
        }
    }
}

/// Body for `sync/*` endpoints addressing one item. Seasons and episodes are
/// nested under their show.
pub fn sync_body(seed: &ItemSeed, extra: Map<String, Value>) -> Value {
    let with = |mut base: Map<String, Value>| {
        base.extend(extra.clone());
        Value::Object(base)
    };
    let ids = |bundle: &IdBundle| json!(TraktIds::from(bundle));
    match seed.kind {
        MediaKind::Movie => json!({ "movies": [with(obj("ids", ids(&seed.ids)))] }),
        MediaKind::Show => json!({ "shows": [with(obj("ids", ids(&seed.ids)))] }),
        MediaKind::Season | MediaKind::Episode => {
            let show = seed.show_ids.as_ref().unwrap_or(&seed.ids);
            let season_no = seed.season.unwrap_or(1);
            let season = match seed.episode {
                Some(n) => json!({ "number": season_no, "episodes": [with(obj("number", json!(n)))] }),
                None => with(obj("number", json!(season_no))),
            };
            json!({ "shows": [{ "ids": ids(show), "seasons": [season] }] })
        }
        _ => json!({}),
    }
}

/// Body for `scrobble/{start|pause|stop}`; `progress` is a percentage.
pub fn scrobble_body(seed: &ItemSeed, progress: f64) -> Value {
    let progress = (progress * 100.0).round() / 100.0;
    match seed.kind {
        MediaKind::Episode => {
            let show = seed.show_ids.as_ref().unwrap_or(&seed.ids);
            json!({
                "show": { "ids": TraktIds::from(show) },
                "episode": { "season": seed.season, "number": seed.episode },
                "progress": progress,
            })
        }
        _ => json!({ "movie": { "ids": TraktIds::from(&seed.ids) }, "progress": progress }),
    }
}

fn obj(key: &str, value: Value) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert(key.to_string(), value);
    m
}

/// Entries arrive either wrapped (`{ "movie": {..}, "watchers": 3 }`) or as
/// bare media objects, depending on the endpoint.
fn seeds_of(body: Value, kind: MediaKind) -> Vec<ItemSeed> {
    let Value::Array(items) = body else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| {
            let wrapped = ["movie", "show", "episode", "person"]
                .iter()
                .any(|k| item.get(*k).is_some());
            if wrapped {
                serde_json::from_value::<TraktEntry>(item).ok()?.seed()
            } else {
                serde_json::from_value::<TraktMedia>(item)
                    .ok()
                    .map(|m| m.to_seed(kind))
            }
        })
        .collect()
}

fn season_record(season: &TraktSeason) -> MetaRecord {
    let mut record = MetaRecord::new(MediaKind::Season, season.ids.clone().into());
    record.season = Some(season.number);
    record.plot.clone_from(&season.overview);
    record.premiered = season.first_aired.as_deref().and_then(date_of);
    record.year = record.premiered.map(|d| chrono::Datelike::year(&d));
    record.aired_episodes = season.aired_episodes;
    record.set_provider_rating(Provider::Trakt, season.rating, season.votes);
    record
}

/// Account-side Trakt operations used by the sync layer and the menus.
#[async_trait]
pub trait TraktApi: Send + Sync {
    async fn last_activities(&self) -> Result<Activities, MetadataError>;
    /// `kind` is movie or show; shows carry their watched seasons.
    async fn watched(&self, kind: MediaKind) -> Result<Vec<WatchedItem>, MetadataError>;
    /// `kind` is movie or episode.
    async fn playback(&self, kind: MediaKind) -> Result<Vec<PlaybackItem>, MetadataError>;
    async fn ratings(&self, kind: MediaKind) -> Result<Vec<RatedItem>, MetadataError>;
    async fn submit(&self, mutation: &Mutation) -> Result<(), MetadataError>;
    async fn history(&self, kind: MediaKind, page: Page) -> Result<SeedPage, MetadataError>;
    async fn listing(
        &self,
        kind: MediaKind,
        listing: &Listing,
        page: Page,
    ) -> Result<SeedPage, MetadataError>;
    async fn my_lists(&self) -> Result<Vec<UserList>, MetadataError>;
    async fn is_authenticated(&self) -> bool;
}

pub struct TraktClient {
    http: ProviderHttp,
    auth: Arc<TraktAuth>,
}

impl TraktClient {
    pub fn new(base: &str, auth: Arc<TraktAuth>) -> Self {
        let http = ProviderHttp::new("trakt", base, Auth::Bearer(auth.clone()))
            .with_header("trakt-api-version", "2")
            .with_header("trakt-api-key", auth.client_id());
        Self { http, auth }
    }

    pub fn auth(&self) -> &Arc<TraktAuth> {
        &self.auth
    }

    pub fn http(&self) -> &ProviderHttp {
        &self.http
    }

    async fn decode<T: DeserializeOwned>(&self, req: &Request) -> Result<T, MetadataError> {
        let resp = self.http.json(req).await?;
        serde_json::from_value(resp.body).map_err(|e| MetadataError::Data {
            provider: "trakt",
            message: e.to_string(),
        })
    }

    /// Path id for an item: trakt, then slug, then imdb.
    fn path_id(ids: &IdBundle) -> Option<String> {
        ids.trakt
            .map(|t| t.to_string())
            .or_else(|| ids.slug.clone())
            .or_else(|| ids.imdb.clone())
    }

    async fn summary(&self, kind: MediaKind, id: &str) -> Result<MetaRecord, MetadataError> {
        let media: TraktMedia = self
            .decode(
                &Request::get(format!("{}/{id}", kind.plural()))
                    .query("extended", "full")
                    .public(),
            )
            .await?;
        Ok(media.to_record(kind))
    }

    async fn season(&self, show: &IdBundle, number: u32) -> Result<Option<MetaRecord>, MetadataError> {
        let Some(id) = Self::path_id(show) else {
            return Ok(None);
        };
        let seasons: Vec<TraktSeason> = self
            .decode(
                &Request::get(format!("shows/{id}/seasons"))
                    .query("extended", "full")
                    .public(),
            )
            .await?;
        Ok(seasons
            .iter()
            .find(|s| s.number == number)
            .map(season_record))
    }

    async fn episode(
        &self,
        show: &IdBundle,
        season: u32,
        episode: u32,
    ) -> Result<Option<MetaRecord>, MetadataError> {
        let Some(id) = Self::path_id(show) else {
            return Ok(None);
        };
        let ep: TraktEpisode = self
            .decode(
                &Request::get(format!("shows/{id}/seasons/{season}/episodes/{episode}"))
                    .query("extended", "full")
                    .public(),
            )
            .await?;
        Ok(Some(ep.to_record()))
    }

    async fn lookup(&self, id_type: IdType, id: &str, kind: MediaKind) -> Result<Vec<TraktEntry>, MetadataError> {
        self.decode(
            &Request::get(format!("search/{}/{id}", id_type.as_str()))
                .query("type", kind.as_str())
                .public(),
        )
        .await
    }
}

#[async_trait]
impl TraktApi for TraktClient {
    async fn last_activities(&self) -> Result<Activities, MetadataError> {
        let resp = self.http.json(&Request::get("sync/last_activities")).await?;
        Ok(Activities::parse(&resp.body))
    }

    async fn watched(&self, kind: MediaKind) -> Result<Vec<WatchedItem>, MetadataError> {
        let kinds = if kind.is_episodic() { "shows" } else { "movies" };
        self.decode(&Request::get(format!("sync/watched/{kinds}")).payload(Payload::Large))
            .await
    }

    async fn playback(&self, kind: MediaKind) -> Result<Vec<PlaybackItem>, MetadataError> {
        let kinds = if kind.is_episodic() { "episodes" } else { "movies" };
        self.decode(&Request::get(format!("sync/playback/{kinds}")).payload(Payload::Medium))
            .await
    }

    async fn ratings(&self, kind: MediaKind) -> Result<Vec<RatedItem>, MetadataError> {
        self.decode(
            &Request::get(format!("sync/ratings/{}", kind.plural())).payload(Payload::Medium),
        )
        .await
    }

    async fn submit(&self, mutation: &Mutation) -> Result<(), MetadataError> {
        debug!(method = mutation.method.as_str(), path = %mutation.path, "trakt mutation");
        let resp = self.http.send(&mutation.request()).await?;
        self.http.check(&resp)
    }

    async fn history(&self, kind: MediaKind, page: Page) -> Result<SeedPage, MetadataError> {
        let resp = self
            .http
            .json(
                &Request::get(format!("sync/history/{}", kind.plural()))
                    .query("page", page.number)
                    .query("limit", page.limit),
            )
            .await?;
        let has_more = resp.page_count().is_some_and(|n| n > page.number);
        Ok(SeedPage {
            items: seeds_of(resp.body, kind),
            page: page.number,
            has_more,
        })
    }

    async fn listing(
        &self,
        kind: MediaKind,
        listing: &Listing,
        page: Page,
    ) -> Result<SeedPage, MetadataError> {
        let mut req = Request::get(listing.path(kind)).payload(Payload::Medium);
        if listing.paged() {
            req = req.query("page", page.number).query("limit", page.limit).public();
            let resp = self.http.json(&req).await?;
            let has_more = resp.page_count().is_some_and(|n| n > page.number);
            return Ok(SeedPage {
                items: seeds_of(resp.body, kind),
                page: page.number,
                has_more,
            });
        }
        if *listing == Listing::Recommendations {
            req = req.query("limit", page.number * page.limit);
        }
        let resp = self.http.json(&req).await?;
        let (items, has_more) = page.slice(seeds_of(resp.body, kind));
        Ok(SeedPage {
            items,
            page: page.number,
            has_more,
        })
    }

    async fn my_lists(&self) -> Result<Vec<UserList>, MetadataError> {
        self.decode(&Request::get("users/me/lists")).await
    }

    async fn is_authenticated(&self) -> bool {
        !self.http.auth_disabled() && self.auth.is_authenticated().await
    }
}

#[async_trait]
impl MetadataProvider for TraktClient {
    fn provider(&self) -> Provider {
        Provider::Trakt
    }

    async fn fetch(&self, seed: &ItemSeed, _full: bool) -> Result<Option<MetaRecord>, MetadataError> {
        match seed.kind {
            MediaKind::Movie | MediaKind::Show => {
                let Some(id) = Self::path_id(&seed.ids) else {
                    return Ok(None);
                };
                self.summary(seed.kind, &id).await.map(Some)
            }
            MediaKind::Season => {
                let (Some(show), Some(n)) = (&seed.show_ids, seed.season) else {
                    return Ok(None);
                };
                self.season(show, n).await
            }
            MediaKind::Episode => {
                let (Some(show), Some(s), Some(e)) = (&seed.show_ids, seed.season, seed.episode)
                else {
                    return Ok(None);
                };
                self.episode(show, s, e).await
            }
            _ => Ok(None),
        }
    }

    async fn resolve(&self, seed: &ItemSeed) -> Result<Option<IdBundle>, MetadataError> {
        let kind = match seed.kind {
            MediaKind::Movie | MediaKind::Show | MediaKind::Episode | MediaKind::Person => seed.kind,
            _ => return Ok(None),
        };
        for id_type in [IdType::Imdb, IdType::Tmdb, IdType::Tvdb, IdType::Trakt] {
            let Some(id) = seed.ids.get(id_type) else {
                continue;
            };
            let entries = match self.lookup(id_type, &id, kind).await {
                Ok(entries) => entries,
                Err(MetadataError::NotFound) => continue,
                Err(e) => return Err(e),
            };
            if let Some(found) = entries.iter().filter_map(TraktEntry::seed).next() {
                return Ok(Some(found.ids));
            }
        }

        let Some(title) = seed.title.as_deref() else {
            return Ok(None);
        };
        let hits = self.search(kind, title, seed.year).await?;
        Ok(hits
            .into_iter()
            .find(|hit| seed.year.is_none() || hit.year == seed.year)
            .map(|hit| hit.ids))
    }

    async fn search(
        &self,
        kind: MediaKind,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<ItemSeed>, MetadataError> {
        let resp = self
            .http
            .json(
                &Request::get(format!("search/{}", kind.as_str()))
                    .query("query", query)
                    .query_opt("years", year)
                    .query("extended", "full")
                    .public(),
            )
            .await?;
        Ok(seeds_of(resp.body, kind))
    }
}
