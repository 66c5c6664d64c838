use std::sync::{Arc, Mutex};

use chrono::Utc;
use cinemeld_core::host::Directory;
use cinemeld_core::types::{IdBundle, ItemSeed, MediaKind};
use cinemeld_metadata::MetaRecord;
use cinemeld_metadata::aggregator::MetaAggregator;
use cinemeld_metadata::imdb::{ImdbClient, ImdbQuery};
use cinemeld_metadata::merge::aggregate_rating;
use cinemeld_metadata::tmdb::{DiscoverQuery, TmdbClient};
use cinemeld_metadata::trakt::{Listing, Page};
use cinemeld_sync::{Group, TraktStore};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::intent::{Catalogue, DiscoverFilter, Intent, MenuRequest, ProgressMode};
use crate::quick::{self, QuickSource};
use crate::{MenuConfig, MenuError, arrivals, explore, render, search};

#[derive(Debug, Clone, PartialEq)]
pub enum MenuEntry {
    Item(MetaRecord),
    /// A sub-menu.
    Folder { label: String, request: MenuRequest },
}

/// One rendered menu pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MenuPage {
    pub request: MenuRequest,
    pub entries: Vec<MenuEntry>,
    /// Cursor of the following page, if there is one.
    pub next: Option<MenuRequest>,
}

impl MenuPage {
    pub fn records(&self) -> impl Iterator<Item = &MetaRecord> {
        self.entries.iter().filter_map(|e| match e {
            MenuEntry::Item(r) => Some(r),
            MenuEntry::Folder { .. } => None,
        })
    }
}

/// A listed item before enrichment: the seed handed to the aggregator and
/// whatever the listing already said about it.
struct Candidate {
    seed: ItemSeed,
    base: MetaRecord,
}

impl Candidate {
    fn from_record(base: MetaRecord) -> Self {
        Self {
            seed: base.seed(),
            base,
        }
    }

    fn from_seed(seed: ItemSeed) -> Self {
        Self {
            base: MetaRecord::from_seed(&seed),
            seed,
        }
    }
}

struct Batch {
    candidates: Vec<Candidate>,
    has_more: bool,
}

impl Batch {
    fn records(records: Vec<MetaRecord>, has_more: bool) -> Self {
        Self {
            candidates: records.into_iter().map(Candidate::from_record).collect(),
            has_more,
        }
    }

    fn seeds(seeds: Vec<ItemSeed>, has_more: bool) -> Self {
        Self {
            candidates: seeds.into_iter().map(Candidate::from_seed).collect(),
            has_more,
        }
    }
}

pub struct MenuOrchestrator {
    config: MenuConfig,
    aggregator: Arc<MetaAggregator>,
    imdb: Option<Arc<ImdbClient>>,
    tmdb: Option<Arc<TmdbClient>>,
    trakt: Option<Arc<TraktStore>>,
    rng: Mutex<StdRng>,
}

impl MenuOrchestrator {
    pub fn new(config: MenuConfig, aggregator: Arc<MetaAggregator>) -> Self {
        Self {
            config,
            aggregator,
            imdb: None,
            tmdb: None,
            trakt: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_imdb(mut self, imdb: Arc<ImdbClient>) -> Self {
        self.imdb = Some(imdb);
        self
    }

    pub fn with_tmdb(mut self, tmdb: Arc<TmdbClient>) -> Self {
        self.tmdb = Some(tmdb);
        self
    }

    pub fn with_trakt(mut self, trakt: Arc<TraktStore>) -> Self {
        self.trakt = Some(trakt);
        self
    }

    /// Fix the random source of the Quick and Random menus.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock().unwrap_or_else(|e| e.into_inner()) = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &MenuConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Arc<MetaAggregator> {
        &self.aggregator
    }

    pub fn trakt(&self) -> Option<&Arc<TraktStore>> {
        self.trakt.as_ref()
    }

    pub async fn menu(&self, request: &MenuRequest) -> Result<MenuPage, MenuError> {
        let kind = request.kind;
        let page = request.page;
        debug!(intent = request.intent.name(), media = %kind, page, "menu pass");

        let batch = match &request.intent {
            Intent::Explore => {
                return Ok(MenuPage {
                    request: request.clone(),
                    entries: explore::entries(kind)
                        .into_iter()
                        .map(|(label, request)| MenuEntry::Folder { label, request })
                        .collect(),
                    next: None,
                });
            }
            Intent::Persons { query } => return self.persons(request, query.as_deref()).await,
            Intent::Seasons { show } => return self.seasons(request, show).await,
            Intent::Discover(filter) => self.discover(kind, filter, page).await?,
            Intent::Random(filter) => self.random(kind, filter).await?,
            Intent::Arrivals => self.arrivals(kind, page).await?,
            Intent::Popular => self.single_listing(kind, &Listing::Popular).await?,
            Intent::Trending => self.single_listing(kind, &Listing::Trending).await?,
            Intent::Watchlist => {
                let listing = self
                    .store()?
                    .api()
                    .listing(kind, &Listing::Watchlist, Page::new(page, self.config.page_size))
                    .await?;
                Batch::seeds(listing.items, listing.has_more)
            }
            Intent::History => {
                let history = self
                    .store()?
                    .api()
                    .history(kind, Page::new(page, self.config.page_size))
                    .await?;
                Batch::seeds(history.items, history.has_more)
            }
            Intent::Progress(mode) => self.progress(kind, *mode, page).await?,
            Intent::Rated => {
                let rated = self.store()?.rated(kind).await?;
                self.paged(rated.into_iter().map(|(seed, _)| seed).collect(), page)
            }
            Intent::Quick => self.quick(kind).await?,
            Intent::Search { query } => self.search(kind, query, page).await?,
            Intent::Awards { group } => self.awards(kind, group, page).await?,
            Intent::Episodes { show, season } => self.episodes(show, *season, page).await?,
        };
        self.finish(request, batch).await
    }

    /// Build a page and hand it to the host directory.
    pub async fn render(&self, request: &MenuRequest, directory: &dyn Directory) -> Result<MenuPage, MenuError> {
        let page = self.menu(request).await?;
        render::render(&self.config.plugin_url, &page, directory).await;
        Ok(page)
    }

    /// Enrich, overlay the listing data, filter and truncate.
    async fn finish(&self, request: &MenuRequest, batch: Batch) -> Result<MenuPage, MenuError> {
        let policy = request.quick.unwrap_or(self.config.policy);
        let Batch { candidates, has_more } = batch;
        let listed = candidates.len();
        let seeds = candidates.iter().map(|c| c.seed.clone()).collect();
        let enriched = self.aggregator.enrich_batch(seeds, policy).await;
        let records = overlay(candidates, enriched);

        let mut records = self.config.filters.apply(records, Utc::now().date_naive());
        records.truncate(self.config.page_size as usize);
        info!(
            intent = request.intent.name(),
            listed,
            shown = records.len(),
            more = has_more,
            "menu built"
        );
        Ok(MenuPage {
            request: request.clone(),
            entries: records.into_iter().map(MenuEntry::Item).collect(),
            next: has_more.then(|| request.next()),
        })
    }

    fn store(&self) -> Result<&Arc<TraktStore>, MenuError> {
        self.trakt.as_ref().ok_or(MenuError::Unavailable("trakt"))
    }

    fn imdb(&self) -> Result<&ImdbClient, MenuError> {
        self.imdb.as_deref().ok_or(MenuError::Unavailable("imdb"))
    }

    fn tmdb(&self) -> Result<&TmdbClient, MenuError> {
        self.tmdb.as_deref().ok_or(MenuError::Unavailable("tmdb"))
    }

    fn paged(&self, seeds: Vec<ItemSeed>, page: u32) -> Batch {
        let size = self.config.page_size as usize;
        let start = (page.max(1) as usize - 1) * size;
        let has_more = seeds.len() > start + size;
        Batch::seeds(seeds.into_iter().skip(start).take(size).collect(), has_more)
    }

    async fn discover(&self, kind: MediaKind, filter: &DiscoverFilter, page: u32) -> Result<Batch, MenuError> {
        if filter.catalogue == Catalogue::Tmdb || filter.person.is_some() {
            let result = self.tmdb()?.discover(kind, &tmdb_query(kind, filter), page).await?;
            let has_more = result.next_page().is_some();
            return Ok(Batch::records(result.items, has_more));
        }
        let result = self.imdb()?.discover(kind, &imdb_query(filter), page).await?;
        Ok(Batch::records(result.items, result.next_start.is_some()))
    }

    async fn random(&self, kind: MediaKind, filter: &DiscoverFilter) -> Result<Batch, MenuError> {
        let Batch { mut candidates, .. } = self.discover(kind, filter, 1).await?;
        if candidates.is_empty() {
            return Ok(Batch::records(Vec::new(), false));
        }
        let pick = self
            .rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gen_range(0..candidates.len());
        Ok(Batch {
            candidates: vec![candidates.swap_remove(pick)],
            has_more: false,
        })
    }

    async fn arrivals(&self, kind: MediaKind, page: u32) -> Result<Batch, MenuError> {
        if self.imdb.is_none() && self.tmdb.is_none() {
            return Err(MenuError::Unavailable("catalogue"));
        }
        let today = Utc::now().date_naive();
        let imdb_queries = arrivals::imdb_queries(kind, today);
        let tmdb_query = arrivals::tmdb_query(kind, today);

        let imdb_calls = async {
            match &self.imdb {
                Some(imdb) => join_all(imdb_queries.iter().map(|q| imdb.discover(kind, q, page))).await,
                None => Vec::new(),
            }
        };
        let tmdb_call = async {
            match &self.tmdb {
                Some(tmdb) => Some(tmdb.discover(kind, &tmdb_query, page).await),
                None => None,
            }
        };
        let (imdb_pages, tmdb_page) = tokio::join!(imdb_calls, tmdb_call);

        let mut lists = Vec::new();
        let mut has_more = false;
        let mut failure = None;
        for result in imdb_pages {
            match result {
                Ok(p) => {
                    has_more |= p.next_start.is_some();
                    lists.push(p.items);
                }
                Err(e) => {
                    warn!(provider = "imdb", error = %e, "arrivals query failed");
                    failure.get_or_insert(e);
                }
            }
        }
        match tmdb_page {
            Some(Ok(p)) => {
                has_more |= p.next_page().is_some();
                lists.push(p.items);
            }
            Some(Err(e)) => {
                warn!(provider = "tmdb", error = %e, "arrivals query failed");
                failure.get_or_insert(e);
            }
            None => {}
        }
        match failure {
            Some(e) if lists.is_empty() => return Err(e.into()),
            _ => {}
        }
        Ok(Batch::records(
            arrivals::combine(lists, self.config.arrivals_min_rating),
            has_more,
        ))
    }

    /// Trakt lists that are served as a single page.
    async fn single_listing(&self, kind: MediaKind, listing: &Listing) -> Result<Batch, MenuError> {
        let page = self
            .store()?
            .api()
            .listing(kind, listing, Page::first(self.config.page_size))
            .await?;
        Ok(Batch::seeds(page.items, false))
    }

    async fn progress(&self, kind: MediaKind, mode: ProgressMode, page: u32) -> Result<Batch, MenuError> {
        let seeds = self
            .store()?
            .progress_candidates(Group::of(kind))
            .await?
            .into_iter()
            .filter(|c| mode.matches(c.plays, c.progress))
            .map(|c| c.seed)
            .collect();
        Ok(self.paged(seeds, page))
    }

    async fn search(&self, kind: MediaKind, query: &str, page: u32) -> Result<Batch, MenuError> {
        let result = self.tmdb()?.search_titles(kind, query, None, page).await?;
        let has_more = result.next_page().is_some();
        Ok(Batch::records(search::dedupe_editions(query, result.items), has_more))
    }

    async fn awards(&self, kind: MediaKind, group: &str, page: u32) -> Result<Batch, MenuError> {
        if !explore::is_award_group(group) {
            return Err(MenuError::InvalidRequest(format!("unknown award group {group}")));
        }
        let query = ImdbQuery {
            groups: vec![group.to_string()],
            sort: Some("year,desc".into()),
            ..Default::default()
        };
        let result = self.imdb()?.discover(kind, &query, page).await?;
        Ok(Batch::records(result.items, result.next_start.is_some()))
    }

    async fn persons(&self, request: &MenuRequest, query: Option<&str>) -> Result<MenuPage, MenuError> {
        let result = self.tmdb()?.people(query, request.page).await?;
        let has_more = result.next_page().is_some();
        let mut people = result.items;
        people.truncate(self.config.page_size as usize);
        Ok(MenuPage {
            request: request.clone(),
            entries: people.into_iter().map(MenuEntry::Item).collect(),
            next: has_more.then(|| request.next()),
        })
    }

    async fn show(&self, show: &IdBundle) -> Result<Option<MetaRecord>, MenuError> {
        Ok(self
            .aggregator
            .enrich(ItemSeed::new(MediaKind::Show, show.clone()))
            .await?)
    }

    async fn seasons(&self, request: &MenuRequest, show: &IdBundle) -> Result<MenuPage, MenuError> {
        let record = self.show(show).await?;
        let entries = record
            .iter()
            .flat_map(|show_record| {
                show_record.seasons.iter().map(move |info| {
                    let mut season = MetaRecord::new(MediaKind::Season, show_record.ids.clone());
                    season.season = Some(info.number);
                    season.premiered = info.premiered;
                    season.year = info.premiered.map(|d| chrono::Datelike::year(&d));
                    season.aired_episodes = info.aired.or(Some(info.episodes));
                    season.images = show_record.images.clone();
                    season.genre = show_record.genre.clone();
                    MenuEntry::Item(season)
                })
            })
            .collect();
        Ok(MenuPage {
            request: request.clone(),
            entries,
            next: None,
        })
    }

    async fn episodes(&self, show: &IdBundle, season: u32, page: u32) -> Result<Batch, MenuError> {
        let count = self
            .show(show)
            .await?
            .and_then(|r| r.season_info(season).map(|s| s.aired.unwrap_or(s.episodes)))
            .unwrap_or(0);
        let seeds = (1..=count)
            .map(|episode| ItemSeed::episode_of(show.clone(), season, episode))
            .collect();
        Ok(self.paged(seeds, page))
    }

    async fn quick(&self, kind: MediaKind) -> Result<Batch, MenuError> {
        let signed_in = match &self.trakt {
            Some(store) => store.api().is_authenticated().await,
            None => false,
        };
        let budgets = quick::split_budget(&self.config.quick_weights, self.config.page_size as usize);
        let fetches = budgets
            .into_iter()
            .zip(self.config.quick_weights.iter().map(|(_, w)| *w))
            .filter(|((source, n), _)| {
                *n > 0
                    && (signed_in || !source.needs_account())
                    && (self.trakt.is_some() || !matches!(source, QuickSource::Popular | QuickSource::Trending))
            })
            .map(|((source, n), weight)| async move {
                (source, weight, self.quick_source(kind, source, n).await)
            });

        let mut lists = Vec::new();
        for (source, weight, result) in join_all(fetches).await {
            match result {
                Ok(records) => lists.push((source, weight, records)),
                Err(e) => warn!(source = source.as_str(), error = %e, "quick source skipped"),
            }
        }
        let blended = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            quick::blend(lists, &mut *rng)
        };
        Ok(Batch::records(blended.into_iter().map(|(_, r)| r).collect(), false))
    }

    async fn quick_source(&self, kind: MediaKind, source: QuickSource, n: usize) -> Result<Vec<MetaRecord>, MenuError> {
        let limit = n as u32;
        let seeds: Vec<ItemSeed> = match source {
            QuickSource::Unfinished => self
                .store()?
                .progress_candidates(Group::of(kind))
                .await?
                .into_iter()
                .filter(|c| ProgressMode::Unfinished.matches(c.plays, c.progress))
                .map(|c| c.seed)
                .take(n)
                .collect(),
            QuickSource::History => self.store()?.api().history(kind, Page::first(limit)).await?.items,
            QuickSource::Watchlist | QuickSource::Recommendations | QuickSource::Popular | QuickSource::Trending => {
                let listing = match source {
                    QuickSource::Watchlist => Listing::Watchlist,
                    QuickSource::Recommendations => Listing::Recommendations,
                    QuickSource::Popular => Listing::Popular,
                    _ => Listing::Trending,
                };
                self.store()?.api().listing(kind, &listing, Page::first(limit)).await?.items
            }
            QuickSource::Arrivals => {
                let batch = self.arrivals(kind, 1).await?;
                return Ok(batch.candidates.into_iter().take(n).map(|c| c.base).collect());
            }
            QuickSource::Featured => {
                let batch = self.discover(kind, &featured(self.tmdb.is_some()), 1).await?;
                return Ok(batch.candidates.into_iter().take(n).map(|c| c.base).collect());
            }
        };
        Ok(seeds.iter().take(n).map(MetaRecord::from_seed).collect())
    }
}

fn featured(tmdb: bool) -> DiscoverFilter {
    DiscoverFilter {
        catalogue: if tmdb { Catalogue::Tmdb } else { Catalogue::Imdb },
        min_votes: Some(1000),
        ..Default::default()
    }
}

fn imdb_query(filter: &DiscoverFilter) -> ImdbQuery {
    ImdbQuery {
        genres: filter.genre.iter().cloned().collect(),
        languages: filter.language.iter().cloned().collect(),
        countries: filter.country.iter().cloned().collect(),
        certificates: filter
            .certificate
            .iter()
            .map(|c| if c.contains(':') { c.clone() } else { format!("US:{c}") })
            .collect(),
        companies: filter.company.iter().cloned().collect(),
        keywords: filter.keyword.iter().cloned().collect(),
        year_from: filter.year,
        year_to: filter.year,
        min_votes: filter.min_votes,
        min_rating: filter.min_rating,
        ..Default::default()
    }
}

fn tmdb_query(kind: MediaKind, filter: &DiscoverFilter) -> DiscoverQuery {
    DiscoverQuery {
        genres: filter.genre.iter().filter_map(|g| tmdb_genre(kind, g)).collect(),
        year: filter.year,
        original_language: filter.language.clone(),
        region: filter.country.clone(),
        certification: filter.certificate.clone().map(|c| ("US".to_string(), c)),
        companies: filter.company.iter().filter_map(|c| c.parse().ok()).collect(),
        keywords: filter.keyword.iter().filter_map(|k| k.parse().ok()).collect(),
        people: filter.person.into_iter().collect(),
        min_votes: filter.min_votes,
        min_rating: filter.min_rating,
        ..Default::default()
    }
}

/// TMDb genre id for a genre name. Shows use the combined TV genres.
fn tmdb_genre(kind: MediaKind, genre: &str) -> Option<u32> {
    let show = kind.is_episodic();
    Some(match genre.to_ascii_lowercase().as_str() {
        "action" | "adventure" if show => 10759,
        "action" => 28,
        "adventure" => 12,
        "animation" => 16,
        "comedy" => 35,
        "crime" => 80,
        "documentary" => 99,
        "drama" => 18,
        "family" => 10751,
        "sci-fi" | "fantasy" if show => 10765,
        "fantasy" => 14,
        "sci-fi" => 878,
        "history" => 36,
        "horror" => 27,
        "music" => 10402,
        "mystery" => 9648,
        "romance" => 10749,
        "thriller" => 53,
        "war" if show => 10768,
        "war" => 10752,
        "western" => 37,
        _ => return None,
    })
}

/// Pair each enriched record with its listing entry and fill what the
/// providers left empty. Order is preserved; filtered items have no record.
fn overlay(candidates: Vec<Candidate>, enriched: Vec<MetaRecord>) -> Vec<MetaRecord> {
    let bases: Vec<MetaRecord> = candidates.into_iter().map(|c| c.base).collect();
    let mut cursor = 0;
    enriched
        .into_iter()
        .map(|mut record| {
            if let Some(offset) = bases[cursor..].iter().position(|b| corresponds(b, &record)) {
                fill_gaps(&mut record, &bases[cursor + offset]);
                cursor += offset + 1;
            }
            record
        })
        .collect()
}

fn corresponds(base: &MetaRecord, record: &MetaRecord) -> bool {
    base.kind == record.kind
        && base.season == record.season
        && base.episode == record.episode
        && (base.ids.matches(&record.ids) || base.ids.is_empty() || record.ids.is_empty())
}

fn fill_gaps(record: &mut MetaRecord, base: &MetaRecord) {
    macro_rules! fill {
        ($($field:ident),*) => {
            $(if record.$field.is_none() {
                record.$field.clone_from(&base.$field);
            })*
        };
    }
    fill!(title, original_title, year, premiered, runtime, plot, certification);
    if record.genre.is_empty() {
        record.genre.clone_from(&base.genre);
    }
    record.ids.fill_from(&base.ids);
    for (provider, rating) in &base.ratings {
        record.ratings.entry(*provider).or_insert(*rating);
    }
    if let Some((rating, votes)) = aggregate_rating(&record.ratings) {
        record.rating = Some(rating);
        record.votes = Some(votes);
    }
    for (kind, images) in &base.images {
        record.images.entry(*kind).or_insert_with(|| images.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinemeld_core::concurrency::{AbortFlag, WorkerPool};
    use cinemeld_core::types::SyncCategory;
    use cinemeld_metadata::aggregator::{AggregatorConfig, QuickPolicy};
    use cinemeld_metadata::meta_cache::MetaCache;
    use cinemeld_sync::SyncConfig;
    use cinemeld_sync::testing::FakeTrakt;
    use cinemeld_metadata::trakt::wire::{PlaybackItem, WatchedItem};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const YEAR_2019: &str = r#"
<div class="lister-list">
<div class="lister-item mode-advanced">
  <div class="lister-item-content">
    <h3 class="lister-item-header">
      <a href="/title/tt7286456/">Joker</a>
      <span class="lister-item-year text-muted unbold">(2019)</span>
    </h3>
    <div class="inline-block ratings-imdb-rating" name="ir" data-value="8.4"></div>
    <span name="nv" data-value="1234567">1,234,567</span>
  </div>
</div>
<div class="lister-item mode-advanced">
  <div class="lister-item-content">
    <h3 class="lister-item-header">
      <a href="/title/tt6751668/">Parasite</a>
      <span class="lister-item-year text-muted unbold">(2019)</span>
    </h3>
    <div class="inline-block ratings-imdb-rating" name="ir" data-value="8.5"></div>
    <span name="nv" data-value="912345">912,345</span>
  </div>
</div>
<div class="desc">
  <a href="/search/title/?release_date=2019-01-01,2019-12-31&amp;start=51&amp;ref_=adv_nxt" class="lister-page-next next-page">Next »</a>
</div>
"#;

    async fn aggregator() -> Arc<MetaAggregator> {
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        Arc::new(MetaAggregator::new(
            AggregatorConfig {
                filter_unresolved: false,
                ..Default::default()
            },
            MetaCache::new(pool),
            WorkerPool::new(4),
            AbortFlag::new(),
        ))
    }

    fn config() -> MenuConfig {
        MenuConfig {
            policy: QuickPolicy::Classic,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn discover_by_year_pages_forward() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/title/"))
            .and(query_param("release_date", "2019-01-01,2019-12-31"))
            .and(query_param("count", "50"))
            .and(query_param("start", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(YEAR_2019))
            .expect(1)
            .mount(&server)
            .await;

        let menus = MenuOrchestrator::new(config(), aggregator().await)
            .with_imdb(Arc::new(ImdbClient::with_base(&server.uri())));
        let request = MenuRequest::new(
            MediaKind::Movie,
            Intent::Discover(DiscoverFilter {
                year: Some(2019),
                ..Default::default()
            }),
        );
        let page = menus.menu(&request).await.unwrap();

        let records: Vec<_> = page.records().collect();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.year == Some(2019)));
        assert_eq!(records[0].title.as_deref(), Some("Joker"));
        assert!(records[0].rating.is_some());
        let next = page.next.expect("next cursor");
        assert_eq!(next.page, 2);
        assert_eq!(next.intent, request.intent);
    }

    async fn partial_account() -> Arc<TraktStore> {
        let api = Arc::new(FakeTrakt::default());
        let watched: Vec<WatchedItem> = serde_json::from_value(json!([
            { "plays": 0,
              "movie": { "title": "The Shawshank Redemption", "year": 1994,
                         "ids": { "imdb": "tt0111161" } } }
        ]))
        .unwrap();
        let playback: Vec<PlaybackItem> = serde_json::from_value(json!([
            { "id": 7, "progress": 42.0, "paused_at": "2024-01-03T20:00:00.000Z",
              "movie": { "title": "The Shawshank Redemption", "year": 1994,
                         "ids": { "imdb": "tt0111161" } } }
        ]))
        .unwrap();
        api.with(|s| {
            s.watched.insert(MediaKind::Movie, watched);
            s.playback.insert(MediaKind::Movie, playback);
        });
        api.set_activity(MediaKind::Movie, SyncCategory::History, 1_704_000_000);
        api.set_activity(MediaKind::Movie, SyncCategory::Progress, 1_704_312_000);
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        Arc::new(TraktStore::new(pool, api, SyncConfig::default()))
    }

    #[tokio::test]
    async fn progress_modes_select_the_partial_movie() {
        let menus = MenuOrchestrator::new(config(), aggregator().await).with_trakt(partial_account().await);

        let partial = menus
            .menu(&MenuRequest::new(MediaKind::Movie, Intent::Progress(ProgressMode::Partial)))
            .await
            .unwrap();
        let records: Vec<_> = partial.records().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ids.imdb.as_deref(), Some("tt0111161"));
        assert!(partial.next.is_none());

        let finished = menus
            .menu(&MenuRequest::new(MediaKind::Movie, Intent::Progress(ProgressMode::Finished)))
            .await
            .unwrap();
        assert_eq!(finished.records().count(), 0);
    }

    #[tokio::test]
    async fn account_menus_need_trakt() {
        let menus = MenuOrchestrator::new(config(), aggregator().await);
        let err = menus
            .menu(&MenuRequest::new(MediaKind::Movie, Intent::Watchlist))
            .await
            .unwrap_err();
        assert!(matches!(err, MenuError::Unavailable("trakt")));
    }

    #[tokio::test]
    async fn trending_is_a_single_page() {
        let api = Arc::new(FakeTrakt::default());
        let seeds: Vec<ItemSeed> = (1..=3)
            .map(|i| ItemSeed::new(MediaKind::Movie, IdBundle::trakt(i)).with_title(format!("Movie {i}"), Some(2020)))
            .collect();
        api.with(|s| s.listings.insert(FakeTrakt::listing_key(MediaKind::Movie, &Listing::Trending), seeds));
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        let store = Arc::new(TraktStore::new(pool, api, SyncConfig::default()));
        let menus = MenuOrchestrator::new(config(), aggregator().await).with_trakt(store);

        let page = menus
            .menu(&MenuRequest::new(MediaKind::Movie, Intent::Trending))
            .await
            .unwrap();
        assert_eq!(page.records().count(), 3);
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn quick_menu_blends_public_lists_when_signed_out() {
        let api = Arc::new(FakeTrakt::default());
        api.with(|s| {
            s.signed_out = true;
            s.listings.insert(
                FakeTrakt::listing_key(MediaKind::Movie, &Listing::Popular),
                vec![ItemSeed::new(MediaKind::Movie, IdBundle::trakt(1)).with_title("Popular", Some(2021))],
            );
            s.listings.insert(
                FakeTrakt::listing_key(MediaKind::Movie, &Listing::Trending),
                vec![
                    ItemSeed::new(MediaKind::Movie, IdBundle::trakt(1)).with_title("Popular", Some(2021)),
                    ItemSeed::new(MediaKind::Movie, IdBundle::trakt(2)).with_title("Trending", Some(2022)),
                ],
            );
        });
        let pool = cinemeld_db::open(":memory:").await.unwrap();
        let store = Arc::new(TraktStore::new(pool, api.clone(), SyncConfig::default()));
        let menus = MenuOrchestrator::new(config(), aggregator().await)
            .with_trakt(store)
            .with_seed(3);

        let page = menus
            .menu(&MenuRequest::new(MediaKind::Movie, Intent::Quick))
            .await
            .unwrap();
        let mut titles: Vec<_> = page.records().filter_map(|r| r.title.clone()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Popular", "Trending"]);
        assert_eq!(api.calls("playback"), 0);
        assert_eq!(api.calls("history"), 0);
    }

    #[test]
    fn tv_genres_use_combined_ids() {
        assert_eq!(tmdb_genre(MediaKind::Movie, "Sci-Fi"), Some(878));
        assert_eq!(tmdb_genre(MediaKind::Show, "sci-fi"), Some(10765));
        assert_eq!(tmdb_genre(MediaKind::Show, "adventure"), Some(10759));
        assert_eq!(tmdb_genre(MediaKind::Movie, "biography"), None);
    }
}
