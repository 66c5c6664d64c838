//! IMDb client: advanced-search list pages are scraped, title pages are read
//! through their embedded JSON-LD block.

use std::sync::{Arc, LazyLock};

use chrono::NaiveDate;
use cinemeld_cache::{Cache, Tier};
use cinemeld_core::types::{IdBundle, ItemSeed, MediaKind};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::http::{Auth, Payload, ProviderHttp, Request};
use crate::provider::MetadataProvider;
use crate::record::{Image, ImageType, MetaRecord, Person};
use crate::text::{MissingFields, date_of, f64_at, sanitize_plot, str_at, strip_html, u64_at, year_of};
use crate::{MetadataError, Provider};

pub const BASE_URL: &str = "https://www.imdb.com";
pub const PAGE_SIZE: u32 = 50;

static RE_ITEM_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<div\s+class="lister-item\s+mode-advanced"\s*>"#).unwrap());
static RE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/title/(tt\d+)/").unwrap());
static RE_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)class="lister-item-header".*?<a\s+href="/title/tt\d+/[^"]*"\s*>\s*([^<]+?)\s*</a>"#)
        .unwrap()
});
static RE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="lister-item-year[^"]*">[^<]*?\((\d{4})"#).unwrap());
static RE_RATING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)class="inline-block ratings-imdb-rating"[^>]*data-value="(\d+(?:\.\d+)?)""#).unwrap()
});
static RE_RATING_STRONG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<strong>\s*(\d+(?:\.\d+)?)\s*</strong>").unwrap());
static RE_VOTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"name="nv"\s+data-value="(\d+)""#).unwrap());
static RE_VOTES_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Votes:\s*</span>\s*<span[^>]*>\s*([\d,]+)").unwrap()
});
static RE_GENRE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<span\s+class="genre">\s*([^<]+)"#).unwrap());
static RE_RUNTIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<span\s+class="runtime">\s*(\d+)\s*min"#).unwrap());
static RE_CERTIFICATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<span\s+class="certificate">\s*([^<]+?)\s*<"#).unwrap());
static RE_TEXT_MUTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<p\s+class="text-muted[^"]*">(.*?)(?:</p>|$)"#).unwrap());
static RE_PEOPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<p\s+class="">(.*?)(?:</p>|$)"#).unwrap());
static RE_LINK_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<a\s+href="/name/nm\d+/[^"]*"\s*>([^<]+)</a>"#).unwrap());
static RE_POSTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"loadlate="([^"]+)""#).unwrap());
static RE_NEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)(?:href="[^"]*?start=(\d+)[^"]*"[^>]*class="[^"]*lister-page-next|class="[^"]*lister-page-next[^"]*"[^>]*href="[^"]*?start=(\d+))"#,
    )
    .unwrap()
});
static RE_JSON_LD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<script\s+type="application/ld\+json"\s*>(.*?)</script>"#).unwrap()
});
static RE_DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").unwrap());

/// Filters of the advanced title search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImdbQuery {
    pub title_types: Vec<String>,
    pub genres: Vec<String>,
    pub languages: Vec<String>,
    pub countries: Vec<String>,
    /// Entries like `US:PG-13`.
    pub certificates: Vec<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub released_from: Option<NaiveDate>,
    pub released_to: Option<NaiveDate>,
    pub min_votes: Option<u32>,
    pub min_rating: Option<f64>,
    pub companies: Vec<String>,
    pub keywords: Vec<String>,
    /// Award groups such as `oscar_winner` or `best_picture_winner`.
    pub groups: Vec<String>,
    pub sort: Option<String>,
}

impl ImdbQuery {
    pub fn title_types_for(kind: MediaKind) -> Vec<String> {
        match kind {
            MediaKind::Show => vec!["tv_series".into(), "tv_miniseries".into()],
            _ => vec!["feature".into(), "tv_movie".into()],
        }
    }

    pub fn params(&self, page: u32, count: u32) -> Vec<(String, String)> {
        let mut p: Vec<(String, String)> = Vec::new();
        let mut list = |key: &str, values: &[String]| {
            if !values.is_empty() {
                p.push((key.to_string(), values.join(",")));
            }
        };
        list("title_type", &self.title_types);
        list("genres", &self.genres);
        list("primary_language", &self.languages);
        list("countries", &self.countries);
        list("certificates", &self.certificates);
        list("companies", &self.companies);
        list("keywords", &self.keywords);
        list("groups", &self.groups);

        let from = self
            .released_from
            .map(|d| d.to_string())
            .or_else(|| self.year_from.map(|y| format!("{y}-01-01")));
        let to = self
            .released_to
            .map(|d| d.to_string())
            .or_else(|| self.year_to.map(|y| format!("{y}-12-31")));
        if from.is_some() || to.is_some() {
            p.push((
                "release_date".into(),
                format!("{},{}", from.unwrap_or_default(), to.unwrap_or_default()),
            ));
        }
        if let Some(v) = self.min_votes {
            p.push(("num_votes".into(), format!("{v},")));
        }
        if let Some(r) = self.min_rating {
            p.push(("user_rating".into(), format!("{r:.1},")));
        }
        p.push((
            "sort".into(),
            self.sort.clone().unwrap_or_else(|| "moviemeter,asc".into()),
        ));
        p.push(("count".into(), count.to_string()));
        p.push(("start".into(), (page.max(1).saturating_sub(1) * count + 1).to_string()));
        p
    }
}

/// One scraped list page.
#[derive(Debug, Clone, Default)]
pub struct ImdbPage {
    pub items: Vec<MetaRecord>,
    /// Start offset of the next page when the markup advertises one.
    pub next_start: Option<u32>,
}

/// Parse an advanced-search result page.
pub fn parse_list(html: &str, kind: MediaKind) -> ImdbPage {
    let starts: Vec<usize> = RE_ITEM_START.find_iter(html).map(|m| m.end()).collect();
    let mut items = Vec::with_capacity(starts.len());
    for (i, start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(html.len());
        if let Some(record) = parse_list_item(&html[*start..end], kind) {
            items.push(record);
        }
    }
    let next_start = RE_NEXT
        .captures(html)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .and_then(|m| m.as_str().parse().ok());
    ImdbPage { items, next_start }
}

fn capture<'a>(re: &Regex, block: &'a str) -> Option<&'a str> {
    re.captures(block)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
}

fn parse_list_item(block: &str, kind: MediaKind) -> Option<MetaRecord> {
    let imdb = capture(&RE_ID, block)?;
    let mut record = MetaRecord::new(kind, IdBundle::imdb(imdb));
    record.title = capture(&RE_TITLE, block).map(strip_html);
    record.year = capture(&RE_YEAR, block).and_then(|y| y.parse().ok());

    let rating = capture(&RE_RATING, block)
        .or_else(|| capture(&RE_RATING_STRONG, block))
        .and_then(|r| r.parse::<f64>().ok());
    let votes = capture(&RE_VOTES, block)
        .or_else(|| capture(&RE_VOTES_TEXT, block))
        .and_then(|v| v.replace(',', "").parse::<u64>().ok());
    record.set_provider_rating(Provider::Imdb, rating, votes);

    record.genre = capture(&RE_GENRE, block)
        .map(|g| {
            g.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    record.runtime = capture(&RE_RUNTIME, block)
        .and_then(|m| m.parse::<u32>().ok())
        .map(|m| m * 60);
    record.certification = capture(&RE_CERTIFICATE, block).map(str::to_string);

    // The plot is the last muted paragraph that holds plain text.
    record.plot = RE_TEXT_MUTED
        .captures_iter(block)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .filter(|text| !text.contains("<span"))
        .filter_map(sanitize_plot)
        .last();

    if let Some(people) = capture(&RE_PEOPLE, block) {
        let (directors, stars) = match people.find("Star") {
            Some(split) => (&people[..split], &people[split..]),
            None => (people, ""),
        };
        if directors.contains("Director") {
            record.director = link_texts(directors);
        }
        record.cast = link_texts(stars)
            .into_iter()
            .map(|name| Person {
                name,
                role: "Actor".into(),
                character: None,
                thumb: None,
            })
            .collect();
    }
    if let Some(url) = capture(&RE_POSTER, block) {
        record.add_image(
            ImageType::Poster,
            Image {
                url: full_size_poster(url),
                language: None,
                score: 0.0,
                priority: 0,
                provider: Provider::Imdb,
            },
        );
    }
    Some(record)
}

fn link_texts(html: &str) -> Vec<String> {
    RE_LINK_TEXT
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| strip_html(m.as_str())))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Drop the resize suffix of an Amazon image URL (`..._V1_UX67_CR0,0,67,98_AL_.jpg`).
fn full_size_poster(url: &str) -> String {
    match (url.find("._V1_"), url.rfind('.')) {
        (Some(start), Some(ext)) if ext > start => format!("{}{}", &url[..start], &url[ext..]),
        _ => url.to_string(),
    }
}

/// Runtime in seconds from an ISO-8601 duration such as `PT2H22M`.
pub fn parse_duration(s: &str) -> Option<u32> {
    let caps = RE_DURATION.captures(s.trim())?;
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0)
    };
    let secs = part(1) * 3600 + part(2) * 60 + part(3);
    (secs > 0).then_some(secs)
}

fn ld_names(v: &Value, key: &str, type_filter: Option<&str>) -> Vec<String> {
    let items = match v.get(key) {
        Some(Value::Array(a)) => a.clone(),
        Some(obj @ Value::Object(_)) => vec![obj.clone()],
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter(|p| type_filter.is_none_or(|t| str_at(p, "@type").as_deref() == Some(t)))
        .filter_map(|p| str_at(p, "name").map(|n| strip_html(&n)))
        .collect()
}

/// Read a title page's JSON-LD block. `full` adds plot, people and artwork.
pub fn parse_title(html: &str, imdb: &str, full: bool) -> Option<MetaRecord> {
    let raw = capture(&RE_JSON_LD, html)?;
    let ld: Value = serde_json::from_str(raw).ok()?;

    let kind = match str_at(&ld, "@type").as_deref() {
        Some("TVSeries") | Some("TVMiniSeries") => MediaKind::Show,
        Some("TVEpisode") => MediaKind::Episode,
        _ => MediaKind::Movie,
    };
    let mut record = MetaRecord::new(kind, IdBundle::imdb(imdb));
    record.title = str_at(&ld, "name").map(|t| strip_html(&t));
    record.original_title = str_at(&ld, "alternateName").map(|t| strip_html(&t));
    if let Some(date) = str_at(&ld, "datePublished") {
        record.year = year_of(&date);
        record.premiered = date_of(&date);
    }
    record.genre = match ld.get("genre") {
        Some(Value::String(g)) => vec![strip_html(g)],
        Some(Value::Array(_)) => ld_names_plain(&ld, "genre"),
        _ => Vec::new(),
    };
    record.certification = str_at(&ld, "contentRating");
    if let Some(agg) = ld.get("aggregateRating") {
        record.set_provider_rating(
            Provider::Imdb,
            f64_at(agg, "ratingValue"),
            u64_at(agg, "ratingCount"),
        );
    }

    if full {
        record.plot = str_at(&ld, "description").and_then(|d| sanitize_plot(&d));
        record.runtime = str_at(&ld, "duration").and_then(|d| parse_duration(&d));
        record.director = ld_names(&ld, "director", None);
        record.writer = ld_names(&ld, "creator", Some("Person"));
        record.studio = ld_names(&ld, "creator", Some("Organization"));
        record.cast = ld_names(&ld, "actor", None)
            .into_iter()
            .map(|name| Person {
                name,
                role: "Actor".into(),
                character: None,
                thumb: None,
            })
            .collect();
        if let Some(url) = str_at(&ld, "image") {
            record.add_image(
                ImageType::Poster,
                Image {
                    url,
                    language: None,
                    score: 0.0,
                    priority: 0,
                    provider: Provider::Imdb,
                },
            );
        }
    }
    Some(record)
}

fn ld_names_plain(v: &Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(strip_html)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub struct ImdbClient {
    http: ProviderHttp,
    missing: MissingFields,
}

impl ImdbClient {
    pub fn new() -> Self {
        Self::with_base(BASE_URL)
    }

    pub fn with_base(base: &str) -> Self {
        Self {
            http: ProviderHttp::new("imdb", base, Auth::Public)
                .with_header("accept-language", "en-US,en;q=0.9"),
            missing: MissingFields::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.http = self.http.with_cache(cache, Tier::Short);
        self
    }

    /// One page of the advanced title search.
    pub async fn discover(
        &self,
        kind: MediaKind,
        query: &ImdbQuery,
        page: u32,
    ) -> Result<ImdbPage, MetadataError> {
        let mut query = query.clone();
        if query.title_types.is_empty() {
            query.title_types = ImdbQuery::title_types_for(kind);
        }
        let mut req = Request::get("search/title/").payload(Payload::Large);
        for (k, v) in query.params(page, PAGE_SIZE) {
            req = req.query(&k, v);
        }
        let html = self.http.text(&req).await?;
        let parsed = parse_list(&html, kind);
        debug!(
            items = parsed.items.len(),
            next = ?parsed.next_start,
            "imdb list page"
        );
        Ok(parsed)
    }

    pub async fn title(&self, imdb: &str, full: bool) -> Result<Option<MetaRecord>, MetadataError> {
        let html = self
            .http
            .text(&Request::get(format!("title/{imdb}/")).payload(Payload::Medium))
            .await?;
        let record = parse_title(&html, imdb, full);
        if record.is_none() {
            self.missing.note("imdb", imdb, "json-ld");
        }
        Ok(record)
    }
}

impl Default for ImdbClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MetadataProvider for ImdbClient {
    fn provider(&self) -> Provider {
        Provider::Imdb
    }

    async fn fetch(&self, seed: &ItemSeed, full: bool) -> Result<Option<MetaRecord>, MetadataError> {
        if !matches!(seed.kind, MediaKind::Movie | MediaKind::Show | MediaKind::Episode) {
            return Ok(None);
        }
        let Some(imdb) = seed.ids.imdb.as_deref() else {
            return Ok(None);
        };
        let mut record = self.title(imdb, full).await?;
        if let Some(r) = record.as_mut() {
            r.kind = seed.kind;
            r.season = seed.season;
            r.episode = seed.episode;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LIST_PAGE: &str = r#"
<div class="lister-list">
<div class="lister-item mode-advanced">
  <div class="lister-item-image float-left">
    <a href="/title/tt7286456/"><img loadlate="https://m.media-amazon.com/images/M/joker._V1_UX67_CR0,0,67,98_AL_.jpg"></a>
  </div>
  <div class="lister-item-content">
    <h3 class="lister-item-header">
      <span class="lister-item-index unbold text-primary">1.</span>
      <a href="/title/tt7286456/?ref_=adv_li_tt"
>Joker</a>
      <span class="lister-item-year text-muted unbold">(2019)</span>
    </h3>
    <p class="text-muted ">
      <span class="certificate">R</span>
      <span class="runtime">122 min</span>
      <span class="genre">
Crime, Drama, Thriller            </span>
    </p>
    <div class="ratings-bar">
      <div class="inline-block ratings-imdb-rating" name="ir" data-value="8.4">
        <strong>8.4</strong>
      </div>
      <div class="inline-block ratings-imdb-rating" name="ir" data-value="1.0">
    </div>
    <p class="text-muted">
    In Gotham City, mentally troubled comedian Arthur Fleck is disregarded &amp; mistreated.</p>
    <p class="">
      Director:
      <a href="/name/nm0680846/">Todd Phillips</a>
      <span class="ghost">|</span>
      Stars:
      <a href="/name/nm0001618/">Joaquin Phoenix</a>,
      <a href="/name/nm0000134/">Robert De Niro</a>
    </p>
    <p class="sort-num_votes-visible">
      <span class="text-muted">Votes:</span>
      <span name="nv" data-value="1234567">1,234,567</span>
    </p>
  </div>
</div>
<div class="lister-item mode-advanced">
  <div class="lister-item-content">
    <h3 class="lister-item-header">
      <a href="/title/tt1950186/">Ford v Ferrari</a>
      <span class="lister-item-year text-muted unbold">(I) (2019)</span>
    </h3>
    <div class="ratings-bar"><strong> 8.1 </strong>
    <p class="sort-num_votes-visible">
      <span class="text-muted">Votes:</span>
      <span>  432,100</span>
</div>
</div>
<div class="desc">
  <a href="/search/title/?release_date=2019-01-01,2019-12-31&amp;start=51&amp;ref_=adv_nxt" class="lister-page-next next-page">Next »</a>
</div>
"#;

    #[test]
    fn parses_list_items_and_next_token() {
        let page = parse_list(LIST_PAGE, MediaKind::Movie);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_start, Some(51));

        let joker = &page.items[0];
        assert_eq!(joker.ids.imdb.as_deref(), Some("tt7286456"));
        assert_eq!(joker.title.as_deref(), Some("Joker"));
        assert_eq!(joker.year, Some(2019));
        assert_eq!(joker.certification.as_deref(), Some("R"));
        assert_eq!(joker.runtime, Some(122 * 60));
        assert_eq!(joker.genre, vec!["Crime", "Drama", "Thriller"]);
        // The first of the duplicated rating classes wins.
        assert_eq!(joker.ratings[&Provider::Imdb].rating, 8.4);
        assert_eq!(joker.ratings[&Provider::Imdb].votes, 1_234_567);
        assert_eq!(
            joker.plot.as_deref(),
            Some("In Gotham City, mentally troubled comedian Arthur Fleck is disregarded & mistreated.")
        );
        assert_eq!(joker.director, vec!["Todd Phillips"]);
        assert_eq!(joker.cast.len(), 2);
        assert_eq!(
            joker.best_image(ImageType::Poster),
            Some("https://m.media-amazon.com/images/M/joker.jpg")
        );
    }

    #[test]
    fn falls_back_to_plain_rating_and_vote_markup() {
        let page = parse_list(LIST_PAGE, MediaKind::Movie);
        let ford = &page.items[1];
        assert_eq!(ford.title.as_deref(), Some("Ford v Ferrari"));
        assert_eq!(ford.year, Some(2019));
        assert_eq!(ford.ratings[&Provider::Imdb].rating, 8.1);
        assert_eq!(ford.ratings[&Provider::Imdb].votes, 432_100);
        assert!(ford.plot.is_none());
    }

    #[test]
    fn query_builds_release_window_and_offset() {
        let q = ImdbQuery {
            title_types: vec!["feature".into()],
            year_from: Some(2019),
            year_to: Some(2019),
            min_votes: Some(500),
            ..Default::default()
        };
        let params = q.params(2, 50);
        assert!(params.contains(&("release_date".into(), "2019-01-01,2019-12-31".into())));
        assert!(params.contains(&("num_votes".into(), "500,".into())));
        assert!(params.contains(&("start".into(), "51".into())));
        assert!(params.contains(&("title_type".into(), "feature".into())));
    }

    #[test]
    fn reads_title_json_ld() {
        let html = r#"<html><head><script type="application/ld+json">{
            "@type": "Movie", "name": "The Shawshank Redemption",
            "datePublished": "1994-10-14", "genre": ["Drama"], "contentRating": "R",
            "description": "Two imprisoned men bond over a number of years.",
            "duration": "PT2H22M",
            "aggregateRating": {"ratingValue": 9.3, "ratingCount": 2800000},
            "director": [{"@type": "Person", "name": "Frank Darabont"}],
            "creator": [{"@type": "Organization", "name": "Castle Rock"}, {"@type": "Person", "name": "Stephen King"}],
            "actor": [{"@type": "Person", "name": "Tim Robbins"}],
            "image": "https://img/poster.jpg"
        }</script></head></html>"#;

        let flat = parse_title(html, "tt0111161", false).unwrap();
        assert_eq!(flat.year, Some(1994));
        assert_eq!(flat.ratings[&Provider::Imdb].votes, 2_800_000);
        assert!(flat.plot.is_none());
        assert!(flat.cast.is_empty());

        let full = parse_title(html, "tt0111161", true).unwrap();
        assert_eq!(full.runtime, Some(8520));
        assert_eq!(full.writer, vec!["Stephen King"]);
        assert_eq!(full.studio, vec!["Castle Rock"]);
        assert_eq!(full.director, vec!["Frank Darabont"]);
        assert_eq!(full.best_image(ImageType::Poster), Some("https://img/poster.jpg"));
    }

    #[test]
    fn iso_durations() {
        assert_eq!(parse_duration("PT2H22M"), Some(8520));
        assert_eq!(parse_duration("PT45M"), Some(2700));
        assert_eq!(parse_duration("P1D"), None);
    }

    #[tokio::test]
    async fn discover_requests_the_year_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/title/"))
            .and(query_param("release_date", "2019-01-01,2019-12-31"))
            .and(query_param("start", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LIST_PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let imdb = ImdbClient::with_base(&server.uri());
        let query = ImdbQuery {
            year_from: Some(2019),
            year_to: Some(2019),
            ..Default::default()
        };
        let page = imdb.discover(MediaKind::Movie, &query, 1).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_start, Some(51));
    }
}
