//! TMDb (The Movie Database) provider client.
//!
//! Uses TMDb API v3: https://developer.themoviedb.org/docs

use std::sync::Arc;

use chrono::NaiveDate;
use cinemeld_cache::{Cache, Tier};
use cinemeld_core::types::{IdBundle, IdType, ItemSeed, MediaKind};
use serde_json::Value;

use crate::http::{Auth, Payload, ProviderHttp, Request};
use crate::provider::MetadataProvider;
use crate::record::{
    CollectionRef, Image, ImageType, MetaRecord, Person, SeasonInfo, ShowStatus,
};
use crate::text::{MissingFields, date_of, f64_at, names_at, str_at, u64_at, year_of};
use crate::{MetadataError, Provider};

pub const BASE_URL: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE: &str = "https://image.tmdb.org/t/p";
const CAST_LIMIT: usize = 20;

pub struct TmdbClient {
    http: ProviderHttp,
    language: String,
    missing: MissingFields,
}

/// One page of a TMDb listing.
#[derive(Debug, Clone, Default)]
pub struct TmdbPage {
    pub items: Vec<MetaRecord>,
    pub page: u32,
    pub total_pages: u32,
}

impl TmdbPage {
    pub fn next_page(&self) -> Option<u32> {
        (self.page < self.total_pages).then_some(self.page + 1)
    }
}

/// Filters of the discover endpoint. Dates and years apply to the release date
/// for movies and the first air date for shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoverQuery {
    pub sort_by: Option<String>,
    pub genres: Vec<u32>,
    pub year: Option<i32>,
    pub released_from: Option<NaiveDate>,
    pub released_to: Option<NaiveDate>,
    /// Release types (1 premiere .. 6 TV); movies only.
    pub release_types: Vec<u8>,
    pub original_language: Option<String>,
    pub region: Option<String>,
    pub certification: Option<(String, String)>,
    pub companies: Vec<u64>,
    pub keywords: Vec<u64>,
    /// Cast or crew members, by TMDb person id.
    pub people: Vec<u64>,
    pub min_votes: Option<u32>,
    pub min_rating: Option<f64>,
}

impl DiscoverQuery {
    pub fn params(&self, kind: MediaKind) -> Vec<(String, String)> {
        let movie = kind == MediaKind::Movie;
        let date_key = if movie { "primary_release_date" } else { "first_air_date" };
        let mut p: Vec<(String, String)> = Vec::new();
        let mut push = |k: &str, v: String| p.push((k.to_string(), v));

        push("sort_by", self.sort_by.clone().unwrap_or_else(|| "popularity.desc".into()));
        if !self.genres.is_empty() {
            push("with_genres", join(&self.genres, "|"));
        }
        if let Some(year) = self.year {
            let key = if movie { "primary_release_year" } else { "first_air_date_year" };
            push(key, year.to_string());
        }
        if let Some(from) = self.released_from {
            push(&format!("{date_key}.gte"), from.to_string());
        }
        if let Some(to) = self.released_to {
            push(&format!("{date_key}.lte"), to.to_string());
        }
        if movie && !self.release_types.is_empty() {
            push("with_release_type", join(&self.release_types, "|"));
        }
        if let Some(lang) = &self.original_language {
            push("with_original_language", lang.clone());
        }
        if let Some(region) = &self.region {
            push("region", region.clone());
        }
        if let Some((country, cert)) = &self.certification {
            push("certification_country", country.clone());
            push("certification", cert.clone());
        }
        if !self.companies.is_empty() {
            push("with_companies", join(&self.companies, "|"));
        }
        if !self.keywords.is_empty() {
            push("with_keywords", join(&self.keywords, "|"));
        }
        if !self.people.is_empty() {
            push("with_people", join(&self.people, ","));
        }
        if let Some(votes) = self.min_votes {
            push("vote_count.gte", votes.to_string());
        }
        if let Some(rating) = self.min_rating {
            push("vote_average.gte", rating.to_string());
        }
        p
    }
}

fn join<T: ToString>(values: &[T], sep: &str) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

fn path_kind(kind: MediaKind) -> &'static str {
    if kind.is_episodic() { "tv" } else { "movie" }
}

impl TmdbClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base(BASE_URL, api_key)
    }

    pub fn with_base(base: &str, api_key: String) -> Self {
        Self {
            http: ProviderHttp::new(
                "tmdb",
                base,
                Auth::QueryKey {
                    name: "api_key",
                    value: api_key,
                },
            ),
            language: "en".into(),
            missing: MissingFields::default(),
        }
    }

    /// Keep catalogue responses for a day.
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.http = self.http.with_cache(cache, Tier::Medium);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    async fn get_json(
        &self,
        path: &str,
        params: &[(&str, String)],
        payload: Payload,
    ) -> Result<Value, MetadataError> {
        let mut req = Request::get(path).payload(payload).query("language", &self.language);
        for (k, v) in params {
            req = req.query(k, v);
        }
        Ok(self.http.json(&req).await?.body)
    }

    fn detail_params(&self, kind: MediaKind) -> Vec<(&'static str, String)> {
        let ratings = if kind == MediaKind::Movie { "release_dates" } else { "content_ratings" };
        vec![
            (
                "append_to_response",
                format!("credits,images,external_ids,{ratings}"),
            ),
            ("include_image_language", format!("{},null", self.language)),
        ]
    }

    pub async fn movie(&self, id: u64) -> Result<MetaRecord, MetadataError> {
        let data = self
            .get_json(&format!("movie/{id}"), &self.detail_params(MediaKind::Movie), Payload::Medium)
            .await?;
        Ok(self.parse_movie(&data))
    }

    pub async fn show(&self, id: u64) -> Result<MetaRecord, MetadataError> {
        let data = self
            .get_json(&format!("tv/{id}"), &self.detail_params(MediaKind::Show), Payload::Medium)
            .await?;
        Ok(self.parse_show(&data))
    }

    pub async fn season(&self, show_id: u64, number: u32) -> Result<MetaRecord, MetadataError> {
        let data = self
            .get_json(
                &format!("tv/{show_id}/season/{number}"),
                &[("append_to_response", "images,external_ids".into())],
                Payload::Medium,
            )
            .await?;
        Ok(self.parse_season(&data, number))
    }

    pub async fn episode(
        &self,
        show_id: u64,
        season: u32,
        episode: u32,
    ) -> Result<MetaRecord, MetadataError> {
        let data = self
            .get_json(
                &format!("tv/{show_id}/season/{season}/episode/{episode}"),
                &[("append_to_response", "credits,external_ids".into())],
                Payload::Small,
            )
            .await?;
        Ok(self.parse_episode(&data, season, episode))
    }

    pub async fn collection(&self, id: u64) -> Result<MetaRecord, MetadataError> {
        let data = self
            .get_json(&format!("collection/{id}"), &[], Payload::Small)
            .await?;
        let mut record = MetaRecord::new(MediaKind::Set, IdBundle::tmdb(id));
        record.title = str_at(&data, "name");
        record.plot = str_at(&data, "overview");
        self.add_poster_paths(&mut record, &data);
        Ok(record)
    }

    /// Translate an external id into TMDb ids.
    pub async fn find(
        &self,
        kind: MediaKind,
        id_type: IdType,
        value: &str,
    ) -> Result<Option<IdBundle>, MetadataError> {
        let source = match id_type {
            IdType::Imdb => "imdb_id",
            IdType::Tvdb => "tvdb_id",
            _ => return Ok(None),
        };
        let data = self
            .get_json(&format!("find/{value}"), &[("external_source", source.into())], Payload::Small)
            .await?;
        let bucket = match kind {
            MediaKind::Movie => "movie_results",
            MediaKind::Episode => "tv_episode_results",
            MediaKind::Season => "tv_season_results",
            _ => "tv_results",
        };
        Ok(data
            .get(bucket)
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(|r| u64_at(r, "id"))
            .map(|tmdb| {
                let mut ids = IdBundle::tmdb(tmdb);
                ids.set(id_type, value);
                ids
            }))
    }

    pub async fn discover(
        &self,
        kind: MediaKind,
        query: &DiscoverQuery,
        page: u32,
    ) -> Result<TmdbPage, MetadataError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        let owned = query.params(kind);
        for (k, v) in &owned {
            params.push((k.as_str(), v.clone()));
        }
        params.push(("page", page.max(1).to_string()));
        let data = self
            .get_json(&format!("discover/{}", path_kind(kind)), &params, Payload::Medium)
            .await?;
        Ok(self.parse_listing(&data, kind))
    }

    pub async fn search_titles(
        &self,
        kind: MediaKind,
        query: &str,
        year: Option<i32>,
        page: u32,
    ) -> Result<TmdbPage, MetadataError> {
        let mut params = vec![("query", query.to_string()), ("page", page.max(1).to_string())];
        if let Some(y) = year {
            let key = if kind == MediaKind::Movie { "year" } else { "first_air_date_year" };
            params.push((key, y.to_string()));
        }
        let data = self
            .get_json(&format!("search/{}", path_kind(kind)), &params, Payload::Small)
            .await?;
        Ok(self.parse_listing(&data, kind))
    }

    /// People matching `query`, or popular people when it is empty.
    pub async fn people(&self, query: Option<&str>, page: u32) -> Result<TmdbPage, MetadataError> {
        let mut params = vec![("page", page.max(1).to_string())];
        let path = match query {
            Some(q) if !q.trim().is_empty() => {
                params.push(("query", q.trim().to_string()));
                "search/person"
            }
            _ => "person/popular",
        };
        let data = self.get_json(path, &params, Payload::Small).await?;
        Ok(self.parse_listing(&data, MediaKind::Person))
    }

    fn parse_listing(&self, data: &Value, kind: MediaKind) -> TmdbPage {
        let items = data
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .map(|r| match kind {
                        MediaKind::Movie => self.parse_movie(r),
                        MediaKind::Person => parse_person(r),
                        _ => self.parse_show(r),
                    })
                    .collect()
            })
            .unwrap_or_default();
        TmdbPage {
            items,
            page: u64_at(data, "page").unwrap_or(1) as u32,
            total_pages: u64_at(data, "total_pages").unwrap_or(1) as u32,
        }
    }

    fn parse_movie(&self, data: &Value) -> MetaRecord {
        let mut record = MetaRecord::new(MediaKind::Movie, external_ids(data));
        record.title = str_at(data, "title");
        record.original_title = str_at(data, "original_title");
        record.plot = str_at(data, "overview");
        record.tagline = str_at(data, "tagline");
        if let Some(date) = str_at(data, "release_date") {
            record.year = year_of(&date);
            record.premiered = date_of(&date);
        }
        record.runtime = u64_at(data, "runtime")
            .filter(|m| *m > 0)
            .map(|m| (m * 60) as u32);
        record.homepage = str_at(data, "homepage");
        record.genre = names_at(data, "genres");
        record.studio = names_at(data, "production_companies");
        record.country = data
            .get("production_countries")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|c| str_at(c, "iso_3166_1")).collect())
            .unwrap_or_default();
        record.language = str_at(data, "original_language").into_iter().collect();
        record.set_provider_rating(
            Provider::Tmdb,
            f64_at(data, "vote_average"),
            u64_at(data, "vote_count"),
        );
        if let Some(c) = data.get("belongs_to_collection").filter(|c| !c.is_null()) {
            if let (Some(name), Some(id)) = (str_at(c, "name"), u64_at(c, "id")) {
                record.collection = Some(CollectionRef {
                    name,
                    ids: IdBundle::tmdb(id),
                });
            }
        }
        record.certification = certification(data, &["US"]);
        self.add_credits(&mut record, data.get("credits"));
        self.add_images(&mut record, data);
        if record.title.is_none() {
            self.missing.note("tmdb", &format!("{:?}", record.ids.tmdb), "title");
        }
        record
    }

    fn parse_show(&self, data: &Value) -> MetaRecord {
        let mut record = MetaRecord::new(MediaKind::Show, external_ids(data));
        record.title = str_at(data, "name");
        record.original_title = str_at(data, "original_name");
        record.plot = str_at(data, "overview");
        record.tagline = str_at(data, "tagline");
        if let Some(date) = str_at(data, "first_air_date") {
            record.year = year_of(&date);
            record.premiered = date_of(&date);
        }
        record.runtime = data
            .get("episode_run_time")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_u64)
            .map(|m| (m * 60) as u32);
        record.homepage = str_at(data, "homepage");
        record.genre = names_at(data, "genres");
        record.studio = names_at(data, "production_companies");
        record.network = names_at(data, "networks");
        record.country = names_at(data, "origin_country");
        record.language = str_at(data, "original_language").into_iter().collect();
        record.status = str_at(data, "status").and_then(|s| ShowStatus::parse(&s));
        record.aired_episodes = u64_at(data, "number_of_episodes").map(|n| n as u32);
        record.seasons = data
            .get("seasons")
            .and_then(Value::as_array)
            .map(|seasons| {
                seasons
                    .iter()
                    .filter_map(|s| {
                        Some(SeasonInfo {
                            number: u64_at(s, "season_number")? as u32,
                            episodes: u64_at(s, "episode_count").unwrap_or(0) as u32,
                            aired: None,
                            premiered: str_at(s, "air_date").and_then(|d| date_of(&d)),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        record.set_provider_rating(
            Provider::Tmdb,
            f64_at(data, "vote_average"),
            u64_at(data, "vote_count"),
        );
        record.certification = data
            .get("content_ratings")
            .and_then(|c| c.get("results"))
            .and_then(Value::as_array)
            .and_then(|a| {
                a.iter()
                    .find(|r| str_at(r, "iso_3166_1").as_deref() == Some("US"))
                    .and_then(|r| str_at(r, "rating"))
            });
        for creator in names_at(data, "created_by") {
            record.writer.push(creator);
        }
        self.add_credits(&mut record, data.get("credits"));
        self.add_images(&mut record, data);
        record
    }

    fn parse_season(&self, data: &Value, number: u32) -> MetaRecord {
        let mut record = MetaRecord::new(MediaKind::Season, external_ids(data));
        record.season = Some(number);
        record.title = str_at(data, "name");
        record.plot = str_at(data, "overview");
        if let Some(date) = str_at(data, "air_date") {
            record.year = year_of(&date);
            record.premiered = date_of(&date);
        }
        let episodes = data
            .get("episodes")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0) as u32;
        record.seasons.push(SeasonInfo {
            number,
            episodes,
            aired: None,
            premiered: record.premiered,
        });
        self.add_images(&mut record, data);
        record
    }

    fn parse_episode(&self, data: &Value, season: u32, episode: u32) -> MetaRecord {
        let mut record = MetaRecord::new(MediaKind::Episode, external_ids(data));
        record.season = Some(season);
        record.episode = Some(episode);
        record.title = str_at(data, "name");
        record.plot = str_at(data, "overview");
        if let Some(date) = str_at(data, "air_date") {
            record.year = year_of(&date);
            record.premiered = date_of(&date);
        }
        record.runtime = u64_at(data, "runtime").map(|m| (m * 60) as u32);
        record.set_provider_rating(
            Provider::Tmdb,
            f64_at(data, "vote_average"),
            u64_at(data, "vote_count"),
        );
        if let Some(crew) = data.get("crew").and_then(Value::as_array) {
            for person in crew {
                match str_at(person, "job").as_deref() {
                    Some("Director") => record.director.extend(str_at(person, "name")),
                    Some("Writer") | Some("Screenplay") => record.writer.extend(str_at(person, "name")),
                    _ => {}
                }
            }
        }
        if let Some(path) = str_at(data, "still_path") {
            record.add_image(
                ImageType::Landscape,
                Image {
                    url: format!("{IMAGE_BASE}/original{path}"),
                    language: None,
                    score: 0.0,
                    priority: 0,
                    provider: Provider::Tmdb,
                },
            );
        }
        self.add_credits(&mut record, data.get("credits"));
        record
    }

    fn add_credits(&self, record: &mut MetaRecord, credits: Option<&Value>) {
        let Some(credits) = credits else {
            return;
        };
        if let Some(cast) = credits.get("cast").and_then(Value::as_array) {
            for person in cast.iter().take(CAST_LIMIT) {
                let Some(name) = str_at(person, "name") else {
                    continue;
                };
                record.cast.push(Person {
                    name,
                    role: "Actor".into(),
                    character: str_at(person, "character"),
                    thumb: str_at(person, "profile_path").map(|p| format!("{IMAGE_BASE}/w185{p}")),
                });
            }
        }
        if let Some(crew) = credits.get("crew").and_then(Value::as_array) {
            for person in crew {
                let Some(name) = str_at(person, "name") else {
                    continue;
                };
                match str_at(person, "job").as_deref() {
                    Some("Director") if !record.director.contains(&name) => record.director.push(name),
                    Some("Screenplay") | Some("Writer") | Some("Novel")
                        if !record.writer.contains(&name) =>
                    {
                        record.writer.push(name)
                    }
                    _ => {}
                }
            }
        }
    }

    fn add_poster_paths(&self, record: &mut MetaRecord, data: &Value) {
        for (key, kind) in [("poster_path", ImageType::Poster), ("backdrop_path", ImageType::Fanart)] {
            if let Some(path) = str_at(data, key) {
                record.add_image(
                    kind,
                    Image {
                        url: format!("{IMAGE_BASE}/original{path}"),
                        language: None,
                        score: 0.0,
                        priority: u32::MAX,
                        provider: Provider::Tmdb,
                    },
                );
            }
        }
    }

    /// Images ordered by language match, then vote average, then retrieval order.
    fn add_images(&self, record: &mut MetaRecord, data: &Value) {
        let Some(images) = data.get("images") else {
            self.add_poster_paths(record, data);
            return;
        };
        for (bucket, kind) in [
            ("posters", ImageType::Poster),
            ("backdrops", ImageType::Fanart),
            ("logos", ImageType::Logo),
        ] {
            let Some(list) = images.get(bucket).and_then(Value::as_array) else {
                continue;
            };
            let mut candidates: Vec<Image> = list
                .iter()
                .enumerate()
                .filter_map(|(index, img)| {
                    Some(Image {
                        url: format!("{IMAGE_BASE}/original{}", str_at(img, "file_path")?),
                        language: str_at(img, "iso_639_1"),
                        score: f64_at(img, "vote_average").unwrap_or(0.0),
                        priority: index as u32,
                        provider: Provider::Tmdb,
                    })
                })
                .collect();
            let lang = self.language.as_str();
            candidates.sort_by(|a, b| {
                let a_match = a.language.as_deref() == Some(lang);
                let b_match = b.language.as_deref() == Some(lang);
                b_match
                    .cmp(&a_match)
                    .then(b.score.total_cmp(&a.score))
                    .then(a.priority.cmp(&b.priority))
            });
            for image in candidates {
                record.add_image(kind, image);
            }
        }
        self.add_poster_paths(record, data);
    }
}

fn external_ids(data: &Value) -> IdBundle {
    let mut ids = IdBundle::default();
    ids.tmdb = u64_at(data, "id");
    let ext = data.get("external_ids").unwrap_or(data);
    if let Some(imdb) = str_at(ext, "imdb_id").or_else(|| str_at(data, "imdb_id")) {
        ids.imdb = Some(imdb);
    }
    ids.tvdb = u64_at(ext, "tvdb_id");
    ids
}

/// Theatrical certification for the first matching country.
fn certification(data: &Value, countries: &[&str]) -> Option<String> {
    let results = data.get("release_dates")?.get("results")?.as_array()?;
    countries.iter().find_map(|country| {
        let entry = results
            .iter()
            .find(|r| str_at(r, "iso_3166_1").as_deref() == Some(*country))?;
        let dates = entry.get("release_dates")?.as_array()?;
        dates
            .iter()
            .filter(|d| u64_at(d, "type") == Some(3))
            .chain(dates.iter())
            .find_map(|d| str_at(d, "certification"))
    })
}

fn parse_person(data: &Value) -> MetaRecord {
    let mut record = MetaRecord::new(MediaKind::Person, IdBundle::default());
    record.ids.tmdb = u64_at(data, "id");
    record.title = str_at(data, "name");
    if let Some(path) = str_at(data, "profile_path") {
        record.add_image(
            ImageType::Photo,
            Image {
                url: format!("{IMAGE_BASE}/w500{path}"),
                language: None,
                score: f64_at(data, "popularity").unwrap_or(0.0),
                priority: 0,
                provider: Provider::Tmdb,
            },
        );
    }
    record
}

#[async_trait::async_trait]
impl MetadataProvider for TmdbClient {
    fn provider(&self) -> Provider {
        Provider::Tmdb
    }

    async fn fetch(&self, seed: &ItemSeed, _full: bool) -> Result<Option<MetaRecord>, MetadataError> {
        let show_tmdb = seed.show_ids.as_ref().and_then(|s| s.tmdb).or(seed.ids.tmdb);
        let record = match (seed.kind, seed.season, seed.episode) {
            (MediaKind::Movie, _, _) => match seed.ids.tmdb {
                Some(id) => self.movie(id).await?,
                None => return Ok(None),
            },
            (MediaKind::Show, _, _) => match seed.ids.tmdb {
                Some(id) => self.show(id).await?,
                None => return Ok(None),
            },
            (MediaKind::Season, Some(s), _) => match show_tmdb {
                Some(id) => self.season(id, s).await?,
                None => return Ok(None),
            },
            (MediaKind::Episode, Some(s), Some(e)) => match show_tmdb {
                Some(id) => self.episode(id, s, e).await?,
                None => return Ok(None),
            },
            (MediaKind::Set, _, _) => match seed.ids.tmdb {
                Some(id) => self.collection(id).await?,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(record))
    }

    async fn resolve(&self, seed: &ItemSeed) -> Result<Option<IdBundle>, MetadataError> {
        if seed.ids.tmdb.is_some() {
            return Ok(None);
        }
        for id_type in [IdType::Imdb, IdType::Tvdb] {
            if let Some(value) = seed.ids.get(id_type) {
                if let Some(found) = self.find(seed.kind, id_type, &value).await? {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    async fn search(
        &self,
        kind: MediaKind,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<ItemSeed>, MetadataError> {
        let page = if kind == MediaKind::Person {
            self.people(Some(query), 1).await?
        } else {
            self.search_titles(kind, query, year, 1).await?
        };
        Ok(page.items.iter().map(MetaRecord::seed).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> TmdbClient {
        TmdbClient::new("key".into())
    }

    #[test]
    fn parse_movie_metadata_from_json() {
        let json = serde_json::json!({
            "id": 27205,
            "imdb_id": "tt1375666",
            "title": "Inception",
            "original_title": "Inception",
            "overview": "A thief who steals corporate secrets...",
            "tagline": "Your mind is the scene of the crime.",
            "release_date": "2010-07-16",
            "runtime": 148,
            "vote_average": 8.4,
            "vote_count": 35000,
            "poster_path": "/poster.jpg",
            "backdrop_path": "/backdrop.jpg",
            "belongs_to_collection": null,
            "genres": [
                { "id": 28, "name": "Action" },
                { "id": 878, "name": "Science Fiction" }
            ],
            "production_companies": [
                { "name": "Warner Bros." }
            ],
            "release_dates": { "results": [
                { "iso_3166_1": "US", "release_dates": [
                    { "type": 1, "certification": "" },
                    { "type": 3, "certification": "PG-13" }
                ] }
            ] },
            "credits": {
                "cast": [
                    { "name": "Leonardo DiCaprio", "character": "Cobb", "profile_path": "/leo.jpg" }
                ],
                "crew": [
                    { "name": "Christopher Nolan", "job": "Director", "profile_path": "/nolan.jpg" },
                    { "name": "Christopher Nolan", "job": "Writer" }
                ]
            }
        });

        let meta = client().parse_movie(&json);
        assert_eq!(meta.title.as_deref(), Some("Inception"));
        assert_eq!(meta.ids.tmdb, Some(27205));
        assert_eq!(meta.ids.imdb.as_deref(), Some("tt1375666"));
        assert_eq!(meta.year, Some(2010));
        assert_eq!(meta.runtime, Some(148 * 60));
        assert_eq!(meta.certification.as_deref(), Some("PG-13"));
        assert_eq!(meta.genre.len(), 2);
        assert!(meta.best_image(ImageType::Poster).unwrap().contains("/poster.jpg"));
        assert_eq!(meta.ratings[&Provider::Tmdb].votes, 35000);

        assert_eq!(meta.cast.len(), 1);
        assert_eq!(meta.cast[0].name, "Leonardo DiCaprio");
        assert_eq!(meta.cast[0].character.as_deref(), Some("Cobb"));
        assert_eq!(meta.director, vec!["Christopher Nolan"]);
        assert_eq!(meta.writer, vec!["Christopher Nolan"]);
    }

    #[test]
    fn parse_series_metadata_from_json() {
        let json = serde_json::json!({
            "id": 1396,
            "name": "Breaking Bad",
            "original_name": "Breaking Bad",
            "overview": "A high school chemistry teacher...",
            "first_air_date": "2008-01-20",
            "status": "Ended",
            "number_of_episodes": 62,
            "vote_average": 9.5,
            "poster_path": "/bb.jpg",
            "external_ids": { "imdb_id": "tt0903747", "tvdb_id": 81189 },
            "networks": [{ "name": "AMC" }],
            "seasons": [
                { "season_number": 1, "episode_count": 7, "air_date": "2008-01-20" },
                { "season_number": 2, "episode_count": 13 }
            ],
            "genres": [
                { "name": "Drama" }
            ]
        });

        let meta = client().parse_show(&json);
        assert_eq!(meta.title.as_deref(), Some("Breaking Bad"));
        assert_eq!(meta.year, Some(2008));
        assert_eq!(meta.status, Some(ShowStatus::Ended));
        assert_eq!(meta.ids.tvdb, Some(81189));
        assert_eq!(meta.network, vec!["AMC"]);
        assert_eq!(meta.season_info(2).map(|s| s.episodes), Some(13));
        assert_eq!(meta.aired_episodes, Some(62));
    }

    #[test]
    fn images_prefer_language_then_votes_then_order() {
        let json = serde_json::json!({
            "id": 1,
            "images": { "posters": [
                { "file_path": "/fr.jpg", "iso_639_1": "fr", "vote_average": 9.0 },
                { "file_path": "/en-low.jpg", "iso_639_1": "en", "vote_average": 4.0 },
                { "file_path": "/en-high.jpg", "iso_639_1": "en", "vote_average": 6.0 },
                { "file_path": "/en-high-late.jpg", "iso_639_1": "en", "vote_average": 6.0 }
            ] }
        });
        let meta = client().parse_movie(&json);
        let urls: Vec<&str> = meta.images[&ImageType::Poster]
            .iter()
            .map(|i| i.url.rsplit('/').next().unwrap())
            .collect();
        assert_eq!(urls, vec!["en-high.jpg", "en-high-late.jpg", "en-low.jpg", "fr.jpg"]);
    }

    #[test]
    fn discover_params_follow_media_kind() {
        let q = DiscoverQuery {
            year: Some(2019),
            genres: vec![28, 12],
            release_types: vec![2, 3],
            ..Default::default()
        };
        let movie = q.params(MediaKind::Movie);
        assert!(movie.contains(&("primary_release_year".into(), "2019".into())));
        assert!(movie.contains(&("with_genres".into(), "28|12".into())));
        assert!(movie.contains(&("with_release_type".into(), "2|3".into())));

        let show = q.params(MediaKind::Show);
        assert!(show.contains(&("first_air_date_year".into(), "2019".into())));
        assert!(!show.iter().any(|(k, _)| k == "with_release_type"));
    }

    #[tokio::test]
    async fn find_resolves_imdb_to_tmdb() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/find/tt0111161"))
            .and(query_param("external_source", "imdb_id"))
            .and(query_param("api_key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "movie_results": [{ "id": 278, "title": "The Shawshank Redemption" }]
            })))
            .mount(&server)
            .await;

        let tmdb = TmdbClient::with_base(&server.uri(), "key".into());
        let seed = ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt0111161"));
        let ids = tmdb.resolve(&seed).await.unwrap().unwrap();
        assert_eq!(ids.tmdb, Some(278));
        assert_eq!(ids.imdb.as_deref(), Some("tt0111161"));
    }

    #[tokio::test]
    async fn missing_title_is_terminal_not_found() {
        let server = MockServer::start().await;
        Mock::given(path("/movie/1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let tmdb = TmdbClient::with_base(&server.uri(), "key".into());
        let seed = ItemSeed::new(MediaKind::Movie, IdBundle::tmdb(1));
        assert!(matches!(tmdb.fetch(&seed, false).await, Err(MetadataError::NotFound)));
        let no_id = ItemSeed::new(MediaKind::Movie, IdBundle::imdb("tt1"));
        assert!(tmdb.fetch(&no_id, false).await.unwrap().is_none());
    }
}
