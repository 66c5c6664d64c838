//! Fanart.tv artwork client. Only the most-liked image of each bucket is kept.

use std::sync::Arc;

use cinemeld_cache::{Cache, Tier};
use cinemeld_core::types::{ItemSeed, MediaKind};
use serde_json::Value;

use crate::http::{Auth, ProviderHttp, Request};
use crate::provider::MetadataProvider;
use crate::record::{Image, ImageType, MetaRecord};
use crate::text::{str_at, u64_at};
use crate::{MetadataError, Provider};

pub const BASE_URL: &str = "https://webservice.fanart.tv/v3";

const MOVIE_BUCKETS: &[(&str, ImageType)] = &[
    ("movieposter", ImageType::Poster),
    ("moviebackground", ImageType::Fanart),
    ("hdmovielogo", ImageType::Logo),
    ("movielogo", ImageType::Logo),
    ("hdmovieclearart", ImageType::Clearart),
    ("movieart", ImageType::Clearart),
    ("moviebanner", ImageType::Banner),
    ("moviethumb", ImageType::Landscape),
];

const SHOW_BUCKETS: &[(&str, ImageType)] = &[
    ("tvposter", ImageType::Poster),
    ("showbackground", ImageType::Fanart),
    ("hdtvlogo", ImageType::Logo),
    ("clearlogo", ImageType::Logo),
    ("hdclearart", ImageType::Clearart),
    ("clearart", ImageType::Clearart),
    ("tvbanner", ImageType::Banner),
    ("tvthumb", ImageType::Landscape),
];

const SEASON_BUCKETS: &[(&str, ImageType)] = &[
    ("seasonposter", ImageType::Poster),
    ("seasonbanner", ImageType::Banner),
    ("seasonthumb", ImageType::Landscape),
];

pub struct FanartClient {
    http: ProviderHttp,
}

impl FanartClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base(BASE_URL, api_key)
    }

    pub fn with_base(base: &str, api_key: String) -> Self {
        Self {
            http: ProviderHttp::new(
                "fanart",
                base,
                Auth::HeaderKey {
                    name: "api-key",
                    value: api_key,
                },
            ),
        }
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.http = self.http.with_cache(cache, Tier::Long);
        self
    }

    pub async fn movie(&self, id: &str) -> Result<Value, MetadataError> {
        Ok(self.http.json(&Request::get(format!("movies/{id}"))).await?.body)
    }

    pub async fn show(&self, tvdb: u64) -> Result<Value, MetadataError> {
        Ok(self.http.json(&Request::get(format!("tv/{tvdb}"))).await?.body)
    }
}

/// Best image of each bucket, keyed by image type. Season buckets are
/// filtered to `season` when given.
pub fn parse_buckets(
    data: &Value,
    buckets: &[(&str, ImageType)],
    season: Option<u32>,
    record: &mut MetaRecord,
) {
    for (bucket, kind) in buckets {
        let Some(list) = data.get(*bucket).and_then(Value::as_array) else {
            continue;
        };
        let best = list
            .iter()
            .enumerate()
            .filter(|(_, img)| match season {
                Some(n) => str_at(img, "season").and_then(|s| s.parse::<u32>().ok()) == Some(n),
                None => true,
            })
            .filter_map(|(index, img)| {
                Some(Image {
                    url: str_at(img, "url")?,
                    language: str_at(img, "lang").filter(|l| l != "00"),
                    score: u64_at(img, "likes").unwrap_or(0) as f64,
                    priority: index as u32,
                    provider: Provider::Fanart,
                })
            })
            .max_by(|a, b| {
                a.score
                    .total_cmp(&b.score)
                    .then(b.priority.cmp(&a.priority))
            });
        if let Some(image) = best {
            record.add_image(*kind, image);
        }
    }
}

#[async_trait::async_trait]
impl MetadataProvider for FanartClient {
    fn provider(&self) -> Provider {
        Provider::Fanart
    }

    async fn fetch(&self, seed: &ItemSeed, _full: bool) -> Result<Option<MetaRecord>, MetadataError> {
        let mut record = MetaRecord::new(seed.kind, Default::default());
        match seed.kind {
            MediaKind::Movie => {
                let id = match (seed.ids.tmdb, &seed.ids.imdb) {
                    (Some(tmdb), _) => tmdb.to_string(),
                    (None, Some(imdb)) => imdb.clone(),
                    _ => return Ok(None),
                };
                let data = self.movie(&id).await?;
                parse_buckets(&data, MOVIE_BUCKETS, None, &mut record);
            }
            MediaKind::Show | MediaKind::Season => {
                let tvdb = seed
                    .ids
                    .tvdb
                    .filter(|_| seed.kind == MediaKind::Show)
                    .or_else(|| seed.show_ids.as_ref().and_then(|s| s.tvdb));
                let Some(tvdb) = tvdb else {
                    return Ok(None);
                };
                let data = self.show(tvdb).await?;
                if seed.kind == MediaKind::Season {
                    parse_buckets(&data, SEASON_BUCKETS, seed.season, &mut record);
                } else {
                    parse_buckets(&data, SHOW_BUCKETS, None, &mut record);
                }
            }
            _ => return Ok(None),
        }
        Ok(Some(record))
    }
}
