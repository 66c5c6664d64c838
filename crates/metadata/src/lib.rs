#![allow(clippy::type_complexity)]
#![allow(clippy::should_implement_trait)]
pub mod aggregator;
pub mod fanart;
pub mod http;
pub mod imdb;
pub mod merge;
pub mod meta_cache;
pub mod provider;
pub mod record;
pub mod text;
pub mod tmdb;
pub mod trakt;

use cinemeld_core::error::{Classify, ErrorKind};
use thiserror::Error;

pub use record::MetaRecord;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("{provider}: network error: {message}")]
    Network {
        provider: &'static str,
        message: String,
    },
    #[error("{provider}: rate limited")]
    RateLimited { provider: &'static str },
    #[error("{provider}: authentication failed ({status})")]
    Auth { provider: &'static str, status: u16 },
    #[error("{0}: disabled for this session")]
    Disabled(&'static str),
    #[error("not found")]
    NotFound,
    #[error("{provider}: request rejected ({status})")]
    Client { provider: &'static str, status: u16 },
    #[error("{provider}: server error ({status})")]
    Server { provider: &'static str, status: u16 },
    #[error("{provider}: unreadable response: {message}")]
    Data {
        provider: &'static str,
        message: String,
    },
    #[error("db error: {0}")]
    Db(#[from] cinemeld_db::DbError),
    #[error("cache error: {0}")]
    Cache(#[from] cinemeld_cache::CacheError),
}

impl From<sqlx::Error> for MetadataError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(cinemeld_db::DbError::Sqlx(e))
    }
}

impl Classify for MetadataError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::NetworkTransient,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Auth { .. } | Self::Disabled(_) => ErrorKind::Authentication,
            Self::NotFound => ErrorKind::NotFound,
            Self::Client { .. } => ErrorKind::Client,
            Self::Server { .. } => ErrorKind::Server,
            Self::Data { .. } => ErrorKind::Data,
            Self::Db(_) | Self::Cache(_) => ErrorKind::Internal,
        }
    }
}

/// The external metadata services.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Imdb,
    Fanart,
    Trakt,
    Tmdb,
}

impl Provider {
    /// Overlay order of a merge: later providers overwrite earlier ones.
    pub const MERGE_ORDER: [Provider; 4] = [Self::Imdb, Self::Fanart, Self::Trakt, Self::Tmdb];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Imdb => "imdb",
            Self::Fanart => "fanart",
            Self::Trakt => "trakt",
            Self::Tmdb => "tmdb",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "imdb" => Some(Self::Imdb),
            "fanart" => Some(Self::Fanart),
            "trakt" => Some(Self::Trakt),
            "tmdb" => Some(Self::Tmdb),
            _ => None,
        }
    }

    pub fn merge_rank(self) -> usize {
        Self::MERGE_ORDER
            .iter()
            .position(|p| *p == self)
            .unwrap_or(usize::MAX)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
