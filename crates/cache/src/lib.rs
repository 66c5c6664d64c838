//! Tiered key/value cache over the local database, plus the durable queue of
//! mutating requests waiting to be replayed.

pub mod codec;
pub mod key;
pub mod retry;
pub mod store;
pub mod tier;

use cinemeld_core::error::{Classify, ErrorKind};
use thiserror::Error;

pub use codec::Codec;
pub use key::CacheKey;
pub use retry::{PendingRequest, RetryQueue};
pub use store::{Cache, CacheConfig};
pub use tier::{Policy, Tier};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("db error: {0}")]
    Db(#[from] cinemeld_db::DbError),
    #[error("codec error: {0}")]
    Codec(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(cinemeld_db::DbError::Sqlx(e))
    }
}

impl Classify for CacheError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Json(_) => ErrorKind::Data,
            _ => ErrorKind::Internal,
        }
    }
}
