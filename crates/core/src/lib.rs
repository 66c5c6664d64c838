#![allow(clippy::should_implement_trait)]

pub mod concurrency;
pub mod error;
pub mod host;
pub mod notify;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Classify, ErrorKind, HostError};
pub use types::{IdBundle, IdType, ItemSeed, MediaKind, SyncCategory};
