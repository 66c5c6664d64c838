//! Menu construction: turns a user intent into provider calls, a filtered and
//! enriched page of records, and the host directory listing for it.

pub mod arrivals;
pub mod explore;
pub mod filters;
pub mod intent;
pub mod orchestrator;
pub mod quick;
pub mod render;
pub mod search;

use cinemeld_core::error::{Classify, ErrorKind};
use cinemeld_core::host::Settings;
use cinemeld_metadata::MetadataError;
use cinemeld_metadata::aggregator::QuickPolicy;
use cinemeld_sync::SyncError;
use thiserror::Error;

pub use filters::{KidsMode, MenuFilters};
pub use intent::{DiscoverFilter, Intent, MenuRequest, ProgressMode};
pub use orchestrator::{MenuEntry, MenuOrchestrator, MenuPage};
pub use quick::QuickSource;

#[derive(Error, Debug)]
pub enum MenuError {
    #[error(transparent)]
    Provider(#[from] MetadataError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("{0} is not configured")]
    Unavailable(&'static str),
    #[error("invalid menu request: {0}")]
    InvalidRequest(String),
}

impl Classify for MenuError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(e) => e.kind(),
            Self::Sync(e) => e.kind(),
            Self::Unavailable(_) => ErrorKind::Authentication,
            Self::InvalidRequest(_) => ErrorKind::Client,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MenuConfig {
    /// Items per page.
    pub page_size: u32,
    /// Enrichment policy for ordinary menus.
    pub policy: QuickPolicy,
    /// Sub-lists of the Quick menu with their weights, most important first.
    pub quick_weights: Vec<(QuickSource, f64)>,
    /// Arrivals rated below this are moved to the end of the page.
    pub arrivals_min_rating: f64,
    pub filters: MenuFilters,
    /// Command prefix of directory items.
    pub plugin_url: String,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            policy: QuickPolicy::Foreground(10),
            quick_weights: vec![
                (QuickSource::Unfinished, 0.25),
                (QuickSource::Watchlist, 0.15),
                (QuickSource::History, 0.10),
                (QuickSource::Recommendations, 0.15),
                (QuickSource::Arrivals, 0.10),
                (QuickSource::Popular, 0.10),
                (QuickSource::Trending, 0.10),
                (QuickSource::Featured, 0.05),
            ],
            arrivals_min_rating: 5.0,
            filters: MenuFilters::default(),
            plugin_url: "plugin://cinemeld/".into(),
        }
    }
}

impl MenuConfig {
    pub async fn from_settings(settings: &dyn Settings) -> Self {
        let mut config = Self::default();
        config.page_size = settings.get_int("menu.page_size", 50).await.clamp(5, 200) as u32;
        config.policy = QuickPolicy::from_param(settings.get("menu.quick").await.as_deref());
        config.arrivals_min_rating = settings.get_float("menu.arrivals_min_rating", 5.0).await;
        for (source, weight) in config.quick_weights.iter_mut() {
            let key = format!("menu.quick.{}", source.as_str());
            *weight = settings.get_float(&key, *weight).await.max(0.0);
        }
        config.filters = MenuFilters::from_settings(settings).await;
        config
    }
}
