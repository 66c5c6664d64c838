use cinemeld_core::types::{IdBundle, ItemSeed, MediaKind};
use serde::{Deserialize, Serialize};

use crate::{MetaRecord, MetadataError, Provider};

/// How much data an item merge asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Essential,
    #[default]
    Standard,
    Extended,
}

impl DetailLevel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "essential" => Some(Self::Essential),
            "standard" => Some(Self::Standard),
            "extended" => Some(Self::Extended),
            _ => None,
        }
    }

    /// Providers contacted for one item, with whether the full page is wanted.
    pub fn plan(self) -> Vec<PlanStep> {
        let mut steps = vec![
            PlanStep::new(Provider::Tmdb, false),
            PlanStep::new(Provider::Imdb, self == Self::Extended),
        ];
        if self != Self::Essential {
            steps.push(PlanStep::new(Provider::Trakt, false));
            steps.push(PlanStep::new(Provider::Fanart, false));
        }
        steps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStep {
    pub provider: Provider,
    pub full: bool,
}

impl PlanStep {
    pub fn new(provider: Provider, full: bool) -> Self {
        Self { provider, full }
    }
}

/// A metadata provider that can fetch, resolve and search.
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Fetch the provider's view of an item. `Ok(None)` means the provider has
    /// no usable id for it, which is not an error.
    async fn fetch(&self, seed: &ItemSeed, full: bool) -> Result<Option<MetaRecord>, MetadataError>;

    /// Fill in missing ids for an item.
    async fn resolve(&self, _seed: &ItemSeed) -> Result<Option<IdBundle>, MetadataError> {
        Ok(None)
    }

    async fn search(
        &self,
        _kind: MediaKind,
        _query: &str,
        _year: Option<i32>,
    ) -> Result<Vec<ItemSeed>, MetadataError> {
        Ok(Vec::new())
    }
}
