//! In-memory Trakt account for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use cinemeld_core::types::{ItemSeed, MediaKind, SyncCategory};
use cinemeld_metadata::MetadataError;
use cinemeld_metadata::trakt::wire::{PlaybackItem, RatedItem, UserList, WatchedItem};
use cinemeld_metadata::trakt::{Activities, Listing, Mutation, Page, SeedPage, TraktApi};

#[derive(Default)]
pub struct FakeState {
    pub activities: Activities,
    pub watched: HashMap<MediaKind, Vec<WatchedItem>>,
    pub playback: HashMap<MediaKind, Vec<PlaybackItem>>,
    pub ratings: HashMap<MediaKind, Vec<RatedItem>>,
    pub history: HashMap<MediaKind, Vec<ItemSeed>>,
    /// Keyed by `"{kind}:{listing:?}"`.
    pub listings: HashMap<String, Vec<ItemSeed>>,
    pub lists: Vec<UserList>,
    /// Mutations that went through, in order.
    pub submitted: Vec<Mutation>,
    /// Errors returned by the next `submit` calls, consumed front first.
    pub submit_failures: VecDeque<MetadataError>,
    pub signed_out: bool,
    calls: HashMap<&'static str, usize>,
}

#[derive(Default)]
pub struct FakeTrakt {
    state: Mutex<FakeState>,
}

impl FakeTrakt {
    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn set_activity(&self, kind: MediaKind, category: SyncCategory, ts: i64) {
        let at = Utc.timestamp_opt(ts, 0).single().unwrap_or_default();
        self.with(|s| s.activities.set(kind, category, at));
    }

    pub fn fail_next_submit(&self, error: MetadataError) {
        self.with(|s| s.submit_failures.push_back(error));
    }

    pub fn submitted(&self) -> Vec<Mutation> {
        self.with(|s| s.submitted.clone())
    }

    pub fn calls(&self, name: &str) -> usize {
        self.with(|s| s.calls.get(name).copied().unwrap_or(0))
    }

    fn hit(&self, name: &'static str) {
        self.with(|s| *s.calls.entry(name).or_default() += 1);
    }

    pub fn listing_key(kind: MediaKind, listing: &Listing) -> String {
        format!("{kind}:{listing:?}")
    }
}

#[async_trait]
impl TraktApi for FakeTrakt {
    async fn last_activities(&self) -> Result<Activities, MetadataError> {
        self.hit("last_activities");
        Ok(self.with(|s| s.activities.clone()))
    }

    async fn watched(&self, kind: MediaKind) -> Result<Vec<WatchedItem>, MetadataError> {
        self.hit("watched");
        let key = if kind.is_episodic() { MediaKind::Show } else { MediaKind::Movie };
        Ok(self.with(|s| s.watched.get(&key).cloned().unwrap_or_default()))
    }

    async fn playback(&self, kind: MediaKind) -> Result<Vec<PlaybackItem>, MetadataError> {
        self.hit("playback");
        let key = if kind.is_episodic() { MediaKind::Episode } else { MediaKind::Movie };
        Ok(self.with(|s| s.playback.get(&key).cloned().unwrap_or_default()))
    }

    async fn ratings(&self, kind: MediaKind) -> Result<Vec<RatedItem>, MetadataError> {
        self.hit("ratings");
        Ok(self.with(|s| s.ratings.get(&kind).cloned().unwrap_or_default()))
    }

    async fn submit(&self, mutation: &Mutation) -> Result<(), MetadataError> {
        self.hit("submit");
        self.with(|s| match s.submit_failures.pop_front() {
            Some(e) => Err(e),
            None => {
                s.submitted.push(mutation.clone());
                Ok(())
            }
        })
    }

    async fn history(&self, kind: MediaKind, page: Page) -> Result<SeedPage, MetadataError> {
        self.hit("history");
        let all = self.with(|s| s.history.get(&kind).cloned().unwrap_or_default());
        let (items, has_more) = page.slice(all);
        Ok(SeedPage {
            items,
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
        self.hit("listing");
        let key = Self::listing_key(kind, listing);
        let all = self.with(|s| s.listings.get(&key).cloned().unwrap_or_default());
        let (items, has_more) = page.slice(all);
        Ok(SeedPage {
            items,
            page: page.number,
            has_more,
        })
    }

    async fn my_lists(&self) -> Result<Vec<UserList>, MetadataError> {
        self.hit("my_lists");
        Ok(self.with(|s| s.lists.clone()))
    }

    async fn is_authenticated(&self) -> bool {
        self.with(|s| !s.signed_out)
    }
}
