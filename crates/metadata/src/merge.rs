//! Metadata merge engine.
//!
//! Merge rules:
//! 1. Provider payloads are overlaid in [`Provider::MERGE_ORDER`]; a later
//!    provider's value replaces an earlier one.
//! 2. A missing value never replaces a present one.
//! 3. Lists are unioned in first-seen order; images are pooled per type.
//! 4. Every provider rating is kept, and the global rating is their
//!    vote-weighted mean.

use std::collections::{BTreeMap, BTreeSet};

use cinemeld_core::error::Classify;
use tracing::debug;

use crate::record::{Person, ProviderRating};
use crate::text::{sanitize_plot, strip_html};
use crate::{MetaRecord, MetadataError, Provider};

/// What one provider returned for one item.
#[derive(Debug, Clone)]
pub struct ProviderOutcome {
    pub provider: Provider,
    /// False when the call failed in a way worth retrying later.
    pub complete: bool,
    pub data: Option<MetaRecord>,
}

impl ProviderOutcome {
    pub fn ok(provider: Provider, data: Option<MetaRecord>) -> Self {
        Self {
            provider,
            complete: true,
            data,
        }
    }

    /// Only transient failures leave the outcome incomplete; a 404 or an
    /// unusable payload is final for this provider.
    pub fn failed(provider: Provider, err: &MetadataError) -> Self {
        Self {
            provider,
            complete: !err.kind().leaves_incomplete(),
            data: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Merged {
    pub record: MetaRecord,
    /// True when every outcome was complete.
    pub complete: bool,
    pub updated_fields: BTreeSet<&'static str>,
}

/// Overlay `outcomes` onto `base`.
pub fn merge(base: MetaRecord, mut outcomes: Vec<ProviderOutcome>) -> Merged {
    outcomes.sort_by_key(|o| o.provider.merge_rank());

    let complete = outcomes.iter().all(|o| o.complete);
    let mut merged = base;
    let mut updated = BTreeSet::new();

    for outcome in &outcomes {
        let Some(data) = &outcome.data else {
            continue;
        };

        macro_rules! merge_field {
            ($field:ident) => {
                if data.$field.is_some() && merged.$field != data.$field {
                    merged.$field = data.$field.clone();
                    updated.insert(stringify!($field));
                }
            };
        }

        macro_rules! union_field {
            ($field:ident) => {
                for value in &data.$field {
                    if !merged.$field.iter().any(|v| v.eq_ignore_ascii_case(value)) {
                        merged.$field.push(value.clone());
                        updated.insert(stringify!($field));
                    }
                }
            };
        }

        merge_field!(title);
        merge_field!(original_title);
        merge_field!(year);
        merge_field!(premiered);
        merge_field!(runtime);
        merge_field!(plot);
        merge_field!(tagline);
        merge_field!(collection);
        merge_field!(homepage);
        merge_field!(certification);
        merge_field!(aired_episodes);
        merge_field!(status);

        union_field!(genre);
        union_field!(country);
        union_field!(language);
        union_field!(director);
        union_field!(writer);
        union_field!(studio);
        union_field!(network);

        merged.ids.fill_from(&data.ids);
        merge_cast(&mut merged.cast, &data.cast);
        for season in &data.seasons {
            match merged.seasons.iter_mut().find(|s| s.number == season.number) {
                Some(existing) => {
                    if season.episodes > 0 {
                        existing.episodes = season.episodes;
                    }
                    existing.aired = season.aired.or(existing.aired);
                    existing.premiered = season.premiered.or(existing.premiered);
                }
                None => merged.seasons.push(season.clone()),
            }
        }

        for (provider, rating) in &data.ratings {
            merged.ratings.insert(*provider, *rating);
        }
        if let Some(rating) = data.rating.filter(|r| *r > 0.0) {
            merged
                .ratings
                .entry(outcome.provider)
                .or_insert(ProviderRating {
                    rating,
                    votes: data.votes.unwrap_or(0),
                });
        }
    }

    // Later providers' artwork ranks first within each type.
    for outcome in outcomes.iter().rev() {
        let Some(data) = &outcome.data else {
            continue;
        };
        for (kind, images) in &data.images {
            for image in images {
                merged.add_image(*kind, image.clone());
            }
        }
    }
    merged.seasons.sort_by_key(|s| s.number);

    if let Some((rating, votes)) = aggregate_rating(&merged.ratings) {
        merged.rating = Some(rating);
        merged.votes = Some(votes);
    }
    clean_text(&mut merged);

    debug!(
        item = ?merged.ids.key(),
        fields = updated.len(),
        complete,
        "merged provider metadata"
    );
    Merged {
        record: merged,
        complete,
        updated_fields: updated,
    }
}

fn merge_cast(into: &mut Vec<Person>, from: &[Person]) {
    for person in from {
        match into
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&person.name) && p.role == person.role)
        {
            Some(existing) => {
                if person.character.is_some() {
                    existing.character.clone_from(&person.character);
                }
                if person.thumb.is_some() {
                    existing.thumb.clone_from(&person.thumb);
                }
            }
            None => into.push(person.clone()),
        }
    }
}

/// Global rating and votes over all provider ratings: the vote-weighted mean,
/// or the plain mean when no provider reports votes.
pub fn aggregate_rating(ratings: &BTreeMap<Provider, ProviderRating>) -> Option<(f64, u64)> {
    if ratings.is_empty() {
        return None;
    }
    let votes: u64 = ratings.values().map(|r| r.votes).sum();
    let rating = if votes > 0 {
        ratings
            .values()
            .map(|r| r.rating * r.votes as f64)
            .sum::<f64>()
            / votes as f64
    } else {
        ratings.values().map(|r| r.rating).sum::<f64>() / ratings.len() as f64
    };
    Some((rating, votes))
}

fn clean_text(record: &mut MetaRecord) {
    for field in [&mut record.title, &mut record.original_title, &mut record.tagline] {
        if let Some(v) = field.as_deref() {
            let clean = strip_html(v);
            *field = (!clean.is_empty()).then_some(clean);
        }
    }
    record.plot = record.plot.as_deref().and_then(sanitize_plot);
    for list in [&mut record.genre, &mut record.studio, &mut record.network] {
        for value in list.iter_mut() {
            *value = strip_html(value);
        }
        list.retain(|v| !v.is_empty());
    }
    for images in record.images.values_mut() {
        images.retain(|i| !i.url.is_empty());
    }
    record.images.retain(|_, v| !v.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Image, ImageType};
    use cinemeld_core::types::{IdBundle, MediaKind};

    fn base() -> MetaRecord {
        MetaRecord::new(MediaKind::Movie, IdBundle::imdb("tt0111161"))
    }

    fn with(provider: Provider, f: impl FnOnce(&mut MetaRecord)) -> ProviderOutcome {
        let mut r = base();
        f(&mut r);
        ProviderOutcome::ok(provider, Some(r))
    }

    fn outcomes() -> Vec<ProviderOutcome> {
        vec![
            with(Provider::Imdb, |r| {
                r.title = Some("The Shawshank Redemption (IMDb)".into());
                r.plot = Some("Imdb plot".into());
                r.genre = vec!["Drama".into()];
                r.set_provider_rating(Provider::Imdb, Some(9.3), Some(3000));
            }),
            with(Provider::Fanart, |r| {
                r.add_image(
                    ImageType::Logo,
                    Image {
                        url: "logo.png".into(),
                        language: Some("en".into()),
                        score: 12.0,
                        priority: 0,
                        provider: Provider::Fanart,
                    },
                );
            }),
            with(Provider::Trakt, |r| {
                r.title = Some("The Shawshank Redemption".into());
                r.tagline = Some("Fear can hold you prisoner.".into());
                r.genre = vec!["drama".into(), "Crime".into()];
                r.set_provider_rating(Provider::Trakt, Some(8.8), Some(1000));
                r.ids.trakt = Some(234);
            }),
            with(Provider::Tmdb, |r| {
                r.title = Some("The Shawshank Redemption".into());
                r.year = Some(1994);
                r.runtime = Some(8520);
                r.set_provider_rating(Provider::Tmdb, Some(8.7), Some(0));
                r.ids.tmdb = Some(278);
            }),
        ]
    }

    #[test]
    fn result_does_not_depend_on_completion_order() {
        let forward = merge(base(), outcomes());
        let mut reversed = outcomes();
        reversed.reverse();
        let backward = merge(base(), reversed);
        let mut rotated = outcomes();
        rotated.rotate_left(2);
        let third = merge(base(), rotated);

        assert_eq!(forward.record, backward.record);
        assert_eq!(forward.record, third.record);
    }

    #[test]
    fn later_providers_overwrite_and_null_never_does() {
        let merged = merge(base(), outcomes()).record;
        assert_eq!(merged.title.as_deref(), Some("The Shawshank Redemption"));
        // Only IMDb has a plot; later providers have none and must not erase it.
        assert_eq!(merged.plot.as_deref(), Some("Imdb plot"));
        assert_eq!(merged.tagline.as_deref(), Some("Fear can hold you prisoner."));
        assert_eq!(merged.year, Some(1994));
        assert_eq!(merged.ids.trakt, Some(234));
        assert_eq!(merged.ids.tmdb, Some(278));
        assert_eq!(merged.ids.imdb.as_deref(), Some("tt0111161"));
    }

    #[test]
    fn lists_are_unioned_in_first_seen_order() {
        let merged = merge(base(), outcomes()).record;
        assert_eq!(merged.genre, vec!["Drama", "Crime"]);
        assert_eq!(merged.best_image(ImageType::Logo), Some("logo.png"));
    }

    #[test]
    fn global_rating_is_vote_weighted() {
        let merged = merge(base(), outcomes()).record;
        assert_eq!(merged.ratings.len(), 3);
        assert_eq!(merged.votes, Some(4000));
        let expected = (9.3 * 3000.0 + 8.8 * 1000.0) / 4000.0;
        assert!((merged.rating.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn plain_mean_without_votes() {
        let mut ratings = BTreeMap::new();
        ratings.insert(Provider::Imdb, ProviderRating { rating: 8.0, votes: 0 });
        ratings.insert(Provider::Tmdb, ProviderRating { rating: 6.0, votes: 0 });
        assert_eq!(aggregate_rating(&ratings), Some((7.0, 0)));
        assert_eq!(aggregate_rating(&BTreeMap::new()), None);
    }

    #[test]
    fn transient_failures_leave_result_incomplete() {
        let mut list = outcomes();
        list.push(ProviderOutcome::failed(
            Provider::Fanart,
            &MetadataError::Network {
                provider: "fanart",
                message: "timeout".into(),
            },
        ));
        assert!(!merge(base(), list).complete);

        let mut list = outcomes();
        list.push(ProviderOutcome::failed(Provider::Fanart, &MetadataError::NotFound));
        assert!(merge(base(), list).complete);
    }

    #[test]
    fn text_fields_are_cleaned() {
        let merged = merge(
            base(),
            vec![with(Provider::Tmdb, |r| {
                r.title = Some("Tom &amp; Jerry".into());
                r.plot = Some("<p>A cat.</p> See full summary »".into());
            })],
        )
        .record;
        assert_eq!(merged.title.as_deref(), Some("Tom & Jerry"));
        assert_eq!(merged.plot.as_deref(), Some("A cat."));
    }
}
