//! New releases assembled from both catalogues.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use cinemeld_core::types::MediaKind;
use cinemeld_metadata::MetaRecord;
use cinemeld_metadata::imdb::ImdbQuery;
use cinemeld_metadata::merge::aggregate_rating;
use cinemeld_metadata::tmdb::DiscoverQuery;

/// TMDb release types for digital and physical releases.
const HOME_RELEASES: [u8; 2] = [4, 5];

/// Windowed IMDb queries: the last three months with a low vote floor, and
/// the last year with a higher one.
pub fn imdb_queries(kind: MediaKind, today: NaiveDate) -> Vec<ImdbQuery> {
    let base = ImdbQuery {
        title_types: ImdbQuery::title_types_for(kind),
        released_to: Some(today),
        sort: Some("release_date,desc".into()),
        ..Default::default()
    };
    vec![
        ImdbQuery {
            released_from: Some(today - Duration::days(90)),
            min_votes: Some(100),
            ..base.clone()
        },
        ImdbQuery {
            released_from: Some(today - Duration::days(365)),
            min_votes: Some(1000),
            ..base
        },
    ]
}

pub fn tmdb_query(kind: MediaKind, today: NaiveDate) -> DiscoverQuery {
    let movie = kind == MediaKind::Movie;
    DiscoverQuery {
        sort_by: Some(if movie { "primary_release_date.desc" } else { "first_air_date.desc" }.into()),
        released_from: Some(today - Duration::days(if movie { 180 } else { 90 })),
        released_to: Some(today),
        release_types: if movie { HOME_RELEASES.to_vec() } else { Vec::new() },
        min_votes: Some(50),
        ..Default::default()
    }
}

/// Interleave the result lists, drop repeats by id and by title with year,
/// and move titles rated below `min_rating` to the end.
pub fn combine(lists: Vec<Vec<MetaRecord>>, min_rating: f64) -> Vec<MetaRecord> {
    let longest = lists.iter().map(Vec::len).max().unwrap_or(0);
    let mut iters: Vec<_> = lists.into_iter().map(Vec::into_iter).collect();
    let mut ids = HashSet::new();
    let mut titles = HashSet::new();
    let mut out = Vec::new();
    for _ in 0..longest {
        for it in iters.iter_mut() {
            let Some(record) = it.next() else {
                continue;
            };
            let id_keys: Vec<String> = record.ids.pairs().iter().map(|(t, v)| format!("{t}:{v}")).collect();
            let title_key = record
                .title
                .as_deref()
                .map(|t| format!("{}:{}", t.to_lowercase(), record.year.unwrap_or_default()));
            let repeated = id_keys.iter().any(|k| ids.contains(k))
                || title_key.as_ref().is_some_and(|k| titles.contains(k));
            ids.extend(id_keys);
            titles.extend(title_key);
            if !repeated {
                out.push(record);
            }
        }
    }
    let (good, low): (Vec<_>, Vec<_>) = out
        .into_iter()
        .partition(|r| {
            r.rating
                .or_else(|| aggregate_rating(&r.ratings).map(|(rating, _)| rating))
                .is_none_or(|rating| rating >= min_rating)
        });
    good.into_iter().chain(low).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinemeld_core::types::IdBundle;

    fn rec(ids: IdBundle, title: &str, rating: Option<f64>) -> MetaRecord {
        let mut r = MetaRecord::new(MediaKind::Movie, ids);
        r.title = Some(title.into());
        r.year = Some(2024);
        r.rating = rating;
        r
    }

    #[test]
    fn merges_by_id_and_title_and_sinks_low_ratings() {
        let imdb = vec![
            rec(IdBundle::imdb("tt1"), "Dune: Part Two", Some(8.6)),
            rec(IdBundle::imdb("tt2"), "Madame Web", Some(3.8)),
            rec(IdBundle::imdb("tt3"), "Civil War", Some(7.1)),
        ];
        let tmdb = vec![
            rec(IdBundle::tmdb(693134), "Dune: Part Two", Some(8.2)),
            rec(IdBundle::tmdb(929590), "Civil War", None),
            rec(IdBundle::tmdb(1), "Late Night with the Devil", Some(7.0)),
        ];
        let out = combine(vec![imdb, tmdb], 5.0);
        let titles: Vec<_> = out.iter().map(|r| r.title.clone().unwrap()).collect();
        assert_eq!(
            titles,
            vec!["Dune: Part Two", "Civil War", "Late Night with the Devil", "Madame Web"]
        );
    }

    #[test]
    fn movie_query_asks_for_home_releases() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let q = tmdb_query(MediaKind::Movie, today);
        assert_eq!(q.release_types, vec![4, 5]);
        assert_eq!(q.released_from, NaiveDate::from_ymd_opt(2023, 12, 4));
        assert!(tmdb_query(MediaKind::Show, today).release_types.is_empty());
        assert_eq!(imdb_queries(MediaKind::Movie, today).len(), 2);
    }
}
