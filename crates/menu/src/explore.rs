use cinemeld_core::types::MediaKind;

use crate::intent::{DiscoverFilter, Intent, MenuRequest};

/// IMDb award groups accepted by the Awards intent, with their labels.
pub const AWARD_GROUPS: &[(&str, &str)] = &[
    ("oscar_winner", "Oscar Winners"),
    ("oscar_nominee", "Oscar Nominees"),
    ("oscar_best_picture_winner", "Best Picture Winners"),
    ("best_director_winner", "Best Director Winners"),
    ("golden_globe_winner", "Golden Globe Winners"),
    ("emmy_winner", "Emmy Winners"),
    ("razzie_winner", "Razzie Winners"),
];

pub const GENRES: &[&str] = &[
    "action",
    "adventure",
    "animation",
    "comedy",
    "crime",
    "documentary",
    "drama",
    "family",
    "fantasy",
    "history",
    "horror",
    "music",
    "mystery",
    "romance",
    "sci-fi",
    "thriller",
    "war",
    "western",
];

pub fn is_award_group(group: &str) -> bool {
    AWARD_GROUPS.iter().any(|(g, _)| *g == group)
}

/// The curated sub-menus of Explore, always in the same order.
pub fn entries(kind: MediaKind) -> Vec<(String, MenuRequest)> {
    let req = |intent| MenuRequest::new(kind, intent);
    let mut out = vec![
        ("New Arrivals".to_string(), req(Intent::Arrivals)),
        ("Trending".to_string(), req(Intent::Trending)),
        ("Popular".to_string(), req(Intent::Popular)),
        (
            "Highly Rated".to_string(),
            req(Intent::Discover(DiscoverFilter {
                min_rating: Some(7.5),
                min_votes: Some(25_000),
                ..Default::default()
            })),
        ),
        ("Surprise Me".to_string(), req(Intent::Random(DiscoverFilter::default()))),
    ];
    for genre in GENRES {
        let mut label = genre.replace('-', " ");
        if let Some(first) = label.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        out.push((
            label,
            req(Intent::Discover(DiscoverFilter {
                genre: Some((*genre).to_string()),
                ..Default::default()
            })),
        ));
    }
    for (group, label) in AWARD_GROUPS {
        let tv_award = *group == "emmy_winner";
        if tv_award == (kind == MediaKind::Show) || *group == "golden_globe_winner" {
            out.push((
                (*label).to_string(),
                req(Intent::Awards {
                    group: (*group).to_string(),
                }),
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_is_stable_and_media_aware() {
        let movies = entries(MediaKind::Movie);
        assert_eq!(movies, entries(MediaKind::Movie));
        assert_eq!(movies[0].1.intent, Intent::Arrivals);
        assert!(movies.iter().any(|(l, _)| l == "Sci fi"));
        assert!(movies.iter().any(|(l, _)| l == "Oscar Winners"));
        assert!(!movies.iter().any(|(l, _)| l == "Emmy Winners"));

        let shows = entries(MediaKind::Show);
        assert!(shows.iter().any(|(l, _)| l == "Emmy Winners"));
        assert!(shows.iter().any(|(l, _)| l == "Golden Globe Winners"));
        assert!(!shows.iter().any(|(l, _)| l == "Oscar Winners"));
    }
}
