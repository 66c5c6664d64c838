//! Chapter classification and the skip prompts derived from it.

use std::sync::LazyLock;

use cinemeld_core::host::ChapterMarker;
use regex::Regex;

static RE_RECAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:recap|previously(?:\s+on)?|last\s+time)\b").unwrap());

/// Episodes up to this runtime treat a long closing chapter as the outro.
const SHORT_EPISODE: f64 = 2700.0;
/// Seconds before the chapter end the skip lands on.
const SKIP_LEAD: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterClass {
    Promo,
    Intro,
    Outro,
    Recap,
    Story,
}

impl ChapterClass {
    pub fn skippable(self) -> bool {
        matches!(self, Self::Promo | Self::Intro | Self::Recap)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Promo => "Skip Promo",
            Self::Intro => "Skip Intro",
            Self::Outro => "Skip Outro",
            Self::Recap => "Skip Recap",
            Self::Story => "Skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    /// 1-based, in playback order.
    pub number: usize,
    pub name: Option<String>,
    /// Bounds in seconds.
    pub start: f64,
    pub end: f64,
    pub class: ChapterClass,
}

impl Chapter {
    pub fn length(&self) -> f64 {
        self.end - self.start
    }
}

fn classify_one(start: f64, end: f64, last: bool, duration: f64, name: Option<&str>) -> ChapterClass {
    let fraction = end - start;
    if fraction < 0.001 && start < 0.1 {
        return ChapterClass::Promo;
    }
    if name.is_some_and(|n| RE_RECAP.is_match(n)) {
        return ChapterClass::Recap;
    }
    // The opening chapter is a cold open.
    if start > 0.0 && fraction < 0.05 && start < 0.25 {
        return ChapterClass::Intro;
    }
    if start > 0.0 && fraction < 0.05 && end >= 0.97 {
        return ChapterClass::Outro;
    }
    if start > 0.0 && last && duration <= SHORT_EPISODE && fraction < 0.15 {
        return ChapterClass::Outro;
    }
    ChapterClass::Story
}

/// Chapters of a `duration`-second item from the player's percent markers.
/// Markers at or past the end are dropped.
pub fn classify(markers: &[ChapterMarker], duration: f64) -> Vec<Chapter> {
    if duration <= 0.0 {
        return Vec::new();
    }
    let mut marks: Vec<&ChapterMarker> = markers
        .iter()
        .filter(|m| m.percent >= 0.0 && m.percent < 100.0)
        .collect();
    marks.sort_by(|a, b| a.percent.total_cmp(&b.percent));
    marks.dedup_by(|a, b| a.percent == b.percent);

    let count = marks.len();
    marks
        .iter()
        .enumerate()
        .map(|(i, mark)| {
            let end_percent = marks.get(i + 1).map_or(100.0, |m| m.percent);
            let class = classify_one(
                mark.percent / 100.0,
                end_percent / 100.0,
                i + 1 == count,
                duration,
                mark.name.as_deref(),
            );
            Chapter {
                number: i + 1,
                name: mark.name.clone(),
                start: mark.percent * duration / 100.0,
                end: end_percent * duration / 100.0,
                class,
            }
        })
        .collect()
}

/// Skip prompts allowed for an item with `total` chapters.
pub fn skip_budget(total: usize) -> usize {
    match total {
        0..=4 => 3,
        5 => 2,
        _ => 1,
    }
}

/// A skip button: shown while playback is inside the chapter, seeking to
/// `target` when pressed.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipWindow {
    pub chapter: usize,
    pub class: ChapterClass,
    pub from: f64,
    pub until: f64,
    pub target: f64,
}

impl SkipWindow {
    pub fn contains(&self, time: f64) -> bool {
        time >= self.from && time < self.until
    }
}

pub fn skip_plan(chapters: &[Chapter]) -> Vec<SkipWindow> {
    chapters
        .iter()
        .filter(|c| c.class.skippable())
        .take(skip_budget(chapters.len()))
        .map(|c| SkipWindow {
            chapter: c.number,
            class: c.class,
            from: c.start,
            until: c.end,
            target: (c.end - SKIP_LEAD).max(c.start),
        })
        .collect()
}

/// Start of the outro, if one was recognised.
pub fn outro_start(chapters: &[Chapter]) -> Option<f64> {
    chapters.iter().find(|c| c.class == ChapterClass::Outro).map(|c| c.start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers(percents: &[f64]) -> Vec<ChapterMarker> {
        percents
            .iter()
            .map(|p| ChapterMarker {
                percent: *p,
                name: None,
            })
            .collect()
    }

    #[test]
    fn finds_intro_and_outro_of_a_short_episode() {
        let chapters = classify(&markers(&[0.0, 3.0, 5.0, 95.0, 100.0]), 2400.0);
        assert_eq!(chapters.len(), 4);
        let classes: Vec<_> = chapters.iter().map(|c| c.class).collect();
        assert_eq!(
            classes,
            vec![ChapterClass::Story, ChapterClass::Intro, ChapterClass::Story, ChapterClass::Outro]
        );

        let plan = skip_plan(&chapters);
        assert_eq!(
            plan,
            vec![SkipWindow {
                chapter: 2,
                class: ChapterClass::Intro,
                from: 72.0,
                until: 120.0,
                target: 117.0,
            }]
        );
        assert!(plan[0].contains(72.0));
        assert!(!plan[0].contains(120.0));
        assert_eq!(outro_start(&chapters), Some(2280.0));
    }

    #[test]
    fn budget_shrinks_with_chapter_count() {
        assert_eq!(skip_budget(4), 3);
        assert_eq!(skip_budget(5), 2);
        assert_eq!(skip_budget(9), 1);

        // Six chapters, three of them short openers after the cold open: one prompt.
        let chapters = classify(&markers(&[0.0, 1.0, 2.0, 3.0, 4.0, 50.0]), 3600.0);
        assert_eq!(chapters.iter().filter(|c| c.class == ChapterClass::Intro).count(), 3);
        assert_eq!(skip_plan(&chapters).len(), 1);
    }

    #[test]
    fn named_recaps_and_promos() {
        let mut marks = markers(&[0.0, 0.05, 10.0, 60.0]);
        marks[2].name = Some("Previously on".into());
        let chapters = classify(&marks, 3000.0);
        assert_eq!(chapters[0].class, ChapterClass::Promo);
        assert_eq!(chapters[2].class, ChapterClass::Recap);
        assert_eq!(chapters[3].class, ChapterClass::Story);
    }
}
