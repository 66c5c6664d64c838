use std::collections::HashMap;
use std::sync::LazyLock;

use cinemeld_metadata::MetaRecord;
use regex::Regex;

static RE_EDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s*[\(\[:\-]?\s*(?:(?:director'?s|extended|final|theatrical|unrated|uncut|special|ultimate|collector'?s|anniversary|imax|remastered)(?:\s+(?:cut|edition|version))?|(?:\d+(?:st|nd|rd|th)\s+)?anniversary\s+edition)\s*[\)\]]?\s*$",
    )
    .unwrap()
});

static RE_EDITION_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:cut|edition|version|extended|unrated|uncut|remastered|imax)\b").unwrap()
});

/// Title without a trailing edition marker.
pub fn base_title(title: &str) -> &str {
    match RE_EDITION.find(title) {
        Some(m) if m.start() > 0 => title[..m.start()].trim_end(),
        _ => title,
    }
}

/// Collapse releases of one title that differ only in an edition suffix,
/// preferring the plain title. Left alone when the query asks for an edition.
pub fn dedupe_editions(query: &str, records: Vec<MetaRecord>) -> Vec<MetaRecord> {
    if RE_EDITION_WORD.is_match(query) {
        return records;
    }
    let key = |r: &MetaRecord| {
        r.title
            .as_deref()
            .map(|t| format!("{}:{}", base_title(t).to_lowercase(), r.year.unwrap_or_default()))
    };

    // First slot per base title, and which record fills it.
    let mut slot_of: HashMap<String, usize> = HashMap::new();
    let mut slots: Vec<MetaRecord> = Vec::with_capacity(records.len());
    for record in records {
        let Some(k) = key(&record) else {
            slots.push(record);
            continue;
        };
        match slot_of.get(&k) {
            Some(&i) => {
                let plain = |r: &MetaRecord| r.title.as_deref().is_some_and(|t| base_title(t) == t);
                if !plain(&slots[i]) && plain(&record) {
                    slots[i] = record;
                }
            }
            None => {
                slot_of.insert(k, slots.len());
                slots.push(record);
            }
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinemeld_core::types::{IdBundle, MediaKind};

    fn rec(imdb: &str, title: &str) -> MetaRecord {
        let mut r = MetaRecord::new(MediaKind::Movie, IdBundle::imdb(imdb));
        r.title = Some(title.into());
        r.year = Some(1979);
        r
    }

    #[test]
    fn strips_edition_suffixes() {
        assert_eq!(base_title("Apocalypse Now: Final Cut"), "Apocalypse Now");
        assert_eq!(base_title("Alien (Director's Cut)"), "Alien");
        assert_eq!(base_title("Aliens - Special Edition"), "Aliens");
        assert_eq!(base_title("The Cut"), "The Cut");
        assert_eq!(base_title("Extended"), "Extended");
    }

    #[test]
    fn keeps_the_plain_release_in_the_first_position() {
        let out = dedupe_editions(
            "apocalypse now",
            vec![
                rec("tt2", "Apocalypse Now: Final Cut"),
                rec("tt9", "Apocalypse Now Redux"),
                rec("tt1", "Apocalypse Now"),
            ],
        );
        let ids: Vec<_> = out.iter().map(|r| r.ids.imdb.clone().unwrap()).collect();
        assert_eq!(ids, vec!["tt1", "tt9"]);
    }

    #[test]
    fn edition_queries_keep_every_release() {
        let records = vec![rec("tt2", "Apocalypse Now: Final Cut"), rec("tt1", "Apocalypse Now")];
        assert_eq!(dedupe_editions("apocalypse now final cut", records).len(), 2);
    }
}
