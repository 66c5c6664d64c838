use std::collections::HashSet;

use chrono::NaiveDate;
use cinemeld_core::host::Settings;
use cinemeld_core::types::MediaKind;
use cinemeld_metadata::MetaRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KidsMode {
    #[default]
    Off,
    /// General-audience certificates only.
    Kids,
    /// Adds the teen certificates.
    Teens,
}

impl KidsMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "off" => Some(Self::Off),
            "kids" => Some(Self::Kids),
            "teens" => Some(Self::Teens),
            _ => None,
        }
    }

    fn allows(self, record: &MetaRecord) -> bool {
        const KIDS: &[&str] = &["G", "PG", "TV-Y", "TV-Y7", "TV-Y7-FV", "TV-G", "TV-PG", "U"];
        const TEENS: &[&str] = &["PG-13", "TV-14", "12", "12A"];
        let allowed = |cert: &str| match self {
            Self::Off => true,
            Self::Kids => KIDS.contains(&cert),
            Self::Teens => KIDS.contains(&cert) || TEENS.contains(&cert),
        };
        match record.certification.as_deref().map(str::trim) {
            Some(cert) if !cert.is_empty() => allowed(&cert.to_ascii_uppercase()),
            // Uncertified titles pass only when they are family titles.
            _ => {
                self == Self::Off
                    || record
                        .genre
                        .iter()
                        .any(|g| g.eq_ignore_ascii_case("family") || g.eq_ignore_ascii_case("animation"))
            }
        }
    }
}

/// User filters applied to every menu page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MenuFilters {
    pub kids: KidsMode,
    pub hide_duplicates: bool,
    /// Drop titles whose release date is in the future. Titles without any
    /// date are kept.
    pub released_only: bool,
    pub exclude_documentaries: bool,
    /// Drop shorts: the genre, or movies under 40 minutes.
    pub exclude_shorts: bool,
}

impl MenuFilters {
    pub async fn from_settings(settings: &dyn Settings) -> Self {
        Self {
            kids: KidsMode::from_str(&settings.get_string("filter.kids", "off").await).unwrap_or_default(),
            hide_duplicates: settings.get_bool("filter.duplicates", true).await,
            released_only: settings.get_bool("filter.released", true).await,
            exclude_documentaries: settings.get_bool("filter.documentaries", false).await,
            exclude_shorts: settings.get_bool("filter.shorts", true).await,
        }
    }

    pub fn apply(&self, records: Vec<MetaRecord>, today: NaiveDate) -> Vec<MetaRecord> {
        let mut seen = HashSet::new();
        records
            .into_iter()
            .filter(|r| self.kids.allows(r))
            .filter(|r| !self.released_only || r.release_date().is_none_or(|d| d <= today))
            .filter(|r| !self.exclude_documentaries || !has_genre(r, "documentary"))
            .filter(|r| !self.exclude_shorts || !is_short(r))
            .filter(|r| !self.hide_duplicates || seen.insert(identity(r)))
            .collect()
    }
}

fn has_genre(record: &MetaRecord, genre: &str) -> bool {
    record.genre.iter().any(|g| g.eq_ignore_ascii_case(genre))
}

fn is_short(record: &MetaRecord) -> bool {
    has_genre(record, "short")
        || (record.kind == MediaKind::Movie && record.runtime.is_some_and(|r| r > 0 && r < 40 * 60))
}

/// Duplicate key: the first id, else title and year.
pub(crate) fn identity(record: &MetaRecord) -> String {
    let base = record.ids.key().unwrap_or_else(|| {
        format!(
            "title:{}:{}",
            record.title.as_deref().unwrap_or_default().to_lowercase(),
            record.year.unwrap_or_default()
        )
    });
    match (record.season, record.episode) {
        (Some(s), Some(e)) => format!("{base}:{s}x{e}"),
        (Some(s), None) => format!("{base}:{s}"),
        _ => base,
    }
}
