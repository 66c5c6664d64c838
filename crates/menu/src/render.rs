//! Menu pages as host directory listings.

use std::collections::BTreeMap;

use cinemeld_core::host::{ContextAction, Directory, DirectoryItem};
use cinemeld_core::types::{ItemSeed, MediaKind};
use cinemeld_metadata::MetaRecord;
use reqwest::Url;
use serde_json::json;
use tracing::warn;

use crate::intent::{Catalogue, DiscoverFilter, Intent, MenuRequest, seed_params};
use crate::orchestrator::{MenuEntry, MenuPage};

/// Host command invoking `action` with `params`.
pub fn command(base: &str, action: &str, params: &BTreeMap<String, String>) -> String {
    match Url::parse(base) {
        Ok(mut url) => {
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("action", action);
                for (k, v) in params {
                    query.append_pair(k, v);
                }
            }
            url.to_string()
        }
        Err(e) => {
            warn!(base, error = %e, "unusable plugin url");
            base.to_string()
        }
    }
}

/// Split a command back into its action and parameters.
pub fn parse_command(command: &str) -> Option<(String, BTreeMap<String, String>)> {
    let url = Url::parse(command).ok()?;
    let mut params: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
    let action = params.remove("action")?;
    Some((action, params))
}

pub fn menu_command(base: &str, request: &MenuRequest) -> String {
    command(base, "menu", &request.to_params())
}

fn label(record: &MetaRecord) -> String {
    let title = record.title.clone().unwrap_or_default();
    match (record.kind, record.season, record.episode) {
        (MediaKind::Season, Some(s), _) if title.is_empty() => format!("Season {s}"),
        (MediaKind::Episode, Some(s), Some(e)) => format!("{s}x{e:02}. {title}"),
        _ => title,
    }
}

fn info(record: &MetaRecord) -> serde_json::Value {
    json!({
        "mediatype": record.kind.as_str(),
        "title": record.title,
        "originaltitle": record.original_title,
        "year": record.year,
        "premiered": record.premiered.map(|d| d.to_string()),
        "plot": record.plot,
        "tagline": record.tagline,
        "genre": record.genre,
        "country": record.country,
        "studio": record.studio,
        "director": record.director,
        "writer": record.writer,
        "duration": record.runtime,
        "rating": record.rating,
        "votes": record.votes,
        "mpaa": record.certification,
        "season": record.season,
        "episode": record.episode,
        "imdbnumber": record.ids.imdb,
        "status": record.status,
    })
}

fn context(base: &str, seed: &ItemSeed) -> Vec<ContextAction> {
    if !matches!(seed.kind, MediaKind::Movie | MediaKind::Show | MediaKind::Episode) {
        return Vec::new();
    }
    let mut ops = vec![
        ("Mark as watched", "watched"),
        ("Mark as unwatched", "unwatched"),
        ("Rate", "rate"),
    ];
    if seed.kind != MediaKind::Episode {
        ops.push(("Add to watchlist", "watchlist"));
        ops.push(("Remove from watchlist", "unwatchlist"));
    }
    if seed.kind != MediaKind::Show {
        ops.push(("Clear progress", "clear_progress"));
    }
    ops.into_iter()
        .map(|(label, op)| {
            let mut params = seed_params(seed);
            params.insert("op".into(), op.into());
            ContextAction {
                label: label.into(),
                command: command(base, "trakt", &params),
            }
        })
        .collect()
}

/// Seed of a listed record. Seasons and episodes are addressed through the
/// show they belong to.
fn seed_of(record: &MetaRecord, request: &MenuRequest) -> ItemSeed {
    let mut seed = record.seed();
    if let Intent::Seasons { show } | Intent::Episodes { show, .. } = &request.intent {
        seed.show_ids = Some(show.clone());
    }
    seed
}

pub fn record_item(base: &str, record: &MetaRecord, request: &MenuRequest) -> DirectoryItem {
    let seed = seed_of(record, request);
    let (command, is_folder) = match record.kind {
        MediaKind::Show => (
            menu_command(base, &MenuRequest::new(MediaKind::Show, Intent::Seasons { show: record.ids.clone() })),
            true,
        ),
        MediaKind::Season => {
            let show = seed.show_ids.clone().unwrap_or_else(|| record.ids.clone());
            let request = MenuRequest::new(
                MediaKind::Show,
                Intent::Episodes {
                    show,
                    season: record.season.unwrap_or(1),
                },
            );
            (menu_command(base, &request), true)
        }
        MediaKind::Person => {
            let filter = DiscoverFilter {
                catalogue: Catalogue::Tmdb,
                person: record.ids.tmdb,
                ..Default::default()
            };
            (
                menu_command(base, &MenuRequest::new(MediaKind::Movie, Intent::Discover(filter))),
                true,
            )
        }
        _ => (command(base, "scrape", &seed_params(&seed)), false),
    };
    DirectoryItem {
        label: label(record),
        label2: record.year.map(|y| y.to_string()),
        artwork: record.artwork(),
        command,
        is_folder,
        context: context(base, &seed),
        info: info(record),
    }
}

fn content_type(request: &MenuRequest) -> &'static str {
    match (&request.intent, request.kind) {
        (Intent::Explore, _) => "files",
        (Intent::Episodes { .. }, _) => "episodes",
        (Intent::Seasons { .. }, _) => "seasons",
        (_, MediaKind::Show) => "tvshows",
        (_, MediaKind::Person) | (Intent::Persons { .. }, _) => "actors",
        _ => "movies",
    }
}

/// Every entry of `page` plus a pager item for the next cursor.
pub fn items(base: &str, page: &MenuPage) -> Vec<DirectoryItem> {
    let mut out: Vec<DirectoryItem> = page
        .entries
        .iter()
        .map(|entry| match entry {
            MenuEntry::Item(record) => record_item(base, record, &page.request),
            MenuEntry::Folder { label, request } => DirectoryItem {
                label: label.clone(),
                label2: None,
                artwork: Default::default(),
                command: menu_command(base, request),
                is_folder: true,
                context: Vec::new(),
                info: json!({}),
            },
        })
        .collect();
    if let Some(next) = &page.next {
        out.push(DirectoryItem {
            label: format!("Next Page ({})", next.page),
            label2: None,
            artwork: Default::default(),
            command: menu_command(base, next),
            is_folder: true,
            context: Vec::new(),
            info: json!({ "specialsort": "bottom" }),
        });
    }
    out
}

pub async fn render(base: &str, page: &MenuPage, directory: &dyn Directory) {
    for item in items(base, page) {
        directory.add_item(item).await;
    }
    directory.finish(content_type(&page.request), true).await;
}
