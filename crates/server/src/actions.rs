//! The action vocabulary the host shell invokes. Each action maps onto one
//! orchestrator entry point and resolves with a container, a resolved item
//! or a short acknowledgement.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cinemeld_core::error::ErrorKind;
use cinemeld_core::host::{Directory, DirectoryItem, Notification};
use cinemeld_menu::intent::seed_from_params;
use cinemeld_menu::render::menu_command;
use cinemeld_menu::MenuRequest;
use cinemeld_metadata::record::MetaRecord;
use cinemeld_metadata::trakt::auth::{DeviceAuthOutcome, TraktAuth};
use cinemeld_playback::{PlaybackConfig, PlaybackController, PlaybackRequest};
use cinemeld_sync::{SyncAction, TraktStore, UpdateOutcome};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::AppError;
use crate::state::AppState;

pub type Params = BTreeMap<String, String>;

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionReply {
    Container {
        content: String,
        succeeded: bool,
        items: Vec<DirectoryItem>,
        /// Command of the following page.
        next: Option<String>,
    },
    Item { record: Option<MetaRecord> },
    Session { session: String },
    DeviceCode {
        user_code: String,
        verification_url: String,
        expires_in: u64,
    },
    Done { message: String },
    Count { count: u64 },
}

impl ActionReply {
    fn done(message: impl Into<String>) -> Self {
        Self::Done { message: message.into() }
    }
}

/// Directory that keeps the listing for the HTTP reply.
#[derive(Default)]
struct Listing {
    items: Mutex<Vec<DirectoryItem>>,
    finished: Mutex<Option<(String, bool)>>,
}

#[async_trait]
impl Directory for Listing {
    async fn add_item(&self, item: DirectoryItem) {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).push(item);
    }

    async fn finish(&self, content: &str, succeeded: bool) {
        *self.finished.lock().unwrap_or_else(|e| e.into_inner()) = Some((content.to_string(), succeeded));
    }

    async fn refresh(&self) {}
}

impl Listing {
    fn into_reply(self, next: Option<String>) -> ActionReply {
        let items = self.items.into_inner().unwrap_or_else(|e| e.into_inner());
        let (content, succeeded) = self
            .finished
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or_else(|| ("files".to_string(), true));
        ActionReply::Container {
            content,
            succeeded,
            items,
            next,
        }
    }
}

/// Shortcut actions that are menus with a fixed intent.
fn shortcut(action: &str) -> Option<(&'static str, &'static str)> {
    let (media, rest) = if let Some(rest) = action.strip_prefix("movies") {
        ("movie", rest)
    } else if let Some(rest) = action.strip_prefix("shows") {
        ("show", rest)
    } else {
        return None;
    };
    let intent = match rest {
        "Retrieve" => "discover",
        "Random" => "random",
        "Awards" => "awards",
        "Rated" => "rated",
        "Persons" => "persons",
        "Watchlist" => "watchlist",
        "History" => "history",
        "Progress" => "progress",
        "Search" => "search",
        _ => return None,
    };
    Some((media, intent))
}

pub async fn dispatch(state: &AppState, action: &str, mut params: Params) -> Result<ActionReply, AppError> {
    info!(action, "action");
    if let Some((media, intent)) = shortcut(action) {
        params.entry("media".into()).or_insert_with(|| media.into());
        params.insert("intent".into(), intent.into());
        return menu(state, &params).await;
    }
    match action {
        "menu" => menu(state, &params).await,
        "scrape" => scrape(state, &params).await,
        "play" => play(state, &params).await,
        "traktAuth" => trakt_auth(state).await,
        "traktLogout" => trakt_logout(state).await,
        "traktMark" => trakt_mark(state, &params).await,
        "traktRetry" => {
            let count = trakt_store(state)?.retry_pending(true).await?;
            Ok(ActionReply::Count { count: count as u64 })
        }
        "cachePurge" => {
            let mut count = state.cache.purge().await?;
            if let Some(store) = &state.trakt {
                count += store.queue().prune().await?;
            }
            Ok(ActionReply::Count { count })
        }
        "cacheClear" => {
            state.cache.clear().await?;
            Ok(ActionReply::done("cache cleared"))
        }
        other => Err(AppError::bad_request(format!("unknown action {other}"))),
    }
}

async fn menu(state: &AppState, params: &Params) -> Result<ActionReply, AppError> {
    let request = MenuRequest::from_params(params)?;
    let listing = Listing::default();
    let page = state.menu.render(&request, &listing).await?;
    let base = &state.menu.config().plugin_url;
    let next = page.next.as_ref().map(|r| menu_command(base, r));
    Ok(listing.into_reply(next))
}

async fn scrape(state: &AppState, params: &Params) -> Result<ActionReply, AppError> {
    let seed = seed_from_params(params)?;
    if flag(params, "prescrape") {
        state.aggregator.refresh_in_background(seed);
        return Ok(ActionReply::done("scheduled"));
    }
    let record = state.aggregator.enrich(seed).await?;
    Ok(ActionReply::Item { record })
}

async fn play(state: &AppState, params: &Params) -> Result<ActionReply, AppError> {
    let url = params
        .get("url")
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::bad_request("play without a url"))?;
    let seed = seed_from_params(params)?;
    let mut request = PlaybackRequest::new(url.clone(), seed.clone());
    request.from_binge = flag(params, "binge");
    match state.aggregator.enrich(seed).await {
        Ok(Some(record)) => {
            if let Some(title) = &record.title {
                request.title = title.clone();
            }
            request.original_languages = record.language.clone();
            request.artwork = record.artwork();
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "playing without metadata"),
    }
    let config = PlaybackConfig::from_settings(state.host.settings.as_ref()).await;
    let controller = PlaybackController::new(state.host.clone(), config, state.trakt.clone(), request);
    let session = state.sessions.start(controller);
    Ok(ActionReply::Session { session })
}

fn trakt_store(state: &AppState) -> Result<&Arc<TraktStore>, AppError> {
    state
        .trakt
        .as_ref()
        .ok_or_else(|| AppError::new(ErrorKind::Authentication, "trakt is not configured"))
}

fn trakt_auth_handle(state: &AppState) -> Result<&Arc<TraktAuth>, AppError> {
    state
        .trakt_auth
        .as_ref()
        .ok_or_else(|| AppError::new(ErrorKind::Authentication, "trakt is not configured"))
}

/// Start a device login. The code is shown to the user and the token is
/// polled for in the background.
async fn trakt_auth(state: &AppState) -> Result<ActionReply, AppError> {
    let auth = trakt_auth_handle(state)?.clone();
    let code = auth.device_code().await?;
    state
        .host
        .dialog
        .notify(Notification::info(
            "Trakt",
            format!("Open {} and enter {}", code.verification_url, code.user_code),
        ))
        .await;

    let dialog = state.host.dialog.clone();
    let store = state.trakt.clone();
    let abort = state.abort.child();
    let polled = code.clone();
    tokio::spawn(async move {
        let message = match auth.poll_device(&polled, &abort).await {
            Ok(DeviceAuthOutcome::Approved) => {
                if let Some(store) = store {
                    store.refresh_in_background();
                }
                "Signed in".to_string()
            }
            Ok(DeviceAuthOutcome::Cancelled) => return,
            Ok(outcome) => format!("Sign-in failed: {outcome:?}"),
            Err(e) => {
                warn!(error = %e, "device login failed");
                format!("Sign-in failed: {e}")
            }
        };
        dialog.notify(Notification::info("Trakt", message)).await;
    });

    Ok(ActionReply::DeviceCode {
        user_code: code.user_code,
        verification_url: code.verification_url,
        expires_in: code.expires_in,
    })
}

async fn trakt_logout(state: &AppState) -> Result<ActionReply, AppError> {
    trakt_auth_handle(state)?.logout().await;
    if let Some(store) = &state.trakt {
        store.reset().await?;
    }
    Ok(ActionReply::done("signed out"))
}

fn sync_action(params: &Params) -> Result<SyncAction, AppError> {
    let op = params.get("op").map(String::as_str).unwrap_or("watched");
    Ok(match op {
        "watched" => SyncAction::Watched { at: None },
        "unwatched" => SyncAction::Unwatched,
        "rate" => {
            let rating = params
                .get("rating")
                .and_then(|r| r.parse::<u8>().ok())
                .filter(|r| (1..=10).contains(r))
                .ok_or_else(|| AppError::bad_request("rating must be 1..10"))?;
            SyncAction::Rate(rating)
        }
        "unrate" => SyncAction::Unrate,
        "watchlist" => SyncAction::Watchlist,
        "unwatchlist" => SyncAction::Unwatchlist,
        "collect" => SyncAction::Collect,
        "uncollect" => SyncAction::Uncollect,
        other => return Err(AppError::bad_request(format!("unknown op {other}"))),
    })
}

async fn trakt_mark(state: &AppState, params: &Params) -> Result<ActionReply, AppError> {
    let store = trakt_store(state)?;
    let seed = seed_from_params(params)?;
    let action = sync_action(params)?;
    let outcome = store.update(&seed, action).await?;
    state.host.directory.refresh().await;
    Ok(ActionReply::done(match outcome {
        UpdateOutcome::Applied => "applied",
        UpdateOutcome::Queued => "queued",
    }))
}

fn flag(params: &Params, key: &str) -> bool {
    matches!(params.get(key).map(String::as_str), Some("true") | Some("1"))
}
