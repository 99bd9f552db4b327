//! JSON-RPC 2.0 client for the media host.
//!
//! Serves both as a [`VideoLibrary`] (filtered `VideoLibrary.Get*` calls,
//! re-checked in memory because the host's filter operators are textual) and
//! as the [`MediaHost`] control surface.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::core::config::HostConfig;
use crate::core::errors::{MfcError, Result};
use crate::library::host::MediaHost;
use crate::library::query::{ExpirationCriteria, ExpirationQuery, RowFacts, parse_store_time};
use crate::library::{CandidateVideo, FileId, MediaCategory, Rating, VideoLibrary};

const SCANNING_BOOLEAN: &str = "Library.IsScanningVideo";

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Resume {
    position: f64,
}

/// One item of a `VideoLibrary.Get*` listing; fields absent per category.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RpcVideo {
    file: String,
    label: String,
    title: String,
    year: i32,
    rating: f64,
    playcount: i64,
    lastplayed: String,
    dateadded: String,
    resume: Option<Resume>,
    showtitle: String,
    season: i64,
    artist: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ActivePlayer {
    #[serde(rename = "type")]
    kind: String,
}

/// Blocking JSON-RPC client over HTTP.
pub struct JsonRpcClient {
    client: reqwest::blocking::Client,
    url: url::Url,
    username: Option<String>,
    password: Option<String>,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn from_config(config: &HostConfig) -> Result<Self> {
        let raw = config.rpc_url.as_deref().ok_or_else(|| MfcError::InvalidConfig {
            details: "host.rpc_url is not set".to_string(),
        })?;
        let url = url::Url::parse(raw).map_err(|error| MfcError::InvalidConfig {
            details: format!("host.rpc_url {raw:?}: {error}"),
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("mfc/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url,
            username: config.username.clone(),
            password: config.password.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    fn call<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": id});

        let mut request = self.client.post(self.url.clone()).json(&body);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_ref());
        }
        let response = request.send()?;
        if !response.status().is_success() {
            return Err(MfcError::MetadataQuery {
                context: "jsonrpc",
                details: format!("{method} returned HTTP {}", response.status()),
            });
        }
        let envelope: RpcResponse<T> = response.json()?;
        unwrap_envelope(method, envelope)
    }
}

fn unwrap_envelope<T>(method: &str, envelope: RpcResponse<T>) -> Result<T> {
    if let Some(error) = envelope.error {
        return Err(MfcError::MetadataQuery {
            context: "jsonrpc",
            details: format!("{method} failed ({}): {}", error.code, error.message),
        });
    }
    envelope.result.ok_or_else(|| MfcError::MetadataQuery {
        context: "jsonrpc",
        details: format!("{method} returned neither result nor error"),
    })
}

const fn listing(category: MediaCategory) -> (&'static str, &'static str, &'static [&'static str]) {
    match category {
        MediaCategory::Movie => (
            "VideoLibrary.GetMovies",
            "movies",
            &["file", "title", "year", "rating", "playcount", "lastplayed", "dateadded", "resume"],
        ),
        MediaCategory::Episode => (
            "VideoLibrary.GetEpisodes",
            "episodes",
            &[
                "file", "title", "showtitle", "season", "rating", "playcount", "lastplayed",
                "dateadded", "resume",
            ],
        ),
        MediaCategory::MusicVideo => (
            "VideoLibrary.GetMusicVideos",
            "musicvideos",
            &["file", "title", "artist", "year", "playcount", "lastplayed", "dateadded", "resume"],
        ),
    }
}

/// Keep the items the query really matches and turn them into candidates.
fn candidates_from_listing(
    category: MediaCategory,
    query: &ExpirationQuery,
    items: Vec<RpcVideo>,
) -> Vec<CandidateVideo> {
    items
        .into_iter()
        .filter(|item| !item.file.is_empty())
        .filter(|item| {
            query.matches(&RowFacts {
                play_count: item.playcount,
                last_played: parse_store_time(&item.lastplayed),
                date_added: parse_store_time(&item.dateadded),
                rating: if category == MediaCategory::MusicVideo {
                    Rating::Unrated
                } else {
                    Rating::from_rpc_value(item.rating)
                },
                in_progress: item.resume.as_ref().is_some_and(|r| r.position > 0.0),
                directory: &item.file,
            })
        })
        .map(|item| {
            let mut candidate = CandidateVideo::new(category, item.file);
            let title = if item.title.is_empty() {
                item.label
            } else {
                item.title
            };
            if !title.is_empty() {
                candidate.title = title;
            }
            candidate.year = (item.year > 0).then_some(item.year);
            candidate.show = (!item.showtitle.is_empty()).then_some(item.showtitle);
            candidate.season = (category == MediaCategory::Episode && item.season >= 0)
                .then_some(item.season);
            candidate.artists = item.artist;
            candidate
        })
        .collect()
}

impl VideoLibrary for JsonRpcClient {
    fn describe(&self) -> String {
        let mut shown = self.url.clone();
        let _ = shown.set_password(None);
        format!("jsonrpc ({shown})")
    }

    fn find_expired(
        &self,
        category: MediaCategory,
        criteria: &ExpirationCriteria,
    ) -> Result<Vec<CandidateVideo>> {
        let query = ExpirationQuery::build(category, criteria, chrono::Local::now().naive_local())?;
        let (method, key, properties) = listing(category);
        let mut result: serde_json::Map<String, Value> = self.call(
            method,
            json!({"properties": properties, "filter": query.to_rpc_filter()}),
        )?;
        // The host omits the list entirely when nothing matches.
        let items: Vec<RpcVideo> = match result.remove(key) {
            Some(list) => serde_json::from_value(list)?,
            None => Vec::new(),
        };
        Ok(candidates_from_listing(category, &query, items))
    }

    fn update_path_reference(&self, file_id: &FileId, _new_dir: &Path) -> Result<()> {
        Err(MfcError::MetadataUpdate {
            context: "jsonrpc",
            details: format!(
                "the host API cannot repoint file {} in {}; a library rescan will pick it up",
                file_id.id, file_id.store
            ),
        })
    }
}

impl MediaHost for JsonRpcClient {
    fn is_playing_video(&self) -> Result<bool> {
        let players: Vec<ActivePlayer> = self.call("Player.GetActivePlayers", json!({}))?;
        Ok(players.iter().any(|p| p.kind == "video"))
    }

    fn is_library_scanning(&self) -> Result<bool> {
        let result: serde_json::Map<String, Value> = self.call(
            "XBMC.GetInfoBooleans",
            json!({"booleans": [SCANNING_BOOLEAN]}),
        )?;
        Ok(result
            .get(SCANNING_BOOLEAN)
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    fn clean_library(&self) -> Result<()> {
        let _: Value = self.call("VideoLibrary.Clean", json!({"showdialogs": false}))?;
        Ok(())
    }

    fn show_notification(
        &self,
        title: &str,
        message: &str,
        duration_ms: u64,
        icon: Option<&str>,
    ) -> Result<()> {
        let mut params = json!({"title": title, "message": message, "displaytime": duration_ms});
        if let Some(icon) = icon {
            params["image"] = Value::String(icon.to_string());
        }
        let _: Value = self.call("GUI.ShowNotification", params)?;
        Ok(())
    }
}
