//! Lyrics provider: the [`LyricsProvider`] seam and the Genius client.
//!
//! Genius lyrics take two requests: the search API (bearer token) finds the
//! song page URL, then the page HTML is scraped for the lyrics containers.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::{Client, Response};
use scraper::{ElementRef, Html, Node, Selector};
use serde::Deserialize;
use thiserror::Error;

const GENIUS_API_BASE: &str = "https://api.genius.com";
const USER_AGENT: &str = concat!("lyrics-dataset/", env!("CARGO_PKG_VERSION"));

/// Why a provider request produced no lyrics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no lyrics found")]
    NotFound,
    #[error("provider rejected the access token (HTTP {0})")]
    Auth(u16),
    #[error("provider answered HTTP {0}")]
    Http(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Search lyrics by song title and artist name.
pub trait LyricsProvider {
    fn search(&self, title: &str, artist: &str) -> Result<String, ProviderError>;
}

// ============================================================================
// Search API
// ============================================================================

#[derive(Deserialize)]
struct SearchResponse {
    response: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "type")]
    kind: String,
    result: SongResult,
}

#[derive(Deserialize)]
struct SongResult {
    url: String,
    primary_artist: Option<HitArtist>,
}

#[derive(Deserialize)]
struct HitArtist {
    name: String,
}

fn fold_artist(name: &str) -> String {
    name.replace('\u{a0}', " ").trim().to_lowercase()
}

fn artist_matches(wanted: &str, found: &str) -> bool {
    let (wanted, found) = (fold_artist(wanted), fold_artist(found));
    !wanted.is_empty() && !found.is_empty() && (wanted.contains(&found) || found.contains(&wanted))
}

/// URL of the first song hit whose primary artist matches `artist`.
fn pick_song_url(body: &str, artist: &str) -> Result<String, ProviderError> {
    let parsed: SearchResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    parsed
        .response
        .hits
        .into_iter()
        .filter(|hit| hit.kind == "song")
        .find(|hit| {
            hit.result
                .primary_artist
                .as_ref()
                .is_some_and(|a| artist_matches(artist, &a.name))
        })
        .map(|hit| hit.result.url)
        .ok_or(ProviderError::NotFound)
}

// ============================================================================
// Lyrics Page
// ============================================================================

const LYRICS_CONTAINER: &str = "div[data-lyrics-container='true']";

static EMBED_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d*\s*Embed\s*$").unwrap());

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if el.name() == "br" => out.push('\n'),
            // page headers injected inside the container
            Node::Element(el) if el.attr("data-exclude-from-selection").is_some() => {}
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

/// Drop the "NN Contributors ... Lyrics" header line, "You might also like"
/// recommendations and the trailing "Embed" marker.
fn strip_page_artefacts(raw: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();
    if let Some(first) = lines.first() {
        let first = first.trim();
        if first.contains("Contributors") || first.ends_with(" Lyrics") {
            lines.remove(0);
        }
    }
    let text = lines
        .into_iter()
        .filter(|line| line.trim() != "You might also like")
        .collect::<Vec<_>>()
        .join("\n");
    EMBED_SUFFIX.replace(text.trim_end(), "").trim().to_string()
}

/// Extract the lyrics text from a Genius song page.
pub fn extract_lyrics(html: &str) -> Result<String, ProviderError> {
    let selector = Selector::parse(LYRICS_CONTAINER)
        .map_err(|e| ProviderError::Parse(format!("invalid selector {LYRICS_CONTAINER}: {e:?}")))?;
    let document = Html::parse_document(html);
    let mut raw = String::new();
    let mut containers = 0;
    for container in document.select(&selector) {
        containers += 1;
        collect_text(container, &mut raw);
        raw.push('\n');
    }
    if containers == 0 {
        return Err(ProviderError::Parse("no lyrics container on page".to_string()));
    }
    let lyrics = strip_page_artefacts(&raw);
    if lyrics.is_empty() {
        return Err(ProviderError::NotFound);
    }
    Ok(lyrics)
}

// ============================================================================
// Client
// ============================================================================

fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(match status.as_u16() {
        code @ (401 | 403) => ProviderError::Auth(code),
        404 => ProviderError::NotFound,
        code => ProviderError::Http(code),
    })
}

/// Blocking Genius client. Requests are spaced by at least `request_delay`.
pub struct GeniusClient {
    client: Client,
    access_token: String,
    request_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl GeniusClient {
    /// Build the client. An empty token is a setup failure.
    pub fn new(access_token: &str, timeout: Duration, request_delay: Duration) -> Result<Self> {
        if access_token.trim().is_empty() {
            bail!("Genius access token is empty (set GENIUS_ACCESS_TOKEN or --genius-token)");
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            access_token: access_token.trim().to_string(),
            request_delay,
            last_request: Mutex::new(None),
        })
    }

    fn rate_limit(&self) {
        if self.request_delay.is_zero() {
            return;
        }
        if let Ok(mut last) = self.last_request.lock() {
            if let Some(at) = *last {
                let elapsed = at.elapsed();
                if elapsed < self.request_delay {
                    std::thread::sleep(self.request_delay - elapsed);
                }
            }
            *last = Some(Instant::now());
        }
    }

    fn search_song_url(&self, title: &str, artist: &str) -> Result<String, ProviderError> {
        self.rate_limit();
        let query = format!("{title} {artist}");
        let response = self
            .client
            .get(format!("{GENIUS_API_BASE}/search"))
            .bearer_auth(&self.access_token)
            .query(&[("q", query.as_str())])
            .send()?;
        let body = check_status(response)?.text()?;
        pick_song_url(&body, artist)
    }

    fn fetch_page(&self, url: &str) -> Result<String, ProviderError> {
        self.rate_limit();
        let response = self.client.get(url).send()?;
        Ok(check_status(response)?.text()?)
    }
}

impl LyricsProvider for GeniusClient {
    fn search(&self, title: &str, artist: &str) -> Result<String, ProviderError> {
        let url = self.search_song_url(title, artist)?;
        tracing::debug!("Genius page for '{}' by {}: {}", title, artist, url);
        let html = self.fetch_page(&url)?;
        extract_lyrics(&html)
    }
}
