//! UAKino rule set
//!
//! HTML catalog with a DLE search page. Series episodes come from an AJAX
//! playlist endpoint that answers with an HTML fragment; movies embed a
//! player iframe. Player pages are resolved on play.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;

use super::{SiteContext, SiteDescriptor, SiteRules};
use crate::error::{OnlineError, Result};
use crate::parser::text::{element_text, normalize_url};
use crate::parser::{extract_player_file, extract_subtitles, first_number};
use crate::types::{EpisodeInfo, ProjectInfo, Query, RawTrack, ResolvedStream, SearchResult, SerialKind};

static DESCRIPTOR: SiteDescriptor = SiteDescriptor {
    name: "uakino",
    display_name: "UAKino",
    host: "https://uakino.best",
    api_host: None,
    search_minutes: 20,
    project_minutes: 10,
    playlist_minutes: 10,
    auto_pick_first: false,
    season_listing: false,
    default_voice: "Основне",
};

const PLAYLIST_PATH: &str = "/engine/ajax/playlists.php";
const PLAYLIST_FIELD: &str = "playlist";

/// URL segments that never lead to a title page
const BLACKLIST: &[&str] = &["/news/", "/franchise/"];
const SERIES_SEGMENTS: &[&str] = &["/seriesss/", "/anime-series/", "/cartoonseries/"];
const MOVIE_SEGMENTS: &[&str] = &["/filmy/", "/anime-solo/", "/features/"];

/// AJAX playlist envelope
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlaylistEnvelope {
    success: bool,
    response: Option<String>,
}

/// UAKino rules
#[derive(Debug, Default, Clone, Copy)]
pub struct UAKino;

impl UAKino {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SiteRules for UAKino {
    fn descriptor(&self) -> &SiteDescriptor {
        &DESCRIPTOR
    }

    async fn search(&self, ctx: &SiteContext<'_>, query: &Query) -> Result<Vec<SearchResult>> {
        let mut queries: Vec<&str> = Vec::new();
        for text in [query.title.as_deref(), query.original_title.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
        {
            if !text.is_empty() && !queries.contains(&text) {
                queries.push(text);
            }
        }

        let headers = [("User-Agent", "Mozilla/5.0"), ("Referer", ctx.host())];
        for text in queries {
            let url = format!(
                "{}/index.php?do=search&subaction=search&story={}",
                ctx.host(),
                urlencoding::encode(text)
            );
            let html = match ctx.fetch(&url, &headers).await {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "UAKino search failed");
                    continue;
                }
            };

            let results = parse_search(ctx.host(), &html, query.serial);
            if !results.is_empty() {
                return Ok(results);
            }
        }
        Ok(Vec::new())
    }

    async fn fetch_project(&self, ctx: &SiteContext<'_>, locator: &str, query: &Query) -> Result<ProjectInfo> {
        let mut project = ProjectInfo::new(locator);
        if query.serial == SerialKind::Series {
            project.is_serial = Some(true);
            return Ok(project);
        }

        let html = ctx
            .fetch(locator, &[("User-Agent", "Mozilla/5.0"), ("Referer", ctx.host())])
            .await?;
        match parse_player_iframe(ctx.host(), &html) {
            PageKind::Playlist => project.is_serial = Some(query.serial != SerialKind::Movie),
            PageKind::Player(url) => {
                project.is_serial = Some(false);
                project.direct_hash = Some(url);
            }
            PageKind::Nothing => project.is_serial = Some(false),
        }
        Ok(project)
    }

    async fn fetch_playlist(&self, ctx: &SiteContext<'_>, project: &ProjectInfo) -> Result<Vec<RawTrack>> {
        let news_id = extract_news_id(&project.locator)
            .ok_or_else(|| OnlineError::InvalidUrl(project.locator.clone()))?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let url = format!(
            "{}{}?news_id={}&xfield={}&time={}",
            ctx.host(),
            PLAYLIST_PATH,
            news_id,
            PLAYLIST_FIELD,
            millis
        );

        let body = ctx
            .fetch(
                &url,
                &[
                    ("User-Agent", "Mozilla/5.0"),
                    ("Referer", project.locator.as_str()),
                    ("X-Requested-With", "XMLHttpRequest"),
                ],
            )
            .await?;

        let envelope: PlaylistEnvelope = serde_json::from_str(&body)?;
        let fragment = match envelope.response {
            Some(fragment) if envelope.success && !fragment.trim().is_empty() => fragment,
            _ => return Err(OnlineError::UpstreamEmpty(url)),
        };
        Ok(parse_playlist(ctx.host(), &fragment))
    }

    async fn extract_stream_file(&self, ctx: &SiteContext<'_>, locator: &str) -> Result<ResolvedStream> {
        if looks_like_direct_stream(locator) {
            return Ok(ResolvedStream::file(locator));
        }

        let html = ctx
            .fetch(locator, &[("User-Agent", "Mozilla/5.0"), ("Referer", ctx.host())])
            .await?;
        let file = extract_player_file(&html)
            .ok_or_else(|| OnlineError::ExtractionMiss(format!("player file on {}", locator)))?;

        Ok(ResolvedStream {
            file: normalize_url(ctx.host(), &file),
            subtitles: extract_subtitles(ctx.host(), &html),
            ..ResolvedStream::default()
        })
    }

    fn needs_secondary_fetch(&self, _provider: Option<&str>, locator: &str) -> bool {
        !looks_like_direct_stream(locator)
    }
}

fn looks_like_direct_stream(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains(".m3u8") || lower.ends_with(".mp4")
}

fn is_blacklisted(url: &str) -> bool {
    let lower = url.to_lowercase();
    BLACKLIST.iter().any(|segment| lower.contains(segment))
}

fn matches_kind(url: &str, serial: SerialKind) -> bool {
    match serial {
        SerialKind::Series => SERIES_SEGMENTS.iter().any(|s| url.contains(s)),
        SerialKind::Movie => MOVIE_SEGMENTS.iter().any(|s| url.contains(s)),
        SerialKind::Unknown => true,
    }
}

/// `https://uakino.best/filmy/123-title.html` → `123`
pub fn extract_news_id(href: &str) -> Option<String> {
    let tail = href.trim_end_matches('/').rsplit('/').next()?;
    let id = tail.split('-').next()?.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Parse the search page, dropping blacklisted and wrong-kind links.
fn parse_search(host: &str, html: &str, serial: SerialKind) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let mut results = Vec::new();
    let mut seen = HashSet::new();

    let Ok(item_selector) = Selector::parse("div.movie-item.short-item") else {
        return results;
    };
    let (Ok(title_selector), Ok(alt_selector), Ok(season_selector), Ok(img_selector)) = (
        Selector::parse("a.movie-title, a.full-movie"),
        Selector::parse("div.full-movie-title"),
        Selector::parse("div.full-season"),
        Selector::parse("img"),
    ) else {
        return results;
    };

    for item in document.select(&item_selector) {
        let link = item.select(&title_selector).next();
        let href = link
            .and_then(|a| a.value().attr("href"))
            .map(|href| normalize_url(host, href))
            .unwrap_or_default();
        let mut title = link.map(|a| element_text(&a)).unwrap_or_default();
        if title.is_empty() {
            title = item
                .select(&alt_selector)
                .next()
                .map(|el| element_text(&el))
                .unwrap_or_default();
        }

        if title.is_empty() || href.is_empty() || is_blacklisted(&href) || !matches_kind(&href, serial) {
            continue;
        }

        let season = item
            .select(&season_selector)
            .next()
            .map(|el| element_text(&el))
            .unwrap_or_default();
        if !season.is_empty() && !title.to_lowercase().contains(&season.to_lowercase()) {
            title = format!("{} ({})", title, season);
        }

        if !seen.insert(href.to_lowercase()) {
            continue;
        }

        let poster = item
            .select(&img_selector)
            .next()
            .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
            .map(|src| normalize_url(host, src))
            .filter(|src| !src.is_empty());

        results.push(SearchResult { title, url: href, poster });
    }

    results
}

#[derive(Debug, PartialEq)]
enum PageKind {
    /// Episodes live behind the AJAX playlist
    Playlist,
    /// Movie player iframe URL
    Player(String),
    Nothing,
}

fn parse_player_iframe(host: &str, html: &str) -> PageKind {
    let document = Html::parse_document(html);

    let playlist_selector = format!("div.playlists-ajax[data-xfname='{}']", PLAYLIST_FIELD);
    if let Ok(selector) = Selector::parse(&playlist_selector) {
        if document.select(&selector).next().is_some() {
            return PageKind::Playlist;
        }
    }

    let Ok(selector) = Selector::parse("iframe#pre") else {
        return PageKind::Nothing;
    };
    // Prefer an iframe outside the pre-roll container
    let overroll = Selector::parse("#overroll iframe#pre").ok();
    let in_overroll: Vec<_> = overroll
        .map(|s| document.select(&s).map(|el| el.id()).collect())
        .unwrap_or_default();
    let iframe = document
        .select(&selector)
        .find(|el| !in_overroll.contains(&el.id()))
        .or_else(|| document.select(&selector).next());

    let Some(iframe) = iframe else {
        return PageKind::Nothing;
    };
    let src = iframe
        .value()
        .attr("src")
        .filter(|s| !s.trim().is_empty())
        .or_else(|| iframe.value().attr("data-src"))
        .unwrap_or_default();

    let lower = src.to_lowercase();
    if src.trim().is_empty() || lower.contains("youtube.com") || lower.contains("youtu.be") {
        return PageKind::Nothing;
    }
    PageKind::Player(normalize_url(host, src))
}

/// Group playlist `li[data-file]` items into tracks by `data-voice`.
fn parse_playlist(host: &str, fragment: &str) -> Vec<RawTrack> {
    let document = Html::parse_fragment(fragment);
    let Ok(selector) = Selector::parse("li[data-file]") else {
        return Vec::new();
    };

    let mut tracks: Vec<RawTrack> = Vec::new();
    for item in document.select(&selector) {
        let file = item.value().attr("data-file").unwrap_or_default().trim();
        if file.is_empty() {
            continue;
        }
        let title = match element_text(&item) {
            t if t.is_empty() => "Episode".to_string(),
            t => t,
        };
        let voice = item
            .value()
            .attr("data-voice")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DESCRIPTOR.default_voice);

        let episode = EpisodeInfo {
            number: first_number(&title),
            title: Some(title),
            locator: normalize_url(host, file),
            ..EpisodeInfo::default()
        };

        match tracks.iter_mut().find(|t| t.name.as_deref() == Some(voice)) {
            Some(track) => track.seasons[0].episodes.push(episode),
            None => tracks.push(RawTrack::single_season(voice, vec![episode])),
        }
    }
    tracks
}
