//! Bamboo rule set
//!
//! HTML catalog. A series page splits its episodes into a subtitle block and
//! a dub block; a movie page lists one `data-file` span per variant. Every
//! file is directly playable.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use super::{SiteContext, SiteDescriptor, SiteRules};
use crate::error::{OnlineError, Result};
use crate::parser::text::{element_text, normalize_url};
use crate::parser::first_number;
use crate::types::{EpisodeInfo, ProjectInfo, Query, RawTrack, ResolvedStream, SearchResult, SerialKind};

static DESCRIPTOR: SiteDescriptor = SiteDescriptor {
    name: "bamboo",
    display_name: "Bamboo",
    host: "https://bambooua.com",
    api_host: None,
    search_minutes: 20,
    project_minutes: 30,
    playlist_minutes: 30,
    auto_pick_first: false,
    season_listing: false,
    default_voice: "Озвучення",
};

/// Header marking the subtitle block
const SUBTITLES_HEADER: &str = "субтитри";
/// Header marking the dub block
const DUB_HEADER: &str = "озвучення";

/// Bamboo rules
#[derive(Debug, Default, Clone, Copy)]
pub struct Bamboo;

impl Bamboo {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SiteRules for Bamboo {
    fn descriptor(&self) -> &SiteDescriptor {
        &DESCRIPTOR
    }

    async fn search(&self, ctx: &SiteContext<'_>, query: &Query) -> Result<Vec<SearchResult>> {
        let Some(text) = query.display_title() else {
            return Ok(Vec::new());
        };

        let url = format!(
            "{}/index.php?do=search&subaction=search&story={}",
            ctx.host(),
            urlencoding::encode(text)
        );
        let html = ctx
            .fetch(&url, &[("User-Agent", "Mozilla/5.0"), ("Referer", ctx.host())])
            .await?;
        Ok(parse_search(ctx.host(), &html))
    }

    async fn fetch_project(&self, ctx: &SiteContext<'_>, locator: &str, query: &Query) -> Result<ProjectInfo> {
        let html = ctx
            .fetch(locator, &[("User-Agent", "Mozilla/5.0"), ("Referer", ctx.host())])
            .await?;
        let project = parse_page(ctx.host(), locator, &html, query.serial);

        if project.tracks.is_empty() && project.episodes.is_empty() {
            return Err(OnlineError::ExtractionMiss(format!("Bamboo players on {}", locator)));
        }
        Ok(project)
    }

    async fn extract_stream_file(&self, _ctx: &SiteContext<'_>, locator: &str) -> Result<ResolvedStream> {
        Ok(ResolvedStream::file(locator))
    }

    fn needs_secondary_fetch(&self, _provider: Option<&str>, _locator: &str) -> bool {
        false
    }
}

/// Parse search results from the search page.
pub fn parse_search(host: &str, html: &str) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let mut results = Vec::new();

    let Ok(item_selector) = Selector::parse("li.slide-item") else {
        return results;
    };
    let (Ok(title_selector), Ok(img_selector)) = (Selector::parse("h6"), Selector::parse("img")) else {
        return results;
    };

    for item in document.select(&item_selector) {
        let title = item
            .select(&title_selector)
            .next()
            .map(|el| element_text(&el))
            .unwrap_or_default();
        let Some(href) = extract_href(&item) else {
            continue;
        };
        if title.is_empty() {
            continue;
        }

        let poster = item
            .select(&img_selector)
            .next()
            .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
            .map(|src| normalize_url(host, src))
            .filter(|src| !src.is_empty());

        results.push(SearchResult {
            title,
            url: normalize_url(host, href),
            poster,
        });
    }

    results
}

fn extract_href<'a>(item: &ElementRef<'a>) -> Option<&'a str> {
    let selectors = ["a.hover-buttons", "a[href]"];
    for selector_str in &selectors {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(href) = item
                .select(&selector)
                .filter_map(|a| a.value().attr("href"))
                .find(|href| !href.trim().is_empty())
            {
                return Some(href);
            }
        }
    }
    None
}

/// Parse a title page into a project.
///
/// Series blocks become tracks; movie variants become episodes.
fn parse_page(host: &str, locator: &str, html: &str, serial: SerialKind) -> ProjectInfo {
    let document = Html::parse_document(html);
    let mut project = ProjectInfo::new(locator);

    if serial != SerialKind::Movie {
        let tracks = parse_series_blocks(host, &document, serial == SerialKind::Series);
        if !tracks.is_empty() {
            project.is_serial = Some(true);
            project.tracks = tracks;
            return project;
        }
    }

    if serial != SerialKind::Series {
        project.is_serial = Some(false);
        for (index, episode) in parse_movie_spans(host, &document).into_iter().enumerate() {
            let mut episode = episode;
            if episode.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
                episode.title = Some(format!("Варіант {}", index + 1));
            }
            project.add_episode(episode);
        }
    }

    project
}

/// Subtitle and dub tracks of a series page.
///
/// With `loose` set, bare episode spans outside the blocks count too.
fn parse_series_blocks(host: &str, document: &Html, loose: bool) -> Vec<RawTrack> {
    let mut subtitles = Vec::new();
    let mut dub = Vec::new();
    let mut found_blocks = false;

    if let (Ok(block_selector), Ok(header_selector)) =
        (Selector::parse("div.mt-4"), Selector::parse("h3.my-4"))
    {
        for block in document.select(&block_selector) {
            let episodes = parse_episode_spans(host, &block);
            if episodes.is_empty() {
                continue;
            }
            found_blocks = true;

            let header = block
                .select(&header_selector)
                .next()
                .map(|el| element_text(&el).to_lowercase())
                .unwrap_or_default();
            if header.contains(SUBTITLES_HEADER) {
                subtitles.extend(episodes);
            } else if header.contains(DUB_HEADER) {
                dub.extend(episodes);
            }
        }
    }

    if !found_blocks && !loose {
        return Vec::new();
    }

    let root = document.root_element();
    if subtitles.is_empty() && dub.is_empty() {
        dub.extend(parse_episode_spans(host, &root));
    }

    let mut tracks = Vec::new();
    if !subtitles.is_empty() {
        tracks.push(RawTrack {
            subtitles: true,
            ..RawTrack::single_season("Оригінал", subtitles)
        });
    }
    if !dub.is_empty() {
        tracks.push(RawTrack::single_season("Озвучення", dub));
    }
    tracks
}

fn parse_episode_spans(host: &str, scope: &ElementRef) -> Vec<EpisodeInfo> {
    let Ok(selector) = Selector::parse("span[data-file]") else {
        return Vec::new();
    };

    scope
        .select(&selector)
        .filter_map(|span| {
            let file = span.value().attr("data-file")?.trim();
            if file.is_empty() {
                return None;
            }
            let title = span
                .value()
                .attr("data-title")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| element_text(&span));
            let title = if title.is_empty() { "Episode".to_string() } else { title };

            Some(EpisodeInfo {
                number: first_number(&title),
                title: Some(title),
                locator: normalize_url(host, file),
                ..EpisodeInfo::default()
            })
        })
        .collect()
}

fn parse_movie_spans(host: &str, document: &Html) -> Vec<EpisodeInfo> {
    let Ok(selector) = Selector::parse("span.mr-3[data-file]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|span| {
            let file = span.value().attr("data-file")?.trim();
            if file.is_empty() {
                return None;
            }
            let title = span
                .value()
                .attr("data-title")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| element_text(&span));

            Some(EpisodeInfo {
                title: Some(title),
                locator: normalize_url(host, file),
                ..EpisodeInfo::default()
            })
        })
        .collect()
}
