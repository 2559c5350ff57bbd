//! AshdiBase rule set
//!
//! Looks titles up by IMDb or Kinopoisk id. The lookup API answers with a
//! player iframe; serial iframes embed the whole voice tree as a JSON array
//! inside the player script, movie iframes carry HLS sources directly.

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;

use super::{SiteContext, SiteDescriptor, SiteRules};
use crate::error::{OnlineError, Result};
use crate::parser::text::unescape_html;
use crate::parser::{extract_subtitles, QualityLabeler};
use crate::resolver::MANAGED_REFERER;
use crate::types::{
    EpisodeInfo, ProjectInfo, QualityStream, Query, RawSeason, RawTrack, ResolvedStream, SearchResult,
};

static DESCRIPTOR: SiteDescriptor = SiteDescriptor {
    name: "ashdi",
    display_name: "AshdiBase",
    host: "https://base.ashdi.vip",
    api_host: None,
    search_minutes: 20,
    project_minutes: 20,
    playlist_minutes: 20,
    auto_pick_first: true,
    season_listing: true,
    default_voice: "Ashdi",
};

const LOOKUP_PATH: &str = "/api/product/read_api.php";
const SERIAL_MARKER: &str = "ashdi.vip/serial/";
const DEFAULT_SOURCE_QUALITY: &str = "1080p";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VoiceNode {
    title: Option<String>,
    folder: Vec<SeasonNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeasonNode {
    title: Option<String>,
    folder: Vec<EpisodeNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EpisodeNode {
    title: Option<String>,
    file: Option<String>,
    poster: Option<String>,
    subtitle: Option<String>,
}

/// AshdiBase rules
#[derive(Debug, Default, Clone, Copy)]
pub struct AshdiBase;

impl AshdiBase {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SiteRules for AshdiBase {
    fn descriptor(&self) -> &SiteDescriptor {
        &DESCRIPTOR
    }

    async fn search(&self, ctx: &SiteContext<'_>, query: &Query) -> Result<Vec<SearchResult>> {
        let mut lookups = Vec::new();
        if let Some(imdb) = query.imdb_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            lookups.push(format!("{}{}?imdb={}", ctx.host(), LOOKUP_PATH, urlencoding::encode(imdb)));
        }
        if let Some(kinopoisk) = query.kinopoisk_id.filter(|id| *id > 0) {
            lookups.push(format!("{}{}?kinopoisk={}", ctx.host(), LOOKUP_PATH, kinopoisk));
        }

        let referer = format!("{}/", ctx.host());
        for url in lookups {
            let body = match ctx
                .fetch_wrapped(&url, &[("User-Agent", "Mozilla/5.0"), ("Referer", referer.as_str())])
                .await
            {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "AshdiBase lookup failed");
                    continue;
                }
            };

            if let Some(iframe) = extract_iframe_src(&body) {
                return Ok(vec![SearchResult {
                    title: query.display_title().unwrap_or_default().to_string(),
                    url: iframe,
                    poster: None,
                }]);
            }
        }
        Ok(Vec::new())
    }

    async fn fetch_project(&self, ctx: &SiteContext<'_>, locator: &str, query: &Query) -> Result<ProjectInfo> {
        let mut project = ProjectInfo::new(locator);
        project.title = query.display_title().map(str::to_string);

        if !locator.to_lowercase().contains(SERIAL_MARKER) {
            project.is_serial = Some(false);
            project.direct_hash = Some(locator.to_string());
            return Ok(project);
        }

        project.is_serial = Some(true);
        let url = serial_base_url(locator).unwrap_or_else(|| locator.to_string());
        let html = ctx
            .fetch(&url, &[("User-Agent", "Mozilla/5.0"), ("Referer", MANAGED_REFERER)])
            .await?;
        project.tracks = parse_serial_tree(&html)?;
        Ok(project)
    }

    async fn extract_stream_file(&self, ctx: &SiteContext<'_>, locator: &str) -> Result<ResolvedStream> {
        let html = ctx
            .fetch(locator, &[("User-Agent", "Mozilla/5.0"), ("Referer", MANAGED_REFERER)])
            .await?;
        let qualities = parse_sources(&html);
        let first = qualities
            .first()
            .map(|q| q.url.clone())
            .ok_or_else(|| OnlineError::ExtractionMiss(format!("m3u8 source on {}", locator)))?;

        Ok(ResolvedStream {
            file: first,
            qualities,
            subtitles: extract_subtitles(ctx.host(), &html),
            ..ResolvedStream::default()
        })
    }

    fn needs_secondary_fetch(&self, _provider: Option<&str>, locator: &str) -> bool {
        !locator.to_lowercase().contains(".m3u8")
    }
}

/// Iframe `src` from a lookup answer, which may be HTML-escaped.
fn extract_iframe_src(body: &str) -> Option<String> {
    let structural = Html::parse_fragment(body);
    let from_tag = Selector::parse("iframe[src]").ok().and_then(|selector| {
        structural
            .select(&selector)
            .find_map(|el| el.value().attr("src").map(str::trim).filter(|s| !s.is_empty()))
            .map(str::to_string)
    });

    let src = match from_tag {
        Some(src) => src,
        None => {
            let decoded = unescape_html(body);
            let patterns = [r#"(?i)<iframe[^>]+src=['"]([^'"]+)['"]"#, r#"(?i)src=['"]([^'"]+)['"]"#];
            patterns.iter().find_map(|pattern| {
                let re = regex_lite::Regex::new(pattern).ok()?;
                let value = re.captures(&decoded)?.get(1)?.as_str().trim().to_string();
                Some(value).filter(|v| !v.is_empty())
            })?
        }
    };

    if let Some(rest) = src.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }
    Some(src)
}

/// `https://ashdi.vip/serial/123?season=1` → `https://ashdi.vip/serial/123`
fn serial_base_url(url: &str) -> Option<String> {
    let re = regex_lite::Regex::new(r"https://ashdi\.vip/serial/\d+").ok()?;
    re.find(url).map(|m| m.as_str().to_string())
}

/// Voice tree from the player script's `file:'[…]'` array.
fn parse_serial_tree(html: &str) -> Result<Vec<RawTrack>> {
    let json = regex_lite::Regex::new(r"(?s)file:'(\[.+?\])'")
        .ok()
        .and_then(|re| re.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace("\\'", "'").replace("\\\"", "\""))
        .ok_or_else(|| OnlineError::ExtractionMiss("ashdi serial playlist".to_string()))?;

    let voices: Vec<VoiceNode> = serde_json::from_str(&json)?;
    let season_re = regex_lite::Regex::new(r"сезон\s+(\d+)").ok();

    let tracks = voices
        .into_iter()
        .filter_map(|voice| {
            let name = voice.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;
            let seasons = voice
                .folder
                .into_iter()
                .filter_map(|season| {
                    let title = season.title.unwrap_or_default();
                    let number = season_re
                        .as_ref()?
                        .captures(&title.to_lowercase())?
                        .get(1)?
                        .as_str()
                        .parse::<u32>()
                        .ok()?;
                    let episodes = season
                        .folder
                        .into_iter()
                        .enumerate()
                        .map(|(index, ep)| EpisodeInfo {
                            title: ep.title,
                            number: u32::try_from(index + 1).ok(),
                            locator: ep.file.unwrap_or_default(),
                            poster: ep.poster,
                            subtitle: ep.subtitle.filter(|s| !s.trim().is_empty()),
                            ..EpisodeInfo::default()
                        })
                        .collect();
                    Some(RawSeason {
                        title: Some(title),
                        number: Some(number),
                        episodes,
                    })
                })
                .collect();

            Some(RawTrack {
                name: Some(name),
                seasons,
                ..RawTrack::default()
            })
        })
        .collect();

    Ok(tracks)
}

/// `source` tags pointing at m3u8, else the first `file:` m3u8 in a script.
fn parse_sources(html: &str) -> Vec<QualityStream> {
    let document = Html::parse_document(html);
    let mut labeler = QualityLabeler::new();
    let mut qualities = Vec::new();

    if let Ok(selector) = Selector::parse(r#"source[src*=".m3u8"]"#) {
        for source in document.select(&selector) {
            let Some(src) = source.value().attr("src").map(str::trim).filter(|s| !s.is_empty()) else {
                continue;
            };
            let quality = source
                .value()
                .attr("label")
                .or_else(|| source.value().attr("res"))
                .unwrap_or(DEFAULT_SOURCE_QUALITY);
            qualities.push(QualityStream {
                url: src.to_string(),
                quality: labeler.label(quality),
            });
        }
    }

    if qualities.is_empty() {
        let file = regex_lite::Regex::new(r#"(?i)file\s*:\s*['"]([^'"]+\.m3u8[^'"]*)['"]"#)
            .ok()
            .and_then(|re| re.captures(html))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        if let Some(file) = file {
            qualities.push(QualityStream {
                url: file,
                quality: labeler.label(DEFAULT_SOURCE_QUALITY),
            });
        }
    }

    qualities
}
