//! StarLight (teleportal) rule set
//!
//! JSON catalog: a live-search endpoint, project documents with seasons and
//! a season gallery, per-season documents for seasons the project document
//! leaves empty, and a player API that turns an episode hash into HLS.

use async_trait::async_trait;
use serde::Deserialize;

use super::{SiteContext, SiteDescriptor, SiteRules};
use crate::error::{OnlineError, Result};
use crate::parser::parse_multi_hls;
use crate::types::{
    non_empty, EpisodeInfo, ProjectInfo, Query, RawSeason, RawTrack, ResolvedStream, SearchResult,
};

/// Referer the player API expects
const PLAYER_REFERER: &str = "https://teleportal.ua/";

/// Catalog language segment
const LANGUAGE: &str = "ua";

static DESCRIPTOR: SiteDescriptor = SiteDescriptor {
    name: "starlight",
    display_name: "StarLight",
    host: "https://tp-back.starlight.digital",
    api_host: Some("https://vcms-api2.starlight.digital/player-api"),
    search_minutes: 15,
    project_minutes: 10,
    playlist_minutes: 10,
    auto_pick_first: false,
    season_listing: true,
    default_voice: "StarLight",
};

/// Live-search hit
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LiveSearchItem {
    title: Option<String>,
    type_slug: Option<String>,
    channel_slug: Option<String>,
    project_slug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectDocument {
    title: Option<String>,
    image: Option<String>,
    hash: Option<String>,
    seasons: Vec<SeasonItem>,
    seasons_gallery: Vec<SeasonItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SeasonItem {
    title: Option<String>,
    season_slug: Option<String>,
    items: Vec<EpisodeItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EpisodeItem {
    title: Option<String>,
    hash: Option<String>,
    date_of_broadcast: Option<String>,
    time_upload_video: Option<String>,
    /// Episode number as a string
    series_title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeasonDocument {
    items: Vec<EpisodeItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlayerDocument {
    video: Vec<PlayerVideo>,
    poster: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlayerVideo {
    media_hls_no_adv: Option<String>,
    media_hls: Option<String>,
    media: Vec<PlayerMedia>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlayerMedia {
    url: Option<String>,
}

/// StarLight rules
#[derive(Debug, Default, Clone, Copy)]
pub struct StarLight;

impl StarLight {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SiteRules for StarLight {
    fn descriptor(&self) -> &SiteDescriptor {
        &DESCRIPTOR
    }

    async fn search(&self, ctx: &SiteContext<'_>, query: &Query) -> Result<Vec<SearchResult>> {
        let Some(text) = query.display_title() else {
            return Ok(Vec::new());
        };

        let url = format!(
            "{}/{}/live-search?q={}",
            ctx.host(),
            LANGUAGE,
            urlencoding::encode(text)
        );
        let body = ctx
            .fetch(&url, &[("User-Agent", "Mozilla/5.0"), ("Referer", ctx.host())])
            .await?;
        parse_search(ctx.host(), &body)
    }

    async fn fetch_project(&self, ctx: &SiteContext<'_>, locator: &str, _query: &Query) -> Result<ProjectInfo> {
        let headers = [("User-Agent", "Mozilla/5.0"), ("Referer", ctx.host())];
        let body = ctx.fetch(locator, &headers).await?;
        let mut project = parse_project(ctx.host(), locator, &body)?;

        let missing: Vec<String> = project
            .seasons_without_episodes()
            .into_iter()
            .map(|season| season.slug.clone())
            .collect();

        for slug in missing {
            let season_url = format!("{}/{}", locator.trim_end_matches('/'), slug);
            let loaded = match ctx.fetch(&season_url, &headers).await {
                Ok(body) => add_season_episodes(&mut project, &slug, &body),
                Err(e) => Err(e),
            };
            if let Err(e) = loaded {
                tracing::warn!(url = %season_url, error = %e, "StarLight season unavailable");
                project.partial = true;
            }
        }

        Ok(project)
    }

    async fn fetch_playlist(&self, _ctx: &SiteContext<'_>, project: &ProjectInfo) -> Result<Vec<RawTrack>> {
        Ok(vec![build_track(project)])
    }

    async fn extract_stream_file(&self, ctx: &SiteContext<'_>, locator: &str) -> Result<ResolvedStream> {
        let url = format!(
            "{}/{}?referer={}&lang={}",
            ctx.config.api_root(),
            locator,
            urlencoding::encode(PLAYER_REFERER),
            LANGUAGE
        );
        let body = ctx
            .fetch(&url, &[("User-Agent", "Mozilla/5.0"), ("Referer", PLAYER_REFERER)])
            .await?;
        parse_player(&body)
    }

    /// Every StarLight locator is an episode hash.
    fn needs_secondary_fetch(&self, _provider: Option<&str>, _locator: &str) -> bool {
        true
    }
}

fn parse_search(host: &str, body: &str) -> Result<Vec<SearchResult>> {
    let items: Vec<LiveSearchItem> = serde_json::from_str(body)?;

    Ok(items
        .into_iter()
        .filter_map(|item| {
            let type_slug = non_empty(item.type_slug.as_deref())?;
            let channel_slug = non_empty(item.channel_slug.as_deref())?;
            let project_slug = non_empty(item.project_slug.as_deref())?;
            Some(SearchResult {
                title: item.title.clone().unwrap_or_default(),
                url: format!("{}/{}/{}/{}/{}", host, LANGUAGE, type_slug, channel_slug, project_slug),
                poster: None,
            })
        })
        .collect())
}

fn parse_project(host: &str, locator: &str, body: &str) -> Result<ProjectInfo> {
    let document: ProjectDocument = serde_json::from_str(body)?;

    let mut project = ProjectInfo::new(locator);
    project.title = document.title;
    project.poster = non_empty(document.image.as_deref()).map(|image| normalize_image(host, image));
    project.direct_hash = non_empty(document.hash.as_deref()).map(str::to_string);

    for season in &document.seasons {
        project.add_season(season.title.clone(), season.season_slug.clone());
    }

    for season in document.seasons_gallery {
        project.add_season(season.title.clone(), season.season_slug.clone());
        for item in season.items {
            if let Some(episode) = to_episode(item, season.season_slug.as_deref()) {
                project.add_episode(episode);
            }
        }
    }

    Ok(project)
}

fn add_season_episodes(project: &mut ProjectInfo, slug: &str, body: &str) -> Result<()> {
    let document: SeasonDocument = serde_json::from_str(body)?;
    for item in document.items {
        if let Some(episode) = to_episode(item, Some(slug)) {
            project.add_episode(episode);
        }
    }
    Ok(())
}

fn to_episode(item: EpisodeItem, season_slug: Option<&str>) -> Option<EpisodeInfo> {
    let hash = non_empty(item.hash.as_deref())?.to_string();
    Some(EpisodeInfo {
        title: item.title,
        number: item.series_title.as_deref().and_then(|n| n.trim().parse().ok()),
        locator: hash,
        season_slug: season_slug.map(str::to_string),
        date: item.date_of_broadcast.or(item.time_upload_video),
        ..EpisodeInfo::default()
    })
}

/// Single track holding every season of the project.
fn build_track(project: &ProjectInfo) -> RawTrack {
    let seasons = if project.seasons.is_empty() {
        vec![RawSeason {
            number: Some(1),
            episodes: project.episodes.clone(),
            ..RawSeason::default()
        }]
    } else {
        project
            .seasons
            .iter()
            .map(|season| RawSeason {
                title: season.title.clone(),
                number: None,
                episodes: project
                    .episodes_for_season(Some(&season.slug))
                    .into_iter()
                    .cloned()
                    .collect(),
            })
            .collect()
    };

    RawTrack {
        name: Some(DESCRIPTOR.default_voice.to_string()),
        seasons,
        ..RawTrack::default()
    }
}

fn parse_player(body: &str) -> Result<ResolvedStream> {
    let document: PlayerDocument = serde_json::from_str(body)?;

    let stream = document
        .video
        .into_iter()
        .next()
        .and_then(|video| {
            non_empty(video.media_hls_no_adv.as_deref())
                .or_else(|| non_empty(video.media_hls.as_deref()))
                .map(str::to_string)
                .or_else(|| video.media.into_iter().next().and_then(|m| m.url))
        })
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| OnlineError::ExtractionMiss("StarLight player stream".to_string()))?;

    let qualities = parse_multi_hls(&stream).unwrap_or_default();
    let file = qualities.first().map(|q| q.url.clone()).unwrap_or(stream);

    Ok(ResolvedStream {
        file,
        qualities,
        poster: document.poster,
        name: document.name,
        subtitles: Vec::new(),
    })
}

fn normalize_image(host: &str, path: &str) -> String {
    if path.to_lowercase().starts_with("http") {
        path.to_string()
    } else {
        format!("{}{}", host, path)
    }
}
