//! Mikai rule set
//!
//! Anime JSON API. Each player team publishes one or more providers, every
//! provider carries its own episode list. Provider links point either at a
//! file or at an ashdi / moonanime player page.

use async_trait::async_trait;
use serde::Deserialize;

use super::{SiteContext, SiteDescriptor, SiteRules};
use crate::error::{OnlineError, Result};
use crate::parser::text::script_file_property;
use crate::resolver::MANAGED_REFERER;
use crate::types::{non_empty, EpisodeInfo, ProjectInfo, Query, RawSeason, RawTrack, ResolvedStream, SearchResult};

static DESCRIPTOR: SiteDescriptor = SiteDescriptor {
    name: "mikai",
    display_name: "Mikai",
    host: "https://mikai.me",
    api_host: Some("https://api.mikai.me/v1"),
    search_minutes: 10,
    project_minutes: 20,
    playlist_minutes: 20,
    auto_pick_first: true,
    season_listing: true,
    default_voice: "Озвучка",
};

/// Providers whose links are player pages
const PAGE_PROVIDERS: &[&str] = &["ASHDI", "MOONANIME"];
const MOONANIME_DOMAIN: &str = "moonanime.art";
const ASHDI_DOMAIN: &str = "ashdi.vip";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    result: Vec<AnimeItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetailResponse {
    result: Option<AnimeItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnimeItem {
    id: u64,
    year: Option<u32>,
    format: Option<String>,
    poster: Option<String>,
    details: Option<AnimeDetails>,
    players: Vec<PlayerItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnimeDetails {
    names: Option<AnimeNames>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnimeNames {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlayerItem {
    team: Option<TeamItem>,
    is_subs: bool,
    providers: Vec<ProviderItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TeamItem {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProviderItem {
    name: Option<String>,
    episodes: Vec<ProviderEpisode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProviderEpisode {
    number: i64,
    play_link: Option<String>,
}

impl AnimeItem {
    fn name(&self) -> Option<&str> {
        let name = self.details.as_ref()?.names.as_ref()?.name.as_deref();
        non_empty(name)
    }
}

/// Mikai rules
#[derive(Debug, Default, Clone, Copy)]
pub struct Mikai;

impl Mikai {
    pub fn new() -> Self {
        Self
    }
}

fn api_headers(host: &str) -> [(&str, &str); 3] {
    [
        ("User-Agent", "Mozilla/5.0"),
        ("Referer", host),
        ("Accept", "application/json"),
    ]
}

#[async_trait]
impl SiteRules for Mikai {
    fn descriptor(&self) -> &SiteDescriptor {
        &DESCRIPTOR
    }

    async fn search(&self, ctx: &SiteContext<'_>, query: &Query) -> Result<Vec<SearchResult>> {
        let candidates = [query.title.as_deref(), query.original_title.as_deref()];
        for text in candidates.into_iter().filter_map(non_empty) {
            let url = format!(
                "{}/anime/search?page=1&limit=24&sort=year&order=desc&name={}",
                ctx.config.api_root(),
                urlencoding::encode(text.trim())
            );
            let response: SearchResponse = match ctx.fetch_json(&url, &api_headers(ctx.host())).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Mikai search failed");
                    continue;
                }
            };

            let results = to_search_results(ctx.config.api_root(), response.result, query.year);
            if !results.is_empty() {
                return Ok(results);
            }
        }
        Ok(Vec::new())
    }

    async fn fetch_project(&self, ctx: &SiteContext<'_>, locator: &str, _query: &Query) -> Result<ProjectInfo> {
        let response: DetailResponse = ctx.fetch_json(locator, &api_headers(ctx.host())).await?;
        let anime = response
            .result
            .ok_or_else(|| OnlineError::NotFound(locator.to_string()))?;
        Ok(build_project(locator, anime))
    }

    async fn extract_stream_file(&self, ctx: &SiteContext<'_>, locator: &str) -> Result<ResolvedStream> {
        let lower = locator.to_lowercase();
        if lower.contains(MOONANIME_DOMAIN) {
            let url = with_player_param(locator);
            let html = ctx
                .fetch(&url, &[("User-Agent", "Mozilla/5.0"), ("Referer", ctx.host())])
                .await?;
            let file = moonanime_file(&html)
                .ok_or_else(|| OnlineError::ExtractionMiss(format!("moonanime file on {}", url)))?;
            return Ok(ResolvedStream::file(file));
        }

        if lower.contains(ASHDI_DOMAIN) {
            let html = ctx
                .fetch(locator, &[("User-Agent", "Mozilla/5.0"), ("Referer", MANAGED_REFERER)])
                .await?;
            let file = script_file_property(&html)
                .ok_or_else(|| OnlineError::ExtractionMiss(format!("ashdi file on {}", locator)))?;
            return Ok(ResolvedStream::file(file));
        }

        Ok(ResolvedStream::file(locator))
    }

    fn needs_secondary_fetch(&self, provider: Option<&str>, locator: &str) -> bool {
        if let Some(provider) = non_empty(provider) {
            if PAGE_PROVIDERS.iter().any(|p| provider.eq_ignore_ascii_case(p)) {
                return true;
            }
        }
        let lower = locator.to_lowercase();
        lower.contains(ASHDI_DOMAIN) || lower.contains(MOONANIME_DOMAIN)
    }
}

/// Year matches win when there are any; otherwise every hit is kept.
fn to_search_results(api_root: &str, items: Vec<AnimeItem>, year: Option<u32>) -> Vec<SearchResult> {
    let by_year: Vec<&AnimeItem> = match year.filter(|y| *y > 0) {
        Some(year) => items.iter().filter(|item| item.year == Some(year)).collect(),
        None => Vec::new(),
    };
    let chosen: Vec<&AnimeItem> = if by_year.is_empty() {
        items.iter().collect()
    } else {
        by_year
    };

    chosen
        .into_iter()
        .filter(|item| item.id > 0)
        .map(|item| SearchResult {
            title: item.name().unwrap_or_default().to_string(),
            url: format!("{}/anime/{}", api_root, item.id),
            poster: item.poster.clone(),
        })
        .collect()
}

fn build_project(locator: &str, anime: AnimeItem) -> ProjectInfo {
    let mut project = ProjectInfo::new(locator);
    project.title = anime.name().map(str::to_string);
    project.poster = anime.poster.clone();
    project.is_serial = anime
        .format
        .as_deref()
        .map(|format| !format.eq_ignore_ascii_case("movie"));

    for player in anime.players {
        let team = player
            .team
            .and_then(|team| team.name)
            .filter(|name| !name.trim().is_empty());

        for provider in player.providers {
            let mut episodes = provider.episodes;
            episodes.sort_by_key(|ep| ep.number);

            let mut fallback = 1u32;
            let episodes: Vec<EpisodeInfo> = episodes
                .into_iter()
                .filter_map(|ep| {
                    let link = ep.play_link.filter(|l| !l.trim().is_empty())?;
                    let number = match u32::try_from(ep.number) {
                        Ok(n) if n > 0 => n,
                        _ => {
                            fallback += 1;
                            fallback - 1
                        }
                    };
                    Some(EpisodeInfo {
                        title: Some(format!("Епізод {}", number)),
                        number: Some(number),
                        locator: link,
                        ..EpisodeInfo::default()
                    })
                })
                .collect();

            if episodes.is_empty() {
                continue;
            }

            project.tracks.push(RawTrack {
                name: team.clone(),
                provider: provider.name.filter(|n| !n.trim().is_empty()),
                subtitles: player.is_subs,
                seasons: vec![RawSeason {
                    number: Some(1),
                    episodes,
                    ..RawSeason::default()
                }],
            });
        }
    }
    project
}

fn with_player_param(url: &str) -> String {
    if url.to_lowercase().contains("player=") {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&player=mikai.me", url)
    } else {
        format!("{}?player=mikai.me", url)
    }
}

fn moonanime_file(html: &str) -> Option<String> {
    let re = regex_lite::Regex::new(r#"file:\s*"([^"]+\.m3u8)""#).ok()?;
    re.captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAILS: &str = r#"{
        "result": {
            "id": 42,
            "year": 2020,
            "format": "tv",
            "details": {"names": {"name": "Магічна битва"}},
            "players": [
                {
                    "team": {"name": "FanVoxUA"},
                    "isSubs": false,
                    "providers": [
                        {"name": "ASHDI", "episodes": [
                            {"number": 2, "playLink": "https://ashdi.vip/vod/2"},
                            {"number": 1, "playLink": "https://ashdi.vip/vod/1"},
                            {"number": 3, "playLink": ""}
                        ]},
                        {"name": "MOONANIME", "episodes": [
                            {"number": 0, "playLink": "https://moonanime.art/iframe/a"}
                        ]}
                    ]
                },
                {
                    "team": {"name": ""},
                    "isSubs": true,
                    "providers": [{"name": "CDN", "episodes": []}]
                }
            ]
        }
    }"#;

    #[test]
    fn test_build_project_from_details() {
        let response: DetailResponse = serde_json::from_str(DETAILS).unwrap();
        let project = build_project("https://api.mikai.me/v1/anime/42", response.result.unwrap());

        assert_eq!(project.title.as_deref(), Some("Магічна битва"));
        assert_eq!(project.is_serial, Some(true));
        assert_eq!(project.tracks.len(), 2);

        let ashdi = &project.tracks[0];
        assert_eq!(ashdi.name.as_deref(), Some("FanVoxUA"));
        assert_eq!(ashdi.provider.as_deref(), Some("ASHDI"));
        let episodes = &ashdi.seasons[0].episodes;
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].number, Some(1));
        assert_eq!(episodes[0].title.as_deref(), Some("Епізод 1"));

        let moon = &project.tracks[1];
        assert_eq!(moon.seasons[0].episodes[0].number, Some(1));
    }

    #[test]
    fn test_movie_format() {
        let anime = AnimeItem {
            format: Some("Movie".to_string()),
            ..AnimeItem::default()
        };
        assert_eq!(build_project("x", anime).is_serial, Some(false));
        assert_eq!(build_project("x", AnimeItem::default()).is_serial, None);
    }

    #[test]
    fn test_search_prefers_year_matches() {
        let body = r#"{"result": [
            {"id": 1, "year": 2019, "details": {"names": {"name": "A"}}},
            {"id": 2, "year": 2020, "details": {"names": {"name": "B"}}}
        ]}"#;
        let response: SearchResponse = serde_json::from_str(body).unwrap();
        let results = to_search_results("https://api", response.result, Some(2020));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://api/anime/2");
        assert_eq!(results[0].title, "B");
    }

    #[test]
    fn test_search_without_year_match_keeps_all() {
        let body = r#"{"result": [{"id": 1, "year": 2019}, {"id": 2, "year": 2018}]}"#;
        let response: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(to_search_results("https://api", response.result, Some(2020)).len(), 2);
    }

    #[test]
    fn test_with_player_param() {
        assert_eq!(with_player_param("https://m/a"), "https://m/a?player=mikai.me");
        assert_eq!(with_player_param("https://m/a?x=1"), "https://m/a?x=1&player=mikai.me");
        assert_eq!(with_player_param("https://m/a?player=x"), "https://m/a?player=x");
    }

    #[test]
    fn test_moonanime_file() {
        let html = r#"new Playerjs({id:"p", file: "https://cdn.moon/x/index.m3u8"});"#;
        assert_eq!(moonanime_file(html).as_deref(), Some("https://cdn.moon/x/index.m3u8"));
        assert_eq!(moonanime_file("file: \"https://cdn/x.mp4\""), None);
    }

    #[test]
    fn test_needs_secondary_fetch() {
        let rules = Mikai::new();
        assert!(rules.needs_secondary_fetch(Some("ashdi"), "https://cdn/x.m3u8"));
        assert!(rules.needs_secondary_fetch(None, "https://moonanime.art/iframe/1"));
        assert!(!rules.needs_secondary_fetch(Some("CDN"), "https://cdn/x.m3u8"));
    }
}
