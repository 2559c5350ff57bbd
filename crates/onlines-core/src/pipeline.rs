//! Generic adapter pipeline
//!
//! One [`Adapter`] per upstream site drives the shared stages: search,
//! project fetch, voice tree normalization, caching and stream resolution.
//! Site specifics come from a [`SiteRules`] implementation.
//!
//! Every failure stops here. Errors are logged and the caller sees
//! [`Outcome::Unavailable`] (or `None` from [`Adapter::play`]).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{cache_key, TieredCache, TtlPolicy};
use crate::client::{HttpClient, ProxyProvider, ProxyRotation};
use crate::config::{AdapterConfig, HostSettings};
use crate::error::Result;
use crate::normalizer::Hierarchy;
use crate::parser::parse_subtitles;
use crate::resolver::{DirectStream, ResolveState, StreamProxy, StreamResolver};
use crate::sites::{SiteContext, SiteDescriptor, SiteRules};
use crate::types::{
    non_empty, EpisodeInfo, ProjectInfo, Query, RawTrack, SearchResult, SerialKind, StreamResult,
    SubtitleInfo,
};

/// How an entry is played
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "url")]
pub enum PlayLink {
    /// Routed URL, ready to play
    #[serde(rename = "play")]
    Direct(String),
    /// Locator to pass to [`Adapter::play`]
    #[serde(rename = "call")]
    Call(String),
}

impl PlayLink {
    pub fn url(&self) -> &str {
        match self {
            PlayLink::Direct(url) | PlayLink::Call(url) => url,
        }
    }
}

/// One season in a season listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonEntry {
    /// Value for the `s` parameter
    pub number: u32,
    pub title: String,
}

/// One voice choice next to an episode listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceEntry {
    /// Value for the `t` parameter
    pub name: String,
    /// The voice whose episodes are listed
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeEntry {
    pub title: String,
    pub season: u32,
    pub number: u32,
    pub link: PlayLink,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtitles: Vec<SubtitleInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieEntry {
    /// Voice or source name
    pub name: String,
    pub link: PlayLink,
}

/// Result of one catalog request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Outcome {
    /// The adapter is switched off in the config
    Disabled,
    /// Nothing playable for this query
    Unavailable,
    /// Several candidates; the caller picks one and retries with `href`
    Similar(Vec<SearchResult>),
    /// Season listing for a series
    Seasons(Vec<SeasonEntry>),
    /// Episodes of one season for the selected voice
    Episodes {
        voices: Vec<VoiceEntry>,
        season: u32,
        episodes: Vec<EpisodeEntry>,
    },
    /// Playable movie sources
    Movie(Vec<MovieEntry>),
}

/// Site pipeline
///
/// # Example
/// ```no_run
/// use onlines_core::pipeline::{Adapter, Outcome};
/// use onlines_core::sites::UAKino;
/// use onlines_core::types::Query;
///
/// # async fn example() -> Result<(), onlines_core::OnlineError> {
/// let adapter = Adapter::with_defaults(UAKino::new())?;
/// let query = Query {
///     title: Some("Шерлок".to_string()),
///     ..Query::default()
/// };
/// if let Outcome::Similar(results) = adapter.index(&query).await {
///     println!("{} candidates", results.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Adapter<R: SiteRules> {
    rules: R,
    config: AdapterConfig,
    mode: HostSettings,
    cache: Arc<TieredCache>,
    client: Arc<HttpClient>,
    proxies: Arc<dyn ProxyProvider>,
    stream_proxy: Arc<dyn StreamProxy>,
}

impl<R: SiteRules> Adapter<R> {
    /// Create an adapter sharing a cache and a client with its siblings.
    ///
    /// Outbound proxies rotate over `config.proxy`; streams are delivered
    /// directly until a stream proxy is set.
    pub fn new(
        rules: R,
        config: AdapterConfig,
        mode: HostSettings,
        cache: Arc<TieredCache>,
        client: Arc<HttpClient>,
    ) -> Self {
        let proxies = Arc::new(ProxyRotation::from_settings(&config.proxy));
        Self {
            rules,
            config,
            mode,
            cache,
            client,
            proxies,
            stream_proxy: Arc::new(DirectStream),
        }
    }

    /// Standalone adapter with the site's default config in home mode.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_defaults(rules: R) -> Result<Self> {
        let config = rules.descriptor().default_config();
        Ok(Self::new(
            rules,
            config,
            HostSettings::default(),
            Arc::new(TieredCache::new()),
            Arc::new(HttpClient::new()?),
        ))
    }

    /// Replace the outbound proxy provider.
    pub fn with_proxy_provider(mut self, proxies: Arc<dyn ProxyProvider>) -> Self {
        self.proxies = proxies;
        self
    }

    /// Replace the reverse-stream proxy.
    pub fn with_stream_proxy(mut self, stream_proxy: Arc<dyn StreamProxy>) -> Self {
        self.stream_proxy = stream_proxy;
        self
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &SiteDescriptor {
        self.rules.descriptor()
    }

    /// Catalog request: search, project, then seasons, episodes or movie
    /// sources.
    pub async fn index(&self, query: &Query) -> Outcome {
        if !self.config.enabled {
            return Outcome::Disabled;
        }

        match self.try_index(query).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    adapter = %self.config.name,
                    title = query.display_title().unwrap_or_default(),
                    href = query.href.as_deref().unwrap_or_default(),
                    error = %e,
                    "Index failed"
                );
                Outcome::Unavailable
            }
        }
    }

    /// Resolve a deferred locator into a routed stream.
    pub async fn play(&self, locator: &str, provider: Option<&str>, title: Option<&str>) -> Option<StreamResult> {
        if !self.config.enabled {
            return None;
        }

        let ctx = self.context();
        let resolver = StreamResolver::new(&self.config, self.stream_proxy.as_ref());
        match resolver.resolve(&self.rules, &ctx, locator, provider, title).await {
            ResolveState::Wrapped(result) => Some(result),
            ResolveState::Failed(e) => {
                tracing::warn!(adapter = %self.config.name, locator, error = %e, "Play failed");
                None
            }
            _ => None,
        }
    }

    fn context(&self) -> SiteContext<'_> {
        SiteContext::new(&self.client, self.proxies.as_ref(), &self.config)
    }

    fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            mode: self.mode,
            cache_time: self.config.cache_time,
            premium: self.config.premium_cache,
        }
    }

    async fn try_index(&self, query: &Query) -> Result<Outcome> {
        let ctx = self.context();

        let locator = match non_empty(query.href.as_deref()) {
            Some(href) => href.trim().to_string(),
            None => {
                let results = self.search(&ctx, query).await?;
                if results.is_empty() {
                    return Ok(Outcome::Unavailable);
                }
                if results.len() > 1 && !self.descriptor().auto_pick_first {
                    return Ok(Outcome::Similar(results));
                }
                results[0].url.clone()
            }
        };

        let project = self.project(&ctx, &locator, query).await?;
        let is_serial = match query.serial {
            SerialKind::Series => true,
            SerialKind::Movie => false,
            SerialKind::Unknown => project.is_serial.unwrap_or(!project.seasons.is_empty()),
        };

        if is_serial {
            let tracks = self.playlist(&ctx, &project).await?;
            let hierarchy = Hierarchy::build(&tracks, self.descriptor().default_voice);
            if !hierarchy.is_empty() {
                return Ok(self.series_outcome(query, &hierarchy));
            }
            tracing::debug!(adapter = %self.config.name, locator = %locator, "Empty series tree, trying movie path");
            return Ok(self.movie_outcome(&project, Some(&hierarchy)));
        }

        if project_movie_entries(&project).is_empty() {
            let tracks = self.playlist(&ctx, &project).await?;
            let hierarchy = Hierarchy::build(&tracks, self.descriptor().default_voice);
            return Ok(self.movie_outcome(&project, Some(&hierarchy)));
        }
        Ok(self.movie_outcome(&project, None))
    }

    async fn search(&self, ctx: &SiteContext<'_>, query: &Query) -> Result<Vec<SearchResult>> {
        let year = query.year.map(|y| y.to_string()).unwrap_or_default();
        let serial = query.serial.flag().to_string();
        let kinopoisk = query.kinopoisk_id.map(|id| id.to_string()).unwrap_or_default();
        let key = cache_key(
            &self.config.name,
            "search",
            &[
                query.title.as_deref().unwrap_or_default(),
                query.original_title.as_deref().unwrap_or_default(),
                &year,
                &serial,
                query.imdb_id.as_deref().unwrap_or_default(),
                &kinopoisk,
            ],
        );
        let ttl = self.ttl_policy().ttl(self.descriptor().search_minutes);

        self.cache
            .get_or_fetch(&key, ttl, || self.rules.search(ctx, query), |results: &Vec<SearchResult>| {
                !results.is_empty()
            })
            .await
    }

    async fn project(&self, ctx: &SiteContext<'_>, locator: &str, query: &Query) -> Result<ProjectInfo> {
        let serial = query.serial.flag().to_string();
        let key = cache_key(&self.config.name, "project", &[locator, &serial]);
        let ttl = self.ttl_policy().ttl(self.descriptor().project_minutes);

        self.cache
            .get_or_fetch(
                &key,
                ttl,
                || async {
                    tracing::info!(adapter = %self.config.name, locator, "Fetching project");
                    self.rules.fetch_project(ctx, locator, query).await
                },
                |project: &ProjectInfo| !project.partial,
            )
            .await
    }

    async fn playlist(&self, ctx: &SiteContext<'_>, project: &ProjectInfo) -> Result<Vec<RawTrack>> {
        let key = cache_key(&self.config.name, "playlist", &[&project.locator]);
        let ttl = self.ttl_policy().ttl(self.descriptor().playlist_minutes);

        self.cache
            .get_or_fetch(&key, ttl, || self.rules.fetch_playlist(ctx, project), |tracks: &Vec<RawTrack>| {
                !project.partial && !tracks.is_empty()
            })
            .await
    }

    fn series_outcome(&self, query: &Query, hierarchy: &Hierarchy) -> Outcome {
        let seasons = hierarchy.season_numbers();
        let season = match query.season {
            Some(season) => season,
            None if self.descriptor().season_listing => {
                return Outcome::Seasons(
                    seasons
                        .into_iter()
                        .map(|number| SeasonEntry {
                            number,
                            title: format!("Сезон {}", number),
                        })
                        .collect(),
                );
            }
            None => match seasons.first() {
                Some(first) => *first,
                None => return Outcome::Unavailable,
            },
        };

        let Some((voice, episodes)) = hierarchy.select(season, query.voice.as_deref()) else {
            return Outcome::Unavailable;
        };

        let voices = hierarchy
            .voices_for_season(season)
            .into_iter()
            .map(|v| VoiceEntry {
                name: v.display_name.clone(),
                selected: v.display_name == voice.display_name,
            })
            .collect();

        let episodes: Vec<EpisodeEntry> = episodes
            .iter()
            .filter(|ep| ep.is_playable())
            .enumerate()
            .map(|(index, ep)| {
                let number = ep.number.unwrap_or_else(|| position(index));
                EpisodeEntry {
                    title: episode_title(ep, number),
                    season,
                    number,
                    link: self.link(voice.provider_name.as_deref(), &ep.locator),
                    poster: non_empty(ep.poster.as_deref()).map(str::to_string),
                    subtitles: ep
                        .subtitle
                        .as_deref()
                        .map(|raw| parse_subtitles(&self.config.host, raw))
                        .unwrap_or_default(),
                }
            })
            .collect();

        if episodes.is_empty() {
            return Outcome::Unavailable;
        }
        Outcome::Episodes {
            voices,
            season,
            episodes,
        }
    }

    /// Project-level sources first, else the first episode of every voice.
    fn movie_outcome(&self, project: &ProjectInfo, hierarchy: Option<&Hierarchy>) -> Outcome {
        let mut entries: Vec<MovieEntry> = project_movie_entries(project)
            .into_iter()
            .map(|(name, locator)| MovieEntry {
                name,
                link: self.link(None, locator),
            })
            .collect();

        if entries.is_empty() {
            if let Some(hierarchy) = hierarchy {
                entries = hierarchy
                    .voices()
                    .iter()
                    .filter_map(|voice| {
                        let episode = voice.first_episode()?;
                        Some(MovieEntry {
                            name: voice.display_name.clone(),
                            link: self.link(voice.provider_name.as_deref(), &episode.locator),
                        })
                    })
                    .collect();
            }
        }

        if entries.is_empty() {
            Outcome::Unavailable
        } else {
            Outcome::Movie(entries)
        }
    }

    fn link(&self, provider: Option<&str>, locator: &str) -> PlayLink {
        if self.rules.needs_secondary_fetch(provider, locator) {
            return PlayLink::Call(locator.to_string());
        }
        let resolver = StreamResolver::new(&self.config, self.stream_proxy.as_ref());
        PlayLink::Direct(resolver.route(locator).into_url())
    }
}

/// `(name, locator)` pairs playable straight from the project.
fn project_movie_entries(project: &ProjectInfo) -> Vec<(String, &str)> {
    let title = non_empty(project.title.as_deref()).unwrap_or("Фільм").to_string();
    if let Some(hash) = non_empty(project.direct_hash.as_deref()) {
        return vec![(title, hash.trim())];
    }

    project
        .episodes
        .iter()
        .filter(|ep| ep.is_playable())
        .enumerate()
        .map(|(index, ep)| {
            let name = non_empty(ep.title.as_deref())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} {}", title, position(index)));
            (name, ep.locator.as_str())
        })
        .collect()
}

fn episode_title(episode: &EpisodeInfo, number: u32) -> String {
    non_empty(episode.title.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Епізод {}", number))
}

fn position(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::{Bamboo, Mikai, StarLight};
    use crate::types::RawSeason;

    fn adapter<R: SiteRules>(rules: R) -> Adapter<R> {
        Adapter::with_defaults(rules).unwrap()
    }

    fn track(name: &str, seasons: &[(u32, &[&str])]) -> RawTrack {
        RawTrack {
            name: Some(name.to_string()),
            seasons: seasons
                .iter()
                .map(|(number, locators)| RawSeason {
                    number: Some(*number),
                    episodes: locators
                        .iter()
                        .map(|l| EpisodeInfo::new(format!("Серія {}", l), *l))
                        .collect(),
                    ..RawSeason::default()
                })
                .collect(),
            ..RawTrack::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_adapter() {
        let mut adapter = adapter(Bamboo::new());
        adapter.config.enabled = false;
        assert_eq!(adapter.index(&Query::default()).await, Outcome::Disabled);
        assert!(adapter.play("https://cdn/x.m3u8", None, None).await.is_none());
    }

    #[test]
    fn test_series_outcome_lists_seasons() {
        let adapter = adapter(StarLight::new());
        let hierarchy = Hierarchy::build(&[track("A", &[(2, &["h3"]), (1, &["h1"])])], "StarLight");

        match adapter.series_outcome(&Query::default(), &hierarchy) {
            Outcome::Seasons(seasons) => {
                assert_eq!(seasons.iter().map(|s| s.number).collect::<Vec<_>>(), vec![1, 2]);
                assert_eq!(seasons[0].title, "Сезон 1");
            }
            other => panic!("Expected Seasons, got {:?}", other),
        }
    }

    #[test]
    fn test_series_outcome_first_season_without_listing() {
        let adapter = adapter(Bamboo::new());
        let hierarchy = Hierarchy::build(&[track("A", &[(1, &["https://cdn/1.m3u8"])])], "Озвучення");

        match adapter.series_outcome(&Query::default(), &hierarchy) {
            Outcome::Episodes { season, episodes, .. } => {
                assert_eq!(season, 1);
                assert_eq!(episodes.len(), 1);
                assert_eq!(episodes[0].link, PlayLink::Direct("https://cdn/1.m3u8".to_string()));
            }
            other => panic!("Expected Episodes, got {:?}", other),
        }
    }

    #[test]
    fn test_series_outcome_selects_voice() {
        let adapter = adapter(StarLight::new());
        let hierarchy = Hierarchy::build(
            &[track("A", &[(1, &["a1"])]), track("B", &[(1, &["b1", "b2"])])],
            "StarLight",
        );
        let query = Query {
            season: Some(1),
            voice: Some("b".to_string()),
            ..Query::default()
        };

        match adapter.series_outcome(&query, &hierarchy) {
            Outcome::Episodes { voices, episodes, .. } => {
                assert_eq!(voices.len(), 2);
                assert!(!voices[0].selected);
                assert!(voices[1].selected);
                assert_eq!(episodes.len(), 2);
                assert_eq!(episodes[0].link, PlayLink::Call("b1".to_string()));
            }
            other => panic!("Expected Episodes, got {:?}", other),
        }
    }

    #[test]
    fn test_series_outcome_unknown_season_is_unavailable() {
        let adapter = adapter(StarLight::new());
        let hierarchy = Hierarchy::build(&[track("A", &[(1, &["a1"])])], "StarLight");
        let query = Query {
            season: Some(5),
            ..Query::default()
        };
        assert_eq!(adapter.series_outcome(&query, &hierarchy), Outcome::Unavailable);
    }

    #[test]
    fn test_movie_outcome_prefers_direct_hash() {
        let adapter = adapter(Bamboo::new());
        let mut project = ProjectInfo::new("https://bambooua.com/x");
        project.title = Some("Фільм X".to_string());
        project.direct_hash = Some("https://cdn/movie.m3u8".to_string());
        project.episodes.push(EpisodeInfo::new("Варіант 1", "https://cdn/other.m3u8"));

        match adapter.movie_outcome(&project, None) {
            Outcome::Movie(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].name, "Фільм X");
                assert_eq!(entries[0].link.url(), "https://cdn/movie.m3u8");
            }
            other => panic!("Expected Movie, got {:?}", other),
        }
    }

    #[test]
    fn test_movie_outcome_first_episode_per_voice() {
        let adapter = adapter(Mikai::new());
        let project = ProjectInfo::new("https://api.mikai.me/v1/anime/1");
        let mut ashdi = track("Team", &[(1, &["https://ashdi.vip/vod/2", "https://ashdi.vip/vod/3"])]);
        ashdi.provider = Some("ASHDI".to_string());
        let hierarchy = Hierarchy::build(&[ashdi], "Озвучка");

        match adapter.movie_outcome(&project, Some(&hierarchy)) {
            Outcome::Movie(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].name, "Team");
                assert_eq!(entries[0].link, PlayLink::Call("https://ashdi.vip/vod/2".to_string()));
            }
            other => panic!("Expected Movie, got {:?}", other),
        }
    }

    #[test]
    fn test_movie_outcome_empty_is_unavailable() {
        let adapter = adapter(Bamboo::new());
        let project = ProjectInfo::new("https://bambooua.com/x");
        assert_eq!(adapter.movie_outcome(&project, None), Outcome::Unavailable);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = Outcome::Movie(vec![MovieEntry {
            name: "Дубляж".to_string(),
            link: PlayLink::Call("https://ashdi.vip/vod/1".to_string()),
        }]);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["type"], "movie");
        assert_eq!(json["data"][0]["link"]["method"], "call");
        assert_eq!(json["data"][0]["link"]["url"], "https://ashdi.vip/vod/1");

        let json = serde_json::to_value(Outcome::Unavailable).unwrap();
        assert_eq!(json["type"], "unavailable");
    }

    #[test]
    fn test_ttl_policy_from_config() {
        let mut adapter = adapter(Bamboo::new());
        adapter.mode = HostSettings {
            constrained: false,
            shared: true,
        };
        adapter.config.cache_time = 7;
        assert_eq!(adapter.ttl_policy().minutes(20), 7);
        assert_eq!(adapter.ttl_policy().minutes(5), 5);
    }
}
