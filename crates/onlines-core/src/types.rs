//! Data types for the adapter pipeline
//!
//! This module contains the normalized catalog model shared by every site:
//! search hits, projects, seasons, episodes, voices and resolved streams.
//! All types implement Serialize and Deserialize so they can be cached as
//! JSON and returned to a host unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Whether the caller asked for a movie or a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialKind {
    /// `serial=0`
    Movie,
    /// `serial=1`
    Series,
    /// `serial=-1` or absent, decided from upstream metadata
    #[default]
    Unknown,
}

impl SerialKind {
    /// Map the inbound `serial` flag (0, 1, -1).
    pub fn from_flag(flag: i32) -> Self {
        match flag {
            0 => SerialKind::Movie,
            1 => SerialKind::Series,
            _ => SerialKind::Unknown,
        }
    }

    /// The inbound flag value for this kind.
    pub fn flag(self) -> i32 {
        match self {
            SerialKind::Movie => 0,
            SerialKind::Series => 1,
            SerialKind::Unknown => -1,
        }
    }
}

/// Inbound query parameters, identical across sites
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    /// IMDb identifier (`tt…`)
    pub imdb_id: Option<String>,
    /// Kinopoisk identifier
    pub kinopoisk_id: Option<u64>,
    /// Localized title
    pub title: Option<String>,
    /// Original title
    pub original_title: Option<String>,
    /// Release year
    pub year: Option<u32>,
    /// Movie / series flag
    pub serial: SerialKind,
    /// Selected season number (`s`)
    pub season: Option<u32>,
    /// Selected voice display name (`t`)
    pub voice: Option<String>,
    /// Opaque locator that skips the search step
    pub href: Option<String>,
}

impl Query {
    /// Localized title, falling back to the original one.
    pub fn display_title(&self) -> Option<&str> {
        non_empty(self.title.as_deref()).or_else(|| non_empty(self.original_title.as_deref()))
    }
}

/// Candidate content item from a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Display title
    pub title: String,
    /// Opaque key used to fetch the project or playlist
    pub url: String,
    /// Poster image URL
    pub poster: Option<String>,
}

/// Season within a project, identified by its slug
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonInfo {
    /// Display-only title
    pub title: Option<String>,
    /// Stable identifier used to filter episodes
    pub slug: String,
}

/// One episode (or one movie source) with its playable locator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    /// Display title
    pub title: Option<String>,
    /// Episode number, inferred when absent
    pub number: Option<u32>,
    /// Playable locator: a URL or an upstream hash
    pub locator: String,
    /// Season slug this episode belongs to
    pub season_slug: Option<String>,
    /// Broadcast or upload date as sent by upstream
    pub date: Option<String>,
    /// Episode still
    pub poster: Option<String>,
    /// Raw subtitle reference
    pub subtitle: Option<String>,
}

impl EpisodeInfo {
    /// Episode carrying only a title and a locator.
    pub fn new(title: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            locator: locator.into(),
            ..Self::default()
        }
    }

    /// An episode is only surfaced when it has something to play.
    pub fn is_playable(&self) -> bool {
        !self.locator.trim().is_empty()
    }
}

/// Season of a raw track before normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSeason {
    /// Display title, also used for number inference
    pub title: Option<String>,
    /// Explicit season number
    pub number: Option<u32>,
    /// Episodes in upstream order
    pub episodes: Vec<EpisodeInfo>,
}

/// Dub, subtitle or provider track before normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrack {
    /// Team or track name
    pub name: Option<String>,
    /// Hosting provider (player) name
    pub provider: Option<String>,
    /// Subtitle-only track
    pub subtitles: bool,
    /// Seasons in upstream order
    pub seasons: Vec<RawSeason>,
}

impl RawTrack {
    /// Single-season track, the common shape for playlist sites.
    pub fn single_season(name: impl Into<String>, episodes: Vec<EpisodeInfo>) -> Self {
        Self {
            name: Some(name.into()),
            seasons: vec![RawSeason {
                number: Some(1),
                episodes,
                ..RawSeason::default()
            }],
            ..Self::default()
        }
    }
}

/// One resolved title (movie or series)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Locator the project was fetched from
    pub locator: String,
    /// Display title
    pub title: Option<String>,
    /// Poster image URL
    pub poster: Option<String>,
    /// Upstream hint: `Some(true)` for series, `Some(false)` for movies
    pub is_serial: Option<bool>,
    /// Seasons, unique by slug, in upstream order
    pub seasons: Vec<SeasonInfo>,
    /// Episodes of all seasons, or movie sources
    pub episodes: Vec<EpisodeInfo>,
    /// Locator playable as a whole (movies)
    pub direct_hash: Option<String>,
    /// Full voice tree when the detail call already returns it
    pub tracks: Vec<RawTrack>,
    /// Some upstream documents failed to load; the project is not cached
    #[serde(default)]
    pub partial: bool,
}

impl ProjectInfo {
    /// Empty project for a locator.
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            ..Self::default()
        }
    }

    /// Append a season unless its slug is blank or already present.
    pub fn add_season(&mut self, title: Option<String>, slug: Option<String>) -> bool {
        let Some(slug) = slug.filter(|s| !s.trim().is_empty()) else {
            return false;
        };
        if self.seasons.iter().any(|s| s.slug == slug) {
            return false;
        }
        self.seasons.push(SeasonInfo { title, slug });
        true
    }

    /// Append an episode unless the same locator is already in its season.
    pub fn add_episode(&mut self, episode: EpisodeInfo) -> bool {
        let duplicate = self
            .episodes
            .iter()
            .any(|e| e.season_slug == episode.season_slug && e.locator == episode.locator);
        if duplicate {
            return false;
        }
        self.episodes.push(episode);
        true
    }

    /// Episodes of one season, or all episodes when no slug is given.
    pub fn episodes_for_season(&self, slug: Option<&str>) -> Vec<&EpisodeInfo> {
        if self.seasons.is_empty() && slug.is_some() {
            return Vec::new();
        }
        self.episodes
            .iter()
            .filter(|e| slug.is_none() || e.season_slug.as_deref() == slug)
            .collect()
    }

    /// Seasons that do not have a single episode yet.
    pub fn seasons_without_episodes(&self) -> Vec<&SeasonInfo> {
        self.seasons
            .iter()
            .filter(|s| !self.episodes.iter().any(|e| e.season_slug.as_deref() == Some(&s.slug)))
            .collect()
    }

}

/// Dub or subtitle track after normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceInfo {
    /// Unique, non-empty name within one hierarchy
    pub display_name: String,
    /// Hosting provider, used to decide on secondary fetches
    pub provider_name: Option<String>,
    /// Subtitle-only track
    pub subtitles: bool,
    /// Season number to ordered playable episodes
    pub seasons: BTreeMap<u32, Vec<EpisodeInfo>>,
}

impl VoiceInfo {
    /// First playable episode of the lowest season.
    pub fn first_episode(&self) -> Option<&EpisodeInfo> {
        self.seasons.values().flat_map(|eps| eps.iter()).next()
    }
}

/// One alternate-quality rendition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityStream {
    /// Playable URL
    pub url: String,
    /// Unique label such as `720` or `720_2`
    pub quality: String,
}

/// Subtitle file attached to a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleInfo {
    /// Language label, `unknown` when upstream gives none
    pub lang: String,
    /// Subtitle file URL
    pub url: String,
}

/// Directly playable file, before routing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStream {
    /// Playable file URL
    pub file: String,
    /// Alternate renditions, ordered as upstream lists them
    pub qualities: Vec<QualityStream>,
    /// Poster image URL
    pub poster: Option<String>,
    /// Upstream display name
    pub name: Option<String>,
    /// Subtitles found on the player page
    pub subtitles: Vec<SubtitleInfo>,
}

impl ResolvedStream {
    /// Stream made of a single file.
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }
}

/// Terminal artifact returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResult {
    /// Routed URL to play
    pub primary_url: String,
    /// Routed alternate renditions
    pub alternate_qualities: Vec<QualityStream>,
    /// Poster image URL
    pub poster_url: Option<String>,
    /// Title to show in the player
    pub display_name: Option<String>,
    /// Subtitles
    pub subtitles: Vec<SubtitleInfo>,
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
