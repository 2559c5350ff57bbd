//! Voice → season → episode hierarchy construction
//!
//! Raw tracks come from the site rules in upstream shape. The hierarchy is
//! built in two passes: pass one flattens every playable episode into a
//! record tagged with its track and season number, pass two groups the
//! records into [`VoiceInfo`] values. Nothing is mutated after construction.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDateTime;

use crate::parser::{infer_episode_number, parse_date, season_number};
use crate::types::{EpisodeInfo, RawTrack, VoiceInfo};

/// Display name used when a track has no name
pub const DEFAULT_VOICE_NAME: &str = "Озвучка";

/// Suffix appended to subtitle-only tracks
pub const SUBTITLES_SUFFIX: &str = " (Субтитри)";

/// Flat episode record produced by pass one
#[derive(Debug)]
struct EpisodeRecord {
    track: usize,
    season: u32,
    number: u32,
    date: Option<NaiveDateTime>,
    order: usize,
    episode: EpisodeInfo,
}

/// Normalized voice tree of one project
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hierarchy {
    voices: Vec<VoiceInfo>,
}

impl Hierarchy {
    /// Build the hierarchy from raw tracks.
    ///
    /// `default_name` replaces blank track names. Voices without a single
    /// playable episode are dropped.
    pub fn build(tracks: &[RawTrack], default_name: &str) -> Self {
        let records = flatten(tracks);

        let mut grouped: BTreeMap<usize, BTreeMap<u32, Vec<EpisodeRecord>>> = BTreeMap::new();
        for record in records {
            grouped
                .entry(record.track)
                .or_default()
                .entry(record.season)
                .or_default()
                .push(record);
        }

        let multi_provider = provider_count(tracks) > 1;
        let mut taken = HashSet::new();
        let mut voices = Vec::with_capacity(grouped.len());

        for (track_index, seasons) in grouped {
            let track = &tracks[track_index];
            let base = base_name(track, default_name, multi_provider);
            let display_name = unique_name(&base, &mut taken);

            let seasons = seasons
                .into_iter()
                .map(|(number, mut records)| {
                    records.sort_by(|a, b| {
                        (a.number, a.date, a.order).cmp(&(b.number, b.date, b.order))
                    });
                    let episodes = records.into_iter().map(|r| r.episode).collect();
                    (number, episodes)
                })
                .collect();

            voices.push(VoiceInfo {
                display_name,
                provider_name: track.provider.clone(),
                subtitles: track.subtitles,
                seasons,
            });
        }

        Self { voices }
    }

    /// All voices in upstream track order.
    pub fn voices(&self) -> &[VoiceInfo] {
        &self.voices
    }

    /// True when no voice has a playable episode.
    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Season numbers where any voice has a playable episode, ascending.
    pub fn season_numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self
            .voices
            .iter()
            .flat_map(|voice| voice.seasons.keys().copied())
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }

    /// Voices that have the given season.
    pub fn voices_for_season(&self, season: u32) -> Vec<&VoiceInfo> {
        self.voices
            .iter()
            .filter(|voice| voice.seasons.contains_key(&season))
            .collect()
    }

    /// Pick a voice and its episodes for a season.
    ///
    /// Without a voice name, or with one that does not match, the first
    /// voice for the season is used.
    pub fn select(&self, season: u32, voice: Option<&str>) -> Option<(&VoiceInfo, &[EpisodeInfo])> {
        let candidates = self.voices_for_season(season);
        let wanted = voice
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_lowercase);

        let chosen = wanted
            .and_then(|name| {
                candidates
                    .iter()
                    .find(|v| v.display_name.to_lowercase() == name)
                    .copied()
            })
            .or_else(|| candidates.first().copied())?;

        let episodes = chosen.seasons.get(&season)?;
        Some((chosen, episodes.as_slice()))
    }
}

/// Pass one: playable episodes tagged with track and season.
fn flatten(tracks: &[RawTrack]) -> Vec<EpisodeRecord> {
    let mut records = Vec::new();

    for (track_index, track) in tracks.iter().enumerate() {
        let mut used_seasons = HashSet::new();

        for (season_index, season) in track.seasons.iter().enumerate() {
            let playable: Vec<&EpisodeInfo> =
                season.episodes.iter().filter(|e| e.is_playable()).collect();
            if playable.is_empty() {
                continue;
            }

            let mut number = Some(season_number(season.number, season.title.as_deref(), season_index));
            while let Some(candidate) = number {
                if used_seasons.insert(candidate) {
                    break;
                }
                number = candidate.checked_add(1);
            }
            let Some(number) = number else {
                continue;
            };

            for (order, episode) in playable.into_iter().enumerate() {
                let episode_number = episode
                    .number
                    .or_else(|| episode.title.as_deref().and_then(infer_episode_number))
                    .unwrap_or_else(|| u32::try_from(order + 1).unwrap_or(u32::MAX));

                let mut episode = episode.clone();
                episode.number = Some(episode_number);

                records.push(EpisodeRecord {
                    track: track_index,
                    season: number,
                    number: episode_number,
                    date: episode.date.as_deref().and_then(parse_date),
                    order,
                    episode,
                });
            }
        }
    }

    records
}

/// Tracks carrying a provider name. Two teams on the same provider count twice.
fn provider_count(tracks: &[RawTrack]) -> usize {
    tracks
        .iter()
        .filter_map(|t| t.provider.as_deref())
        .filter(|p| !p.trim().is_empty())
        .count()
}

fn base_name(track: &RawTrack, default_name: &str, multi_provider: bool) -> String {
    let mut name = match track.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => default_name.to_string(),
    };
    if track.subtitles {
        name.push_str(SUBTITLES_SUFFIX);
    }
    if multi_provider {
        if let Some(provider) = track.provider.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            name = format!("[{}] {}", provider, name);
        }
    }
    name
}

/// Make `base` unique among `taken` by appending ` 2`, ` 3`…
fn unique_name(base: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.to_lowercase()) {
        return base.to_string();
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{} {}", base, suffix);
        if taken.insert(candidate.to_lowercase()) {
            return candidate;
        }
        suffix += 1;
    }
}
