//! Extraction helpers shared by every site rule set
//!
//! This module contains pure helpers for pulling data out of upstream pages:
//! - `text`: text cleanup, URL normalization, player file and subtitle chains
//! - `episodes`: episode/season number inference and date ordering
//! - `quality`: quality labels and multi-bitrate URL expansion

pub mod episodes;
pub mod quality;
pub mod text;

// Re-export main helpers
pub use episodes::{first_number, infer_episode_number, parse_date, season_number};
pub use quality::{detect_quality, parse_multi_hls, QualityLabeler};
pub use text::{
    clean_text, extract_player_file, extract_subtitles, first_success, normalize_url, parse_subtitles,
};
