//! Episode and season number inference
//!
//! Upstream titles rarely carry a clean number. These helpers recover one
//! from the title text, and parse broadcast dates for ordering.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Ordinal markers that follow the episode number in a title
pub const EPISODE_MARKERS: &[&str] = &["випуск", "серия", "серія"];

/// Infer an episode number from a title.
///
/// For each marker in turn, takes the right-most digit run before it, so in
/// `"12 сезон 5 випуск"` the season number 12 is skipped and 5 is returned.
/// A marker at the very start of the title is ignored.
///
/// # Examples
/// ```
/// use onlines_core::parser::infer_episode_number;
///
/// assert_eq!(infer_episode_number("12 сезон 5 випуск"), Some(5));
/// assert_eq!(infer_episode_number("Серія без номера"), None);
/// ```
pub fn infer_episode_number(title: &str) -> Option<u32> {
    let lower = title.to_lowercase();
    let digits = regex_lite::Regex::new(r"\d+").ok()?;

    for marker in EPISODE_MARKERS {
        let index = match lower.find(marker) {
            Some(index) if index > 0 => index,
            _ => continue,
        };
        if let Some(last) = digits.find_iter(&lower[..index]).last() {
            if let Ok(number) = last.as_str().parse() {
                return Some(number);
            }
        }
    }
    None
}

/// First run of digits in a title, e.g. `"Серія 3"` → 3.
pub fn first_number(title: &str) -> Option<u32> {
    let re = regex_lite::Regex::new(r"\d+").ok()?;
    re.find(title)?.as_str().parse().ok()
}

/// Season number: explicit, else the first digit run of the title, else the
/// 1-based position.
pub fn season_number(explicit: Option<u32>, title: Option<&str>, position: usize) -> u32 {
    explicit
        .or_else(|| title.and_then(first_number))
        .unwrap_or_else(|| u32::try_from(position + 1).unwrap_or(u32::MAX))
}

/// Parse an upstream broadcast date.
///
/// Accepts `YYYY-MM-DD HH:MM:SS`, RFC 3339 and a bare `YYYY-MM-DD`.
pub fn parse_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
