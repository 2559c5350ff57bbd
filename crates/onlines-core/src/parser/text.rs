//! Text and player-page helpers
//!
//! Field extraction is modeled as an ordered list of strategies, each a pure
//! function over the page body. Structural (tag/attribute) strategies come
//! before regex fallbacks.

use scraper::{Html, Selector};

use crate::types::SubtitleInfo;

/// A single extraction strategy over a page body
pub type Strategy<T> = fn(&str) -> Option<T>;

/// Run strategies in order and return the first hit.
pub fn first_success<T>(body: &str, strategies: &[Strategy<T>]) -> Option<T> {
    strategies.iter().find_map(|strategy| strategy(body))
}

/// Trim and collapse runs of whitespace into single spaces.
pub fn clean_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collect element text and clean it.
pub fn element_text(element: &scraper::ElementRef) -> String {
    clean_text(&element.text().collect::<String>())
}

/// Make a page reference absolute.
///
/// `//x` becomes `https://x` and `/x` becomes `{host}/x`; anything else is
/// returned trimmed.
///
/// # Examples
/// ```
/// use onlines_core::parser::normalize_url;
///
/// assert_eq!(normalize_url("https://uakino.best", "//cdn/a.jpg"), "https://cdn/a.jpg");
/// assert_eq!(normalize_url("https://uakino.best", "/a.jpg"), "https://uakino.best/a.jpg");
/// ```
pub fn normalize_url(host: &str, url: &str) -> String {
    let url = url.trim();
    if url.is_empty() {
        return String::new();
    }
    if let Some(rest) = url.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    if url.starts_with('/') {
        return format!("{}{}", host.trim_end_matches('/'), url);
    }
    url.to_string()
}

/// Playable file URL from a player page.
///
/// Tries the `<source src>` tag, then the script `file:` property, then any
/// bare `.m3u8` URL.
pub fn extract_player_file(html: &str) -> Option<String> {
    let strategies: [Strategy<String>; 3] = [source_tag_file, script_file_property, bare_m3u8];
    first_success(html, &strategies)
}

fn source_tag_file(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("source[src]").ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("src"))
        .map(str::trim)
        .find(|src| !src.is_empty())
        .map(str::to_string)
}

/// Script `file: '...'` property that is not a JSON playlist.
pub fn script_file_property(html: &str) -> Option<String> {
    let re = regex_lite::Regex::new(r#"(?i)file\s*:\s*['"]([^'"]+)['"]"#).ok()?;
    let value = re.captures(html)?.get(1)?.as_str().trim();
    if value.is_empty() || value.starts_with('[') {
        return None;
    }
    Some(value.to_string())
}

fn bare_m3u8(html: &str) -> Option<String> {
    let re = regex_lite::Regex::new(r#"(?i)(https?://[^"'\s>]+\.m3u8[^"'\s>]*)"#).ok()?;
    Some(re.captures(html)?.get(1)?.as_str().to_string())
}

/// Subtitles from the script `subtitle: '[label]url'` property.
///
/// A bare `http…` value is accepted with the label `unknown`.
pub fn extract_subtitles(host: &str, html: &str) -> Vec<SubtitleInfo> {
    let Some(re) = regex_lite::Regex::new(r#"(?i)subtitle\s*:\s*['"]([^'"]+)['"]"#).ok() else {
        return Vec::new();
    };
    re.captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| parse_subtitles(host, m.as_str()))
        .unwrap_or_default()
}

/// Parse a raw `[label]url,[label]url` subtitle reference.
pub fn parse_subtitles(host: &str, value: &str) -> Vec<SubtitleInfo> {
    value
        .split(",[")
        .enumerate()
        .filter_map(|(index, part)| {
            let part = part.trim();
            if index > 0 {
                subtitle_entry(host, &format!("[{}", part))
            } else {
                subtitle_entry(host, part)
            }
        })
        .collect()
}

fn subtitle_entry(host: &str, value: &str) -> Option<SubtitleInfo> {
    if value.starts_with('[') {
        let end = value.find(']')?;
        let label = value[1..end].trim();
        let url = normalize_url(host, &value[end + 1..]);
        if url.is_empty() {
            return None;
        }
        return Some(SubtitleInfo {
            lang: if label.is_empty() { "unknown" } else { label }.to_string(),
            url,
        });
    }
    if value.to_lowercase().starts_with("http") {
        return Some(SubtitleInfo {
            lang: "unknown".to_string(),
            url: value.to_string(),
        });
    }
    None
}

/// Player URLs are sometimes HTML-escaped inside attributes.
pub fn unescape_html(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}
