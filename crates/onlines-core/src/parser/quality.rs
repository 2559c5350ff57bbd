//! Quality labels for multi-bitrate delivery URLs

use std::collections::HashMap;

use url::Url;

use crate::types::QualityStream;

/// Path tokens mapped to a vertical resolution, checked in order
const QUALITY_TOKENS: &[(&str, &str)] = &[
    ("/lq.", "360"),
    ("/mq.", "480"),
    ("/hq.", "720"),
    ("/sd.", "480"),
    ("/hd.", "720"),
];

/// Label a delivery URL with its quality.
///
/// Known path tokens win over an `NNNp` token; anything else is `auto`.
pub fn detect_quality(url: &str) -> String {
    let lower = url.to_lowercase();
    if lower.is_empty() {
        return "auto".to_string();
    }

    if let Some((_, label)) = QUALITY_TOKENS.iter().find(|(token, _)| lower.contains(token)) {
        return label.to_string();
    }

    regex_lite::Regex::new(r"(\d{3,4})p")
        .ok()
        .and_then(|re| re.captures(&lower))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "auto".to_string())
}

/// Keeps quality labels unique within one stream result
///
/// The first occurrence keeps its label; repeats get `_2`, `_3`…
#[derive(Debug, Default)]
pub struct QualityLabeler {
    counts: HashMap<String, u32>,
}

impl QualityLabeler {
    /// Create a labeler with no labels seen.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a unique label derived from `quality`.
    pub fn label(&mut self, quality: &str) -> String {
        let quality = match quality.trim() {
            "" => "auto",
            q => q,
        };
        let count = self.counts.entry(quality.to_lowercase()).or_insert(0);
        *count += 1;
        if *count == 1 {
            quality.to_string()
        } else {
            format!("{}_{}", quality, count)
        }
    }
}

/// Expand a `/hls/multi?file=…&file=…` URL into labeled renditions.
///
/// Returns `None` when the URL is not a multi-bitrate URL or lists no files.
pub fn parse_multi_hls(stream_url: &str) -> Option<Vec<QualityStream>> {
    if !stream_url.to_lowercase().contains("/hls/multi") {
        return None;
    }
    let url = Url::parse(stream_url).ok()?;

    let mut labeler = QualityLabeler::new();
    let streams: Vec<QualityStream> = url
        .query_pairs()
        .filter(|(key, _)| key == "file")
        .map(|(_, value)| value.into_owned())
        .filter(|file| !file.is_empty())
        .map(|file| {
            // Some upstreams encode the file twice
            let file = match urlencoding::decode(&file) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => file,
            };
            let quality = labeler.label(&detect_quality(&file));
            QualityStream { url: file, quality }
        })
        .collect();

    if streams.is_empty() {
        None
    } else {
        Some(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_quality_tokens() {
        assert_eq!(detect_quality("https://cdn/v/lq.m3u8"), "360");
        assert_eq!(detect_quality("https://cdn/v/MQ.m3u8"), "480");
        assert_eq!(detect_quality("https://cdn/v/hq.m3u8"), "720");
        assert_eq!(detect_quality("https://cdn/v/sd.mp4"), "480");
        assert_eq!(detect_quality("https://cdn/v/hd.mp4"), "720");
    }

    #[test]
    fn test_detect_quality_resolution_token() {
        assert_eq!(detect_quality("https://cdn/v/1080p/index.m3u8"), "1080");
        assert_eq!(detect_quality("https://cdn/v/video_480p.mp4"), "480");
    }

    #[test]
    fn test_detect_quality_token_beats_resolution() {
        assert_eq!(detect_quality("https://cdn/1080p/lq.m3u8"), "360");
    }

    #[test]
    fn test_detect_quality_auto() {
        assert_eq!(detect_quality("https://cdn/v/index.m3u8"), "auto");
        assert_eq!(detect_quality(""), "auto");
    }

    #[test]
    fn test_labeler_suffixes_duplicates() {
        let mut labeler = QualityLabeler::new();
        let labels: Vec<String> = [".../lq.m3u8", ".../hq.m3u8", ".../hq.m3u8"]
            .iter()
            .map(|url| labeler.label(&detect_quality(url)))
            .collect();
        assert_eq!(labels, vec!["360", "720", "720_2"]);
        assert_eq!(labeler.label("720"), "720_3");
        assert_eq!(labeler.label(""), "auto");
        assert_eq!(labeler.label("auto"), "auto_2");
    }

    #[test]
    fn test_parse_multi_hls() {
        let url = "https://cdn.example/hls/multi?file=https%3A%2F%2Fcdn%2Fa%2Flq.m3u8&file=https%3A%2F%2Fcdn%2Fa%2Fhq.m3u8&file=https%3A%2F%2Fcdn%2Fb%2Fhq.m3u8";
        let streams = parse_multi_hls(url).unwrap();
        assert_eq!(streams.len(), 3);
        assert_eq!(streams[0].url, "https://cdn/a/lq.m3u8");
        assert_eq!(streams[0].quality, "360");
        assert_eq!(streams[1].quality, "720");
        assert_eq!(streams[2].quality, "720_2");
    }

    #[test]
    fn test_parse_multi_hls_double_encoded() {
        let url = "https://cdn.example/hls/multi?file=https%253A%252F%252Fcdn%252Fhd.m3u8";
        let streams = parse_multi_hls(url).unwrap();
        assert_eq!(streams[0].url, "https://cdn/hd.m3u8");
        assert_eq!(streams[0].quality, "720");
    }

    #[test]
    fn test_parse_multi_hls_not_multi() {
        assert!(parse_multi_hls("https://cdn/a/index.m3u8").is_none());
        assert!(parse_multi_hls("https://cdn/hls/multi?x=1").is_none());
        assert!(parse_multi_hls("not a url /hls/multi").is_none());
    }
}
