//! Stream resolution state machine
//!
//! A locator moves through `Raw` → (`NeedsSecondaryFetch`) → `Resolved` →
//! `Wrapped`, or ends in `Failed`. Routing picks between the anti-block
//! wrapper and the reverse-stream proxy.

use crate::config::AdapterConfig;
use crate::error::OnlineError;
use crate::sites::{SiteContext, SiteRules};
use crate::types::{QualityStream, ResolvedStream, StreamResult};
use crate::wrapper::{is_managed_domain, ApnWrapper};

/// Referer sent for streams on a managed domain
pub const MANAGED_REFERER: &str = "https://ashdi.vip/";

/// External reverse-stream proxy
pub trait StreamProxy: Send + Sync {
    /// Rewrite a stream URL for delivery.
    ///
    /// `force` routes through the proxy even when the config does not enable
    /// it. `headers` must be replayed by the proxy upstream.
    fn route(&self, url: &str, config: &AdapterConfig, force: bool, headers: &[(&str, &str)]) -> String;
}

/// Direct delivery, URLs pass through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectStream;

impl StreamProxy for DirectStream {
    fn route(&self, url: &str, _config: &AdapterConfig, _force: bool, _headers: &[(&str, &str)]) -> String {
        url.to_string()
    }
}

/// Reverse-stream proxy served by the host at `{base}/proxy/…`
#[derive(Debug, Clone)]
pub struct LocalStreamProxy {
    base: String,
}

impl LocalStreamProxy {
    /// Proxy rooted at the host's public address.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl StreamProxy for LocalStreamProxy {
    fn route(&self, url: &str, config: &AdapterConfig, force: bool, headers: &[(&str, &str)]) -> String {
        if !(config.stream_proxy || force) {
            return url.to_string();
        }

        let mut routed = format!("{}/proxy/{}", self.base, urlencoding::encode(url));
        for (index, (name, value)) in headers.iter().enumerate() {
            routed.push(if index == 0 { '?' } else { '&' });
            routed.push_str(&format!(
                "h_{}={}",
                name.to_lowercase(),
                urlencoding::encode(value)
            ));
        }
        routed
    }
}

/// Where a final URL goes
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRoute {
    /// Through the anti-block wrapper
    Wrapped(String),
    /// Through the reverse-stream proxy (or direct), with the config it was
    /// routed under
    Proxied { url: String, config: AdapterConfig },
}

impl StreamRoute {
    pub fn url(&self) -> &str {
        match self {
            StreamRoute::Wrapped(url) => url,
            StreamRoute::Proxied { url, .. } => url,
        }
    }

    pub fn into_url(self) -> String {
        match self {
            StreamRoute::Wrapped(url) => url,
            StreamRoute::Proxied { url, .. } => url,
        }
    }
}

/// State of one resolution request
#[derive(Debug)]
pub enum ResolveState {
    /// Opaque locator from the catalog
    Raw(String),
    /// Locator is a player page and needs one more fetch
    NeedsSecondaryFetch(String),
    /// Directly playable file
    Resolved(ResolvedStream),
    /// Routed and ready to return
    Wrapped(StreamResult),
    /// Terminal failure
    Failed(OnlineError),
}

impl ResolveState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResolveState::Wrapped(_) | ResolveState::Failed(_))
    }
}

/// Drives [`ResolveState`] for one adapter
pub struct StreamResolver<'a> {
    config: &'a AdapterConfig,
    wrapper: ApnWrapper,
    proxy: &'a dyn StreamProxy,
}

impl<'a> StreamResolver<'a> {
    pub fn new(config: &'a AdapterConfig, proxy: &'a dyn StreamProxy) -> Self {
        Self {
            config,
            wrapper: ApnWrapper::from_config(config),
            proxy,
        }
    }

    /// Decide how a playable URL is delivered.
    ///
    /// With wrapping enabled, a host-provided template or a managed domain
    /// wraps the URL; anything else goes to the stream proxy under a config
    /// with the wrapper stripped. Managed-domain streams that are not
    /// wrapped are forced through the stream proxy with a referer.
    pub fn route(&self, url: &str) -> StreamRoute {
        let managed = is_managed_domain(url);

        if self.wrapper.is_enabled() {
            if self.config.apn_host_provided || managed {
                return StreamRoute::Wrapped(self.wrapper.wrap(url));
            }
            let stripped = self.config.without_wrapper();
            let routed = self.proxy.route(url, &stripped, false, &[]);
            return StreamRoute::Proxied {
                url: routed,
                config: stripped,
            };
        }

        let routed = if managed {
            self.proxy.route(
                url,
                self.config,
                true,
                &[("User-Agent", "Mozilla/5.0"), ("Referer", MANAGED_REFERER)],
            )
        } else {
            self.proxy.route(url, self.config, false, &[])
        };
        StreamRoute::Proxied {
            url: routed,
            config: self.config.clone(),
        }
    }

    /// Take one step.
    pub async fn advance<R: SiteRules + ?Sized>(
        &self,
        rules: &R,
        ctx: &SiteContext<'_>,
        state: ResolveState,
        provider: Option<&str>,
        title: Option<&str>,
    ) -> ResolveState {
        match state {
            ResolveState::Raw(locator) => {
                let locator = locator.trim().to_string();
                if locator.is_empty() {
                    ResolveState::Failed(OnlineError::InvalidUrl("empty locator".to_string()))
                } else if rules.needs_secondary_fetch(provider, &locator) {
                    ResolveState::NeedsSecondaryFetch(locator)
                } else {
                    ResolveState::Resolved(ResolvedStream::file(locator))
                }
            }
            ResolveState::NeedsSecondaryFetch(locator) => {
                match rules.extract_stream_file(ctx, &locator).await {
                    Ok(stream) if !stream.file.trim().is_empty() => ResolveState::Resolved(stream),
                    Ok(_) => ResolveState::Failed(OnlineError::ExtractionMiss(format!(
                        "stream file for {}",
                        locator
                    ))),
                    Err(e) => ResolveState::Failed(e),
                }
            }
            ResolveState::Resolved(stream) => ResolveState::Wrapped(self.finish(stream, title)),
            terminal => terminal,
        }
    }

    /// Run the machine from a raw locator to a terminal state.
    pub async fn resolve<R: SiteRules + ?Sized>(
        &self,
        rules: &R,
        ctx: &SiteContext<'_>,
        locator: &str,
        provider: Option<&str>,
        title: Option<&str>,
    ) -> ResolveState {
        let mut state = ResolveState::Raw(locator.to_string());
        while !state.is_terminal() {
            state = self.advance(rules, ctx, state, provider, title).await;
        }
        state
    }

    fn finish(&self, stream: ResolvedStream, title: Option<&str>) -> StreamResult {
        let alternate_qualities: Vec<QualityStream> = stream
            .qualities
            .iter()
            .map(|q| QualityStream {
                url: self.route(&q.url).into_url(),
                quality: q.quality.clone(),
            })
            .collect();

        let primary_url = match alternate_qualities.first() {
            Some(first) => first.url.clone(),
            None => self.route(&stream.file).into_url(),
        };

        let display_name = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or(stream.name);

        StreamResult {
            primary_url,
            alternate_qualities,
            poster_url: stream.poster,
            display_name,
            subtitles: stream.subtitles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApnConfig;

    fn config(stream_proxy: bool, apn: Option<&str>, provided: bool) -> AdapterConfig {
        let mut config = AdapterConfig::new("uakino", "https://uakino.best");
        config.stream_proxy = stream_proxy;
        config.apn = apn.map(|host| ApnConfig { host: host.to_string() });
        config.apn_host_provided = provided;
        config
    }

    const TEMPLATE: &str = "https://w/p?u={encodeurl}";

    #[test]
    fn test_direct_without_proxy_or_wrapper() {
        let config = config(false, None, false);
        let resolver = StreamResolver::new(&config, &DirectStream);
        let route = resolver.route("https://cdn/a.m3u8");
        assert_eq!(route.url(), "https://cdn/a.m3u8");
        assert!(matches!(route, StreamRoute::Proxied { .. }));
    }

    #[test]
    fn test_stream_proxy_enabled() {
        let config = config(true, None, false);
        let proxy = LocalStreamProxy::new("http://127.0.0.1:9118/");
        let resolver = StreamResolver::new(&config, &proxy);
        assert_eq!(
            resolver.route("https://cdn/a.m3u8").url(),
            "http://127.0.0.1:9118/proxy/https%3A%2F%2Fcdn%2Fa.m3u8"
        );
    }

    #[test]
    fn test_managed_domain_wrapped() {
        let config = config(false, Some(TEMPLATE), false);
        let resolver = StreamResolver::new(&config, &DirectStream);
        let route = resolver.route("https://ashdi.vip/vod/1/index.m3u8");
        assert_eq!(
            route,
            StreamRoute::Wrapped("https://w/p?u=https%3A%2F%2Fashdi.vip%2Fvod%2F1%2Findex.m3u8".to_string())
        );
    }

    #[test]
    fn test_provided_host_wraps_everything() {
        let config = config(false, Some(TEMPLATE), true);
        let resolver = StreamResolver::new(&config, &DirectStream);
        assert!(matches!(resolver.route("https://cdn/a.m3u8"), StreamRoute::Wrapped(_)));
    }

    #[test]
    fn test_default_host_strips_wrapper_for_proxy() {
        let config = config(true, Some(TEMPLATE), false);
        let proxy = LocalStreamProxy::new("http://lampa");
        let resolver = StreamResolver::new(&config, &proxy);
        match resolver.route("https://cdn/a.m3u8") {
            StreamRoute::Proxied { url, config } => {
                assert_eq!(url, "http://lampa/proxy/https%3A%2F%2Fcdn%2Fa.m3u8");
                assert!(config.apn.is_none());
                assert!(!config.apn_host_provided);
            }
            other => panic!("Expected Proxied route, got {:?}", other),
        }
    }

    #[test]
    fn test_managed_domain_forced_through_proxy_when_not_wrapping() {
        let config = config(false, None, false);
        let proxy = LocalStreamProxy::new("http://lampa");
        let resolver = StreamResolver::new(&config, &proxy);
        let url = resolver.route("https://ashdi.vip/a.m3u8").into_url();
        assert_eq!(
            url,
            "http://lampa/proxy/https%3A%2F%2Fashdi.vip%2Fa.m3u8?h_user-agent=Mozilla%2F5.0&h_referer=https%3A%2F%2Fashdi.vip%2F"
        );
    }

    #[test]
    fn test_finish_prefers_first_quality() {
        let config = config(false, None, false);
        let resolver = StreamResolver::new(&config, &DirectStream);
        let stream = ResolvedStream {
            file: "https://cdn/multi".to_string(),
            qualities: vec![
                QualityStream { url: "https://cdn/lq.m3u8".to_string(), quality: "360".to_string() },
                QualityStream { url: "https://cdn/hq.m3u8".to_string(), quality: "720".to_string() },
            ],
            name: Some("Upstream".to_string()),
            ..ResolvedStream::default()
        };
        let result = resolver.finish(stream, Some("  "));
        assert_eq!(result.primary_url, "https://cdn/lq.m3u8");
        assert_eq!(result.alternate_qualities.len(), 2);
        assert_eq!(result.display_name.as_deref(), Some("Upstream"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(ResolveState::Failed(OnlineError::NotFound("x".to_string())).is_terminal());
        assert!(!ResolveState::Raw("x".to_string()).is_terminal());
        assert!(!ResolveState::Resolved(ResolvedStream::file("x")).is_terminal());
    }
}
