//! Site rule sets
//!
//! Each upstream site supplies a [`SiteRules`] implementation: how to search,
//! how to fetch and extract a project, how to build its voice tree and how to
//! resolve a player page into a playable file. The generic
//! [`Adapter`](crate::pipeline::Adapter) drives everything else.
//!
//! - `starlight`: JSON catalog and player API
//! - `bamboo`: HTML catalog with inline players
//! - `uakino`: HTML catalog with an AJAX playlist endpoint
//! - `mikai`: anime JSON API
//! - `ashdi`: id lookup API returning player iframes

pub mod ashdi;
pub mod bamboo;
pub mod mikai;
pub mod starlight;
pub mod uakino;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::client::{HttpClient, ProxyProvider};
use crate::config::AdapterConfig;
use crate::error::{OnlineError, Result};
use crate::parser::normalize_url;
use crate::types::{ProjectInfo, Query, RawTrack, ResolvedStream, SearchResult};
use crate::wrapper::ApnWrapper;

pub use ashdi::AshdiBase;
pub use bamboo::Bamboo;
pub use mikai::Mikai;
pub use starlight::StarLight;
pub use uakino::UAKino;

/// Static facts about a site
#[derive(Debug, Clone)]
pub struct SiteDescriptor {
    /// Short name used in cache keys and logs
    pub name: &'static str,
    /// Human-readable name
    pub display_name: &'static str,
    /// Upstream root
    pub host: &'static str,
    /// Separate API root
    pub api_host: Option<&'static str>,
    /// Class default TTL for search results, minutes
    pub search_minutes: u64,
    /// Class default TTL for projects, minutes
    pub project_minutes: u64,
    /// Class default TTL for voice trees, minutes
    pub playlist_minutes: u64,
    /// Take the first search hit instead of asking the caller to choose
    pub auto_pick_first: bool,
    /// Series are listed season by season; otherwise the first season is
    /// shown directly
    pub season_listing: bool,
    /// Name for tracks without one
    pub default_voice: &'static str,
}

impl SiteDescriptor {
    /// Default adapter config for this site.
    pub fn default_config(&self) -> AdapterConfig {
        let config = AdapterConfig::new(self.name, self.host).with_display_name(self.display_name);
        match self.api_host {
            Some(api_host) => config.with_api_host(api_host),
            None => config,
        }
    }
}

/// Everything a rule set needs to talk to its upstream
pub struct SiteContext<'a> {
    pub client: &'a HttpClient,
    pub proxies: &'a dyn ProxyProvider,
    pub config: &'a AdapterConfig,
    pub wrapper: ApnWrapper,
}

impl<'a> SiteContext<'a> {
    pub fn new(client: &'a HttpClient, proxies: &'a dyn ProxyProvider, config: &'a AdapterConfig) -> Self {
        Self {
            client,
            proxies,
            config,
            wrapper: ApnWrapper::from_config(config),
        }
    }

    /// Site root from the config.
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Make a page reference absolute against the site root.
    pub fn absolute(&self, url: &str) -> String {
        normalize_url(&self.config.host, url)
    }

    /// GET a page. Managed-domain URLs are wrapped when wrapping is on.
    ///
    /// # Errors
    /// Transport errors, or `OnlineError::UpstreamEmpty` for a blank body
    pub async fn fetch(&self, url: &str, headers: &[(&str, &str)]) -> Result<String> {
        self.get(url, &self.wrapper.wrap_managed(url), headers).await
    }

    /// GET a page, always wrapped when wrapping is on.
    pub async fn fetch_wrapped(&self, url: &str, headers: &[(&str, &str)]) -> Result<String> {
        self.get(url, &self.wrapper.wrap(url), headers).await
    }

    /// GET and decode a JSON body.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str, headers: &[(&str, &str)]) -> Result<T> {
        let body = self.fetch(url, headers).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn get(&self, url: &str, target: &str, headers: &[(&str, &str)]) -> Result<String> {
        let proxy = self.proxies.next_proxy();
        tracing::debug!(
            adapter = %self.config.name,
            url = %target,
            proxy = proxy.as_deref().unwrap_or("direct"),
            "Fetching"
        );

        let body = self
            .client
            .get(target, headers, proxy.as_deref(), self.config.timeout())
            .await?;
        if body.trim().is_empty() {
            return Err(OnlineError::UpstreamEmpty(url.to_string()));
        }
        Ok(body)
    }
}

/// Capability set of one upstream site
#[async_trait]
pub trait SiteRules: Send + Sync {
    /// Static facts about the site.
    fn descriptor(&self) -> &SiteDescriptor;

    /// Search the catalog for a query.
    ///
    /// An empty list is a valid answer; the adapter treats it as not found.
    async fn search(&self, ctx: &SiteContext<'_>, query: &Query) -> Result<Vec<SearchResult>>;

    /// Fetch and extract a project page.
    async fn fetch_project(&self, ctx: &SiteContext<'_>, locator: &str, query: &Query) -> Result<ProjectInfo>;

    /// Raw voice tree of a project.
    ///
    /// The default uses the tracks the project page already carried.
    async fn fetch_playlist(&self, _ctx: &SiteContext<'_>, project: &ProjectInfo) -> Result<Vec<RawTrack>> {
        Ok(project.tracks.clone())
    }

    /// Turn a player-page locator into a playable file.
    async fn extract_stream_file(&self, ctx: &SiteContext<'_>, locator: &str) -> Result<ResolvedStream>;

    /// Whether a locator points at a player page rather than a file.
    fn needs_secondary_fetch(&self, provider: Option<&str>, locator: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NoProxy;
    use crate::config::ApnConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_descriptor_default_config() {
        let config = StarLight::new().descriptor().default_config();
        assert_eq!(config.name, "starlight");
        assert!(config.api_host.is_some());

        let config = Bamboo::new().descriptor().default_config();
        assert_eq!(config.api_root(), config.host);
    }

    #[tokio::test]
    async fn test_context_blank_body_is_upstream_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blank"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  \n"))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let config = AdapterConfig::new("test", server.uri());
        let ctx = SiteContext::new(&client, &NoProxy, &config);
        let result = ctx.fetch(&format!("{}/blank", server.uri()), &[]).await;
        assert!(matches!(result, Err(OnlineError::UpstreamEmpty(_))));
    }

    #[tokio::test]
    async fn test_context_fetch_wrapped_uses_template() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wrap/https://upstream.example/api"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let mut config = AdapterConfig::new("test", "https://upstream.example");
        config.apn = Some(ApnConfig {
            host: format!("{}/wrap/{{uri}}", server.uri()),
        });
        let ctx = SiteContext::new(&client, &NoProxy, &config);

        let value: serde_json::Value = serde_json::from_str(
            &ctx.fetch_wrapped("https://upstream.example/api", &[]).await.unwrap(),
        )
        .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_context_absolute() {
        let client = HttpClient::new().unwrap();
        let config = AdapterConfig::new("test", "https://site.example/");
        let ctx = SiteContext::new(&client, &NoProxy, &config);
        assert_eq!(ctx.absolute("/a.jpg"), "https://site.example/a.jpg");
        assert_eq!(ctx.host(), "https://site.example");
    }
}
