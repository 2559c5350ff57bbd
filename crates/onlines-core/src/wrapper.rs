//! Anti-block URL wrapper
//!
//! Some upstream CDNs block by region. When wrapping is enabled, URLs are
//! rewritten through a wrapping host template that fetches on our behalf.

use crate::config::AdapterConfig;

/// Placeholder replaced with the percent-encoded target URL
pub const TOKEN_ENCODE_URL: &str = "{encodeurl}";
/// Alternate percent-encoding placeholder
pub const TOKEN_ENCODE_URI: &str = "{encode_uri}";
/// Placeholder replaced with the raw target URL
pub const TOKEN_RAW_URI: &str = "{uri}";

/// Upstream domains that are always wrapped when wrapping is on
pub const MANAGED_DOMAINS: &[&str] = &["ashdi.vip"];

/// Wrapper state taken from an adapter config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApnWrapper {
    enabled: bool,
    host: String,
}

impl ApnWrapper {
    /// Create a wrapper from explicit settings.
    pub fn new(enabled: bool, host: impl Into<String>) -> Self {
        Self {
            enabled,
            host: host.into(),
        }
    }

    /// Wrapper described by an adapter config.
    pub fn from_config(config: &AdapterConfig) -> Self {
        match config.wrapper_host() {
            Some(host) => Self::new(true, host),
            None => Self::default(),
        }
    }

    /// Wrapping is on and the template is not blank.
    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.host.trim().is_empty()
    }

    /// Host template in use.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Route `url` through the template, or return it unchanged when off.
    pub fn wrap(&self, url: &str) -> String {
        if !self.is_enabled() {
            return url.to_string();
        }
        build_url(&self.host, url)
    }

    /// Wrap only URLs on a managed domain.
    pub fn wrap_managed(&self, url: &str) -> String {
        if is_managed_domain(url) {
            self.wrap(url)
        } else {
            url.to_string()
        }
    }
}

/// Substitute `url` into a host template.
///
/// Recognizes `{encodeurl}`, `{encode_uri}` and `{uri}`; a template without
/// any placeholder is used as a prefix.
///
/// # Examples
/// ```
/// use onlines_core::wrapper::build_url;
///
/// assert_eq!(
///     build_url("https://w/p?u={encodeurl}", "https://x/a b"),
///     "https://w/p?u=https%3A%2F%2Fx%2Fa%20b"
/// );
/// assert_eq!(build_url("https://w/", "https://x/a"), "https://w/https://x/a");
/// ```
pub fn build_url(host: &str, url: &str) -> String {
    if host.is_empty() || url.is_empty() {
        return url.to_string();
    }

    if host.contains(TOKEN_ENCODE_URL) {
        return host.replace(TOKEN_ENCODE_URL, &urlencoding::encode(url));
    }

    if host.contains(TOKEN_ENCODE_URI) {
        return host.replace(TOKEN_ENCODE_URI, &urlencoding::encode(url));
    }

    if host.contains(TOKEN_RAW_URI) {
        return host.replace(TOKEN_RAW_URI, url);
    }

    format!("{}/{}", host.trim_end_matches('/'), url)
}

/// URL belongs to a domain whose CDN blocks are region-sensitive.
pub fn is_managed_domain(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    let lower = url.to_lowercase();
    MANAGED_DOMAINS.iter().any(|domain| lower.contains(domain))
}
