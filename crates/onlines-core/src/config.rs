//! Adapter configuration
//!
//! Configuration is read once from the host's config surface when an adapter
//! is built and never mutated afterwards. The surface is a JSON object whose
//! keys overlay the site defaults; the `apn` / `apn_host` pair controls the
//! anti-block wrapper.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OnlineError, Result};

/// Wrapping template used when `apn` is enabled without a host
pub const DEFAULT_APN_HOST: &str = "https://tut.im/proxy.php?url={encodeurl}";

/// Lower bound for any outbound request timeout
pub const MIN_TIMEOUT_SECS: u64 = 5;

/// Default outbound request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Deployment mode flags set by the host
///
/// Both flags off is the unconstrained "home" mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Constrained-network mode (small router-class devices)
    pub constrained: bool,
    /// Shared multi-tenant mode
    pub shared: bool,
}

/// Outbound proxy list and credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Embed `username:password` into each endpoint
    pub use_auth: bool,
    pub username: String,
    pub password: String,
    /// Endpoints such as `socks5://10.0.0.1:1080`
    pub list: Vec<String>,
}

/// Anti-block wrapper settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnConfig {
    /// Wrapping host template
    pub host: String,
}

/// Per-adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Short adapter name used in cache keys and logs
    pub name: String,
    /// Human-readable name
    pub display_name: String,
    /// Adapter switched on by the host
    pub enabled: bool,
    /// Upstream site root, without trailing slash
    pub host: String,
    /// Separate API root, when the site has one
    pub api_host: Option<String>,
    /// Route final streams through the local reverse-stream proxy
    pub stream_proxy: bool,
    /// Cache time override in minutes, `0` when unset
    pub cache_time: u64,
    /// Premium cache time in minutes, bypasses the mode rules
    pub premium_cache: Option<u64>,
    /// Outbound request timeout in seconds
    pub timeout_secs: u64,
    /// Outbound proxies
    pub proxy: ProxySettings,
    /// Anti-block wrapper; `None` when disabled
    pub apn: Option<ApnConfig>,
    /// The host supplied its own wrapper template
    #[serde(skip)]
    pub apn_host_provided: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            display_name: String::new(),
            enabled: true,
            host: String::new(),
            api_host: None,
            stream_proxy: false,
            cache_time: 0,
            premium_cache: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            proxy: ProxySettings::default(),
            apn: None,
            apn_host_provided: false,
        }
    }
}

impl AdapterConfig {
    /// Create a config for a site with its upstream host.
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            host: host.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Builder-style display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Builder-style API root.
    pub fn with_api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = Some(api_host.into().trim_end_matches('/').to_string());
        self
    }

    /// API root, falling back to the site host.
    pub fn api_root(&self) -> &str {
        self.api_host.as_deref().unwrap_or(&self.host)
    }

    /// Wrapper is on and has a usable template.
    pub fn wrapper_enabled(&self) -> bool {
        self.apn
            .as_ref()
            .map(|apn| !apn.host.trim().is_empty())
            .unwrap_or(false)
    }

    /// Wrapper template when enabled.
    pub fn wrapper_host(&self) -> Option<&str> {
        self.apn
            .as_ref()
            .map(|apn| apn.host.as_str())
            .filter(|host| !host.trim().is_empty())
    }

    /// Copy of this config with the anti-block flags stripped.
    ///
    /// Handed to the reverse-stream proxy, which does not understand the
    /// wrapper template and would otherwise wrap twice.
    pub fn without_wrapper(&self) -> Self {
        let mut config = self.clone();
        config.apn = None;
        config.apn_host_provided = false;
        config
    }

    /// Effective request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(MIN_TIMEOUT_SECS))
    }

    /// Overlay a host config surface on top of site defaults.
    ///
    /// # Errors
    /// Returns `OnlineError::Config` when the surface is not an object or a
    /// key has the wrong type.
    pub fn from_surface(defaults: AdapterConfig, surface: &Value) -> Result<Self> {
        let mut overrides = match surface {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(OnlineError::Config(format!(
                    "adapter surface must be an object, got {}",
                    other
                )))
            }
        };

        // `apn` is only honored as a boolean
        let apn_enabled = match overrides.remove("apn") {
            Some(Value::Bool(enabled)) => Some(enabled),
            _ => None,
        };
        let apn_host = match overrides.remove("apn_host") {
            Some(Value::String(host)) => Some(host),
            _ => None,
        };

        let mut merged = serde_json::to_value(&defaults)?;
        if let Value::Object(base) = &mut merged {
            for (key, value) in overrides {
                base.insert(key, value);
            }
        }

        let mut config: AdapterConfig = serde_json::from_value(merged)
            .map_err(|e| OnlineError::Config(format!("{}: {}", defaults.name, e)))?;
        config.apn_host_provided = defaults.apn_host_provided;

        if let Some(enabled) = apn_enabled {
            config.apply_apn(enabled, apn_host.as_deref());
        }

        match apn_enabled {
            Some(true) => config.stream_proxy = false,
            _ if config.stream_proxy => config.apn = None,
            _ => {}
        }

        Ok(config)
    }

    fn apply_apn(&mut self, enabled: bool, host: Option<&str>) {
        if !enabled {
            self.apn = None;
            self.apn_host_provided = false;
            return;
        }

        let provided = host.map(str::trim).filter(|h| !h.is_empty());
        self.apn_host_provided = provided.is_some();
        self.apn = Some(ApnConfig {
            host: provided.unwrap_or(DEFAULT_APN_HOST).to_string(),
        });
    }
}
