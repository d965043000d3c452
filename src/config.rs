//! Client configuration.
//!
//! [`ClientConfig`] gathers the knobs shared by the token provider and the
//! API client: where to connect, how long to wait, how to identify
//! ourselves, and how verbose the debug logs may be. It can be built in code
//! or loaded from a TOML file where every key is optional:
//!
//! ```toml
//! base_url = "us-2"
//! user_agent = "acme-integration/1.4"
//! timeout_secs = 60
//! connect_timeout_secs = 10
//! proxy = "http://proxy.internal:3128"
//! ssl_verify = true
//! renew_window_secs = 300
//! sanitize_log = true
//! debug_record_count = 25
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FalconError, Result};
use crate::region::resolve_base_url;

/// Smallest allowed token renew window, in seconds.
pub const MIN_RENEW_WINDOW_SECS: u64 = 120;
/// Largest allowed token renew window, in seconds.
pub const MAX_RENEW_WINDOW_SECS: u64 = 1200;
/// Default number of `resources` entries written to debug logs.
pub const MAX_DEBUG_RECORDS: usize = 100;
/// Largest page any Falcon endpoint returns.
pub const GLOBAL_API_MAX_RETURN: usize = 5000;

/// Default `User-Agent` and `CrowdStrike-SDK` header value.
pub fn default_user_agent() -> String {
    format!("falcon-sdk/{}", env!("CARGO_PKG_VERSION"))
}

/// Clamps a renew window into `[MIN_RENEW_WINDOW_SECS, MAX_RENEW_WINDOW_SECS]`.
pub fn clamp_renew_window(secs: u64) -> u64 {
    secs.clamp(MIN_RENEW_WINDOW_SECS, MAX_RENEW_WINDOW_SECS)
}

/// Connection and logging settings for a [`crate::client::FalconClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Resolved base URL, without trailing slash.
    pub base_url: String,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Overall request timeout (connect + transfer).
    pub timeout: Duration,
    /// TCP + TLS handshake timeout.
    pub connect_timeout: Duration,
    /// Optional proxy applied to every request.
    pub proxy: Option<String>,
    /// When `false`, TLS certificate validation is disabled.
    pub ssl_verify: bool,
    /// Seconds before expiry at which a token is considered stale.
    pub renew_window: u64,
    /// Redact secrets and truncate record lists in debug logs.
    pub sanitize_log: bool,
    /// Maximum `resources` entries written to debug logs.
    pub debug_record_count: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: crate::region::Region::Us1.base_url(),
            user_agent: default_user_agent(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            proxy: None,
            ssl_verify: true,
            renew_window: MIN_RENEW_WINDOW_SECS,
            sanitize_log: true,
            debug_record_count: MAX_DEBUG_RECORDS,
        }
    }
}

/// On-disk shape of the configuration file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    base_url: Option<String>,
    user_agent: Option<String>,
    timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    proxy: Option<String>,
    ssl_verify: Option<bool>,
    renew_window_secs: Option<u64>,
    sanitize_log: Option<bool>,
    debug_record_count: Option<usize>,
}

impl ClientConfig {
    /// Default configuration pointed at `base_url` (URL or region name).
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(ClientConfig {
            base_url: resolve_base_url(base_url)?,
            ..ClientConfig::default()
        })
    }

    /// Parses a TOML document, filling unset keys with defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| FalconError::Config(e.to_string()))?;
        let defaults = ClientConfig::default();

        Ok(ClientConfig {
            base_url: match file.base_url {
                Some(url) => resolve_base_url(&url)?,
                None => defaults.base_url,
            },
            user_agent: file.user_agent.unwrap_or(defaults.user_agent),
            timeout: file
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            connect_timeout: file
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            proxy: file.proxy,
            ssl_verify: file.ssl_verify.unwrap_or(defaults.ssl_verify),
            renew_window: file
                .renew_window_secs
                .map(clamp_renew_window)
                .unwrap_or(defaults.renew_window),
            sanitize_log: file.sanitize_log.unwrap_or(defaults.sanitize_log),
            debug_record_count: file
                .debug_record_count
                .unwrap_or(defaults.debug_record_count),
        })
    }

    /// Reads and parses a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Builds the `reqwest::Client` used for API calls. Redirects are not
    /// followed.
    pub(crate) fn build_api_client(&self) -> Result<reqwest::Client> {
        self.client_builder()?
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FalconError::Config(format!("failed to build HTTP client: {e}")))
    }

    /// Builds the `reqwest::Client` used for token and revoke calls,
    /// which are allowed to follow redirects.
    pub(crate) fn build_auth_client(&self) -> Result<reqwest::Client> {
        self.client_builder()?
            .build()
            .map_err(|e| FalconError::Config(format!("failed to build HTTP client: {e}")))
    }

    fn client_builder(&self) -> Result<reqwest::ClientBuilder> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone());
        if let Some(proxy) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| FalconError::Config(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        if !self.ssl_verify {
            tracing::warn!(
                "SSL verification is currently disabled for requests to the CrowdStrike API"
            );
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_us1() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "https://api.crowdstrike.com");
        assert_eq!(config.renew_window, 120);
        assert!(config.ssl_verify);
        assert!(config.sanitize_log);
        assert!(config.user_agent.starts_with("falcon-sdk/"));
    }

    #[test]
    fn toml_overrides_are_applied() {
        let config = ClientConfig::from_toml_str(
            r#"
            base_url = "eu-1"
            timeout_secs = 90
            proxy = "http://proxy.internal:3128"
            sanitize_log = false
            debug_record_count = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.base_url, "https://api.eu-1.crowdstrike.com");
        assert_eq!(config.timeout, Duration::from_secs(90));
        assert_eq!(config.proxy.as_deref(), Some("http://proxy.internal:3128"));
        assert!(!config.sanitize_log);
        assert_eq!(config.debug_record_count, 5);
        // Untouched keys keep their defaults.
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn renew_window_is_clamped() {
        let low = ClientConfig::from_toml_str("renew_window_secs = 5").unwrap();
        assert_eq!(low.renew_window, MIN_RENEW_WINDOW_SECS);
        let high = ClientConfig::from_toml_str("renew_window_secs = 99999").unwrap();
        assert_eq!(high.renew_window, MAX_RENEW_WINDOW_SECS);
        let mid = ClientConfig::from_toml_str("renew_window_secs = 600").unwrap();
        assert_eq!(mid.renew_window, 600);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ClientConfig::from_toml_str("base_ulr = \"us-1\"").unwrap_err();
        assert!(matches!(err, FalconError::Config(_)));
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.base_url, ClientConfig::default().base_url);
    }
}
