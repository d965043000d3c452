//! Falcon cloud regions and base URL resolution.
//!
//! Callers may configure the client with a full URL
//! (`https://api.eu-1.crowdstrike.com`), a region short name (`eu-1`,
//! `EU1`), or `auto`. After a successful token request the API reports the
//! tenant's home cloud in the `X-Cs-Region` header; [`autodiscover`] uses it
//! to move the client onto the correct cloud.

use std::fmt;
use std::str::FromStr;

use crate::error::{FalconError, Result};

/// A CrowdStrike Falcon cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// US-1 (default).
    Us1,
    /// US-2.
    Us2,
    /// EU-1.
    Eu1,
    /// US-GOV-1 (GovCloud).
    UsGov1,
    /// US-GOV-2.
    UsGov2,
}

impl Region {
    /// All known regions, in display order.
    pub const ALL: [Region; 5] = [
        Region::Us1,
        Region::Us2,
        Region::Eu1,
        Region::UsGov1,
        Region::UsGov2,
    ];

    /// API hostname for this region.
    pub fn host(self) -> &'static str {
        match self {
            Region::Us1 => "api.crowdstrike.com",
            Region::Us2 => "api.us-2.crowdstrike.com",
            Region::Eu1 => "api.eu-1.crowdstrike.com",
            Region::UsGov1 => "api.laggar.gcw.crowdstrike.com",
            Region::UsGov2 => "api.us-gov-2.crowdstrike.mil",
        }
    }

    /// Full `https://` base URL for this region, without a trailing slash.
    pub fn base_url(self) -> String {
        format!("https://{}", self.host())
    }

    /// Short name as used in configuration (`US1`, `EU1`, ...).
    pub fn short_name(self) -> &'static str {
        match self {
            Region::Us1 => "US1",
            Region::Us2 => "US2",
            Region::Eu1 => "EU1",
            Region::UsGov1 => "USGOV1",
            Region::UsGov2 => "USGOV2",
        }
    }

    /// Looks up the region whose host matches `base_url`, if any.
    pub fn from_base_url(base_url: &str) -> Option<Region> {
        let host = base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_ascii_lowercase();
        Region::ALL.into_iter().find(|r| r.host() == host)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Region {
    type Err = FalconError;

    /// Accepts `us-1`, `US1`, `usgov1`, `US-GOV-1` and so on.
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        Region::ALL
            .into_iter()
            .find(|r| r.short_name() == normalized)
            .ok_or_else(|| FalconError::InvalidBaseUrl(format!("unknown region '{s}'")))
    }
}

/// Resolves a configured base URL or region name into a full base URL.
///
/// - Values containing `://` are used as-is.
/// - `auto` resolves to US-1; autodiscovery corrects it after login.
/// - Known region names resolve to that region's URL.
/// - Anything else is treated as a hostname and gets `https://` prepended.
///
/// Trailing slashes are always stripped so routes can be appended directly.
pub fn resolve_base_url(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(FalconError::InvalidBaseUrl("empty base URL".to_string()));
    }

    let resolved = if input.contains("://") {
        input.to_string()
    } else if input.eq_ignore_ascii_case("auto") {
        Region::Us1.base_url()
    } else {
        match input.parse::<Region>() {
            Ok(region) => region.base_url(),
            Err(_) => format!("https://{input}"),
        }
    };

    Ok(resolved.trim_end_matches('/').to_string())
}

/// Picks the base URL to use after a successful token request.
///
/// `region_header` is the value of the token response's `X-Cs-Region`
/// header (e.g. `"us-2"`). The base URL only changes when it currently
/// points at a known Falcon cloud and the header names a different one.
/// Custom base URLs (proxies, mock servers) are left alone.
pub fn autodiscover(base_url: &str, region_header: Option<&str>) -> String {
    let Some(current) = Region::from_base_url(base_url) else {
        return base_url.to_string();
    };
    match region_header.and_then(|h| h.parse::<Region>().ok()) {
        Some(reported) if reported != current => {
            tracing::debug!(from = %current, to = %reported, "switching to autodiscovered region");
            reported.base_url()
        }
        _ => base_url.to_string(),
    }
}
