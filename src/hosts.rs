//! Typed helpers for the Hosts service collection.
//!
//! The generic dispatcher passes vendor JSON through untouched; this module
//! shows the typed layer a consumer can build on top of it:
//!
//! - [`query_devices`] / [`query_all_devices`] find host agent IDs (AIDs)
//!   by FQL filter.
//! - [`get_device_details`] resolves AIDs to [`Device`] records.
//! - [`perform_action`] contains, releases, hides or unhides hosts.
//! - [`update_device_tags`] adds or removes Falcon Grouping Tags.
//!
//! ## FQL filtering
//!
//! Filters use Falcon Query Language, e.g. `platform_name:'Windows'` or
//! `hostname:'web-*'+last_seen:>'2026-01-01'`. Pass `None` to match every
//! host.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::FalconClient;
use crate::config::GLOBAL_API_MAX_RETURN;
use crate::pagination::paginate;
use crate::request::Request;
use crate::response::ApiResponse;

// ── Response types ─────────────────────────────────────────────────────

/// A host as returned by `GetDeviceDetailsV2` / `PostDeviceDetailsV2`.
///
/// Only commonly used fields are modeled; the API returns many more, which
/// serde ignores. Optional fields are those the API omits depending on the
/// platform or sensor state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Agent ID (AID).
    pub device_id: String,

    /// Customer ID the host belongs to.
    #[serde(default)]
    pub cid: Option<String>,

    /// Host name reported by the sensor.
    #[serde(default)]
    pub hostname: Option<String>,

    /// `Windows`, `Mac` or `Linux`.
    #[serde(default)]
    pub platform_name: Option<String>,

    /// OS version string (e.g. `Windows 11`, `RHEL 9.3`).
    #[serde(default)]
    pub os_version: Option<String>,

    /// Sensor version.
    #[serde(default)]
    pub agent_version: Option<String>,

    /// Primary local IP address.
    #[serde(default)]
    pub local_ip: Option<String>,

    /// Internet-facing IP address seen by the cloud.
    #[serde(default)]
    pub external_ip: Option<String>,

    /// MAC address of the primary interface.
    #[serde(default)]
    pub mac_address: Option<String>,

    /// Containment state: `normal`, `containment_pending`, `contained`,
    /// `lift_containment_pending`.
    #[serde(default)]
    pub status: Option<String>,

    /// ISO 8601 timestamp of the sensor's first check-in.
    #[serde(default)]
    pub first_seen: Option<String>,

    /// ISO 8601 timestamp of the sensor's latest check-in.
    #[serde(default)]
    pub last_seen: Option<String>,

    /// `Workstation`, `Server` or `Domain Controller`.
    #[serde(default)]
    pub product_type_desc: Option<String>,

    /// Falcon Grouping Tags and sensor tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Host group IDs.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// The `resources` list of a Falcon response.
#[derive(Debug, Deserialize)]
pub struct Resources<T> {
    /// Returned records.
    #[serde(default = "Vec::new")]
    pub resources: Vec<T>,
}

// ── Request types ──────────────────────────────────────────────────────

/// Actions accepted by `PerformActionV2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAction {
    /// Network-contain the host.
    Contain,
    /// Release the host from containment.
    LiftContainment,
    /// Hide the host from the console.
    HideHost,
    /// Restore a hidden host.
    UnhideHost,
    /// Suppress detections for the host.
    DetectionSuppress,
    /// Stop suppressing detections for the host.
    DetectionUnsuppress,
}

impl HostAction {
    /// Value sent as `action_name`.
    pub fn as_str(self) -> &'static str {
        match self {
            HostAction::Contain => "contain",
            HostAction::LiftContainment => "lift_containment",
            HostAction::HideHost => "hide_host",
            HostAction::UnhideHost => "unhide_host",
            HostAction::DetectionSuppress => "detection_suppress",
            HostAction::DetectionUnsuppress => "detection_unsuppress",
        }
    }
}

impl fmt::Display for HostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a tag update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagAction {
    /// Append tags.
    Add,
    /// Remove tags.
    Remove,
}

// ── Endpoint functions ─────────────────────────────────────────────────

/// Returns up to `limit` AIDs matching `filter` (`QueryDevicesByFilter`).
///
/// # Errors
///
/// - `FalconError::Api`: the API returned a non-success status (e.g. 400
///   for a malformed filter, 403 for a missing `Hosts: Read` scope).
/// - `FalconError::NoAuthentication`: no credentials or token configured.
/// - `FalconError::Network`: transport-level failure.
pub async fn query_devices(
    client: &FalconClient,
    filter: Option<&str>,
    limit: Option<u32>,
) -> crate::error::Result<Vec<String>> {
    let mut request = Request::new("QueryDevicesByFilter");
    if let Some(filter) = filter {
        request = request.arg("filter", filter);
    }
    if let Some(limit) = limit {
        request = request.arg("limit", limit);
    }
    let ids: Resources<String> = client.call(&request).await?;
    Ok(ids.resources)
}

/// Returns every AID matching `filter`, following the scroll endpoint's
/// continuation tokens.
pub async fn query_all_devices(
    client: &FalconClient,
    filter: Option<&str>,
) -> crate::error::Result<Vec<String>> {
    let mut request =
        Request::new("QueryDevicesByFilterScroll").arg("limit", GLOBAL_API_MAX_RETURN as u64);
    if let Some(filter) = filter {
        request = request.arg("filter", filter);
    }
    let values = paginate(client, &request, None).await?;
    Ok(values
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_owned))
        .collect())
}

/// Resolves AIDs to device records.
///
/// Uses `PostDeviceDetailsV2` (ids in the body) in batches of 5000, the
/// endpoint's maximum.
pub async fn get_device_details(
    client: &FalconClient,
    ids: &[String],
) -> crate::error::Result<Vec<Device>> {
    let mut devices = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(GLOBAL_API_MAX_RETURN) {
        let request = Request::new("PostDeviceDetailsV2").ids(chunk.iter().cloned());
        let batch: Resources<Device> = client.call(&request).await?;
        devices.extend(batch.resources);
    }
    Ok(devices)
}

/// Runs `action` against the given hosts (`PerformActionV2`).
///
/// Returns the envelope on success; per-host outcomes are in `resources`.
pub async fn perform_action(
    client: &FalconClient,
    action: HostAction,
    ids: &[String],
) -> crate::error::Result<ApiResponse> {
    let request = Request::new("PerformActionV2")
        .arg("action_name", action.as_str())
        .ids(ids.iter().cloned());
    client.execute(&request).await?.into_result()
}

/// Adds or removes Falcon Grouping Tags (`UpdateDeviceTags`).
///
/// Tags must carry the `FalconGroupingTags/` prefix.
pub async fn update_device_tags(
    client: &FalconClient,
    action: TagAction,
    ids: &[String],
    tags: &[String],
) -> crate::error::Result<ApiResponse> {
    let action = match action {
        TagAction::Add => "add",
        TagAction::Remove => "remove",
    };
    let request = Request::new("UpdateDeviceTags").body(json!({
        "action": action,
        "device_ids": ids,
        "tags": tags,
    }));
    client.execute(&request).await?.into_result()
}
