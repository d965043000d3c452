//! Async Rust client library for the CrowdStrike Falcon REST API.
//!
//! Provides OAuth2 token management with expiry tracking, a generic
//! dispatcher that calls any Falcon operation by its operation ID, a
//! normalized `{status_code, headers, body}` response envelope, and
//! pagination helpers.
//!
//! # Modules
//!
//! - [`auth`] — OAuth2 client credentials token provider with renew window.
//! - [`catalog`] — Operation ID → method, route and parameter table.
//! - [`client`] — Authenticated dispatcher (`FalconClient`).
//! - [`config`] — Connection, timeout and logging settings.
//! - [`error`] — Typed error hierarchy (`FalconError`) for all library operations.
//! - [`hosts`] — Typed helpers for the Hosts collection.
//! - [`pagination`] — Offset, scroll and `after`-token pagination.
//! - [`region`] — Falcon cloud regions and base URL resolution.
//! - [`request`] — Request builder and keyword-argument mapping.
//! - [`response`] — The response envelope.
//! - [`sanitize`] — Secret redaction for debug logs.
//!
//! # Quick Start
//!
//! ```ignore
//! use falcon_sdk::auth::TokenProvider;
//! use falcon_sdk::client::FalconClient;
//! use falcon_sdk::config::ClientConfig;
//! use falcon_sdk::request::Request;
//!
//! let tp = TokenProvider::new("client_id", "secret");
//! let client = FalconClient::new(tp, ClientConfig::with_base_url("us-2")?)?;
//! let response = client
//!     .command(&Request::new("QueryDevicesByFilter").arg("filter", "platform_name:'Linux'"))
//!     .await;
//! println!("{} hosts", response.resources().len());
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod hosts;
pub mod pagination;
pub mod region;
pub mod request;
pub mod response;
pub mod sanitize;
