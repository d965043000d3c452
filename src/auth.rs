//! OAuth2 client-credentials authentication for the CrowdStrike Falcon API.
//!
//! Acquires bearer tokens from `{base}/oauth2/token` and revokes them at
//! `{base}/oauth2/revoke`. The token is cached in `TokenProvider` together
//! with its issue instant and lifetime; consumers (e.g. `FalconClient`) ask
//! `needs_login()` before each request and call `login()` when the cached
//! token is absent or inside the renew window.
//!
//! Three ways to authenticate:
//! - explicit API client credentials ([`TokenProvider::new`]),
//! - credentials read from the environment ([`TokenProvider::from_env`]),
//! - a caller-supplied token ([`TokenProvider::with_token`]), which is never
//!   refreshed.
//!
//! MSSP parents can act on a child tenant by logging in with its CID
//! ([`TokenProvider::child_login`]).

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::{ClientConfig, MAX_DEBUG_RECORDS, MIN_RENEW_WINDOW_SECS, clamp_renew_window};
use crate::error::{FalconError, Result};
use crate::region::{Region, autodiscover};
use crate::response::ApiResponse;
use crate::sanitize::sanitize_value;

/// Token endpoint route.
const TOKEN_ROUTE: &str = "/oauth2/token";
/// Revoke endpoint route.
const REVOKE_ROUTE: &str = "/oauth2/revoke";

/// Lifetime assumed for caller-supplied tokens.
const LEGACY_TOKEN_TTL_SECS: u64 = 1799;

/// Default prefix for credential environment variables.
pub const DEFAULT_ENV_PREFIX: &str = "FALCON_";

/// API client credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// API client ID.
    pub client_id: String,
    /// API client secret.
    pub client_secret: String,
    /// Child CID to authenticate against (MSSP only).
    pub member_cid: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"REDACTED")
            .field("member_cid", &self.member_cid)
            .finish()
    }
}

/// How the provider obtained its authentication material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// Client ID and secret passed in code.
    Credentials,
    /// Client ID and secret read from environment variables.
    Environment,
    /// Pre-issued token; cannot be refreshed.
    Token,
    /// Nothing configured. Every request fails with `NoAuthentication`.
    None,
}

/// Form body sent to the token endpoint.
/// Fields are serialized as `application/x-www-form-urlencoded` by reqwest's `.form()`.
#[derive(Serialize)]
pub struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    member_cid: Option<&'a str>,
}

/// Form body sent to the revoke endpoint.
#[derive(Serialize)]
struct RevokeRequest<'a> {
    token: &'a str,
    client_id: &'a str,
}

/// Subset of the token response that we need.
/// The endpoint returns additional fields which serde ignores.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// The bearer token.
    pub access_token: String,
    /// Always `bearer`.
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds (1799 for Falcon).
    pub expires_in: u64,
}

/// The cached bearer token and the outcome of the last token request.
///
/// Invariants:
/// - `value` is `None` until the first successful login, and again after
///   a failed login or a logout.
/// - `issued_at` is always `Some` when `value` is `Some`.
#[derive(Debug, Clone, Default)]
pub struct BearerToken {
    value: Option<String>,
    expires_in: u64,
    issued_at: Option<Instant>,
    status: Option<u16>,
    fail_reason: Option<String>,
}

impl BearerToken {
    fn issued(value: String, expires_in: u64, status: u16) -> Self {
        BearerToken {
            value: Some(value),
            expires_in,
            issued_at: Some(Instant::now()),
            status: Some(status),
            fail_reason: None,
        }
    }

    fn failed(status: u16, reason: Option<String>) -> Self {
        BearerToken {
            status: Some(status),
            fail_reason: reason,
            ..BearerToken::default()
        }
    }

    /// Token value, stale or not.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Lifetime reported by the token endpoint, in seconds.
    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    /// Status code of the last token request.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// First error message returned by the last failed token request.
    pub fn fail_reason(&self) -> Option<&str> {
        self.fail_reason.as_deref()
    }

    /// `true` when no token was issued, or when `elapsed >= expires_in -
    /// renew_window`.
    pub fn is_stale(&self, renew_window: u64) -> bool {
        match (&self.value, self.issued_at) {
            (Some(_), Some(issued)) => {
                let lifetime = self.expires_in.saturating_sub(renew_window);
                issued.elapsed().as_secs() >= lifetime
            }
            _ => true,
        }
    }
}

/// Manages OAuth2 token acquisition, caching and revocation.
pub struct TokenProvider {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    style: AuthStyle,
    token: BearerToken,
    renew_window: u64,
    sanitize_log: bool,
    debug_record_count: usize,
}

impl TokenProvider {
    fn with_style(style: AuthStyle, credentials: Option<Credentials>) -> Self {
        TokenProvider {
            client: reqwest::Client::new(),
            base_url: Region::Us1.base_url(),
            credentials,
            style,
            token: BearerToken::default(),
            renew_window: MIN_RENEW_WINDOW_SECS,
            sanitize_log: true,
            debug_record_count: MAX_DEBUG_RECORDS,
        }
    }

    /// Provider for explicit API client credentials.
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        if client_id.is_empty() || client_secret.is_empty() {
            tracing::warn!("no authentication mechanism has been specified");
            return Self::with_style(AuthStyle::None, None);
        }
        Self::with_style(
            AuthStyle::Credentials,
            Some(Credentials {
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
                member_cid: None,
            }),
        )
    }

    /// Provider reading `<prefix>CLIENT_ID` and `<prefix>CLIENT_SECRET`.
    /// `None` uses [`DEFAULT_ENV_PREFIX`].
    pub fn from_env(prefix: Option<&str>) -> Self {
        let prefix = prefix.unwrap_or(DEFAULT_ENV_PREFIX);
        let id = std::env::var(format!("{prefix}CLIENT_ID")).unwrap_or_default();
        let secret = std::env::var(format!("{prefix}CLIENT_SECRET")).unwrap_or_default();
        let mut provider = Self::new(&id, &secret);
        if provider.style == AuthStyle::Credentials {
            provider.style = AuthStyle::Environment;
        }
        provider
    }

    /// Creates a `TokenProvider` with a pre-issued token.
    ///
    /// The token is treated as freshly acquired with the standard Falcon
    /// lifetime and is never refreshed. Also used by tests to avoid real
    /// HTTP calls during token acquisition.
    pub fn with_token(token: &str) -> Self {
        let mut provider = Self::with_style(AuthStyle::Token, None);
        provider.token = BearerToken::issued(token.to_string(), LEGACY_TOKEN_TTL_SECS, 201);
        provider
    }

    /// Authenticates against child CID `member_cid` (MSSP).
    pub fn with_member_cid(mut self, member_cid: &str) -> Self {
        if let Some(creds) = self.credentials.as_mut() {
            creds.member_cid = Some(member_cid.to_string());
        }
        self
    }

    /// Applies connection settings from `config`: base URL, renew window,
    /// log sanitization and the HTTP client used for token calls.
    pub fn configure(&mut self, config: &ClientConfig) -> Result<()> {
        self.client = config.build_auth_client()?;
        self.base_url = config.base_url.trim_end_matches('/').to_string();
        self.renew_window = clamp_renew_window(config.renew_window);
        self.sanitize_log = config.sanitize_log;
        self.debug_record_count = config.debug_record_count;
        Ok(())
    }

    /// How this provider authenticates.
    pub fn style(&self) -> AuthStyle {
        self.style
    }

    /// Configured credentials, if any.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Current base URL. Changes after a login when region autodiscovery
    /// moves the client to another cloud.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The cached token and last token status.
    pub fn bearer(&self) -> &BearerToken {
        &self.token
    }

    /// Seconds before expiry at which the token is renewed.
    pub fn renew_window(&self) -> u64 {
        self.renew_window
    }

    /// Sets the renew window, clamped to `[120, 1200]` seconds.
    pub fn set_renew_window(&mut self, secs: u64) {
        self.renew_window = clamp_renew_window(secs);
    }

    /// `true` when the provider can obtain new tokens.
    pub fn refreshable(&self) -> bool {
        matches!(self.style, AuthStyle::Credentials | AuthStyle::Environment)
    }

    /// `true` when the next request should log in first.
    pub fn needs_login(&self) -> bool {
        self.refreshable() && self.token.is_stale(self.renew_window)
    }

    /// Returns the cached access token, or `None` if no token exists or
    /// the token is stale and can be refreshed.
    pub fn token(&self) -> Option<&str> {
        if self.needs_login() {
            return None;
        }
        self.token.value()
    }

    /// Drops the cached token so the next request logs in again.
    pub fn invalidate(&mut self) {
        self.token = BearerToken::default();
    }

    /// Requests a new token and caches it.
    ///
    /// Returns the normalized envelope of the token call whether or not the
    /// API accepted the credentials; only a 201 updates the cached token.
    /// On failure the cached token is cleared and the status and first
    /// error message are kept as the fail reason.
    pub async fn login(&mut self) -> Result<ApiResponse> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or(FalconError::NoAuthentication)?;
        let form = TokenRequest {
            client_id: &creds.client_id,
            client_secret: &creds.client_secret,
            member_cid: creds.member_cid.as_deref(),
        };

        tracing::debug!(operation = "oauth2AccessToken", "requesting token");
        let url = format!("{}{}", self.base_url, TOKEN_ROUTE);
        let response = self.client.post(&url).form(&form).send().await?;
        let envelope = ApiResponse::from_reqwest(response).await?;
        self.log_envelope(&envelope);

        if envelope.status_code == 201 {
            let issued: TokenResponse = envelope.json().map_err(|e| FalconError::Auth {
                message: "token response missing access_token".to_string(),
                source: Some(Box::new(e)),
            })?;
            self.token = BearerToken::issued(issued.access_token, issued.expires_in, 201);
            self.base_url = autodiscover(&self.base_url, envelope.header("x-cs-region"));
        } else {
            let reason = envelope.first_error_message().map(str::to_owned);
            tracing::error!(
                status = envelope.status_code,
                reason = reason.as_deref().unwrap_or(""),
                "token request failed"
            );
            self.token = BearerToken::failed(envelope.status_code, reason);
        }

        Ok(envelope)
    }

    /// Revokes the cached token and clears it.
    pub async fn logout(&mut self) -> Result<ApiResponse> {
        let token = self.token.value().unwrap_or_default().to_string();
        let envelope = self.revoke(&token).await?;
        self.token = BearerToken::default();
        Ok(envelope)
    }

    /// Revokes an arbitrary token without touching the cached one.
    pub async fn revoke(&self, token: &str) -> Result<ApiResponse> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or(FalconError::NoAuthentication)?;
        let form = RevokeRequest {
            token,
            client_id: &creds.client_id,
        };

        tracing::debug!(operation = "oauth2RevokeToken", "revoking token");
        let url = format!("{}{}", self.base_url, REVOKE_ROUTE);
        let response = self
            .client
            .post(&url)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .form(&form)
            .send()
            .await?;
        let envelope = ApiResponse::from_reqwest(response).await?;
        self.log_envelope(&envelope);
        Ok(envelope)
    }

    /// Logs in to child tenant `member_cid`. Returns `true` on a 201.
    pub async fn child_login(&mut self, member_cid: &str) -> Result<bool> {
        if member_cid.is_empty() {
            return Ok(false);
        }
        let creds = self
            .credentials
            .as_mut()
            .ok_or(FalconError::NoAuthentication)?;
        creds.member_cid = Some(member_cid.to_string());
        Ok(self.login().await?.status_code == 201)
    }

    /// Leaves the child tenant. With `login_as_parent` the provider logs in
    /// again without a member CID; otherwise the child token is revoked.
    pub async fn child_logout(&mut self, login_as_parent: bool) -> Result<bool> {
        let creds = self
            .credentials
            .as_mut()
            .ok_or(FalconError::NoAuthentication)?;
        creds.member_cid = None;
        if login_as_parent {
            Ok(self.login().await?.status_code == 201)
        } else {
            Ok(self.logout().await?.is_success())
        }
    }

    fn log_envelope(&self, envelope: &ApiResponse) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let value = envelope.to_value();
        let logged = if self.sanitize_log {
            sanitize_value(&value, self.debug_record_count)
        } else {
            value
        };
        tracing::debug!(status = envelope.status_code, result = %logged, "token endpoint response");
    }
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("base_url", &self.base_url)
            .field("style", &self.style)
            .field("credentials", &self.credentials)
            .field("token_status", &self.token.status)
            .field("renew_window", &self.renew_window)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn token_is_none_before_login() {
        let tp = TokenProvider::new("client", "secret");
        assert!(tp.token().is_none(), "token must be None before any login");
        assert!(tp.needs_login());
        assert_eq!(tp.style(), AuthStyle::Credentials);
    }

    #[test]
    fn missing_credentials_mean_no_authentication() {
        let tp = TokenProvider::new("", "");
        assert_eq!(tp.style(), AuthStyle::None);
        assert!(!tp.refreshable());
        assert!(!tp.needs_login());
        assert!(tp.token().is_none());
    }

    #[test]
    fn token_request_serializes_as_form() {
        let req = TokenRequest {
            client_id: "cid",
            client_secret: "secret~value",
            member_cid: None,
        };
        let encoded = serde_urlencoded::to_string(&req).unwrap();
        assert_eq!(encoded, "client_id=cid&client_secret=secret%7Evalue");

        let child = TokenRequest {
            client_id: "cid",
            client_secret: "s",
            member_cid: Some("child-cid"),
        };
        let encoded = serde_urlencoded::to_string(&child).unwrap();
        assert!(encoded.ends_with("&member_cid=child-cid"));
    }

    #[test]
    fn token_response_deserializes_from_falcon_format() {
        let json = r#"{
            "access_token": "eyJ0eXAi.test.token",
            "token_type": "bearer",
            "expires_in": 1799
        }"#;
        let resp: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.access_token, "eyJ0eXAi.test.token");
        assert_eq!(resp.token_type.as_deref(), Some("bearer"));
        assert_eq!(resp.expires_in, 1799);
    }

    #[test]
    fn legacy_token_is_fresh_and_not_refreshable() {
        let tp = TokenProvider::with_token("test-token");
        assert_eq!(tp.token(), Some("test-token"));
        assert_eq!(tp.bearer().expires_in(), 1799);
        assert_eq!(tp.bearer().status(), Some(201));
        assert!(!tp.refreshable());
    }

    #[test]
    fn stale_legacy_token_is_still_returned() {
        let mut tp = TokenProvider::with_token("test-token");
        tp.token.issued_at = Some(Instant::now() - Duration::from_secs(7200));
        assert!(tp.bearer().is_stale(tp.renew_window()));
        assert_eq!(tp.token(), Some("test-token"));
    }

    #[test]
    fn token_inside_renew_window_is_stale() {
        // expires_in=1799 with a 120s window gives an effective lifetime of
        // 1679s. After 1680s the token must be renewed.
        let token = BearerToken {
            issued_at: Some(Instant::now() - Duration::from_secs(1680)),
            ..BearerToken::issued("t".into(), 1799, 201)
        };
        assert!(token.is_stale(120));
    }

    #[test]
    fn token_before_renew_window_is_fresh() {
        let token = BearerToken {
            issued_at: Some(Instant::now() - Duration::from_secs(60)),
            ..BearerToken::issued("t".into(), 1799, 201)
        };
        assert!(!token.is_stale(120));
        // A wider window makes the same token stale sooner.
        let old = BearerToken {
            issued_at: Some(Instant::now() - Duration::from_secs(700)),
            ..BearerToken::issued("t".into(), 1799, 201)
        };
        assert!(!old.is_stale(120));
        assert!(old.is_stale(1200));
    }

    #[test]
    fn refreshable_provider_hides_stale_token() {
        let mut tp = TokenProvider::new("client", "secret");
        tp.token = BearerToken {
            issued_at: Some(Instant::now() - Duration::from_secs(1700)),
            ..BearerToken::issued("old".into(), 1799, 201)
        };
        assert!(tp.needs_login());
        assert!(tp.token().is_none());
    }

    #[test]
    fn renew_window_is_clamped() {
        let mut tp = TokenProvider::new("client", "secret");
        tp.set_renew_window(10);
        assert_eq!(tp.renew_window(), 120);
        tp.set_renew_window(5000);
        assert_eq!(tp.renew_window(), 1200);
        tp.set_renew_window(600);
        assert_eq!(tp.renew_window(), 600);
    }

    #[test]
    fn member_cid_is_attached_to_credentials() {
        let tp = TokenProvider::new("client", "secret").with_member_cid("child");
        assert_eq!(
            tp.credentials().unwrap().member_cid.as_deref(),
            Some("child")
        );
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let tp = TokenProvider::new("client", "super-secret");
        let rendered = format!("{tp:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn invalidate_clears_the_token() {
        let mut tp = TokenProvider::with_token("tok");
        tp.invalidate();
        assert!(tp.token().is_none());
    }
}
