//! Authenticated dispatcher for the CrowdStrike Falcon API.
//!
//! `FalconClient` wraps a `reqwest::Client`, the operation [`Catalog`] and a
//! [`TokenProvider`] behind a `Mutex`. Every call goes through the same path:
//!
//! 1. resolve the [`Request`] against the catalog,
//! 2. make sure a usable bearer token is cached,
//! 3. send the HTTP request,
//! 4. normalize the response into an [`ApiResponse`].
//!
//! Token lifecycle:
//! - Lazy acquisition: the first request finds no cached token and logs in.
//! - Expiry-aware: a token inside its renew window is replaced before the
//!   request is sent. Caller-supplied tokens are never refreshed.
//! - A rejected login short-circuits the call: the token endpoint's
//!   envelope is returned as the call's result.
//!
//! There is no retry. A 401 from an API route is returned like any other
//! status.

use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::auth::TokenProvider;
use crate::catalog::Catalog;
use crate::config::ClientConfig;
use crate::error::{FalconError, Result};
use crate::request::{PreparedRequest, Request};
use crate::response::ApiResponse;
use crate::sanitize::{sanitize_headers, sanitize_value};

/// Header carrying the SDK identifier on every API call.
const SDK_HEADER: &str = "CrowdStrike-SDK";

/// Outcome of the pre-request token check.
enum Authorization {
    Granted { token: String, base_url: String },
    Denied(ApiResponse),
}

/// Authenticated HTTP client for the Falcon REST API.
///
/// Design decisions:
/// - `auth` is behind a `Mutex` because `login()` requires `&mut self`
///   while API methods only need `&self`. The lock is held for the token
///   check and, when needed, the login round-trip; never across an API
///   call.
/// - The base URL lives in the provider because region autodiscovery
///   rewrites it after a login.
pub struct FalconClient {
    http: reqwest::Client,
    catalog: Arc<Catalog>,
    config: ClientConfig,
    auth: Mutex<TokenProvider>,
}

impl FalconClient {
    /// Client using `config` and the embedded catalog.
    pub fn new(mut auth: TokenProvider, config: ClientConfig) -> Result<Self> {
        auth.configure(&config)?;
        Ok(FalconClient {
            http: config.build_api_client()?,
            catalog: Arc::new(Catalog::builtin()?.clone()),
            config,
            auth: Mutex::new(auth),
        })
    }

    /// Constructor that accepts a custom base URL, used by tests to point
    /// at a local mock server instead of a Falcon cloud.
    pub fn with_base_url(auth: TokenProvider, base_url: &str) -> Result<Self> {
        let config = ClientConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..ClientConfig::default()
        };
        Self::new(auth, config)
    }

    /// Replaces the operation catalog.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// The operation catalog in use.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current base URL (after any region autodiscovery).
    pub async fn base_url(&self) -> String {
        self.auth.lock().await.base_url().to_string()
    }

    /// Logs in explicitly. Returns the token endpoint's envelope.
    pub async fn login(&self) -> Result<ApiResponse> {
        self.auth.lock().await.login().await
    }

    /// Revokes the cached token.
    pub async fn logout(&self) -> Result<ApiResponse> {
        self.auth.lock().await.logout().await
    }

    /// Revokes an arbitrary token.
    pub async fn revoke(&self, token: &str) -> Result<ApiResponse> {
        self.auth.lock().await.revoke(token).await
    }

    /// Switches to child tenant `member_cid`. `true` on success.
    pub async fn child_login(&self, member_cid: &str) -> Result<bool> {
        self.auth.lock().await.child_login(member_cid).await
    }

    /// Leaves the child tenant, optionally logging back in as the parent.
    pub async fn child_logout(&self, login_as_parent: bool) -> Result<bool> {
        self.auth.lock().await.child_logout(login_as_parent).await
    }

    /// Runs `request` and always returns an envelope.
    ///
    /// SDK-side failures become synthetic envelopes: unknown operation
    /// (418), bad method (405), invalid arguments (400), transport errors
    /// (500). Vendor responses are returned as received.
    pub async fn command(&self, request: &Request) -> ApiResponse {
        match self.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(operation = request.operation_id(), error = %err, "request failed");
                ApiResponse::from_error(&err)
            }
        }
    }

    /// Runs `request`, surfacing SDK-side failures as errors. Vendor error
    /// statuses are still returned as envelopes.
    pub async fn execute(&self, request: &Request) -> Result<ApiResponse> {
        let prepared = request.prepare(&self.catalog)?;
        let (token, base_url) = match self.authorize().await? {
            Authorization::Granted { token, base_url } => (token, base_url),
            Authorization::Denied(envelope) => return Ok(envelope),
        };

        let http_request = self.build_request(&prepared, &base_url, &token)?;
        let response = self.http.execute(http_request).await?;
        let envelope = ApiResponse::from_reqwest(response).await?;
        self.log_response(&prepared, &envelope);
        Ok(envelope)
    }

    /// Runs `request` and deserializes a successful JSON body into `T`.
    /// Statuses `>= 400` become `FalconError::Api`.
    pub async fn call<T: DeserializeOwned>(&self, request: &Request) -> Result<T> {
        self.execute(request).await?.into_result()?.json()
    }

    /// Runs `request` and hands back the raw response for streaming
    /// downloads (installers, extracted files, sample archives).
    pub async fn stream(&self, request: &Request) -> Result<reqwest::Response> {
        let prepared = request.prepare(&self.catalog)?;
        let (token, base_url) = match self.authorize().await? {
            Authorization::Granted { token, base_url } => (token, base_url),
            Authorization::Denied(envelope) => return Err(denied_error(envelope)),
        };

        let http_request = self.build_request(&prepared, &base_url, &token)?;
        let response = self.http.execute(http_request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            tracing::error!(operation = %prepared.operation_id, status = status.as_u16(), "stream request failed");
            return Err(FalconError::Api { status, body });
        }
        Ok(response)
    }

    /// Returns a usable bearer token, logging in first if the cached token
    /// is absent or stale.
    async fn authorize(&self) -> Result<Authorization> {
        let mut auth = self.auth.lock().await;
        if auth.needs_login() {
            let envelope = auth.login().await?;
            if envelope.status_code != 201 {
                return Ok(Authorization::Denied(envelope));
            }
        }

        let token = auth
            .token()
            .map(str::to_owned)
            .ok_or(FalconError::NoAuthentication)?;
        Ok(Authorization::Granted {
            token,
            base_url: auth.base_url().to_string(),
        })
    }

    /// Constructs the authenticated HTTP request.
    ///
    /// Body precedence: multipart when files are attached (form fields ride
    /// along as text parts), urlencoded form data, then JSON. The
    /// `Content-Type` override is applied last so it wins over the one
    /// reqwest derives from the body.
    fn build_request(
        &self,
        prepared: &PreparedRequest,
        base_url: &str,
        token: &str,
    ) -> Result<reqwest::Request> {
        let url = format!("{base_url}{}", prepared.route);
        let mut builder = self
            .http
            .request(prepared.method.clone(), &url)
            .bearer_auth(token)
            .header(SDK_HEADER, &self.config.user_agent);
        if !prepared.query.is_empty() {
            builder = builder.query(&prepared.query);
        }
        for (name, value) in &prepared.headers {
            builder = builder.header(name, value);
        }

        if !prepared.files.is_empty() {
            let mut form = multipart::Form::new();
            for (name, value) in &prepared.data {
                form = form.text(name.clone(), value.clone());
            }
            for file in &prepared.files {
                let part = multipart::Part::bytes(file.content.to_vec())
                    .file_name(file.file_name.clone())
                    .mime_str(file.mime.as_deref().unwrap_or("application/octet-stream"))?;
                form = form.part(file.field.clone(), part);
            }
            builder = builder.multipart(form);
        } else if !prepared.data.is_empty() {
            builder = builder.form(&prepared.data);
        } else if let Some(body) = &prepared.body {
            builder = builder.json(body);
        }

        let mut request = builder.build()?;
        if let Some(content_type) = &prepared.content_type {
            let value = HeaderValue::from_str(content_type).map_err(|_| {
                FalconError::InvalidArgument(format!(
                    "content_type '{content_type}' is not a valid header value."
                ))
            })?;
            request.headers_mut().insert(CONTENT_TYPE, value);
        }

        self.log_request(prepared, &request);
        Ok(request)
    }

    fn log_request(&self, prepared: &PreparedRequest, request: &reqwest::Request) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let mut headers: Vec<(String, String)> = request
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        headers.push(("User-Agent".to_string(), self.config.user_agent.clone()));
        let body = prepared.body.clone().unwrap_or(Value::Null);
        let data: serde_json::Map<String, Value> = prepared
            .data
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect();

        let (headers, body, data) = if self.config.sanitize_log {
            let records = self.config.debug_record_count;
            (
                sanitize_headers(&headers),
                sanitize_value(&body, records),
                sanitize_value(&Value::Object(data), records),
            )
        } else {
            (headers, body, Value::Object(data))
        };

        tracing::debug!(
            operation = %prepared.operation_id,
            method = %prepared.method,
            endpoint = %request.url(),
            headers = ?headers,
            body = %body,
            data = %data,
            "sending request"
        );
    }

    fn log_response(&self, prepared: &PreparedRequest, envelope: &ApiResponse) {
        if !envelope.is_success() {
            tracing::error!(
                operation = %prepared.operation_id,
                status = envelope.status_code,
                message = envelope.first_error_message().unwrap_or(""),
                "API returned an error status"
            );
        }
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let value = envelope.to_value();
        let logged = if self.config.sanitize_log {
            sanitize_value(&value, self.config.debug_record_count)
        } else {
            value
        };
        tracing::debug!(operation = %prepared.operation_id, result = %logged, "received response");
    }
}

fn denied_error(envelope: ApiResponse) -> FalconError {
    match envelope.into_result() {
        Err(err) => err,
        Ok(envelope) => FalconError::Auth {
            message: format!("token request returned status {}", envelope.status_code),
            source: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::FilePart;
    use serde_json::json;

    fn client() -> FalconClient {
        FalconClient::with_base_url(TokenProvider::with_token("tok"), "http://localhost:9/")
            .unwrap()
    }

    #[test]
    fn with_base_url_strips_trailing_slash() {
        let c = client();
        assert_eq!(c.config().base_url, "http://localhost:9");
    }

    #[test]
    fn request_carries_auth_and_sdk_headers() {
        let c = client();
        let prepared = Request::new("QueryDevicesByFilter")
            .arg("limit", 1)
            .prepare(c.catalog())
            .unwrap();
        let req = c
            .build_request(&prepared, "http://localhost:9", "tok")
            .unwrap();
        assert_eq!(
            req.url().as_str(),
            "http://localhost:9/devices/queries/devices/v1?limit=1"
        );
        assert_eq!(req.headers()["authorization"], "Bearer tok");
        assert!(
            req.headers()[SDK_HEADER]
                .to_str()
                .unwrap()
                .starts_with("falcon-sdk/")
        );
    }

    #[test]
    fn content_type_override_wins() {
        let c = client();
        let prepared = Request::new("UpdateDeviceTags")
            .body(json!({"action": "add", "tags": ["FalconGroupingTags/x"]}))
            .content_type("application/vnd.falcon+json")
            .prepare(c.catalog())
            .unwrap();
        let req = c
            .build_request(&prepared, "http://localhost:9", "tok")
            .unwrap();
        let values: Vec<_> = req.headers().get_all(CONTENT_TYPE).iter().collect();
        assert_eq!(values, vec!["application/vnd.falcon+json"]);
    }

    #[test]
    fn files_switch_to_multipart() {
        let c = client();
        let prepared = Request::new("UploadSampleV3")
            .data([("file_name", "sample.exe"), ("comment", "test")])
            .file(FilePart::new("sample", "sample.exe", b"MZ".to_vec()))
            .prepare(c.catalog())
            .unwrap();
        let req = c
            .build_request(&prepared, "http://localhost:9", "tok")
            .unwrap();
        let ct = req.headers()[CONTENT_TYPE].to_str().unwrap();
        assert!(ct.starts_with("multipart/form-data; boundary="));
    }

    #[test]
    fn denied_login_becomes_api_error() {
        let envelope = ApiResponse::error("access denied, invalid client", 403, Default::default());
        let err = denied_error(envelope);
        assert_eq!(err.status_code(), 403);
    }
}
