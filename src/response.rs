//! The normalized response envelope.
//!
//! Every call made through the dispatcher yields an [`ApiResponse`]: the
//! HTTP status code, the response headers, and a body decoded according to
//! its content type. Falcon JSON bodies follow a common shape:
//!
//! ```json
//! {
//!   "meta": { "query_time": 0.01, "pagination": { "offset": 0, "limit": 100, "total": 2 } },
//!   "resources": [ ... ],
//!   "errors": [ { "code": 400, "message": "..." } ]
//! }
//! ```
//!
//! The envelope never interprets vendor payloads beyond these well-known
//! fields; everything else passes through untouched.

use std::collections::BTreeMap;

use bytes::Bytes;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{FalconError, Result};

/// Message used when a JSON response arrives with no content.
pub const NO_CONTENT_MESSAGE: &str = "No content was received for this request.";

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// `application/json`, or `text/plain` that parsed as JSON.
    Json(Value),
    /// `text/plain` that is not JSON.
    Text(String),
    /// Any other content type (installers, sample archives, reports).
    Binary(Bytes),
    /// No content at all.
    Empty,
}

/// Pagination block found at `meta.pagination`.
///
/// Falcon uses three schemes: numeric offsets, opaque string offsets
/// (scroll endpoints), and `after` tokens. `offset` is kept as raw JSON so
/// both offset styles survive.
#[derive(Debug, Clone, PartialEq)]
pub struct Pagination {
    /// Numeric or string offset of this page.
    pub offset: Option<Value>,
    /// Page size requested.
    pub limit: Option<u64>,
    /// Total number of matching records.
    pub total: Option<u64>,
    /// Continuation token for `after`-style pagination.
    pub after: Option<String>,
}

/// `{status_code, headers, body}` envelope returned by every operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code (synthetic for SDK-side failures).
    pub status_code: u16,
    /// Response headers, names lowercased. Repeated headers are joined
    /// with `", "`.
    pub headers: BTreeMap<String, String>,
    /// Decoded body.
    pub body: Body,
}

impl ApiResponse {
    /// Reads a `reqwest::Response` to completion and normalizes it.
    pub async fn from_reqwest(resp: reqwest::Response) -> Result<Self> {
        let status = resp.status().as_u16();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in resp.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        let bytes = resp.bytes().await?;
        Self::from_parts(status, headers, bytes)
    }

    /// Normalizes an already-read response. The body is decoded based on
    /// the `content-type` header.
    pub fn from_parts(
        status_code: u16,
        headers: BTreeMap<String, String>,
        bytes: Bytes,
    ) -> Result<Self> {
        let content_type = headers
            .get("content-type")
            .map(|ct| ct.to_ascii_lowercase())
            .unwrap_or_default();

        let body = if content_type.starts_with("application/json") {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                tracing::warn!("{NO_CONTENT_MESSAGE}");
                error_body(NO_CONTENT_MESSAGE)
            } else {
                Body::Json(serde_json::from_slice(&bytes)?)
            }
        } else if content_type.starts_with("text/plain") {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => Body::Json(value),
                Err(_) => Body::Text(String::from_utf8_lossy(&bytes).into_owned()),
            }
        } else if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Binary(bytes)
        };

        Ok(ApiResponse {
            status_code,
            headers,
            body,
        })
    }

    /// Synthetic error envelope:
    /// `{"errors": [{"message": ...}], "resources": []}`.
    pub fn error(message: &str, status_code: u16, headers: BTreeMap<String, String>) -> Self {
        ApiResponse {
            status_code,
            headers,
            body: error_body(message),
        }
    }

    /// Synthetic success envelope: `{"message": ..., "resources": []}`.
    pub fn ok(message: &str, status_code: u16) -> Self {
        ApiResponse {
            status_code,
            headers: BTreeMap::new(),
            body: Body::Json(json!({"message": message, "resources": []})),
        }
    }

    /// Folds an SDK error into an envelope.
    ///
    /// `Api` errors keep the vendor's status and, when it is JSON, the
    /// vendor's body verbatim. Every other error becomes the standard
    /// error body carrying the error text, with
    /// [`FalconError::status_code`] as status.
    pub fn from_error(err: &FalconError) -> Self {
        if let FalconError::Api { status, body } = err {
            let body = match serde_json::from_str::<Value>(body) {
                Ok(value) => Body::Json(value),
                Err(_) => error_body(body),
            };
            return ApiResponse {
                status_code: status.as_u16(),
                headers: BTreeMap::new(),
                body,
            };
        }
        ApiResponse::error(&err.to_string(), err.status_code(), BTreeMap::new())
    }

    /// `true` for status codes below 400.
    pub fn is_success(&self) -> bool {
        self.status_code < 400
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The JSON body, if the body is JSON.
    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Raw bytes, if the body is binary.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The `resources` array, or an empty slice.
    pub fn resources(&self) -> &[Value] {
        self.json_array("resources")
    }

    /// The `errors` array, or an empty slice.
    pub fn errors(&self) -> &[Value] {
        self.json_array("errors")
    }

    /// Message of the first entry in `errors`.
    pub fn first_error_message(&self) -> Option<&str> {
        self.errors()
            .first()
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
    }

    /// `meta.pagination`, if present.
    pub fn pagination(&self) -> Option<Pagination> {
        let page = self.json_body()?.get("meta")?.get("pagination")?;
        let offset = page.get("offset").filter(|v| !v.is_null()).cloned();
        Some(Pagination {
            offset,
            limit: page.get("limit").and_then(Value::as_u64),
            total: page.get("total").and_then(Value::as_u64),
            after: page
                .get("after")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        })
    }

    /// Converts a `>= 400` envelope into `FalconError::Api`, carrying the
    /// vendor's body verbatim.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match &self.body {
            Body::Json(value) => value.to_string(),
            Body::Text(text) => text.clone(),
            Body::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Body::Empty => String::new(),
        };
        Err(FalconError::Api { status, body })
    }

    /// Deserializes the JSON body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.body {
            Body::Json(value) => Ok(T::deserialize(value)?),
            Body::Text(text) => Ok(serde_json::from_str(text)?),
            _ => Ok(serde_json::from_value(Value::Null)?),
        }
    }

    /// The whole envelope as JSON. Binary bodies are summarized by size.
    pub fn to_value(&self) -> Value {
        let body = match &self.body {
            Body::Json(value) => value.clone(),
            Body::Text(text) => Value::String(text.clone()),
            Body::Binary(bytes) => Value::String(format!("<{} bytes of binary content>", bytes.len())),
            Body::Empty => Value::Null,
        };
        json!({
            "status_code": self.status_code,
            "headers": self.headers,
            "body": body,
        })
    }

    fn json_array(&self, key: &str) -> &[Value] {
        self.json_body()
            .and_then(|b| b.get(key))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn error_body(message: &str) -> Body {
    Body::Json(json!({"errors": [{"message": message}], "resources": []}))
}
