//! The operation catalog: operation ID → method, route and parameters.
//!
//! Operations are described in a TOML manifest. The crate embeds
//! `manifest/endpoints.toml` at compile time ([`Catalog::builtin`]); callers
//! that need operations the embedded manifest doesn't cover can load their
//! own with [`Catalog::from_toml_str`] or [`Catalog::from_file`].
//!
//! ```toml
//! [meta]
//! schema_version = 1
//! last_validated = "2026-10-01"
//!
//! [[operations]]
//! id = "QueryDevicesByFilter"
//! method = "GET"
//! route = "/devices/queries/devices/v1"
//! collection = "hosts"
//! description = "Search for hosts in your environment."
//! params = [
//!   { name = "limit", location = "query", kind = "integer" },
//!   { name = "filter", location = "query", kind = "string" },
//! ]
//! ```
//!
//! Routes use `{name}` placeholders for path parameters.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use reqwest::Method;
use serde::Deserialize;

use crate::error::{FalconError, Result};

const BUILTIN_MANIFEST: &str = include_str!("../manifest/endpoints.toml");

/// HTTP methods the dispatcher is willing to send.
pub const ALLOWED_METHODS: [&str; 6] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// Where a parameter travels in the HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    /// Query string.
    Query,
    /// JSON body.
    Body,
    /// Route placeholder.
    Path,
    /// Form or multipart field.
    Form,
    /// HTTP header.
    Header,
}

/// Declared JSON type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Free-form string (also FQL filters and sort expressions).
    #[default]
    String,
    /// Whole number.
    Integer,
    /// Floating point number.
    Number,
    /// `true` / `false`.
    Boolean,
    /// Repeated value; comma-delimited strings are split.
    Array,
    /// JSON object.
    Object,
}

/// One parameter accepted by an operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParamSpec {
    /// Parameter name as sent on the wire.
    pub name: String,
    /// Where the parameter goes.
    pub location: ParamLocation,
    /// Declared type.
    #[serde(default)]
    pub kind: ParamKind,
    /// Whether the API rejects requests without it.
    #[serde(default)]
    pub required: bool,
}

/// A single API operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Operation {
    /// Vendor-assigned operation ID (e.g. `QueryDevicesByFilter`).
    pub id: String,
    /// HTTP method, uppercase.
    pub method: String,
    /// Route relative to the base URL, starting with `/`.
    pub route: String,
    /// Service collection the operation belongs to (e.g. `hosts`).
    #[serde(default)]
    pub collection: String,
    /// One-line summary.
    #[serde(default)]
    pub description: String,
    /// When set, `ids` supplied to the request are sent in the JSON body
    /// instead of the query string.
    #[serde(default)]
    pub ids_in_body: bool,
    /// Accepted parameters.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl Operation {
    /// Parsed HTTP method. Fails for anything outside [`ALLOWED_METHODS`].
    pub fn http_method(&self) -> Result<Method> {
        parse_method(&self.method)
    }

    /// The query-string parameter called `name`, if the operation has one.
    pub fn query_param(&self, name: &str) -> Option<&ParamSpec> {
        self.params
            .iter()
            .find(|p| p.name == name && p.location == ParamLocation::Query)
    }
}

/// Parses and checks an HTTP method name.
pub fn parse_method(method: &str) -> Result<Method> {
    let upper = method.trim().to_ascii_uppercase();
    if !ALLOWED_METHODS.contains(&upper.as_str()) {
        return Err(FalconError::InvalidMethod(method.to_string()));
    }
    Method::from_bytes(upper.as_bytes()).map_err(|_| FalconError::InvalidMethod(method.to_string()))
}

/// Manifest metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestMeta {
    /// Manifest schema version (currently 1).
    pub schema_version: u32,
    /// Date the routes were last checked against the vendor's API.
    pub last_validated: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    meta: ManifestMeta,
    operations: Vec<Operation>,
}

/// Field to search on in [`Catalog::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBy {
    /// Operation ID.
    Id,
    /// Service collection name.
    Collection,
    /// Route.
    Route,
}

/// An indexed set of operations.
#[derive(Debug, Clone)]
pub struct Catalog {
    meta: ManifestMeta,
    operations: Vec<Operation>,
    by_id: HashMap<String, usize>,
}

impl Catalog {
    /// The catalog embedded in the crate. Parsed once, on first use.
    ///
    /// Returns an error only if the embedded manifest is invalid, which
    /// the manifest validation tests guard against.
    pub fn builtin() -> Result<&'static Catalog> {
        static BUILTIN: OnceLock<std::result::Result<Catalog, String>> = OnceLock::new();
        BUILTIN
            .get_or_init(|| Catalog::from_toml_str(BUILTIN_MANIFEST).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| FalconError::Config(format!("embedded endpoint manifest: {e}")))
    }

    /// Parses and validates a manifest document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let manifest: Manifest = toml::from_str(content)?;
        Self::from_operations(manifest.meta, manifest.operations)
    }

    /// Reads, parses and validates a manifest file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    fn from_operations(meta: ManifestMeta, operations: Vec<Operation>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(operations.len());
        for (index, op) in operations.iter().enumerate() {
            if op.id.is_empty() {
                return Err(FalconError::Config(format!(
                    "operation #{index} has an empty id"
                )));
            }
            if !op.route.starts_with('/') {
                return Err(FalconError::Config(format!(
                    "operation '{}' route must start with '/'",
                    op.id
                )));
            }
            op.http_method().map_err(|_| {
                FalconError::Config(format!(
                    "operation '{}' has invalid method '{}'",
                    op.id, op.method
                ))
            })?;
            if by_id.insert(op.id.clone(), index).is_some() {
                return Err(FalconError::Config(format!(
                    "duplicate operation id '{}'",
                    op.id
                )));
            }
        }
        Ok(Catalog {
            meta,
            operations,
            by_id,
        })
    }

    /// Manifest metadata.
    pub fn meta(&self) -> &ManifestMeta {
        &self.meta
    }

    /// All operations in manifest order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Exact lookup by operation ID.
    pub fn get(&self, id: &str) -> Result<&Operation> {
        self.by_id
            .get(id)
            .map(|&i| &self.operations[i])
            .ok_or_else(|| FalconError::InvalidOperation(id.to_string()))
    }

    /// Sorted, de-duplicated collection names.
    pub fn collections(&self) -> Vec<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut names: Vec<&str> = self
            .operations
            .iter()
            .map(|op| op.collection.as_str())
            .filter(|c| seen.insert(*c))
            .collect();
        names.sort_unstable();
        names
    }

    /// Searches the catalog.
    ///
    /// With `exact`, IDs and routes must match exactly and collections
    /// match case-insensitively. Without it, `term` is a case-insensitive
    /// substring. An empty result is an `InvalidOperation` error.
    pub fn find(&self, term: &str, by: SearchBy, exact: bool) -> Result<Vec<&Operation>> {
        let needle = term.to_ascii_lowercase();
        let matches: Vec<&Operation> = self
            .operations
            .iter()
            .filter(|op| {
                let field = match by {
                    SearchBy::Id => &op.id,
                    SearchBy::Collection => &op.collection,
                    SearchBy::Route => &op.route,
                };
                match (exact, by) {
                    (true, SearchBy::Collection) => field.eq_ignore_ascii_case(term),
                    (true, _) => field == term,
                    (false, _) => field.to_ascii_lowercase().contains(&needle),
                }
            })
            .collect();

        if matches.is_empty() {
            return Err(FalconError::InvalidOperation(term.to_string()));
        }
        Ok(matches)
    }
}
