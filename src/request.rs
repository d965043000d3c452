//! Dispatcher input: what to call and with which arguments.
//!
//! A [`Request`] names an operation (or a manual method + route) and carries
//! keyword arguments, a raw query map, ids, a JSON body, form data, files and
//! extra headers. [`Request::prepare`] resolves it against a [`Catalog`] into
//! a [`PreparedRequest`] that the client can send as-is.
//!
//! Keyword arguments are matched against the operation's declared query
//! parameters. Anything the operation doesn't declare is dropped, so callers
//! can pass a superset of arguments without tripping the API's validation.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use reqwest::Method;
use serde_json::{Map, Value};

use crate::catalog::{Catalog, ParamKind, ParamLocation, parse_method};
use crate::error::{FalconError, Result};

/// Operation ID reported for manual (override) requests.
pub const MANUAL_OPERATION: &str = "Manual";

#[derive(Debug, Clone)]
enum Target {
    Operation(String),
    Manual { method: String, route: String },
}

/// A file attached to a multipart upload.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// Form field name (e.g. `sample`, `file`).
    pub field: String,
    /// File name reported to the API.
    pub file_name: String,
    /// File content.
    pub content: Bytes,
    /// MIME type, `application/octet-stream` when unset.
    pub mime: Option<String>,
}

impl FilePart {
    /// Attaches `content` under form field `field` as `file_name`.
    pub fn new(field: &str, file_name: &str, content: impl Into<Bytes>) -> Self {
        FilePart {
            field: field.to_string(),
            file_name: file_name.to_string(),
            content: content.into(),
            mime: None,
        }
    }

    /// Sets the part's MIME type.
    pub fn mime(mut self, mime: &str) -> Self {
        self.mime = Some(mime.to_string());
        self
    }
}

/// Declared shape of a JSON body, checked before the request is sent.
#[derive(Debug, Clone, Default)]
pub struct BodyValidator {
    fields: BTreeMap<String, ParamKind>,
    required: Vec<String>,
}

impl BodyValidator {
    /// Empty validator: every key is unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an accepted key and its type.
    pub fn field(mut self, name: &str, kind: ParamKind) -> Self {
        self.fields.insert(name.to_string(), kind);
        self
    }

    /// Declares a key that must be present.
    pub fn require(mut self, name: &str) -> Self {
        self.required.push(name.to_string());
        self
    }

    /// Checks `body`: required keys first, then unknown keys, then types.
    pub fn validate(&self, body: &Map<String, Value>) -> Result<()> {
        for key in &self.required {
            if !body.contains_key(key) {
                return Err(FalconError::InvalidArgument(format!(
                    "Argument {key} must be specified."
                )));
            }
        }
        for (key, value) in body {
            let Some(kind) = self.fields.get(key) else {
                return Err(FalconError::InvalidArgument(format!(
                    "{key} is not a valid argument."
                )));
            };
            if !kind_matches(*kind, value) {
                return Err(FalconError::InvalidArgument(format!(
                    "{key} is not the valid type. Should be: {kind:?}, was {}",
                    json_type_name(value)
                )));
            }
        }
        Ok(())
    }
}

fn kind_matches(kind: ParamKind, value: &Value) -> bool {
    match kind {
        ParamKind::String => value.is_string(),
        ParamKind::Integer => value.is_i64() || value.is_u64(),
        ParamKind::Number => value.is_number(),
        ParamKind::Boolean => value.is_boolean(),
        ParamKind::Array => value.is_array(),
        ParamKind::Object => value.is_object(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One API call, before it is resolved against the catalog.
#[derive(Debug, Clone)]
pub struct Request {
    target: Target,
    args: BTreeMap<String, Value>,
    parameters: Map<String, Value>,
    ids: Option<Vec<String>>,
    body: Option<Value>,
    validator: Option<BodyValidator>,
    data: Vec<(String, String)>,
    files: Vec<FilePart>,
    headers: Vec<(String, String)>,
    content_type: Option<String>,
    path_args: HashMap<String, String>,
}

impl Request {
    /// Request for a catalog operation, by operation ID.
    pub fn new(operation_id: &str) -> Self {
        Self::with_target(Target::Operation(operation_id.to_string()))
    }

    /// Request for an arbitrary method and route, bypassing the catalog.
    ///
    /// Keyword arguments are not mapped for manual requests; use
    /// [`Request::parameters`] for the query string.
    pub fn manual(method: &str, route: &str) -> Self {
        Self::with_target(Target::Manual {
            method: method.to_string(),
            route: route.to_string(),
        })
    }

    fn with_target(target: Target) -> Self {
        Request {
            target,
            args: BTreeMap::new(),
            parameters: Map::new(),
            ids: None,
            body: None,
            validator: None,
            data: Vec::new(),
            files: Vec::new(),
            headers: Vec::new(),
            content_type: None,
            path_args: HashMap::new(),
        }
    }

    /// Operation ID, or `Manual` for override requests.
    pub fn operation_id(&self) -> &str {
        match &self.target {
            Target::Operation(id) => id,
            Target::Manual { .. } => MANUAL_OPERATION,
        }
    }

    /// Adds a keyword argument. Replaces an earlier value of the same name.
    pub fn arg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.args.insert(name.to_string(), value.into());
        self
    }

    /// Raw query parameters, sent without matching against the operation.
    /// Keyword arguments of the same name take precedence.
    pub fn parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Record ids. Sent in the body for operations flagged `ids_in_body`,
    /// in the query string otherwise.
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// JSON body.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Validates the JSON body against `validator` before sending.
    pub fn validate_body(mut self, validator: BodyValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Adds form fields.
    pub fn data<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.data
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Attaches a file; the request is sent as multipart.
    pub fn file(mut self, part: FilePart) -> Self {
        self.files.push(part);
        self
    }

    /// Adds a request header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Overrides the `Content-Type` header.
    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// Value for a `{name}` route placeholder.
    pub fn path_arg(mut self, name: &str, value: impl ToString) -> Self {
        self.path_args.insert(name.to_string(), value.to_string());
        self
    }

    /// Sets a paging parameter (`offset`, `after`, `limit`). Manual requests
    /// receive it as a raw query parameter.
    pub(crate) fn set_query_value(&mut self, name: &str, value: Value) {
        match self.target {
            Target::Operation(_) => {
                self.args.insert(name.to_string(), value);
            }
            Target::Manual { .. } => {
                self.parameters.insert(name.to_string(), value);
            }
        }
    }

    /// Current value of a paging parameter set with [`Request::arg`] (or
    /// [`Request::parameters`] for manual requests).
    pub(crate) fn query_value(&self, name: &str) -> Option<&Value> {
        match self.target {
            Target::Operation(_) => self.args.get(name),
            Target::Manual { .. } => self.parameters.get(name),
        }
    }

    /// `true` when `name` reaches the query string: the operation declares
    /// it as a query parameter, or the request is manual.
    pub(crate) fn accepts_query(&self, catalog: &Catalog, name: &str) -> Result<bool> {
        match &self.target {
            Target::Operation(id) => Ok(catalog.get(id)?.query_param(name).is_some()),
            Target::Manual { .. } => Ok(true),
        }
    }

    /// Resolves the request against `catalog`.
    pub fn prepare(&self, catalog: &Catalog) -> Result<PreparedRequest> {
        let mut query: BTreeMap<String, (Value, ParamKind)> = self
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), (v.clone(), ParamKind::Array)))
            .collect();
        let mut body = self.body.clone();

        let (operation_id, method, route) = match &self.target {
            Target::Operation(id) => {
                let op = catalog.get(id)?;
                tracing::debug!(operation = %op.id, "resolving operation");

                let mut args = self.args.clone();
                if let Some(ids) = &self.ids {
                    if op.ids_in_body {
                        body = Some(move_ids_into_body(body, ids));
                    } else {
                        args.insert("ids".to_string(), Value::from(ids.clone()));
                    }
                }
                if op.ids_in_body {
                    split_body_id_string(&mut body);
                }

                for (name, value) in args {
                    let declared = op.params.iter().find(|p| p.name == name);
                    match declared {
                        Some(param) if param.location == ParamLocation::Query => {
                            let value = match (param.kind, value) {
                                (ParamKind::Array, Value::String(s)) => {
                                    Value::from(s.split(',').collect::<Vec<_>>())
                                }
                                (_, value) => value,
                            };
                            warn_if_url_encoded(&name, &value);
                            query.insert(name, (value, param.kind));
                        }
                        Some(_) => {}
                        None => {
                            tracing::debug!(
                                operation = %op.id,
                                argument = %name,
                                "dropping argument the operation does not accept"
                            );
                        }
                    }
                }

                let route = fill_route(&op.route, &self.path_args, &self.args)?;
                (op.id.clone(), op.http_method()?, route)
            }
            Target::Manual { method, route } => {
                let method = parse_method(method)?;
                if let Some(ids) = &self.ids {
                    query.insert(
                        "ids".to_string(),
                        (Value::from(ids.clone()), ParamKind::Array),
                    );
                }
                if !self.args.is_empty() {
                    tracing::debug!("keyword arguments are ignored for manual requests");
                }
                let route = fill_route(route, &self.path_args, &BTreeMap::new())?;
                (MANUAL_OPERATION.to_string(), method, route)
            }
        };

        if let Some(validator) = &self.validator {
            let empty = Map::new();
            let fields = match &body {
                Some(Value::Object(map)) => map,
                Some(_) => {
                    return Err(FalconError::InvalidArgument(
                        "body is not the valid type. Should be: Object".to_string(),
                    ));
                }
                None => &empty,
            };
            validator.validate(fields)?;
        }

        let mut flat = Vec::new();
        for (name, (value, kind)) in query {
            push_query(&mut flat, &name, &value, kind);
        }

        Ok(PreparedRequest {
            operation_id,
            method,
            route,
            query: flat,
            body,
            data: self.data.clone(),
            files: self.files.clone(),
            headers: self.headers.clone(),
            content_type: self.content_type.clone(),
        })
    }
}

fn move_ids_into_body(body: Option<Value>, ids: &[String]) -> Value {
    let mut body = match body {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let has_ids = match body.get("ids") {
        None | Some(Value::Null) => false,
        Some(Value::Array(ids)) => !ids.is_empty(),
        Some(Value::String(ids)) => !ids.is_empty(),
        Some(_) => true,
    };
    if !has_ids {
        body.insert("ids".to_string(), Value::from(ids.to_vec()));
    }
    Value::Object(body)
}

fn split_body_id_string(body: &mut Option<Value>) {
    let Some(Value::Object(map)) = body else {
        return;
    };
    if let Some(Value::String(joined)) = map.get("ids") {
        let split: Vec<Value> = joined.split(',').map(Value::from).collect();
        map.insert("ids".to_string(), Value::Array(split));
    }
}

fn warn_if_url_encoded(name: &str, value: &Value) {
    if let Value::String(s) = value {
        if s.contains("%3A") {
            tracing::warn!("{name} argument contains potentially urlencoded string of '{s}'.");
        }
    }
}

/// Replaces `{name}` placeholders in `route`. Path arguments win over
/// keyword arguments of the same name.
fn fill_route(
    route: &str,
    path_args: &HashMap<String, String>,
    args: &BTreeMap<String, Value>,
) -> Result<String> {
    let mut filled = String::with_capacity(route.len());
    let mut rest = route;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + close];
        let value = path_args
            .get(name)
            .cloned()
            .or_else(|| args.get(name).and_then(scalar_to_string))
            .ok_or_else(|| {
                FalconError::InvalidArgument(format!("Argument {name} must be specified."))
            })?;
        filled.push_str(&rest[..open]);
        filled.push_str(&value);
        rest = &rest[open + close + 1..];
    }
    filled.push_str(rest);
    Ok(filled)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Flattens one query value. Arrays repeat the key, except for string
/// parameters, which take a single comma-joined value.
fn push_query(out: &mut Vec<(String, String)>, name: &str, value: &Value, kind: ParamKind) {
    match value {
        Value::Array(items) if kind == ParamKind::String => {
            let joined: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            out.push((name.to_string(), joined.join(",")));
        }
        Value::Array(items) => {
            for item in items {
                if let Some(s) = scalar_to_string(item) {
                    out.push((name.to_string(), s));
                }
            }
        }
        other => {
            if let Some(s) = scalar_to_string(other) {
                out.push((name.to_string(), s));
            }
        }
    }
}

/// A request resolved against the catalog, ready to send.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// Operation ID, or `Manual`.
    pub operation_id: String,
    /// HTTP method.
    pub method: Method,
    /// Route with placeholders filled, relative to the base URL.
    pub route: String,
    /// Query string pairs, in sending order.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Form fields.
    pub data: Vec<(String, String)>,
    /// Multipart file parts.
    pub files: Vec<FilePart>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// `Content-Type` override.
    pub content_type: Option<String>,
}
