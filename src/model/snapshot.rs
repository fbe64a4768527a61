use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Stable pointer to a named schema definition, e.g. "#/components/schemas/PersonOut"
pub type SchemaRef = String;

/// Opaque API version identifier, e.g. "v1" or "2024-01-15"
pub type Version = String;

/// Raised when a request/response schema cannot be reduced to schema references.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(
        "schema {0} is not a reference (or union typed to references), \
         cannot detect schemas used for this endpoint"
    )]
    UnexpectedSchemaFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Put => "put",
            HttpMethod::Post => "post",
            HttpMethod::Delete => "delete",
            HttpMethod::Options => "options",
            HttpMethod::Head => "head",
            HttpMethod::Patch => "patch",
            HttpMethod::Trace => "trace",
        }
    }

    /// Parse a method name as it appears in HTTP requests (any casing).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Some(HttpMethod::Get),
            "put" => Some(HttpMethod::Put),
            "post" => Some(HttpMethod::Post),
            "delete" => Some(HttpMethod::Delete),
            "options" => Some(HttpMethod::Options),
            "head" => Some(HttpMethod::Head),
            "patch" => Some(HttpMethod::Patch),
            "trace" => Some(HttpMethod::Trace),
            _ => None,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for one request parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// The schema reference that owns this field, if any. Set when parameter
    /// models are flattened into individual query/path/cookie fields, so that
    /// field changes can be attributed back to their source schema.
    pub source: Option<String>,
    /// The JSON-schema fragment describing this field
    pub json_schema_specification: serde_json::Value,
    pub required: bool,
}

/// One HTTP method on one path, as it exists in a given snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathOperation {
    pub method: HttpMethod,
    /// Route template with {param} placeholders, e.g. "/persons/{person_id}"
    pub path: String,
    pub query_params: HashMap<String, FieldInfo>,
    pub path_params: HashMap<String, FieldInfo>,
    pub cookie_params: HashMap<String, FieldInfo>,
    /// Schema refs of the request body. More than one entry means a union body.
    pub request_body_schema: Vec<SchemaRef>,
    /// Schema refs of the response bodies, one per declared response model
    pub response_bodies: Vec<SchemaRef>,
    /// Stable identifier, unique per method+path within a snapshot. Used for
    /// rename detection across versions.
    pub operation_id: String,
    /// The full raw per-operation OpenAPI fragment. Anything not captured by
    /// the typed fields above (summaries, descriptions, parameter arrays) is
    /// diffed through this document.
    pub openapi_json: serde_json::Value,
}

/// A complete description of an API's operations and schemas at one point in time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiVersion {
    /// path -> operations on that path (at most one entry per method)
    pub path_operations: HashMap<String, Vec<PathOperation>>,
    /// schema ref -> raw JSON-schema object
    #[serde(default)]
    pub schema_definitions: HashMap<SchemaRef, serde_json::Value>,
}

impl ApiVersion {
    /// The empty snapshot that every migration chain springs from.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get_operation(&self, path: &str, method: HttpMethod) -> Option<&PathOperation> {
        self.path_operations
            .get(path)?
            .iter()
            .find(|op| op.method == method)
    }
}

/// Reduce a request/response schema fragment to the schema references it uses.
///
/// Snapshot builders must hand the delta engine bodies that ultimately resolve
/// to `$ref`s: a direct reference, an `anyOf` union of references, an array of
/// references, or a map object whose `additionalProperties` resolve to one.
pub fn schema_to_refs(schema: &serde_json::Value) -> Result<Vec<SchemaRef>, SnapshotError> {
    if let Some(reference) = schema.get("$ref").and_then(|r| r.as_str()) {
        return Ok(vec![reference.to_string()]);
    }
    if let Some(any_of) = schema.get("anyOf").and_then(|a| a.as_array()) {
        let mut refs = Vec::new();
        for member in any_of {
            refs.extend(schema_to_refs(member)?);
        }
        return Ok(refs);
    }
    if schema.get("type").and_then(|t| t.as_str()) == Some("array") {
        if let Some(items) = schema.get("items") {
            return schema_to_refs(items);
        }
    }
    if schema.get("type").and_then(|t| t.as_str()) == Some("object")
        && schema
            .get("properties")
            .map_or(true, |p| p.as_object().map_or(true, |m| m.is_empty()))
    {
        // dict object with no other properties
        if let Some(additional) = schema.get("additionalProperties") {
            if additional.is_object() {
                return schema_to_refs(additional);
            }
        }
    }
    Err(SnapshotError::UnexpectedSchemaFormat(schema.to_string()))
}
