use serde_json::{Map, Value};
use thiserror::Error;

use crate::logic::chain::get_api_state_at_version;
use crate::model::{ApiVersion, LoadedMigration, Version};

#[derive(Debug, Error)]
pub enum VersionNotFoundError {
    #[error("no migrations found, cannot serve a versioned OpenAPI document")]
    NoMigrations,
    #[error("version '{0}' not found in migration chain")]
    UnknownVersion(String),
}

/// Project a reconstructed snapshot into a full OpenAPI document.
///
/// `paths` is rebuilt from each operation's stored openapi_json fragment and
/// `components.schemas` from the snapshot's schema definitions. All other
/// members of the base document (info, securitySchemes, ...) are preserved;
/// any schemas already in the base are replaced.
pub fn api_version_to_openapi(state: &ApiVersion, base_openapi: &Value) -> Value {
    let mut doc = match base_openapi.as_object() {
        Some(obj) => obj.clone(),
        None => Map::new(),
    };

    let mut paths = Map::new();
    for (path, operations) in &state.path_operations {
        let mut methods = Map::new();
        for op in operations {
            methods.insert(op.method.as_str().to_string(), op.openapi_json.clone());
        }
        paths.insert(path.clone(), Value::Object(methods));
    }
    doc.insert("paths".to_string(), Value::Object(paths));

    let mut components = doc
        .get("components")
        .and_then(|c| c.as_object())
        .cloned()
        .unwrap_or_default();
    let mut schemas = Map::new();
    for (schema_ref, schema) in &state.schema_definitions {
        schemas.insert(component_name(schema_ref).to_string(), schema.clone());
    }
    components.insert("schemas".to_string(), Value::Object(schemas));
    doc.insert("components".to_string(), Value::Object(components));

    Value::Object(doc)
}

/// The component key of a schema ref: "#/components/schemas/User" -> "User".
fn component_name(schema_ref: &str) -> &str {
    schema_ref.rsplit('/').next().unwrap_or(schema_ref)
}

/// The OpenAPI document as it looked at a specific version of the chain.
pub fn get_versioned_openapi(
    migrations: &[LoadedMigration],
    version: &str,
    base_openapi: &Value,
) -> Result<Value, VersionNotFoundError> {
    if migrations.is_empty() {
        return Err(VersionNotFoundError::NoMigrations);
    }
    let state = get_api_state_at_version(migrations, version)
        .ok_or_else(|| VersionNotFoundError::UnknownVersion(version.to_string()))?;
    Ok(api_version_to_openapi(&state, base_openapi))
}

/// All versions the chain can serve, in chain order.
pub fn get_available_versions(migrations: &[LoadedMigration]) -> Vec<Version> {
    migrations.iter().map(|m| m.to_version.clone()).collect()
}
