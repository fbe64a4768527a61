use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::logic::chain::get_api_state_at_version;
use crate::model::{
    DataMigrationSet, JsonObject, LoadedMigration, PathOperation, QueryParams, SchemaRef,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upgrade,
    Downgrade,
}

/// The ordered slice of migrations whose transformers apply when moving a
/// payload between two versions.
///
/// Equal versions yield an empty span. Downgrades walk from `from_version`
/// back to (but excluding) `to_version` in reverse sequence order; upgrades
/// walk forward. A version absent from the chain yields an empty span; the
/// surrounding middleware resolves versions before transforming, so an
/// unknown version never reaches this point on the request path.
pub fn get_migrations_between<'a>(
    migrations: &'a [LoadedMigration],
    from_version: &str,
    to_version: &str,
) -> Vec<&'a LoadedMigration> {
    if from_version == to_version {
        return Vec::new();
    }
    let from_idx = migrations.iter().position(|m| m.to_version == from_version);
    let to_idx = migrations.iter().position(|m| m.to_version == to_version);
    let (Some(from_idx), Some(to_idx)) = (from_idx, to_idx) else {
        return Vec::new();
    };

    if from_idx < to_idx {
        // upgrade: everything after from, up to and including to
        migrations[from_idx + 1..=to_idx].iter().collect()
    } else {
        // downgrade: from down to just above to, newest first
        migrations[to_idx + 1..=from_idx].iter().rev().collect()
    }
}

/// Downgrade a response payload from `from_version` (newer) to `to_version`
/// (the client's older requested version).
///
/// For each migration hop, newest first: the operation's response schema refs
/// are walked recursively against the schema graph at that hop's target
/// version, applying registered schema downgrades; then the operation-level
/// downgrade (if any) runs with the response status code.
pub async fn transform_response(
    data: Value,
    status_code: u16,
    operation: &PathOperation,
    migrations: &[LoadedMigration],
    from_version: &str,
    to_version: &str,
) -> Value {
    if from_version == to_version {
        return data;
    }

    let mut data = data;
    for migration in get_migrations_between(migrations, from_version, to_version) {
        let set = migration.data_migrations();
        if set.is_empty() {
            continue;
        }
        let defs = schema_definitions_at(migrations, &migration.to_version);

        for schema_ref in &operation.response_bodies {
            data = walk_schema(data, schema_ref, &defs, &set, Direction::Downgrade).await;
        }

        if let Some(downgrade) = set.get_operation_downgrade(&operation.path, operation.method) {
            data = downgrade.transformer.apply(data, status_code).await;
        }
    }
    data
}

/// Downgrade each element of an array response independently.
pub async fn transform_response_list(
    data: Vec<Value>,
    status_code: u16,
    operation: &PathOperation,
    migrations: &[LoadedMigration],
    from_version: &str,
    to_version: &str,
) -> Vec<Value> {
    let mut out = Vec::with_capacity(data.len());
    for item in data {
        out.push(
            transform_response(item, status_code, operation, migrations, from_version, to_version)
                .await,
        );
    }
    out
}

/// Upgrade a request from `from_version` (older) to `to_version` (newer).
///
/// For each migration hop in ascending order: schema upgrades run recursively
/// over the request body's schema graph first, then the operation-level
/// upgrade runs last so it may move data between body and params. A `None`
/// body skips all schema-level work but still reaches the operation-level
/// upgrade, which may transform the params alone.
pub async fn transform_request(
    body: Option<JsonObject>,
    query_params: QueryParams,
    operation: &PathOperation,
    migrations: &[LoadedMigration],
    from_version: &str,
    to_version: &str,
) -> (Option<JsonObject>, QueryParams) {
    if from_version == to_version {
        return (body, query_params);
    }

    let mut body = body;
    let mut params = query_params;
    for migration in get_migrations_between(migrations, from_version, to_version) {
        let set = migration.data_migrations();
        if set.is_empty() {
            continue;
        }
        let defs = schema_definitions_at(migrations, &migration.to_version);

        if let Some(current) = body.take() {
            let mut value = Value::Object(current);
            if operation.request_body_schema.len() > 1 {
                // union body: resolve to the single candidate the instance
                // matches and walk only that one
                let candidates: Vec<&str> = operation
                    .request_body_schema
                    .iter()
                    .map(String::as_str)
                    .collect();
                if let Some(matched) = resolve_union_ref(&value, &candidates, &defs, None) {
                    let matched = matched.to_string();
                    value = walk_schema(value, &matched, &defs, &set, Direction::Upgrade).await;
                }
            } else {
                for schema_ref in &operation.request_body_schema {
                    value = walk_schema(value, schema_ref, &defs, &set, Direction::Upgrade).await;
                }
            }
            body = into_object(value);
        }

        if let Some(upgrade) = set.get_operation_upgrade(&operation.path, operation.method) {
            let (new_body, new_params) = upgrade.transformer.apply(body, params).await;
            body = new_body;
            params = new_params;
        }
    }
    (body, params)
}

fn schema_definitions_at(
    migrations: &[LoadedMigration],
    version: &str,
) -> HashMap<SchemaRef, Value> {
    get_api_state_at_version(migrations, version)
        .map(|state| state.schema_definitions)
        .unwrap_or_default()
}

fn into_object(value: Value) -> Option<JsonObject> {
    match value {
        Value::Object(obj) => Some(obj),
        _ => None,
    }
}

/// Recursively transform one instance of `schema_ref`.
///
/// Children are visited first, guided by the schema definition graph: `$ref`
/// properties recurse into the nested object, arrays of refs recurse into
/// every element, unions recurse into whichever candidate the concrete value
/// matches. The schema's own transformer (if registered) runs after the
/// children. A ref with no definition in the graph still gets its direct
/// transformer applied.
fn walk_schema<'a>(
    data: Value,
    schema_ref: &'a str,
    defs: &'a HashMap<SchemaRef, Value>,
    set: &'a DataMigrationSet,
    direction: Direction,
) -> Pin<Box<dyn Future<Output = Value> + Send + 'a>> {
    Box::pin(async move {
        let mut data = data;

        if let Some(schema) = defs.get(schema_ref) {
            if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
                for (prop_name, prop_schema) in props {
                    data = walk_property(data, prop_name, prop_schema, defs, set, direction).await;
                }
            }
        }

        if data.is_object() {
            let transformer = match direction {
                Direction::Upgrade => set
                    .get_schema_upgrade(schema_ref)
                    .map(|u| u.transformer.clone()),
                Direction::Downgrade => set
                    .get_schema_downgrade(schema_ref)
                    .map(|d| d.transformer.clone()),
            };
            if let Some(transformer) = transformer {
                if let Value::Object(obj) = data {
                    data = Value::Object(transformer.apply(obj).await);
                }
            }
        }

        data
    })
}

async fn walk_property(
    mut data: Value,
    prop_name: &str,
    prop_schema: &Value,
    defs: &HashMap<SchemaRef, Value>,
    set: &DataMigrationSet,
    direction: Direction,
) -> Value {
    let child = match data.as_object_mut().and_then(|obj| obj.remove(prop_name)) {
        Some(child) => child,
        None => return data,
    };

    let transformed = if let Some(nested_ref) = prop_schema.get("$ref").and_then(|r| r.as_str()) {
        walk_schema(child, nested_ref, defs, set, direction).await
    } else if prop_schema.get("type").and_then(|t| t.as_str()) == Some("array") {
        let item_ref = prop_schema
            .get("items")
            .and_then(|items| items.get("$ref"))
            .and_then(|r| r.as_str());
        match (item_ref, child) {
            (Some(item_ref), Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(walk_schema(item, item_ref, defs, set, direction).await);
                }
                Value::Array(out)
            }
            (_, child) => child,
        }
    } else {
        let candidates = union_candidates(prop_schema);
        if candidates.is_empty() {
            child
        } else {
            match resolve_union_ref(&child, &candidates, defs, prop_schema.get("discriminator")) {
                Some(matched) => {
                    let matched = matched.to_string();
                    walk_schema(child, &matched, defs, set, direction).await
                }
                None => child,
            }
        }
    };

    if let Some(obj) = data.as_object_mut() {
        obj.insert(prop_name.to_string(), transformed);
    }
    data
}

/// The `$ref` members of an `anyOf`/`oneOf` property schema.
fn union_candidates(prop_schema: &Value) -> Vec<&str> {
    let members = prop_schema
        .get("anyOf")
        .or_else(|| prop_schema.get("oneOf"))
        .and_then(|m| m.as_array());
    match members {
        Some(members) => members
            .iter()
            .filter_map(|member| member.get("$ref").and_then(|r| r.as_str()))
            .collect(),
        None => Vec::new(),
    }
}

/// Decide which union candidate a concrete instance belongs to.
///
/// An explicit discriminator property resolves directly (through its mapping
/// when present, otherwise by matching the ref's trailing segment). Without
/// one, the first candidate whose required-field set the instance satisfies
/// wins. "No match" is a no-op, not an error, so unions stay
/// forward-compatible with added members.
fn resolve_union_ref<'a>(
    instance: &Value,
    candidates: &[&'a str],
    defs: &'a HashMap<SchemaRef, Value>,
    discriminator: Option<&Value>,
) -> Option<&'a str> {
    let obj = instance.as_object()?;

    if let Some(discriminator) = discriminator {
        let property = discriminator.get("propertyName").and_then(|p| p.as_str())?;
        let tag = obj.get(property).and_then(|v| v.as_str())?;
        if let Some(mapping) = discriminator.get("mapping").and_then(|m| m.as_object()) {
            if let Some(mapped) = mapping.get(tag).and_then(|v| v.as_str()) {
                return candidates.iter().copied().find(|c| *c == mapped);
            }
        }
        return candidates
            .iter()
            .copied()
            .find(|c| c.rsplit('/').next() == Some(tag));
    }

    for candidate in candidates {
        let Some(schema) = defs.get(*candidate) else {
            continue;
        };
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|f| f.as_str()).collect())
            .unwrap_or_default();
        if required.is_empty() {
            continue;
        }
        if required.iter().all(|field| obj.contains_key(*field)) {
            return Some(candidate);
        }
    }
    None
}
