use itertools::Itertools;
use serde_json::Value;
use std::collections::HashMap;

use crate::model::{
    Action, ApiVersion, FieldInfo, HttpMethod, ParamDiff, ParamKind, PathOperation, VersionDelta,
};

/// openapi_json keys whose array values carry no semantic order. Reordering
/// elements under these keys must not produce a diff.
const KNOWN_ORDERLESS_FIELDS: &[&str] = &["parameters"];

type JsonMap = serde_json::Map<String, Value>;

/// Compute the minimal, invertible delta between two snapshots.
///
/// Two identical snapshots produce an empty action list. The action order is
/// deterministic for a given pair of inputs (operations sorted by path+method,
/// then schema definitions sorted by ref).
pub fn create_delta(old: &ApiVersion, new: &ApiVersion) -> VersionDelta {
    let mut actions = Vec::new();

    let old_ops = flatten_operations(old);
    let new_ops = flatten_operations(new);

    let op_keys: Vec<&(String, HttpMethod)> = old_ops
        .keys()
        .chain(new_ops.keys())
        .unique()
        .sorted_by(|a, b| (&a.0, a.1.as_str()).cmp(&(&b.0, b.1.as_str())))
        .collect();

    for key in op_keys {
        let (path, method) = key;
        match (old_ops.get(key), new_ops.get(key)) {
            (None, Some(new_op)) => actions.push(Action::OperationAdded {
                path: path.clone(),
                method: *method,
                new_operation: (*new_op).clone(),
            }),
            (Some(old_op), None) => actions.push(Action::OperationRemoved {
                path: path.clone(),
                method: *method,
                old_operation: (*old_op).clone(),
            }),
            (Some(old_op), Some(new_op)) => {
                if let Some(action) = diff_operation(path, *method, old_op, new_op) {
                    actions.push(action);
                }
            }
            (None, None) => unreachable!(),
        }
    }

    let schema_refs: Vec<&String> = old
        .schema_definitions
        .keys()
        .chain(new.schema_definitions.keys())
        .unique()
        .sorted()
        .collect();

    for schema_ref in schema_refs {
        match (
            old.schema_definitions.get(schema_ref),
            new.schema_definitions.get(schema_ref),
        ) {
            (None, Some(new_schema)) => actions.push(Action::SchemaDefinitionAdded {
                schema_ref: schema_ref.clone(),
                new_schema: new_schema.clone(),
            }),
            (Some(old_schema), None) => actions.push(Action::SchemaDefinitionRemoved {
                schema_ref: schema_ref.clone(),
                old_schema: old_schema.clone(),
            }),
            (Some(old_schema), Some(new_schema)) => {
                let empty = JsonMap::new();
                let old_obj = old_schema.as_object().unwrap_or(&empty);
                let new_obj = new_schema.as_object().unwrap_or(&empty);
                let (old_diff, new_diff) = diff_schema_objects(old_obj, new_obj);
                if !old_diff.is_empty() || !new_diff.is_empty() {
                    actions.push(Action::SchemaDefinitionModified {
                        schema_ref: schema_ref.clone(),
                        old_schema: old_diff,
                        new_schema: new_diff,
                    });
                }
            }
            (None, None) => unreachable!(),
        }
    }

    VersionDelta::new(actions)
}

fn flatten_operations(version: &ApiVersion) -> HashMap<(String, HttpMethod), &PathOperation> {
    let mut ops = HashMap::new();
    for (path, operations) in &version.path_operations {
        for op in operations {
            ops.insert((path.clone(), op.method), op);
        }
    }
    ops
}

/// Compare two versions of the same (path, method) operation. Returns an
/// `OperationModified` carrying only the changed sub-parts, or None when the
/// operations are equal.
fn diff_operation(
    path: &str,
    method: HttpMethod,
    old: &PathOperation,
    new: &PathOperation,
) -> Option<Action> {
    let empty = JsonMap::new();
    let old_doc = old.openapi_json.as_object().unwrap_or(&empty);
    let new_doc = new.openapi_json.as_object().unwrap_or(&empty);
    let (old_openapi_json, new_openapi_json) = diff_openapi_json(old_doc, new_doc);

    let mut old_params = ParamDiff::new();
    let mut new_params = ParamDiff::new();
    for (kind, old_cat, new_cat) in [
        (ParamKind::Query, &old.query_params, &new.query_params),
        (ParamKind::Path, &old.path_params, &new.path_params),
        (ParamKind::Cookie, &old.cookie_params, &new.cookie_params),
    ] {
        let (old_changed, new_changed) = diff_params(old_cat, new_cat);
        if !old_changed.is_empty() {
            old_params.insert(kind, old_changed);
        }
        if !new_changed.is_empty() {
            new_params.insert(kind, new_changed);
        }
    }

    let body_changed = old.request_body_schema != new.request_body_schema;
    let responses_changed = old.response_bodies != new.response_bodies;

    if old_openapi_json.is_empty()
        && new_openapi_json.is_empty()
        && old_params.is_empty()
        && new_params.is_empty()
        && !body_changed
        && !responses_changed
    {
        return None;
    }

    Some(Action::OperationModified {
        path: path.to_string(),
        method,
        old_openapi_json,
        new_openapi_json,
        old_params,
        new_params,
        old_body_refs: if body_changed {
            old.request_body_schema.clone()
        } else {
            Vec::new()
        },
        new_body_refs: if body_changed {
            new.request_body_schema.clone()
        } else {
            Vec::new()
        },
        old_response_refs: if responses_changed {
            old.response_bodies.clone()
        } else {
            Vec::new()
        },
        new_response_refs: if responses_changed {
            new.response_bodies.clone()
        } else {
            Vec::new()
        },
    })
}

/// Top-level-key diff of two openapi_json documents. Values are recorded
/// wholesale; known orderless array fields compare as multisets.
fn diff_openapi_json(old: &JsonMap, new: &JsonMap) -> (JsonMap, JsonMap) {
    let mut old_diff = JsonMap::new();
    let mut new_diff = JsonMap::new();
    for key in old.keys().chain(new.keys()).unique().sorted() {
        match (old.get(key), new.get(key)) {
            (Some(old_val), None) => {
                old_diff.insert(key.clone(), old_val.clone());
            }
            (None, Some(new_val)) => {
                new_diff.insert(key.clone(), new_val.clone());
            }
            (Some(old_val), Some(new_val)) => {
                if !openapi_values_equal(key, old_val, new_val) {
                    old_diff.insert(key.clone(), old_val.clone());
                    new_diff.insert(key.clone(), new_val.clone());
                }
            }
            (None, None) => unreachable!(),
        }
    }
    (old_diff, new_diff)
}

fn openapi_values_equal(key: &str, old: &Value, new: &Value) -> bool {
    if KNOWN_ORDERLESS_FIELDS.contains(&key) {
        if let (Value::Array(old_items), Value::Array(new_items)) = (old, new) {
            return arrays_equal_orderless(old_items, new_items);
        }
    }
    old == new
}

fn arrays_equal_orderless(old: &[Value], new: &[Value]) -> bool {
    if old.len() != new.len() {
        return false;
    }
    let mut remaining: Vec<&Value> = new.iter().collect();
    for item in old {
        match remaining.iter().position(|candidate| *candidate == item) {
            Some(idx) => {
                remaining.swap_remove(idx);
            }
            None => return false,
        }
    }
    true
}

fn diff_params(
    old: &HashMap<String, FieldInfo>,
    new: &HashMap<String, FieldInfo>,
) -> (HashMap<String, FieldInfo>, HashMap<String, FieldInfo>) {
    let mut old_changed = HashMap::new();
    let mut new_changed = HashMap::new();
    for name in old.keys().chain(new.keys()).unique() {
        match (old.get(name), new.get(name)) {
            (Some(old_field), None) => {
                old_changed.insert(name.clone(), old_field.clone());
            }
            (None, Some(new_field)) => {
                new_changed.insert(name.clone(), new_field.clone());
            }
            (Some(old_field), Some(new_field)) => {
                if old_field != new_field {
                    old_changed.insert(name.clone(), old_field.clone());
                    new_changed.insert(name.clone(), new_field.clone());
                }
            }
            (None, None) => unreachable!(),
        }
    }
    (old_changed, new_changed)
}

/// Minimal structural diff of two schema objects.
///
/// Granularity: each top-level key is diffed independently. A key whose value
/// is an object on both sides narrows one further level (individual
/// second-level keys recorded wholesale); everything else, lists included, is
/// recorded wholesale on both sides. Explicit nulls are real values and are
/// preserved in the diff.
fn diff_schema_objects(old: &JsonMap, new: &JsonMap) -> (JsonMap, JsonMap) {
    let mut old_diff = JsonMap::new();
    let mut new_diff = JsonMap::new();
    for key in old.keys().chain(new.keys()).unique().sorted() {
        match (old.get(key), new.get(key)) {
            (Some(old_val), None) => {
                old_diff.insert(key.clone(), old_val.clone());
            }
            (None, Some(new_val)) => {
                new_diff.insert(key.clone(), new_val.clone());
            }
            (Some(old_val), Some(new_val)) => {
                if old_val == new_val {
                    continue;
                }
                if let (Value::Object(old_inner), Value::Object(new_inner)) = (old_val, new_val) {
                    let (inner_old, inner_new) = shallow_diff(old_inner, new_inner);
                    old_diff.insert(key.clone(), Value::Object(inner_old));
                    new_diff.insert(key.clone(), Value::Object(inner_new));
                } else {
                    old_diff.insert(key.clone(), old_val.clone());
                    new_diff.insert(key.clone(), new_val.clone());
                }
            }
            (None, None) => unreachable!(),
        }
    }
    (old_diff, new_diff)
}

fn shallow_diff(old: &JsonMap, new: &JsonMap) -> (JsonMap, JsonMap) {
    let mut old_diff = JsonMap::new();
    let mut new_diff = JsonMap::new();
    for key in old.keys().chain(new.keys()).unique().sorted() {
        match (old.get(key), new.get(key)) {
            (Some(old_val), None) => {
                old_diff.insert(key.clone(), old_val.clone());
            }
            (None, Some(new_val)) => {
                new_diff.insert(key.clone(), new_val.clone());
            }
            (Some(old_val), Some(new_val)) => {
                if old_val != new_val {
                    old_diff.insert(key.clone(), old_val.clone());
                    new_diff.insert(key.clone(), new_val.clone());
                }
            }
            (None, None) => unreachable!(),
        }
    }
    (old_diff, new_diff)
}

/// Apply a delta forwards: `base` is assumed to equal the pre-delta snapshot
/// for everything the delta does not touch.
pub fn apply_delta_forwards(base: &ApiVersion, delta: &VersionDelta) -> ApiVersion {
    let mut state = base.clone();
    for action in &delta.actions {
        match action {
            Action::OperationAdded {
                path,
                method,
                new_operation,
            } => insert_operation(&mut state, path, *method, new_operation.clone()),
            Action::OperationRemoved { path, method, .. } => {
                remove_operation(&mut state, path, *method)
            }
            Action::OperationModified {
                path,
                method,
                old_openapi_json,
                new_openapi_json,
                old_params,
                new_params,
                old_body_refs,
                new_body_refs,
                old_response_refs,
                new_response_refs,
            } => apply_operation_modified(
                &mut state,
                path,
                *method,
                old_openapi_json,
                new_openapi_json,
                old_params,
                new_params,
                old_body_refs,
                new_body_refs,
                old_response_refs,
                new_response_refs,
            ),
            Action::SchemaDefinitionAdded {
                schema_ref,
                new_schema,
            } => {
                state
                    .schema_definitions
                    .insert(schema_ref.clone(), new_schema.clone());
            }
            Action::SchemaDefinitionRemoved { schema_ref, .. } => {
                state.schema_definitions.remove(schema_ref);
            }
            Action::SchemaDefinitionModified {
                schema_ref,
                old_schema,
                new_schema,
            } => merge_schema_diff(&mut state, schema_ref, old_schema, new_schema),
        }
    }
    state
}

/// Apply a delta backwards: the mirror of forwards application, restoring the
/// pre-delta snapshot from the post-delta one.
pub fn apply_delta_backwards(base: &ApiVersion, delta: &VersionDelta) -> ApiVersion {
    let mut state = base.clone();
    for action in &delta.actions {
        match action {
            Action::OperationAdded { path, method, .. } => {
                remove_operation(&mut state, path, *method)
            }
            Action::OperationRemoved {
                path,
                method,
                old_operation,
            } => insert_operation(&mut state, path, *method, old_operation.clone()),
            Action::OperationModified {
                path,
                method,
                old_openapi_json,
                new_openapi_json,
                old_params,
                new_params,
                old_body_refs,
                new_body_refs,
                old_response_refs,
                new_response_refs,
            } => apply_operation_modified(
                &mut state,
                path,
                *method,
                new_openapi_json,
                old_openapi_json,
                new_params,
                old_params,
                new_body_refs,
                old_body_refs,
                new_response_refs,
                old_response_refs,
            ),
            Action::SchemaDefinitionAdded { schema_ref, .. } => {
                state.schema_definitions.remove(schema_ref);
            }
            Action::SchemaDefinitionRemoved {
                schema_ref,
                old_schema,
            } => {
                state
                    .schema_definitions
                    .insert(schema_ref.clone(), old_schema.clone());
            }
            Action::SchemaDefinitionModified {
                schema_ref,
                old_schema,
                new_schema,
            } => merge_schema_diff(&mut state, schema_ref, new_schema, old_schema),
        }
    }
    state
}

fn insert_operation(state: &mut ApiVersion, path: &str, method: HttpMethod, op: PathOperation) {
    let operations = state
        .path_operations
        .entry(path.to_string())
        .or_default();
    // at most one entry per method within a path's operation list
    operations.retain(|existing| existing.method != method);
    operations.push(op);
}

fn remove_operation(state: &mut ApiVersion, path: &str, method: HttpMethod) {
    if let Some(operations) = state.path_operations.get_mut(path) {
        operations.retain(|op| op.method != method);
        if operations.is_empty() {
            state.path_operations.remove(path);
        }
    }
}

/// Overlay the target-side partials of an `OperationModified` action on the
/// existing operation. `from_*`/`to_*` are the departure/destination sides of
/// whichever direction is being applied.
#[allow(clippy::too_many_arguments)]
fn apply_operation_modified(
    state: &mut ApiVersion,
    path: &str,
    method: HttpMethod,
    from_openapi: &JsonMap,
    to_openapi: &JsonMap,
    from_params: &ParamDiff,
    to_params: &ParamDiff,
    from_body_refs: &[String],
    to_body_refs: &[String],
    from_response_refs: &[String],
    to_response_refs: &[String],
) {
    let Some(op) = state
        .path_operations
        .get_mut(path)
        .and_then(|ops| ops.iter_mut().find(|op| op.method == method))
    else {
        return;
    };

    if !from_openapi.is_empty() || !to_openapi.is_empty() {
        let doc = ensure_object(&mut op.openapi_json);
        for key in from_openapi.keys() {
            if !to_openapi.contains_key(key) {
                doc.remove(key);
            }
        }
        for (key, value) in to_openapi {
            doc.insert(key.clone(), value.clone());
        }
    }

    for kind in [ParamKind::Query, ParamKind::Path, ParamKind::Cookie] {
        let from_cat = from_params.get(&kind);
        let to_cat = to_params.get(&kind);
        if from_cat.is_none() && to_cat.is_none() {
            continue;
        }
        let target = match kind {
            ParamKind::Query => &mut op.query_params,
            ParamKind::Path => &mut op.path_params,
            ParamKind::Cookie => &mut op.cookie_params,
        };
        if let Some(from_cat) = from_cat {
            for name in from_cat.keys() {
                if to_cat.map_or(true, |cat| !cat.contains_key(name)) {
                    target.remove(name);
                }
            }
        }
        if let Some(to_cat) = to_cat {
            for (name, field) in to_cat {
                target.insert(name.clone(), field.clone());
            }
        }
    }

    if from_body_refs != to_body_refs {
        op.request_body_schema = to_body_refs.to_vec();
    }
    if from_response_refs != to_response_refs {
        op.response_bodies = to_response_refs.to_vec();
    }
}

/// Merge one side of a `SchemaDefinitionModified` diff over the stored schema.
/// Keys only on the departure side are removed; keys on the destination side
/// are set (a literal null sets null, it does not delete); nested diffs merge
/// at the second level.
fn merge_schema_diff(state: &mut ApiVersion, schema_ref: &str, from_diff: &JsonMap, to_diff: &JsonMap) {
    let schema = state
        .schema_definitions
        .entry(schema_ref.to_string())
        .or_insert_with(|| Value::Object(JsonMap::new()));
    let base = ensure_object(schema);

    for key in from_diff.keys() {
        if !to_diff.contains_key(key) {
            base.remove(key);
        }
    }
    for (key, to_val) in to_diff {
        match (from_diff.get(key), to_val) {
            (Some(Value::Object(from_inner)), Value::Object(to_inner)) => {
                let slot = base
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(JsonMap::new()));
                let target = ensure_object(slot);
                for inner_key in from_inner.keys() {
                    if !to_inner.contains_key(inner_key) {
                        target.remove(inner_key);
                    }
                }
                for (inner_key, inner_val) in to_inner {
                    target.insert(inner_key.clone(), inner_val.clone());
                }
            }
            _ => {
                base.insert(key.clone(), to_val.clone());
            }
        }
    }
}

fn ensure_object(value: &mut Value) -> &mut JsonMap {
    if !value.is_object() {
        *value = Value::Object(JsonMap::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}
