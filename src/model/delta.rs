use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{FieldInfo, HttpMethod, PathOperation, SchemaRef};

/// Parameter category for partial operation diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Query,
    Path,
    Cookie,
}

/// Partial parameter diff: category -> only the individual params that changed.
pub type ParamDiff = HashMap<ParamKind, HashMap<String, FieldInfo>>;

/// One structural difference between two snapshots.
///
/// Actions carry both the old and the new value so a delta can be applied in
/// either direction without consulting the original snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    OperationAdded {
        path: String,
        method: HttpMethod,
        new_operation: PathOperation,
    },
    OperationRemoved {
        path: String,
        method: HttpMethod,
        old_operation: PathOperation,
    },
    OperationModified {
        path: String,
        method: HttpMethod,
        /// Only the top-level openapi_json keys whose values differ
        #[serde(default)]
        old_openapi_json: serde_json::Map<String, serde_json::Value>,
        #[serde(default)]
        new_openapi_json: serde_json::Map<String, serde_json::Value>,
        /// Only the param categories (and within them, the params) that changed
        #[serde(default)]
        old_params: ParamDiff,
        #[serde(default)]
        new_params: ParamDiff,
        /// Body/response ref lists are order-sensitive and recorded in full
        /// when they differ at all; equal old/new lists mean "unchanged"
        #[serde(default)]
        old_body_refs: Vec<SchemaRef>,
        #[serde(default)]
        new_body_refs: Vec<SchemaRef>,
        #[serde(default)]
        old_response_refs: Vec<SchemaRef>,
        #[serde(default)]
        new_response_refs: Vec<SchemaRef>,
    },
    SchemaDefinitionAdded {
        schema_ref: SchemaRef,
        new_schema: serde_json::Value,
    },
    SchemaDefinitionRemoved {
        schema_ref: SchemaRef,
        old_schema: serde_json::Value,
    },
    SchemaDefinitionModified {
        schema_ref: SchemaRef,
        /// Minimal structural diff, see logic::diff for the granularity rules
        old_schema: serde_json::Map<String, serde_json::Value>,
        new_schema: serde_json::Map<String, serde_json::Value>,
    },
}

/// A self-contained, invertible patch between exactly two snapshots.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionDelta {
    pub actions: Vec<Action>,
}

impl VersionDelta {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_tags_match_wire_format() {
        let action = Action::SchemaDefinitionAdded {
            schema_ref: "#/components/schemas/User".to_string(),
            new_schema: json!({"type": "object"}),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["action"], "schema_definition_added");
        assert_eq!(value["schema_ref"], "#/components/schemas/User");
    }

    #[test]
    fn test_delta_document_round_trip() {
        let doc = json!({
            "actions": [
                {
                    "action": "operation_removed",
                    "path": "/legacy",
                    "method": "get",
                    "old_operation": {
                        "method": "get",
                        "path": "/legacy",
                        "query_params": {},
                        "path_params": {},
                        "cookie_params": {},
                        "request_body_schema": [],
                        "response_bodies": [],
                        "operation_id": "legacy_op",
                        "openapi_json": {}
                    }
                },
                {
                    "action": "schema_definition_modified",
                    "schema_ref": "#/components/schemas/User",
                    "old_schema": {"description": "A user"},
                    "new_schema": {"description": null}
                }
            ]
        });

        let delta: VersionDelta = serde_json::from_value(doc.clone()).unwrap();
        assert_eq!(delta.actions.len(), 2);
        match &delta.actions[1] {
            Action::SchemaDefinitionModified { new_schema, .. } => {
                // null must survive as a real value, not be dropped
                assert_eq!(new_schema.get("description"), Some(&serde_json::Value::Null));
            }
            other => panic!("unexpected action: {:?}", other),
        }

        let back = serde_json::to_value(&delta).unwrap();
        let reparsed: VersionDelta = serde_json::from_value(back).unwrap();
        assert_eq!(reparsed, delta);
    }

    #[test]
    fn test_operation_modified_partials_default_empty() {
        let doc = json!({
            "action": "operation_modified",
            "path": "/users",
            "method": "get",
            "old_response_refs": ["#/components/schemas/UserV1"],
            "new_response_refs": ["#/components/schemas/UserV2"]
        });
        let action: Action = serde_json::from_value(doc).unwrap();
        match action {
            Action::OperationModified {
                old_openapi_json,
                old_params,
                old_body_refs,
                new_response_refs,
                ..
            } => {
                assert!(old_openapi_json.is_empty());
                assert!(old_params.is_empty());
                assert!(old_body_refs.is_empty());
                assert_eq!(new_response_refs, vec!["#/components/schemas/UserV2"]);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }
}
