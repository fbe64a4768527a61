use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{HttpMethod, SchemaRef};

/// A concrete JSON object instance of some schema.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// A query parameter value: single or repeated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Many(Vec<String>),
}

pub type QueryParams = HashMap<String, QueryValue>;

/// Converts one concrete instance of a schema between adjacent versions.
///
/// Implementations may suspend; plain `Fn(JsonObject) -> JsonObject` closures
/// are accepted directly through the blanket impl below.
#[async_trait]
pub trait SchemaTransformer: Send + Sync {
    async fn apply(&self, instance: JsonObject) -> JsonObject;
}

#[async_trait]
impl<F> SchemaTransformer for F
where
    F: Fn(JsonObject) -> JsonObject + Send + Sync,
{
    async fn apply(&self, instance: JsonObject) -> JsonObject {
        self(instance)
    }
}

/// Upgrades a request at operation granularity. Receives the parsed body (None
/// when the request carried none) and the query params, and may move data
/// between the two.
#[async_trait]
pub trait OperationUpgradeTransformer: Send + Sync {
    async fn apply(
        &self,
        body: Option<JsonObject>,
        params: QueryParams,
    ) -> (Option<JsonObject>, QueryParams);
}

#[async_trait]
impl<F> OperationUpgradeTransformer for F
where
    F: Fn(Option<JsonObject>, QueryParams) -> (Option<JsonObject>, QueryParams) + Send + Sync,
{
    async fn apply(
        &self,
        body: Option<JsonObject>,
        params: QueryParams,
    ) -> (Option<JsonObject>, QueryParams) {
        self(body, params)
    }
}

/// Downgrades a response body at operation granularity, with access to the
/// response status code.
#[async_trait]
pub trait OperationDowngradeTransformer: Send + Sync {
    async fn apply(&self, body: serde_json::Value, status_code: u16) -> serde_json::Value;
}

#[async_trait]
impl<F> OperationDowngradeTransformer for F
where
    F: Fn(serde_json::Value, u16) -> serde_json::Value + Send + Sync,
{
    async fn apply(&self, body: serde_json::Value, status_code: u16) -> serde_json::Value {
        self(body, status_code)
    }
}

/// Schema-level upgrade registration: applied to every concrete instance of
/// the referenced schema, wherever it appears in a request body.
#[derive(Clone)]
pub struct SchemaUpgrade {
    pub schema_ref: SchemaRef,
    pub transformer: Arc<dyn SchemaTransformer>,
}

impl SchemaUpgrade {
    pub fn new(schema_ref: impl Into<SchemaRef>, transformer: impl SchemaTransformer + 'static) -> Self {
        Self {
            schema_ref: schema_ref.into(),
            transformer: Arc::new(transformer),
        }
    }
}

/// Schema-level downgrade registration, the response-side mirror of
/// [`SchemaUpgrade`].
#[derive(Clone)]
pub struct SchemaDowngrade {
    pub schema_ref: SchemaRef,
    pub transformer: Arc<dyn SchemaTransformer>,
}

impl SchemaDowngrade {
    pub fn new(schema_ref: impl Into<SchemaRef>, transformer: impl SchemaTransformer + 'static) -> Self {
        Self {
            schema_ref: schema_ref.into(),
            transformer: Arc::new(transformer),
        }
    }
}

/// Operation-level request upgrade registration, keyed by path template + method.
#[derive(Clone)]
pub struct OperationUpgrade {
    pub path: String,
    pub method: HttpMethod,
    pub transformer: Arc<dyn OperationUpgradeTransformer>,
}

impl OperationUpgrade {
    pub fn new(
        path: impl Into<String>,
        method: HttpMethod,
        transformer: impl OperationUpgradeTransformer + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            method,
            transformer: Arc::new(transformer),
        }
    }
}

/// Operation-level response downgrade registration, keyed by path template + method.
#[derive(Clone)]
pub struct OperationDowngrade {
    pub path: String,
    pub method: HttpMethod,
    pub transformer: Arc<dyn OperationDowngradeTransformer>,
}

impl OperationDowngrade {
    pub fn new(
        path: impl Into<String>,
        method: HttpMethod,
        transformer: impl OperationDowngradeTransformer + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            method,
            transformer: Arc::new(transformer),
        }
    }
}

/// Rewrite of an old route template onto its renamed successor, optionally
/// restricted to certain methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRewrite {
    pub old_path: String,
    pub new_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<HttpMethod>>,
}

impl PathRewrite {
    pub fn new(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            old_path: old_path.into(),
            new_path: new_path.into(),
            methods: None,
        }
    }

    pub fn with_methods(
        old_path: impl Into<String>,
        new_path: impl Into<String>,
        methods: Vec<HttpMethod>,
    ) -> Self {
        Self {
            old_path: old_path.into(),
            new_path: new_path.into(),
            methods: Some(methods),
        }
    }

    /// Whether this rewrite applies to the given method.
    pub fn applies_to(&self, method: HttpMethod) -> bool {
        match &self.methods {
            Some(methods) => methods.contains(&method),
            None => true,
        }
    }
}

/// The hand-written data transformers accompanying one migration.
///
/// Lookup is a linear scan returning the first match: registering duplicate
/// keys is allowed but only the first-registered transformer ever runs.
#[derive(Clone, Default)]
pub struct DataMigrationSet {
    pub schema_upgrades: Vec<SchemaUpgrade>,
    pub schema_downgrades: Vec<SchemaDowngrade>,
    pub operation_upgrades: Vec<OperationUpgrade>,
    pub operation_downgrades: Vec<OperationDowngrade>,
    pub path_rewrites: Vec<PathRewrite>,
}

impl DataMigrationSet {
    pub fn is_empty(&self) -> bool {
        self.schema_upgrades.is_empty()
            && self.schema_downgrades.is_empty()
            && self.operation_upgrades.is_empty()
            && self.operation_downgrades.is_empty()
            && self.path_rewrites.is_empty()
    }

    pub fn get_schema_upgrade(&self, schema_ref: &str) -> Option<&SchemaUpgrade> {
        self.schema_upgrades
            .iter()
            .find(|u| u.schema_ref == schema_ref)
    }

    pub fn get_schema_downgrade(&self, schema_ref: &str) -> Option<&SchemaDowngrade> {
        self.schema_downgrades
            .iter()
            .find(|d| d.schema_ref == schema_ref)
    }

    pub fn get_operation_upgrade(&self, path: &str, method: HttpMethod) -> Option<&OperationUpgrade> {
        self.operation_upgrades
            .iter()
            .find(|u| u.path == path && u.method == method)
    }

    pub fn get_operation_downgrade(
        &self,
        path: &str,
        method: HttpMethod,
    ) -> Option<&OperationDowngrade> {
        self.operation_downgrades
            .iter()
            .find(|d| d.path == path && d.method == method)
    }
}

impl std::fmt::Debug for DataMigrationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataMigrationSet")
            .field(
                "schema_upgrades",
                &self
                    .schema_upgrades
                    .iter()
                    .map(|u| &u.schema_ref)
                    .collect::<Vec<_>>(),
            )
            .field(
                "schema_downgrades",
                &self
                    .schema_downgrades
                    .iter()
                    .map(|d| &d.schema_ref)
                    .collect::<Vec<_>>(),
            )
            .field(
                "operation_upgrades",
                &self
                    .operation_upgrades
                    .iter()
                    .map(|u| format!("{} {}", u.method, u.path))
                    .collect::<Vec<_>>(),
            )
            .field(
                "operation_downgrades",
                &self
                    .operation_downgrades
                    .iter()
                    .map(|d| format!("{} {}", d.method, d.path))
                    .collect::<Vec<_>>(),
            )
            .field("path_rewrites", &self.path_rewrites)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn strip_field(field: &'static str) -> impl Fn(JsonObject) -> JsonObject {
        move |mut obj: JsonObject| {
            obj.remove(field);
            obj
        }
    }

    #[test]
    fn test_empty_set() {
        let set = DataMigrationSet::default();
        assert!(set.is_empty());
        assert!(set.schema_downgrades.is_empty());
        assert!(set.schema_upgrades.is_empty());
    }

    #[test]
    fn test_not_empty_with_single_entry() {
        let set = DataMigrationSet {
            schema_downgrades: vec![SchemaDowngrade::new(
                "#/components/schemas/PersonOut",
                strip_field("is_active"),
            )],
            ..Default::default()
        };
        assert!(!set.is_empty());
    }

    #[test]
    fn test_get_schema_downgrade_found_and_missing() {
        let set = DataMigrationSet {
            schema_downgrades: vec![
                SchemaDowngrade::new("#/components/schemas/PersonOut", strip_field("is_active")),
                SchemaDowngrade::new("#/components/schemas/AddressOut", strip_field("zip_code")),
            ],
            ..Default::default()
        };

        let found = set.get_schema_downgrade("#/components/schemas/AddressOut");
        assert!(found.is_some());
        assert_eq!(found.unwrap().schema_ref, "#/components/schemas/AddressOut");
        assert!(set.get_schema_downgrade("#/components/schemas/Unknown").is_none());
    }

    #[test]
    fn test_get_operation_lookup_respects_method() {
        let set = DataMigrationSet {
            operation_downgrades: vec![OperationDowngrade::new(
                "/api/users",
                HttpMethod::Get,
                |body: Value, _status: u16| body,
            )],
            ..Default::default()
        };

        assert!(set.get_operation_downgrade("/api/users", HttpMethod::Get).is_some());
        assert!(set.get_operation_downgrade("/api/users", HttpMethod::Post).is_none());
        assert!(set.get_operation_downgrade("/api/items", HttpMethod::Get).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_registration_first_wins() {
        let set = DataMigrationSet {
            schema_upgrades: vec![
                SchemaUpgrade::new("#/components/schemas/Test", |mut obj: JsonObject| {
                    obj.insert("winner".to_string(), Value::from("first"));
                    obj
                }),
                SchemaUpgrade::new("#/components/schemas/Test", |mut obj: JsonObject| {
                    obj.insert("winner".to_string(), Value::from("second"));
                    obj
                }),
            ],
            ..Default::default()
        };

        let upgrade = set.get_schema_upgrade("#/components/schemas/Test").unwrap();
        let result = upgrade.transformer.apply(JsonObject::new()).await;
        assert_eq!(result.get("winner"), Some(&Value::from("first")));
    }

    #[tokio::test]
    async fn test_sync_closure_registers_through_blanket_impl() {
        let downgrade = SchemaDowngrade::new("#/components/schemas/PersonOut", strip_field("is_active"));
        let mut obj = JsonObject::new();
        obj.insert("name".to_string(), Value::from("Alice"));
        obj.insert("is_active".to_string(), Value::from(true));

        let result = downgrade.transformer.apply(obj).await;
        assert_eq!(result.get("name"), Some(&Value::from("Alice")));
        assert!(result.get("is_active").is_none());
    }

    #[tokio::test]
    async fn test_suspending_transformer_implements_trait_directly() {
        struct YieldingDowngrade;

        #[async_trait]
        impl SchemaTransformer for YieldingDowngrade {
            async fn apply(&self, mut instance: JsonObject) -> JsonObject {
                tokio::task::yield_now().await;
                instance.remove("async_field");
                instance
            }
        }

        let downgrade = SchemaDowngrade::new("#/components/schemas/Test", YieldingDowngrade);
        let mut obj = JsonObject::new();
        obj.insert("async_field".to_string(), Value::from("value"));
        let result = downgrade.transformer.apply(obj).await;
        assert!(result.is_empty());
    }

    #[test]
    fn test_path_rewrite_method_filter() {
        let unrestricted = PathRewrite::new("/persons/{id}", "/people/{id}");
        assert!(unrestricted.applies_to(HttpMethod::Get));
        assert!(unrestricted.applies_to(HttpMethod::Delete));

        let restricted = PathRewrite::with_methods(
            "/persons/{id}",
            "/people/{id}",
            vec![HttpMethod::Get, HttpMethod::Put],
        );
        assert!(restricted.applies_to(HttpMethod::Put));
        assert!(!restricted.applies_to(HttpMethod::Post));
    }
}
