use axum::{extract::Path, routing::get, serve, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

use gantry::api::routes::with_versioning;
use gantry::api::VersioningState;
use gantry::config::AppConfig;
use gantry::model::{DataMigrationSet, JsonObject, SchemaDowngrade, SchemaUpgrade};
use gantry::store::{DataMigrationRegistry, FsMigrationStore, MigrationStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new().filter_level(LevelFilter::Info).init();

    println!("Gantry: Versioned API Demo Server");

    // Load configuration
    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    // Data migrations for the demo chain: v2 added the is_active flag to
    // people, so v1 clients get it stripped from responses and defaulted on
    // requests.
    let registry = DataMigrationRegistry::new().register(
        "v2",
        DataMigrationSet {
            schema_downgrades: vec![SchemaDowngrade::new(
                "#/components/schemas/PersonOut",
                |mut person: JsonObject| {
                    person.remove("is_active");
                    person
                },
            )],
            schema_upgrades: vec![SchemaUpgrade::new(
                "#/components/schemas/PersonIn",
                |mut person: JsonObject| {
                    person.entry("is_active").or_insert(Value::Bool(true));
                    person
                },
            )],
            ..Default::default()
        },
    );

    println!("Loading migrations from {}...", config.versioning.migrations_dir);
    let store = FsMigrationStore::new(&config.versioning.migrations_dir).with_registry(registry);
    let migrations = store.load_migrations().await?;
    println!(
        "Migration chain ready: {} migrations, latest version {:?}",
        migrations.len(),
        migrations.last().map(|m| m.to_version.as_str())
    );

    let state = Arc::new(VersioningState::new(config.versioning.clone(), migrations));

    let app = Router::new()
        .route("/api/people", get(list_people).post(create_person))
        .route("/api/people/:person_id", get(get_person));
    let app = with_versioning(app, state);

    run_server(app, &config).await?;

    Ok(())
}

async fn run_server(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!("Gantry demo server running on http://{}", bind_address);
    println!(
        "Version listing available at http://{}/versions",
        bind_address
    );

    serve(listener, app).await?;

    Ok(())
}

/// Demo endpoint serving the current (v2) shape; the middleware downgrades
/// for older clients.
async fn list_people() -> Json<Value> {
    Json(json!([
        {"name": "Alice", "is_active": true},
        {"name": "Bob", "is_active": false},
    ]))
}

async fn get_person(Path(person_id): Path<u32>) -> Json<Value> {
    Json(json!({
        "name": format!("Person {}", person_id),
        "is_active": true,
    }))
}

/// Echoes the (upgraded) body back so version handling is easy to observe.
async fn create_person(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}
