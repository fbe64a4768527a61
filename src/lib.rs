pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::routes::{versioning_routes, with_versioning};
pub use api::{RequestVersion, VersioningState};

// Export logic functions
pub use logic::{
    apply_delta_backwards, apply_delta_forwards, api_version_to_openapi, create_delta,
    detect_path_renames, get_api_state_at_version, get_available_versions, get_known_api_state,
    get_latest_version, get_migrations_between, get_path_rewrites_for_upgrade,
    get_versioned_openapi, transform_request, transform_response, transform_response_list,
    validate_chain, VersionNotFoundError,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{DataMigrationRegistry, FsMigrationStore, MigrationStore};

// Function for integration testing
pub async fn run_server(app: axum::Router) -> anyhow::Result<()> {
    use axum::serve;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    // Load configuration
    let config = crate::config::AppConfig::load()?;

    // Load the migration chain
    let store = crate::store::FsMigrationStore::new(&config.versioning.migrations_dir);
    let migrations = store.load_migrations().await?;

    // Wrap the application router with the versioning middleware
    let state = Arc::new(VersioningState::new(config.versioning.clone(), migrations));
    let app = with_versioning(app, state);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}
