use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub versioning: VersioningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Settings for the versioning middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Request header carrying the requested API version
    pub version_header: String,
    /// Query parameter checked when the header is absent
    pub version_query_param: String,
    /// Version assumed when the client sends none ("latest" resolves to the
    /// chain head)
    pub default_version: String,
    /// Directory holding the migration JSON files
    pub migrations_dir: String,
    /// Only requests under this prefix are versioned
    pub api_prefix: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            versioning: VersioningConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            version_header: "X-API-Version".to_string(),
            version_query_param: "api_version".to_string(),
            default_version: "latest".to_string(),
            migrations_dir: "migrations".to_string(),
            api_prefix: "/api/".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("config").required(false));

        // Add environment variables with prefix "GANTRY_"
        config = config.add_source(
            config::Environment::with_prefix("GANTRY")
                .separator("_")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Get the server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
