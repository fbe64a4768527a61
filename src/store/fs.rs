use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::logic::chain::{get_known_api_state, validate_chain};
use crate::logic::diff::create_delta;
use crate::model::{
    ApiVersion, LoadedMigration, MigrationError, MigrationRef, Version, VersionDelta,
};
use crate::store::traits::{DataMigrationRegistry, MigrationStore};

const SLUG_MAX_LENGTH: usize = 50;

/// Filesystem-backed migration store: one JSON document per migration, named
/// `m_{sequence:04}_{slug}.json`. Files not matching that shape are ignored.
pub struct FsMigrationStore {
    root: PathBuf,
    /// Identity of this chain in dependency refs, defaults to the directory name
    chain_identity: String,
    registry: DataMigrationRegistry,
}

/// The persisted shape of one migration record.
#[derive(Debug, Serialize, Deserialize)]
struct MigrationRecord {
    #[serde(default)]
    dependencies: Vec<MigrationRef>,
    #[serde(default)]
    from_version: Option<Version>,
    #[serde(default)]
    to_version: Option<Version>,
    #[serde(default)]
    delta: Option<VersionDelta>,
}

impl FsMigrationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let chain_identity = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.to_string_lossy().into_owned());
        Self {
            root,
            chain_identity,
            registry: DataMigrationRegistry::new(),
        }
    }

    pub fn with_registry(mut self, registry: DataMigrationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_chain_identity(mut self, chain_identity: impl Into<String>) -> Self {
        self.chain_identity = chain_identity.into();
        self
    }

    pub fn chain_identity(&self) -> &str {
        &self.chain_identity
    }

    fn load_from_disk(&self) -> Result<Vec<LoadedMigration>> {
        if !self.root.is_dir() {
            // no migrations yet
            return Ok(Vec::new());
        }

        let mut migrations = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some((sequence, slug)) = parse_migration_filename(&file_name.to_string_lossy())
            else {
                continue;
            };
            migrations.push(self.load_record(&entry.path(), sequence, slug)?);
        }

        migrations.sort_by_key(|m| m.sequence);
        validate_chain(&migrations, &self.chain_identity)?;
        Ok(migrations)
    }

    fn load_record(&self, path: &Path, sequence: u32, slug: String) -> Result<LoadedMigration> {
        let load_error = |reason: String| MigrationError::Load {
            path: path.display().to_string(),
            reason,
        };

        let contents =
            std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let record: MigrationRecord =
            serde_json::from_str(&contents).map_err(|e| load_error(e.to_string()))?;

        let to_version = record
            .to_version
            .ok_or_else(|| load_error("missing required 'to_version' field".to_string()))?;
        let delta = record
            .delta
            .ok_or_else(|| load_error("missing required 'delta' field".to_string()))?;

        Ok(LoadedMigration {
            sequence,
            slug,
            dependencies: record.dependencies,
            from_version: record.from_version,
            to_version: to_version.clone(),
            delta,
            data_migrations: self.registry.get(&to_version).cloned(),
        })
    }
}

#[async_trait::async_trait]
impl MigrationStore for FsMigrationStore {
    async fn load_migrations(&self) -> Result<Vec<LoadedMigration>> {
        self.load_from_disk()
    }

    async fn detect_changes(&self, current: &ApiVersion) -> Result<Option<VersionDelta>> {
        let migrations = self.load_from_disk()?;
        let known_state = get_known_api_state(&migrations);
        let delta = create_delta(&known_state, current);
        Ok(if delta.is_empty() { None } else { Some(delta) })
    }

    async fn generate_migration(
        &self,
        current: &ApiVersion,
        version_name: &str,
        description: &str,
    ) -> Result<Option<PathBuf>> {
        let migrations = self.load_from_disk()?;
        let known_state = get_known_api_state(&migrations);
        let delta = create_delta(&known_state, current);
        if delta.is_empty() {
            return Ok(None);
        }

        let (from_version, dependencies) = match migrations.last() {
            Some(head) => (
                Some(head.to_version.clone()),
                vec![(self.chain_identity.clone(), head.to_version.clone())],
            ),
            None => (None, Vec::new()),
        };

        let sequence = next_sequence(&migrations);
        let slug = slugify(description, SLUG_MAX_LENGTH);
        let filename = format!("m_{:04}_{}.json", sequence, slug);

        let record = MigrationRecord {
            dependencies,
            from_version,
            to_version: Some(version_name.to_string()),
            delta: Some(delta),
        };

        std::fs::create_dir_all(&self.root).map_err(|e| {
            MigrationError::Generation(format!(
                "cannot create migrations directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let path = self.root.join(filename);
        let contents = serde_json::to_string_pretty(&record)
            .map_err(|e| MigrationError::Generation(e.to_string()))?;
        std::fs::write(&path, contents).map_err(|e| {
            MigrationError::Generation(format!("cannot write {}: {}", path.display(), e))
        })?;

        log::info!("generated migration {}", path.display());
        Ok(Some(path))
    }
}

/// Parse "m_0001_initial.json" -> (1, "initial"), or None for anything else.
fn parse_migration_filename(filename: &str) -> Option<(u32, String)> {
    let rest = filename.strip_suffix(".json")?.strip_prefix("m_")?;
    let bytes = rest.as_bytes();
    if bytes.len() < 6 || !bytes[..4].iter().all(u8::is_ascii_digit) || bytes[4] != b'_' {
        return None;
    }
    let sequence: u32 = rest[..4].parse().ok()?;
    Some((sequence, rest[5..].to_string()))
}

/// Next sequence number: max + 1, or 1 for an empty chain.
fn next_sequence(migrations: &[LoadedMigration]) -> u32 {
    migrations.iter().map(|m| m.sequence).max().unwrap_or(0) + 1
}

/// Turn a human description into a filename slug.
///
/// "Add Users Endpoint" -> "add_users_endpoint"; "v2.0-release!" -> "v20_release".
/// Long slugs truncate at a word boundary where one exists in the second half.
fn slugify(name: &str, max_length: usize) -> String {
    let mut slug: String = name.to_lowercase().replace([' ', '-'], "_");
    slug.retain(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    while slug.contains("__") {
        slug = slug.replace("__", "_");
    }
    let mut slug = slug.trim_matches('_').to_string();

    if slug.len() > max_length {
        let truncated = &slug[..max_length];
        let cut = match truncated.rfind('_') {
            Some(idx) if idx > max_length / 2 => &truncated[..idx],
            _ => truncated,
        };
        slug = cut.trim_end_matches('_').to_string();
    }

    if slug.is_empty() {
        "migration".to_string()
    } else {
        slug
    }
}
