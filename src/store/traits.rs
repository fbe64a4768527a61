use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::model::{ApiVersion, DataMigrationSet, LoadedMigration, Version, VersionDelta};

/// Code-registered data migration sets, keyed by the target version of the
/// migration they accompany.
///
/// Deltas persist as JSON but transformer functions are code; the application
/// registers them here and the store attaches each set to its migration at
/// load time.
#[derive(Debug, Default)]
pub struct DataMigrationRegistry {
    sets: HashMap<Version, DataMigrationSet>,
}

impl DataMigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, to_version: impl Into<Version>, set: DataMigrationSet) -> Self {
        self.sets.insert(to_version.into(), set);
        self
    }

    pub fn get(&self, to_version: &str) -> Option<&DataMigrationSet> {
        self.sets.get(to_version)
    }
}

/// Persistence seam for the migration chain.
#[async_trait::async_trait]
pub trait MigrationStore: Send + Sync {
    /// Load all migrations, sorted by sequence and chain-validated.
    async fn load_migrations(&self) -> Result<Vec<LoadedMigration>>;

    /// Delta between the replayed chain state and the live snapshot, or None
    /// when there is nothing to migrate.
    async fn detect_changes(&self, current: &ApiVersion) -> Result<Option<VersionDelta>>;

    /// Persist a new migration for the detected changes. Returns the location
    /// of the new record, or None when no changes were detected.
    async fn generate_migration(
        &self,
        current: &ApiVersion,
        version_name: &str,
        description: &str,
    ) -> Result<Option<PathBuf>>;
}
