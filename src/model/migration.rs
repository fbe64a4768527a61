use thiserror::Error;

use crate::model::{DataMigrationSet, Version, VersionDelta};

/// Identity of a migration another migration can depend on:
/// (chain identity, target version).
pub type MigrationRef = (String, Version);

#[derive(Debug, Error)]
pub enum MigrationError {
    /// A persisted migration record is structurally invalid.
    #[error("failed to load migration {path}: {reason}")]
    Load { path: String, reason: String },
    /// The migration chain is broken (dependency mismatch, duplicate
    /// sequence, second genesis migration).
    #[error("migration chain is broken: {0}")]
    Chain(String),
    /// A new migration file could not be generated.
    #[error("failed to generate migration: {0}")]
    Generation(String),
}

/// One step in the migration chain.
///
/// Constructed once at load time, immutable thereafter. The ordered list of
/// these is the chain; every historical snapshot is derived from it by
/// forward replay.
#[derive(Debug, Clone)]
pub struct LoadedMigration {
    /// Application order. Strictly increasing and unique, not necessarily
    /// contiguous.
    pub sequence: u32,
    /// Human label, no semantic role
    pub slug: String,
    /// (chain identity, version) pairs that must already be reachable
    pub dependencies: Vec<MigrationRef>,
    /// None marks the genesis migration springing from the empty snapshot
    pub from_version: Option<Version>,
    pub to_version: Version,
    pub delta: VersionDelta,
    /// Hand-written payload transformers accompanying this delta
    pub data_migrations: Option<DataMigrationSet>,
}

impl LoadedMigration {
    /// The data migration set, or an empty one if none was registered.
    pub fn data_migrations(&self) -> std::borrow::Cow<'_, DataMigrationSet> {
        match &self.data_migrations {
            Some(set) => std::borrow::Cow::Borrowed(set),
            None => std::borrow::Cow::Owned(DataMigrationSet::default()),
        }
    }
}
