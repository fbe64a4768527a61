use std::collections::HashSet;

use crate::logic::diff::apply_delta_forwards;
use crate::model::{
    Action, ApiVersion, HttpMethod, LoadedMigration, MigrationError, MigrationRef, Version,
    VersionDelta,
};

/// Validate that migration dependencies form a valid chain.
///
/// Walks migrations in ascending sequence order and checks that every
/// dependency was established by an earlier migration. Duplicate sequence
/// numbers and a second genesis migration (`from_version: None`) are rejected
/// outright. A chain with zero migrations is trivially valid.
pub fn validate_chain(
    migrations: &[LoadedMigration],
    chain_identity: &str,
) -> Result<(), MigrationError> {
    let mut available: HashSet<MigrationRef> = HashSet::new();
    let mut seen_sequences: HashSet<u32> = HashSet::new();
    let mut genesis_seen = false;

    for migration in migrations {
        if !seen_sequences.insert(migration.sequence) {
            return Err(MigrationError::Chain(format!(
                "duplicate sequence number {} (migration '{}')",
                migration.sequence, migration.slug
            )));
        }
        if migration.from_version.is_none() {
            if genesis_seen {
                return Err(MigrationError::Chain(format!(
                    "migration '{}' is a second genesis migration (from_version is null)",
                    migration.slug
                )));
            }
            genesis_seen = true;
        }
        for dep in &migration.dependencies {
            if !available.contains(dep) {
                return Err(MigrationError::Chain(format!(
                    "migration '{}' depends on ({}, {}) which is not available",
                    migration.slug, dep.0, dep.1
                )));
            }
        }
        available.insert((chain_identity.to_string(), migration.to_version.clone()));
    }

    Ok(())
}

/// Reconstruct the API state by applying all migrations forwards from empty.
/// This is the only way current/historical snapshots are derived.
pub fn get_known_api_state(migrations: &[LoadedMigration]) -> ApiVersion {
    let mut state = ApiVersion::empty();
    for migration in migrations {
        state = apply_delta_forwards(&state, &migration.delta);
    }
    state
}

/// Reconstruct the API state as it existed at a specific version, by applying
/// migrations up to and including the one targeting that version. Returns None
/// when the version is absent from the chain ("version not found" is an
/// expected, client-triggerable condition).
pub fn get_api_state_at_version(
    migrations: &[LoadedMigration],
    target_version: &str,
) -> Option<ApiVersion> {
    let target_idx = migrations
        .iter()
        .position(|m| m.to_version == target_version)?;
    Some(get_known_api_state(&migrations[..=target_idx]))
}

/// The newest version in the chain: the last migration's target version.
pub fn get_latest_version(migrations: &[LoadedMigration]) -> Option<&Version> {
    migrations.last().map(|m| &m.to_version)
}

/// Detect path renames within a single delta.
///
/// An `OperationRemoved` pairs with an `OperationAdded` when method and
/// operation_id match: the operation moved to a new route template. Each
/// removed operation consumes at most one added operation; the first match
/// wins. Returns (old_path, new_path, method) triples for the path-rewrite
/// layer.
pub fn detect_path_renames(delta: &VersionDelta) -> Vec<(String, String, HttpMethod)> {
    let removed: Vec<(&String, HttpMethod, &str)> = delta
        .actions
        .iter()
        .filter_map(|action| match action {
            Action::OperationRemoved {
                path,
                method,
                old_operation,
            } => Some((path, *method, old_operation.operation_id.as_str())),
            _ => None,
        })
        .collect();

    let mut added: Vec<Option<(&String, HttpMethod, &str)>> = delta
        .actions
        .iter()
        .filter_map(|action| match action {
            Action::OperationAdded {
                path,
                method,
                new_operation,
            } => Some(Some((path, *method, new_operation.operation_id.as_str()))),
            _ => None,
        })
        .collect();

    let mut renames = Vec::new();
    for (old_path, method, operation_id) in removed {
        let matched = added.iter_mut().find(|slot| {
            slot.map_or(false, |(_, added_method, added_id)| {
                added_method == method && added_id == operation_id
            })
        });
        if let Some((new_path, _, _)) = matched.and_then(Option::take) {
            renames.push((old_path.clone(), new_path.clone(), method));
        }
    }
    renames
}
