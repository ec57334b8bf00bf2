//! Sync entry points - load a mapping file and reconcile every repository in it
//!
//! A mapping file is parsed in full before the first remote call, so a malformed
//! file leaves GitHub untouched.

use std::path::Path;
use tracing::info;

use crate::api::{RulesetApi, TeamApi};
use crate::mapping::{self, MappingError};
use crate::report::ReconcileReport;
use crate::rulesets::RulesetReconciler;
use crate::teams::TeamReconciler;
use crate::Settings;

fn owner_for(settings: &Settings, path: &Path) -> Result<String, MappingError> {
    settings.owner_for(path).ok_or_else(|| MappingError::Parse {
        path: path.to_path_buf(),
        message: "cannot derive an owner from the file name".to_string(),
    })
}

/// Reconcile repository rulesets with a ruleset mapping file
pub async fn sync_rulesets(
    api: &dyn RulesetApi,
    settings: &Settings,
    path: &Path,
) -> Result<ReconcileReport, MappingError> {
    let repos = mapping::load_ruleset_mapping(path)?;
    let owner = owner_for(settings, path)?;

    info!(
        "Loaded {} repositories from {:?} for owner {}",
        repos.len(),
        path,
        owner
    );

    let reconciler = RulesetReconciler::new(api, owner, settings.reconcile.dry_run);
    Ok(reconciler.reconcile(&repos).await)
}

/// Reconcile repository team access with a team mapping file
pub async fn sync_teams(
    api: &dyn TeamApi,
    settings: &Settings,
    path: &Path,
) -> Result<ReconcileReport, MappingError> {
    let repos = mapping::load_team_mapping(path)?;
    let org = owner_for(settings, path)?;

    info!(
        "Loaded {} repositories from {:?} for organization {}",
        repos.len(),
        path,
        org
    );

    let reconciler = TeamReconciler::new(api, org, settings.reconcile.dry_run);
    Ok(reconciler.reconcile(&repos).await)
}
