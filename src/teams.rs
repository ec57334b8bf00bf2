//! Team permission reconciliation
//!
//! Each desired `(team, permission)` pair is resolved against the organization's
//! team directory and applied to the repository. Only after every pair of a
//! repository has been applied are the current associations fetched again and the
//! teams nobody asked for removed.

use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::api::{Fetched, TeamApi};
use crate::mapping::{RepoTeams, TeamGrant};
use crate::models::{OrgTeam, RemoteTeam};
use crate::report::{Action, RecordStatus, ReconcileReport};

/// Reconciles team access for the repositories of one organization
pub struct TeamReconciler<'a> {
    api: &'a dyn TeamApi,
    org: String,
    dry_run: bool,
    directory: OnceCell<Vec<OrgTeam>>,
}

impl<'a> TeamReconciler<'a> {
    pub fn new(api: &'a dyn TeamApi, org: impl Into<String>, dry_run: bool) -> Self {
        Self {
            api,
            org: org.into(),
            dry_run,
            directory: OnceCell::new(),
        }
    }

    /// Reconcile every repository in order; a failing repository never stops the rest
    pub async fn reconcile(&self, repos: &[RepoTeams]) -> ReconcileReport {
        let start_time = Instant::now();
        let mut report = ReconcileReport::new(&self.org);

        info!("Processing teams for organization: {}", self.org);

        for entry in repos {
            self.reconcile_repo(entry, &mut report).await;
            report.repositories += 1;
        }

        report.duration = start_time.elapsed();
        report
    }

    /// The organization's teams, fetched on first use.
    ///
    /// A failed fetch is not cached so the next repository tries again.
    async fn directory(&self) -> Result<&[OrgTeam], String> {
        self.directory
            .get_or_try_init(|| async {
                self.api
                    .list_org_teams(&self.org)
                    .await
                    .or_empty()
                    .map_err(|outcome| outcome.to_string())
            })
            .await
            .map(Vec::as_slice)
    }

    async fn reconcile_repo(&self, entry: &RepoTeams, report: &mut ReconcileReport) {
        let repo = entry.repo.as_str();
        let full_name = format!("{}/{}", self.org, repo);
        debug!(repo = %full_name, "Reconciling {} desired teams", entry.grants.len());

        let directory = match self.directory().await {
            Ok(directory) => directory,
            Err(message) => {
                error!(repo = %full_name, "Failed to list organization teams: {}", message);
                report.record(repo, "", Action::Fetch, RecordStatus::Failed, message);
                return;
            }
        };

        let current = match self.fetch_current(repo, &full_name, report).await {
            Some(current) => current,
            None => return,
        };

        let mut desired_ids = HashSet::new();
        for grant in &entry.grants {
            let Some(team) = directory.iter().find(|team| team.matches(&grant.team)) else {
                warn!(repo = %full_name, team = %grant.team, "Team not found");
                report.record(
                    repo,
                    &grant.team,
                    Action::Resolve,
                    RecordStatus::Failed,
                    format!("team {} not found in {}", grant.team, self.org),
                );
                continue;
            };
            desired_ids.insert(team.id);

            match current.iter().find(|assoc| assoc.id == team.id) {
                Some(assoc) if assoc.permission == grant.permission => {
                    debug!(repo = %full_name, team = %team.slug, "Permission already {}", grant.permission);
                    report.record(repo, &grant.team, Action::Keep, RecordStatus::Done, grant.permission.to_string());
                }
                Some(assoc) => {
                    debug!(
                        repo = %full_name,
                        team = %team.slug,
                        "Permission differs: {} -> {}",
                        assoc.permission,
                        grant.permission
                    );
                    self.apply(repo, &full_name, team, grant, Action::Update, report).await;
                }
                None => {
                    self.apply(repo, &full_name, team, grant, Action::Create, report).await;
                }
            }
        }

        // Removal sees the state left behind by the pass above
        let refreshed = match self.fetch_current(repo, &full_name, report).await {
            Some(refreshed) => refreshed,
            None => return,
        };

        for assoc in &refreshed {
            let wanted = desired_ids.contains(&assoc.id)
                || entry.grants.iter().any(|grant| assoc.matches(&grant.team));
            if !wanted {
                self.remove(repo, &full_name, assoc, report).await;
            }
        }
    }

    async fn fetch_current(
        &self,
        repo: &str,
        full_name: &str,
        report: &mut ReconcileReport,
    ) -> Option<Vec<RemoteTeam>> {
        match self.api.list_repo_teams(&self.org, repo).await {
            Fetched::Found(teams) => Some(teams),
            Fetched::NotFound => {
                debug!(repo = %full_name, "No team associations found");
                Some(Vec::new())
            }
            Fetched::Failed(outcome) => {
                error!(repo = %full_name, "Failed to fetch repository teams: {}", outcome);
                report.record(repo, "", Action::Fetch, RecordStatus::Failed, outcome.to_string());
                None
            }
        }
    }

    async fn apply(
        &self,
        repo: &str,
        full_name: &str,
        team: &OrgTeam,
        grant: &TeamGrant,
        action: Action,
        report: &mut ReconcileReport,
    ) {
        if self.dry_run {
            info!(repo = %full_name, team = %team.slug, "Would {} team with {} permission", action, grant.permission);
            report.record(repo, &grant.team, action, RecordStatus::Planned, grant.permission.to_string());
            return;
        }

        let outcome = self
            .api
            .set_team_permission(&self.org, &team.slug, repo, &grant.permission)
            .await;
        if outcome.is_success() {
            match action {
                Action::Create => {
                    info!(repo = %full_name, team = %team.slug, "Added team with {} permission", grant.permission)
                }
                _ => {
                    info!(repo = %full_name, team = %team.slug, "Updated team permission to {}", grant.permission)
                }
            }
            report.record(repo, &grant.team, action, RecordStatus::Done, grant.permission.to_string());
        } else {
            error!(repo = %full_name, team = %team.slug, "Failed to {} team: {}", action, outcome);
            report.record(repo, &grant.team, action, RecordStatus::Failed, outcome.to_string());
        }
    }

    async fn remove(
        &self,
        repo: &str,
        full_name: &str,
        assoc: &RemoteTeam,
        report: &mut ReconcileReport,
    ) {
        if self.dry_run {
            info!(repo = %full_name, team = %assoc.slug, "Would remove team");
            report.record(repo, &assoc.slug, Action::Delete, RecordStatus::Planned, "dry run");
            return;
        }

        let outcome = self.api.remove_team(&self.org, &assoc.slug, repo).await;
        if outcome.is_success() {
            info!(repo = %full_name, team = %assoc.slug, "Removed team");
            report.record(repo, &assoc.slug, Action::Delete, RecordStatus::Done, outcome.to_string());
        } else {
            error!(repo = %full_name, team = %assoc.slug, "Failed to remove team: {}", outcome);
            report.record(repo, &assoc.slug, Action::Delete, RecordStatus::Failed, outcome.to_string());
        }
    }
}
