//! Ruleset reconciliation
//!
//! For every repository of a mapping file the reconciler:
//!
//! 1. loads each desired ruleset definition (file or inline),
//! 2. lists the rulesets owned by the repository (not inherited from the org),
//! 3. deletes every ruleset whose name is not desired,
//! 4. updates desired rulesets that already exist and creates the rest.
//!
//! Names match case-insensitively everywhere, so `Protect-Main` on GitHub is the
//! same ruleset as `protect-main.json` in the mapping. An update whose body already
//! matches the remote ruleset is skipped, which makes a second run a no-op.

use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api::{Fetched, RulesetApi};
use crate::mapping::{RepoRulesets, RulesetSource};
use crate::models::{name_key, RemoteRuleset};
use crate::report::{Action, RecordStatus, ReconcileReport};

/// Failure to load one ruleset definition
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("ruleset file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read ruleset file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ruleset file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("ruleset `{0}` must be a JSON object")]
    NotAnObject(String),
}

/// A ruleset body ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct RulesetDefinition {
    pub name: String,
    pub body: Value,
}

/// Load the body of a ruleset source.
///
/// A file definition without a `name` is named after its file.
pub fn load_definition(source: &RulesetSource) -> Result<RulesetDefinition, DefinitionError> {
    let fallback_name = source.declared_name().unwrap_or_default();

    let body = match source {
        RulesetSource::Inline(body) => body.clone(),
        RulesetSource::File(path) => {
            if !path.is_file() {
                return Err(DefinitionError::NotFound(path.clone()));
            }
            let content =
                std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
                    path: path.clone(),
                    source,
                })?;
            serde_json::from_str(&content).map_err(|source| DefinitionError::Parse {
                path: path.clone(),
                source,
            })?
        }
    };

    let Value::Object(mut fields) = body else {
        return Err(DefinitionError::NotAnObject(fallback_name));
    };

    let name = match fields.get("name").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => {
            fields.insert("name".to_string(), Value::String(fallback_name.clone()));
            fallback_name
        }
    };

    Ok(RulesetDefinition {
        name,
        body: Value::Object(fields),
    })
}

/// Whether `actual` already carries every value of `expected`.
///
/// GitHub echoes extra fields (`id`, `_links`, timestamps) that a definition never
/// contains; those are ignored. Arrays must match element by element.
pub fn json_contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected
            .iter()
            .all(|(key, value)| match actual.get(key) {
                Some(found) => json_contains(found, value),
                None => is_empty_value(value),
            }),
        (Value::Array(actual), Value::Array(expected)) => {
            actual.len() == expected.len()
                && actual
                    .iter()
                    .zip(expected)
                    .all(|(found, value)| json_contains(found, value))
        }
        _ => actual == expected,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

/// Reconciles repository rulesets for one owner
pub struct RulesetReconciler<'a> {
    api: &'a dyn RulesetApi,
    owner: String,
    dry_run: bool,
}

impl<'a> RulesetReconciler<'a> {
    pub fn new(api: &'a dyn RulesetApi, owner: impl Into<String>, dry_run: bool) -> Self {
        Self {
            api,
            owner: owner.into(),
            dry_run,
        }
    }

    /// Reconcile every repository in order; a failing repository never stops the rest
    pub async fn reconcile(&self, repos: &[RepoRulesets]) -> ReconcileReport {
        let start_time = Instant::now();
        let mut report = ReconcileReport::new(&self.owner);

        info!("Processing rulesets for owner: {}", self.owner);

        for entry in repos {
            self.reconcile_repo(entry, &mut report).await;
            report.repositories += 1;
        }

        report.duration = start_time.elapsed();
        report
    }

    async fn reconcile_repo(&self, entry: &RepoRulesets, report: &mut ReconcileReport) {
        let repo = entry.repo.as_str();
        let full_name = format!("{}/{}", self.owner, repo);
        debug!(repo = %full_name, "Reconciling {} desired rulesets", entry.sources.len());

        // Every declared name is protected from deletion, even when its body fails to load
        let mut desired_names: HashSet<String> = entry
            .sources
            .iter()
            .filter_map(RulesetSource::declared_name)
            .map(|name| name_key(&name))
            .collect();

        let mut definitions = Vec::with_capacity(entry.sources.len());
        let mut loaded_names = HashSet::new();
        for source in &entry.sources {
            match load_definition(source) {
                Ok(definition) => {
                    if let Some(declared) = source.declared_name() {
                        if name_key(&declared) != name_key(&definition.name) {
                            warn!(
                                repo = %full_name,
                                ruleset = %definition.name,
                                "File name `{}` differs from the ruleset name; a remote `{}` is kept but never updated",
                                declared,
                                declared
                            );
                        }
                    }

                    let key = name_key(&definition.name);
                    desired_names.insert(key.clone());
                    if !loaded_names.insert(key) {
                        let message = format!("ruleset `{}` is defined more than once", definition.name);
                        error!(repo = %full_name, ruleset = %definition.name, "{}", message);
                        report.record(repo, &definition.name, Action::Load, RecordStatus::Failed, message);
                        continue;
                    }
                    definitions.push(definition);
                }
                Err(e) => {
                    let resource = source.declared_name().unwrap_or_default();
                    error!(repo = %full_name, ruleset = %resource, "Failed to load ruleset: {}", e);
                    report.record(repo, &resource, Action::Load, RecordStatus::Failed, e.to_string());
                }
            }
        }

        let existing = match self.api.list_rulesets(&self.owner, repo).await {
            Fetched::NotFound => {
                info!(repo = %full_name, "No rulesets found, creating all");
                Vec::new()
            }
            Fetched::Found(rulesets) => rulesets
                .into_iter()
                .filter(RemoteRuleset::is_repository_owned)
                .collect(),
            Fetched::Failed(outcome) => {
                error!(repo = %full_name, "Failed to fetch existing rulesets: {}", outcome);
                report.record(repo, "", Action::Fetch, RecordStatus::Failed, outcome.to_string());
                return;
            }
        };

        for ruleset in &existing {
            if !desired_names.contains(&name_key(&ruleset.name)) {
                self.delete(repo, &full_name, ruleset, report).await;
            }
        }

        for definition in &definitions {
            let key = name_key(&definition.name);
            let current = existing.iter().find(|ruleset| name_key(&ruleset.name) == key);

            match current {
                Some(ruleset) => self.update(repo, &full_name, ruleset, definition, report).await,
                None => self.create(repo, &full_name, definition, report).await,
            }
        }
    }

    async fn delete(
        &self,
        repo: &str,
        full_name: &str,
        ruleset: &RemoteRuleset,
        report: &mut ReconcileReport,
    ) {
        if self.dry_run {
            info!(repo = %full_name, ruleset = %ruleset.name, "Would delete ruleset");
            report.record(repo, &ruleset.name, Action::Delete, RecordStatus::Planned, "dry run");
            return;
        }

        let outcome = self.api.delete_ruleset(&self.owner, repo, ruleset.id).await;
        if outcome.is_success() {
            info!(repo = %full_name, ruleset = %ruleset.name, "Deleted ruleset");
            report.record(repo, &ruleset.name, Action::Delete, RecordStatus::Done, outcome.to_string());
        } else {
            error!(repo = %full_name, ruleset = %ruleset.name, "Failed to delete ruleset: {}", outcome);
            report.record(repo, &ruleset.name, Action::Delete, RecordStatus::Failed, outcome.to_string());
        }
    }

    async fn update(
        &self,
        repo: &str,
        full_name: &str,
        ruleset: &RemoteRuleset,
        definition: &RulesetDefinition,
        report: &mut ReconcileReport,
    ) {
        match self.api.get_ruleset(&self.owner, repo, ruleset.id).await {
            Fetched::Found(remote) if json_contains(&remote, &definition.body) => {
                debug!(repo = %full_name, ruleset = %definition.name, "Ruleset up to date");
                report.record(repo, &definition.name, Action::Keep, RecordStatus::Done, "up to date");
                return;
            }
            Fetched::Found(_) => {}
            Fetched::NotFound => {
                debug!(repo = %full_name, ruleset = %definition.name, "Ruleset disappeared before update");
            }
            Fetched::Failed(outcome) => {
                warn!(
                    repo = %full_name,
                    ruleset = %definition.name,
                    "Could not fetch ruleset for comparison, replacing it: {}",
                    outcome
                );
            }
        }

        if self.dry_run {
            info!(repo = %full_name, ruleset = %definition.name, "Would update ruleset");
            report.record(repo, &definition.name, Action::Update, RecordStatus::Planned, "dry run");
            return;
        }

        let outcome = self
            .api
            .update_ruleset(&self.owner, repo, ruleset.id, &definition.body)
            .await;
        if outcome.is_success() {
            info!(repo = %full_name, ruleset = %definition.name, "Ruleset updated");
            report.record(repo, &definition.name, Action::Update, RecordStatus::Done, outcome.to_string());
        } else {
            error!(repo = %full_name, ruleset = %definition.name, "Failed to update ruleset: {}", outcome);
            report.record(repo, &definition.name, Action::Update, RecordStatus::Failed, outcome.to_string());
        }
    }

    async fn create(
        &self,
        repo: &str,
        full_name: &str,
        definition: &RulesetDefinition,
        report: &mut ReconcileReport,
    ) {
        if self.dry_run {
            info!(repo = %full_name, ruleset = %definition.name, "Would create ruleset");
            report.record(repo, &definition.name, Action::Create, RecordStatus::Planned, "dry run");
            return;
        }

        let outcome = self
            .api
            .create_ruleset(&self.owner, repo, &definition.body)
            .await;
        if outcome.is_success() {
            info!(repo = %full_name, ruleset = %definition.name, "Ruleset created");
            report.record(repo, &definition.name, Action::Create, RecordStatus::Done, outcome.to_string());
        } else {
            error!(repo = %full_name, ruleset = %definition.name, "Failed to create ruleset: {}", outcome);
            report.record(repo, &definition.name, Action::Create, RecordStatus::Failed, outcome.to_string());
        }
    }
}
