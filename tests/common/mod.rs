//! Common test utilities and helpers for repowarden tests

#![allow(dead_code)]

use assert_fs::prelude::*;
use assert_fs::TempDir;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use repowarden::models::{name_key, OrgTeam, RemoteRuleset, RemoteTeam};
use repowarden::{ApiOutcome, Fetched, Permission, RulesetApi, TeamApi};

/// A call received by the fake, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListRulesets { repo: String },
    GetRuleset { repo: String, id: u64 },
    CreateRuleset { repo: String, name: String },
    UpdateRuleset { repo: String, id: u64, name: String },
    DeleteRuleset { repo: String, id: u64 },
    ListOrgTeams,
    ListRepoTeams { repo: String },
    SetTeam { repo: String, slug: String, permission: Permission },
    RemoveTeam { repo: String, slug: String },
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::CreateRuleset { .. }
                | Call::UpdateRuleset { .. }
                | Call::DeleteRuleset { .. }
                | Call::SetTeam { .. }
                | Call::RemoveTeam { .. }
        )
    }

    pub fn repo(&self) -> Option<&str> {
        match self {
            Call::ListOrgTeams => None,
            Call::ListRulesets { repo }
            | Call::GetRuleset { repo, .. }
            | Call::CreateRuleset { repo, .. }
            | Call::UpdateRuleset { repo, .. }
            | Call::DeleteRuleset { repo, .. }
            | Call::ListRepoTeams { repo }
            | Call::SetTeam { repo, .. }
            | Call::RemoveTeam { repo, .. } => Some(repo),
        }
    }
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    rulesets: HashMap<String, Vec<(u64, Value)>>,
    org_teams: Vec<OrgTeam>,
    repo_teams: HashMap<String, Vec<(u64, Permission)>>,
    /// Listing returns 404
    missing_repos: HashSet<String>,
    /// Listing returns 500
    failing_repos: HashSet<String>,
    /// Every mutation returns 403
    read_only_repos: HashSet<String>,
    org_teams_fail: bool,
    calls: Vec<Call>,
}

/// In-memory GitHub that behaves like the rulesets and teams endpoints
pub struct FakeGitHub {
    owner: String,
    state: Mutex<FakeState>,
}

impl FakeGitHub {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            state: Mutex::new(FakeState {
                next_id: 100,
                ..FakeState::default()
            }),
        }
    }

    pub fn with_ruleset(self, repo: &str, name: &str) -> Self {
        self.with_ruleset_body(repo, json!({ "name": name, "enforcement": "active" }))
    }

    pub fn with_ruleset_body(self, repo: &str, body: Value) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = state.next_id;
            state
                .rulesets
                .entry(repo.to_string())
                .or_default()
                .push((id, body));
        }
        self
    }

    pub fn with_org_team(self, name: &str, slug: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = state.next_id;
            state.org_teams.push(OrgTeam {
                id,
                name: name.to_string(),
                slug: slug.to_string(),
            });
        }
        self
    }

    pub fn with_team_access(self, repo: &str, slug: &str, permission: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = state
                .org_teams
                .iter()
                .find(|t| t.slug == slug)
                .map(|t| t.id)
                .expect("org team must be registered first");
            state
                .repo_teams
                .entry(repo.to_string())
                .or_default()
                .push((id, Permission::from(permission)));
        }
        self
    }

    pub fn with_missing_repo(self, repo: &str) -> Self {
        self.state.lock().unwrap().missing_repos.insert(repo.to_string());
        self
    }

    pub fn with_failing_repo(self, repo: &str) -> Self {
        self.state.lock().unwrap().failing_repos.insert(repo.to_string());
        self
    }

    pub fn with_read_only_repo(self, repo: &str) -> Self {
        self.state.lock().unwrap().read_only_repos.insert(repo.to_string());
        self
    }

    pub fn with_failing_org_teams(self) -> Self {
        self.state.lock().unwrap().org_teams_fail = true;
        self
    }

    pub fn set_failing_org_teams(&self, failing: bool) {
        self.state.lock().unwrap().org_teams_fail = failing;
    }

    /// Ruleset names on a repository, sorted
    pub fn ruleset_names(&self, repo: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .rulesets
            .get(repo)
            .map(|rulesets| {
                rulesets
                    .iter()
                    .map(|(_, body)| body["name"].as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn ruleset_body(&self, repo: &str, name: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state.rulesets.get(repo).and_then(|rulesets| {
            rulesets
                .iter()
                .find(|(_, body)| body["name"] == name)
                .map(|(_, body)| body.clone())
        })
    }

    /// Team slug to permission on a repository
    pub fn team_permissions(&self, repo: &str) -> BTreeMap<String, Permission> {
        let state = self.state.lock().unwrap();
        state
            .repo_teams
            .get(repo)
            .map(|assocs| {
                assocs
                    .iter()
                    .filter_map(|(id, permission)| {
                        state
                            .org_teams
                            .iter()
                            .find(|t| t.id == *id)
                            .map(|t| (t.slug.clone(), permission.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn log(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn forbidden(&self, repo: &str) -> Option<ApiOutcome> {
        let state = self.state.lock().unwrap();
        state
            .read_only_repos
            .contains(repo)
            .then(|| ApiOutcome::from_status(403, "Resource not accessible by integration"))
    }

    fn check_owner(&self, owner: &str) {
        assert_eq!(owner, self.owner, "call addressed to an unexpected owner");
    }
}

#[async_trait]
impl RulesetApi for FakeGitHub {
    async fn list_rulesets(&self, owner: &str, repo: &str) -> Fetched<Vec<RemoteRuleset>> {
        self.check_owner(owner);
        self.log(Call::ListRulesets { repo: repo.to_string() });

        let state = self.state.lock().unwrap();
        if state.failing_repos.contains(repo) {
            return Fetched::Failed(ApiOutcome::from_status(500, "Server Error"));
        }
        if state.missing_repos.contains(repo) {
            return Fetched::NotFound;
        }

        Fetched::Found(
            state
                .rulesets
                .get(repo)
                .map(|rulesets| {
                    rulesets
                        .iter()
                        .map(|(id, body)| RemoteRuleset {
                            id: *id,
                            name: body["name"].as_str().unwrap_or_default().to_string(),
                            source_type: Some("Repository".to_string()),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        )
    }

    async fn get_ruleset(&self, owner: &str, repo: &str, id: u64) -> Fetched<Value> {
        self.check_owner(owner);
        self.log(Call::GetRuleset { repo: repo.to_string(), id });

        let state = self.state.lock().unwrap();
        let found = state
            .rulesets
            .get(repo)
            .and_then(|rulesets| rulesets.iter().find(|(rid, _)| *rid == id));

        match found {
            Some((id, body)) => {
                let mut full = body.clone();
                full["id"] = json!(id);
                full["source_type"] = json!("Repository");
                full["source"] = json!(format!("{}/{}", self.owner, repo));
                full["_links"] = json!({ "self": { "href": format!("https://api.github.com/repos/{}/{}/rulesets/{}", self.owner, repo, id) } });
                Fetched::Found(full)
            }
            None => Fetched::NotFound,
        }
    }

    async fn create_ruleset(&self, owner: &str, repo: &str, body: &Value) -> ApiOutcome {
        self.check_owner(owner);
        let name = body["name"].as_str().unwrap_or_default().to_string();
        self.log(Call::CreateRuleset { repo: repo.to_string(), name: name.clone() });
        if let Some(outcome) = self.forbidden(repo) {
            return outcome;
        }

        let mut state = self.state.lock().unwrap();
        let taken = state
            .rulesets
            .get(repo)
            .map_or(false, |rulesets| {
                rulesets.iter().any(|(_, b)| {
                    b["name"].as_str().map(name_key) == Some(name_key(&name))
                })
            });
        if taken {
            return ApiOutcome::from_status(422, "Name must be unique");
        }

        state.next_id += 1;
        let id = state.next_id;
        state.missing_repos.remove(repo);
        state
            .rulesets
            .entry(repo.to_string())
            .or_default()
            .push((id, body.clone()));
        ApiOutcome::success(201, "201 Created")
    }

    async fn update_ruleset(&self, owner: &str, repo: &str, id: u64, body: &Value) -> ApiOutcome {
        self.check_owner(owner);
        let name = body["name"].as_str().unwrap_or_default().to_string();
        self.log(Call::UpdateRuleset { repo: repo.to_string(), id, name });
        if let Some(outcome) = self.forbidden(repo) {
            return outcome;
        }

        let mut state = self.state.lock().unwrap();
        let slot = state
            .rulesets
            .get_mut(repo)
            .and_then(|rulesets| rulesets.iter_mut().find(|(rid, _)| *rid == id));
        match slot {
            Some((_, existing)) => {
                *existing = body.clone();
                ApiOutcome::success(200, "200 OK")
            }
            None => ApiOutcome::from_status(404, "Not Found"),
        }
    }

    async fn delete_ruleset(&self, owner: &str, repo: &str, id: u64) -> ApiOutcome {
        self.check_owner(owner);
        self.log(Call::DeleteRuleset { repo: repo.to_string(), id });
        if let Some(outcome) = self.forbidden(repo) {
            return outcome;
        }

        let mut state = self.state.lock().unwrap();
        match state.rulesets.get_mut(repo) {
            Some(rulesets) if rulesets.iter().any(|(rid, _)| *rid == id) => {
                rulesets.retain(|(rid, _)| *rid != id);
                ApiOutcome::success(204, "204 No Content")
            }
            _ => ApiOutcome::from_status(404, "Not Found"),
        }
    }
}

#[async_trait]
impl TeamApi for FakeGitHub {
    async fn list_org_teams(&self, org: &str) -> Fetched<Vec<OrgTeam>> {
        self.check_owner(org);
        self.log(Call::ListOrgTeams);

        let state = self.state.lock().unwrap();
        if state.org_teams_fail {
            return Fetched::Failed(ApiOutcome::from_status(401, "Bad credentials"));
        }
        Fetched::Found(state.org_teams.clone())
    }

    async fn list_repo_teams(&self, org: &str, repo: &str) -> Fetched<Vec<RemoteTeam>> {
        self.check_owner(org);
        self.log(Call::ListRepoTeams { repo: repo.to_string() });

        let state = self.state.lock().unwrap();
        if state.failing_repos.contains(repo) {
            return Fetched::Failed(ApiOutcome::from_status(502, "Bad Gateway"));
        }
        if state.missing_repos.contains(repo) {
            return Fetched::NotFound;
        }

        let teams = state
            .repo_teams
            .get(repo)
            .map(|assocs| {
                assocs
                    .iter()
                    .filter_map(|(id, permission)| {
                        state.org_teams.iter().find(|t| t.id == *id).map(|t| RemoteTeam {
                            id: t.id,
                            name: t.name.clone(),
                            slug: t.slug.clone(),
                            permission: permission.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Fetched::Found(teams)
    }

    async fn set_team_permission(
        &self,
        org: &str,
        team_slug: &str,
        repo: &str,
        permission: &Permission,
    ) -> ApiOutcome {
        self.check_owner(org);
        self.log(Call::SetTeam {
            repo: repo.to_string(),
            slug: team_slug.to_string(),
            permission: permission.clone(),
        });
        if let Some(outcome) = self.forbidden(repo) {
            return outcome;
        }

        let mut state = self.state.lock().unwrap();
        let Some(id) = state.org_teams.iter().find(|t| t.slug == team_slug).map(|t| t.id) else {
            return ApiOutcome::from_status(404, "Not Found");
        };
        let assocs = state.repo_teams.entry(repo.to_string()).or_default();
        match assocs.iter_mut().find(|(tid, _)| *tid == id) {
            Some((_, existing)) => *existing = permission.clone(),
            None => assocs.push((id, permission.clone())),
        }
        ApiOutcome::success(204, "204 No Content")
    }

    async fn remove_team(&self, org: &str, team_slug: &str, repo: &str) -> ApiOutcome {
        self.check_owner(org);
        self.log(Call::RemoveTeam {
            repo: repo.to_string(),
            slug: team_slug.to_string(),
        });
        if let Some(outcome) = self.forbidden(repo) {
            return outcome;
        }

        let mut state = self.state.lock().unwrap();
        let Some(id) = state.org_teams.iter().find(|t| t.slug == team_slug).map(|t| t.id) else {
            return ApiOutcome::from_status(404, "Not Found");
        };
        if let Some(assocs) = state.repo_teams.get_mut(repo) {
            assocs.retain(|(tid, _)| *tid != id);
        }
        ApiOutcome::success(204, "204 No Content")
    }
}

/// Temporary directory holding mapping files and ruleset definitions
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let child = self.dir.child(name);
        child.write_str(content).expect("Failed to write fixture");
        child.path().to_path_buf()
    }

    /// Write `rulesets/<name>.json` with a minimal ruleset body
    pub fn ruleset_file(&self, name: &str) -> PathBuf {
        self.write(
            &format!("rulesets/{}.json", name),
            &json!({ "name": name, "enforcement": "active" }).to_string(),
        )
    }
}
