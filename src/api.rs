//! Remote API abstraction
//!
//! Reconcilers talk to GitHub only through [`RulesetApi`] and [`TeamApi`]. Every
//! call resolves to a value: failures are classified into an [`ApiOutcome`] instead of
//! being raised, so one bad repository never stops a batch.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::models::{OrgTeam, Permission, RemoteRuleset, RemoteTeam};

/// Classification of a remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    NotFound,
    Conflict,
    Failed,
}

/// Result of a single remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiOutcome {
    pub status: OutcomeStatus,
    /// HTTP status code, absent when no response was received
    pub code: Option<u16>,
    pub message: String,
}

impl ApiOutcome {
    pub fn success(code: u16, message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            code: Some(code),
            message: message.into(),
        }
    }

    /// Classify an HTTP status code
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let status = match code {
            200..=299 => OutcomeStatus::Success,
            404 => OutcomeStatus::NotFound,
            409 => OutcomeStatus::Conflict,
            _ => OutcomeStatus::Failed,
        };
        Self {
            status,
            code: Some(code),
            message: message.into(),
        }
    }

    /// A request that never produced a response
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            code: None,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

impl fmt::Display for ApiOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} - {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Result of listing a resource collection
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Found(T),
    /// The collection (or its parent) does not exist yet
    NotFound,
    Failed(ApiOutcome),
}

impl<T: Default> Fetched<T> {
    /// "Not found" means nothing exists yet
    pub fn or_empty(self) -> Result<T, ApiOutcome> {
        match self {
            Self::Found(items) => Ok(items),
            Self::NotFound => Ok(T::default()),
            Self::Failed(outcome) => Err(outcome),
        }
    }
}

/// Repository ruleset endpoints
#[async_trait]
pub trait RulesetApi: Send + Sync {
    /// List rulesets defined on the repository itself
    async fn list_rulesets(&self, owner: &str, repo: &str) -> Fetched<Vec<RemoteRuleset>>;

    /// Fetch the full body of one ruleset
    async fn get_ruleset(&self, owner: &str, repo: &str, id: u64) -> Fetched<Value>;

    async fn create_ruleset(&self, owner: &str, repo: &str, body: &Value) -> ApiOutcome;

    /// Replace a ruleset in place
    async fn update_ruleset(&self, owner: &str, repo: &str, id: u64, body: &Value)
        -> ApiOutcome;

    async fn delete_ruleset(&self, owner: &str, repo: &str, id: u64) -> ApiOutcome;
}

/// Organization team and team-repository endpoints
#[async_trait]
pub trait TeamApi: Send + Sync {
    /// List all teams of an organization
    async fn list_org_teams(&self, org: &str) -> Fetched<Vec<OrgTeam>>;

    /// List teams associated with a repository, with their permission
    async fn list_repo_teams(&self, org: &str, repo: &str) -> Fetched<Vec<RemoteTeam>>;

    /// Add a team to a repository or change its permission
    async fn set_team_permission(
        &self,
        org: &str,
        team_slug: &str,
        repo: &str,
        permission: &Permission,
    ) -> ApiOutcome;

    async fn remove_team(&self, org: &str, team_slug: &str, repo: &str) -> ApiOutcome;
}
