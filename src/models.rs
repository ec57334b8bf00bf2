//! Shared types for desired and remote state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison key for ruleset and team names; GitHub treats them case-insensitively
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Permission level of a team on a repository.
///
/// GitHub reports the five built-in roles by their API names; organizations with
/// custom repository roles get the role name back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Permission {
    Pull,
    Triage,
    Push,
    Maintain,
    Admin,
    Custom(String),
}

impl Permission {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pull => "pull",
            Self::Triage => "triage",
            Self::Push => "push",
            Self::Maintain => "maintain",
            Self::Admin => "admin",
            Self::Custom(role) => role,
        }
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pull" | "read" => Self::Pull,
            "triage" => Self::Triage,
            "push" | "write" => Self::Push,
            "maintain" => Self::Maintain,
            "admin" => Self::Admin,
            _ => Self::Custom(value.trim().to_string()),
        }
    }
}

impl From<&str> for Permission {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ruleset as listed by `GET /repos/{owner}/{repo}/rulesets`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRuleset {
    pub id: u64,
    pub name: String,
    /// "Repository" or "Organization"
    #[serde(default)]
    pub source_type: Option<String>,
}

impl RemoteRuleset {
    /// Rulesets inherited from the organization cannot be managed per repository
    pub fn is_repository_owned(&self) -> bool {
        self.source_type
            .as_deref()
            .map_or(true, |source| source.eq_ignore_ascii_case("repository"))
    }
}

/// A team listed under an organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgTeam {
    pub id: u64,
    pub name: String,
    pub slug: String,
}

impl OrgTeam {
    /// Whether a team name from a mapping file refers to this team
    pub fn matches(&self, team_name: &str) -> bool {
        let key = name_key(team_name);
        name_key(&self.slug) == key || name_key(&self.name) == key
    }
}

/// A team associated with a repository, as listed by `GET /repos/{owner}/{repo}/teams`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTeam {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub permission: Permission,
}

impl RemoteTeam {
    pub fn matches(&self, team_name: &str) -> bool {
        let key = name_key(team_name);
        name_key(&self.slug) == key || name_key(&self.name) == key
    }
}
