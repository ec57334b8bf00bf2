//! Declarative mapping files
//!
//! A mapping file names the desired state of every repository of one owner. Two
//! flavors exist:
//!
//! ```yaml
//! # rulesets/acme.yaml
//! api-gateway:
//!   - rulesets/protect-main.json
//!   - name: release-tags
//!     target: tag
//!     enforcement: active
//! ```
//!
//! ```yaml
//! # teams/acme.yaml
//! api-gateway:
//!   - platform: admin
//!   - contractors: read
//! ```
//!
//! Files are parsed completely before any remote call is made, so a malformed file
//! never causes a partial reconciliation.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::models::{name_key, Permission};

/// Failure to load a mapping file
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("mapping file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read mapping file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mapping file {} is not valid: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

impl MappingError {
    fn parse(path: &Path, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Where a desired ruleset definition comes from
#[derive(Debug, Clone, PartialEq)]
pub enum RulesetSource {
    /// A JSON file holding the ruleset body
    File(PathBuf),
    /// A ruleset body written directly in the mapping file
    Inline(serde_json::Value),
}

impl RulesetSource {
    /// Name the source contributes to the desired set before its body is loaded
    pub fn declared_name(&self) -> Option<String> {
        match self {
            Self::File(path) => path.file_name().map(|name| {
                let name = name.to_string_lossy();
                name.strip_suffix(".json").unwrap_or(&name).to_string()
            }),
            Self::Inline(body) => body
                .get("name")
                .and_then(|name| name.as_str())
                .map(str::to_string),
        }
    }
}

/// Desired rulesets of one repository
#[derive(Debug, Clone)]
pub struct RepoRulesets {
    pub repo: String,
    pub sources: Vec<RulesetSource>,
}

/// Desired team permission on a repository
#[derive(Debug, Clone, PartialEq)]
pub struct TeamGrant {
    pub team: String,
    pub permission: Permission,
}

/// Desired teams of one repository
#[derive(Debug, Clone)]
pub struct RepoTeams {
    pub repo: String,
    pub grants: Vec<TeamGrant>,
}

/// Raw YAML shape of a ruleset entry
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRulesetEntry {
    File(String),
    Inline(serde_json::Value),
}

/// Map entries in document order, rejecting duplicate keys
struct OrderedEntries<T>(Vec<(String, T)>);

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedEntries<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = OrderedEntries<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a mapping")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut seen = HashSet::new();
                let mut entries = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    if !seen.insert(key.clone()) {
                        return Err(de::Error::custom(format!("duplicate key `{}`", key)));
                    }
                    entries.push((key, value));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

fn read_mapping<T>(path: &Path) -> Result<Vec<(String, T)>, MappingError>
where
    T: for<'de> Deserialize<'de>,
{
    if !path.is_file() {
        return Err(MappingError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| MappingError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if content.trim().is_empty() {
        debug!("Mapping file {:?} is empty", path);
        return Ok(Vec::new());
    }

    let entries: OrderedEntries<T> =
        serde_yaml::from_str(&content).map_err(|e| MappingError::parse(path, e.to_string()))?;

    Ok(entries.0)
}

/// Load a ruleset mapping: repository name to ruleset sources
pub fn load_ruleset_mapping(path: &Path) -> Result<Vec<RepoRulesets>, MappingError> {
    let raw: Vec<(String, Option<Vec<RawRulesetEntry>>)> = read_mapping(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut repos = Vec::with_capacity(raw.len());
    for (repo, entries) in raw {
        let entries = require_list(path, &repo, entries)?;
        let mut sources = Vec::with_capacity(entries.len());
        let mut names = HashSet::new();

        for entry in entries {
            let source = match entry {
                RawRulesetEntry::File(reference) => {
                    RulesetSource::File(resolve_reference(path, base_dir, &reference)?)
                }
                RawRulesetEntry::Inline(body) => {
                    if !body.get("name").map_or(false, |name| name.is_string()) {
                        return Err(MappingError::parse(
                            path,
                            format!("inline ruleset for `{}` needs a string `name`", repo),
                        ));
                    }
                    RulesetSource::Inline(body)
                }
            };

            if let Some(name) = source.declared_name() {
                if !names.insert(name_key(&name)) {
                    return Err(MappingError::parse(
                        path,
                        format!("ruleset `{}` listed twice for `{}`", name, repo),
                    ));
                }
            }
            sources.push(source);
        }

        repos.push(RepoRulesets { repo, sources });
    }

    debug!("Loaded ruleset mapping for {} repositories", repos.len());
    Ok(repos)
}

/// Load a team mapping: repository name to team permission grants
pub fn load_team_mapping(path: &Path) -> Result<Vec<RepoTeams>, MappingError> {
    let raw: Vec<(String, Option<Vec<OrderedEntries<Permission>>>)> = read_mapping(path)?;

    let mut repos = Vec::with_capacity(raw.len());
    for (repo, items) in raw {
        let items = require_list(path, &repo, items)?;
        let mut grants = Vec::new();
        let mut names = HashSet::new();

        for (team, permission) in items.into_iter().flat_map(|item| item.0) {
            if !names.insert(name_key(&team)) {
                return Err(MappingError::parse(
                    path,
                    format!("team `{}` listed twice for `{}`", team, repo),
                ));
            }
            grants.push(TeamGrant { team, permission });
        }

        repos.push(RepoTeams { repo, grants });
    }

    debug!("Loaded team mapping for {} repositories", repos.len());
    Ok(repos)
}

/// A repository key without a value would otherwise read as "manage nothing"
/// and strip every resource; an explicit `[]` is required for that.
fn require_list<T>(path: &Path, repo: &str, value: Option<Vec<T>>) -> Result<Vec<T>, MappingError> {
    value.ok_or_else(|| {
        MappingError::parse(
            path,
            format!("`{}` has no entries; use `[]` to remove everything", repo),
        )
    })
}

/// Expand and resolve a ruleset file reference.
///
/// Relative references are tried against the working directory first and the
/// mapping file's directory second.
fn resolve_reference(
    mapping_path: &Path,
    base_dir: &Path,
    reference: &str,
) -> Result<PathBuf, MappingError> {
    let expanded = shellexpand::full(reference).map_err(|e| {
        MappingError::parse(mapping_path, format!("cannot expand `{}`: {}", reference, e))
    })?;
    let candidate = PathBuf::from(expanded.as_ref());

    if candidate.is_absolute() || candidate.exists() {
        return Ok(path_clean::clean(&candidate));
    }

    let beside_mapping = base_dir.join(&candidate);
    if beside_mapping.exists() {
        Ok(path_clean::clean(&beside_mapping))
    } else {
        Ok(path_clean::clean(&candidate))
    }
}
