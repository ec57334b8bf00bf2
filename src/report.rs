//! Run report - every operation a reconciler attempted and how it ended

use std::fmt;
use std::time::Duration;

/// What a reconciler did (or planned to do) to one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
    /// Resource already matches
    Keep,
    /// Listing current state
    Fetch,
    /// Resolving a team name to an id
    Resolve,
    /// Loading a ruleset definition
    Load,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Keep => "keep",
            Self::Fetch => "fetch",
            Self::Resolve => "resolve",
            Self::Load => "load",
        };
        f.write_str(label)
    }
}

/// How an operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Done,
    /// Dry run: the call was computed but not sent
    Planned,
    Failed,
}

#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub repo: String,
    pub resource: String,
    pub action: Action,
    pub status: RecordStatus,
    pub message: String,
}

/// Outcome of reconciling one mapping file
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub owner: String,
    pub repositories: usize,
    pub records: Vec<OperationRecord>,
    pub duration: Duration,
}

impl ReconcileReport {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..Self::default()
        }
    }

    pub fn record(
        &mut self,
        repo: &str,
        resource: &str,
        action: Action,
        status: RecordStatus,
        message: impl Into<String>,
    ) {
        self.records.push(OperationRecord {
            repo: repo.to_string(),
            resource: resource.to_string(),
            action,
            status,
            message: message.into(),
        });
    }

    pub fn count(&self, action: Action, status: RecordStatus) -> usize {
        self.records
            .iter()
            .filter(|r| r.action == action && r.status == status)
            .count()
    }

    pub fn created(&self) -> usize {
        self.count(Action::Create, RecordStatus::Done)
    }

    pub fn updated(&self) -> usize {
        self.count(Action::Update, RecordStatus::Done)
    }

    pub fn deleted(&self) -> usize {
        self.count(Action::Delete, RecordStatus::Done)
    }

    pub fn unchanged(&self) -> usize {
        self.count(Action::Keep, RecordStatus::Done)
    }

    pub fn planned(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == RecordStatus::Planned)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationRecord> {
        self.records
            .iter()
            .filter(|r| r.status == RecordStatus::Failed)
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Records for one repository, in the order they happened
    pub fn for_repo<'a>(&'a self, repo: &'a str) -> impl Iterator<Item = &'a OperationRecord> {
        self.records.iter().filter(move |r| r.repo == repo)
    }
}
