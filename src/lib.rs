//! repowarden - Declarative GitHub repository policy reconciliation
//!
//! repowarden keeps repository rulesets and team access in line with YAML mapping
//! files. Each run loads the desired state, compares it with what GitHub reports and
//! issues the create, update and delete calls that close the gap.
//!
//! ## Modules
//!
//! - [`config`]: Settings file loading (API endpoint, auth, logging)
//! - [`mapping`]: Declarative mapping files (desired state)
//! - [`github`]: GitHub REST client and authentication
//! - [`rulesets`] / [`teams`]: The two reconcilers
//! - [`sync`]: File-level entry points used by the CLI

pub mod api;
pub mod config;
pub mod github;
pub mod mapping;
pub mod models;
pub mod report;
pub mod rulesets;
pub mod sync;
pub mod teams;

pub use api::{ApiOutcome, Fetched, OutcomeStatus, RulesetApi, TeamApi};
pub use config::Settings;
pub use github::GitHubClient;
pub use mapping::MappingError;
pub use models::Permission;
pub use report::{Action, RecordStatus, ReconcileReport};
pub use sync::{sync_rulesets, sync_teams};
