use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::api::{ApiOutcome, Fetched, OutcomeStatus, RulesetApi, TeamApi};
use crate::config::GitHubSettings;
use crate::models::{OrgTeam, Permission, RemoteRuleset, RemoteTeam};

const PER_PAGE: usize = 100;
const MAX_PAGES: u32 = 100;

/// GitHub REST client used by both reconcilers
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

/// GitHub authentication strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken(String),
}

impl GitHubClient {
    /// Create a client, locating a token according to the settings
    pub fn new(settings: &GitHubSettings) -> Result<Self> {
        let (strategy, token) = detect_authentication(settings)?;

        info!("Using authentication strategy: {:?}", strategy);

        Self::with_token(settings, token)
    }

    /// Create a client with an explicit token
    pub fn with_token(settings: &GitHubSettings, token: impl Into<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent).context("Invalid user agent")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create GitHub client")?;

        let api_url = settings.api_url.trim_end_matches('/').to_string();
        debug!("GitHub API endpoint: {}", api_url);

        Ok(Self {
            http,
            api_url,
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
    }

    /// Send a request; transport failures become a `Failed` outcome
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiOutcome> {
        request
            .send()
            .await
            .map_err(|e| ApiOutcome::transport(format!("request failed: {}", e)))
    }

    /// Consume a response into an outcome, pulling GitHub's error message out of the body
    async fn outcome(response: Response) -> ApiOutcome {
        let status = response.status();
        if status.is_success() {
            return ApiOutcome::success(status.as_u16(), status.to_string());
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);

        ApiOutcome::from_status(status.as_u16(), message)
    }

    async fn mutate(&self, request: RequestBuilder) -> ApiOutcome {
        match self.send(request).await {
            Ok(response) => Self::outcome(response).await,
            Err(outcome) => outcome,
        }
    }

    async fn get_one<T: DeserializeOwned>(&self, path: &str) -> Fetched<T> {
        let response = match self.send(self.request(Method::GET, path)).await {
            Ok(response) => response,
            Err(outcome) => return Fetched::Failed(outcome),
        };

        if !response.status().is_success() {
            let outcome = Self::outcome(response).await;
            return match outcome.status {
                OutcomeStatus::NotFound => Fetched::NotFound,
                _ => Fetched::Failed(outcome),
            };
        }

        let code = response.status().as_u16();
        match response.json::<T>().await {
            Ok(value) => Fetched::Found(value),
            Err(e) => Fetched::Failed(ApiOutcome::from_status(
                code,
                format!("unexpected response body: {}", e),
            )),
        }
    }

    /// List a collection, following pages until a short page is returned
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Fetched<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let page_path = format!(
                "{}?{}per_page={}&page={}",
                path,
                query
                    .iter()
                    .map(|(k, v)| format!("{}={}&", k, v))
                    .collect::<String>(),
                PER_PAGE,
                page
            );

            match self.get_one::<Vec<T>>(&page_path).await {
                Fetched::Found(batch) => {
                    let count = batch.len();
                    items.extend(batch);
                    if count < PER_PAGE {
                        break;
                    }
                }
                Fetched::NotFound if page > 1 => break,
                other => return other,
            }

            if page >= MAX_PAGES {
                warn!("Reached maximum pagination limit ({} pages) for {}", MAX_PAGES, path);
                break;
            }
            page += 1;
        }

        debug!("Fetched {} items from {}", items.len(), path);
        Fetched::Found(items)
    }
}

#[async_trait]
impl RulesetApi for GitHubClient {
    async fn list_rulesets(&self, owner: &str, repo: &str) -> Fetched<Vec<RemoteRuleset>> {
        self.get_paginated(
            &format!("/repos/{}/{}/rulesets", owner, repo),
            &[("includes_parents", "false")],
        )
        .await
    }

    async fn get_ruleset(&self, owner: &str, repo: &str, id: u64) -> Fetched<Value> {
        self.get_one(&format!("/repos/{}/{}/rulesets/{}", owner, repo, id))
            .await
    }

    async fn create_ruleset(&self, owner: &str, repo: &str, body: &Value) -> ApiOutcome {
        let path = format!("/repos/{}/{}/rulesets", owner, repo);
        self.mutate(self.request(Method::POST, &path).json(body)).await
    }

    async fn update_ruleset(
        &self,
        owner: &str,
        repo: &str,
        id: u64,
        body: &Value,
    ) -> ApiOutcome {
        let path = format!("/repos/{}/{}/rulesets/{}", owner, repo, id);
        self.mutate(self.request(Method::PUT, &path).json(body)).await
    }

    async fn delete_ruleset(&self, owner: &str, repo: &str, id: u64) -> ApiOutcome {
        let path = format!("/repos/{}/{}/rulesets/{}", owner, repo, id);
        self.mutate(self.request(Method::DELETE, &path)).await
    }
}

#[async_trait]
impl TeamApi for GitHubClient {
    async fn list_org_teams(&self, org: &str) -> Fetched<Vec<OrgTeam>> {
        self.get_paginated(&format!("/orgs/{}/teams", org), &[]).await
    }

    async fn list_repo_teams(&self, org: &str, repo: &str) -> Fetched<Vec<RemoteTeam>> {
        self.get_paginated(&format!("/repos/{}/{}/teams", org, repo), &[])
            .await
    }

    async fn set_team_permission(
        &self,
        org: &str,
        team_slug: &str,
        repo: &str,
        permission: &Permission,
    ) -> ApiOutcome {
        let path = format!("/orgs/{}/teams/{}/repos/{}/{}", org, team_slug, org, repo);
        self.mutate(
            self.request(Method::PUT, &path)
                .json(&json!({ "permission": permission })),
        )
        .await
    }

    async fn remove_team(&self, org: &str, team_slug: &str, repo: &str) -> ApiOutcome {
        let path = format!("/orgs/{}/teams/{}/repos/{}/{}", org, team_slug, org, repo);
        self.mutate(self.request(Method::DELETE, &path)).await
    }
}

/// Detect and obtain GitHub authentication
pub fn detect_authentication(settings: &GitHubSettings) -> Result<(AuthStrategy, String)> {
    match settings.auth_method.as_str() {
        "auto" => {
            // Environment first so CI runners never shell out
            if let Ok((var, token)) = try_environment_token(&settings.token_env) {
                Ok((AuthStrategy::EnvironmentToken(var), token))
            } else if let Ok(token) = try_github_cli() {
                Ok((AuthStrategy::GitHubCLI, token))
            } else {
                Err(anyhow!(
                    "No GitHub authentication found. Please either:\n\
                     1. Set one of {} in the environment\n\
                     2. Install and authenticate GitHub CLI: gh auth login",
                    settings.token_env.join(", ")
                ))
            }
        }
        "gh_cli" => {
            let token =
                try_github_cli().context("GitHub CLI authentication failed. Run: gh auth login")?;
            Ok((AuthStrategy::GitHubCLI, token))
        }
        "token" => {
            let (var, token) = try_environment_token(&settings.token_env).with_context(|| {
                format!(
                    "None of {} is set to a token",
                    settings.token_env.join(", ")
                )
            })?;
            Ok((AuthStrategy::EnvironmentToken(var), token))
        }
        other => Err(anyhow!("Unknown auth method: {}", other)),
    }
}

/// Try to get token from the GitHub CLI
fn try_github_cli() -> Result<String> {
    debug!("Attempting GitHub CLI authentication");

    let output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .context("GitHub CLI (gh) is not installed")?;

    if !output.status.success() {
        return Err(anyhow!(
            "Failed to retrieve token from GitHub CLI: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let token = String::from_utf8(output.stdout)
        .context("GitHub CLI token is not valid UTF-8")?
        .trim()
        .to_string();

    if token.is_empty() {
        return Err(anyhow!("GitHub CLI returned empty token"));
    }

    debug!("Successfully obtained token from GitHub CLI");
    Ok(token)
}

/// Try to get a token from the first non-empty environment variable
fn try_environment_token(vars: &[String]) -> Result<(String, String)> {
    debug!("Attempting environment variable authentication");

    for var in vars {
        let Ok(token) = env::var(var) else {
            continue;
        };
        let token = token.trim().to_string();
        if token.is_empty() {
            continue;
        }

        const PREFIXES: [&str; 5] = ["ghp_", "gho_", "ghs_", "ghu_", "github_pat_"];
        if !PREFIXES.iter().any(|prefix| token.starts_with(prefix)) {
            warn!("{} doesn't look like a GitHub token", var);
        }

        debug!("Using token from {}", var);
        return Ok((var.clone(), token));
    }

    Err(anyhow!("no token environment variable set"))
}
