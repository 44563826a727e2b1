//! GitHub platform service implementation

use crate::error::{Error, Result};
use crate::platform::PlatformService;
use crate::types::{
    BranchUpdate, CheckStatus, MergeMethod, MergeResult, MergeableState, Platform,
    PlatformConfig, PrId, PrSpec, PullRequest,
};
use async_trait::async_trait;
use octocrab::Octocrab;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const PUBLIC_API: &str = "https://api.github.com";

/// Subset of the REST pull request payload needed for state checks
#[derive(Deserialize)]
struct PullState {
    state: String,
    #[serde(default)]
    merged: bool,
    mergeable_state: Option<String>,
    head: PullHead,
}

#[derive(Deserialize)]
struct PullHead {
    sha: String,
}

#[derive(Deserialize)]
struct CombinedStatus {
    state: String,
    total_count: u32,
}

#[derive(Deserialize)]
struct CheckRunsResponse {
    total_count: u32,
    check_runs: Vec<CheckRun>,
}

#[derive(Deserialize)]
struct CheckRun {
    status: String,
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: Option<String>,
}

/// Map GitHub's `mergeable_state` string onto [`MergeableState`]
fn map_mergeable_state(raw: Option<&str>) -> MergeableState {
    match raw {
        Some("clean" | "has_hooks") => MergeableState::Clean,
        Some("unstable") => MergeableState::Unstable,
        Some("behind") => MergeableState::Behind,
        Some("blocked" | "draft") => MergeableState::Blocked,
        Some("dirty") => MergeableState::Dirty,
        _ => MergeableState::Unknown,
    }
}

/// Extract `message` from a GitHub error body, falling back to the raw text
fn api_message(body: &str) -> String {
    serde_json::from_str::<ApiMessage>(body)
        .ok()
        .and_then(|m| m.message)
        .unwrap_or_else(|| body.trim().to_string())
}

/// GitHub service using octocrab
pub struct GitHubService {
    client: Octocrab,
    config: PlatformConfig,
    /// Token for raw HTTP requests (state, checks, update-branch)
    token: String,
    /// HTTP client for raw requests
    http_client: Client,
    /// API base URL for raw requests, without trailing slash
    api_base: String,
}

impl GitHubService {
    /// Create a new GitHub service
    pub fn new(token: &str, owner: String, repo: String, host: Option<String>) -> Result<Self> {
        let api_base = host
            .as_ref()
            .map_or_else(|| PUBLIC_API.to_string(), |h| format!("https://{h}/api/v3"));
        Self::with_api_base(token, owner, repo, host, &api_base)
    }

    /// Create a GitHub service talking to an explicit API base URL
    ///
    /// Used for GitHub Enterprise proxies and for tests against a local
    /// HTTP server.
    pub fn with_api_base(
        token: &str,
        owner: String,
        repo: String,
        host: Option<String>,
        api_base: &str,
    ) -> Result<Self> {
        let api_base = api_base.trim_end_matches('/').to_string();
        let mut builder = Octocrab::builder().personal_token(token.to_string());
        if api_base != PUBLIC_API {
            builder = builder
                .base_uri(api_base.as_str())
                .map_err(|e| Error::GitHubApi(e.to_string()))?;
        }

        let client = builder
            .build()
            .map_err(|e| Error::GitHubApi(e.to_string()))?;

        let http_client = Client::builder()
            .user_agent("merge-retry")
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::GitHubApi(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: PlatformConfig {
                platform: Platform::GitHub,
                owner,
                repo,
                host,
            },
            token: token.to_string(),
            http_client,
            api_base,
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{path}",
            self.api_base, self.config.owner, self.config.repo
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn error_from(response: Response) -> Error {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Error::from_status(status, api_message(&body), Error::GitHubApi)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.request(Method::GET, url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch_pull(&self, pr: PrId) -> Result<PullState> {
        let pull: PullState = self
            .get_json(&self.repo_url(&format!("/pulls/{}", pr.number())))
            .await?;
        if pull.merged {
            return Err(Error::GitHubApi(format!("PR {pr} is already merged")));
        }
        if pull.state != "open" {
            return Err(Error::GitHubApi(format!("PR {pr} is {}", pull.state)));
        }
        Ok(pull)
    }

    /// Check legacy commit statuses via combined status API
    ///
    /// Returns `(failed, pending)`.
    async fn check_commit_statuses(&self, sha: &str) -> Result<(bool, bool)> {
        let url = self.repo_url(&format!("/commits/{sha}/status"));
        let response = self.request(Method::GET, &url).send().await?;

        if !response.status().is_success() {
            debug!(
                status = %response.status(),
                "Commit status check returned non-success, assuming no statuses configured"
            );
            return Ok((false, false));
        }

        let status: CombinedStatus = response.json().await?;

        // No statuses configured = passing
        if status.total_count == 0 {
            debug!("No commit statuses configured");
            return Ok((false, false));
        }

        debug!(state = %status.state, count = status.total_count, "Commit status result");
        Ok(match status.state.as_str() {
            "success" => (false, false),
            "pending" => (false, true),
            _ => (true, false),
        })
    }

    /// Check GitHub Actions check runs
    ///
    /// Returns `(failed, pending)`.
    async fn check_check_runs(&self, sha: &str) -> Result<(bool, bool)> {
        let url = self.repo_url(&format!("/commits/{sha}/check-runs"));
        let response = self.request(Method::GET, &url).send().await?;

        if !response.status().is_success() {
            debug!(
                status = %response.status(),
                "Check runs returned non-success, assuming no checks configured"
            );
            return Ok((false, false));
        }

        let check_runs: CheckRunsResponse = response.json().await?;
        if check_runs.total_count == 0 {
            debug!("No check runs configured");
            return Ok((false, false));
        }

        let mut failed = false;
        let mut pending = false;
        for run in &check_runs.check_runs {
            if run.status != "completed" {
                debug!(status = %run.status, "Check run still in progress");
                pending = true;
                continue;
            }
            match run.conclusion.as_deref() {
                Some("success" | "neutral" | "skipped") => {}
                conclusion => {
                    debug!(?conclusion, "Check run failed");
                    failed = true;
                }
            }
        }

        Ok((failed, pending))
    }
}

/// Helper to convert octocrab PR to our `PullRequest` type
fn pr_from_octocrab(pr: &octocrab::models::pulls::PullRequest) -> PullRequest {
    PullRequest {
        id: PrId::new(pr.number),
        html_url: pr
            .html_url
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        base_ref: pr.base.ref_field.clone(),
        head_ref: pr.head.ref_field.clone(),
        title: pr.title.as_deref().unwrap_or_default().to_string(),
        is_draft: pr.draft.unwrap_or(false),
    }
}

#[async_trait]
impl PlatformService for GitHubService {
    async fn get_mergeable_state(&self, pr: PrId) -> Result<MergeableState> {
        debug!(%pr, "getting mergeable state");
        let pull = self.fetch_pull(pr).await?;
        let state = map_mergeable_state(pull.mergeable_state.as_deref());
        debug!(%pr, raw = ?pull.mergeable_state, %state, "got mergeable state");
        Ok(state)
    }

    async fn get_check_status(&self, pr: PrId) -> Result<CheckStatus> {
        debug!(%pr, "checking CI status");
        let pull = self.fetch_pull(pr).await?;

        // GitHub has two CI systems: legacy commit statuses and check runs
        let (status_failed, status_pending) = self.check_commit_statuses(&pull.head.sha).await?;
        let (runs_failed, runs_pending) = self.check_check_runs(&pull.head.sha).await?;

        let pending = status_pending || runs_pending;
        let checks = CheckStatus {
            passed: !status_failed && !runs_failed && !pending,
            pending,
        };
        debug!(%pr, passed = checks.passed, pending = checks.pending, "checked CI status");
        Ok(checks)
    }

    async fn merge_pr(&self, pr: PrId, method: MergeMethod) -> Result<MergeResult> {
        debug!(%pr, %method, "merging PR");
        let pr_number = pr.number();
        let pulls = self.client.pulls(&self.config.owner, &self.config.repo);

        let octocrab_method = match method {
            MergeMethod::Squash => octocrab::params::pulls::MergeMethod::Squash,
            MergeMethod::Merge => octocrab::params::pulls::MergeMethod::Merge,
            MergeMethod::Rebase => octocrab::params::pulls::MergeMethod::Rebase,
        };

        // For squash, use PR title and body as commit message
        let sent = if method == MergeMethod::Squash {
            let details = pulls.get(pr_number).await?;
            let title = details.title.clone().unwrap_or_default();
            let mut builder = pulls
                .merge(pr_number)
                .method(octocrab_method)
                .title(format!("{title} (#{pr_number})"));
            if let Some(ref body) = details.body {
                builder = builder.message(body);
            }
            builder.send().await
        } else {
            pulls.merge(pr_number).method(octocrab_method).send().await
        };

        let result = match sent {
            Ok(result) => result,
            // 405: not mergeable, 409: head moved underneath us
            Err(octocrab::Error::GitHub { source, .. })
                if matches!(source.status_code.as_u16(), 405 | 409) =>
            {
                debug!(%pr, message = %source.message, "merge rejected by GitHub");
                return Ok(MergeResult {
                    merged: false,
                    sha: None,
                    message: Some(source.message.clone()),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let merge_result = MergeResult {
            merged: result.merged,
            sha: result.sha,
            message: result.message,
        };

        debug!(
            %pr,
            merged = merge_result.merged,
            sha = ?merge_result.sha,
            "merge complete"
        );
        Ok(merge_result)
    }

    async fn update_branch_from_base(&self, pr: PrId) -> Result<BranchUpdate> {
        debug!(%pr, "updating branch from base");
        let url = self.repo_url(&format!("/pulls/{}/update-branch", pr.number()));
        let response = self
            .request(Method::PUT, &url)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {
                let body = response.text().await.unwrap_or_default();
                debug!(%pr, "branch update accepted");
                Ok(BranchUpdate {
                    updated: true,
                    message: Some(api_message(&body)).filter(|m| !m.is_empty()),
                })
            }
            // 422: conflicts or head already up to date
            422 => {
                let body = response.text().await.unwrap_or_default();
                let message = api_message(&body);
                debug!(%pr, %message, "branch update refused");
                Ok(BranchUpdate {
                    updated: false,
                    message: Some(message),
                })
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn create_pr(&self, spec: &PrSpec) -> Result<PullRequest> {
        debug!(head = %spec.head, base = %spec.base, draft = spec.draft, "creating PR");
        let pulls = self.client.pulls(&self.config.owner, &self.config.repo);
        let mut builder = pulls
            .create(&spec.title, &spec.head, &spec.base)
            .draft(spec.draft);

        if let Some(ref body_text) = spec.body {
            builder = builder.body(body_text);
        }

        let pr = builder.send().await?;

        let result = pr_from_octocrab(&pr);
        debug!(pr = %result.id, "created PR");
        Ok(result)
    }

    fn config(&self) -> &PlatformConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_mergeable_state() {
        assert_eq!(map_mergeable_state(Some("clean")), MergeableState::Clean);
        assert_eq!(map_mergeable_state(Some("has_hooks")), MergeableState::Clean);
        assert_eq!(map_mergeable_state(Some("unstable")), MergeableState::Unstable);
        assert_eq!(map_mergeable_state(Some("behind")), MergeableState::Behind);
        assert_eq!(map_mergeable_state(Some("blocked")), MergeableState::Blocked);
        assert_eq!(map_mergeable_state(Some("draft")), MergeableState::Blocked);
        assert_eq!(map_mergeable_state(Some("dirty")), MergeableState::Dirty);
        assert_eq!(map_mergeable_state(Some("unknown")), MergeableState::Unknown);
        assert_eq!(map_mergeable_state(None), MergeableState::Unknown);
    }

    #[test]
    fn test_api_message_prefers_json_message() {
        assert_eq!(api_message(r#"{"message":"Not Found"}"#), "Not Found");
        assert_eq!(api_message("  plain text  "), "plain text");
    }
}
