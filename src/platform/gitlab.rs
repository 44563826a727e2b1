//! GitLab platform service implementation

use crate::error::{Error, Result};
use crate::platform::PlatformService;
use crate::types::{
    BranchUpdate, CheckStatus, MergeMethod, MergeResult, MergeableState, Platform,
    PlatformConfig, PrId, PrSpec, PullRequest,
};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// GitLab service using reqwest
pub struct GitLabService {
    client: Client,
    token: String,
    api_base: String,
    config: PlatformConfig,
    project_path: String,
}

#[derive(Deserialize)]
struct MergeRequest {
    iid: u64,
    web_url: String,
    source_branch: String,
    target_branch: String,
    title: String,
    #[serde(default)]
    draft: bool,
}

/// MR fields needed for state checks
#[derive(Deserialize)]
struct MergeRequestStatus {
    state: String, // "opened", "closed", "merged", "locked"
    detailed_merge_status: Option<String>,
    #[serde(default)]
    has_conflicts: bool,
    head_pipeline: Option<Pipeline>,
}

/// Pipeline status
#[derive(Deserialize)]
struct Pipeline {
    status: String, // "success", "failed", "running", "pending", ...
}

/// Merge response
#[derive(Deserialize)]
struct MergeResponse {
    state: String,
    merge_commit_sha: Option<String>,
    squash_commit_sha: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: Option<serde_json::Value>,
}

impl From<MergeRequest> for PullRequest {
    fn from(mr: MergeRequest) -> Self {
        Self {
            id: PrId::new(mr.iid),
            html_url: mr.web_url,
            base_ref: mr.target_branch,
            head_ref: mr.source_branch,
            title: mr.title,
            is_draft: mr.draft,
        }
    }
}

#[derive(Serialize)]
struct CreateMrPayload<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    draft: bool,
}

#[derive(Serialize)]
struct MergePayload {
    squash: bool,
}

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Map GitLab's `detailed_merge_status` onto [`MergeableState`]
fn map_merge_status(raw: Option<&str>, has_conflicts: bool) -> MergeableState {
    if has_conflicts {
        return MergeableState::Dirty;
    }
    match raw {
        Some("mergeable") => MergeableState::Clean,
        Some("ci_must_pass" | "ci_still_running") => MergeableState::Unstable,
        Some("need_rebase") => MergeableState::Behind,
        Some(
            "not_approved"
            | "discussions_not_resolved"
            | "draft_status"
            | "blocked_status"
            | "not_open"
            | "requested_changes"
            | "jira_association_missing"
            | "external_status_checks",
        ) => MergeableState::Blocked,
        Some("conflict" | "broken_status") => MergeableState::Dirty,
        _ => MergeableState::Unknown,
    }
}

/// Map a head pipeline status onto [`CheckStatus`]
fn map_pipeline(pipeline: Option<&Pipeline>) -> CheckStatus {
    let Some(pipeline) = pipeline else {
        // No pipeline = nothing to wait for
        return CheckStatus {
            passed: true,
            pending: false,
        };
    };
    match pipeline.status.as_str() {
        "success" | "skipped" | "manual" => CheckStatus {
            passed: true,
            pending: false,
        },
        "created" | "waiting_for_resource" | "preparing" | "pending" | "running"
        | "scheduled" => CheckStatus {
            passed: false,
            pending: true,
        },
        _ => CheckStatus {
            passed: false,
            pending: false,
        },
    }
}

fn api_message(body: &str) -> String {
    match serde_json::from_str::<ApiMessage>(body).ok().and_then(|m| m.message) {
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => body.trim().to_string(),
    }
}

impl GitLabService {
    /// Create a new GitLab service
    pub fn new(token: String, owner: String, repo: String, host: Option<String>) -> Result<Self> {
        let api_base = format!(
            "https://{}/api/v4",
            host.as_deref().unwrap_or("gitlab.com")
        );
        Self::with_api_base(token, owner, repo, host, &api_base)
    }

    /// Create a GitLab service talking to an explicit API base URL
    pub fn with_api_base(
        token: String,
        owner: String,
        repo: String,
        host: Option<String>,
        api_base: &str,
    ) -> Result<Self> {
        let project_path = format!("{owner}/{repo}");

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::GitLabApi(format!("failed to create HTTP client: {e}")))?;

        let config_host = host.filter(|h| h != "gitlab.com");

        Ok(Self {
            client,
            token,
            api_base: api_base.trim_end_matches('/').to_string(),
            config: PlatformConfig {
                platform: Platform::GitLab,
                owner,
                repo,
                host: config_host,
            },
            project_path,
        })
    }

    fn mr_url(&self, pr: PrId, suffix: &str) -> String {
        format!(
            "{}/projects/{}/merge_requests/{}{suffix}",
            self.api_base,
            urlencoding::encode(&self.project_path),
            pr.number()
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("PRIVATE-TOKEN", &self.token)
    }

    async fn error_from(response: Response) -> Error {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Error::from_status(status, api_message(&body), Error::GitLabApi)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.request(Method::GET, url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch_status(&self, pr: PrId) -> Result<MergeRequestStatus> {
        let status: MergeRequestStatus = self.get_json(&self.mr_url(pr, "")).await?;
        if status.state != "opened" {
            return Err(Error::GitLabApi(format!("MR {pr} is {}", status.state)));
        }
        Ok(status)
    }
}

#[async_trait]
impl PlatformService for GitLabService {
    async fn get_mergeable_state(&self, pr: PrId) -> Result<MergeableState> {
        debug!(%pr, "getting MR merge status");
        let status = self.fetch_status(pr).await?;
        let state = map_merge_status(status.detailed_merge_status.as_deref(), status.has_conflicts);
        debug!(%pr, raw = ?status.detailed_merge_status, %state, "got MR merge status");
        Ok(state)
    }

    async fn get_check_status(&self, pr: PrId) -> Result<CheckStatus> {
        debug!(%pr, "checking pipeline status");
        let status = self.fetch_status(pr).await?;
        let checks = map_pipeline(status.head_pipeline.as_ref());
        debug!(%pr, passed = checks.passed, pending = checks.pending, "checked pipeline status");
        Ok(checks)
    }

    async fn merge_pr(&self, pr: PrId, method: MergeMethod) -> Result<MergeResult> {
        debug!(%pr, %method, "merging MR");
        // GitLab decides merge commit vs fast-forward per project; only squash
        // is selectable per request.
        let payload = MergePayload {
            squash: method == MergeMethod::Squash,
        };

        let response = self
            .request(Method::PUT, &self.mr_url(pr, "/merge"))
            .json(&payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {
                let merged: MergeResponse = response.json().await?;
                let result = MergeResult {
                    merged: merged.state == "merged",
                    sha: merged.merge_commit_sha.or(merged.squash_commit_sha),
                    message: None,
                };
                debug!(%pr, merged = result.merged, sha = ?result.sha, "merge complete");
                Ok(result)
            }
            // 405: not mergeable, 406: conflicts, 409: SHA mismatch, 422: branch can't be merged
            405 | 406 | 409 | 422 => {
                let body = response.text().await.unwrap_or_default();
                let message = api_message(&body);
                debug!(%pr, %message, "merge rejected by GitLab");
                Ok(MergeResult {
                    merged: false,
                    sha: None,
                    message: Some(message),
                })
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn update_branch_from_base(&self, pr: PrId) -> Result<BranchUpdate> {
        debug!(%pr, "rebasing MR onto target");
        let response = self
            .request(Method::PUT, &self.mr_url(pr, "/rebase"))
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(BranchUpdate {
                updated: true,
                message: None,
            }),
            403 | 409 | 422 => {
                let body = response.text().await.unwrap_or_default();
                Ok(BranchUpdate {
                    updated: false,
                    message: Some(api_message(&body)),
                })
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn create_pr(&self, spec: &PrSpec) -> Result<PullRequest> {
        debug!(head = %spec.head, base = %spec.base, draft = spec.draft, "creating MR");
        let url = format!(
            "{}/projects/{}/merge_requests",
            self.api_base,
            urlencoding::encode(&self.project_path)
        );
        let payload = CreateMrPayload {
            source_branch: &spec.head,
            target_branch: &spec.base,
            title: &spec.title,
            description: spec.body.as_deref(),
            draft: spec.draft,
        };

        let response = self.request(Method::POST, &url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let mr: MergeRequest = response.json().await?;
        let pr: PullRequest = mr.into();
        debug!(pr = %pr.id, "created MR");
        Ok(pr)
    }

    fn config(&self) -> &PlatformConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_merge_status() {
        assert_eq!(map_merge_status(Some("mergeable"), false), MergeableState::Clean);
        assert_eq!(
            map_merge_status(Some("ci_still_running"), false),
            MergeableState::Unstable
        );
        assert_eq!(map_merge_status(Some("need_rebase"), false), MergeableState::Behind);
        assert_eq!(map_merge_status(Some("not_approved"), false), MergeableState::Blocked);
        assert_eq!(map_merge_status(Some("conflict"), false), MergeableState::Dirty);
        assert_eq!(map_merge_status(Some("checking"), false), MergeableState::Unknown);
        assert_eq!(map_merge_status(None, false), MergeableState::Unknown);
    }

    #[test]
    fn test_conflicts_flag_wins() {
        assert_eq!(map_merge_status(Some("mergeable"), true), MergeableState::Dirty);
    }

    #[test]
    fn test_map_pipeline() {
        assert!(map_pipeline(None).all_green());
        let running = Pipeline {
            status: "running".to_string(),
        };
        assert!(map_pipeline(Some(&running)).pending);
        let failed = Pipeline {
            status: "failed".to_string(),
        };
        let checks = map_pipeline(Some(&failed));
        assert!(!checks.passed);
        assert!(!checks.pending);
    }

    #[test]
    fn test_api_message_handles_structured_messages() {
        assert_eq!(api_message(r#"{"message":"405 Method Not Allowed"}"#), "405 Method Not Allowed");
        assert_eq!(
            api_message(r#"{"message":{"base":["error"]}}"#),
            r#"{"base":["error"]}"#
        );
    }
}
