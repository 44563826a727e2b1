//! Platform services for GitHub and GitLab
//!
//! Provides a unified interface for the PR/MR operations the retry engine
//! and state monitor depend on.

mod detection;
mod factory;
mod github;
mod gitlab;

pub use detection::{parse_remote_url, parse_repo_spec};
pub use factory::{create_platform_service, token_for};
pub use github::GitHubService;
pub use gitlab::GitLabService;

use crate::error::Result;
use crate::types::{
    BranchUpdate, CheckStatus, MergeMethod, MergeResult, MergeableState, PlatformConfig, PrId,
    PrSpec, PullRequest,
};
use async_trait::async_trait;

/// Platform service trait for PR/MR operations
///
/// This trait abstracts GitHub and GitLab operations, allowing the same
/// retry and monitoring logic to work with either platform.
///
/// Implementations must be cheap to call concurrently: the engine and the
/// monitor share one service across many PRs.
#[async_trait]
pub trait PlatformService: Send + Sync {
    /// Read the platform's current mergeability classification.
    ///
    /// May return [`MergeableState::Unknown`] while the platform is still
    /// computing it.
    async fn get_mergeable_state(&self, pr: PrId) -> Result<MergeableState>;

    /// Read the aggregated CI status of the PR's head commit
    async fn get_check_status(&self, pr: PrId) -> Result<CheckStatus>;

    /// Merge a PR with the specified method
    ///
    /// A platform refusal (not mergeable, head moved) is reported as
    /// `Ok(MergeResult { merged: false, .. })`; `Err` is reserved for
    /// transport and permission failures.
    async fn merge_pr(&self, pr: PrId, method: MergeMethod) -> Result<MergeResult>;

    /// Bring the PR's head branch up to date with its base branch
    async fn update_branch_from_base(&self, pr: PrId) -> Result<BranchUpdate>;

    /// Open a new PR
    async fn create_pr(&self, spec: &PrSpec) -> Result<PullRequest>;

    /// Get the platform configuration
    fn config(&self) -> &PlatformConfig;
}
