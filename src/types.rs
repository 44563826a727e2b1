//! Core types for merge-retry

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Identifier of a pull request / merge request within one repository
///
/// Displayed as `#145`. Parsed from `145`, `#145`, `!145` (GitLab style),
/// or a PR/MR web URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrId(u64);

impl PrId {
    /// Wrap a PR/MR number
    pub const fn new(number: u64) -> Self {
        Self(number)
    }

    /// The PR/MR number
    pub const fn number(self) -> u64 {
        self.0
    }
}

impl From<u64> for PrId {
    fn from(number: u64) -> Self {
        Self(number)
    }
}

impl std::fmt::Display for PrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for PrId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let invalid = || Error::InvalidPrId(s.to_string());

        let digits: String = if trimmed.contains("://") {
            let url = url::Url::parse(trimmed).map_err(|_| invalid())?;
            let segments: Vec<&str> = url
                .path_segments()
                .map(|segs| segs.filter(|seg| !seg.is_empty()).collect())
                .unwrap_or_default();
            // .../pull/145, .../pulls/145, .../merge_requests/145
            let idx = segments
                .iter()
                .rposition(|seg| matches!(*seg, "pull" | "pulls" | "merge_requests"))
                .ok_or_else(invalid)?;
            (*segments.get(idx + 1).ok_or_else(invalid)?).to_string()
        } else {
            trimmed.trim_start_matches(['#', '!']).to_string()
        };

        match digits.parse::<u64>() {
            Ok(0) | Err(_) => Err(invalid()),
            Ok(n) => Ok(Self(n)),
        }
    }
}

/// The platform's classification of whether a PR can be merged right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeableState {
    /// Ready to merge
    Clean,
    /// Checks pending or failing transiently
    Unstable,
    /// Base branch has moved ahead of the head branch
    Behind,
    /// Review or approval policy not satisfied
    Blocked,
    /// True content conflict
    Dirty,
    /// Not yet computed by the platform
    Unknown,
}

impl MergeableState {
    /// All states, in table order
    pub const ALL: [Self; 6] = [
        Self::Clean,
        Self::Unstable,
        Self::Behind,
        Self::Blocked,
        Self::Dirty,
        Self::Unknown,
    ];

    /// Lowercase name used in config files and CLI output
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Unstable => "unstable",
            Self::Behind => "behind",
            Self::Blocked => "blocked",
            Self::Dirty => "dirty",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MergeableState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeableState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unknown mergeable state '{s}'")))
    }
}

/// Aggregated CI status for a PR's head commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckStatus {
    /// Every configured check completed successfully (vacuously true when none)
    pub passed: bool,
    /// At least one check is still queued or running
    pub pending: bool,
}

impl CheckStatus {
    /// All checks completed and green
    pub const fn all_green(self) -> bool {
        self.passed && !self.pending
    }
}

/// A pull request / merge request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// PR/MR identifier
    pub id: PrId,
    /// Web URL for the PR/MR
    pub html_url: String,
    /// Base branch name
    pub base_ref: String,
    /// Head branch name
    pub head_ref: String,
    /// PR/MR title
    pub title: String,
    /// Whether PR is a draft
    pub is_draft: bool,
}

/// Everything needed to open a new PR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrSpec {
    /// Head branch name
    pub head: String,
    /// Base branch name
    pub base: String,
    /// PR title
    pub title: String,
    /// PR body/description
    pub body: Option<String>,
    /// Open as a draft
    pub draft: bool,
}

/// Result of a merge call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    /// Whether the merge was successful
    pub merged: bool,
    /// The SHA of the merge commit (if successful)
    pub sha: Option<String>,
    /// Message from the merge operation (especially on failure)
    pub message: Option<String>,
}

/// Result of an update-branch-from-base call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchUpdate {
    /// Whether the platform accepted the update
    pub updated: bool,
    /// Message from the platform (especially on failure)
    pub message: Option<String>,
}

/// Merge strategy/method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// Squash all commits into one
    #[default]
    Squash,
    /// Create a merge commit
    Merge,
    /// Rebase commits onto base branch
    Rebase,
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Squash => write!(f, "squash"),
            Self::Merge => write!(f, "merge"),
            Self::Rebase => write!(f, "rebase"),
        }
    }
}

impl FromStr for MergeMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "squash" => Ok(Self::Squash),
            "merge" => Ok(Self::Merge),
            "rebase" => Ok(Self::Rebase),
            other => Err(Error::Config(format!("unknown merge method '{other}'"))),
        }
    }
}

/// Detected platform type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    /// GitHub or GitHub Enterprise
    GitHub,
    /// GitLab or self-hosted GitLab
    GitLab,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GitHub => write!(f, "GitHub"),
            Self::GitLab => write!(f, "GitLab"),
        }
    }
}

/// Platform configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Platform type
    pub platform: Platform,
    /// Repository owner (user, organization, or GitLab group path)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Custom host (None for github.com/gitlab.com)
    pub host: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pr_id_plain_and_prefixed() {
        assert_eq!("145".parse::<PrId>().unwrap(), PrId::new(145));
        assert_eq!("#145".parse::<PrId>().unwrap(), PrId::new(145));
        assert_eq!("!7".parse::<PrId>().unwrap(), PrId::new(7));
        assert_eq!(" 12 ".parse::<PrId>().unwrap(), PrId::new(12));
    }

    #[test]
    fn test_pr_id_from_urls() {
        let gh: PrId = "https://github.com/acme/widgets/pull/145".parse().unwrap();
        assert_eq!(gh.number(), 145);

        let gh_files: PrId = "https://github.com/acme/widgets/pull/9/files".parse().unwrap();
        assert_eq!(gh_files.number(), 9);

        let gl: PrId = "https://gitlab.com/group/sub/proj/-/merge_requests/33"
            .parse()
            .unwrap();
        assert_eq!(gl.number(), 33);
    }

    #[test]
    fn test_pr_id_from_api_url_with_trailing_slash() {
        let api: PrId = "https://api.github.com/repos/acme/widgets/pulls/71/"
            .parse()
            .unwrap();
        assert_eq!(api, PrId::new(71));

        let err = "https://github.com/acme/widgets/pull/".parse::<PrId>().unwrap_err();
        assert!(matches!(err, Error::InvalidPrId(_)));
    }

    #[test]
    fn test_pr_id_rejects_garbage() {
        for bad in ["", "abc", "#", "0", "-3", "https://github.com/acme/widgets"] {
            let err = bad.parse::<PrId>().unwrap_err();
            assert!(matches!(err, Error::InvalidPrId(_)), "{bad}: {err:?}");
        }
    }

    #[test]
    fn test_pr_id_display() {
        assert_eq!(PrId::new(145).to_string(), "#145");
    }

    #[test]
    fn test_mergeable_state_parse_round_names() {
        for state in MergeableState::ALL {
            assert_eq!(state.as_str().parse::<MergeableState>().unwrap(), state);
        }
        assert_eq!(
            "CLEAN".parse::<MergeableState>().unwrap(),
            MergeableState::Clean
        );
        assert!("mergeable".parse::<MergeableState>().is_err());
    }

    #[test]
    fn test_check_status_all_green() {
        assert!(CheckStatus { passed: true, pending: false }.all_green());
        assert!(!CheckStatus { passed: true, pending: true }.all_green());
        assert!(!CheckStatus { passed: false, pending: false }.all_green());
    }

    #[test]
    fn test_merge_method_parse() {
        assert_eq!("Squash".parse::<MergeMethod>().unwrap(), MergeMethod::Squash);
        assert_eq!("rebase".parse::<MergeMethod>().unwrap(), MergeMethod::Rebase);
        assert!("octopus".parse::<MergeMethod>().is_err());
    }
}
