//! Error types for merge-retry
//!
//! Errors fall into the classes the retry engine cares about:
//! transient (retried on the backoff schedule), fatal (ends a session with
//! an `error` outcome), and invalid requests (rejected before any work).

use crate::types::PrId;
use thiserror::Error;

/// Errors produced by platform clients, the retry engine and the CLI
#[derive(Debug, Error)]
pub enum Error {
    /// Network failure talking to the platform (timeouts, resets, 5xx)
    #[error("network error: {0}")]
    Network(String),

    /// Platform rate limit hit
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Unclassified platform failure, assumed to be temporary
    #[error("platform error: {0}")]
    Platform(String),

    /// Credentials missing, invalid, or lacking permission
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The pull request (or the repository) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The repository was deleted, archived, or is otherwise unreachable
    #[error("repository inaccessible: {0}")]
    RepoInaccessible(String),

    /// GitHub API rejected the request
    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    /// GitLab API rejected the request
    #[error("GitLab API error: {0}")]
    GitLabApi(String),

    /// A retry session is already running for this PR
    #[error("merge already in progress for PR {0}")]
    AlreadyInProgress(PrId),

    /// PR identifier could not be parsed
    #[error("invalid pull request id: {0}")]
    InvalidPrId(String),

    /// Repository spec or remote URL could not be parsed
    #[error("invalid repository: {0}")]
    InvalidRepo(String),

    /// Configuration file could not be read or parsed
    #[error("config error: {0}")]
    Config(String),

    /// Internal invariant violated
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is expected to clear up on its own.
    ///
    /// Transient errors are retried using the active backoff schedule.
    /// Everything else terminates a retry session immediately.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited(_) | Self::Platform(_)
        )
    }

    /// Classify an HTTP status returned by a platform API.
    ///
    /// `api` builds the vendor-specific variant used for statuses that are
    /// neither transient nor one of the well-known fatal cases.
    pub fn from_status(status: u16, message: String, api: fn(String) -> Self) -> Self {
        let lowered = message.to_lowercase();
        match status {
            401 => Self::Auth(message),
            403 if lowered.contains("rate limit") => Self::RateLimited(message),
            403 => Self::Auth(message),
            404 => Self::NotFound(message),
            410 | 451 => Self::RepoInaccessible(message),
            429 => Self::RateLimited(message),
            500..=599 => Self::Network(format!("HTTP {status}: {message}")),
            _ => api(format!("HTTP {status}: {message}")),
        }
    }
}

impl From<octocrab::Error> for Error {
    fn from(err: octocrab::Error) -> Self {
        match err {
            octocrab::Error::GitHub { source, .. } => Self::from_status(
                source.status_code.as_u16(),
                source.message.clone(),
                Self::GitHubApi,
            ),
            other => Self::Network(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string(), Self::Platform);
        }
        if err.is_decode() {
            return Self::Platform(format!("unexpected response body: {err}"));
        }
        Self::Network(err.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Network("reset".into()).is_transient());
        assert!(Error::RateLimited("slow down".into()).is_transient());
        assert!(Error::Platform("hiccup".into()).is_transient());
        assert!(!Error::Auth("bad token".into()).is_transient());
        assert!(!Error::NotFound("PR #1".into()).is_transient());
        assert!(!Error::AlreadyInProgress(PrId::new(1)).is_transient());
    }

    #[test]
    fn test_from_status_fatal_cases() {
        assert!(matches!(
            Error::from_status(401, "bad credentials".into(), Error::GitHubApi),
            Error::Auth(_)
        ));
        assert!(matches!(
            Error::from_status(404, "Not Found".into(), Error::GitHubApi),
            Error::NotFound(_)
        ));
        assert!(matches!(
            Error::from_status(410, "gone".into(), Error::GitLabApi),
            Error::RepoInaccessible(_)
        ));
    }

    #[test]
    fn test_from_status_rate_limit_on_403() {
        let err = Error::from_status(
            403,
            "API rate limit exceeded for user".into(),
            Error::GitHubApi,
        );
        assert!(matches!(err, Error::RateLimited(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_from_status_server_errors_are_transient() {
        let err = Error::from_status(502, "Bad Gateway".into(), Error::GitLabApi);
        assert!(err.is_transient());
    }

    #[test]
    fn test_from_status_other_uses_vendor_variant() {
        let err = Error::from_status(422, "Validation Failed".into(), Error::GitLabApi);
        match err {
            Error::GitLabApi(msg) => assert!(msg.contains("422")),
            other => panic!("expected GitLabApi, got {other:?}"),
        }
    }
}
