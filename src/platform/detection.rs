//! Repository detection from `owner/repo` specs and git remote URLs

use crate::error::{Error, Result};
use crate::types::{Platform, PlatformConfig};

/// Parse an `owner/repo` spec for an explicit platform.
///
/// GitLab specs may contain nested groups (`group/sub/project`); the last
/// segment is the repository and everything before it is the owner.
pub fn parse_repo_spec(spec: &str, platform: Platform, host: Option<String>) -> Result<PlatformConfig> {
    let trimmed = spec.trim().trim_matches('/');
    let (owner, repo) = trimmed
        .rsplit_once('/')
        .ok_or_else(|| Error::InvalidRepo(format!("expected owner/repo, got '{spec}'")))?;

    if owner.is_empty() || repo.is_empty() {
        return Err(Error::InvalidRepo(format!("expected owner/repo, got '{spec}'")));
    }
    if platform == Platform::GitHub && owner.contains('/') {
        return Err(Error::InvalidRepo(format!(
            "GitHub repositories have a single owner segment: '{spec}'"
        )));
    }

    Ok(PlatformConfig {
        platform,
        owner: owner.to_string(),
        repo: repo.to_string(),
        host,
    })
}

/// Detect platform, owner and repository from a git remote URL.
///
/// Supports `https://host/owner/repo(.git)` and `git@host:owner/repo(.git)`.
/// Hosts containing `github` map to GitHub, hosts containing `gitlab` map to
/// GitLab; anything else is rejected.
pub fn parse_remote_url(remote: &str) -> Result<PlatformConfig> {
    let trimmed = remote.trim();
    let (host, path): (String, String) = if let Some(rest) = trimmed.strip_prefix("git@") {
        let (host, path) = rest
            .split_once(':')
            .ok_or_else(|| Error::InvalidRepo(format!("malformed ssh remote '{remote}'")))?;
        (host.to_string(), path.to_string())
    } else {
        let url = url::Url::parse(trimmed)
            .map_err(|e| Error::InvalidRepo(format!("malformed remote '{remote}': {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidRepo(format!("remote has no host: '{remote}'")))?;
        (host.to_string(), url.path().to_string())
    };

    let lowered = host.to_ascii_lowercase();
    let platform = if lowered.contains("github") {
        Platform::GitHub
    } else if lowered.contains("gitlab") {
        Platform::GitLab
    } else {
        return Err(Error::InvalidRepo(format!(
            "cannot detect platform for host '{host}'"
        )));
    };

    let custom_host = match lowered.as_str() {
        "github.com" | "gitlab.com" => None,
        _ => Some(host.clone()),
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    parse_repo_spec(path, platform, custom_host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_https() {
        let config = parse_remote_url("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(config.platform, Platform::GitHub);
        assert_eq!(config.owner, "acme");
        assert_eq!(config.repo, "widgets");
        assert!(config.host.is_none());
    }

    #[test]
    fn test_github_ssh_without_git_extension() {
        let config = parse_remote_url("git@github.com:acme/widgets").unwrap();
        assert_eq!(config.owner, "acme");
        assert_eq!(config.repo, "widgets");
    }

    #[test]
    fn test_github_enterprise_keeps_host() {
        let config = parse_remote_url("https://github.corp.example/acme/widgets").unwrap();
        assert_eq!(config.platform, Platform::GitHub);
        assert_eq!(config.host.as_deref(), Some("github.corp.example"));
    }

    #[test]
    fn test_gitlab_nested_groups() {
        let config = parse_remote_url("git@gitlab.com:group/sub/project.git").unwrap();
        assert_eq!(config.platform, Platform::GitLab);
        assert_eq!(config.owner, "group/sub");
        assert_eq!(config.repo, "project");
    }

    #[test]
    fn test_url_with_trailing_slash() {
        let config = parse_remote_url("https://gitlab.com/group/project/").unwrap();
        assert_eq!(config.repo, "project");
    }

    #[test]
    fn test_unknown_host_rejected() {
        let err = parse_remote_url("https://bitbucket.org/acme/widgets").unwrap_err();
        assert!(matches!(err, Error::InvalidRepo(_)));
    }

    #[test]
    fn test_repo_spec_requires_owner() {
        assert!(parse_repo_spec("widgets", Platform::GitHub, None).is_err());
        assert!(parse_repo_spec("/widgets", Platform::GitHub, None).is_err());
    }

    #[test]
    fn test_repo_spec_github_rejects_nested_owner() {
        assert!(parse_repo_spec("a/b/c", Platform::GitHub, None).is_err());
        let gl = parse_repo_spec("a/b/c", Platform::GitLab, None).unwrap();
        assert_eq!(gl.owner, "a/b");
    }
}
