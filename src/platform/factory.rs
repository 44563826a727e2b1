//! Platform service construction

use crate::error::{Error, Result};
use crate::platform::{GitHubService, GitLabService, PlatformService};
use crate::types::{Platform, PlatformConfig};
use tracing::debug;

/// Environment variables consulted for a platform token, in order
const fn token_vars(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::GitHub => &["GITHUB_TOKEN", "GH_TOKEN"],
        Platform::GitLab => &["GITLAB_TOKEN", "GL_TOKEN"],
    }
}

/// Read the API token for a platform from the environment
pub fn token_for(platform: Platform) -> Result<String> {
    let vars = token_vars(platform);
    vars.iter()
        .find_map(|var| {
            std::env::var(var)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .inspect(|_| debug!(var, "using token from environment"))
        })
        .ok_or_else(|| {
            Error::Auth(format!(
                "no {platform} token found; set one of {}",
                vars.join(", ")
            ))
        })
}

/// Create a platform service for the given configuration
pub fn create_platform_service(config: &PlatformConfig) -> Result<Box<dyn PlatformService>> {
    let token = token_for(config.platform)?;
    match config.platform {
        Platform::GitHub => Ok(Box::new(GitHubService::new(
            &token,
            config.owner.clone(),
            config.repo.clone(),
            config.host.clone(),
        )?)),
        Platform::GitLab => Ok(Box::new(GitLabService::new(
            token,
            config.owner.clone(),
            config.repo.clone(),
            config.host.clone(),
        )?)),
    }
}
