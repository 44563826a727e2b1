//! Shared command context for CLI commands
//!
//! Resolves the repository, loads config, and builds the orchestrator every
//! platform-facing command needs.

use merge_retry::config::{Config, load_config};
use merge_retry::error::{Error, Result};
use merge_retry::monitor::PrStateMonitor;
use merge_retry::orchestrator::MergeOrchestrator;
use merge_retry::platform::{PlatformService, create_platform_service, parse_remote_url, parse_repo_spec};
use merge_retry::retry::SmartMergeRetryEngine;
use merge_retry::types::{Platform, PlatformConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Where the target repository comes from
#[derive(Debug, Clone, Default)]
pub struct RepoTarget {
    /// `owner/repo` (GitLab: `group/sub/project`)
    pub repo: Option<String>,
    /// Git remote URL, used when `repo` is not given
    pub remote_url: Option<String>,
    /// Platform for `repo` (default GitHub)
    pub platform: Option<Platform>,
    /// Self-hosted instance for `repo`
    pub host: Option<String>,
}

impl RepoTarget {
    /// Resolve to a platform config
    pub fn resolve(&self) -> Result<PlatformConfig> {
        if let Some(spec) = &self.repo {
            return parse_repo_spec(
                spec,
                self.platform.unwrap_or(Platform::GitHub),
                self.host.clone(),
            );
        }
        if let Some(url) = &self.remote_url {
            let mut config = parse_remote_url(url)?;
            if let Some(platform) = self.platform {
                config.platform = platform;
            }
            return Ok(config);
        }
        Err(Error::InvalidRepo(
            "no repository given; pass --repo owner/repo or --remote-url".to_string(),
        ))
    }
}

/// Shared context for commands that talk to the platform
pub struct CommandContext {
    /// Loaded configuration
    pub config: Config,
    /// Resolved repository
    pub platform_config: PlatformConfig,
    /// Facade over engine and monitor
    pub orchestrator: MergeOrchestrator,
}

impl CommandContext {
    /// Load config, resolve the repository, and connect to the platform
    pub fn new(target: &RepoTarget, config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let platform_config = target.resolve()?;
        debug!(
            platform = %platform_config.platform,
            owner = %platform_config.owner,
            repo = %platform_config.repo,
            "resolved repository"
        );
        let platform: Arc<dyn PlatformService> =
            Arc::from(create_platform_service(&platform_config)?);
        let orchestrator = build_orchestrator(&config, platform)?;
        Ok(Self {
            config,
            platform_config,
            orchestrator,
        })
    }

    /// `owner/repo` for display
    pub fn repo_name(&self) -> String {
        format!("{}/{}", self.platform_config.owner, self.platform_config.repo)
    }
}

/// Wire engine, monitor, and orchestrator from config
pub fn build_orchestrator(
    config: &Config,
    platform: Arc<dyn PlatformService>,
) -> Result<MergeOrchestrator> {
    let engine = SmartMergeRetryEngine::new(Arc::clone(&platform))
        .with_table(config.strategy_table()?)
        .with_merge_method(config.engine.merge_method);
    let monitor = PrStateMonitor::new(platform).with_poll_interval(config.monitor.poll_interval);
    Ok(MergeOrchestrator::from_parts(
        engine,
        monitor,
        config.orchestrator_settings(),
    ))
}
