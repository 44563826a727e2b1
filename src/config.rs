//! Configuration file (`config.toml`)
//!
//! ```toml
//! [engine]
//! merge_method = "squash"
//!
//! [monitor]
//! poll_interval = "30s"
//! monitor_duration = "5m"
//!
//! [batch]
//! parallel = true
//! max_concurrent = 3
//!
//! [strategies.unstable]
//! max_retries = 20
//! max_delay = "10m"
//! ```

use crate::error::{Error, Result};
use crate::monitor::DEFAULT_POLL_INTERVAL;
use crate::orchestrator::{BatchOptions, OrchestratorSettings};
use crate::retry::strategy::{PolicyOverride, RetryStrategyTable, StrategyOverrides};
use crate::types::{MergeMethod, MergeableState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the user config dir
const CONFIG_DIR: &str = "merge-retry";

/// Config filename
const CONFIG_FILE: &str = "config.toml";

/// `[engine]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// How PRs are merged
    pub merge_method: MergeMethod,
}

/// `[monitor]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Time between polls
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long `merge --watch` observes before merging
    #[serde(with = "humantime_serde")]
    pub monitor_duration: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            monitor_duration: OrchestratorSettings::default().monitor_duration,
        }
    }
}

/// `[batch]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Run batch sessions concurrently
    pub parallel: bool,
    /// Concurrency bound
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        let defaults = BatchOptions::default();
        Self {
            parallel: defaults.parallel,
            max_concurrent: defaults.max_concurrent,
        }
    }
}

/// Whole config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// `[engine]`
    pub engine: EngineConfig,
    /// `[monitor]`
    pub monitor: MonitorConfig,
    /// `[batch]`
    pub batch: BatchConfig,
    /// `[strategies.<state>]`, keyed by state name
    pub strategies: BTreeMap<String, PolicyOverride>,
}

impl Config {
    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.batch.max_concurrent == 0 {
            return Err(Error::Config(
                "batch.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.monitor.poll_interval.is_zero() {
            return Err(Error::Config(
                "monitor.poll_interval must be greater than zero".to_string(),
            ));
        }
        self.strategy_overrides().map(|_| ())
    }

    /// `[strategies]` with keys parsed into states.
    ///
    /// Keys match states case-insensitively; two keys for one state are an
    /// error rather than one silently winning.
    pub fn strategy_overrides(&self) -> Result<StrategyOverrides> {
        let mut overrides = StrategyOverrides::new();
        for (name, over) in &self.strategies {
            let state: MergeableState = name
                .parse()
                .map_err(|_| Error::Config(format!("unknown state in [strategies]: {name}")))?;
            if overrides.insert(state, *over).is_some() {
                return Err(Error::Config(format!(
                    "duplicate state in [strategies]: {name} (already set as {state})"
                )));
            }
        }
        Ok(overrides)
    }

    /// Default table with `[strategies]` merged on top
    pub fn strategy_table(&self) -> Result<RetryStrategyTable> {
        Ok(RetryStrategyTable::with_overrides(&self.strategy_overrides()?))
    }

    /// Batch options from `[batch]`
    pub const fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            parallel: self.batch.parallel,
            max_concurrent: self.batch.max_concurrent,
        }
    }

    /// Orchestrator settings from `[monitor]` and `[batch]`
    pub const fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            monitor_duration: self.monitor.monitor_duration,
            batch: self.batch_options(),
        }
    }
}

/// Default config path (`~/.config/merge-retry/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, the default path is used and
/// a missing file yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(explicit) => {
            if !explicit.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    explicit.display()
                )));
            }
            explicit.to_path_buf()
        }
        None => match default_config_path() {
            Some(default) if default.exists() => default,
            _ => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Write `config` to `path`, creating parent directories
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Config(format!("failed to create {}: {e}", dir.display())))?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;
    let content_with_header = format!("# merge-retry configuration\n\n{content}");

    fs::write(path, content_with_header)
        .map_err(|e| Error::Config(format!("failed to write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let temp = TempDir::new().unwrap();
        let err = load_config(Some(&temp.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.monitor.poll_interval, Duration::from_secs(30));
        assert_eq!(config.engine.merge_method, MergeMethod::Squash);
    }

    #[test]
    fn test_full_file() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            r#"
[engine]
merge_method = "rebase"

[monitor]
poll_interval = "10s"

[batch]
parallel = false
max_concurrent = 5

[strategies.unstable]
max_retries = 20
max_delay = "10m"

[strategies.BLOCKED]
manual_intervention_required = true
"#,
        );
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.engine.merge_method, MergeMethod::Rebase);
        assert_eq!(config.monitor.poll_interval, Duration::from_secs(10));
        assert_eq!(
            config.batch_options(),
            BatchOptions {
                parallel: false,
                max_concurrent: 5
            }
        );

        let table = config.strategy_table().unwrap();
        let unstable = table.lookup(MergeableState::Unstable);
        assert_eq!(unstable.max_retries, 20);
        assert_eq!(unstable.max_delay, Duration::from_secs(600));
        assert_eq!(unstable.base_delay, Duration::from_secs(30));

        let blocked = table.lookup(MergeableState::Blocked);
        assert!(blocked.manual_intervention_required);
        assert_eq!(blocked.max_retries, 0);
    }

    #[test]
    fn test_unknown_state_key_rejected() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "[strategies.mergeable]\nmax_retries = 1\n");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("mergeable"), "{err}");
    }

    #[test]
    fn test_same_state_in_two_cases_rejected() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "[strategies.unstable]\nmax_retries = 1\n\n[strategies.UNSTABLE]\nmax_retries = 9\n",
        );
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("duplicate state"), "{err}");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "[batch]\nworkers = 4\n");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "[batch]\nmax_concurrent = 0\n");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.batch.max_concurrent = 7;
        save_config(&path, &config).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# merge-retry configuration"));
        assert_eq!(load_config(Some(&path)).unwrap(), config);
    }
}
