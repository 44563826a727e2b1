//! Retry strategy table - pure mapping from mergeable state to retry policy
//!
//! No I/O happens here. The engine re-reads the table on every loop
//! iteration, so a PR moving between states picks up the matching policy.

use crate::types::MergeableState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How to retry a merge while a PR sits in one mergeable state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct RetryPolicy {
    /// Maximum number of backoff cycles before giving up
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound for exponential growth
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Overall budget, measured from session start
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Double the delay on each retry
    pub exponential_backoff: bool,
    /// Add up to 10% random delay
    pub jitter: bool,
    /// Ask the platform to update the branch from base (once per session)
    pub auto_update_branch: bool,
    /// Never retry automatically; hand over to a human
    pub manual_intervention_required: bool,
}

impl RetryPolicy {
    /// Policy that never waits and never retries
    pub const IMMEDIATE: Self = Self {
        max_retries: 0,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        timeout: Duration::from_secs(30 * 60),
        exponential_backoff: false,
        jitter: false,
        auto_update_branch: false,
        manual_intervention_required: false,
    };

    /// Default policy for a state
    pub const fn default_for(state: MergeableState) -> Self {
        match state {
            // Merge right away; a rejected merge gets no extra retries
            MergeableState::Clean => Self::IMMEDIATE,
            // Waiting for checks
            MergeableState::Unstable => Self {
                max_retries: 10,
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(300),
                timeout: Duration::from_secs(30 * 60),
                exponential_backoff: true,
                jitter: true,
                auto_update_branch: false,
                manual_intervention_required: false,
            },
            MergeableState::Behind => Self {
                max_retries: 3,
                base_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(300),
                timeout: Duration::from_secs(30 * 60),
                exponential_backoff: true,
                jitter: true,
                auto_update_branch: true,
                manual_intervention_required: false,
            },
            // Re-poll reviews, never force anything
            MergeableState::Blocked => Self {
                max_retries: 5,
                base_delay: Duration::from_secs(120),
                max_delay: Duration::from_secs(600),
                timeout: Duration::from_secs(60 * 60),
                exponential_backoff: true,
                jitter: true,
                auto_update_branch: false,
                manual_intervention_required: false,
            },
            MergeableState::Dirty => Self {
                max_retries: 0,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                timeout: Duration::ZERO,
                exponential_backoff: false,
                jitter: false,
                auto_update_branch: false,
                manual_intervention_required: true,
            },
            // One quick re-check at a time while the platform computes the state
            MergeableState::Unknown => Self {
                max_retries: 3,
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(60),
                timeout: Duration::from_secs(30 * 60),
                exponential_backoff: true,
                jitter: true,
                auto_update_branch: false,
                manual_intervention_required: false,
            },
        }
    }

    /// Enforce the table invariants: a manual-intervention policy never
    /// retries, and `max_delay` never undercuts `base_delay`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.manual_intervention_required {
            self.max_retries = 0;
        }
        if self.max_delay < self.base_delay {
            self.max_delay = self.base_delay;
        }
        self
    }
}

impl std::fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.manual_intervention_required {
            return write!(f, "no automatic retries (manual intervention required)");
        }
        if self.max_retries == 0 {
            return write!(f, "merge immediately, no retries");
        }
        write!(
            f,
            "up to {} retries, {} base delay",
            self.max_retries,
            humantime::format_duration(self.base_delay)
        )?;
        if self.exponential_backoff && !self.auto_update_branch {
            write!(
                f,
                " (exponential, max {})",
                humantime::format_duration(self.max_delay)
            )?;
        }
        if self.jitter {
            write!(f, " + jitter")?;
        }
        if self.auto_update_branch {
            write!(f, ", auto-update branch once")?;
        }
        write!(f, ", timeout {}", humantime::format_duration(self.timeout))
    }
}

/// Partial policy: unset fields keep the underlying value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverride {
    /// Replaces `max_retries`
    pub max_retries: Option<u32>,
    /// Replaces `base_delay`
    #[serde(default, with = "humantime_serde::option")]
    pub base_delay: Option<Duration>,
    /// Replaces `max_delay`
    #[serde(default, with = "humantime_serde::option")]
    pub max_delay: Option<Duration>,
    /// Replaces `timeout`
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    /// Replaces `exponential_backoff`
    pub exponential_backoff: Option<bool>,
    /// Replaces `jitter`
    pub jitter: Option<bool>,
    /// Replaces `auto_update_branch`
    pub auto_update_branch: Option<bool>,
    /// Replaces `manual_intervention_required`
    pub manual_intervention_required: Option<bool>,
}

impl PolicyOverride {
    /// Apply this override on top of `base`
    #[must_use]
    pub fn apply(&self, base: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            base_delay: self.base_delay.unwrap_or(base.base_delay),
            max_delay: self.max_delay.unwrap_or(base.max_delay),
            timeout: self.timeout.unwrap_or(base.timeout),
            exponential_backoff: self.exponential_backoff.unwrap_or(base.exponential_backoff),
            jitter: self.jitter.unwrap_or(base.jitter),
            auto_update_branch: self.auto_update_branch.unwrap_or(base.auto_update_branch),
            manual_intervention_required: self
                .manual_intervention_required
                .unwrap_or(base.manual_intervention_required),
        }
        .normalized()
    }
}

/// Per-state partial overrides, as read from config or supplied per call
pub type StrategyOverrides = HashMap<MergeableState, PolicyOverride>;

/// Mapping from every [`MergeableState`] to its [`RetryPolicy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStrategyTable {
    policies: HashMap<MergeableState, RetryPolicy>,
}

impl Default for RetryStrategyTable {
    fn default() -> Self {
        Self {
            policies: MergeableState::ALL
                .into_iter()
                .map(|state| (state, RetryPolicy::default_for(state)))
                .collect(),
        }
    }
}

impl RetryStrategyTable {
    /// Default table with `overrides` merged on top
    pub fn with_overrides(overrides: &StrategyOverrides) -> Self {
        Self::default().merged(overrides)
    }

    /// Copy of this table with `overrides` merged on top
    #[must_use]
    pub fn merged(&self, overrides: &StrategyOverrides) -> Self {
        let mut policies = self.policies.clone();
        for (state, over) in overrides {
            let base = self.lookup(*state);
            policies.insert(*state, over.apply(base));
        }
        Self { policies }
    }

    /// Policy for a state.
    ///
    /// A state missing from the table falls back to the `Unknown` entry,
    /// which itself falls back to the built-in `Unknown` default.
    pub fn lookup(&self, state: MergeableState) -> RetryPolicy {
        self.policies
            .get(&state)
            .or_else(|| self.policies.get(&MergeableState::Unknown))
            .copied()
            .unwrap_or_else(|| RetryPolicy::default_for(MergeableState::Unknown))
    }

    /// Iterate `(state, policy)` pairs in state order
    pub fn iter(&self) -> impl Iterator<Item = (MergeableState, RetryPolicy)> + '_ {
        MergeableState::ALL
            .into_iter()
            .map(|state| (state, self.lookup(state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_states_have_sane_policies() {
        let table = RetryStrategyTable::default();
        for (state, policy) in table.iter() {
            if policy.manual_intervention_required {
                assert_eq!(policy.max_retries, 0, "{state}");
            }
            assert!(policy.max_delay >= policy.base_delay, "{state}");
        }
    }

    #[test]
    fn test_default_values_match_design_intent() {
        let table = RetryStrategyTable::default();

        let clean = table.lookup(MergeableState::Clean);
        assert_eq!(clean.max_retries, 0);
        assert!(!clean.manual_intervention_required);

        let unstable = table.lookup(MergeableState::Unstable);
        assert_eq!(unstable.max_retries, 10);
        assert_eq!(unstable.base_delay, Duration::from_secs(30));
        assert_eq!(unstable.max_delay, Duration::from_secs(300));
        assert!(unstable.exponential_backoff);

        let behind = table.lookup(MergeableState::Behind);
        assert!(behind.auto_update_branch);
        assert_eq!(behind.max_retries, 3);

        let blocked = table.lookup(MergeableState::Blocked);
        assert_eq!(blocked.base_delay, Duration::from_secs(120));

        let dirty = table.lookup(MergeableState::Dirty);
        assert!(dirty.manual_intervention_required);
        assert_eq!(dirty.max_retries, 0);

        let unknown = table.lookup(MergeableState::Unknown);
        assert!(!unknown.manual_intervention_required);
        assert!(unknown.max_retries <= 3);
    }

    #[test]
    fn test_partial_override_keeps_other_fields() {
        let mut overrides = StrategyOverrides::new();
        overrides.insert(
            MergeableState::Unstable,
            PolicyOverride {
                max_retries: Some(2),
                ..PolicyOverride::default()
            },
        );
        let table = RetryStrategyTable::with_overrides(&overrides);
        let policy = table.lookup(MergeableState::Unstable);
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_secs(30));
        // Untouched states keep defaults
        assert_eq!(
            table.lookup(MergeableState::Blocked),
            RetryPolicy::default_for(MergeableState::Blocked)
        );
    }

    #[test]
    fn test_override_forcing_manual_zeroes_retries() {
        let mut overrides = StrategyOverrides::new();
        overrides.insert(
            MergeableState::Blocked,
            PolicyOverride {
                manual_intervention_required: Some(true),
                ..PolicyOverride::default()
            },
        );
        let policy = RetryStrategyTable::with_overrides(&overrides).lookup(MergeableState::Blocked);
        assert!(policy.manual_intervention_required);
        assert_eq!(policy.max_retries, 0);
    }

    #[test]
    fn test_merged_layers_on_existing_table() {
        let mut first = StrategyOverrides::new();
        first.insert(
            MergeableState::Unstable,
            PolicyOverride {
                max_retries: Some(4),
                ..PolicyOverride::default()
            },
        );
        let mut second = StrategyOverrides::new();
        second.insert(
            MergeableState::Unstable,
            PolicyOverride {
                jitter: Some(false),
                ..PolicyOverride::default()
            },
        );
        let table = RetryStrategyTable::with_overrides(&first).merged(&second);
        let policy = table.lookup(MergeableState::Unstable);
        assert_eq!(policy.max_retries, 4);
        assert!(!policy.jitter);
    }

    #[test]
    fn test_policy_display() {
        let unstable = RetryPolicy::default_for(MergeableState::Unstable).to_string();
        assert!(unstable.contains("up to 10 retries"), "{unstable}");
        assert!(unstable.contains("30s"), "{unstable}");
        assert!(unstable.contains("exponential, max 5m"), "{unstable}");

        let dirty = RetryPolicy::default_for(MergeableState::Dirty).to_string();
        assert!(dirty.contains("manual intervention"), "{dirty}");
    }
}
