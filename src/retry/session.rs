//! Retry session state - the attempt history of one merge request

use crate::retry::strategy::RetryPolicy;
use crate::types::{MergeableState, PrId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the engine did during one step of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptAction {
    /// Called merge
    Merge,
    /// Asked the platform to update the branch from base
    UpdateBranch,
    /// Slept, then re-checked state
    Wait,
    /// Stopped: the state needs a human
    ManualIntervention,
    /// Stopped without acting (budget spent, fatal error, cancelled)
    Abort,
}

impl std::fmt::Display for AttemptAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::UpdateBranch => write!(f, "update branch"),
            Self::Wait => write!(f, "wait"),
            Self::ManualIntervention => write!(f, "manual intervention"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum AttemptOutcome {
    /// The action succeeded
    Succeeded,
    /// The platform refused the action (merge race, update refused)
    Rejected(String),
    /// The action failed with an error
    Failed(String),
    /// The session will loop again
    Retrying,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Retrying => write!(f, "retrying"),
        }
    }
}

/// One entry in a session's append-only history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Attempt this step belongs to (1-based; equals retries used + 1)
    pub attempt_number: u32,
    /// State observed at the start of the step
    pub observed_state: MergeableState,
    /// Time slept during this step (zero for non-wait steps)
    pub delay: Duration,
    /// What the engine did
    pub action: AttemptAction,
    /// How it went
    pub outcome: AttemptOutcome,
    /// Wall-clock time the step completed
    pub timestamp: DateTime<Utc>,
    /// Time since session start when the step completed
    pub elapsed: Duration,
}

/// Terminal result of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SessionOutcome {
    /// PR merged
    Merged {
        /// Merge commit SHA, when the platform reports one
        sha: Option<String>,
    },
    /// A human has to act (conflicts, or a policy that forbids retries)
    NeedsHuman {
        /// Why
        reason: String,
    },
    /// Retry budget or timeout spent
    Exhausted {
        /// Why
        reason: String,
    },
    /// Fatal client error
    Error {
        /// Error message
        message: String,
    },
    /// Caller cancelled the session
    Cancelled,
}

impl SessionOutcome {
    /// Short lowercase label (`merged`, `needs_human`, ...)
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Merged { .. } => "merged",
            Self::NeedsHuman { .. } => "needs_human",
            Self::Exhausted { .. } => "exhausted",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the PR was merged
    pub const fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merged { sha: Some(sha) } => write!(f, "merged ({sha})"),
            Self::Merged { sha: None } => write!(f, "merged"),
            Self::NeedsHuman { reason } => write!(f, "needs human: {reason}"),
            Self::Exhausted { reason } => write!(f, "exhausted: {reason}"),
            Self::Error { message } => write!(f, "error: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The full record of one `merge_with_retry` call
///
/// Owned by exactly one engine task while running; handed to the caller once
/// terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySession {
    /// PR being merged
    pub pr: PrId,
    /// Policy in effect at the last step
    pub policy: Option<RetryPolicy>,
    /// Last state observed
    pub last_state: Option<MergeableState>,
    /// Ordered step history
    pub attempts: Vec<AttemptRecord>,
    /// Backoff cycles consumed against the semantic retry budget
    pub retries: u32,
    /// Whether the one permitted branch update was spent
    pub branch_updated: bool,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Total runtime, filled in when terminal
    pub elapsed: Duration,
    /// Terminal outcome, `None` while running
    pub outcome: Option<SessionOutcome>,
}

impl RetrySession {
    /// Fresh session for a PR
    pub fn new(pr: PrId) -> Self {
        Self {
            pr,
            policy: None,
            last_state: None,
            attempts: Vec::new(),
            retries: 0,
            branch_updated: false,
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            outcome: None,
        }
    }

    /// Whether the session has finished
    pub const fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Whether the session ended with a merge
    pub fn is_merged(&self) -> bool {
        self.outcome.as_ref().is_some_and(SessionOutcome::is_merged)
    }

    /// Number of the attempt currently in progress
    pub const fn current_attempt(&self) -> u32 {
        self.retries + 1
    }

    /// Total time spent sleeping between attempts
    pub fn total_delay(&self) -> Duration {
        self.attempts.iter().map(|a| a.delay).sum()
    }

    /// Most recent step
    pub fn last_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(delay_secs: u64, action: AttemptAction) -> AttemptRecord {
        AttemptRecord {
            attempt_number: 1,
            observed_state: MergeableState::Unstable,
            delay: Duration::from_secs(delay_secs),
            action,
            outcome: AttemptOutcome::Retrying,
            timestamp: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_new_session_is_running() {
        let session = RetrySession::new(PrId::new(3));
        assert!(!session.is_terminal());
        assert!(!session.is_merged());
        assert_eq!(session.current_attempt(), 1);
    }

    #[test]
    fn test_total_delay_sums_waits() {
        let mut session = RetrySession::new(PrId::new(3));
        session.attempts.push(record(30, AttemptAction::Wait));
        session.attempts.push(record(60, AttemptAction::Wait));
        session.attempts.push(record(0, AttemptAction::Merge));
        assert_eq!(session.total_delay(), Duration::from_secs(90));
        assert_eq!(session.last_attempt().map(|a| a.action), Some(AttemptAction::Merge));
    }

    #[test]
    fn test_outcome_labels_and_display() {
        let merged = SessionOutcome::Merged {
            sha: Some("abc123".to_string()),
        };
        assert_eq!(merged.label(), "merged");
        assert_eq!(merged.to_string(), "merged (abc123)");
        assert!(merged.is_merged());

        let human = SessionOutcome::NeedsHuman {
            reason: "conflict".to_string(),
        };
        assert_eq!(human.label(), "needs_human");
        assert!(!human.is_merged());
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let json = serde_json::to_value(SessionOutcome::Exhausted {
            reason: "timeout".to_string(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "exhausted");
        assert_eq!(json["reason"], "timeout");
    }
}
