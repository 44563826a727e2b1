//! Merge orchestrator - facade composing the engine and the monitor
//!
//! This is the entry point the CLI (and other automation) talks to.

use crate::error::{Error, Result};
use crate::monitor::{EventKind, EventRegistry, PrStateMonitor, SubscriptionHandle};
use crate::platform::PlatformService;
use crate::retry::backoff::total_budget;
use crate::retry::engine::{MergeOptions, SmartMergeRetryEngine};
use crate::retry::session::RetrySession;
use crate::retry::strategy::RetryPolicy;
use crate::types::{CheckStatus, MergeableState, PrId, PrSpec, PullRequest};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Per-PR results of a batch; every requested PR has an entry
pub type BatchResults = BTreeMap<PrId, Result<RetrySession>>;

/// How a batch runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Run sessions concurrently
    pub parallel: bool,
    /// Upper bound on concurrently running sessions when parallel
    pub max_concurrent: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            max_concurrent: 3,
        }
    }
}

/// Options for [`MergeOrchestrator::merge_existing`]
#[derive(Debug, Clone, Default)]
pub struct MergeExistingOptions {
    /// Watch the PR until it is ready (or conflicted) before merging
    pub monitor_before_merge: bool,
    /// How long to watch; defaults to the orchestrator setting
    pub monitor_duration: Option<Duration>,
    /// Poll interval while watching; defaults to the monitor's
    pub poll_interval: Option<Duration>,
    /// Passed through to the engine
    pub merge: MergeOptions,
}

/// Orchestrator defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Default pre-merge watch window
    pub monitor_duration: Duration,
    /// Default batch behavior
    pub batch: BatchOptions,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            monitor_duration: Duration::from_secs(5 * 60),
            batch: BatchOptions::default(),
        }
    }
}

/// Result of [`MergeOrchestrator::create_and_merge`]
#[derive(Debug)]
pub struct CreateAndMergeResult {
    /// The created PR
    pub pr: PullRequest,
    /// Merge session, when auto-merge was requested
    pub session: Option<RetrySession>,
    /// Running subscription, when monitoring without auto-merge
    pub subscription: Option<SubscriptionHandle>,
}

/// Next step suggested for a PR in a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Ready: merge now
    MergeNow,
    /// Checks still running or failing transiently
    WaitForChecks,
    /// Base moved ahead; update the branch, then re-check
    UpdateBranch,
    /// Base moved ahead; branch updates are disabled, so wait
    WaitForUpdate,
    /// Reviews or other requirements unmet
    WaitForReview,
    /// Conflicts must be resolved by hand
    ResolveConflicts,
    /// The platform has not computed the state yet
    Recheck,
    /// Policy says a human must act
    ManualReview,
}

impl RecommendedAction {
    /// Pick the action for `state` under `policy`
    pub const fn for_state(state: MergeableState, policy: &RetryPolicy) -> Self {
        if policy.manual_intervention_required {
            return match state {
                MergeableState::Dirty => Self::ResolveConflicts,
                _ => Self::ManualReview,
            };
        }
        match state {
            MergeableState::Clean => Self::MergeNow,
            MergeableState::Unstable => Self::WaitForChecks,
            MergeableState::Behind if policy.auto_update_branch => Self::UpdateBranch,
            MergeableState::Behind => Self::WaitForUpdate,
            MergeableState::Blocked => Self::WaitForReview,
            MergeableState::Dirty => Self::ResolveConflicts,
            MergeableState::Unknown => Self::Recheck,
        }
    }

    /// One-line human description
    pub const fn describe(self) -> &'static str {
        match self {
            Self::MergeNow => "merge now",
            Self::WaitForChecks => "wait for checks, retrying with backoff",
            Self::UpdateBranch => "update branch from base once, then re-check",
            Self::WaitForUpdate => "wait for the branch to be updated",
            Self::WaitForReview => "wait for required reviews, re-polling",
            Self::ResolveConflicts => "resolve conflicts by hand",
            Self::Recheck => "re-check shortly; state not computed yet",
            Self::ManualReview => "needs manual review",
        }
    }
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// Read-only diagnosis of a PR
#[derive(Debug, Clone, Serialize)]
pub struct RetryRecommendation {
    /// PR diagnosed
    pub pr: PrId,
    /// State right now
    pub current_state: MergeableState,
    /// Check status, when the platform reported one
    pub check_status: Option<CheckStatus>,
    /// Suggested next step
    pub recommended_action: RecommendedAction,
    /// Policy the engine would apply
    pub policy: RetryPolicy,
    /// Human-readable policy summary
    pub policy_summary: String,
    /// Worst-case wait under the policy, ignoring jitter
    #[serde(with = "humantime_serde")]
    pub estimated_wait: Duration,
}

/// Subscriptions started by [`MergeOrchestrator::monitor_multiple`], plus
/// the outcomes of any auto-merge sessions they kicked off
pub struct MonitorSet {
    /// One subscription per distinct PR
    pub handles: BTreeMap<PrId, SubscriptionHandle>,
    merges: mpsc::UnboundedReceiver<(PrId, Result<RetrySession>)>,
    /// Auto-merges started but not yet received
    pending: Arc<AtomicUsize>,
}

impl MonitorSet {
    /// Auto-merge sessions started whose outcome has not been taken yet
    pub fn merges_pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Next finished auto-merge, in completion order.
    ///
    /// Pends while nothing has finished; an `Err` means the session was
    /// never started (usually because one was already running for the PR).
    pub async fn next_merge(&mut self) -> Option<(PrId, Result<RetrySession>)> {
        let finished = self.merges.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(finished)
    }

    /// Stop every subscription, then wait for the auto-merges already
    /// started and return the outcomes not yet taken through
    /// [`next_merge`](Self::next_merge).
    ///
    /// Running sessions are left to finish; cancel them through the engine
    /// first to end them early.
    pub async fn shutdown(mut self) -> Vec<(PrId, Result<RetrySession>)> {
        for handle in self.handles.values() {
            handle.stop_and_wait().await;
        }
        let mut finished = Vec::new();
        while self.merges_pending() > 0 {
            match self.next_merge().await {
                Some(outcome) => finished.push(outcome),
                None => break,
            }
        }
        finished
    }
}

impl std::fmt::Debug for MonitorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorSet")
            .field("prs", &self.handles.keys().collect::<Vec<_>>())
            .field("merges_pending", &self.merges_pending())
            .finish()
    }
}

/// Facade over the engine and the monitor
///
/// Cheap to clone; clones share the engine (and its active-session guard).
#[derive(Clone)]
pub struct MergeOrchestrator {
    platform: Arc<dyn PlatformService>,
    engine: Arc<SmartMergeRetryEngine>,
    monitor: Arc<PrStateMonitor>,
    settings: OrchestratorSettings,
}

impl MergeOrchestrator {
    /// Orchestrator with default engine, monitor, and settings
    pub fn new(platform: Arc<dyn PlatformService>) -> Self {
        Self::from_parts(
            SmartMergeRetryEngine::new(Arc::clone(&platform)),
            PrStateMonitor::new(Arc::clone(&platform)),
            OrchestratorSettings::default(),
        )
    }

    /// Orchestrator from configured parts; the engine's platform is used
    /// for PR creation and diagnostics
    pub fn from_parts(
        engine: SmartMergeRetryEngine,
        monitor: PrStateMonitor,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            platform: Arc::clone(engine.platform()),
            engine: Arc::new(engine),
            monitor: Arc::new(monitor),
            settings,
        }
    }

    /// The engine
    pub fn engine(&self) -> &SmartMergeRetryEngine {
        &self.engine
    }

    /// The monitor
    pub fn monitor(&self) -> &PrStateMonitor {
        &self.monitor
    }

    /// Settings in effect
    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Create a PR, then optionally merge it and/or watch it.
    ///
    /// With `auto_merge`, `monitor` means "watch until ready before merging".
    /// Without it, `monitor` starts a subscription the caller can attach
    /// handlers to.
    pub async fn create_and_merge(
        &self,
        spec: &PrSpec,
        auto_merge: bool,
        monitor: bool,
    ) -> Result<CreateAndMergeResult> {
        let pr = self.platform.create_pr(spec).await?;
        info!(pr = %pr.id, url = %pr.html_url, "created pull request");

        let mut result = CreateAndMergeResult {
            pr,
            session: None,
            subscription: None,
        };
        let id = result.pr.id;
        if auto_merge {
            let options = MergeExistingOptions {
                monitor_before_merge: monitor,
                ..MergeExistingOptions::default()
            };
            result.session = Some(self.merge_existing(id, options).await?);
        } else if monitor {
            result.subscription =
                Some(self.monitor.start_monitoring(id, None, EventRegistry::new()));
        }
        Ok(result)
    }

    /// Merge an existing PR through the engine, optionally watching it first.
    ///
    /// Fails up front only when a session for `pr` is already running. The
    /// PR is claimed before watching starts, so a second caller is turned
    /// away immediately rather than after the watch window.
    pub async fn merge_existing(
        &self,
        pr: PrId,
        options: MergeExistingOptions,
    ) -> Result<RetrySession> {
        let claim = self.engine.try_claim(pr)?;
        if options.monitor_before_merge {
            let window = options
                .monitor_duration
                .unwrap_or(self.settings.monitor_duration);
            match self.watch_until_ready(pr, window, options.poll_interval).await {
                Some(EventKind::MergeReady) => info!(%pr, "ready to merge"),
                Some(EventKind::ConflictDetected) => {
                    info!(%pr, "conflict observed while watching");
                }
                _ => debug!(%pr, window = ?window, "watch window ended without a ready signal"),
            }
        }
        Ok(self.engine.merge_claimed(claim, options.merge).await)
    }

    /// Watch `pr` until it turns CLEAN or DIRTY, the window ends, or the
    /// subscription dies
    async fn watch_until_ready(
        &self,
        pr: PrId,
        window: Duration,
        poll_interval: Option<Duration>,
    ) -> Option<EventKind> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = EventRegistry::new();
        for kind in [EventKind::MergeReady, EventKind::ConflictDetected] {
            let tx = tx.clone();
            registry.register_fn(kind, move |_| {
                let _ = tx.send(kind);
                async { Ok(()) }
            });
        }
        drop(tx);

        let subscription = self.monitor.start_monitoring(pr, poll_interval, registry);
        let signal = tokio::select! {
            kind = rx.recv() => kind,
            () = tokio::time::sleep(window) => None,
            () = subscription.stopped() => rx.try_recv().ok(),
        };
        subscription.stop_and_wait().await;
        signal
    }

    /// Merge several PRs; see [`batch_merge_with`](Self::batch_merge_with)
    pub async fn batch_merge(&self, prs: &[PrId], options: BatchOptions) -> BatchResults {
        self.batch_merge_with(prs, options, MergeOptions::default())
            .await
    }

    /// Merge several PRs, sharing `merge` options across sessions.
    ///
    /// Duplicate ids run once. One PR failing never affects its siblings,
    /// and every PR gets an entry in the result.
    pub async fn batch_merge_with(
        &self,
        prs: &[PrId],
        options: BatchOptions,
        merge: MergeOptions,
    ) -> BatchResults {
        let mut seen = BTreeSet::new();
        let unique: Vec<PrId> = prs.iter().copied().filter(|pr| seen.insert(*pr)).collect();
        info!(
            count = unique.len(),
            parallel = options.parallel,
            max_concurrent = options.max_concurrent,
            "starting batch merge"
        );

        let mut results = BatchResults::new();
        if !options.parallel || unique.len() <= 1 {
            for pr in unique {
                let outcome = self.engine.merge_with_options(pr, merge.clone()).await;
                results.insert(pr, outcome);
            }
            return results;
        }

        let limit = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        let mut task_prs = HashMap::new();
        for pr in unique {
            let engine = Arc::clone(&self.engine);
            let limit = Arc::clone(&limit);
            let merge = merge.clone();
            let handle = tasks.spawn(async move {
                let Ok(_permit) = limit.acquire_owned().await else {
                    return Err(Error::Internal("batch limiter closed".to_string()));
                };
                engine.merge_with_options(pr, merge).await
            });
            task_prs.insert(handle.id(), pr);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Some(pr) = task_prs.remove(&id) {
                        results.insert(pr, outcome);
                    }
                }
                Err(e) => {
                    if let Some(pr) = task_prs.remove(&e.id()) {
                        warn!(%pr, error = %e, "batch merge task failed");
                        results.insert(pr, Err(Error::Internal(format!("merge task failed: {e}"))));
                    }
                }
            }
        }
        results
    }

    /// Watch several PRs, one subscription each.
    ///
    /// With `auto_merge_on_ready`, each subscription starts a merge session
    /// in the background when its PR turns CLEAN; finished sessions come back
    /// through the returned [`MonitorSet`].
    pub fn monitor_multiple(
        &self,
        prs: &[PrId],
        auto_merge_on_ready: bool,
        poll_interval: Option<Duration>,
    ) -> MonitorSet {
        self.monitor_multiple_with(prs, auto_merge_on_ready, poll_interval, &EventRegistry::new())
    }

    /// [`monitor_multiple`](Self::monitor_multiple) where every subscription
    /// starts with the handlers in `base`, ahead of the auto-merge handler
    pub fn monitor_multiple_with(
        &self,
        prs: &[PrId],
        auto_merge_on_ready: bool,
        poll_interval: Option<Duration>,
        base: &EventRegistry,
    ) -> MonitorSet {
        let (tx, merges) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let mut handles = BTreeMap::new();
        for &pr in prs {
            if handles.contains_key(&pr) {
                continue;
            }
            let mut registry = base.clone();
            if auto_merge_on_ready {
                let orchestrator = self.clone();
                let tx = tx.clone();
                let pending = Arc::clone(&pending);
                registry.register_fn(EventKind::MergeReady, move |event| {
                    let pr = event.pr();
                    // Counted before the task exists, so a shutdown that
                    // follows this callback always waits for it
                    pending.fetch_add(1, Ordering::SeqCst);
                    let orchestrator = orchestrator.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let session = tokio::spawn(async move {
                            orchestrator
                                .merge_existing(pr, MergeExistingOptions::default())
                                .await
                        });
                        let outcome = match session.await {
                            Ok(outcome) => outcome,
                            Err(e) => Err(Error::Internal(format!("merge task failed: {e}"))),
                        };
                        match &outcome {
                            Ok(session) => {
                                let label = session.outcome.as_ref().map_or("unknown", |o| o.label());
                                info!(%pr, outcome = label, "auto-merge finished");
                            }
                            Err(e) => warn!(%pr, error = %e, "auto-merge not started"),
                        }
                        let _ = tx.send((pr, outcome));
                    });
                    async { Ok(()) }
                });
            }
            handles.insert(pr, self.monitor.start_monitoring(pr, poll_interval, registry));
        }
        MonitorSet {
            handles,
            merges,
            pending,
        }
    }

    /// Diagnose `pr` without touching it
    pub async fn get_retry_recommendations(&self, pr: PrId) -> Result<RetryRecommendation> {
        let current_state = self.platform.get_mergeable_state(pr).await?;
        let check_status = match self.platform.get_check_status(pr).await {
            Ok(status) => Some(status),
            Err(e) => {
                debug!(%pr, error = %e, "check status unavailable");
                None
            }
        };
        let policy = self.engine.table().lookup(current_state);
        let recommended_action = RecommendedAction::for_state(current_state, &policy);
        let estimated_wait = if current_state == MergeableState::Clean {
            Duration::ZERO
        } else {
            total_budget(&policy)
        };
        Ok(RetryRecommendation {
            pr,
            current_state,
            check_status,
            recommended_action,
            policy,
            policy_summary: policy.to_string(),
            estimated_wait,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommended_action_per_default_policy() {
        let expect = [
            (MergeableState::Clean, RecommendedAction::MergeNow),
            (MergeableState::Unstable, RecommendedAction::WaitForChecks),
            (MergeableState::Behind, RecommendedAction::UpdateBranch),
            (MergeableState::Blocked, RecommendedAction::WaitForReview),
            (MergeableState::Dirty, RecommendedAction::ResolveConflicts),
            (MergeableState::Unknown, RecommendedAction::Recheck),
        ];
        for (state, action) in expect {
            let policy = RetryPolicy::default_for(state);
            assert_eq!(RecommendedAction::for_state(state, &policy), action, "{state}");
        }
    }

    #[test]
    fn test_manual_policy_overrides_action() {
        let policy = RetryPolicy {
            manual_intervention_required: true,
            ..RetryPolicy::default_for(MergeableState::Blocked)
        };
        assert_eq!(
            RecommendedAction::for_state(MergeableState::Blocked, &policy),
            RecommendedAction::ManualReview
        );
    }

    #[test]
    fn test_behind_without_auto_update() {
        let policy = RetryPolicy {
            auto_update_branch: false,
            ..RetryPolicy::default_for(MergeableState::Behind)
        };
        assert_eq!(
            RecommendedAction::for_state(MergeableState::Behind, &policy),
            RecommendedAction::WaitForUpdate
        );
    }
}
