//! Merge retry execution - effectful decide/wait/retry loop
//!
//! Takes the pure pieces (strategy table, backoff schedule) and drives one
//! PR to a terminal outcome through the platform API.

use crate::error::{Error, Result};
use crate::platform::PlatformService;
use crate::retry::backoff::next_delay;
use crate::retry::progress::{NoopProgress, ProgressCallback};
use crate::retry::session::{
    AttemptAction, AttemptOutcome, AttemptRecord, RetrySession, SessionOutcome,
};
use crate::retry::strategy::{RetryStrategyTable, StrategyOverrides};
use crate::types::{MergeMethod, MergeableState, PrId};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consecutive merge rejections on a CLEAN PR that loop without consuming
/// retry budget
pub const MAX_MERGE_RACES: u32 = 3;

/// Registry of PRs with a running session
///
/// Claims are check-and-set under a single lock, so two concurrent callers
/// for the same PR cannot both proceed.
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions {
    inner: Arc<Mutex<HashSet<PrId>>>,
}

impl ActiveSessions {
    /// Claim `pr`, or fail with [`Error::AlreadyInProgress`]
    pub fn try_claim(&self, pr: PrId) -> Result<SessionClaim> {
        let mut active = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(pr) {
            return Err(Error::AlreadyInProgress(pr));
        }
        Ok(SessionClaim {
            pr,
            registry: Arc::clone(&self.inner),
        })
    }

    /// Whether a session is running for `pr`
    pub fn is_active(&self, pr: PrId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&pr)
    }

    /// Number of running sessions
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no session is running
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the PR's slot in [`ActiveSessions`] when dropped
#[derive(Debug)]
pub struct SessionClaim {
    pr: PrId,
    registry: Arc<Mutex<HashSet<PrId>>>,
}

impl SessionClaim {
    /// The claimed PR
    pub const fn pr(&self) -> PrId {
        self.pr
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.pr);
    }
}

/// Per-call options for [`SmartMergeRetryEngine::merge_with_options`]
#[derive(Clone)]
pub struct MergeOptions {
    /// Policy overrides layered over the engine's table for this call only
    pub overrides: Option<StrategyOverrides>,
    /// Caller-owned cancellation, honored at the next suspension point
    pub cancel: Option<CancellationToken>,
    /// Receives attempt records as they are appended
    pub progress: Arc<dyn ProgressCallback>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            overrides: None,
            cancel: None,
            progress: Arc::new(NoopProgress),
        }
    }
}

impl std::fmt::Debug for MergeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeOptions")
            .field("overrides", &self.overrides)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

/// Drives merges to a terminal outcome, retrying per mergeable state
///
/// One engine guards one namespace of PR ids (typically one repository):
/// at most one session per PR runs at a time.
pub struct SmartMergeRetryEngine {
    platform: Arc<dyn PlatformService>,
    table: RetryStrategyTable,
    method: MergeMethod,
    active: ActiveSessions,
    shutdown: CancellationToken,
}

impl SmartMergeRetryEngine {
    /// Engine with the default strategy table and squash merges
    pub fn new(platform: Arc<dyn PlatformService>) -> Self {
        Self {
            platform,
            table: RetryStrategyTable::default(),
            method: MergeMethod::default(),
            active: ActiveSessions::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the strategy table
    #[must_use]
    pub fn with_table(mut self, table: RetryStrategyTable) -> Self {
        self.table = table;
        self
    }

    /// Replace the merge method
    #[must_use]
    pub const fn with_merge_method(mut self, method: MergeMethod) -> Self {
        self.method = method;
        self
    }

    /// The strategy table in effect
    pub const fn table(&self) -> &RetryStrategyTable {
        &self.table
    }

    /// The platform this engine talks to
    pub const fn platform(&self) -> &Arc<dyn PlatformService> {
        &self.platform
    }

    /// Whether a session is running for `pr`
    pub fn is_active(&self, pr: PrId) -> bool {
        self.active.is_active(pr)
    }

    /// Number of sessions currently running
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Reserve `pr` ahead of a session, for callers that do work (such as
    /// watching the PR) before merging; see [`merge_claimed`](Self::merge_claimed)
    pub fn try_claim(&self, pr: PrId) -> Result<SessionClaim> {
        self.active.try_claim(pr)
    }

    /// Cancel every running session at its next suspension point
    pub fn cancel_all(&self) {
        info!("cancelling all merge sessions");
        self.shutdown.cancel();
    }

    /// Merge `pr`, retrying per state until a terminal outcome.
    ///
    /// Returns `Err` only when the request is rejected up front (a session
    /// for this PR is already running). Every other failure is reported in
    /// the returned session's outcome.
    pub async fn merge_with_retry(
        &self,
        pr: PrId,
        overrides: Option<&StrategyOverrides>,
    ) -> Result<RetrySession> {
        self.merge_with_options(
            pr,
            MergeOptions {
                overrides: overrides.cloned(),
                ..MergeOptions::default()
            },
        )
        .await
    }

    /// [`merge_with_retry`](Self::merge_with_retry) with cancellation and
    /// progress reporting
    pub async fn merge_with_options(&self, pr: PrId, options: MergeOptions) -> Result<RetrySession> {
        let claim = self.active.try_claim(pr)?;
        Ok(self.merge_claimed(claim, options).await)
    }

    /// Run a session under a claim taken earlier with
    /// [`try_claim`](Self::try_claim); the claim is released when it ends
    pub async fn merge_claimed(&self, claim: SessionClaim, options: MergeOptions) -> RetrySession {
        let pr = claim.pr();
        let table = options
            .overrides
            .as_ref()
            .map_or_else(|| self.table.clone(), |o| self.table.merged(o));

        info!(%pr, method = %self.method, "starting merge session");
        let run = SessionRun {
            platform: self.platform.as_ref(),
            method: self.method,
            table,
            cancel: CancelScope {
                engine: self.shutdown.child_token(),
                caller: options.cancel,
            },
            progress: options.progress.as_ref(),
            session: RetrySession::new(pr),
            started: Instant::now(),
            unknown_streak: 0,
            merge_races: 0,
        };
        let session = run.run().await;
        drop(claim);
        session
    }
}

/// Engine-wide and caller-supplied cancellation, checked together
struct CancelScope {
    engine: CancellationToken,
    caller: Option<CancellationToken>,
}

impl CancelScope {
    fn is_cancelled(&self) -> bool {
        self.engine.is_cancelled() || self.caller.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    async fn cancelled(&self) {
        match &self.caller {
            Some(caller) => tokio::select! {
                () = self.engine.cancelled() => {}
                () = caller.cancelled() => {}
            },
            None => self.engine.cancelled().await,
        }
    }
}

/// What the wait phase of an iteration should do
enum Next {
    /// Loop again right away
    Recheck,
    /// Back off under the policy for this state
    Wait(MergeableState),
    /// Session is over
    Done(SessionOutcome),
}

/// One in-flight session; consumed by [`SessionRun::run`]
struct SessionRun<'a> {
    platform: &'a dyn PlatformService,
    method: MergeMethod,
    table: RetryStrategyTable,
    cancel: CancelScope,
    progress: &'a dyn ProgressCallback,
    session: RetrySession,
    started: Instant,
    /// Consecutive UNKNOWN observations or transient failures
    unknown_streak: u32,
    /// Consecutive merge rejections while CLEAN
    merge_races: u32,
}

impl SessionRun<'_> {
    async fn run(mut self) -> RetrySession {
        let pr = self.session.pr;
        loop {
            if self.cancel.is_cancelled() {
                return self.cancelled(None).await;
            }

            let (observed, transient) = match self.platform.get_mergeable_state(pr).await {
                Ok(state) => (state, false),
                Err(e) if e.is_transient() => {
                    warn!(%pr, error = %e, "transient error reading mergeable state");
                    (MergeableState::Unknown, true)
                }
                Err(e) => {
                    let outcome = self.fatal(MergeableState::Unknown, AttemptAction::Abort, &e).await;
                    return self.finish(outcome).await;
                }
            };

            let policy = self.table.lookup(observed);
            self.session.last_state = Some(observed);
            self.session.policy = Some(policy);
            if observed != MergeableState::Clean {
                self.merge_races = 0;
            }
            if !transient && observed != MergeableState::Unknown {
                self.unknown_streak = 0;
            }
            debug!(%pr, state = %observed, attempt = self.session.current_attempt(), "observed state");

            if self.cancel.is_cancelled() {
                return self.cancelled(Some(observed)).await;
            }

            let next = if policy.manual_intervention_required {
                self.manual(observed).await
            } else if transient {
                Next::Wait(MergeableState::Unknown)
            } else {
                match observed {
                    MergeableState::Clean => self.try_merge().await,
                    MergeableState::Behind
                        if policy.auto_update_branch && !self.session.branch_updated =>
                    {
                        self.try_update_branch().await
                    }
                    other => Next::Wait(other),
                }
            };

            match next {
                Next::Recheck => {}
                Next::Done(outcome) => return self.finish(outcome).await,
                Next::Wait(state) => {
                    if let Some(outcome) = self.wait(observed, state).await {
                        return self.finish(outcome).await;
                    }
                }
            }
        }
    }

    async fn manual(&mut self, observed: MergeableState) -> Next {
        let reason = if observed == MergeableState::Dirty {
            "merge conflict must be resolved by hand".to_string()
        } else {
            format!("policy for state '{observed}' requires manual intervention")
        };
        info!(pr = %self.session.pr, state = %observed, %reason, "session needs a human");
        self.record(
            observed,
            Duration::ZERO,
            AttemptAction::ManualIntervention,
            AttemptOutcome::Rejected(reason.clone()),
        )
        .await;
        Next::Done(SessionOutcome::NeedsHuman { reason })
    }

    async fn try_merge(&mut self) -> Next {
        let pr = self.session.pr;
        match self.platform.merge_pr(pr, self.method).await {
            Ok(result) if result.merged => {
                self.record(
                    MergeableState::Clean,
                    Duration::ZERO,
                    AttemptAction::Merge,
                    AttemptOutcome::Succeeded,
                )
                .await;
                Next::Done(SessionOutcome::Merged { sha: result.sha })
            }
            Ok(result) => {
                let reason = result
                    .message
                    .unwrap_or_else(|| "merge rejected by platform".to_string());
                self.merge_races += 1;
                warn!(%pr, races = self.merge_races, %reason, "merge rejected although state was clean");
                self.record(
                    MergeableState::Clean,
                    Duration::ZERO,
                    AttemptAction::Merge,
                    AttemptOutcome::Rejected(reason),
                )
                .await;
                if self.merge_races <= MAX_MERGE_RACES {
                    // State changed between read and merge; re-read for free
                    Next::Recheck
                } else {
                    Next::Wait(MergeableState::Clean)
                }
            }
            Err(e) if e.is_transient() => {
                warn!(%pr, error = %e, "transient error during merge");
                self.record(
                    MergeableState::Clean,
                    Duration::ZERO,
                    AttemptAction::Merge,
                    AttemptOutcome::Failed(e.to_string()),
                )
                .await;
                Next::Wait(MergeableState::Unknown)
            }
            Err(e) => Next::Done(self.fatal(MergeableState::Clean, AttemptAction::Merge, &e).await),
        }
    }

    async fn try_update_branch(&mut self) -> Next {
        let pr = self.session.pr;
        // One update per session, whatever happens
        self.session.branch_updated = true;
        match self.platform.update_branch_from_base(pr).await {
            Ok(update) if update.updated => {
                info!(%pr, "branch update requested");
                self.record(
                    MergeableState::Behind,
                    Duration::ZERO,
                    AttemptAction::UpdateBranch,
                    AttemptOutcome::Succeeded,
                )
                .await;
                Next::Recheck
            }
            Ok(update) => {
                let reason = update
                    .message
                    .unwrap_or_else(|| "branch update refused".to_string());
                warn!(%pr, %reason, "branch update refused");
                self.record(
                    MergeableState::Behind,
                    Duration::ZERO,
                    AttemptAction::UpdateBranch,
                    AttemptOutcome::Rejected(reason),
                )
                .await;
                Next::Wait(MergeableState::Behind)
            }
            Err(e) if e.is_transient() => {
                warn!(%pr, error = %e, "transient error during branch update");
                self.record(
                    MergeableState::Behind,
                    Duration::ZERO,
                    AttemptAction::UpdateBranch,
                    AttemptOutcome::Failed(e.to_string()),
                )
                .await;
                Next::Wait(MergeableState::Behind)
            }
            Err(e) => Next::Done(
                self.fatal(MergeableState::Behind, AttemptAction::UpdateBranch, &e)
                    .await,
            ),
        }
    }

    /// Back off under the policy for `state`; `None` means loop again.
    async fn wait(&mut self, observed: MergeableState, state: MergeableState) -> Option<SessionOutcome> {
        let pr = self.session.pr;
        let policy = self.table.lookup(state);

        // UNKNOWN (and transient failures) run on their own bounded streak
        // instead of the semantic retry budget.
        let delay_attempt = if state == MergeableState::Unknown {
            self.unknown_streak += 1;
            if self.unknown_streak > policy.max_retries {
                let reason = format!(
                    "state unavailable for {} consecutive checks",
                    self.unknown_streak
                );
                return Some(self.exhausted(observed, reason).await);
            }
            self.unknown_streak
        } else {
            self.unknown_streak = 0;
            if self.session.retries >= policy.max_retries {
                let reason = if state == MergeableState::Clean {
                    format!(
                        "merge rejected {} times although PR reported clean",
                        self.merge_races
                    )
                } else {
                    format!(
                        "retry budget of {} spent while PR was {state}",
                        policy.max_retries
                    )
                };
                return Some(self.exhausted(observed, reason).await);
            }
            self.session.retries + 1
        };

        let elapsed = self.started.elapsed();
        if elapsed >= policy.timeout {
            let reason = format!(
                "timed out after {} while PR was {state}",
                humantime::format_duration(round_secs(elapsed))
            );
            return Some(self.exhausted(observed, reason).await);
        }

        let delay = next_delay(&policy, delay_attempt).min(policy.timeout - elapsed);
        debug!(%pr, %state, attempt = delay_attempt, delay_ms = delay.as_millis(), "backing off");
        self.progress.on_wait(pr, state, delay).await;

        let cancelled = tokio::select! {
            () = tokio::time::sleep(delay) => false,
            () = self.cancel.cancelled() => true,
        };
        if cancelled {
            return Some(self.cancel_outcome(observed).await);
        }

        self.record(observed, delay, AttemptAction::Wait, AttemptOutcome::Retrying)
            .await;
        if state != MergeableState::Unknown {
            self.session.retries += 1;
        }
        None
    }

    async fn exhausted(&mut self, observed: MergeableState, reason: String) -> SessionOutcome {
        warn!(pr = %self.session.pr, %reason, "retry budget exhausted");
        self.record(
            observed,
            Duration::ZERO,
            AttemptAction::Abort,
            AttemptOutcome::Failed(reason.clone()),
        )
        .await;
        SessionOutcome::Exhausted { reason }
    }

    async fn fatal(
        &mut self,
        observed: MergeableState,
        action: AttemptAction,
        err: &Error,
    ) -> SessionOutcome {
        error!(pr = %self.session.pr, %action, error = %err, "fatal platform error");
        self.record(
            observed,
            Duration::ZERO,
            action,
            AttemptOutcome::Failed(err.to_string()),
        )
        .await;
        SessionOutcome::Error {
            message: err.to_string(),
        }
    }

    async fn cancel_outcome(&mut self, observed: MergeableState) -> SessionOutcome {
        info!(pr = %self.session.pr, "merge session cancelled");
        self.record(
            observed,
            Duration::ZERO,
            AttemptAction::Abort,
            AttemptOutcome::Failed("cancelled".to_string()),
        )
        .await;
        SessionOutcome::Cancelled
    }

    async fn cancelled(mut self, observed: Option<MergeableState>) -> RetrySession {
        let observed = observed
            .or(self.session.last_state)
            .unwrap_or(MergeableState::Unknown);
        let outcome = self.cancel_outcome(observed).await;
        self.finish(outcome).await
    }

    async fn record(
        &mut self,
        observed: MergeableState,
        delay: Duration,
        action: AttemptAction,
        outcome: AttemptOutcome,
    ) {
        let record = AttemptRecord {
            attempt_number: self.session.current_attempt(),
            observed_state: observed,
            delay,
            action,
            outcome,
            timestamp: Utc::now(),
            elapsed: self.started.elapsed(),
        };
        self.progress.on_attempt(self.session.pr, &record).await;
        self.session.attempts.push(record);
    }

    async fn finish(mut self, outcome: SessionOutcome) -> RetrySession {
        self.session.elapsed = self.started.elapsed();
        let pr = self.session.pr;
        let elapsed = humantime::format_duration(round_secs(self.session.elapsed));
        match &outcome {
            SessionOutcome::Merged { .. } => {
                info!(%pr, retries = self.session.retries, %elapsed, "merged");
            }
            SessionOutcome::Error { message } => {
                error!(%pr, %message, %elapsed, "merge session failed");
            }
            other => {
                info!(%pr, outcome = other.label(), %elapsed, "merge session finished");
            }
        }
        self.session.outcome = Some(outcome);
        self.progress.on_finished(&self.session).await;
        self.session
    }
}

fn round_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}
