//! Mock platform service for testing
//!
//! These are test utilities - not all may be used in every test binary.

#![allow(dead_code)]

use async_trait::async_trait;
use merge_retry::error::{Error, Result};
use merge_retry::platform::PlatformService;
use merge_retry::types::{
    BranchUpdate, CheckStatus, MergeMethod, MergeResult, MergeableState, PlatformConfig, PrId,
    PrSpec, PullRequest,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Reply<T> {
    /// Return this value
    Ok(T),
    /// Fail with a transient (network) error
    Transient(&'static str),
    /// Fail with a fatal (not found) error
    Fatal(&'static str),
}

impl<T: Clone> Reply<T> {
    fn into_result(self) -> Result<T> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Transient(msg) => Err(Error::Network(msg.to_string())),
            Self::Fatal(msg) => Err(Error::NotFound(msg.to_string())),
        }
    }
}

/// Per-PR reply queues; the last reply repeats forever
struct Script<T> {
    replies: Mutex<HashMap<u64, VecDeque<Reply<T>>>>,
}

impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, pr: u64, replies: Vec<Reply<T>>) {
        self.replies.lock().unwrap().insert(pr, replies.into());
    }

    fn next(&self, pr: u64) -> Option<Reply<T>> {
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(&pr)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

/// Call record for `create_pr`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePrCall {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: Option<String>,
}

/// Call record for `merge_pr`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePrCall {
    pub pr_number: u64,
    pub method: MergeMethod,
}

/// Decrements the in-flight counter on drop
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Simple mock platform service for testing
///
/// This manually implements `PlatformService` rather than using mockall,
/// so scripted sequences stay readable.
///
/// Features:
/// - Scripted per-PR replies for every call (last reply repeats)
/// - Defaults: CLEAN, green checks, merge succeeds, update succeeds
/// - Call tracking for verification
/// - Error injection (transient and fatal)
/// - Optional latency, with a high-water mark of concurrent calls
pub struct MockPlatformService {
    config: PlatformConfig,
    next_pr_number: AtomicU64,
    latency: Mutex<Duration>,
    // Scripts
    states: Script<MergeableState>,
    checks: Script<CheckStatus>,
    merges: Script<MergeResult>,
    updates: Script<BranchUpdate>,
    // Call tracking
    state_calls: Mutex<Vec<u64>>,
    check_calls: Mutex<Vec<u64>>,
    merge_calls: Mutex<Vec<MergePrCall>>,
    update_calls: Mutex<Vec<u64>>,
    create_pr_calls: Mutex<Vec<CreatePrCall>>,
    // Error injection
    error_on_create_pr: Mutex<Option<String>>,
    // Concurrency tracking
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockPlatformService {
    /// Create a new mock with a GitHub config
    pub fn new() -> Self {
        Self::with_config(super::github_config())
    }

    /// Create a new mock with the given config
    pub fn with_config(config: PlatformConfig) -> Self {
        Self {
            config,
            next_pr_number: AtomicU64::new(1),
            latency: Mutex::new(Duration::ZERO),
            states: Script::new(),
            checks: Script::new(),
            merges: Script::new(),
            updates: Script::new(),
            state_calls: Mutex::new(Vec::new()),
            check_calls: Mutex::new(Vec::new()),
            merge_calls: Mutex::new(Vec::new()),
            update_calls: Mutex::new(Vec::new()),
            create_pr_calls: Mutex::new(Vec::new()),
            error_on_create_pr: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    // === Scripting ===

    /// States returned by successive `get_mergeable_state` calls
    pub fn set_states(&self, pr: u64, states: &[MergeableState]) {
        self.states
            .set(pr, states.iter().copied().map(Reply::Ok).collect());
    }

    /// Raw replies for `get_mergeable_state`, including errors
    pub fn set_state_replies(&self, pr: u64, replies: Vec<Reply<MergeableState>>) {
        self.states.set(pr, replies);
    }

    /// Replies for `get_check_status`
    pub fn set_check_replies(&self, pr: u64, replies: Vec<Reply<CheckStatus>>) {
        self.checks.set(pr, replies);
    }

    /// Replies for `merge_pr`
    pub fn set_merge_replies(&self, pr: u64, replies: Vec<Reply<MergeResult>>) {
        self.merges.set(pr, replies);
    }

    /// Replies for `update_branch_from_base`
    pub fn set_update_replies(&self, pr: u64, replies: Vec<Reply<BranchUpdate>>) {
        self.updates.set(pr, replies);
    }

    /// Make `create_pr` return an error
    pub fn fail_create_pr(&self, msg: &str) {
        *self.error_on_create_pr.lock().unwrap() = Some(msg.to_string());
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    // === Call inspection ===

    pub fn state_calls(&self) -> Vec<u64> {
        self.state_calls.lock().unwrap().clone()
    }

    pub fn check_calls(&self) -> Vec<u64> {
        self.check_calls.lock().unwrap().clone()
    }

    pub fn merge_calls(&self) -> Vec<MergePrCall> {
        self.merge_calls.lock().unwrap().clone()
    }

    pub fn update_calls(&self) -> Vec<u64> {
        self.update_calls.lock().unwrap().clone()
    }

    pub fn create_pr_calls(&self) -> Vec<CreatePrCall> {
        self.create_pr_calls.lock().unwrap().clone()
    }

    /// Most calls that were ever in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        guard
    }
}

impl Default for MockPlatformService {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge result for a successful merge of `pr`
pub fn merged(pr: u64) -> MergeResult {
    MergeResult {
        merged: true,
        sha: Some(format!("sha-{pr}")),
        message: None,
    }
}

/// Merge result for a refused merge
pub fn rejected(message: &str) -> MergeResult {
    MergeResult {
        merged: false,
        sha: None,
        message: Some(message.to_string()),
    }
}

/// Check status helpers
pub const GREEN: CheckStatus = CheckStatus {
    passed: true,
    pending: false,
};
pub const PENDING: CheckStatus = CheckStatus {
    passed: false,
    pending: true,
};

#[async_trait]
impl PlatformService for MockPlatformService {
    async fn get_mergeable_state(&self, pr: PrId) -> Result<MergeableState> {
        let _guard = self.enter().await;
        self.state_calls.lock().unwrap().push(pr.number());
        self.states
            .next(pr.number())
            .map_or(Ok(MergeableState::Clean), Reply::into_result)
    }

    async fn get_check_status(&self, pr: PrId) -> Result<CheckStatus> {
        let _guard = self.enter().await;
        self.check_calls.lock().unwrap().push(pr.number());
        self.checks
            .next(pr.number())
            .map_or(Ok(GREEN), Reply::into_result)
    }

    async fn merge_pr(&self, pr: PrId, method: MergeMethod) -> Result<MergeResult> {
        let _guard = self.enter().await;
        self.merge_calls.lock().unwrap().push(MergePrCall {
            pr_number: pr.number(),
            method,
        });
        self.merges
            .next(pr.number())
            .map_or_else(|| Ok(merged(pr.number())), Reply::into_result)
    }

    async fn update_branch_from_base(&self, pr: PrId) -> Result<BranchUpdate> {
        let _guard = self.enter().await;
        self.update_calls.lock().unwrap().push(pr.number());
        self.updates.next(pr.number()).map_or(
            Ok(BranchUpdate {
                updated: true,
                message: None,
            }),
            Reply::into_result,
        )
    }

    async fn create_pr(&self, spec: &PrSpec) -> Result<PullRequest> {
        let _guard = self.enter().await;
        self.create_pr_calls.lock().unwrap().push(CreatePrCall {
            head: spec.head.clone(),
            base: spec.base.clone(),
            title: spec.title.clone(),
            body: spec.body.clone(),
        });

        if let Some(msg) = self.error_on_create_pr.lock().unwrap().as_ref() {
            return Err(Error::GitHubApi(msg.clone()));
        }

        let number = self.next_pr_number.fetch_add(1, Ordering::SeqCst);
        Ok(super::make_pr(number, &spec.head, &spec.title))
    }

    fn config(&self) -> &PlatformConfig {
        &self.config
    }
}
