//! merge-retry - smart merge retries and PR state monitoring
//!
//! Decides if, when, and how to retry merging a pull request whose
//! mergeability is computed by GitHub or GitLab, without hammering the API and
//! without retrying states that need a human.
//!
//! - [`retry`]: per-state retry policies, backoff, and the retry engine
//! - [`monitor`]: polling subscriptions with typed event callbacks
//! - [`orchestrator`]: facade for create+merge, batches, and diagnostics
//! - [`platform`]: GitHub/GitLab clients behind [`platform::PlatformService`]

pub mod config;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod platform;
pub mod retry;
pub mod types;

pub use error::{Error, Result};
pub use monitor::{EventKind, EventRegistry, MonitorEvent, PrStateMonitor, SubscriptionHandle};
pub use orchestrator::{
    BatchOptions, MergeExistingOptions, MergeOrchestrator, MonitorSet, RetryRecommendation,
};
pub use platform::PlatformService;
pub use retry::{
    MergeOptions, RetryPolicy, RetrySession, RetryStrategyTable, SessionOutcome,
    SmartMergeRetryEngine,
};
pub use types::{MergeMethod, MergeableState, PrId};
