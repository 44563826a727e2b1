//! Merge retry: strategy table, backoff, sessions, and the engine
//!
//! `strategy` and `backoff` are pure; `engine` is the only part that talks to
//! a platform.

pub mod backoff;
pub mod engine;
pub mod progress;
pub mod session;
pub mod strategy;

pub use backoff::{apply_jitter, backoff_delay, next_delay, total_budget};
pub use engine::{ActiveSessions, MergeOptions, SessionClaim, SmartMergeRetryEngine};
pub use progress::{NoopProgress, ProgressCallback};
pub use session::{AttemptAction, AttemptOutcome, AttemptRecord, RetrySession, SessionOutcome};
pub use strategy::{PolicyOverride, RetryPolicy, RetryStrategyTable, StrategyOverrides};
