//! Progress reporting for retry sessions

use crate::retry::session::{AttemptRecord, RetrySession};
use crate::types::{MergeableState, PrId};
use async_trait::async_trait;
use std::time::Duration;

/// Receives session events as they happen
///
/// Every method has a no-op default so implementors only override what they
/// render.
#[async_trait]
pub trait ProgressCallback: Send + Sync {
    /// A step was appended to the session history
    async fn on_attempt(&self, _pr: PrId, _record: &AttemptRecord) {}

    /// The engine is about to sleep before re-checking
    async fn on_wait(&self, _pr: PrId, _state: MergeableState, _delay: Duration) {}

    /// The session reached a terminal outcome
    async fn on_finished(&self, _session: &RetrySession) {}
}

/// Progress callback that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressCallback for NoopProgress {}
