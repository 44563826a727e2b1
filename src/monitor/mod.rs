//! PR state monitor - polls PRs and fans state transitions out to handlers
//!
//! Each subscription is an independent task with its own registry and last
//! known state; subscriptions never share mutable state.

pub mod events;
pub mod subscription;

pub use events::{EventHandler, EventKind, EventRegistry, FnHandler, MonitorEvent};
pub use subscription::{SubscriptionHandle, transition_events};

use crate::platform::PlatformService;
use crate::types::PrId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Poll interval used when the caller does not pick one
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Starts and stops polling subscriptions against one platform
pub struct PrStateMonitor {
    platform: Arc<dyn PlatformService>,
    default_poll_interval: Duration,
    next_id: AtomicU64,
}

impl PrStateMonitor {
    /// Monitor with the 30s default poll interval
    pub fn new(platform: Arc<dyn PlatformService>) -> Self {
        Self {
            platform,
            default_poll_interval: DEFAULT_POLL_INTERVAL,
            next_id: AtomicU64::new(1),
        }
    }

    /// Replace the default poll interval (zero keeps the current one)
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.default_poll_interval = interval;
        }
        self
    }

    /// Default poll interval
    pub const fn default_poll_interval(&self) -> Duration {
        self.default_poll_interval
    }

    /// Start polling `pr`.
    ///
    /// Handlers in `registry` see every event from the first poll on; more
    /// can be added through the returned handle. `None` (or zero) uses the
    /// default interval.
    pub fn start_monitoring(
        &self,
        pr: PrId,
        poll_interval: Option<Duration>,
        registry: EventRegistry,
    ) -> SubscriptionHandle {
        let interval = poll_interval
            .filter(|d| !d.is_zero())
            .unwrap_or(self.default_poll_interval);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        SubscriptionHandle::spawn(id, pr, interval, registry, Arc::clone(&self.platform))
    }

    /// Stop a subscription; no callback fires once its in-flight poll ends
    pub fn stop_monitoring(&self, handle: &SubscriptionHandle) {
        handle.stop();
    }
}
