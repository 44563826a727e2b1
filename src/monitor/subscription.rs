//! One monitor subscription: a polling task plus the handle that controls it

use crate::monitor::events::{EventHandler, EventKind, EventRegistry, MonitorEvent, dispatch};
use crate::platform::PlatformService;
use crate::types::{CheckStatus, MergeableState, PrId};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// State shared between a handle and its polling task
struct Shared {
    id: u64,
    pr: PrId,
    poll_interval: Duration,
    registry: RwLock<EventRegistry>,
    cancel: CancellationToken,
    last_state: Mutex<Option<MergeableState>>,
    last_error: Mutex<Option<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Controls one running subscription
///
/// Cloning yields another handle to the same subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    shared: Arc<Shared>,
}

impl SubscriptionHandle {
    /// Spawn the polling task for `pr`
    pub(crate) fn spawn(
        id: u64,
        pr: PrId,
        poll_interval: Duration,
        registry: EventRegistry,
        platform: Arc<dyn PlatformService>,
    ) -> Self {
        let shared = Arc::new(Shared {
            id,
            pr,
            poll_interval,
            registry: RwLock::new(registry),
            cancel: CancellationToken::new(),
            last_state: Mutex::new(None),
            last_error: Mutex::new(None),
            task: Mutex::new(None),
        });
        let task = tokio::spawn(poll_loop(platform, Arc::clone(&shared)));
        *lock(&shared.task) = Some(task);
        Self { shared }
    }

    /// Subscription id, unique per monitor
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// PR being watched
    pub fn pr(&self) -> PrId {
        self.shared.pr
    }

    /// Time between polls
    pub fn poll_interval(&self) -> Duration {
        self.shared.poll_interval
    }

    /// State seen by the most recent successful poll
    pub fn last_known_state(&self) -> Option<MergeableState> {
        *lock(&self.shared.last_state)
    }

    /// Error that ended the subscription, if any
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }

    /// Whether the polling task is still running
    pub fn is_active(&self) -> bool {
        !self.shared.cancel.is_cancelled()
            && lock(&self.shared.task)
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }

    /// Add a handler; it sees events from the next poll on
    pub fn register_callback(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.shared
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(kind, handler);
    }

    /// Add an async closure as a handler
    pub fn on<F, Fut>(&self, kind: EventKind, f: F)
    where
        F: Fn(MonitorEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::error::Result<()>> + Send + 'static,
    {
        self.shared
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_fn(kind, f);
    }

    /// Stop polling. A poll already in flight finishes, but no callback fires
    /// after it.
    pub fn stop(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!(pr = %self.shared.pr, subscription = self.shared.id, "stopping monitor");
        }
        self.shared.cancel.cancel();
    }

    /// Resolves once the subscription is stopped, by a caller or by a fatal
    /// polling error
    pub async fn stopped(&self) {
        self.shared.cancel.cancelled().await;
    }

    /// Wait for the polling task to exit
    pub async fn join(&self) {
        let task = lock(&self.shared.task).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(pr = %self.shared.pr, error = %e, "monitor task ended abnormally");
        }
    }

    /// [`stop`](Self::stop), then [`join`](Self::join)
    pub async fn stop_and_wait(&self) {
        self.stop();
        self.join().await;
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.shared.id)
            .field("pr", &self.shared.pr)
            .field("poll_interval", &self.shared.poll_interval)
            .field("last_state", &self.last_known_state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Events produced by one poll, in firing order
pub fn transition_events(
    pr: PrId,
    old: Option<MergeableState>,
    new: MergeableState,
    checks_were_green: Option<bool>,
    checks: Option<CheckStatus>,
) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    if old != Some(new) {
        events.push(MonitorEvent::StateChange { pr, old, new });
        match new {
            MergeableState::Clean => events.push(MonitorEvent::MergeReady { pr }),
            MergeableState::Dirty => events.push(MonitorEvent::ConflictDetected { pr }),
            _ => {}
        }
    }
    if let Some(checks) = checks
        && checks.all_green()
        && checks_were_green != Some(true)
    {
        events.push(MonitorEvent::ChecksPassed { pr });
    }
    events
}

async fn poll_loop(platform: Arc<dyn PlatformService>, shared: Arc<Shared>) {
    let pr = shared.pr;
    let mut checks_green: Option<bool> = None;
    info!(%pr, subscription = shared.id, interval = ?shared.poll_interval, "monitor started");

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        match platform.get_mergeable_state(pr).await {
            Ok(state) => {
                // Check status is best effort; a failure just skips checks_passed
                let checks = match platform.get_check_status(pr).await {
                    Ok(checks) => Some(checks),
                    Err(e) => {
                        debug!(%pr, error = %e, "check status unavailable");
                        None
                    }
                };

                let old = lock(&shared.last_state).replace(state);
                let events = transition_events(pr, old, state, checks_green, checks);
                if let Some(checks) = checks {
                    checks_green = Some(checks.all_green());
                }

                for event in events {
                    if shared.cancel.is_cancelled() {
                        break;
                    }
                    debug!(%pr, %event, "monitor event");
                    let handlers = shared
                        .registry
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .handlers(event.kind());
                    for handler in handlers {
                        if shared.cancel.is_cancelled() {
                            break;
                        }
                        dispatch(handler.as_ref(), &event).await;
                    }
                }
            }
            Err(e) if e.is_transient() => {
                warn!(%pr, error = %e, "transient error while polling; will retry");
            }
            Err(e) => {
                error!(%pr, error = %e, "monitor stopped on fatal error");
                *lock(&shared.last_error) = Some(e.to_string());
                shared.cancel.cancel();
                break;
            }
        }

        tokio::select! {
            () = tokio::time::sleep(shared.poll_interval) => {}
            () = shared.cancel.cancelled() => break,
        }
    }
    info!(%pr, subscription = shared.id, "monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const PR: PrId = PrId::new(7);

    #[test]
    fn test_first_observation_fires_state_change() {
        let events = transition_events(PR, None, MergeableState::Unstable, None, None);
        assert_eq!(
            events,
            vec![MonitorEvent::StateChange {
                pr: PR,
                old: None,
                new: MergeableState::Unstable
            }]
        );
    }

    #[test]
    fn test_clean_transition_fires_merge_ready_after_state_change() {
        let events = transition_events(
            PR,
            Some(MergeableState::Unstable),
            MergeableState::Clean,
            None,
            None,
        );
        let kinds: Vec<EventKind> = events.iter().map(MonitorEvent::kind).collect();
        assert_eq!(kinds, vec![EventKind::StateChange, EventKind::MergeReady]);
    }

    #[test]
    fn test_dirty_transition_fires_conflict() {
        let events = transition_events(
            PR,
            Some(MergeableState::Behind),
            MergeableState::Dirty,
            None,
            None,
        );
        assert!(events.contains(&MonitorEvent::ConflictDetected { pr: PR }));
    }

    #[test]
    fn test_unchanged_state_fires_nothing() {
        let events = transition_events(
            PR,
            Some(MergeableState::Clean),
            MergeableState::Clean,
            Some(true),
            Some(CheckStatus {
                passed: true,
                pending: false,
            }),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_checks_flip_fires_even_without_state_change() {
        let green = CheckStatus {
            passed: true,
            pending: false,
        };
        let events = transition_events(
            PR,
            Some(MergeableState::Unstable),
            MergeableState::Unstable,
            Some(false),
            Some(green),
        );
        assert_eq!(events, vec![MonitorEvent::ChecksPassed { pr: PR }]);
    }
}
