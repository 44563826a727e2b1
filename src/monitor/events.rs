//! Typed monitor events and the per-subscription handler registry

use crate::error::{Error, Result};
use crate::types::{MergeableState, PrId};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Name of an event a handler can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Mergeable state changed (including the first observation)
    StateChange,
    /// State became CLEAN
    MergeReady,
    /// State became DIRTY
    ConflictDetected,
    /// Check status flipped to all green
    ChecksPassed,
}

impl EventKind {
    /// All event kinds
    pub const ALL: [Self; 4] = [
        Self::StateChange,
        Self::MergeReady,
        Self::ConflictDetected,
        Self::ChecksPassed,
    ];

    /// Wire name (`state_change`, `merge_ready`, ...)
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StateChange => "state_change",
            Self::MergeReady => "merge_ready",
            Self::ConflictDetected => "conflict_detected",
            Self::ChecksPassed => "checks_passed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown event name: {s}")))
    }
}

/// Event delivered to handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// State changed from `old` (none on the first poll) to `new`
    StateChange {
        /// PR observed
        pr: PrId,
        /// Previous state
        old: Option<MergeableState>,
        /// Current state
        new: MergeableState,
    },
    /// PR became CLEAN
    MergeReady {
        /// PR observed
        pr: PrId,
    },
    /// PR became DIRTY
    ConflictDetected {
        /// PR observed
        pr: PrId,
    },
    /// Checks became all green
    ChecksPassed {
        /// PR observed
        pr: PrId,
    },
}

impl MonitorEvent {
    /// Which handlers this event goes to
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StateChange { .. } => EventKind::StateChange,
            Self::MergeReady { .. } => EventKind::MergeReady,
            Self::ConflictDetected { .. } => EventKind::ConflictDetected,
            Self::ChecksPassed { .. } => EventKind::ChecksPassed,
        }
    }

    /// PR the event is about
    pub const fn pr(&self) -> PrId {
        match self {
            Self::StateChange { pr, .. }
            | Self::MergeReady { pr }
            | Self::ConflictDetected { pr }
            | Self::ChecksPassed { pr } => *pr,
        }
    }
}

impl std::fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateChange {
                pr,
                old: Some(old),
                new,
            } => write!(f, "{pr}: {old} -> {new}"),
            Self::StateChange { pr, old: None, new } => write!(f, "{pr}: {new}"),
            Self::MergeReady { pr } => write!(f, "{pr}: ready to merge"),
            Self::ConflictDetected { pr } => write!(f, "{pr}: conflict detected"),
            Self::ChecksPassed { pr } => write!(f, "{pr}: checks passed"),
        }
    }
}

/// Something that reacts to monitor events
///
/// Returning `Err` (or panicking) is logged and does not affect other
/// handlers or the polling loop.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event
    async fn handle(&self, event: &MonitorEvent) -> Result<()>;
}

type BoxedHandlerFn =
    dyn Fn(MonitorEvent) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync;

/// Adapts an async closure into an [`EventHandler`]
pub struct FnHandler {
    f: Box<BoxedHandlerFn>,
}

impl FnHandler {
    /// Wrap `f`; it receives an owned copy of each event
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(MonitorEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            f: Box::new(move |event| Box::pin(f(event))),
        }
    }
}

#[async_trait]
impl EventHandler for FnHandler {
    async fn handle(&self, event: &MonitorEvent) -> Result<()> {
        (self.f)(event.clone()).await
    }
}

/// Handlers keyed by event kind, kept in registration order
#[derive(Default, Clone)]
pub struct EventRegistry {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `kind`
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Append an async closure for `kind`
    pub fn register_fn<F, Fut>(&mut self, kind: EventKind, f: F)
    where
        F: Fn(MonitorEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(kind, Arc::new(FnHandler::new(f)));
    }

    /// Handlers for `kind`, in registration order
    pub fn handlers(&self, kind: EventKind) -> Vec<Arc<dyn EventHandler>> {
        self.handlers.get(&kind).cloned().unwrap_or_default()
    }

    /// Number of handlers registered for `kind`
    pub fn len(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Whether no handler is registered at all
    pub fn is_empty(&self) -> bool {
        self.handlers.values().all(Vec::is_empty)
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            map.entry(&kind.as_str(), &self.len(kind));
        }
        map.finish()
    }
}

/// Run one handler, isolating errors and panics.
///
/// Returns whether the handler completed successfully.
pub async fn dispatch(handler: &dyn EventHandler, event: &MonitorEvent) -> bool {
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(pr = %event.pr(), event = %event.kind(), error = %e, "event handler failed");
            false
        }
        Err(_) => {
            warn!(pr = %event.pr(), event = %event.kind(), "event handler panicked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_event_kind_round_trips_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("merged".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_event_kind_and_pr() {
        let event = MonitorEvent::StateChange {
            pr: PrId::new(9),
            old: Some(MergeableState::Unstable),
            new: MergeableState::Clean,
        };
        assert_eq!(event.kind(), EventKind::StateChange);
        assert_eq!(event.pr(), PrId::new(9));
        assert_eq!(event.to_string(), "#9: unstable -> clean");
    }

    #[tokio::test]
    async fn test_registry_keeps_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = EventRegistry::new();
        for label in ["first", "second"] {
            let seen = Arc::clone(&seen);
            registry.register_fn(EventKind::MergeReady, move |_| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(label);
                    Ok(())
                }
            });
        }

        let event = MonitorEvent::MergeReady { pr: PrId::new(1) };
        for handler in registry.handlers(EventKind::MergeReady) {
            assert!(dispatch(handler.as_ref(), &event).await);
        }
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(registry.len(EventKind::StateChange), 0);
    }

    struct Panicking;

    #[async_trait]
    impl EventHandler for Panicking {
        async fn handle(&self, _event: &MonitorEvent) -> Result<()> {
            panic!("handler bug")
        }
    }

    #[tokio::test]
    async fn test_dispatch_isolates_errors_and_panics() {
        let failing =
            FnHandler::new(|_| async { Err::<(), _>(Error::Internal("boom".to_string())) });
        let event = MonitorEvent::ChecksPassed { pr: PrId::new(2) };

        assert!(!dispatch(&failing, &event).await);
        assert!(!dispatch(&Panicking, &event).await);
    }
}
