/// Event dispatcher with an enabled/disabled gate
///
/// Listener registrations live behind an ArcSwap so listeners can be added or removed
/// while commands are dispatching, without locking.

use crate::error::{EngineError, EngineResult};
use crate::event::{EngineEvent, EngineEventType};
use arc_swap::ArcSwap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Receives engine events
pub trait EngineEventListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()>;

    /// When true, a listener error aborts the running command
    fn is_fail_on_exception(&self) -> bool {
        false
    }
}

struct Registration {
    listener: Arc<dyn EngineEventListener>,
    /// `None` receives every event type
    types: Option<Vec<EngineEventType>>,
}

impl Registration {
    fn accepts(&self, event_type: EngineEventType) -> bool {
        self.types.as_ref().map_or(true, |types| types.contains(&event_type))
    }
}

pub struct EventDispatcher {
    enabled: AtomicBool,
    listeners: ArcSwap<Vec<Arc<Registration>>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("enabled", &self.is_enabled())
            .field("listeners", &self.listeners.load().len())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            listeners: ArcSwap::new(Arc::new(Vec::new())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        tracing::info!("📣 Event dispatcher {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Register a listener for the given event types (`None` for all)
    pub fn add_event_listener(&self, listener: Arc<dyn EngineEventListener>, types: Option<Vec<EngineEventType>>) {
        let registration = Arc::new(Registration { listener, types });
        self.listeners.rcu(|current| {
            let mut next = (**current).clone();
            next.push(Arc::clone(&registration));
            next
        });
    }

    pub fn remove_event_listener(&self, listener: &Arc<dyn EngineEventListener>) {
        self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|registration| !Arc::ptr_eq(&registration.listener, listener))
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    /// Deliver an event to every interested listener
    ///
    /// Events are dropped while the dispatcher is disabled. Listener errors are logged
    /// unless the listener is fail-on-exception, in which case they propagate.
    pub fn dispatch(&self, event: &EngineEvent) -> EngineResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let listeners = self.listeners.load();
        for registration in listeners.iter().filter(|r| r.accepts(event.event_type)) {
            if let Err(e) = registration.listener.on_event(event) {
                if registration.listener.is_fail_on_exception() {
                    tracing::error!("❌ Event listener failed on {:?}: {}", event.event_type, e);
                    return Err(EngineError::Other(e));
                }
                tracing::warn!("⚠️ Event listener failed on {:?} (ignored): {}", event.event_type, e);
            }
        }
        Ok(())
    }
}
