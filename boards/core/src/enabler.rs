//! Atomic enabled/disabled state with change notification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Called whenever an [`Enabler`] actually flips state
pub type StateChangeNotifier = Arc<dyn Fn() + Send + Sync>;

/// Enabled flag shared between the render loop and status handlers.
///
/// Transitions use compare-and-swap, so the notifier only fires on a real
/// state flip and never for a redundant call.
pub struct Enabler {
    enabled: AtomicBool,
    notifier: RwLock<Option<StateChangeNotifier>>,
}

impl Enabler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            notifier: RwLock::new(None),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns true if the state changed
    pub fn enable(&self) -> bool {
        self.store(true)
    }

    /// Returns true if the state changed
    pub fn disable(&self) -> bool {
        self.store(false)
    }

    /// Set the state, returning true if it changed
    pub fn store(&self, enabled: bool) -> bool {
        let changed = self
            .enabled
            .compare_exchange(!enabled, enabled, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if changed {
            self.notify();
        }
        changed
    }

    pub fn set_state_change_notifier(&self, notifier: StateChangeNotifier) {
        if let Ok(mut slot) = self.notifier.write() {
            *slot = Some(notifier);
        }
    }

    fn notify(&self) {
        let notifier = self.notifier.read().ok().and_then(|n| n.clone());
        if let Some(notifier) = notifier {
            notifier();
        }
    }
}

impl Default for Enabler {
    fn default() -> Self {
        Self::new(false)
    }
}

impl std::fmt::Debug for Enabler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enabler")
            .field("enabled", &self.enabled())
            .finish()
    }
}
