//! Tab-visibility protection
//!
//! A single state machine is the source of truth for whether teardown is
//! suppressed. Hiding the tab or blurring the window protects immediately;
//! protection lifts only after a continuous grace period of visibility, and
//! a hide within the recent-hide window keeps the session protected even if
//! the formal state has already flipped. `force_allow_action` is the one
//! legitimate override and belongs to deliberate user actions only.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Whether destructive teardown is currently suppressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionState {
    /// Teardown suppressed; pause-only cleanup applies
    Protected,
    /// Teardown may proceed
    Unprotected,
}

/// The protection state machine for one session
pub struct VisibilityGuard {
    state: parking_lot::Mutex<ProtectionState>,
    last_hidden_at: parking_lot::Mutex<Option<Instant>>,
    grace: Duration,
    recent_hide_window: Duration,
    /// Bumped by every transition request; a pending grace timer only fires
    /// if the epoch it captured is still current
    epoch: AtomicU64,
    hidden: AtomicBool,
    weak: Weak<Self>,
}

impl VisibilityGuard {
    /// Create a guard in the initial `Unprotected` state
    pub fn new(grace: Duration, recent_hide_window: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            state: parking_lot::Mutex::new(ProtectionState::Unprotected),
            last_hidden_at: parking_lot::Mutex::new(None),
            grace,
            recent_hide_window,
            epoch: AtomicU64::new(0),
            hidden: AtomicBool::new(false),
            weak: weak.clone(),
        })
    }

    /// The tab became hidden: protect immediately
    pub fn tab_hidden(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.hidden.store(true, Ordering::SeqCst);
        *self.last_hidden_at.lock() = Some(Instant::now());
        let mut state = self.state.lock();
        if *state != ProtectionState::Protected {
            debug!("tab hidden, protection activated");
            *state = ProtectionState::Protected;
        }
    }

    /// The window lost focus: same transition as a hide
    pub fn window_blurred(&self) {
        self.tab_hidden();
    }

    /// The tab became visible and focused again.
    ///
    /// Starts the cancellable grace timer; another hide before it fires
    /// restarts the countdown.
    pub fn tab_visible(&self) {
        self.hidden.store(false, Ordering::SeqCst);
        let observed = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = self.weak.clone();
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(guard) = weak.upgrade() else {
                return;
            };
            if guard.epoch.load(Ordering::SeqCst) == observed {
                let mut state = guard.state.lock();
                if *state != ProtectionState::Unprotected {
                    debug!("grace period elapsed, protection lifted");
                    *state = ProtectionState::Unprotected;
                }
            }
        });
    }

    /// Deliberate user action: force `Unprotected` immediately, cancelling
    /// any pending grace timer and the recent-hide suppression.
    pub fn force_allow_action(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.hidden.store(false, Ordering::SeqCst);
        *self.last_hidden_at.lock() = None;
        let mut state = self.state.lock();
        if *state != ProtectionState::Unprotected {
            info!("protection overridden by explicit user action");
        }
        *state = ProtectionState::Unprotected;
    }

    /// The formal state machine state
    pub fn state(&self) -> ProtectionState {
        *self.state.lock()
    }

    /// Whether the tab is currently hidden (used to shorten the heartbeat
    /// cadence, not to gate teardown)
    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::SeqCst)
    }

    /// The single protected predicate every teardown path consults.
    ///
    /// True while the formal state is `Protected`, and independently for
    /// the recent-hide window after the last hide event.
    pub fn is_protected(&self) -> bool {
        if *self.state.lock() == ProtectionState::Protected {
            return true;
        }
        self.last_hidden_at
            .lock()
            .is_some_and(|hidden_at| hidden_at.elapsed() < self.recent_hide_window)
    }
}
