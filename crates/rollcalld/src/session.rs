//! Kiosk capture state machine.
//!
//! ```text
//! Starting -> Ready -> Capturing -> Processing -> Matching -> Showing -> Ready
//! ```
//!
//! Any state may move to `Faulted`. A failed capture returns to `Ready`.

use serde::Serialize;
use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KioskState {
    Starting,
    Ready,
    /// Waiting for a face to appear in front of the camera.
    Capturing,
    /// Checking the captured embedding.
    Processing,
    /// Scanning the gallery and writing the outcome.
    Matching,
    /// Holding the last result on screen.
    Showing,
    Faulted,
}

impl KioskState {
    pub fn can_transition_to(self, next: KioskState) -> bool {
        use KioskState::*;
        matches!(
            (self, next),
            (_, Faulted)
                | (Starting, Ready)
                | (Ready, Capturing)
                | (Capturing, Processing)
                | (Processing, Matching)
                | (Processing, Showing)
                | (Matching, Showing)
                | (Capturing | Processing | Matching, Ready)
                | (Showing, Ready)
        )
    }
}

impl fmt::Display for KioskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KioskState::Starting => "starting",
            KioskState::Ready => "ready",
            KioskState::Capturing => "capturing",
            KioskState::Processing => "processing",
            KioskState::Matching => "matching",
            KioskState::Showing => "showing",
            KioskState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Owns the current state and publishes every change.
pub struct StateTracker {
    tx: watch::Sender<KioskState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(KioskState::Starting);
        Self { tx }
    }

    pub fn current(&self) -> KioskState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<KioskState> {
        self.tx.subscribe()
    }

    /// Atomically claim the camera: `Ready -> Capturing`. False if another
    /// capture holds it or the kiosk is not ready.
    pub fn try_begin(&self) -> bool {
        let claimed = self.tx.send_if_modified(|state| {
            if *state == KioskState::Ready {
                *state = KioskState::Capturing;
                true
            } else {
                false
            }
        });
        if claimed {
            tracing::debug!(from = %KioskState::Ready, to = %KioskState::Capturing, "kiosk state");
        }
        claimed
    }

    /// Move to `next`. Invalid transitions are logged and ignored.
    pub fn transition(&self, next: KioskState) -> bool {
        let mut from = None;
        let changed = self.tx.send_if_modified(|state| {
            if *state != next && state.can_transition_to(next) {
                from = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });
        match from {
            Some(from) if next == KioskState::Faulted => {
                tracing::error!(%from, to = %next, "kiosk state");
            }
            Some(from) => tracing::debug!(%from, to = %next, "kiosk state"),
            None => {
                tracing::warn!(current = %self.current(), requested = %next, "rejected state transition");
            }
        }
        changed
    }
}
