//! Extension Lifecycle State Machine
//!
//! Tracks one extension's progress through configure, init, start, stop and
//! deinit. Done signals must arrive in order; anything else is rejected
//! without changing state.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of an extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LifecycleState {
    /// Created, `on_configure` pending or running
    Unconfigured = 0,
    Configured = 1,
    Initialized = 2,
    /// Message handlers may run
    Started = 3,
    /// `on_stop` invoked, waiting for stop-done
    Stopping = 4,
    /// Stop done (or timed out), deinit pending
    Stopped = 5,
    Deinitialized = 6,
}

impl LifecycleState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Unconfigured,
            1 => Self::Configured,
            2 => Self::Initialized,
            3 => Self::Started,
            4 => Self::Stopping,
            5 => Self::Stopped,
            _ => Self::Deinitialized,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == LifecycleState::Deinitialized
    }

    pub fn is_started(&self) -> bool {
        *self == LifecycleState::Started
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Unconfigured => write!(f, "unconfigured"),
            LifecycleState::Configured => write!(f, "configured"),
            LifecycleState::Initialized => write!(f, "initialized"),
            LifecycleState::Started => write!(f, "started"),
            LifecycleState::Stopping => write!(f, "stopping"),
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Deinitialized => write!(f, "deinitialized"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle Signal
// ─────────────────────────────────────────────────────────────────────────────

/// Done signal sent by an extension when a lifecycle phase finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    ConfigureDone,
    InitDone,
    StartDone,
    StopDone,
    DeinitDone,
}

impl LifecycleSignal {
    /// (required state, resulting state)
    fn transition(self) -> (LifecycleState, LifecycleState) {
        use LifecycleState::*;
        match self {
            LifecycleSignal::ConfigureDone => (Unconfigured, Configured),
            LifecycleSignal::InitDone => (Configured, Initialized),
            LifecycleSignal::StartDone => (Initialized, Started),
            LifecycleSignal::StopDone => (Stopping, Stopped),
            LifecycleSignal::DeinitDone => (Stopped, Deinitialized),
        }
    }
}

impl std::fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleSignal::ConfigureDone => write!(f, "configure_done"),
            LifecycleSignal::InitDone => write!(f, "init_done"),
            LifecycleSignal::StartDone => write!(f, "start_done"),
            LifecycleSignal::StopDone => write!(f, "stop_done"),
            LifecycleSignal::DeinitDone => write!(f, "deinit_done"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle Tracker
// ─────────────────────────────────────────────────────────────────────────────

/// Lock-free lifecycle state holder
#[derive(Debug)]
pub struct LifecycleTracker {
    state: AtomicU8,
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Unconfigured as u8),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Apply a done signal. Rejected unless the state is the one it closes.
    pub fn complete(&self, signal: LifecycleSignal) -> BridgeResult<LifecycleState> {
        let (from, to) = signal.transition();
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| to)
            .map_err(|actual| BridgeError::InvalidLifecycleTransition {
                from: LifecycleState::from_u8(actual),
                signal,
            })
    }

    /// Enter `Stopping` from any state before it. Returns false if stop already began.
    pub fn begin_stop(&self) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                (s < LifecycleState::Stopping as u8).then_some(LifecycleState::Stopping as u8)
            })
            .is_ok()
    }

    /// Move `Stopping` to `Stopped` without a stop-done signal (stop timeout).
    pub fn force_stopped(&self) -> bool {
        self.state
            .compare_exchange(
                LifecycleState::Stopping as u8,
                LifecycleState::Stopped as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sequence() {
        let tracker = LifecycleTracker::new();
        assert_eq!(
            tracker.complete(LifecycleSignal::ConfigureDone).unwrap(),
            LifecycleState::Configured
        );
        tracker.complete(LifecycleSignal::InitDone).unwrap();
        tracker.complete(LifecycleSignal::StartDone).unwrap();
        assert!(tracker.state().is_started());

        assert!(tracker.begin_stop());
        assert!(!tracker.begin_stop());
        tracker.complete(LifecycleSignal::StopDone).unwrap();
        tracker.complete(LifecycleSignal::DeinitDone).unwrap();
        assert!(tracker.state().is_terminal());
    }

    #[test]
    fn test_out_of_order_rejected() {
        let tracker = LifecycleTracker::new();
        let err = tracker.complete(LifecycleSignal::StartDone).unwrap_err();
        assert_eq!(
            err,
            BridgeError::InvalidLifecycleTransition {
                from: LifecycleState::Unconfigured,
                signal: LifecycleSignal::StartDone,
            }
        );
        assert_eq!(tracker.state(), LifecycleState::Unconfigured);
    }

    #[test]
    fn test_repeated_signal_rejected() {
        let tracker = LifecycleTracker::new();
        tracker.complete(LifecycleSignal::ConfigureDone).unwrap();
        assert!(tracker.complete(LifecycleSignal::ConfigureDone).is_err());
        assert_eq!(tracker.state(), LifecycleState::Configured);
    }

    #[test]
    fn test_stop_before_start() {
        let tracker = LifecycleTracker::new();
        tracker.complete(LifecycleSignal::ConfigureDone).unwrap();
        assert!(tracker.begin_stop());
        assert!(tracker.complete(LifecycleSignal::InitDone).is_err());
        assert!(tracker.force_stopped());
        assert!(!tracker.force_stopped());
        tracker.complete(LifecycleSignal::DeinitDone).unwrap();
    }

    #[test]
    fn test_state_round_trip() {
        for v in 0..=6u8 {
            assert_eq!(LifecycleState::from_u8(v) as u8, v);
        }
    }
}
