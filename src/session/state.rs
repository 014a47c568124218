//! Atomic execution-state machine for a session.
//!
//! A session is Idle, Executing, or Cancelling. All transitions are
//! compare-and-swap, so a cancel request and an in-flight completion can
//! race without the check-then-act window a plain flag would have: whoever
//! wins the CAS owns the transition, the loser observes the new state.

use std::sync::atomic::{AtomicU8, Ordering};

/// Observable phase of a session's execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No execution in flight.
    Idle,
    /// A query or edit initialization is running.
    Executing,
    /// Cancellation was requested and is pending acknowledgement.
    Cancelling,
}

const IDLE: u8 = 0;
const EXECUTING: u8 = 1;
const CANCELLING: u8 = 2;

/// Lock-free {Idle, Executing, Cancelling} state machine.
#[derive(Debug)]
pub struct ExecutionState {
    phase: AtomicU8,
}

impl ExecutionState {
    /// Creates a new state machine in the Idle phase.
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(IDLE),
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> SessionPhase {
        match self.phase.load(Ordering::Acquire) {
            EXECUTING => SessionPhase::Executing,
            CANCELLING => SessionPhase::Cancelling,
            _ => SessionPhase::Idle,
        }
    }

    /// Returns true while an execution or cancellation is in flight.
    pub fn is_busy(&self) -> bool {
        self.phase.load(Ordering::Acquire) != IDLE
    }

    /// Attempts the Idle -> Executing transition.
    ///
    /// Returns false if the session is already busy; the caller must not
    /// start a second execution in that case.
    pub fn try_begin_execute(&self) -> bool {
        self.phase
            .compare_exchange(IDLE, EXECUTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Attempts the Executing -> Cancelling transition.
    ///
    /// Returns false if there is nothing to cancel (Idle) or a cancel is
    /// already pending (Cancelling).
    pub fn try_begin_cancel(&self) -> bool {
        self.phase
            .compare_exchange(EXECUTING, CANCELLING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks the execution finished, from whichever busy phase it was in.
    ///
    /// Returns the phase that was current when the execution finished, so
    /// callers can tell a cancelled completion from a natural one.
    pub fn finish(&self) -> SessionPhase {
        match self.phase.swap(IDLE, Ordering::AcqRel) {
            EXECUTING => SessionPhase::Executing,
            CANCELLING => SessionPhase::Cancelling,
            _ => SessionPhase::Idle,
        }
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}
