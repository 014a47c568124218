//! Session registry and event relay.
//!
//! A session is the per-editor-tab bookkeeping record for one SQL
//! execution/edit lifecycle. The `SessionManager` owns the session table,
//! routes run/cancel/edit commands to each session's runner, and relays
//! runner events to the UI sink, buffering them until the sink is ready.

mod manager;
mod sink;
mod state;

pub use manager::{CancelOutcome, SessionManager};
pub use sink::{EventSink, SinkSubscription};
pub use state::{ExecutionState, SessionPhase};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle addressing one session in the registry.
///
/// Sessions are addressed by handle rather than by the free-form document
/// URI, and live from `open_session` to `close_session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocates the next unique session id.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Builds a session id from a raw value. Intended for tests and
    /// deserialized handles; the registry only hands out `next()` ids.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the inner u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}
