//! UI-facing event sink with pre-attach buffering.
//!
//! The sink decouples "a query produced an event" from "the UI is
//! listening for it". Events dispatched before the consumer marks the sink
//! ready are held in a FIFO buffer and flushed, in order, the moment
//! readiness flips. This is what prevents early events from being lost
//! while the rendering side is still loading.

use crate::events::{GridContentEvent, QueryEvent};
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// The receiving half of a session's sink, handed to the UI consumer.
pub struct SinkSubscription {
    /// Query lifecycle events, in FIFO order.
    pub events: mpsc::UnboundedReceiver<QueryEvent>,
    /// Grid-content events (refresh/resize). Never buffered.
    pub grid_events: mpsc::UnboundedReceiver<GridContentEvent>,
}

/// Per-session event sink (the workbench's "data service").
pub struct EventSink {
    event_tx: mpsc::UnboundedSender<QueryEvent>,
    grid_tx: mpsc::UnboundedSender<GridContentEvent>,
    subscription: Option<SinkSubscription>,
    ready: bool,
    pending: VecDeque<QueryEvent>,
}

impl EventSink {
    /// Creates a sink with its subscription side still attached.
    pub fn new() -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (grid_tx, grid_events) = mpsc::unbounded_channel();
        Self {
            event_tx,
            grid_tx,
            subscription: Some(SinkSubscription {
                events,
                grid_events,
            }),
            ready: false,
            pending: VecDeque::new(),
        }
    }

    /// Takes the subscription half. Returns None if already taken.
    pub fn subscribe(&mut self) -> Option<SinkSubscription> {
        self.subscription.take()
    }

    /// Returns whether the UI consumer has announced readiness.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Number of events waiting for the sink to become ready.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Delivers an event to the consumer, or buffers it if the consumer
    /// has not announced readiness yet.
    pub fn dispatch(&mut self, event: QueryEvent) {
        if self.ready {
            // Receiver may have been dropped; delivery is best-effort
            let _ = self.event_tx.send(event);
        } else {
            self.pending.push_back(event);
        }
    }

    /// Flips readiness and flushes the pending buffer in FIFO order.
    pub fn mark_ready(&mut self) {
        self.ready = true;
        while let Some(event) = self.pending.pop_front() {
            let _ = self.event_tx.send(event);
        }
    }

    /// Forwards a grid-content event if the consumer is ready.
    ///
    /// With no grid attached there is no content to refresh or resize, so
    /// these are dropped rather than queued.
    pub fn send_grid_event(&self, event: GridContentEvent) {
        if self.ready {
            let _ = self.grid_tx.send(event);
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
