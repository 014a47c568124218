//! Shared helpers for the integration tests.

use querymux::events::{Notice, QueryEvent};
use querymux::session::SinkSubscription;
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(2);

/// Receives the next sink event, failing the test on timeout.
pub async fn next_event(subscription: &mut SinkSubscription) -> QueryEvent {
    tokio::time::timeout(WAIT, subscription.events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Receives sink events until one matches, failing the test on timeout.
pub async fn next_matching(
    subscription: &mut SinkSubscription,
    matches: impl Fn(&QueryEvent) -> bool,
) -> QueryEvent {
    loop {
        let event = next_event(subscription).await;
        if matches(&event) {
            return event;
        }
    }
}

/// Drives the subscription until the run completes, returning every event
/// seen on the way (the completion included).
pub async fn events_until_complete(subscription: &mut SinkSubscription) -> Vec<QueryEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(subscription).await;
        let done = matches!(event, QueryEvent::Completed { .. });
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Receives the next broadcast notice, failing the test on timeout.
pub async fn next_notice(notices: &mut broadcast::Receiver<Notice>) -> Notice {
    tokio::time::timeout(WAIT, notices.recv())
        .await
        .expect("timed out waiting for notice")
        .expect("notice channel closed")
}
