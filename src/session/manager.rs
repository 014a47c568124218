//! Session registry and command router.
//!
//! The manager owns the session table and is the single entry point the
//! frontend talks to: open and close sessions, start and cancel runs, page
//! rows, drive edit sessions. Runner events come back on a channel per run
//! and are relayed into the session's sink; notices that concern listeners
//! outside any one sink go out on a broadcast channel.

use super::sink::{EventSink, SinkSubscription};
use super::state::{ExecutionState, SessionPhase};
use super::SessionId;
use crate::error::{QueryMuxError, Result};
use crate::events::{
    BatchSummary, GridContentEvent, Notice, QueryEvent, QueryMessage, ResultSetSubset, RowPage,
    Selection,
};
use crate::runner::{
    CellUpdateOutcome, EditSubset, EditTarget, QueryInput, QueryRunner, RowCreateOutcome,
    RunSpec, RunnerEvent,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest query snippet echoed back in a batch-start message.
const SNIPPET_MAX_CHARS: usize = 100;

/// Capacity of the notice broadcast channel.
const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Result of a cancel request.
///
/// Cancelling an idle session is a legitimate no-op, not an error, so it
/// gets its own outcome instead of being folded into success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The in-flight execution was asked to stop.
    Requested,
    /// The session had nothing running.
    NotRunning,
}

/// Per-session bookkeeping record.
struct Session {
    label: String,
    runner: Arc<dyn QueryRunner>,
    state: Arc<ExecutionState>,
    sink: EventSink,
    /// Selections of the batches seen in the most recent run.
    selections: Vec<Selection>,
    /// Snippet echoed in batch-start messages for ad-hoc text runs.
    snippet: Option<String>,
    cancel: CancellationToken,
}

/// Registry of sessions and router for their commands and events.
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, Session>>,
    notices: broadcast::Sender<Notice>,
}

impl SessionManager {
    /// Creates an empty manager.
    pub fn new() -> Arc<Self> {
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            notices,
        })
    }

    /// Opens a session backed by the given runner and returns its handle.
    pub fn open_session(&self, label: impl Into<String>, runner: Arc<dyn QueryRunner>) -> SessionId {
        let id = SessionId::next();
        let label = label.into();
        debug!(session = %id, label = %label, "opening session");
        self.sessions.lock().expect("sessions lock").insert(
            id,
            Session {
                label,
                runner,
                state: Arc::new(ExecutionState::new()),
                sink: EventSink::new(),
                selections: Vec::new(),
                snippet: None,
                cancel: CancellationToken::new(),
            },
        );
        id
    }

    /// Closes a session, cancelling outstanding work and releasing the
    /// runner.
    pub async fn close_session(&self, id: SessionId) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .expect("sessions lock")
            .remove(&id)
            .ok_or(QueryMuxError::SessionNotFound(id))?;
        debug!(session = %id, label = %session.label, "closing session");

        session.cancel.cancel();
        if let Err(e) = session.runner.dispose().await {
            warn!(session = %id, error = %e, "runner dispose failed");
        }
        Ok(())
    }

    /// Closes every open session.
    pub async fn close_all(&self) {
        let sessions: Vec<(SessionId, Session)> = self
            .sessions
            .lock()
            .expect("sessions lock")
            .drain()
            .collect();

        let disposals = sessions.into_iter().map(|(id, session)| async move {
            session.cancel.cancel();
            if let Err(e) = session.runner.dispose().await {
                warn!(session = %id, error = %e, "runner dispose failed");
            }
        });
        futures::future::join_all(disposals).await;
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("sessions lock").len()
    }

    /// Label the session was opened with.
    pub fn session_label(&self, id: SessionId) -> Result<String> {
        self.with_session(id, |session| session.label.clone())
    }

    /// Returns true if the session exists and has an execution in flight.
    ///
    /// Unknown handles report false rather than erroring; callers use this
    /// as a cheap probe.
    pub fn is_running(&self, id: SessionId) -> bool {
        self.sessions
            .lock()
            .expect("sessions lock")
            .get(&id)
            .map(|session| session.state.is_busy())
            .unwrap_or(false)
    }

    /// Selections of the batches seen in the session's most recent run.
    pub fn batch_selections(&self, id: SessionId) -> Result<Vec<Selection>> {
        self.with_session(id, |session| session.selections.clone())
    }

    /// Takes the session's event subscription. Each session's subscription
    /// can be taken once.
    pub fn subscribe_session(&self, id: SessionId) -> Result<SinkSubscription> {
        self.with_session_mut(id, |session| session.sink.subscribe())?
            .ok_or_else(|| QueryMuxError::internal(format!("{id} is already subscribed")))
    }

    /// Subscribes to the global notice stream.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Marks the session's sink ready, flushing any buffered events to the
    /// subscriber in FIFO order.
    pub fn mark_sink_ready(&self, id: SessionId) -> Result<()> {
        self.with_session_mut(id, |session| session.sink.mark_ready())
    }

    /// Forwards a grid-content event to the session's subscriber.
    pub fn send_grid_event(&self, id: SessionId, event: GridContentEvent) -> Result<()> {
        self.with_session(id, |session| session.sink.send_grid_event(event))
    }

    /// Starts executing a query on the session.
    ///
    /// The run proceeds in the background; progress arrives on the
    /// session's sink. Returns `SessionBusy` when an execution is already
    /// in flight, without disturbing it.
    pub fn run_query(self: &Arc<Self>, id: SessionId, spec: RunSpec) -> Result<()> {
        let (runner, cancel) = {
            let mut sessions = self.sessions.lock().expect("sessions lock");
            let session = sessions
                .get_mut(&id)
                .ok_or(QueryMuxError::SessionNotFound(id))?;
            if !session.state.try_begin_execute() {
                return Err(QueryMuxError::SessionBusy(id));
            }
            session.selections.clear();
            session.snippet = match &spec.input {
                QueryInput::Text(text) => Some(snippet_of(text)),
                _ => None,
            };
            session.cancel = CancellationToken::new();
            (session.runner.clone(), session.cancel.clone())
        };

        debug!(session = %id, "starting query execution");
        self.spawn_run(id, move |events, cancel| async move {
            runner.run_query(spec, events, cancel).await
        }, cancel);
        Ok(())
    }

    /// Requests cancellation of the session's in-flight execution.
    ///
    /// When the runner refuses the cancel request, the failure is reported
    /// on the notice stream and a completion event is synthesized so the
    /// subscriber does not wait forever on a run that will never be
    /// acknowledged as finished.
    pub async fn cancel_query(&self, id: SessionId) -> Result<CancelOutcome> {
        let (runner, state) = {
            let sessions = self.sessions.lock().expect("sessions lock");
            let session = sessions.get(&id).ok_or(QueryMuxError::SessionNotFound(id))?;
            if !session.state.try_begin_cancel() {
                return Ok(CancelOutcome::NotRunning);
            }
            (session.runner.clone(), session.state.clone())
        };

        match runner.cancel().await {
            Ok(()) => {
                debug!(session = %id, "cancellation requested");
                Ok(CancelOutcome::Requested)
            }
            Err(e) => {
                warn!(session = %id, error = %e, "cancellation failed");
                self.publish(Notice::Error {
                    session: Some(id),
                    text: format!("Canceling the query failed: {e}"),
                });
                // The run can no longer be trusted to report completion.
                self.dispatch(id, QueryEvent::Completed {
                    elapsed: Duration::ZERO,
                });
                state.finish();
                Err(QueryMuxError::cancel(e.to_string()))
            }
        }
    }

    /// Fetches a page of rows from one of the session's buffered result
    /// sets.
    pub async fn query_rows(&self, id: SessionId, page: RowPage) -> Result<ResultSetSubset> {
        self.runner_for(id)?.query_rows(page).await
    }

    /// Starts initializing an edit session for a database object.
    ///
    /// Initialization runs in the background like a query; the outcome
    /// arrives as an `EditSessionReady` event on the sink and a matching
    /// notice on the broadcast stream.
    pub fn initialize_edit(self: &Arc<Self>, id: SessionId, target: EditTarget) -> Result<()> {
        let (runner, cancel) = {
            let mut sessions = self.sessions.lock().expect("sessions lock");
            let session = sessions
                .get_mut(&id)
                .ok_or(QueryMuxError::SessionNotFound(id))?;
            if !session.state.try_begin_execute() {
                return Err(QueryMuxError::SessionBusy(id));
            }
            session.selections.clear();
            session.snippet = None;
            session.cancel = CancellationToken::new();
            (session.runner.clone(), session.cancel.clone())
        };

        debug!(session = %id, object = %target.object, "initializing edit session");
        self.spawn_run(id, move |events, cancel| async move {
            runner.initialize_edit(target, events, cancel).await
        }, cancel);
        Ok(())
    }

    /// Stages a cell update in the session's edit cache.
    ///
    /// Failures are published on the notice stream as well as returned,
    /// since the user typed a value that was rejected.
    pub async fn update_cell(
        &self,
        id: SessionId,
        row_id: u64,
        column_id: usize,
        new_value: String,
    ) -> Result<CellUpdateOutcome> {
        let runner = self.idle_runner_for(id)?;
        match runner.update_cell(row_id, column_id, new_value).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.publish(Notice::Error {
                    session: Some(id),
                    text: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Applies the session's staged edits to the database.
    pub async fn commit_edit(&self, id: SessionId) -> Result<()> {
        let runner = self.idle_runner_for(id)?;
        match runner.commit_edit().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.publish(Notice::Error {
                    session: Some(id),
                    text: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Stages a new row in the session's edit cache.
    pub async fn create_row(&self, id: SessionId) -> Result<RowCreateOutcome> {
        self.idle_runner_for(id)?.create_row().await
    }

    /// Stages a row deletion in the session's edit cache.
    pub async fn delete_row(&self, id: SessionId, row_id: u64) -> Result<()> {
        self.idle_runner_for(id)?.delete_row(row_id).await
    }

    /// Reverts a staged cell update.
    pub async fn revert_cell(
        &self,
        id: SessionId,
        row_id: u64,
        column_id: usize,
    ) -> Result<CellUpdateOutcome> {
        self.idle_runner_for(id)?.revert_cell(row_id, column_id).await
    }

    /// Reverts all staged changes to a row.
    pub async fn revert_row(&self, id: SessionId, row_id: u64) -> Result<()> {
        self.idle_runner_for(id)?.revert_row(row_id).await
    }

    /// Fetches a page of rows from the session's edit cache.
    pub async fn edit_rows(&self, id: SessionId, row_start: u64, row_count: u64) -> Result<EditSubset> {
        self.idle_runner_for(id)?.edit_rows(row_start, row_count).await
    }

    /// Discards the session's edit cache.
    pub async fn dispose_edit(&self, id: SessionId) -> Result<()> {
        self.idle_runner_for(id)?.dispose_edit().await
    }

    /// Spawns the runner call and the relay that feeds its events into the
    /// session's sink.
    fn spawn_run<F, Fut>(self: &Arc<Self>, id: SessionId, run: F, cancel: CancellationToken)
    where
        F: FnOnce(mpsc::UnboundedSender<RunnerEvent>, CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();

        let relay = Arc::clone(self);
        tokio::spawn(async move { relay.relay_events(id, rx).await });

        let fallback = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = run(tx, cancel).await {
                // The runner bailed before streaming its own failure, so
                // the subscriber never saw an error or a completion.
                warn!(session = %id, error = %e, "runner failed without completing");
                let _ = fallback.send(RunnerEvent::Message(QueryMessage::error(e.to_string())));
                let _ = fallback.send(RunnerEvent::Completed {
                    elapsed: Duration::ZERO,
                });
            }
        });
    }

    /// Translates runner events into sink events until the run's channel
    /// closes.
    async fn relay_events(
        self: Arc<Self>,
        id: SessionId,
        mut events: mpsc::UnboundedReceiver<RunnerEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                RunnerEvent::Started => {
                    self.dispatch(id, QueryEvent::Started);
                    self.publish(Notice::QueryStarted { session: id });
                }
                RunnerEvent::BatchStarted(batch) => {
                    let message = self.batch_start_message(id, &batch);
                    self.dispatch(id, QueryEvent::Message(message));
                }
                RunnerEvent::Message(message) => {
                    self.dispatch(id, QueryEvent::Message(message));
                }
                RunnerEvent::ResultSet(summary) => {
                    self.dispatch(id, QueryEvent::ResultSet(summary));
                }
                RunnerEvent::Completed { elapsed } => {
                    let prior = self.with_session(id, |session| session.state.clone());
                    if let Ok(state) = prior {
                        if state.finish() == SessionPhase::Cancelling {
                            debug!(session = %id, "query completed after cancellation");
                        }
                    }
                    self.dispatch(id, QueryEvent::Completed { elapsed });
                    self.publish(Notice::QueryCompleted { session: id });
                }
                RunnerEvent::EditSessionReady { success, message } => {
                    self.dispatch(
                        id,
                        QueryEvent::EditSessionReady {
                            success,
                            message: message.clone(),
                        },
                    );
                    self.publish(Notice::EditSessionReady {
                        session: id,
                        success,
                        message,
                    });
                }
            }
        }
    }

    /// Builds the user-visible message for a batch start and records the
    /// batch's selection.
    fn batch_start_message(&self, id: SessionId, batch: &BatchSummary) -> QueryMessage {
        let snippet = self
            .with_session_mut(id, |session| {
                if let Some(selection) = batch.selection {
                    session.selections.push(selection);
                }
                session.snippet.clone()
            })
            .ok()
            .flatten();

        match (snippet, batch.selection) {
            (Some(snippet), _) => {
                QueryMessage::info(format!("Started executing query \"{snippet}\""))
                    .with_batch(batch.id)
            }
            (None, Some(selection)) => {
                let line = selection.start_line + 1;
                QueryMessage::info(format!("Started executing query at Line {line}"))
                    .with_batch(batch.id)
                    .with_link(format!("Line {line}"))
            }
            (None, None) => {
                QueryMessage::info("Started executing query").with_batch(batch.id)
            }
        }
    }

    /// Delivers an event to the session's sink. Events for sessions that
    /// closed mid-run are dropped.
    fn dispatch(&self, id: SessionId, event: QueryEvent) {
        let mut sessions = self.sessions.lock().expect("sessions lock");
        if let Some(session) = sessions.get_mut(&id) {
            session.sink.dispatch(event);
        }
    }

    fn publish(&self, notice: Notice) {
        // No listeners is fine
        let _ = self.notices.send(notice);
    }

    fn runner_for(&self, id: SessionId) -> Result<Arc<dyn QueryRunner>> {
        self.with_session(id, |session| session.runner.clone())
    }

    /// Like `runner_for`, but refuses sessions with an execution in
    /// flight. Edit staging operates on a cache that an in-flight run or
    /// initialization may be about to replace.
    fn idle_runner_for(&self, id: SessionId) -> Result<Arc<dyn QueryRunner>> {
        self.with_session(id, |session| {
            if session.state.is_busy() {
                Err(QueryMuxError::SessionBusy(id))
            } else {
                Ok(session.runner.clone())
            }
        })?
    }

    fn with_session<T>(&self, id: SessionId, f: impl FnOnce(&Session) -> T) -> Result<T> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .get(&id)
            .map(f)
            .ok_or(QueryMuxError::SessionNotFound(id))
    }

    fn with_session_mut<T>(&self, id: SessionId, f: impl FnOnce(&mut Session) -> T) -> Result<T> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .get_mut(&id)
            .map(f)
            .ok_or(QueryMuxError::SessionNotFound(id))
    }
}

/// Collapses whitespace and truncates the text for echoing in a message.
fn snippet_of(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SNIPPET_MAX_CHARS {
        collapsed
    } else {
        let mut snippet: String = collapsed.chars().take(SNIPPET_MAX_CHARS).collect();
        snippet.push('…');
        snippet
    }
}
