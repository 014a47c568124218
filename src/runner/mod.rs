//! Runner abstraction for executing queries on behalf of a session.
//!
//! A runner is the collaborator that actually issues SQL requests. The
//! session layer only talks to the `QueryRunner` trait, so backends can be
//! swapped: the bundled `PostgresRunner` talks to a live database, and the
//! mock runners drive headless tests.

mod edit;
mod mock;
mod postgres;

pub use edit::{
    CellUpdateOutcome, EditCell, EditRow, EditRowState, EditSessionCache, EditStatement,
    EditSubset, RowCreateOutcome,
};
pub use mock::{FailingRunner, MockRunner, RunHandle};
pub use postgres::{PostgresRunner, RunnerSettings};

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::events::{
    BatchSummary, QueryMessage, ResultSetSubset, ResultSetSummary, RowPage, Selection,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Channel on which a runner reports execution progress.
pub type EventTx = mpsc::UnboundedSender<RunnerEvent>;

/// Raw events emitted by a runner during an execution.
///
/// The session layer translates these into UI-facing `QueryEvent`s; batch
/// starts become user-visible messages and have their selections recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    /// Execution started.
    Started,
    /// A batch within the execution started.
    BatchStarted(BatchSummary),
    /// A user-visible message was produced.
    Message(QueryMessage),
    /// A result set finished buffering.
    ResultSet(ResultSetSummary),
    /// Execution finished. Runners must emit this exactly once per run,
    /// on success and on failure alike, or the session would stay stuck
    /// in the Executing phase.
    Completed { elapsed: Duration },
    /// Edit initialization finished.
    EditSessionReady {
        success: bool,
        message: Option<String>,
    },
}

/// What to execute: the three entry points a workbench exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryInput {
    /// Run the selected range of the document.
    Selection { text: String, selection: Selection },
    /// Run the statement under the cursor.
    Statement { text: String, line: u32 },
    /// Run an ad-hoc query string with no document behind it.
    Text(String),
}

impl QueryInput {
    /// The SQL text to execute.
    pub fn text(&self) -> &str {
        match self {
            Self::Selection { text, .. } | Self::Statement { text, .. } => text,
            Self::Text(text) => text,
        }
    }

    /// Source selection, where one exists.
    pub fn selection(&self) -> Option<Selection> {
        match self {
            Self::Selection { selection, .. } => Some(*selection),
            Self::Statement { line, .. } => Some(Selection::lines(*line, *line)),
            Self::Text(_) => None,
        }
    }
}

/// Execution-plan options forwarded to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Request an estimated execution plan alongside results.
    pub estimated_plan: bool,
    /// Request the actual execution plan alongside results.
    pub actual_plan: bool,
}

/// A fully-specified run request.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub input: QueryInput,
    pub options: ExecutionOptions,
}

impl RunSpec {
    /// Creates a run spec with default options.
    pub fn new(input: QueryInput) -> Self {
        Self {
            input,
            options: ExecutionOptions::default(),
        }
    }
}

/// The database object an edit session operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditTarget {
    /// Schema the object lives in; the backend default when None.
    pub schema: Option<String>,
    /// Table or view name.
    pub object: String,
    /// Object type as reported by the catalog ("TABLE", "VIEW").
    pub object_type: String,
    /// Cap on the number of rows loaded into the edit cache.
    pub row_limit: Option<u64>,
}

/// Interface for issuing SQL requests on behalf of one session.
///
/// All operations are async and return Results with QueryMuxError. The
/// streaming operations (`run_query`, `initialize_edit`) report progress on
/// the provided event channel and must finish with `RunnerEvent::Completed`
/// even when the execution fails; failures inside the execution travel as
/// error messages, not as returned errors.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Executes a query, streaming events until completion.
    async fn run_query(
        &self,
        spec: RunSpec,
        events: EventTx,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Requests cancellation of the in-flight execution.
    async fn cancel(&self) -> Result<()>;

    /// Fetches a page of rows from a buffered result set.
    async fn query_rows(&self, page: RowPage) -> Result<ResultSetSubset>;

    /// Loads the target object into an edit cache, streaming events until
    /// completion (ending with `EditSessionReady` then `Completed`).
    async fn initialize_edit(
        &self,
        target: EditTarget,
        events: EventTx,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Stages a cell update in the edit cache.
    async fn update_cell(
        &self,
        row_id: u64,
        column_id: usize,
        new_value: String,
    ) -> Result<CellUpdateOutcome>;

    /// Applies all staged edits to the database.
    async fn commit_edit(&self) -> Result<()>;

    /// Stages a new row.
    async fn create_row(&self) -> Result<RowCreateOutcome>;

    /// Stages a row deletion.
    async fn delete_row(&self, row_id: u64) -> Result<()>;

    /// Reverts a staged cell update.
    async fn revert_cell(&self, row_id: u64, column_id: usize) -> Result<CellUpdateOutcome>;

    /// Reverts all staged changes to a row.
    async fn revert_row(&self, row_id: u64) -> Result<()>;

    /// Fetches a page of rows from the edit cache, dirty state included.
    async fn edit_rows(&self, row_start: u64, row_count: u64) -> Result<EditSubset>;

    /// Discards the edit cache.
    async fn dispose_edit(&self) -> Result<()>;

    /// Releases all resources held by the runner.
    async fn dispose(&self) -> Result<()>;
}

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    // Future: MySQL, SQLite, etc.
}

impl DatabaseBackend {
    /// Returns the backend as a string for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            _ => None,
        }
    }

    /// Returns the default port for this backend.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
        }
    }
}

/// Creates a runner for the given backend and configuration.
///
/// This is the central factory for session runners.
pub async fn connect(
    config: &ConnectionConfig,
    settings: RunnerSettings,
) -> Result<Arc<dyn QueryRunner>> {
    match config.backend {
        DatabaseBackend::Postgres => {
            let runner = PostgresRunner::connect(config, settings).await?;
            Ok(Arc::new(runner))
        }
    }
}
