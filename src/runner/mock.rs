//! Mock runners for headless testing.
//!
//! `MockRunner` emits a canned event sequence and records the requests it
//! receives; `pending()` builds one whose execution stays open until the
//! test releases it, so Executing-phase behavior can be observed.
//! `FailingRunner` errors on everything.

use super::edit::{
    CellUpdateOutcome, EditSessionCache, EditStatement, EditSubset, RowCreateOutcome,
    qualified_name,
};
use super::{EditTarget, EventTx, QueryRunner, RunSpec, RunnerEvent};
use crate::error::{QueryMuxError, Result};
use crate::events::{
    BatchSummary, ColumnInfo, QueryMessage, ResultSetSubset, ResultSetSummary, Row, RowPage, Value,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Releases a held-open mock execution.
#[derive(Clone)]
pub struct RunHandle {
    release: Arc<Notify>,
}

impl RunHandle {
    /// Lets the held execution run to completion.
    pub fn finish(&self) {
        self.release.notify_one();
    }
}

/// A mock runner that replays a canned result set.
pub struct MockRunner {
    hold: Option<Arc<Notify>>,
    fail_cancel: bool,
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
    runs: Mutex<Vec<RunSpec>>,
    current: Mutex<Option<CancellationToken>>,
    edit: Mutex<Option<EditSessionCache>>,
    committed: Mutex<Vec<EditStatement>>,
    edit_snapshot: Vec<(String, Row)>,
}

impl MockRunner {
    /// Creates a mock runner with a small default result set.
    pub fn new() -> Self {
        Self {
            hold: None,
            fail_cancel: false,
            columns: vec![
                ColumnInfo::new("id", "int4"),
                ColumnInfo::new("name", "text"),
            ],
            rows: vec![
                vec![Value::Int(1), "Alice".into()],
                vec![Value::Int(2), "Bob".into()],
            ],
            runs: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            edit: Mutex::new(None),
            committed: Mutex::new(Vec::new()),
            edit_snapshot: vec![
                ("(0,1)".to_string(), vec![Value::Int(1), "Alice".into()]),
                ("(0,2)".to_string(), vec![Value::Int(2), "Bob".into()]),
            ],
        }
    }

    /// Creates a mock runner whose executions stay open until the handle
    /// is released or the execution is cancelled.
    pub fn pending() -> (Self, RunHandle) {
        let release = Arc::new(Notify::new());
        let runner = Self {
            hold: Some(release.clone()),
            ..Self::new()
        };
        (runner, RunHandle { release })
    }

    /// Makes `cancel` fail, for exercising the cancel-failure path.
    pub fn with_failing_cancel(mut self) -> Self {
        self.fail_cancel = true;
        self
    }

    /// Replaces the canned result set.
    pub fn with_result(mut self, columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        self.columns = columns;
        self.rows = rows;
        self
    }

    /// Number of run requests this runner has accepted.
    pub fn run_count(&self) -> usize {
        self.runs.lock().expect("runs lock").len()
    }

    /// Statements executed by `commit_edit`, in order.
    pub fn committed_statements(&self) -> Vec<EditStatement> {
        self.committed.lock().expect("committed lock").clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryRunner for MockRunner {
    async fn run_query(
        &self,
        spec: RunSpec,
        events: EventTx,
        cancel: CancellationToken,
    ) -> Result<()> {
        let start = Instant::now();
        let selection = spec.input.selection();
        self.runs.lock().expect("runs lock").push(spec);
        *self.current.lock().expect("current lock") = Some(cancel.clone());

        let _ = events.send(RunnerEvent::Started);
        let _ = events.send(RunnerEvent::BatchStarted(BatchSummary { id: 0, selection }));

        if let Some(hold) = &self.hold {
            tokio::select! {
                _ = hold.notified() => {}
                _ = cancel.cancelled() => {
                    let _ = events.send(RunnerEvent::Message(
                        QueryMessage::error("Query was cancelled by the user").with_batch(0),
                    ));
                    let _ = events.send(RunnerEvent::Completed {
                        elapsed: start.elapsed(),
                    });
                    return Ok(());
                }
            }
        }

        let _ = events.send(RunnerEvent::Message(
            QueryMessage::info(format!("({} rows affected)", self.rows.len())).with_batch(0),
        ));
        let _ = events.send(RunnerEvent::ResultSet(ResultSetSummary {
            batch_id: 0,
            result_id: 0,
            row_count: self.rows.len() as u64,
            columns: self.columns.clone(),
        }));
        let _ = events.send(RunnerEvent::Completed {
            elapsed: start.elapsed(),
        });
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        if self.fail_cancel {
            return Err(QueryMuxError::cancel("cancellation rejected by server"));
        }
        match self.current.lock().expect("current lock").take() {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(QueryMuxError::cancel("no execution in flight")),
        }
    }

    async fn query_rows(&self, page: RowPage) -> Result<ResultSetSubset> {
        if page.batch_id != 0 || page.result_id != 0 {
            return Err(QueryMuxError::query(format!(
                "no result set {}:{}",
                page.batch_id, page.result_id
            )));
        }
        let start = (page.row_start as usize).min(self.rows.len());
        let end = (start + page.row_count as usize).min(self.rows.len());
        Ok(ResultSetSubset {
            row_start: page.row_start,
            rows: self.rows[start..end].to_vec(),
        })
    }

    async fn initialize_edit(
        &self,
        target: EditTarget,
        events: EventTx,
        _cancel: CancellationToken,
    ) -> Result<()> {
        let start = Instant::now();
        let _ = events.send(RunnerEvent::Started);

        let cache = EditSessionCache::new(
            qualified_name(target.schema.as_deref(), &target.object),
            "ctid".to_string(),
            self.columns.clone(),
            self.edit_snapshot.clone(),
        );
        *self.edit.lock().expect("edit lock") = Some(cache);

        let _ = events.send(RunnerEvent::EditSessionReady {
            success: true,
            message: None,
        });
        let _ = events.send(RunnerEvent::Completed {
            elapsed: start.elapsed(),
        });
        Ok(())
    }

    async fn update_cell(
        &self,
        row_id: u64,
        column_id: usize,
        new_value: String,
    ) -> Result<CellUpdateOutcome> {
        let mut edit = self.edit.lock().expect("edit lock");
        let cache = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        cache.update_cell(row_id, column_id, &new_value)
    }

    async fn commit_edit(&self) -> Result<()> {
        let mut edit = self.edit.lock().expect("edit lock");
        let cache = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        let statements = cache.statements();
        self.committed
            .lock()
            .expect("committed lock")
            .extend(statements);

        // A real backend re-snapshots after commit; the mock just resets
        // the staged state.
        *cache = EditSessionCache::new(
            qualified_name(None, "mock"),
            "ctid".to_string(),
            self.columns.clone(),
            self.edit_snapshot.clone(),
        );
        Ok(())
    }

    async fn create_row(&self) -> Result<RowCreateOutcome> {
        let mut edit = self.edit.lock().expect("edit lock");
        let cache = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        Ok(cache.create_row())
    }

    async fn delete_row(&self, row_id: u64) -> Result<()> {
        let mut edit = self.edit.lock().expect("edit lock");
        let cache = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        cache.delete_row(row_id)
    }

    async fn revert_cell(&self, row_id: u64, column_id: usize) -> Result<CellUpdateOutcome> {
        let mut edit = self.edit.lock().expect("edit lock");
        let cache = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        cache.revert_cell(row_id, column_id)
    }

    async fn revert_row(&self, row_id: u64) -> Result<()> {
        let mut edit = self.edit.lock().expect("edit lock");
        let cache = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        cache.revert_row(row_id)
    }

    async fn edit_rows(&self, row_start: u64, row_count: u64) -> Result<EditSubset> {
        let edit = self.edit.lock().expect("edit lock");
        let cache = edit
            .as_ref()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        Ok(cache.subset(row_start, row_count))
    }

    async fn dispose_edit(&self) -> Result<()> {
        *self.edit.lock().expect("edit lock") = None;
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        *self.edit.lock().expect("edit lock") = None;
        *self.current.lock().expect("current lock") = None;
        Ok(())
    }
}

/// A runner that fails every operation, for error-path tests.
pub struct FailingRunner;

#[async_trait]
impl QueryRunner for FailingRunner {
    async fn run_query(
        &self,
        _spec: RunSpec,
        _events: EventTx,
        _cancel: CancellationToken,
    ) -> Result<()> {
        Err(QueryMuxError::query("mock execution failure"))
    }

    async fn cancel(&self) -> Result<()> {
        Err(QueryMuxError::cancel("mock cancel failure"))
    }

    async fn query_rows(&self, _page: RowPage) -> Result<ResultSetSubset> {
        Err(QueryMuxError::query("mock paging failure"))
    }

    async fn initialize_edit(
        &self,
        _target: EditTarget,
        events: EventTx,
        _cancel: CancellationToken,
    ) -> Result<()> {
        let _ = events.send(RunnerEvent::Started);
        let _ = events.send(RunnerEvent::EditSessionReady {
            success: false,
            message: Some("mock edit failure".to_string()),
        });
        let _ = events.send(RunnerEvent::Completed {
            elapsed: Duration::ZERO,
        });
        Ok(())
    }

    async fn update_cell(
        &self,
        _row_id: u64,
        _column_id: usize,
        _new_value: String,
    ) -> Result<CellUpdateOutcome> {
        Err(QueryMuxError::edit("mock update failure"))
    }

    async fn commit_edit(&self) -> Result<()> {
        Err(QueryMuxError::edit("mock commit failure"))
    }

    async fn create_row(&self) -> Result<RowCreateOutcome> {
        Err(QueryMuxError::edit("mock create failure"))
    }

    async fn delete_row(&self, _row_id: u64) -> Result<()> {
        Err(QueryMuxError::edit("mock delete failure"))
    }

    async fn revert_cell(&self, _row_id: u64, _column_id: usize) -> Result<CellUpdateOutcome> {
        Err(QueryMuxError::edit("mock revert failure"))
    }

    async fn revert_row(&self, _row_id: u64) -> Result<()> {
        Err(QueryMuxError::edit("mock revert failure"))
    }

    async fn edit_rows(&self, _row_start: u64, _row_count: u64) -> Result<EditSubset> {
        Err(QueryMuxError::edit("mock paging failure"))
    }

    async fn dispose_edit(&self) -> Result<()> {
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}
