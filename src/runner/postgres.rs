//! PostgreSQL runner implementation.
//!
//! Wraps a sqlx connection pool behind the `QueryRunner` trait: executions
//! stream lifecycle events, result sets are buffered for paging, and edit
//! sessions operate over a ctid-keyed snapshot of the target table.

use super::edit::{
    CellUpdateOutcome, EditSessionCache, EditSubset, RowCreateOutcome, qualified_name,
};
use super::{EditTarget, EventTx, QueryRunner, RunSpec, RunnerEvent};
use crate::config::ConnectionConfig;
use crate::error::{QueryMuxError, Result};
use crate::events::{
    BatchSummary, ColumnInfo, QueryMessage, ResultSetSubset, ResultSetSummary, Row, RowPage, Value,
};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Rows loaded into an edit cache when the caller gives no limit.
const DEFAULT_EDIT_ROW_LIMIT: u64 = 200;

/// Execution settings for a runner.
#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    /// Per-query execution timeout.
    pub query_timeout: Duration,
    /// Maximum rows buffered per result set.
    pub max_rows: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(30),
            max_rows: 1000,
        }
    }
}

/// A result set buffered for later paging.
struct BufferedResultSet {
    batch_id: u32,
    result_id: u32,
    rows: Vec<Row>,
}

struct EditState {
    target: EditTarget,
    cache: EditSessionCache,
}

/// PostgreSQL query runner.
pub struct PostgresRunner {
    pool: PgPool,
    settings: RunnerSettings,
    results: Mutex<Vec<BufferedResultSet>>,
    current: Mutex<Option<CancellationToken>>,
    edit: tokio::sync::Mutex<Option<EditState>>,
}

impl PostgresRunner {
    /// Connects to the database, retrying transient failures with
    /// exponential backoff.
    pub async fn connect(config: &ConnectionConfig, settings: RunnerSettings) -> Result<Self> {
        let conn_str = config.to_connection_string()?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    debug!("Successfully connected to database");
                    return Ok(Self::from_pool(pool, settings));
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no connection attempt was made".to_string());
        Err(QueryMuxError::connection(format!(
            "Could not connect to {}: {}",
            config.display_string(),
            error
        )))
    }

    /// Creates a runner from an existing connection pool.
    ///
    /// This is primarily useful for testing.
    pub fn from_pool(pool: PgPool, settings: RunnerSettings) -> Self {
        Self {
            pool,
            settings,
            results: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            edit: tokio::sync::Mutex::new(None),
        }
    }

    async fn execute(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ColumnInfo>, Vec<Row>, usize)> {
        let fetch = sqlx::query(sql).fetch_all(&self.pool);
        let timeout_secs = self.settings.query_timeout.as_secs();

        let rows: Vec<PgRow> = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(QueryMuxError::cancel("Query was cancelled by the user"));
            }
            result = tokio::time::timeout(self.settings.query_timeout, fetch) => result
                .map_err(|_| {
                    QueryMuxError::query(format!("Query timed out after {timeout_secs} seconds"))
                })?
                .map_err(|e| QueryMuxError::query(e.to_string()))?,
        };

        let columns: Vec<ColumnInfo> = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                    .collect()
            })
            .unwrap_or_default();

        let total_rows = rows.len();
        if total_rows > self.settings.max_rows {
            warn!(
                "Query returned {} rows, truncating to {} rows",
                total_rows, self.settings.max_rows
            );
        }
        let rows: Vec<Row> = rows
            .iter()
            .take(self.settings.max_rows)
            .map(convert_row)
            .collect();

        Ok((columns, rows, total_rows))
    }

    async fn fetch_edit_snapshot(
        &self,
        target: &EditTarget,
        cancel: &CancellationToken,
    ) -> Result<EditSessionCache> {
        let table = qualified_name(target.schema.as_deref(), &target.object);
        let row_limit = target.row_limit.unwrap_or(DEFAULT_EDIT_ROW_LIMIT);
        let sql = format!("SELECT ctid::text AS __row_key, * FROM {table} LIMIT {row_limit}");

        let fetch = sqlx::query(&sql).fetch_all(&self.pool);
        let rows: Vec<PgRow> = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(QueryMuxError::cancel("Edit initialization was cancelled"));
            }
            result = tokio::time::timeout(self.settings.query_timeout, fetch) => result
                .map_err(|_| QueryMuxError::edit("Edit initialization timed out"))?
                .map_err(|e| QueryMuxError::edit(e.to_string()))?,
        };

        // Column metadata comes from the rows when there are any, and from
        // the catalog when the table is empty.
        let columns: Vec<ColumnInfo> = match rows.first() {
            Some(row) => row
                .columns()
                .iter()
                .skip(1)
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            None => {
                self.fetch_table_columns(target.schema.as_deref().unwrap_or("public"), &target.object)
                    .await?
            }
        };

        let snapshot: Vec<(String, Row)> = rows
            .iter()
            .map(|row| {
                let key: String = row.try_get(0).unwrap_or_default();
                let values = row
                    .columns()
                    .iter()
                    .enumerate()
                    .skip(1)
                    .map(|(i, col)| convert_value(row, i, col.type_info().name()))
                    .collect();
                (key, values)
            })
            .collect();

        Ok(EditSessionCache::new(
            table,
            "ctid".to_string(),
            columns,
            snapshot,
        ))
    }

    /// Fetches column metadata for a table from the catalog.
    async fn fetch_table_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT column_name::text, udt_name::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueryMuxError::edit(format!("Failed to fetch columns for {table}: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type)| ColumnInfo { name, data_type })
            .collect())
    }
}

#[async_trait]
impl QueryRunner for PostgresRunner {
    async fn run_query(
        &self,
        spec: RunSpec,
        events: EventTx,
        cancel: CancellationToken,
    ) -> Result<()> {
        let start = Instant::now();
        *self.current.lock().expect("current lock") = Some(cancel.clone());

        let _ = events.send(RunnerEvent::Started);
        let _ = events.send(RunnerEvent::BatchStarted(BatchSummary {
            id: 0,
            selection: spec.input.selection(),
        }));

        match self.execute(spec.input.text(), &cancel).await {
            Ok((columns, rows, total_rows)) => {
                let row_count = rows.len();
                {
                    let mut results = self.results.lock().expect("results lock");
                    results.clear();
                    results.push(BufferedResultSet {
                        batch_id: 0,
                        result_id: 0,
                        rows,
                    });
                }

                let _ = events.send(RunnerEvent::Message(
                    QueryMessage::info(format!("({total_rows} rows affected)")).with_batch(0),
                ));
                if total_rows > row_count {
                    let _ = events.send(RunnerEvent::Message(
                        QueryMessage::info(format!(
                            "Result truncated: showing {row_count} of {total_rows} rows"
                        ))
                        .with_batch(0),
                    ));
                }
                let _ = events.send(RunnerEvent::ResultSet(ResultSetSummary {
                    batch_id: 0,
                    result_id: 0,
                    row_count: row_count as u64,
                    columns,
                }));
            }
            Err(e) => {
                let _ = events.send(RunnerEvent::Message(
                    QueryMessage::error(e.to_string()).with_batch(0),
                ));
            }
        }

        let _ = events.send(RunnerEvent::Completed {
            elapsed: start.elapsed(),
        });
        *self.current.lock().expect("current lock") = None;
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        match self.current.lock().expect("current lock").take() {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(QueryMuxError::cancel("no query is running")),
        }
    }

    async fn query_rows(&self, page: RowPage) -> Result<ResultSetSubset> {
        let results = self.results.lock().expect("results lock");
        let set = results
            .iter()
            .find(|s| s.batch_id == page.batch_id && s.result_id == page.result_id)
            .ok_or_else(|| {
                QueryMuxError::query(format!(
                    "no result set {}:{}",
                    page.batch_id, page.result_id
                ))
            })?;

        let start = (page.row_start as usize).min(set.rows.len());
        let end = (start + page.row_count as usize).min(set.rows.len());
        Ok(ResultSetSubset {
            row_start: page.row_start,
            rows: set.rows[start..end].to_vec(),
        })
    }

    async fn initialize_edit(
        &self,
        target: EditTarget,
        events: EventTx,
        cancel: CancellationToken,
    ) -> Result<()> {
        let start = Instant::now();
        *self.current.lock().expect("current lock") = Some(cancel.clone());

        let _ = events.send(RunnerEvent::Started);

        match self.fetch_edit_snapshot(&target, &cancel).await {
            Ok(cache) => {
                *self.edit.lock().await = Some(EditState { target, cache });
                let _ = events.send(RunnerEvent::EditSessionReady {
                    success: true,
                    message: None,
                });
            }
            Err(e) => {
                let _ = events.send(RunnerEvent::EditSessionReady {
                    success: false,
                    message: Some(e.to_string()),
                });
            }
        }

        let _ = events.send(RunnerEvent::Completed {
            elapsed: start.elapsed(),
        });
        *self.current.lock().expect("current lock") = None;
        Ok(())
    }

    async fn update_cell(
        &self,
        row_id: u64,
        column_id: usize,
        new_value: String,
    ) -> Result<CellUpdateOutcome> {
        let mut edit = self.edit.lock().await;
        let state = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        state.cache.update_cell(row_id, column_id, &new_value)
    }

    async fn commit_edit(&self) -> Result<()> {
        let mut edit = self.edit.lock().await;
        let state = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;

        let statements = state.cache.statements();
        if statements.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueryMuxError::edit(format!("Failed to begin transaction: {e}")))?;
        for statement in &statements {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = query.bind(param);
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| QueryMuxError::edit(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| QueryMuxError::edit(format!("Failed to commit transaction: {e}")))?;

        // Row locators may have moved; refresh the snapshot.
        state.cache = self
            .fetch_edit_snapshot(&state.target, &CancellationToken::new())
            .await?;
        Ok(())
    }

    async fn create_row(&self) -> Result<RowCreateOutcome> {
        let mut edit = self.edit.lock().await;
        let state = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        Ok(state.cache.create_row())
    }

    async fn delete_row(&self, row_id: u64) -> Result<()> {
        let mut edit = self.edit.lock().await;
        let state = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        state.cache.delete_row(row_id)
    }

    async fn revert_cell(&self, row_id: u64, column_id: usize) -> Result<CellUpdateOutcome> {
        let mut edit = self.edit.lock().await;
        let state = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        state.cache.revert_cell(row_id, column_id)
    }

    async fn revert_row(&self, row_id: u64) -> Result<()> {
        let mut edit = self.edit.lock().await;
        let state = edit
            .as_mut()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        state.cache.revert_row(row_id)
    }

    async fn edit_rows(&self, row_start: u64, row_count: u64) -> Result<EditSubset> {
        let edit = self.edit.lock().await;
        let state = edit
            .as_ref()
            .ok_or_else(|| QueryMuxError::edit("no edit session initialized"))?;
        Ok(state.cache.subset(row_start, row_count))
    }

    async fn dispose_edit(&self) -> Result<()> {
        *self.edit.lock().await = None;
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        // For all other types, try to get as string
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
    {
        return true;
    }

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
        || error_str.contains("ssl")
        || error_str.contains("tls")
    {
        return false;
    }

    false
}
