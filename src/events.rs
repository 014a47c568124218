//! Event and result types relayed between runners and UI consumers.
//!
//! These are the wire types a workbench frontend receives from a session:
//! query lifecycle events, batch messages, result-set metadata, and the
//! global notices that mirror per-session activity.

use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// A text selection inside the source document, in zero-based coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Selection {
    /// Creates a selection spanning whole lines.
    pub fn lines(start_line: u32, end_line: u32) -> Self {
        Self {
            start_line,
            start_column: 0,
            end_line,
            end_column: 0,
        }
    }
}

/// An optional link attached to a batch-start message, pointing the UI at
/// the source line the batch came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLink {
    pub text: String,
}

/// A message produced while executing a query (batch started, rows
/// affected, server notices, errors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMessage {
    /// Message text as shown to the user.
    pub text: String,
    /// Batch this message belongs to, if any.
    pub batch_id: Option<u32>,
    /// Whether the message describes an error.
    pub is_error: bool,
    /// Wall-clock time the message was produced.
    pub sent_at: SystemTime,
    /// Optional link back to the source line.
    pub link: Option<MessageLink>,
}

impl QueryMessage {
    /// Creates an informational message.
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            batch_id: None,
            is_error: false,
            sent_at: SystemTime::now(),
            link: None,
        }
    }

    /// Creates an error message.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::info(text)
        }
    }

    /// Attaches a batch id.
    pub fn with_batch(mut self, batch_id: u32) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Attaches a source-line link.
    pub fn with_link(mut self, text: impl Into<String>) -> Self {
        self.link = Some(MessageLink { text: text.into() });
        self
    }
}

/// Metadata about a column in a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Column data type as reported by the backend.
    pub data_type: String,
}

impl ColumnInfo {
    /// Creates a new column info with the given name and type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A row of data from a query result.
pub type Row = Vec<Value>;

/// Represents a single value from a database query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum Value {
    /// NULL value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (up to i64).
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// Text/string value.
    String(String),

    /// Binary data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Converts the value to a display string.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }

    /// Converts the value to its SQL literal text, for binding as a cast
    /// parameter. NULL has no text form and returns None.
    pub fn to_sql_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_display_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Summary of a batch the runner has started executing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Batch index within the execution.
    pub id: u32,
    /// Source selection this batch was taken from, if known.
    pub selection: Option<Selection>,
}

/// Summary of a completed result set. Rows are paged separately via
/// `SessionManager::query_rows`, so only metadata travels in the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSetSummary {
    /// Batch the result set belongs to.
    pub batch_id: u32,
    /// Result set index within the batch.
    pub result_id: u32,
    /// Number of buffered rows available for paging.
    pub row_count: u64,
    /// Column metadata.
    pub columns: Vec<ColumnInfo>,
}

/// A page of rows fetched from a buffered result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSetSubset {
    /// Index of the first row in this page.
    pub row_start: u64,
    /// The rows.
    pub rows: Vec<Row>,
}

/// Addresses a page of rows within a buffered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowPage {
    pub batch_id: u32,
    pub result_id: u32,
    pub row_start: u64,
    pub row_count: u64,
}

/// A query lifecycle event relayed to the session's UI consumer.
///
/// Order within a session is significant and preserved: a `ResultSet` is
/// meaningless before its `Started`/batch message, so events are buffered
/// FIFO until the sink is ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum QueryEvent {
    /// Execution has started.
    Started,
    /// A user-visible message (batch start, rows affected, errors).
    Message(QueryMessage),
    /// A result set finished buffering and can be paged.
    ResultSet(ResultSetSummary),
    /// Execution finished, successfully or not.
    Completed {
        #[serde(with = "duration_serde")]
        elapsed: Duration,
    },
    /// An edit session finished initializing.
    EditSessionReady {
        success: bool,
        message: Option<String>,
    },
}

impl QueryEvent {
    /// Short name of the event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Message(_) => "message",
            Self::ResultSet(_) => "resultSet",
            Self::Completed { .. } => "complete",
            Self::EditSessionReady { .. } => "editSessionReady",
        }
    }
}

/// Grid-content events for an already-rendered results grid.
///
/// Unlike `QueryEvent`s these are not queued while the sink is unready:
/// with no grid attached there is no content to refresh or resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridContentEvent {
    RefreshContents,
    ResizeContents,
}

/// Global notices broadcast across all sessions.
///
/// Mirrors per-session activity for listeners that are not attached to a
/// particular sink (status bars, logs), and carries user-facing error
/// reports from operations whose failure should not be silent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A session started executing.
    QueryStarted { session: SessionId },
    /// A session finished executing.
    QueryCompleted { session: SessionId },
    /// A session's edit initialization finished.
    EditSessionReady {
        session: SessionId,
        success: bool,
        message: Option<String>,
    },
    /// A user-actionable failure (cancel failed, cell update failed, ...).
    Error {
        session: Option<SessionId>,
        text: String,
    },
}

/// Serde support for Duration (not natively supported by serde).
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_nanos().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u128::deserialize(deserializer)?;
        let nanos = u64::try_from(nanos)
            .map_err(|_| serde::de::Error::custom(format!("duration out of range: {nanos}ns")))?;
        Ok(Duration::from_nanos(nanos))
    }
}
