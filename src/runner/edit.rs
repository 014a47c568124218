//! Edit-session cache: staged row edits over a table snapshot.
//!
//! The cache holds the rows loaded at edit-initialization time, keyed by a
//! backend row locator (ctid for Postgres), plus the staged creates,
//! updates, and deletes. It is pure state: staging and revert logic live
//! here, and `statements()` renders the staged changes as parameterized SQL
//! for the runner to execute at commit time.

use crate::error::{QueryMuxError, Result};
use crate::events::{ColumnInfo, Row, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Quotes a SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Builds a quoted, optionally schema-qualified object name.
pub fn qualified_name(schema: Option<&str>, object: &str) -> String {
    match schema {
        Some(s) => format!("{}.{}", quote_ident(s), quote_ident(object)),
        None => quote_ident(object),
    }
}

/// One cell of an edit row, as shown to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct EditCell {
    /// Current (possibly staged) value.
    pub value: Value,
    /// Display text for the grid.
    pub display_value: String,
    /// Whether a staged change is pending on this cell.
    pub is_dirty: bool,
}

impl EditCell {
    fn new(value: Value, is_dirty: bool) -> Self {
        let display_value = value.to_display_string();
        Self {
            value,
            display_value,
            is_dirty,
        }
    }
}

/// Dirty state of an edit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditRowState {
    Clean,
    DirtyInsert,
    DirtyUpdate,
    DirtyDelete,
}

/// An edit row as shown to the UI: snapshot values with staged changes
/// overlaid.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRow {
    pub id: u64,
    pub cells: Vec<EditCell>,
    pub state: EditRowState,
}

/// A page of edit rows.
#[derive(Debug, Clone, PartialEq)]
pub struct EditSubset {
    pub row_start: u64,
    pub rows: Vec<EditRow>,
}

/// Outcome of staging or reverting a cell change.
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdateOutcome {
    pub cell: EditCell,
    pub row_dirty: bool,
}

/// Outcome of staging a new row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCreateOutcome {
    pub row_id: u64,
    pub default_values: Vec<String>,
}

/// A parameterized statement produced at commit time. Parameters are bound
/// as text; the SQL carries casts to the reported column types.
#[derive(Debug, Clone, PartialEq)]
pub struct EditStatement {
    pub sql: String,
    pub params: Vec<String>,
}

/// Staged edits over a snapshot of one table.
pub struct EditSessionCache {
    table: String,
    key_column: String,
    columns: Vec<ColumnInfo>,
    keys: Vec<String>,
    rows: Vec<Row>,
    updates: HashMap<u64, BTreeMap<usize, Value>>,
    deletes: BTreeSet<u64>,
    creates: BTreeMap<u64, Row>,
    next_row_id: u64,
}

impl EditSessionCache {
    /// Creates a cache over a snapshot.
    ///
    /// `table` must already be quoted/qualified; `snapshot` pairs each
    /// row's locator value (e.g. ctid text) with its column values, which
    /// must match `columns` in arity.
    pub fn new(
        table: String,
        key_column: String,
        columns: Vec<ColumnInfo>,
        snapshot: Vec<(String, Row)>,
    ) -> Self {
        let (keys, rows): (Vec<_>, Vec<_>) = snapshot.into_iter().unzip();
        let next_row_id = rows.len() as u64;
        Self {
            table,
            key_column,
            columns,
            keys,
            rows,
            updates: HashMap::new(),
            deletes: BTreeSet::new(),
            creates: BTreeMap::new(),
            next_row_id,
        }
    }

    /// Column metadata for the editable columns.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Number of rows in the merged view (snapshot plus staged creates).
    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64 + self.creates.len() as u64
    }

    /// Whether any staged change is pending.
    pub fn is_dirty(&self) -> bool {
        !self.updates.is_empty() || !self.deletes.is_empty() || !self.creates.is_empty()
    }

    /// Stages a cell update. The value text is parsed according to the
    /// column's reported type so bad input fails here, not at commit.
    pub fn update_cell(
        &mut self,
        row_id: u64,
        column_id: usize,
        new_value: &str,
    ) -> Result<CellUpdateOutcome> {
        let column = self.column(column_id)?;
        let value = parse_typed(&column.data_type, new_value)?;

        if let Some(created) = self.creates.get_mut(&row_id) {
            created[column_id] = value.clone();
            return Ok(CellUpdateOutcome {
                cell: EditCell::new(value, true),
                row_dirty: true,
            });
        }

        self.snapshot_index(row_id)?;
        if self.deletes.contains(&row_id) {
            return Err(QueryMuxError::edit(format!(
                "row {row_id} is marked for deletion"
            )));
        }

        self.updates
            .entry(row_id)
            .or_default()
            .insert(column_id, value.clone());
        Ok(CellUpdateOutcome {
            cell: EditCell::new(value, true),
            row_dirty: true,
        })
    }

    /// Reverts a staged cell update, restoring the snapshot value. On a
    /// staged new row the cell falls back to NULL.
    pub fn revert_cell(&mut self, row_id: u64, column_id: usize) -> Result<CellUpdateOutcome> {
        self.column(column_id)?;

        if let Some(created) = self.creates.get_mut(&row_id) {
            created[column_id] = Value::Null;
            return Ok(CellUpdateOutcome {
                cell: EditCell::new(Value::Null, true),
                row_dirty: true,
            });
        }

        let index = self.snapshot_index(row_id)?;
        if let Some(pending) = self.updates.get_mut(&row_id) {
            pending.remove(&column_id);
            if pending.is_empty() {
                self.updates.remove(&row_id);
            }
        }

        let original = self.rows[index][column_id].clone();
        let row_dirty = self.updates.contains_key(&row_id) || self.deletes.contains(&row_id);
        Ok(CellUpdateOutcome {
            cell: EditCell::new(original, false),
            row_dirty,
        })
    }

    /// Stages a new row with NULL defaults.
    pub fn create_row(&mut self) -> RowCreateOutcome {
        let row_id = self.next_row_id;
        self.next_row_id += 1;
        self.creates
            .insert(row_id, vec![Value::Null; self.columns.len()]);
        RowCreateOutcome {
            row_id,
            default_values: vec!["NULL".to_string(); self.columns.len()],
        }
    }

    /// Stages a row deletion. Deleting a staged new row discards it.
    pub fn delete_row(&mut self, row_id: u64) -> Result<()> {
        if self.creates.remove(&row_id).is_some() {
            return Ok(());
        }
        self.snapshot_index(row_id)?;
        self.updates.remove(&row_id);
        self.deletes.insert(row_id);
        Ok(())
    }

    /// Reverts all staged changes to a row.
    pub fn revert_row(&mut self, row_id: u64) -> Result<()> {
        if self.creates.remove(&row_id).is_some() {
            return Ok(());
        }
        self.snapshot_index(row_id)?;
        self.updates.remove(&row_id);
        self.deletes.remove(&row_id);
        Ok(())
    }

    /// Returns a page of the merged view: snapshot rows with staged
    /// changes overlaid, followed by staged creates.
    pub fn subset(&self, row_start: u64, row_count: u64) -> EditSubset {
        let merged = self.merged_rows();
        let start = (row_start as usize).min(merged.len());
        let end = (start + row_count as usize).min(merged.len());
        EditSubset {
            row_start,
            rows: merged[start..end].to_vec(),
        }
    }

    /// Renders the staged changes as SQL statements: deletes, then
    /// updates, then inserts.
    pub fn statements(&self) -> Vec<EditStatement> {
        let mut statements = Vec::new();

        for &row_id in &self.deletes {
            let key = self.keys[row_id as usize].clone();
            statements.push(EditStatement {
                sql: format!(
                    "DELETE FROM {} WHERE {} = $1::tid",
                    self.table,
                    quote_ident(&self.key_column)
                ),
                params: vec![key],
            });
        }

        let mut update_ids: Vec<_> = self.updates.keys().copied().collect();
        update_ids.sort_unstable();
        for row_id in update_ids {
            let pending = &self.updates[&row_id];
            let mut sets = Vec::new();
            let mut params = Vec::new();
            for (&column_id, value) in pending {
                let column = &self.columns[column_id];
                match value.to_sql_text() {
                    Some(text) => {
                        params.push(text);
                        sets.push(format!(
                            "{} = CAST(${} AS {})",
                            quote_ident(&column.name),
                            params.len(),
                            column.data_type
                        ));
                    }
                    None => sets.push(format!("{} = NULL", quote_ident(&column.name))),
                }
            }
            params.push(self.keys[row_id as usize].clone());
            statements.push(EditStatement {
                sql: format!(
                    "UPDATE {} SET {} WHERE {} = ${}::tid",
                    self.table,
                    sets.join(", "),
                    quote_ident(&self.key_column),
                    params.len()
                ),
                params,
            });
        }

        for created in self.creates.values() {
            let column_list = self
                .columns
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", ");
            let mut placeholders = Vec::new();
            let mut params = Vec::new();
            for (column, value) in self.columns.iter().zip(created) {
                match value.to_sql_text() {
                    Some(text) => {
                        params.push(text);
                        placeholders
                            .push(format!("CAST(${} AS {})", params.len(), column.data_type));
                    }
                    None => placeholders.push("NULL".to_string()),
                }
            }
            statements.push(EditStatement {
                sql: format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    self.table,
                    column_list,
                    placeholders.join(", ")
                ),
                params,
            });
        }

        statements
    }

    fn merged_rows(&self) -> Vec<EditRow> {
        let mut merged = Vec::with_capacity(self.rows.len() + self.creates.len());
        for (index, row) in self.rows.iter().enumerate() {
            let row_id = index as u64;
            let pending = self.updates.get(&row_id);
            let deleted = self.deletes.contains(&row_id);
            let cells = row
                .iter()
                .enumerate()
                .map(|(column_id, original)| {
                    match pending.and_then(|p| p.get(&column_id)) {
                        Some(staged) => EditCell::new(staged.clone(), true),
                        None => EditCell::new(original.clone(), false),
                    }
                })
                .collect();
            let state = if deleted {
                EditRowState::DirtyDelete
            } else if pending.is_some() {
                EditRowState::DirtyUpdate
            } else {
                EditRowState::Clean
            };
            merged.push(EditRow {
                id: row_id,
                cells,
                state,
            });
        }
        for (&row_id, created) in &self.creates {
            merged.push(EditRow {
                id: row_id,
                cells: created
                    .iter()
                    .map(|v| EditCell::new(v.clone(), true))
                    .collect(),
                state: EditRowState::DirtyInsert,
            });
        }
        merged
    }

    fn column(&self, column_id: usize) -> Result<&ColumnInfo> {
        self.columns.get(column_id).ok_or_else(|| {
            QueryMuxError::edit(format!(
                "column {column_id} out of range ({} columns)",
                self.columns.len()
            ))
        })
    }

    fn snapshot_index(&self, row_id: u64) -> Result<usize> {
        let index = row_id as usize;
        if index < self.rows.len() {
            Ok(index)
        } else {
            Err(QueryMuxError::edit(format!("no row {row_id} in edit cache")))
        }
    }
}

/// Parses user-entered cell text according to the column's reported type.
fn parse_typed(data_type: &str, text: &str) -> Result<Value> {
    match data_type.to_lowercase().as_str() {
        "bool" | "boolean" => match text.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Value::Bool(true)),
            "false" | "f" | "0" => Ok(Value::Bool(false)),
            _ => Err(QueryMuxError::edit(format!(
                "invalid boolean value: {text}"
            ))),
        },
        "int2" | "int4" | "int8" | "smallint" | "int" | "integer" | "bigint" => text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| QueryMuxError::edit(format!("invalid integer value: {text}"))),
        "float4" | "float8" | "real" | "double precision" => text
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| QueryMuxError::edit(format!("invalid numeric value: {text}"))),
        _ => Ok(Value::String(text.to_string())),
    }
}
