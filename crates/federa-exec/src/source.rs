//! The Data Manager collaborator.
//!
//! Access and update nodes never talk to a physical source directly.
//! They hand a compiled [`Command`] to a [`DataManager`], which returns a
//! [`RowStream`]. Streams may suspend while the remote side has nothing
//! ready, and must be closed explicitly.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{NodeId, ProcessId, Row, Schema, Value};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::expr::{evaluate_predicate, Expression};
use crate::poll::{Poll, PollResult};

/// A compiled sub-command for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Reads rows.
    Query {
        /// Table to read.
        table: String,
        /// Columns to return; empty returns every column.
        columns: Vec<usize>,
        /// Row filter over the table's columns.
        criteria: Option<Expression>,
    },
    /// Inserts rows.
    Insert {
        /// Target table.
        table: String,
        /// Rows to insert.
        rows: Vec<Row>,
    },
    /// Deletes the rows matching the criteria.
    Delete {
        /// Target table.
        table: String,
        /// Row filter; `None` deletes everything.
        criteria: Option<Expression>,
    },
}

impl Command {
    /// Returns the table the command targets.
    pub fn table(&self) -> &str {
        match self {
            Self::Query { table, .. } | Self::Insert { table, .. } | Self::Delete { table, .. } => {
                table
            }
        }
    }

    /// Returns the row filter, if any.
    pub fn criteria(&self) -> Option<&Expression> {
        match self {
            Self::Query { criteria, .. } | Self::Delete { criteria, .. } => criteria.as_ref(),
            Self::Insert { .. } => None,
        }
    }

    /// Returns a copy with a different row filter.
    pub fn with_criteria(&self, new_criteria: Option<Expression>) -> Self {
        match self {
            Self::Query { table, columns, .. } => Self::Query {
                table: table.clone(),
                columns: columns.clone(),
                criteria: new_criteria,
            },
            Self::Delete { table, .. } => Self::Delete {
                table: table.clone(),
                criteria: new_criteria,
            },
            Self::Insert { .. } => self.clone(),
        }
    }

    /// Returns true for commands that modify data.
    pub fn is_update(&self) -> bool {
        !matches!(self, Self::Query { .. })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query {
                table,
                columns,
                criteria,
            } => {
                if columns.is_empty() {
                    write!(f, "SELECT * FROM {table}")?;
                } else {
                    let cols: Vec<String> = columns.iter().map(|c| format!("#{c}")).collect();
                    write!(f, "SELECT {} FROM {table}", cols.join(", "))?;
                }
                if let Some(criteria) = criteria {
                    write!(f, " WHERE {criteria}")?;
                }
                Ok(())
            }
            Self::Insert { table, rows } => write!(f, "INSERT INTO {table} ({} rows)", rows.len()),
            Self::Delete { table, criteria } => {
                write!(f, "DELETE FROM {table}")?;
                if let Some(criteria) = criteria {
                    write!(f, " WHERE {criteria}")?;
                }
                Ok(())
            }
        }
    }
}

/// Rows returned by a submitted command.
pub trait RowStream: fmt::Debug {
    /// Returns the next row, `None` at the end, or Pending.
    fn next_row(&mut self) -> PollResult<Option<Row>>;

    /// Releases the stream. Calling this more than once is a no-op.
    fn close(&mut self);
}

/// Submits commands against named sources.
pub trait DataManager: fmt::Debug + Send + Sync {
    /// Submits `command` to `source_name` on behalf of `node_id`.
    fn submit(
        &self,
        process_id: ProcessId,
        command: &Command,
        source_name: &str,
        connection_hint: Option<&str>,
        node_id: NodeId,
    ) -> FederaResult<Box<dyn RowStream>>;
}

/// A command as received by the [`MemoryDataManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedCommand {
    /// Source the command was sent to.
    pub source_name: String,
    /// Submitting node.
    pub node_id: NodeId,
    /// The command.
    pub command: Command,
}

#[derive(Debug)]
struct MemoryTable {
    schema: Arc<Schema>,
    rows: Vec<Row>,
}

/// In-memory data manager.
///
/// Serves registered tables, records every submitted command, and can
/// make its streams suspend periodically to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemoryDataManager {
    tables: RwLock<HashMap<String, MemoryTable>>,
    submitted: Mutex<Vec<SubmittedCommand>>,
    failing_sources: RwLock<HashSet<String>>,
    open_streams: Arc<AtomicUsize>,
    suspend_every: usize,
}

impl MemoryDataManager {
    /// Creates an empty data manager whose streams never suspend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every stream suspend before its first row and then after
    /// every `rows` rows. Zero disables suspension.
    pub fn with_suspension(mut self, rows: usize) -> Self {
        self.suspend_every = rows;
        self
    }

    /// Registers a table, replacing any previous contents.
    pub fn register_table(&self, name: impl Into<String>, schema: Arc<Schema>, rows: Vec<Row>) {
        let name = name.into();
        debug!(table = %name, rows = rows.len(), "registered table");
        self.tables
            .write()
            .insert(name, MemoryTable { schema, rows });
    }

    /// Makes every command sent to `source_name` fail.
    pub fn fail_source(&self, source_name: impl Into<String>) {
        self.failing_sources.write().insert(source_name.into());
    }

    /// Returns the current rows of a table.
    pub fn table_rows(&self, name: &str) -> Option<Vec<Row>> {
        self.tables.read().get(name).map(|t| t.rows.clone())
    }

    /// Returns the schema of a table.
    pub fn table_schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.tables.read().get(name).map(|t| Arc::clone(&t.schema))
    }

    /// Returns every command submitted so far.
    pub fn submitted(&self) -> Vec<SubmittedCommand> {
        self.submitted.lock().clone()
    }

    /// Returns the number of streams not yet closed.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn execute(&self, command: &Command, source_name: &str) -> FederaResult<Vec<Row>> {
        let missing = || {
            FederaError::data_source(
                source_name,
                format!("table {} does not exist", command.table()),
            )
        };
        match command {
            Command::Query {
                table,
                columns,
                criteria,
            } => {
                let tables = self.tables.read();
                let table = tables.get(table).ok_or_else(missing)?;
                let mut out = Vec::new();
                for row in &table.rows {
                    if !matches_criteria(criteria.as_ref(), row)? {
                        continue;
                    }
                    if columns.is_empty() {
                        out.push(row.clone());
                    } else {
                        out.push(row.project(columns));
                    }
                }
                Ok(out)
            }
            Command::Insert { table, rows } => {
                let mut tables = self.tables.write();
                let table = tables.get_mut(table).ok_or_else(missing)?;
                if let Some(bad) = rows.iter().find(|r| r.len() != table.schema.len()) {
                    return Err(FederaError::processing(format!(
                        "cannot insert {bad} into a table with {} columns",
                        table.schema.len()
                    )));
                }
                table.rows.extend(rows.iter().cloned());
                Ok(vec![count_row(rows.len())])
            }
            Command::Delete { table, criteria } => {
                let mut tables = self.tables.write();
                let table = tables.get_mut(table).ok_or_else(missing)?;
                let mut kept = Vec::with_capacity(table.rows.len());
                let mut deleted = 0;
                for row in table.rows.drain(..) {
                    if matches_criteria(criteria.as_ref(), &row)? {
                        deleted += 1;
                    } else {
                        kept.push(row);
                    }
                }
                table.rows = kept;
                Ok(vec![count_row(deleted)])
            }
        }
    }
}

fn matches_criteria(criteria: Option<&Expression>, row: &Row) -> FederaResult<bool> {
    match criteria {
        Some(criteria) => evaluate_predicate(criteria, row, &[]),
        None => Ok(true),
    }
}

fn count_row(count: usize) -> Row {
    Row::new(vec![Value::BigInt(
        i64::try_from(count).unwrap_or(i64::MAX),
    )])
}

impl DataManager for MemoryDataManager {
    fn submit(
        &self,
        process_id: ProcessId,
        command: &Command,
        source_name: &str,
        _connection_hint: Option<&str>,
        node_id: NodeId,
    ) -> FederaResult<Box<dyn RowStream>> {
        debug!(%process_id, %node_id, source = source_name, %command, "submit");
        self.submitted.lock().push(SubmittedCommand {
            source_name: source_name.to_string(),
            node_id,
            command: command.clone(),
        });
        if self.failing_sources.read().contains(source_name) {
            return Err(FederaError::data_source(source_name, "source unavailable"));
        }
        let rows = self.execute(command, source_name)?;
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryRowStream {
            rows: rows.into_iter(),
            suspend_every: self.suspend_every,
            since_pause: self.suspend_every,
            open_streams: Some(Arc::clone(&self.open_streams)),
        }))
    }
}

/// Stream over rows computed at submit time.
struct MemoryRowStream {
    rows: std::vec::IntoIter<Row>,
    suspend_every: usize,
    since_pause: usize,
    open_streams: Option<Arc<AtomicUsize>>,
}

impl RowStream for MemoryRowStream {
    fn next_row(&mut self) -> PollResult<Option<Row>> {
        if self.open_streams.is_none() {
            return Err(FederaError::component("read from a closed row stream"));
        }
        if self.suspend_every > 0 && self.since_pause >= self.suspend_every {
            self.since_pause = 0;
            trace!("row stream suspended");
            return Ok(Poll::Pending);
        }
        let row = self.rows.next();
        if row.is_some() {
            self.since_pause += 1;
        }
        Ok(Poll::Ready(row))
    }

    fn close(&mut self) {
        if let Some(open) = self.open_streams.take() {
            open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryRowStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for MemoryRowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRowStream")
            .field("remaining", &self.rows.len())
            .field("closed", &self.open_streams.is_none())
            .finish()
    }
}
