//! # Leader Engine
//!
//! The engine is the single owner of the SQLite connection. It runs on one
//! dedicated OS thread and serves every database request in the process:
//! requests relayed from follower peers by the server, and requests from the
//! leader process's own commands, all through the same channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Clients                               │
//! │   local workers                  follower peers (server)     │
//! └────────┬─────────────────────────────────┬───────────────────┘
//!          │                                 │
//!          └────────── EngineHandle ─────────┘
//!                          │  (mpsc, arrival order = execution order)
//!                          ▼
//!               ┌─────────────────────┐
//!               │    Engine thread    │
//!               │                     │
//!               │  statements table   │
//!               │  cursors table      │
//!               │  SQLite connection  │
//!               └─────────────────────┘
//! ```
//!
//! ## Single Writer Invariant
//!
//! Spawning the engine consumes the connection, so nothing else in the
//! process can touch SQLite. Requests are executed strictly in channel
//! arrival order: one follower's requests stay FIFO, and fairness across
//! followers is round-robin per inbound frame.
//!
//! ## Handle Tables
//!
//! Statements and cursors are arenas keyed by opaque handles. Handles come
//! from a strictly monotonic 128-bit counter and are never reused; an
//! insert that finds its key occupied is a bug and panics. When a peer
//! disconnects, every handle it owned is finalized in creation order.
//!
//! ## Cursor Representation
//!
//! rusqlite statements borrow the connection, so a live `Rows` cannot sit in
//! a table beside the connection that owns it. A cursor instead captures its
//! result rows as owned values when the reader opens, and `Read` steps
//! through the capture. The wire-visible sequencing — `has_row` per step,
//! value access only while on a row, terminality after the last row — is
//! identical to stepping the statement directly.

use std::collections::{HashMap, VecDeque};
use std::thread;

use rusqlite::types::Value;
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::options::ConnectionOptions;
use crate::types::{
    CellValue, ColumnDescriptor, CommandBehavior, CursorId, HandleAllocator, PeerId, SqliteType,
    StatementHandle,
};

// =============================================================================
// Requests
// =============================================================================

/// Which typed read a `GetValue` request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Int16,
    Int32,
    Int64,
    FieldType,
}

impl ValueKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Str => "string",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::FieldType => "field type",
        }
    }
}

/// Request types for the engine thread.
pub enum EngineRequest {
    CreateCommand {
        peer: PeerId,
        sql: String,
        reply: oneshot::Sender<Result<StatementHandle>>,
    },
    /// Fire-and-forget; absent handles are silently ignored.
    Dispose { handle: StatementHandle },
    ExecuteNonQuery {
        handle: StatementHandle,
        reply: oneshot::Sender<Result<i32>>,
    },
    ExecuteReader {
        handle: StatementHandle,
        behavior: CommandBehavior,
        reply: oneshot::Sender<Result<Vec<ColumnDescriptor>>>,
    },
    Read {
        handle: StatementHandle,
        reply: oneshot::Sender<Result<bool>>,
    },
    GetOrdinal {
        handle: StatementHandle,
        name: String,
        reply: oneshot::Sender<Result<i32>>,
    },
    GetValue {
        handle: StatementHandle,
        ordinal: u16,
        kind: ValueKind,
        reply: oneshot::Sender<Result<CellValue>>,
    },
    /// Finalizes every handle the peer owns, in creation order.
    PeerDisconnected { peer: PeerId },
    /// Stops the engine thread; the connection is dropped with it.
    Shutdown,
}

// =============================================================================
// Engine Handle
// =============================================================================

/// Async handle to the engine thread. Cheap to clone; all clones share the
/// same channel and thread.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    request_tx: mpsc::UnboundedSender<EngineRequest>,
}

impl EngineHandle {
    pub async fn create_command(&self, peer: PeerId, sql: String) -> Result<StatementHandle> {
        self.call(|reply| EngineRequest::CreateCommand { peer, sql, reply })
            .await
    }

    pub async fn execute_non_query(&self, handle: StatementHandle) -> Result<i32> {
        self.call(|reply| EngineRequest::ExecuteNonQuery { handle, reply })
            .await
    }

    pub async fn execute_reader(
        &self,
        handle: StatementHandle,
        behavior: CommandBehavior,
    ) -> Result<Vec<ColumnDescriptor>> {
        self.call(|reply| EngineRequest::ExecuteReader {
            handle,
            behavior,
            reply,
        })
        .await
    }

    pub async fn read(&self, handle: StatementHandle) -> Result<bool> {
        self.call(|reply| EngineRequest::Read { handle, reply }).await
    }

    pub async fn get_ordinal(&self, handle: StatementHandle, name: String) -> Result<i32> {
        self.call(|reply| EngineRequest::GetOrdinal { handle, name, reply })
            .await
    }

    pub async fn get_value(
        &self,
        handle: StatementHandle,
        ordinal: u16,
        kind: ValueKind,
    ) -> Result<CellValue> {
        self.call(|reply| EngineRequest::GetValue {
            handle,
            ordinal,
            kind,
            reply,
        })
        .await
    }

    /// Best-effort disposal; usable from `Drop`.
    pub fn dispose(&self, handle: StatementHandle) {
        let _ = self.request_tx.send(EngineRequest::Dispose { handle });
    }

    pub fn peer_disconnected(&self, peer: PeerId) {
        let _ = self
            .request_tx
            .send(EngineRequest::PeerDisconnected { peer });
    }

    /// Stops the engine. Requests already queued ahead of the shutdown are
    /// still served.
    pub fn shutdown(&self) {
        let _ = self.request_tx.send(EngineRequest::Shutdown);
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> EngineRequest,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(make(reply_tx))
            .map_err(|_| Error::Disconnected)?;
        reply_rx.await.map_err(|_| Error::Disconnected)?
    }
}

/// Spawns the engine on a dedicated thread, consuming the connection.
pub fn spawn_engine(conn: Connection) -> EngineHandle {
    let (request_tx, request_rx) = mpsc::unbounded_channel();

    thread::Builder::new()
        .name("soledb-engine".to_string())
        .spawn(move || {
            run_engine(Engine::new(conn), request_rx);
        })
        .expect("failed to spawn engine thread");

    EngineHandle { request_tx }
}

/// Opens the database named by the options and applies forwarded pragmas.
///
/// File-backed databases get WAL mode before the forwarded pragmas run, so a
/// connection string can still override it.
pub fn open_database(options: &ConnectionOptions) -> Result<Connection> {
    let conn = if options.data_source == ":memory:" {
        Connection::open_in_memory()?
    } else {
        let conn = Connection::open(&options.data_source)?;
        conn.execute_batch("PRAGMA journal_mode = WAL")?;
        conn
    };

    for (key, value) in &options.pragmas {
        conn.execute_batch(&format!("PRAGMA {} = {}", key, value))?;
    }

    Ok(conn)
}

// =============================================================================
// Engine
// =============================================================================

struct StatementEntry {
    sql: String,
    owner: PeerId,
    /// Creation sequence, for finalizing a peer's handles in order.
    seq: u64,
}

struct Cursor {
    id: CursorId,
    columns: Vec<ColumnDescriptor>,
    rows: VecDeque<Vec<Value>>,
    current: Option<Vec<Value>>,
    done: bool,
}

struct Engine {
    conn: Connection,
    statements: HashMap<StatementHandle, StatementEntry>,
    cursors: HashMap<StatementHandle, Cursor>,
    allocator: HandleAllocator,
    next_seq: u64,
}

fn run_engine(mut engine: Engine, mut request_rx: mpsc::UnboundedReceiver<EngineRequest>) {
    while let Some(request) = request_rx.blocking_recv() {
        match request {
            EngineRequest::CreateCommand { peer, sql, reply } => {
                let _ = reply.send(engine.create_command(peer, &sql));
            }
            EngineRequest::Dispose { handle } => engine.dispose(handle),
            EngineRequest::ExecuteNonQuery { handle, reply } => {
                let _ = reply.send(engine.execute_non_query(handle));
            }
            EngineRequest::ExecuteReader {
                handle,
                behavior,
                reply,
            } => {
                let _ = reply.send(engine.execute_reader(handle, behavior));
            }
            EngineRequest::Read { handle, reply } => {
                let _ = reply.send(engine.read(handle));
            }
            EngineRequest::GetOrdinal { handle, name, reply } => {
                let _ = reply.send(engine.get_ordinal(handle, &name));
            }
            EngineRequest::GetValue {
                handle,
                ordinal,
                kind,
                reply,
            } => {
                let _ = reply.send(engine.get_value(handle, ordinal, kind));
            }
            EngineRequest::PeerDisconnected { peer } => engine.peer_disconnected(peer),
            EngineRequest::Shutdown => break,
        }
    }
    debug!("engine stopped");
}

impl Engine {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            statements: HashMap::new(),
            cursors: HashMap::new(),
            allocator: HandleAllocator::new(),
            next_seq: 0,
        }
    }

    fn create_command(&mut self, peer: PeerId, sql: &str) -> Result<StatementHandle> {
        if sql.trim().is_empty() {
            return Err(Error::InvalidOperation(
                "command text is empty or whitespace".to_string(),
            ));
        }

        // Validate now so a syntax error surfaces at creation; the statement
        // cache keeps the re-preparation at execute time cheap.
        self.conn.prepare_cached(sql).map(|_| ())?;

        let handle = self.allocator.next_statement();
        let seq = self.next_seq;
        self.next_seq += 1;

        let previous = self.statements.insert(
            handle,
            StatementEntry {
                sql: sql.to_string(),
                owner: peer,
                seq,
            },
        );
        assert!(previous.is_none(), "statement handle reused: {}", handle);

        debug!(%handle, %peer, "prepared statement");
        Ok(handle)
    }

    fn dispose(&mut self, handle: StatementHandle) {
        let statement = self.statements.remove(&handle);
        match self.cursors.remove(&handle) {
            Some(cursor) => debug!(%handle, cursor = %cursor.id, "disposed statement and cursor"),
            None if statement.is_some() => debug!(%handle, "disposed statement"),
            None => {}
        }
    }

    fn execute_non_query(&mut self, handle: StatementHandle) -> Result<i32> {
        let sql = self.entry(handle)?.sql.clone();

        {
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let mut rows = stmt.query([])?;
            // A statement that unexpectedly produces rows is drained; the
            // caller only sees the change count.
            while rows.next()?.is_some() {}
        }

        Ok(i32::try_from(self.conn.changes()).unwrap_or(i32::MAX))
    }

    fn execute_reader(
        &mut self,
        handle: StatementHandle,
        behavior: CommandBehavior,
    ) -> Result<Vec<ColumnDescriptor>> {
        let sql = self.entry(handle)?.sql.clone();
        let cursor_id = self.allocator.next_cursor();

        let (names, decls, rows) = {
            let mut stmt = self.conn.prepare_cached(&sql)?;

            let (names, decls): (Vec<String>, Vec<Option<String>>) = stmt
                .columns()
                .iter()
                .map(|c| (c.name().to_string(), c.decl_type().map(str::to_string)))
                .unzip();

            let mut collected: VecDeque<Vec<Value>> = VecDeque::new();
            if !behavior.schema_only() {
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let mut values = Vec::with_capacity(names.len());
                    for i in 0..names.len() {
                        values.push(row.get::<_, Value>(i)?);
                    }
                    collected.push_back(values);
                    if behavior.single_row() {
                        break;
                    }
                }
            }
            (names, decls, collected)
        };

        let columns: Vec<ColumnDescriptor> = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| ColumnDescriptor {
                ordinal: i as u16,
                name,
                sqlite_type: column_type(rows.front().map(|row| &row[i]), decls[i].as_deref()),
            })
            .collect();

        debug!(%handle, %cursor_id, columns = columns.len(), rows = rows.len(), "opened reader");

        // A second ExecuteReader on the same statement replaces its cursor.
        self.cursors.insert(
            handle,
            Cursor {
                id: cursor_id,
                columns: columns.clone(),
                rows,
                current: None,
                done: false,
            },
        );

        Ok(columns)
    }

    fn read(&mut self, handle: StatementHandle) -> Result<bool> {
        let cursor = self.cursor(handle)?;
        if cursor.done {
            return Ok(false);
        }
        match cursor.rows.pop_front() {
            Some(row) => {
                cursor.current = Some(row);
                Ok(true)
            }
            None => {
                cursor.current = None;
                cursor.done = true;
                Ok(false)
            }
        }
    }

    fn get_ordinal(&mut self, handle: StatementHandle, name: &str) -> Result<i32> {
        let cursor = self.cursor(handle)?;
        Ok(cursor
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| i32::from(c.ordinal))
            .unwrap_or(-1))
    }

    fn get_value(
        &mut self,
        handle: StatementHandle,
        ordinal: u16,
        kind: ValueKind,
    ) -> Result<CellValue> {
        let cursor = self.cursor(handle)?;

        let column_count = cursor.columns.len();
        if usize::from(ordinal) >= column_count {
            return Err(Error::InvalidOperation(format!(
                "ordinal {} out of range ({} columns)",
                ordinal, column_count
            )));
        }

        let row = cursor.current.as_ref().ok_or_else(|| {
            Error::InvalidOperation("reader is not positioned on a row".to_string())
        })?;
        let value = &row[usize::from(ordinal)];
        let column = &cursor.columns[usize::from(ordinal)];

        match kind {
            ValueKind::FieldType => Ok(CellValue::FieldType(value_type(value))),
            ValueKind::Str => match value {
                Value::Text(text) => Ok(CellValue::Str(text.clone())),
                other => Err(type_mismatch(column, other, kind)),
            },
            ValueKind::Int16 => match value {
                Value::Integer(v) => i16::try_from(*v)
                    .map(CellValue::Int16)
                    .map_err(|_| narrowing_error(*v, kind)),
                other => Err(type_mismatch(column, other, kind)),
            },
            ValueKind::Int32 => match value {
                Value::Integer(v) => i32::try_from(*v)
                    .map(CellValue::Int32)
                    .map_err(|_| narrowing_error(*v, kind)),
                other => Err(type_mismatch(column, other, kind)),
            },
            ValueKind::Int64 => match value {
                Value::Integer(v) => Ok(CellValue::Int64(*v)),
                other => Err(type_mismatch(column, other, kind)),
            },
        }
    }

    fn peer_disconnected(&mut self, peer: PeerId) {
        let mut owned: Vec<(u64, StatementHandle)> = self
            .statements
            .iter()
            .filter(|(_, entry)| entry.owner == peer)
            .map(|(handle, entry)| (entry.seq, *handle))
            .collect();
        owned.sort_unstable();

        if owned.is_empty() {
            return;
        }

        info!(%peer, handles = owned.len(), "finalizing handles of disconnected peer");
        for (_, handle) in owned {
            self.dispose(handle);
        }
    }

    fn entry(&self, handle: StatementHandle) -> Result<&StatementEntry> {
        self.statements.get(&handle).ok_or_else(|| {
            warn!(%handle, "request for unknown statement handle");
            Error::InvalidOperation(format!("unknown statement handle {}", handle))
        })
    }

    fn cursor(&mut self, handle: StatementHandle) -> Result<&mut Cursor> {
        // The statement must still exist; its cursor is created by
        // ExecuteReader.
        if !self.statements.contains_key(&handle) {
            return Err(Error::InvalidOperation(format!(
                "unknown statement handle {}",
                handle
            )));
        }
        self.cursors.get_mut(&handle).ok_or_else(|| {
            Error::InvalidOperation(format!("no open reader for statement {}", handle))
        })
    }
}

// =============================================================================
// Value Helpers
// =============================================================================

fn value_type(value: &Value) -> SqliteType {
    match value {
        Value::Integer(_) => SqliteType::Integer,
        Value::Real(_) => SqliteType::Real,
        Value::Text(_) => SqliteType::Text,
        Value::Blob(_) => SqliteType::Blob,
        Value::Null => SqliteType::Null,
    }
}

/// Chooses a column's descriptor type: the first row's value when one
/// exists, otherwise SQLite's declared-type affinity, otherwise NULL.
fn column_type(first_value: Option<&Value>, decl_type: Option<&str>) -> SqliteType {
    if let Some(value) = first_value {
        let ty = value_type(value);
        if ty != SqliteType::Null {
            return ty;
        }
    }

    match decl_type {
        Some(decl) => {
            let decl = decl.to_ascii_uppercase();
            if decl.contains("INT") {
                SqliteType::Integer
            } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
                SqliteType::Text
            } else if decl.contains("BLOB") {
                SqliteType::Blob
            } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
                SqliteType::Real
            } else {
                SqliteType::Null
            }
        }
        None => SqliteType::Null,
    }
}

fn type_mismatch(column: &ColumnDescriptor, value: &Value, kind: ValueKind) -> Error {
    Error::InvalidOperation(format!(
        "cannot read {} column '{}' as {}",
        value_type(value),
        column.name,
        kind.name()
    ))
}

fn narrowing_error(value: i64, kind: ValueKind) -> Error {
    Error::InvalidOperation(format!(
        "integer {} out of range for a {} read",
        value,
        kind.name()
    ))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(Connection::open_in_memory().expect("open in-memory database"))
    }

    fn create(engine: &mut Engine, sql: &str) -> StatementHandle {
        engine.create_command(PeerId::LOCAL, sql).expect("create command")
    }

    /// Scenarios: create a table (changes = 0), insert (changes = 1).
    #[test]
    fn non_query_reports_the_change_count() {
        let mut eng = engine();

        let create_table = create(&mut eng, "CREATE TABLE t(x INTEGER)");
        assert_eq!(eng.execute_non_query(create_table).unwrap(), 0);
        eng.dispose(create_table);

        let insert = create(&mut eng, "INSERT INTO t VALUES(42)");
        assert_eq!(eng.execute_non_query(insert).unwrap(), 1);
    }

    /// A SELECT routed through ExecuteNonQuery drains its rows instead of
    /// failing.
    #[test]
    fn non_query_drains_unexpected_rows() {
        let mut eng = engine();
        eng.conn
            .execute_batch("CREATE TABLE t(x); INSERT INTO t VALUES(1),(2)")
            .unwrap();

        let select = create(&mut eng, "SELECT x FROM t");
        assert!(eng.execute_non_query(select).is_ok());
    }

    #[test]
    fn empty_sql_is_an_invalid_operation() {
        let mut eng = engine();
        for sql in ["", "   ", "\t\n"] {
            let err = eng.create_command(PeerId::LOCAL, sql).unwrap_err();
            assert!(matches!(err, Error::InvalidOperation(_)), "sql {:?}", sql);
        }
    }

    #[test]
    fn bad_sql_fails_at_creation_with_sqlite_message() {
        let mut eng = engine();
        let err = eng.create_command(PeerId::LOCAL, "NOT SQL").unwrap_err();
        assert!(matches!(err, Error::Sqlite(_)));
        assert!(err.to_string().contains("syntax error"));
    }

    /// Handles stay unique even after disposal frees their table slots.
    #[test]
    fn handles_are_never_reused() {
        let mut eng = engine();
        let mut seen = std::collections::HashSet::new();

        for _ in 0..10 {
            let handle = create(&mut eng, "SELECT 1");
            assert!(seen.insert(handle), "handle {} reused", handle);
            eng.dispose(handle);
        }
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut eng = engine();
        let handle = create(&mut eng, "SELECT 1");

        eng.dispose(handle);
        eng.dispose(handle);

        assert!(eng.statements.is_empty());
        assert!(eng.cursors.is_empty());
    }

    /// Scenario: one row of one INTEGER column, stepped to exhaustion.
    #[test]
    fn reader_steps_through_rows_and_stays_terminal() {
        let mut eng = engine();
        eng.conn
            .execute_batch("CREATE TABLE t(x INTEGER); INSERT INTO t VALUES(42)")
            .unwrap();

        let handle = create(&mut eng, "SELECT x FROM t");
        let columns = eng.execute_reader(handle, CommandBehavior::DEFAULT).unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "x");
        assert_eq!(columns[0].sqlite_type, SqliteType::Integer);

        assert!(eng.read(handle).unwrap());
        assert_eq!(
            eng.get_value(handle, 0, ValueKind::Int32).unwrap(),
            CellValue::Int32(42)
        );
        assert_eq!(
            eng.get_value(handle, 0, ValueKind::FieldType).unwrap(),
            CellValue::FieldType(SqliteType::Integer)
        );

        assert!(!eng.read(handle).unwrap());
        assert!(!eng.read(handle).unwrap());

        // Past the end the current row is gone.
        let err = eng.get_value(handle, 0, ValueKind::Int32).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn get_before_read_is_rejected() {
        let mut eng = engine();
        eng.conn.execute_batch("CREATE TABLE t(x)").unwrap();

        let handle = create(&mut eng, "SELECT x FROM t");
        eng.execute_reader(handle, CommandBehavior::DEFAULT).unwrap();

        let err = eng.get_value(handle, 0, ValueKind::Int32).unwrap_err();
        assert!(err.to_string().contains("not positioned on a row"));
    }

    #[test]
    fn ordinal_lookup_is_case_insensitive_and_minus_one_when_absent() {
        let mut eng = engine();
        eng.conn
            .execute_batch("CREATE TABLE t(x INTEGER, Label TEXT)")
            .unwrap();

        let handle = create(&mut eng, "SELECT x, Label FROM t");
        eng.execute_reader(handle, CommandBehavior::DEFAULT).unwrap();

        assert_eq!(eng.get_ordinal(handle, "X").unwrap(), 0);
        assert_eq!(eng.get_ordinal(handle, "label").unwrap(), 1);
        assert_eq!(eng.get_ordinal(handle, "missing").unwrap(), -1);
    }

    #[test]
    fn typed_reads_enforce_type_and_range() {
        let mut eng = engine();
        eng.conn
            .execute_batch(
                "CREATE TABLE t(n INTEGER, s TEXT, z INTEGER);
                 INSERT INTO t VALUES(70000, 'hello', NULL)",
            )
            .unwrap();

        let handle = create(&mut eng, "SELECT n, s, z FROM t");
        eng.execute_reader(handle, CommandBehavior::DEFAULT).unwrap();
        assert!(eng.read(handle).unwrap());

        // In-range typed reads.
        assert_eq!(
            eng.get_value(handle, 0, ValueKind::Int32).unwrap(),
            CellValue::Int32(70_000)
        );
        assert_eq!(
            eng.get_value(handle, 0, ValueKind::Int64).unwrap(),
            CellValue::Int64(70_000)
        );
        assert_eq!(
            eng.get_value(handle, 1, ValueKind::Str).unwrap(),
            CellValue::Str("hello".to_string())
        );

        // 70000 does not fit an i16.
        let err = eng.get_value(handle, 0, ValueKind::Int16).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        // Wrong column type.
        let err = eng.get_value(handle, 1, ValueKind::Int32).unwrap_err();
        assert!(err.to_string().contains("cannot read"));

        // NULL has a field type but no integer reading.
        assert_eq!(
            eng.get_value(handle, 2, ValueKind::FieldType).unwrap(),
            CellValue::FieldType(SqliteType::Null)
        );
        assert!(eng.get_value(handle, 2, ValueKind::Int64).is_err());

        // Ordinal past the column list.
        let err = eng.get_value(handle, 3, ValueKind::Int32).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn schema_only_and_single_row_behaviors() {
        let mut eng = engine();
        eng.conn
            .execute_batch("CREATE TABLE t(x INTEGER); INSERT INTO t VALUES(1),(2),(3)")
            .unwrap();

        let schema = create(&mut eng, "SELECT x FROM t");
        let columns = eng
            .execute_reader(schema, CommandBehavior::SCHEMA_ONLY)
            .unwrap();
        assert_eq!(columns.len(), 1);
        assert!(!eng.read(schema).unwrap());

        let single = create(&mut eng, "SELECT x FROM t");
        eng.execute_reader(single, CommandBehavior::SINGLE_ROW)
            .unwrap();
        assert!(eng.read(single).unwrap());
        assert!(!eng.read(single).unwrap());
    }

    /// Without rows, the descriptor type falls back to the declared column
    /// type.
    #[test]
    fn column_types_fall_back_to_declared_affinity() {
        let mut eng = engine();
        eng.conn
            .execute_batch("CREATE TABLE t(a INTEGER, b VARCHAR(10), c BLOB, d DOUBLE, e)")
            .unwrap();

        let handle = create(&mut eng, "SELECT a, b, c, d, e FROM t");
        let columns = eng.execute_reader(handle, CommandBehavior::DEFAULT).unwrap();

        let types: Vec<SqliteType> = columns.iter().map(|c| c.sqlite_type).collect();
        assert_eq!(
            types,
            vec![
                SqliteType::Integer,
                SqliteType::Text,
                SqliteType::Blob,
                SqliteType::Real,
                SqliteType::Null,
            ]
        );
    }

    #[test]
    fn peer_disconnect_finalizes_only_that_peers_handles() {
        let mut eng = engine();
        let peer_a = PeerId::from_raw(1);
        let peer_b = PeerId::from_raw(2);

        let a1 = eng.create_command(peer_a, "SELECT 1").unwrap();
        let b1 = eng.create_command(peer_b, "SELECT 2").unwrap();
        let a2 = eng.create_command(peer_a, "SELECT 3").unwrap();

        eng.peer_disconnected(peer_a);

        assert!(!eng.statements.contains_key(&a1));
        assert!(!eng.statements.contains_key(&a2));
        assert!(eng.statements.contains_key(&b1));
    }

    #[test]
    fn reopening_a_reader_replaces_the_cursor() {
        let mut eng = engine();
        eng.conn
            .execute_batch("CREATE TABLE t(x INTEGER); INSERT INTO t VALUES(1)")
            .unwrap();

        let handle = create(&mut eng, "SELECT x FROM t");
        eng.execute_reader(handle, CommandBehavior::DEFAULT).unwrap();
        assert!(eng.read(handle).unwrap());
        assert!(!eng.read(handle).unwrap());

        // A second open rewinds: the fresh cursor sees the row again.
        eng.execute_reader(handle, CommandBehavior::DEFAULT).unwrap();
        assert!(eng.read(handle).unwrap());
    }
}
