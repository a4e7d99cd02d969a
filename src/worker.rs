//! # Command and Reader Workers
//!
//! Workers are the seam between the client facade and wherever the database
//! actually lives. A command worker owns one leader-side statement handle; a
//! reader worker shares that handle and drives its cursor.
//!
//! Every worker holds a [`WorkerLink`]:
//!
//! - `Remote` — the connection is a follower; operations encode protocol
//!   messages, relay them over the transport, and decode the correlated
//!   reply. Exception replies surface as [`Error::Server`] carrying the
//!   leader's message verbatim.
//! - `Local` — the connection is the leader; the same operations go straight
//!   to the in-process engine channel.
//!
//! The two arms answer identically, which is what lets callers not know
//! whether the database is local or remote. A worker is bound to the link
//! that created it: when the transport closes or the engine stops, pending
//! and future operations fail with `Disconnected`.
//!
//! ## Handle Lifetime
//!
//! The command worker and any reader worker spawned from it share one
//! [`WorkerCore`]. Explicit disposal releases the leader-side statement at
//! once (taking the open cursor with it); otherwise the statement lives
//! until the last sharer drops, so an open reader keeps its statement alive
//! after the command goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::engine::{EngineHandle, ValueKind};
use crate::error::{Error, Result};
use crate::protocol::{parse_cell_value, parse_column_list, parse_has_row, Message};
use crate::transport::Transport;
use crate::types::{
    CellValue, ColumnDescriptor, CommandBehavior, PeerId, SqliteType, StatementHandle,
};

// =============================================================================
// Worker Link
// =============================================================================

/// Where a worker's requests go.
#[derive(Clone, Debug)]
pub enum WorkerLink {
    /// Straight into this process's engine.
    Local(EngineHandle),
    /// Over the wire to the elected leader.
    Remote(Arc<Transport>),
}

/// Extracts the message text an exception reply would carry for this error.
///
/// The leader sends its SQLite and validation messages without the crate's
/// error-display prefixes, so a follower re-wrapping the text observes the
/// exact message the leader produced.
pub(crate) fn exception_text(error: &Error) -> String {
    match error {
        Error::Sqlite(inner) => inner.to_string(),
        Error::InvalidOperation(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Engine-reported failures surface to callers the way remote exceptions do.
fn as_server_error(error: Error) -> Error {
    match error {
        Error::Disconnected | Error::Timeout(_) => error,
        other => Error::Server(exception_text(&other)),
    }
}

fn unexpected_reply(message: &Message) -> Error {
    Error::Protocol(format!("unexpected reply kind {:?}", message.kind()))
}

// =============================================================================
// Worker Core
// =============================================================================

/// The state a command worker and its reader workers share: the link, the
/// statement handle, and the disposed flag.
#[derive(Debug)]
struct WorkerCore {
    link: WorkerLink,
    handle: StatementHandle,
    timeout: Option<Duration>,
    disposed: AtomicBool,
}

impl WorkerCore {
    /// Releases the leader-side statement. Idempotent and best-effort:
    /// failures are logged and swallowed, and concurrent disposals both
    /// succeed.
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.link {
            WorkerLink::Local(engine) => engine.dispose(self.handle),
            WorkerLink::Remote(transport) => {
                if let Err(error) =
                    transport.send(0, &Message::DisposeCommand { handle: self.handle })
                {
                    debug!(handle = %self.handle, %error, "dispose not delivered");
                }
            }
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::ObjectDisposed("Command"));
        }
        Ok(())
    }
}

impl Drop for WorkerCore {
    fn drop(&mut self) {
        self.dispose();
    }
}

// =============================================================================
// Command Worker
// =============================================================================

/// Follower-or-local proxy for one prepared statement.
#[derive(Debug)]
pub struct CommandWorker {
    core: Arc<WorkerCore>,
}

impl CommandWorker {
    /// Prepares `sql` on the leader and binds the returned handle.
    pub async fn create(link: WorkerLink, sql: String, timeout: Option<Duration>) -> Result<Self> {
        let handle = match &link {
            WorkerLink::Local(engine) => engine
                .create_command(PeerId::LOCAL, sql)
                .await
                .map_err(as_server_error)?,
            WorkerLink::Remote(transport) => {
                let reply = transport
                    .send_and_wait(Message::CreateCommandRequest { sql }, timeout)
                    .await?;
                match reply {
                    Message::CreateCommandResponse { handle } => handle,
                    Message::CreateCommandException { message } => {
                        return Err(Error::Server(message));
                    }
                    other => return Err(unexpected_reply(&other)),
                }
            }
        };

        Ok(Self {
            core: Arc::new(WorkerCore {
                link,
                handle,
                timeout,
                disposed: AtomicBool::new(false),
            }),
        })
    }

    pub fn handle(&self) -> StatementHandle {
        self.core.handle
    }

    /// Runs the statement to completion and returns the change count.
    pub async fn execute_non_query(&self) -> Result<i32> {
        self.core.ensure_live()?;
        match &self.core.link {
            WorkerLink::Local(engine) => engine
                .execute_non_query(self.core.handle)
                .await
                .map_err(as_server_error),
            WorkerLink::Remote(transport) => {
                let reply = transport
                    .send_and_wait(
                        Message::ExecuteNonQueryRequest {
                            handle: self.core.handle,
                        },
                        self.core.timeout,
                    )
                    .await?;
                match reply {
                    Message::ExecuteNonQueryResponse { changes } => Ok(changes),
                    Message::ExecuteNonQueryException { message } => Err(Error::Server(message)),
                    other => Err(unexpected_reply(&other)),
                }
            }
        }
    }

    /// Opens a cursor and returns a reader worker plus the column
    /// descriptors the leader captured. The reader shares this worker's
    /// statement, which stays alive while either is held.
    pub async fn execute_reader(
        &self,
        behavior: CommandBehavior,
    ) -> Result<(ReaderWorker, Vec<ColumnDescriptor>)> {
        self.core.ensure_live()?;
        let columns = match &self.core.link {
            WorkerLink::Local(engine) => engine
                .execute_reader(self.core.handle, behavior)
                .await
                .map_err(as_server_error)?,
            WorkerLink::Remote(transport) => {
                let reply = transport
                    .send_and_wait(
                        Message::ExecuteReaderRequest {
                            handle: self.core.handle,
                            behavior,
                        },
                        self.core.timeout,
                    )
                    .await?;
                match reply {
                    Message::ExecuteReaderResponse { body } => parse_column_list(&body)?,
                    Message::ExecuteReaderException { message } => {
                        return Err(Error::Server(message));
                    }
                    other => return Err(unexpected_reply(&other)),
                }
            }
        };

        let reader = ReaderWorker {
            core: Arc::clone(&self.core),
        };
        Ok((reader, columns))
    }

    /// Releases the leader-side statement now, open readers included.
    pub fn dispose(&self) {
        self.core.dispose();
    }
}

// =============================================================================
// Reader Worker
// =============================================================================

/// Drives the cursor of a command worker's statement. Gets are not cached
/// client-side; every access asks the leader for the value.
#[derive(Debug)]
pub struct ReaderWorker {
    core: Arc<WorkerCore>,
}

impl ReaderWorker {
    /// Steps the cursor one row.
    pub async fn read(&self) -> Result<bool> {
        self.core.ensure_live()?;
        match &self.core.link {
            WorkerLink::Local(engine) => engine
                .read(self.core.handle)
                .await
                .map_err(as_server_error),
            WorkerLink::Remote(transport) => {
                let reply = transport
                    .send_and_wait(
                        Message::ExecuteReaderReadRequest {
                            handle: self.core.handle,
                        },
                        self.core.timeout,
                    )
                    .await?;
                match reply {
                    Message::ExecuteReaderResponse { body } => parse_has_row(&body),
                    Message::ExecuteReaderException { message } => Err(Error::Server(message)),
                    other => Err(unexpected_reply(&other)),
                }
            }
        }
    }

    /// Case-insensitive column lookup; `-1` when the name is absent.
    pub async fn get_ordinal(&self, name: &str) -> Result<i32> {
        self.core.ensure_live()?;
        match &self.core.link {
            WorkerLink::Local(engine) => engine
                .get_ordinal(self.core.handle, name.to_string())
                .await
                .map_err(as_server_error),
            WorkerLink::Remote(transport) => {
                let reply = transport
                    .send_and_wait(
                        Message::ExecuteReaderGetOrdinalRequest {
                            handle: self.core.handle,
                            name: name.to_string(),
                        },
                        self.core.timeout,
                    )
                    .await?;
                match decode_value(reply)? {
                    CellValue::Int32(ordinal) => Ok(ordinal),
                    other => Err(Error::Protocol(format!(
                        "ordinal reply carried tag {}",
                        other.tag()
                    ))),
                }
            }
        }
    }

    pub async fn get_string(&self, ordinal: u16) -> Result<String> {
        match self.get_value(ordinal, ValueKind::Str).await? {
            CellValue::Str(value) => Ok(value),
            other => Err(self.tag_error(other)),
        }
    }

    pub async fn get_int16(&self, ordinal: u16) -> Result<i16> {
        match self.get_value(ordinal, ValueKind::Int16).await? {
            CellValue::Int16(value) => Ok(value),
            other => Err(self.tag_error(other)),
        }
    }

    pub async fn get_int32(&self, ordinal: u16) -> Result<i32> {
        match self.get_value(ordinal, ValueKind::Int32).await? {
            CellValue::Int32(value) => Ok(value),
            other => Err(self.tag_error(other)),
        }
    }

    pub async fn get_int64(&self, ordinal: u16) -> Result<i64> {
        match self.get_value(ordinal, ValueKind::Int64).await? {
            CellValue::Int64(value) => Ok(value),
            other => Err(self.tag_error(other)),
        }
    }

    /// The SQLite type of the value at `ordinal` in the current row.
    pub async fn get_field_type(&self, ordinal: u16) -> Result<SqliteType> {
        match self.get_value(ordinal, ValueKind::FieldType).await? {
            CellValue::FieldType(ty) => Ok(ty),
            other => Err(self.tag_error(other)),
        }
    }

    async fn get_value(&self, ordinal: u16, kind: ValueKind) -> Result<CellValue> {
        self.core.ensure_live()?;
        match &self.core.link {
            WorkerLink::Local(engine) => engine
                .get_value(self.core.handle, ordinal, kind)
                .await
                .map_err(as_server_error),
            WorkerLink::Remote(transport) => {
                let handle = self.core.handle;
                let request = match kind {
                    ValueKind::Str => Message::ExecuteReaderGetStringRequest { handle, ordinal },
                    ValueKind::Int16 => Message::ExecuteReaderGetInt16Request { handle, ordinal },
                    ValueKind::Int32 => Message::ExecuteReaderGetInt32Request { handle, ordinal },
                    ValueKind::Int64 => Message::ExecuteReaderGetInt64Request { handle, ordinal },
                    ValueKind::FieldType => {
                        Message::ExecuteReaderGetFieldTypeRequest { handle, ordinal }
                    }
                };
                let reply = transport.send_and_wait(request, self.core.timeout).await?;
                decode_value(reply)
            }
        }
    }

    fn tag_error(&self, value: CellValue) -> Error {
        Error::Protocol(format!(
            "typed value reply carried tag {} for {}",
            value.tag(),
            self.core.handle
        ))
    }
}

fn decode_value(reply: Message) -> Result<CellValue> {
    match reply {
        Message::ExecuteReaderResponse { body } => parse_cell_value(&body),
        Message::ExecuteReaderException { message } => Err(Error::Server(message)),
        other => Err(unexpected_reply(&other)),
    }
}

// =============================================================================
// Tests
// =============================================================================
