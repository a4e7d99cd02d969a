//! # Reader Facade
//!
//! The user-facing cursor over a command's result set. The reader owns the
//! row state machine and the cached column descriptors; the values
//! themselves stay on the leader and every typed accessor asks for the one
//! cell it wants.
//!
//! ## Row States
//!
//! ```text
//! BeforeFirst ──read()=true──► OnRow ──read()=false──► AfterLast
//!      │                       │  ▲                        │
//!      │                       └──┘ read()=true            │
//!      └────────read()=false────────────────────────────────┘
//! ```
//!
//! Column accessors are valid only while `OnRow`; the facade rejects them
//! locally in any other state, before a frame is sent. `AfterLast` is
//! terminal: further reads answer `false` and only [`Reader::dispose`]
//! remains valid.

use crate::command::block_on;
use crate::error::{Error, Result};
use crate::types::{ColumnDescriptor, CommandBehavior, SqliteType};
use crate::worker::ReaderWorker;

// =============================================================================
// Row State
// =============================================================================

/// Where the cursor stands relative to the result rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    BeforeFirst,
    OnRow,
    AfterLast,
}

// =============================================================================
// Reader
// =============================================================================

/// Forward-only cursor over a statement's result set.
#[derive(Debug)]
pub struct Reader {
    worker: ReaderWorker,
    behavior: CommandBehavior,
    columns: Vec<ColumnDescriptor>,
    state: RowState,
    disposed: bool,
}

impl Reader {
    pub(crate) fn new(
        worker: ReaderWorker,
        behavior: CommandBehavior,
        columns: Vec<ColumnDescriptor>,
    ) -> Self {
        Self {
            worker,
            behavior,
            columns,
            state: RowState::BeforeFirst,
            disposed: false,
        }
    }

    /// The column descriptors captured when the reader opened.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// The behavior flags the reader was opened with.
    pub fn behavior(&self) -> CommandBehavior {
        self.behavior
    }

    pub fn state(&self) -> RowState {
        self.state
    }

    /// Advances to the next row. Once `false` has been returned the reader
    /// is terminal and keeps answering `false` without touching the leader.
    pub async fn read(&mut self) -> Result<bool> {
        self.ensure_live()?;
        if self.state == RowState::AfterLast {
            return Ok(false);
        }

        let has_row = self.worker.read().await?;
        self.state = if has_row {
            RowState::OnRow
        } else {
            RowState::AfterLast
        };
        Ok(has_row)
    }

    /// Case-insensitive column lookup; `-1` when the name is absent. Valid
    /// in any row state.
    pub async fn get_ordinal(&self, name: &str) -> Result<i32> {
        self.ensure_live()?;
        self.worker.get_ordinal(name).await
    }

    pub async fn get_string(&self, ordinal: u16) -> Result<String> {
        self.ensure_on_row(ordinal)?;
        self.worker.get_string(ordinal).await
    }

    pub async fn get_int16(&self, ordinal: u16) -> Result<i16> {
        self.ensure_on_row(ordinal)?;
        self.worker.get_int16(ordinal).await
    }

    pub async fn get_int32(&self, ordinal: u16) -> Result<i32> {
        self.ensure_on_row(ordinal)?;
        self.worker.get_int32(ordinal).await
    }

    pub async fn get_int64(&self, ordinal: u16) -> Result<i64> {
        self.ensure_on_row(ordinal)?;
        self.worker.get_int64(ordinal).await
    }

    /// The SQLite type of the value at `ordinal` in the current row.
    pub async fn field_type(&self, ordinal: u16) -> Result<SqliteType> {
        self.ensure_on_row(ordinal)?;
        self.worker.get_field_type(ordinal).await
    }

    /// Blocking form of [`Self::read`].
    pub fn read_blocking(&mut self) -> Result<bool> {
        block_on(self.read())
    }

    /// Blocking form of [`Self::get_ordinal`].
    pub fn get_ordinal_blocking(&self, name: &str) -> Result<i32> {
        block_on(self.get_ordinal(name))
    }

    /// Blocking form of [`Self::get_string`].
    pub fn get_string_blocking(&self, ordinal: u16) -> Result<String> {
        block_on(self.get_string(ordinal))
    }

    /// Blocking form of [`Self::get_int16`].
    pub fn get_int16_blocking(&self, ordinal: u16) -> Result<i16> {
        block_on(self.get_int16(ordinal))
    }

    /// Blocking form of [`Self::get_int32`].
    pub fn get_int32_blocking(&self, ordinal: u16) -> Result<i32> {
        block_on(self.get_int32(ordinal))
    }

    /// Blocking form of [`Self::get_int64`].
    pub fn get_int64_blocking(&self, ordinal: u16) -> Result<i64> {
        block_on(self.get_int64(ordinal))
    }

    /// Blocking form of [`Self::field_type`].
    pub fn field_type_blocking(&self, ordinal: u16) -> Result<SqliteType> {
        block_on(self.field_type(ordinal))
    }

    /// Releases the reader. The leader-side cursor lives and dies with its
    /// parent statement, so this only retires the client state. Idempotent.
    pub fn dispose(&mut self) {
        self.disposed = true;
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::ObjectDisposed("Reader"));
        }
        Ok(())
    }

    fn ensure_on_row(&self, ordinal: u16) -> Result<()> {
        self.ensure_live()?;
        match self.state {
            RowState::OnRow => {}
            RowState::BeforeFirst => {
                return Err(Error::InvalidOperation(
                    "read() has not been called".to_string(),
                ));
            }
            RowState::AfterLast => {
                return Err(Error::InvalidOperation(
                    "reader is past the last row".to_string(),
                ));
            }
        }
        if usize::from(ordinal) >= self.columns.len() {
            return Err(Error::InvalidOperation(format!(
                "ordinal {} out of range ({} columns)",
                ordinal,
                self.columns.len()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
