//! # Domain Types for SoleDB
//!
//! This module defines the core types shared by the protocol, the leader
//! engine, and the client facade: statement handles, column descriptors,
//! typed cell values, and command behavior flags.
//!
//! ## Design: Newtypes for Safety
//!
//! Handles, cursor ids, and peer ids are all integers on the wire. Wrapping
//! each in its own struct keeps them from being interchanged and gives every
//! one a place to hang its invariants.
//!
//! ## Invariants
//!
//! - [`StatementHandle`]: strictly increasing, never reused, never zero
//! - [`CursorId`]: drawn from the same allocator, so it shares those laws
//! - [`ColumnDescriptor`]: ordinals are dense and match wire order

use std::fmt;

// =============================================================================
// Handles
// =============================================================================

/// Opaque identifier for a leader-side prepared statement.
///
/// Handles are 128 bits wide so that a random or cryptographic allocation
/// scheme could replace the monotonic counter without a protocol change.
/// The current allocator is a strictly monotonic counter starting at 1;
/// zero is never a valid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementHandle(u128);

impl StatementHandle {
    /// Reconstructs a handle from its wire representation.
    pub fn from_raw(value: u128) -> Self {
        Self(value)
    }

    /// Returns the raw value for wire encoding.
    pub fn as_raw(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for StatementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt-{:x}", self.0)
    }
}

/// Identifier for a leader-side cursor, the child of a statement handle.
///
/// The wire addresses a cursor through its parent statement handle; the
/// cursor id exists for the leader's own bookkeeping and trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(u128);

impl CursorId {
    pub fn as_raw(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cursor-{:x}", self.0)
    }
}

/// Allocates statement handles and cursor ids from one strictly monotonic
/// counter.
///
/// Sharing a single counter means no identifier of either kind is ever
/// repeated for the lifetime of a leader, even across disposals.
#[derive(Debug)]
pub struct HandleAllocator {
    next: u128,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_statement(&mut self) -> StatementHandle {
        StatementHandle(self.advance())
    }

    pub fn next_cursor(&mut self) -> CursorId {
        CursorId(self.advance())
    }

    fn advance(&mut self) -> u128 {
        let value = self.next;
        self.next = self
            .next
            .checked_add(1)
            .expect("handle counter exhausted");
        value
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Peers
// =============================================================================

/// Identifies the origin of a request inside the leader.
///
/// Each accepted transport gets a fresh peer id; the leader process itself
/// uses [`PeerId::LOCAL`] for commands it runs against its own engine. The
/// engine finalizes every handle owned by a peer when that peer disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(u64);

impl PeerId {
    /// The leader process acting as its own client.
    pub const LOCAL: PeerId = PeerId(0);

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::LOCAL {
            write!(f, "peer-local")
        } else {
            write!(f, "peer-{}", self.0)
        }
    }
}

// =============================================================================
// Column Metadata
// =============================================================================

/// SQLite's fundamental datatypes, using SQLite's own type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SqliteType {
    Integer = 1,
    Real = 2,
    Text = 3,
    Blob = 4,
    Null = 5,
}

impl SqliteType {
    /// Returns the one-byte wire code.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Decodes a wire code; unknown codes are a protocol violation handled
    /// by the caller.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Integer),
            2 => Some(Self::Real),
            3 => Some(Self::Text),
            4 => Some(Self::Blob),
            5 => Some(Self::Null),
            _ => None,
        }
    }
}

impl fmt::Display for SqliteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::Null => "NULL",
        };
        write!(f, "{}", name)
    }
}

/// Describes one output column of a statement.
///
/// Descriptors are produced by the leader when a reader opens and cached by
/// the client for the reader's lifetime. Ordinals are dense, zero-based, and
/// match the order the descriptors travel on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub ordinal: u16,
    pub name: String,
    pub sqlite_type: SqliteType,
}

// =============================================================================
// Typed Cell Values
// =============================================================================

/// A single typed value carried in a reader response.
///
/// The variants mirror the wire tag set exactly: `{0: Null, 1: Int16,
/// 2: Int32, 3: Int64, 4: String, 5: FieldType}`. `FieldType` answers a
/// field-type query with the SQLite type code of the value in the current
/// row.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Str(String),
    FieldType(SqliteType),
}

impl CellValue {
    /// Returns the one-byte wire tag.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Int16(_) => 1,
            Self::Int32(_) => 2,
            Self::Int64(_) => 3,
            Self::Str(_) => 4,
            Self::FieldType(_) => 5,
        }
    }
}

// =============================================================================
// Command Behavior
// =============================================================================

/// Bit flags a reader is opened with.
///
/// The flags travel as a `u32` and are honored by the leader when it builds
/// the cursor. Unknown bits are preserved but have no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandBehavior(u32);

impl CommandBehavior {
    /// Plain cursor over the full result set.
    pub const DEFAULT: CommandBehavior = CommandBehavior(0);

    /// Column metadata only; the cursor holds no rows.
    pub const SCHEMA_ONLY: CommandBehavior = CommandBehavior(0x02);

    /// The cursor holds at most one row.
    pub const SINGLE_ROW: CommandBehavior = CommandBehavior(0x08);

    pub fn from_raw(bits: u32) -> Self {
        Self(bits)
    }

    pub fn as_raw(&self) -> u32 {
        self.0
    }

    pub fn schema_only(&self) -> bool {
        self.0 & Self::SCHEMA_ONLY.0 != 0
    }

    pub fn single_row(&self) -> bool {
        self.0 & Self::SINGLE_ROW.0 != 0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Every identifier the allocator hands out is distinct and increasing,
    /// across both kinds.
    #[test]
    fn allocator_is_strictly_monotonic() {
        let mut alloc = HandleAllocator::new();

        let first = alloc.next_statement();
        let cursor = alloc.next_cursor();
        let second = alloc.next_statement();

        assert_eq!(first.as_raw(), 1);
        assert_eq!(cursor.as_raw(), 2);
        assert_eq!(second.as_raw(), 3);
        assert!(first < second);
    }

    #[test]
    fn zero_is_never_allocated() {
        let mut alloc = HandleAllocator::new();
        for _ in 0..100 {
            assert_ne!(alloc.next_statement().as_raw(), 0);
        }
    }

    #[test]
    fn sqlite_type_codes_round_trip() {
        for ty in [
            SqliteType::Integer,
            SqliteType::Real,
            SqliteType::Text,
            SqliteType::Blob,
            SqliteType::Null,
        ] {
            assert_eq!(SqliteType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(SqliteType::from_code(0), None);
        assert_eq!(SqliteType::from_code(6), None);
    }

    #[test]
    fn cell_value_tags_match_wire_contract() {
        assert_eq!(CellValue::Null.tag(), 0);
        assert_eq!(CellValue::Int16(0).tag(), 1);
        assert_eq!(CellValue::Int32(0).tag(), 2);
        assert_eq!(CellValue::Int64(0).tag(), 3);
        assert_eq!(CellValue::Str(String::new()).tag(), 4);
        assert_eq!(CellValue::FieldType(SqliteType::Null).tag(), 5);
    }

    #[test]
    fn behavior_flags() {
        let plain = CommandBehavior::DEFAULT;
        assert!(!plain.schema_only());
        assert!(!plain.single_row());

        let combined = CommandBehavior::from_raw(
            CommandBehavior::SCHEMA_ONLY.as_raw() | CommandBehavior::SINGLE_ROW.as_raw(),
        );
        assert!(combined.schema_only());
        assert!(combined.single_row());

        // Unknown bits ride along untouched.
        let exotic = CommandBehavior::from_raw(0x8000_0000);
        assert_eq!(exotic.as_raw(), 0x8000_0000);
    }
}
