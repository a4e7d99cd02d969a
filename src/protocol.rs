//! # Remote-Command Message Codec
//!
//! This module encodes and decodes the messages that carry commands,
//! exceptions, and reader-cursor operations between a leader and its
//! followers. The framing itself (length prefix, keep-alives) lives in
//! [`crate::transport`]; this module owns everything inside a frame.
//!
//! ## Payload Layout
//!
//! ```text
//! kind: u32 LE | correlation: u64 LE | body
//! ```
//!
//! Every request carries a correlation id; every response repeats the id of
//! the request it answers. Correlation id 0 is reserved for unsolicited
//! traffic. Strings are UTF-8 with a `u32 LE` byte-length prefix. All other
//! integers are little-endian at the widths the body tables in the module
//! items give.
//!
//! ## Reader Responses
//!
//! `ExecuteReaderResponse` is the one kind with context-dependent bodies: a
//! column list when a reader opens, a has-row byte for a read step, and a
//! tagged value for a column access. The decoder cannot know which form a
//! body takes without knowing the request it answers, so [`Message`] carries
//! the raw body and the caller parses the form it expects with
//! [`parse_column_list`], [`parse_has_row`], or [`parse_cell_value`].
//!
//! An unknown kind, a reserved kind, a truncated body, or trailing bytes
//! after a fully-parsed body are all protocol errors, fatal to the transport
//! that observed them.

use crate::error::{Error, Result};
use crate::types::{CellValue, ColumnDescriptor, CommandBehavior, SqliteType, StatementHandle};

// =============================================================================
// Message Kinds
// =============================================================================

/// The closed enumeration of wire message kinds.
///
/// Kinds 1 and 2 (`SendAndWaitRequest`/`SendAndWaitResponse`) are a reserved
/// generic envelope: correlation is folded into the payload header instead,
/// so these kinds are never produced and are rejected on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageKind {
    Unknown = 0,
    SendAndWaitRequest = 1,
    SendAndWaitResponse = 2,
    CreateCommandRequest = 3,
    CreateCommandResponse = 4,
    DisposeCommand = 5,
    CreateCommandException = 6,
    ExecuteNonQueryRequest = 7,
    ExecuteNonQueryResponse = 8,
    ExecuteNonQueryException = 9,
    ExecuteReaderRequest = 10,
    ExecuteReaderReadRequest = 11,
    ExecuteReaderGetOrdinalRequest = 12,
    ExecuteReaderGetStringRequest = 13,
    ExecuteReaderGetInt16Request = 14,
    ExecuteReaderGetInt32Request = 15,
    ExecuteReaderGetInt64Request = 16,
    ExecuteReaderGetFieldTypeRequest = 17,
    ExecuteReaderResponse = 18,
    ExecuteReaderException = 19,
}

impl MessageKind {
    fn from_raw(raw: u32) -> Option<Self> {
        use MessageKind::*;
        Some(match raw {
            0 => Unknown,
            1 => SendAndWaitRequest,
            2 => SendAndWaitResponse,
            3 => CreateCommandRequest,
            4 => CreateCommandResponse,
            5 => DisposeCommand,
            6 => CreateCommandException,
            7 => ExecuteNonQueryRequest,
            8 => ExecuteNonQueryResponse,
            9 => ExecuteNonQueryException,
            10 => ExecuteReaderRequest,
            11 => ExecuteReaderReadRequest,
            12 => ExecuteReaderGetOrdinalRequest,
            13 => ExecuteReaderGetStringRequest,
            14 => ExecuteReaderGetInt16Request,
            15 => ExecuteReaderGetInt32Request,
            16 => ExecuteReaderGetInt64Request,
            17 => ExecuteReaderGetFieldTypeRequest,
            18 => ExecuteReaderResponse,
            19 => ExecuteReaderException,
            _ => return None,
        })
    }

    /// Whether this kind answers a request (as opposed to originating one).
    pub fn is_response(&self) -> bool {
        use MessageKind::*;
        matches!(
            self,
            CreateCommandResponse
                | CreateCommandException
                | ExecuteNonQueryResponse
                | ExecuteNonQueryException
                | ExecuteReaderResponse
                | ExecuteReaderException
        )
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A decoded wire message.
///
/// The correlation id is not part of this union; the transport carries it
/// alongside so that one request/response pairing mechanism serves every
/// kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Body: `sql: string`.
    CreateCommandRequest { sql: String },
    /// Body: `handle: u128`.
    CreateCommandResponse { handle: StatementHandle },
    /// Body: `message: string`.
    CreateCommandException { message: String },
    /// Body: `handle: u128`. Fire-and-forget; never answered.
    DisposeCommand { handle: StatementHandle },
    /// Body: `handle: u128`.
    ExecuteNonQueryRequest { handle: StatementHandle },
    /// Body: `changes: i32`.
    ExecuteNonQueryResponse { changes: i32 },
    /// Body: `message: string`.
    ExecuteNonQueryException { message: String },
    /// Body: `handle: u128 | behavior: u32`.
    ExecuteReaderRequest {
        handle: StatementHandle,
        behavior: CommandBehavior,
    },
    /// Body: `handle: u128`.
    ExecuteReaderReadRequest { handle: StatementHandle },
    /// Body: `handle: u128 | name: string`.
    ExecuteReaderGetOrdinalRequest {
        handle: StatementHandle,
        name: String,
    },
    /// Body: `handle: u128 | ordinal: u16`.
    ExecuteReaderGetStringRequest {
        handle: StatementHandle,
        ordinal: u16,
    },
    /// Body: `handle: u128 | ordinal: u16`.
    ExecuteReaderGetInt16Request {
        handle: StatementHandle,
        ordinal: u16,
    },
    /// Body: `handle: u128 | ordinal: u16`.
    ExecuteReaderGetInt32Request {
        handle: StatementHandle,
        ordinal: u16,
    },
    /// Body: `handle: u128 | ordinal: u16`.
    ExecuteReaderGetInt64Request {
        handle: StatementHandle,
        ordinal: u16,
    },
    /// Body: `handle: u128 | ordinal: u16`.
    ExecuteReaderGetFieldTypeRequest {
        handle: StatementHandle,
        ordinal: u16,
    },
    /// Context-dependent body, kept raw; see the module docs.
    ExecuteReaderResponse { body: Vec<u8> },
    /// Body: `message: string`.
    ExecuteReaderException { message: String },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        use Message::*;
        match self {
            CreateCommandRequest { .. } => MessageKind::CreateCommandRequest,
            CreateCommandResponse { .. } => MessageKind::CreateCommandResponse,
            CreateCommandException { .. } => MessageKind::CreateCommandException,
            DisposeCommand { .. } => MessageKind::DisposeCommand,
            ExecuteNonQueryRequest { .. } => MessageKind::ExecuteNonQueryRequest,
            ExecuteNonQueryResponse { .. } => MessageKind::ExecuteNonQueryResponse,
            ExecuteNonQueryException { .. } => MessageKind::ExecuteNonQueryException,
            ExecuteReaderRequest { .. } => MessageKind::ExecuteReaderRequest,
            ExecuteReaderReadRequest { .. } => MessageKind::ExecuteReaderReadRequest,
            ExecuteReaderGetOrdinalRequest { .. } => MessageKind::ExecuteReaderGetOrdinalRequest,
            ExecuteReaderGetStringRequest { .. } => MessageKind::ExecuteReaderGetStringRequest,
            ExecuteReaderGetInt16Request { .. } => MessageKind::ExecuteReaderGetInt16Request,
            ExecuteReaderGetInt32Request { .. } => MessageKind::ExecuteReaderGetInt32Request,
            ExecuteReaderGetInt64Request { .. } => MessageKind::ExecuteReaderGetInt64Request,
            ExecuteReaderGetFieldTypeRequest { .. } => {
                MessageKind::ExecuteReaderGetFieldTypeRequest
            }
            ExecuteReaderResponse { .. } => MessageKind::ExecuteReaderResponse,
            ExecuteReaderException { .. } => MessageKind::ExecuteReaderException,
        }
    }

    /// Builds the reader-open response carrying the column descriptor list.
    pub fn reader_columns(columns: &[ColumnDescriptor]) -> Message {
        let mut body = Vec::new();
        push_u16(&mut body, columns.len() as u16);
        for column in columns {
            push_string(&mut body, &column.name);
            body.push(column.sqlite_type.code());
        }
        Message::ExecuteReaderResponse { body }
    }

    /// Builds the read-step response.
    pub fn reader_has_row(has_row: bool) -> Message {
        Message::ExecuteReaderResponse {
            body: vec![u8::from(has_row)],
        }
    }

    /// Builds a typed-value response.
    pub fn reader_value(value: &CellValue) -> Message {
        let mut body = vec![value.tag()];
        match value {
            CellValue::Null => {}
            CellValue::Int16(v) => body.extend_from_slice(&v.to_le_bytes()),
            CellValue::Int32(v) => body.extend_from_slice(&v.to_le_bytes()),
            CellValue::Int64(v) => body.extend_from_slice(&v.to_le_bytes()),
            CellValue::Str(v) => push_string(&mut body, v),
            CellValue::FieldType(ty) => body.push(ty.code()),
        }
        Message::ExecuteReaderResponse { body }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encodes a message into a frame payload: `kind | correlation | body`.
pub fn encode_payload(correlation: u64, message: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    push_u32(&mut out, message.kind() as u32);
    push_u64(&mut out, correlation);

    use Message::*;
    match message {
        CreateCommandRequest { sql } => push_string(&mut out, sql),
        CreateCommandResponse { handle } => push_u128(&mut out, handle.as_raw()),
        CreateCommandException { message } => push_string(&mut out, message),
        DisposeCommand { handle } => push_u128(&mut out, handle.as_raw()),
        ExecuteNonQueryRequest { handle } => push_u128(&mut out, handle.as_raw()),
        ExecuteNonQueryResponse { changes } => out.extend_from_slice(&changes.to_le_bytes()),
        ExecuteNonQueryException { message } => push_string(&mut out, message),
        ExecuteReaderRequest { handle, behavior } => {
            push_u128(&mut out, handle.as_raw());
            push_u32(&mut out, behavior.as_raw());
        }
        ExecuteReaderReadRequest { handle } => push_u128(&mut out, handle.as_raw()),
        ExecuteReaderGetOrdinalRequest { handle, name } => {
            push_u128(&mut out, handle.as_raw());
            push_string(&mut out, name);
        }
        ExecuteReaderGetStringRequest { handle, ordinal }
        | ExecuteReaderGetInt16Request { handle, ordinal }
        | ExecuteReaderGetInt32Request { handle, ordinal }
        | ExecuteReaderGetInt64Request { handle, ordinal }
        | ExecuteReaderGetFieldTypeRequest { handle, ordinal } => {
            push_u128(&mut out, handle.as_raw());
            push_u16(&mut out, *ordinal);
        }
        ExecuteReaderResponse { body } => out.extend_from_slice(body),
        ExecuteReaderException { message } => push_string(&mut out, message),
    }

    out
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u128(out: &mut Vec<u8>, v: u128) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_string(out: &mut Vec<u8>, s: &str) {
    push_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes a frame payload into its correlation id and message.
pub fn decode_payload(payload: &[u8]) -> Result<(u64, Message)> {
    let mut reader = BodyReader::new(payload);
    let raw_kind = reader.u32()?;
    let correlation = reader.u64()?;

    let kind = MessageKind::from_raw(raw_kind)
        .ok_or_else(|| Error::Protocol(format!("unknown message kind {}", raw_kind)))?;

    use MessageKind::*;
    let message = match kind {
        Unknown => {
            return Err(Error::Protocol("message kind 0 (Unknown)".to_string()));
        }
        SendAndWaitRequest | SendAndWaitResponse => {
            return Err(Error::Protocol(format!(
                "reserved envelope kind {}",
                raw_kind
            )));
        }
        CreateCommandRequest => Message::CreateCommandRequest {
            sql: reader.string()?,
        },
        CreateCommandResponse => Message::CreateCommandResponse {
            handle: StatementHandle::from_raw(reader.u128()?),
        },
        CreateCommandException => Message::CreateCommandException {
            message: reader.string()?,
        },
        DisposeCommand => Message::DisposeCommand {
            handle: StatementHandle::from_raw(reader.u128()?),
        },
        ExecuteNonQueryRequest => Message::ExecuteNonQueryRequest {
            handle: StatementHandle::from_raw(reader.u128()?),
        },
        ExecuteNonQueryResponse => Message::ExecuteNonQueryResponse {
            changes: reader.i32()?,
        },
        ExecuteNonQueryException => Message::ExecuteNonQueryException {
            message: reader.string()?,
        },
        ExecuteReaderRequest => Message::ExecuteReaderRequest {
            handle: StatementHandle::from_raw(reader.u128()?),
            behavior: CommandBehavior::from_raw(reader.u32()?),
        },
        ExecuteReaderReadRequest => Message::ExecuteReaderReadRequest {
            handle: StatementHandle::from_raw(reader.u128()?),
        },
        ExecuteReaderGetOrdinalRequest => Message::ExecuteReaderGetOrdinalRequest {
            handle: StatementHandle::from_raw(reader.u128()?),
            name: reader.string()?,
        },
        ExecuteReaderGetStringRequest => Message::ExecuteReaderGetStringRequest {
            handle: StatementHandle::from_raw(reader.u128()?),
            ordinal: reader.u16()?,
        },
        ExecuteReaderGetInt16Request => Message::ExecuteReaderGetInt16Request {
            handle: StatementHandle::from_raw(reader.u128()?),
            ordinal: reader.u16()?,
        },
        ExecuteReaderGetInt32Request => Message::ExecuteReaderGetInt32Request {
            handle: StatementHandle::from_raw(reader.u128()?),
            ordinal: reader.u16()?,
        },
        ExecuteReaderGetInt64Request => Message::ExecuteReaderGetInt64Request {
            handle: StatementHandle::from_raw(reader.u128()?),
            ordinal: reader.u16()?,
        },
        ExecuteReaderGetFieldTypeRequest => Message::ExecuteReaderGetFieldTypeRequest {
            handle: StatementHandle::from_raw(reader.u128()?),
            ordinal: reader.u16()?,
        },
        ExecuteReaderResponse => {
            // Context-dependent body; the caller parses the form it expects.
            return Ok((
                correlation,
                Message::ExecuteReaderResponse {
                    body: reader.rest(),
                },
            ));
        }
        ExecuteReaderException => Message::ExecuteReaderException {
            message: reader.string()?,
        },
    };

    reader.finish()?;
    Ok((correlation, message))
}

/// Parses the reader-open response body: `columns: u16 | [name, type]*`.
pub fn parse_column_list(body: &[u8]) -> Result<Vec<ColumnDescriptor>> {
    let mut reader = BodyReader::new(body);
    let count = reader.u16()?;
    let mut columns = Vec::with_capacity(count as usize);
    for ordinal in 0..count {
        let name = reader.string()?;
        let code = reader.u8()?;
        let sqlite_type = SqliteType::from_code(code)
            .ok_or_else(|| Error::Protocol(format!("invalid column type code {}", code)))?;
        columns.push(ColumnDescriptor {
            ordinal,
            name,
            sqlite_type,
        });
    }
    reader.finish()?;
    Ok(columns)
}

/// Parses the read-step response body: `has_row: u8`.
pub fn parse_has_row(body: &[u8]) -> Result<bool> {
    let mut reader = BodyReader::new(body);
    let flag = reader.u8()?;
    reader.finish()?;
    match flag {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::Protocol(format!("invalid has_row byte {}", other))),
    }
}

/// Parses a typed-value response body: `tag: u8 | payload`.
pub fn parse_cell_value(body: &[u8]) -> Result<CellValue> {
    let mut reader = BodyReader::new(body);
    let tag = reader.u8()?;
    let value = match tag {
        0 => CellValue::Null,
        1 => CellValue::Int16(reader.i16()?),
        2 => CellValue::Int32(reader.i32()?),
        3 => CellValue::Int64(reader.i64()?),
        4 => CellValue::Str(reader.string()?),
        5 => {
            let code = reader.u8()?;
            CellValue::FieldType(SqliteType::from_code(code).ok_or_else(|| {
                Error::Protocol(format!("invalid field type code {}", code))
            })?)
        }
        other => return Err(Error::Protocol(format!("unknown value tag {}", other))),
    };
    reader.finish()?;
    Ok(value)
}

// =============================================================================
// Body Reader
// =============================================================================

/// Cursor over a payload with truncation and trailing-byte checks.
struct BodyReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(Error::Protocol(format!(
                "truncated message: wanted {} bytes at offset {}, payload is {}",
                n,
                self.pos,
                self.bytes.len()
            ))),
        }
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn u128(&mut self) -> Result<u128> {
        Ok(u128::from_le_bytes(self.take(16)?.try_into().unwrap()))
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Protocol("string is not valid UTF-8".to_string()))
    }

    fn rest(&mut self) -> Vec<u8> {
        let slice = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        slice.to_vec()
    }

    fn finish(&self) -> Result<()> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{} trailing bytes after message body",
                self.bytes.len() - self.pos
            )))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
