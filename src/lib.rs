//! # SoleDB - Shared Embedded SQLite
//!
//! SoleDB exposes a single embedded SQLite database to multiple processes by
//! electing exactly one process as the *leader* — the sole owner of the
//! SQLite connection — and relaying all database operations from *follower*
//! processes to it over a framed binary transport. Followers present the
//! normal embedded client surface (connection, command, reader), so callers
//! cannot tell whether the database is being driven locally or remotely.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────┐        ┌───────────────────────────┐
//! │     Follower process      │        │      Leader process       │
//! │                           │        │                           │
//! │  Command / Reader facade  │        │  Command / Reader facade  │
//! │            │              │        │            │              │
//! │       Workers (remote)    │        │      Workers (local)      │
//! │            │              │        │            │              │
//! │      Framed transport ────┼── TCP ─┼──► Server ─┤              │
//! └───────────────────────────┘        │            ▼              │
//!                                      │     Engine (1 thread)     │
//!                                      │            │              │
//!                                      │         SQLite            │
//!                                      └───────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **One leader**: exactly one process owns the SQLite connection for a
//!    given endpoint; election is an exclusive TCP bind.
//! 2. **Single writer**: the leader serves every request on one dedicated
//!    engine thread, in arrival order.
//! 3. **Handles never repeat**: statement and cursor identifiers come from a
//!    strictly monotonic 128-bit counter, even across disposals.
//! 4. **Errors travel verbatim**: a follower observes the exact message the
//!    leader's SQLite produced.
//!
//! ## Example
//!
//! ```rust,ignore
//! use soledb::Connection;
//!
//! #[tokio::main]
//! async fn main() -> soledb::Result<()> {
//!     // First process to bind the endpoint leads; everyone else follows.
//!     let db = Connection::open(
//!         "Data Source=shared.db; Endpoint=127.0.0.1:4870",
//!     )
//!     .await?;
//!
//!     db.command("CREATE TABLE IF NOT EXISTS t(x INTEGER)")
//!         .execute_non_query()
//!         .await?;
//!     db.command("INSERT INTO t VALUES(42)")
//!         .execute_non_query()
//!         .await?;
//!
//!     let mut reader = db.command("SELECT x FROM t").execute_reader().await?;
//!     while reader.read().await? {
//!         println!("x = {}", reader.get_int32(0).await?);
//!     }
//!
//!     db.close().await;
//!     Ok(())
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for SoleDB operations.
pub mod error;

/// Connection-string option parsing.
pub mod options;

/// Domain types: handles, column descriptors, typed cell values.
pub mod types;

/// The wire message codec.
pub mod protocol;

/// Length-prefixed framing and request/response correlation.
pub mod transport;

/// The leader engine: one thread, one SQLite connection, the handle tables.
pub mod engine;

/// The leader's accept loop and per-peer relays.
pub mod server;

/// Command and reader workers, local and remote.
pub mod worker;

/// The connection controller: election, reconnection, the wait gate.
pub mod connection;

/// The client command facade.
pub mod command;

/// The client reader facade.
pub mod reader;

// =============================================================================
// Re-exports
// =============================================================================

pub use command::Command;
pub use connection::{Connection, Role};
pub use error::{Error, Result};
pub use options::ConnectionOptions;
pub use reader::{Reader, RowState};
pub use types::{CellValue, ColumnDescriptor, CommandBehavior, SqliteType, StatementHandle};
