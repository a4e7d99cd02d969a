//! # Command Facade
//!
//! The user-facing command type. A command validates its inputs, lazily
//! binds a worker on first execute, and from then on relays through that
//! worker — local engine or remote leader, the caller cannot tell.
//!
//! ## Sync over Async
//!
//! The core is asynchronous; the `_blocking` methods are a boundary adapter
//! that runs the async operation to completion on the current runtime and
//! surfaces the single inner failure unchanged. They must be called from a
//! multi-threaded runtime worker; calling them outside a runtime panics.

use std::time::Duration;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::types::CommandBehavior;
use crate::worker::CommandWorker;

/// Runs a future to completion from synchronous code on the current tokio
/// runtime.
pub(crate) fn block_on<F: std::future::Future>(future: F) -> F::Output {
    let handle = tokio::runtime::Handle::current();
    tokio::task::block_in_place(|| handle.block_on(future))
}

// =============================================================================
// Command
// =============================================================================

/// A SQL command against a [`Connection`].
///
/// The command text and timeout may be adjusted until the first execute;
/// execution creates the worker (and with it the leader-side statement) at
/// most once. After [`Command::dispose`] every operation fails with
/// [`Error::ObjectDisposed`].
pub struct Command {
    connection: Connection,
    text: String,
    timeout: Duration,
    worker: Option<CommandWorker>,
    disposed: bool,
}

impl Command {
    /// Usually reached through [`Connection::command`]. The timeout starts
    /// at the connection string's `Default Timeout`.
    pub fn new(connection: Connection, text: impl Into<String>) -> Self {
        let timeout = connection.default_timeout().unwrap_or(Duration::ZERO);
        Self {
            connection,
            text: text.into(),
            timeout,
            worker: None,
            disposed: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replaces the command text. Has no effect on a worker that already
    /// bound: the statement is prepared at most once.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// The per-request timeout; `Duration::ZERO` disables it.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Runs the statement to completion and returns the number of rows
    /// changed.
    pub async fn execute_non_query(&mut self) -> Result<i32> {
        self.ensure_worker().await?.execute_non_query().await
    }

    /// Opens a reader over the statement's result set.
    pub async fn execute_reader(&mut self) -> Result<Reader> {
        self.execute_reader_with(CommandBehavior::DEFAULT).await
    }

    /// Opens a reader with explicit behavior flags.
    pub async fn execute_reader_with(&mut self, behavior: CommandBehavior) -> Result<Reader> {
        let worker = self.ensure_worker().await?;
        let (reader_worker, columns) = worker.execute_reader(behavior).await?;
        Ok(Reader::new(reader_worker, behavior, columns))
    }

    /// Blocking form of [`Self::execute_non_query`].
    pub fn execute_non_query_blocking(&mut self) -> Result<i32> {
        block_on(self.execute_non_query())
    }

    /// Blocking form of [`Self::execute_reader`].
    pub fn execute_reader_blocking(&mut self) -> Result<Reader> {
        block_on(self.execute_reader())
    }

    /// Releases the leader-side statement. Idempotent; errors are swallowed
    /// because disposal is best-effort.
    pub fn dispose(&mut self) {
        self.disposed = true;
        if let Some(worker) = self.worker.take() {
            worker.dispose();
        }
    }

    /// Validates and binds the worker on first use.
    async fn ensure_worker(&mut self) -> Result<&CommandWorker> {
        if self.disposed {
            return Err(Error::ObjectDisposed("Command"));
        }
        if self.text.trim().is_empty() {
            return Err(Error::InvalidOperation(
                "command text is empty or whitespace".to_string(),
            ));
        }

        if self.worker.is_none() {
            let timeout = if self.timeout.is_zero() {
                None
            } else {
                Some(self.timeout)
            };
            let worker = self
                .connection
                .create_worker(self.text.clone(), timeout)
                .await?;
            self.worker = Some(worker);
        }

        Ok(self.worker.as_ref().expect("worker just bound"))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;

    async fn open() -> Connection {
        Connection::open("Data Source=:memory:").await.unwrap()
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_any_worker_exists() {
        let connection = open().await;

        for text in ["", "   ", "\n\t"] {
            let mut command = connection.command(text);
            let err = command.execute_non_query().await.unwrap_err();
            assert!(matches!(err, Error::InvalidOperation(_)), "text {:?}", text);
        }
    }

    #[tokio::test]
    async fn disposed_command_rejects_everything() {
        let connection = open().await;
        let mut command = connection.command("SELECT 1");
        command.dispose();

        let err = command.execute_non_query().await.unwrap_err();
        assert!(matches!(err, Error::ObjectDisposed("Command")));

        let err = command.execute_reader().await.unwrap_err();
        assert!(matches!(err, Error::ObjectDisposed("Command")));

        // A second dispose is fine.
        command.dispose();
    }

    #[tokio::test]
    async fn timeout_defaults_from_the_connection_string() {
        let connection = Connection::open("Data Source=:memory:; Default Timeout=1500")
            .await
            .unwrap();
        let command = connection.command("SELECT 1");
        assert_eq!(command.timeout(), Duration::from_millis(1500));

        let connection = Connection::open("Data Source=:memory:; Default Timeout=0")
            .await
            .unwrap();
        let command = connection.command("SELECT 1");
        assert_eq!(command.timeout(), Duration::ZERO);
    }

    #[tokio::test]
    async fn end_to_end_against_a_local_leader() {
        let connection = open().await;

        let mut create = connection.command("CREATE TABLE t(x INTEGER)");
        assert_eq!(create.execute_non_query().await.unwrap(), 0);
        create.dispose();

        let mut insert = connection.command("INSERT INTO t VALUES(42)");
        assert_eq!(insert.execute_non_query().await.unwrap(), 1);
        insert.dispose();

        let mut select = connection.command("SELECT x FROM t");
        let mut reader = select.execute_reader().await.unwrap();
        assert!(reader.read().await.unwrap());
        assert_eq!(reader.get_int32(0).await.unwrap(), 42);
        assert!(!reader.read().await.unwrap());

        connection.close().await;
    }

    /// The worker binds once; executing twice reuses the same statement.
    #[tokio::test]
    async fn worker_is_created_at_most_once() {
        let connection = open().await;
        connection
            .command("CREATE TABLE t(x INTEGER)")
            .execute_non_query()
            .await
            .unwrap();

        let mut insert = connection.command("INSERT INTO t VALUES(1)");
        assert_eq!(insert.execute_non_query().await.unwrap(), 1);

        // Text changes after binding are inert.
        insert.set_text("INSERT INTO t VALUES(2), (3)");
        assert_eq!(insert.execute_non_query().await.unwrap(), 1);
    }
}
