//! # Connection-String Options
//!
//! A SoleDB connection string is a `key=value;` list, e.g.:
//!
//! ```text
//! Data Source=shared.db; Endpoint=127.0.0.1:4870; Default Timeout=30000; journal_mode=WAL
//! ```
//!
//! Keys are case-insensitive and embedded spaces in keys are ignored, so
//! `Data Source`, `DataSource`, and `datasource` are the same key. The core
//! reads three options; every other pair is retained in order and applied by
//! the leader as a `PRAGMA` when the database opens.

use std::time::Duration;

use crate::error::{Error, Result};

/// Milliseconds a command waits for its reply when the connection string does
/// not say otherwise.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// Options
// =============================================================================

/// Options parsed from a connection string.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// SQLite database path. `:memory:` opens a private in-memory database,
    /// which only makes sense without an `Endpoint`.
    pub data_source: String,

    /// `host:port` the leader listens on and followers dial. Without an
    /// endpoint the connection runs as a standalone local leader.
    pub endpoint: Option<String>,

    /// Default command timeout. `Duration::ZERO` means no timeout.
    pub default_timeout: Duration,

    /// Unrecognized pairs, in connection-string order. The leader forwards
    /// each one verbatim to SQLite as `PRAGMA <key> = <value>`.
    pub pragmas: Vec<(String, String)>,
}

impl ConnectionOptions {
    /// Parses a connection string.
    ///
    /// Empty segments are skipped; a segment without `=` or with an empty key
    /// is an [`Error::InvalidOperation`], as is a `Default Timeout` value
    /// that is not a non-negative integer.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut options = Self::default();

        for segment in connection_string.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let (key, value) = segment.split_once('=').ok_or_else(|| {
                Error::InvalidOperation(format!(
                    "connection string segment '{}' is not key=value",
                    segment
                ))
            })?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                return Err(Error::InvalidOperation(
                    "connection string has an empty key".to_string(),
                ));
            }

            match normalize_key(key).as_str() {
                "datasource" => options.data_source = value.to_string(),
                "endpoint" => options.endpoint = Some(value.to_string()),
                "defaulttimeout" => {
                    let ms: u64 = value.parse().map_err(|_| {
                        Error::InvalidOperation(format!(
                            "Default Timeout must be a non-negative integer, got '{}'",
                            value
                        ))
                    })?;
                    options.default_timeout = Duration::from_millis(ms);
                }
                _ => options.pragmas.push((key.to_string(), value.to_string())),
            }
        }

        Ok(options)
    }

    /// The command timeout as the transport wants it: `None` when timeouts
    /// are disabled.
    pub fn timeout(&self) -> Option<Duration> {
        if self.default_timeout.is_zero() {
            None
        } else {
            Some(self.default_timeout)
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            data_source: ":memory:".to_string(),
            endpoint: None,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            pragmas: Vec::new(),
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
