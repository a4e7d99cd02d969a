//! # Connection Controller
//!
//! A [`Connection`] decides, and keeps deciding, which side of the relay
//! this process is on:
//!
//! ```text
//!            ┌──────────────┐
//!     open ─►│  Connecting  │◄──────────── transport lost
//!            └──────┬───────┘                    │
//!        bind wins  │  bind taken                │
//!        ┌──────────┴──────────┐                 │
//!        ▼                     ▼                 │
//!   ┌─────────┐          ┌──────────┐            │
//!   │ Leader  │          │ Follower │────────────┘
//!   │ engine  │          │ transport│
//!   │ server  │          └──────────┘
//!   └─────────┘
//! ```
//!
//! ## Election
//!
//! Election is bind-or-connect on the configured endpoint: the process that
//! wins the exclusive TCP bind opens the database and serves everyone else;
//! a process that finds the address taken dials it and follows. The OS
//! grants the listen socket to exactly one process, which is the
//! one-leader-per-database invariant. Without an endpoint the connection is
//! a standalone local leader.
//!
//! ## Reconnection
//!
//! When a follower's transport closes, the controller re-enters
//! `Connecting`, leaves the old workers to fail with `Disconnected`, and
//! re-elects — possibly winning the bind this time. Callers blocked at
//! [`Connection::wait_if_connecting`] are released only once the new role is
//! assigned.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::engine::{open_database, spawn_engine, EngineHandle};
use crate::error::{Error, Result};
use crate::options::ConnectionOptions;
use crate::server::Server;
use crate::transport::{Transport, DEFAULT_KEEPALIVE};
use crate::worker::{CommandWorker, WorkerLink};

/// Pause between re-election attempts while the old leader's socket drains.
const RECONNECT_DELAY: Duration = Duration::from_millis(100);

// =============================================================================
// Role
// =============================================================================

/// The connection's current position in the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Election or re-election is in progress.
    Connecting,
    /// This process owns the SQLite connection.
    Leader,
    /// This process relays through the leader.
    Follower,
    /// The connection was closed; terminal.
    Closed,
}

// =============================================================================
// Connection
// =============================================================================

/// A handle to the shared database, usable from any task. Clones share the
/// same role and the same underlying engine or transport.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    options: ConnectionOptions,
    role_tx: watch::Sender<Role>,
    state: Mutex<RoleState>,
    closing: CancellationToken,
}

enum RoleState {
    Connecting,
    Leader {
        engine: EngineHandle,
        server: Option<Server>,
    },
    Follower {
        transport: Arc<Transport>,
    },
    Closed,
}

impl Connection {
    /// Opens a connection from a connection string and runs the first
    /// election.
    ///
    /// ```text
    /// Data Source=shared.db; Endpoint=127.0.0.1:4870; Default Timeout=30000
    /// ```
    pub async fn open(connection_string: &str) -> Result<Self> {
        Self::with_options(ConnectionOptions::parse(connection_string)?).await
    }

    /// Opens a connection from already-parsed options.
    pub async fn with_options(options: ConnectionOptions) -> Result<Self> {
        let (role_tx, _) = watch::channel(Role::Connecting);
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                options,
                role_tx,
                state: Mutex::new(RoleState::Connecting),
                closing: CancellationToken::new(),
            }),
        };

        let state = elect(&connection.inner.options).await?;
        connection.install(state).await;
        Ok(connection)
    }

    /// Creates a command bound to this connection. The worker is not created
    /// until the command first executes.
    pub fn command(&self, text: impl Into<String>) -> Command {
        Command::new(self.clone(), text)
    }

    /// The role right now. Prefer [`Self::wait_if_connecting`] over polling.
    pub fn role(&self) -> Role {
        *self.inner.role_tx.borrow()
    }

    /// Blocks until the role is `Leader` or `Follower`, or until `cancel`
    /// fires.
    pub async fn wait_if_connecting(&self, cancel: &CancellationToken) -> Result<()> {
        let mut role_rx = self.inner.role_tx.subscribe();
        loop {
            match *role_rx.borrow_and_update() {
                Role::Leader | Role::Follower => return Ok(()),
                Role::Closed => return Err(Error::ObjectDisposed("Connection")),
                Role::Connecting => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                changed = role_rx.changed() => {
                    if changed.is_err() {
                        return Err(Error::ObjectDisposed("Connection"));
                    }
                }
            }
        }
    }

    /// The address the leader is serving on, when this connection is the
    /// leader of a networked database.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.inner.state.lock().await {
            RoleState::Leader {
                server: Some(server),
                ..
            } => Some(server.local_addr()),
            _ => None,
        }
    }

    /// The command timeout the connection string configured.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.inner.options.timeout()
    }

    /// Closes the connection: the leader side stops serving and shuts the
    /// engine down, the follower side drops its transport. Terminal.
    pub async fn close(&self) {
        self.inner.closing.cancel();

        let previous = {
            let mut state = self.inner.state.lock().await;
            std::mem::replace(&mut *state, RoleState::Closed)
        };
        match previous {
            RoleState::Leader { engine, server } => {
                if let Some(server) = server {
                    server.shutdown();
                }
                engine.shutdown();
            }
            RoleState::Follower { transport } => transport.close(),
            RoleState::Connecting | RoleState::Closed => {}
        }

        self.inner.role_tx.send_replace(Role::Closed);
        info!("connection closed");
    }

    /// Waits through any election in progress, then builds a worker against
    /// the current role. Used by the command facade on first execute.
    pub(crate) async fn create_worker(
        &self,
        sql: String,
        timeout: Option<Duration>,
    ) -> Result<CommandWorker> {
        self.wait_if_connecting(&self.inner.closing).await?;

        let link = {
            let state = self.inner.state.lock().await;
            match &*state {
                RoleState::Leader { engine, .. } => WorkerLink::Local(engine.clone()),
                RoleState::Follower { transport } => WorkerLink::Remote(Arc::clone(transport)),
                // The role moved under us; the caller sees the same error a
                // mid-flight loss produces.
                RoleState::Connecting => return Err(Error::Disconnected),
                RoleState::Closed => return Err(Error::ObjectDisposed("Connection")),
            }
        };

        CommandWorker::create(link, sql, timeout).await
    }

    /// Installs a freshly-elected role, unless the connection closed while
    /// the election ran.
    async fn install(&self, new_state: RoleState) {
        let role = {
            let mut state = self.inner.state.lock().await;
            if matches!(*state, RoleState::Closed) {
                // Lost the race with close(); tear the new role down.
                match new_state {
                    RoleState::Leader { engine, server } => {
                        if let Some(server) = server {
                            server.shutdown();
                        }
                        engine.shutdown();
                    }
                    RoleState::Follower { transport } => transport.close(),
                    _ => {}
                }
                return;
            }

            let role = match &new_state {
                RoleState::Leader { .. } => Role::Leader,
                RoleState::Follower { .. } => Role::Follower,
                RoleState::Connecting => Role::Connecting,
                RoleState::Closed => Role::Closed,
            };

            if let RoleState::Follower { transport } = &new_state {
                self.spawn_monitor(Arc::clone(transport));
            }

            *state = new_state;
            role
        };

        info!(?role, "role assigned");
        self.inner.role_tx.send_replace(role);
    }

    /// Watches a follower transport; on loss, re-enters Connecting and
    /// re-elects until a role is assigned or the connection closes.
    fn spawn_monitor(&self, transport: Arc<Transport>) {
        let connection = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = connection.inner.closing.cancelled() => return,
                _ = transport.wait_closed() => {}
            }

            {
                let mut state = connection.inner.state.lock().await;
                if matches!(*state, RoleState::Closed) {
                    return;
                }
                *state = RoleState::Connecting;
            }
            connection.inner.role_tx.send_replace(Role::Connecting);
            info!("transport lost, re-electing");

            loop {
                if connection.inner.closing.is_cancelled() {
                    return;
                }
                match elect(&connection.inner.options).await {
                    Ok(new_state) => {
                        connection.install(new_state).await;
                        return;
                    }
                    Err(error) => {
                        debug!(%error, "re-election attempt failed");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });
    }
}

// =============================================================================
// Election
// =============================================================================

/// One election round: bind the endpoint to lead, or dial it to follow.
async fn elect(options: &ConnectionOptions) -> Result<RoleState> {
    let endpoint = match &options.endpoint {
        Some(endpoint) => endpoint,
        None => {
            // Standalone: this process is the sole user of the database.
            let conn = open_database(options)?;
            return Ok(RoleState::Leader {
                engine: spawn_engine(conn),
                server: None,
            });
        }
    };

    match TcpListener::bind(endpoint).await {
        Ok(listener) => {
            let conn = open_database(options)?;
            let engine = spawn_engine(conn);
            let server = Server::spawn(listener, engine.clone())?;
            Ok(RoleState::Leader {
                engine,
                server: Some(server),
            })
        }
        Err(error) if error.kind() == std::io::ErrorKind::AddrInUse => {
            let stream = TcpStream::connect(endpoint).await?;
            let _ = stream.set_nodelay(true);
            let transport = Transport::spawn(stream, Some(DEFAULT_KEEPALIVE));
            Ok(RoleState::Follower { transport })
        }
        Err(error) => {
            warn!(%error, %endpoint, "endpoint bind failed");
            Err(error.into())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
