//! # Leader Server
//!
//! Accepts follower connections and relays their requests into the engine.
//! Each peer gets its own [`Transport`] and its own relay task; the task
//! consumes decoded requests from the transport's inbound queue, awaits the
//! engine's answer, and writes the reply under the request's correlation id.
//!
//! A peer task serves its requests one at a time, which preserves per-peer
//! FIFO order; fairness across peers falls out of the engine channel's
//! arrival order. When a peer's transport closes, the task reports
//! `PeerDisconnected` so the engine finalizes every handle that peer owned.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{EngineHandle, ValueKind};
use crate::error::Result;
use crate::protocol::Message;
use crate::transport::Transport;
use crate::types::{CellValue, PeerId, StatementHandle};
use crate::worker::exception_text;

// =============================================================================
// Server
// =============================================================================

/// Handle to the leader's accept loop.
pub struct Server {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl Server {
    /// Starts serving followers on the given listener.
    pub fn spawn(listener: TcpListener, engine: EngineHandle) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        info!(%local_addr, "leader listening");
        tokio::spawn(accept_loop(listener, engine, shutdown.clone()));

        Ok(Self {
            local_addr,
            shutdown,
        })
    }

    /// The address followers dial; useful when the endpoint bound port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes every peer transport.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// Accept Loop
// =============================================================================

/// Peer ids start above [`PeerId::LOCAL`].
static NEXT_PEER: AtomicU64 = AtomicU64::new(1);

async fn accept_loop(listener: TcpListener, engine: EngineHandle, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((socket, remote)) => {
                let peer = PeerId::from_raw(NEXT_PEER.fetch_add(1, Ordering::Relaxed));
                info!(%peer, %remote, "follower connected");

                let _ = socket.set_nodelay(true);
                tokio::spawn(serve_peer(
                    socket,
                    peer,
                    engine.clone(),
                    shutdown.clone(),
                ));
            }
            Err(error) => {
                warn!(%error, "accept failed");
            }
        }
    }
    debug!("leader stopped accepting");
}

async fn serve_peer(
    socket: TcpStream,
    peer: PeerId,
    engine: EngineHandle,
    shutdown: CancellationToken,
) {
    let transport = Transport::spawn(socket, None);
    let mut inbound = transport
        .take_inbound()
        .expect("fresh transport always has its inbound queue");

    loop {
        let (correlation, request) = tokio::select! {
            _ = shutdown.cancelled() => break,
            inbound = inbound.recv() => match inbound {
                Some(frame) => frame,
                None => break,
            },
        };

        let reply = handle_request(&engine, peer, request).await;
        if let Some(reply) = reply {
            if transport.send(correlation, &reply).is_err() {
                break;
            }
        }
    }

    transport.close();
    engine.peer_disconnected(peer);
    info!(%peer, "follower disconnected");
}

/// Executes one request against the engine and shapes the reply. Engine
/// failures become the exception kind matching the request; the message text
/// travels verbatim.
async fn handle_request(
    engine: &EngineHandle,
    peer: PeerId,
    request: Message,
) -> Option<Message> {
    match request {
        Message::CreateCommandRequest { sql } => {
            Some(match engine.create_command(peer, sql).await {
                Ok(handle) => Message::CreateCommandResponse { handle },
                Err(error) => Message::CreateCommandException {
                    message: error_text(error),
                },
            })
        }
        Message::DisposeCommand { handle } => {
            engine.dispose(handle);
            None
        }
        Message::ExecuteNonQueryRequest { handle } => {
            Some(match engine.execute_non_query(handle).await {
                Ok(changes) => Message::ExecuteNonQueryResponse { changes },
                Err(error) => Message::ExecuteNonQueryException {
                    message: error_text(error),
                },
            })
        }
        Message::ExecuteReaderRequest { handle, behavior } => {
            Some(match engine.execute_reader(handle, behavior).await {
                Ok(columns) => Message::reader_columns(&columns),
                Err(error) => Message::ExecuteReaderException {
                    message: error_text(error),
                },
            })
        }
        Message::ExecuteReaderReadRequest { handle } => {
            Some(match engine.read(handle).await {
                Ok(has_row) => Message::reader_has_row(has_row),
                Err(error) => Message::ExecuteReaderException {
                    message: error_text(error),
                },
            })
        }
        Message::ExecuteReaderGetOrdinalRequest { handle, name } => {
            Some(match engine.get_ordinal(handle, name).await {
                Ok(ordinal) => Message::reader_value(&CellValue::Int32(ordinal)),
                Err(error) => Message::ExecuteReaderException {
                    message: error_text(error),
                },
            })
        }
        Message::ExecuteReaderGetStringRequest { handle, ordinal } => {
            Some(get_value_reply(engine, handle, ordinal, ValueKind::Str).await)
        }
        Message::ExecuteReaderGetInt16Request { handle, ordinal } => {
            Some(get_value_reply(engine, handle, ordinal, ValueKind::Int16).await)
        }
        Message::ExecuteReaderGetInt32Request { handle, ordinal } => {
            Some(get_value_reply(engine, handle, ordinal, ValueKind::Int32).await)
        }
        Message::ExecuteReaderGetInt64Request { handle, ordinal } => {
            Some(get_value_reply(engine, handle, ordinal, ValueKind::Int64).await)
        }
        Message::ExecuteReaderGetFieldTypeRequest { handle, ordinal } => {
            Some(get_value_reply(engine, handle, ordinal, ValueKind::FieldType).await)
        }
        // A response kind arriving at the server is a peer bug; drop it.
        other => {
            warn!(peer = %peer, kind = ?other.kind(), "unexpected message from follower");
            None
        }
    }
}

async fn get_value_reply(
    engine: &EngineHandle,
    handle: StatementHandle,
    ordinal: u16,
    kind: ValueKind,
) -> Message {
    match engine.get_value(handle, ordinal, kind).await {
        Ok(value) => Message::reader_value(&value),
        Err(error) => Message::ExecuteReaderException {
            message: error_text(error),
        },
    }
}

/// Strips the crate-error prefix so the follower can re-wrap the leader's
/// message verbatim.
fn error_text(error: crate::error::Error) -> String {
    exception_text(&error)
}
