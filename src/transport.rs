//! # Framed Transport
//!
//! Length-prefixed delivery of protocol messages over a duplex byte stream,
//! with request/response correlation. Both endpoints use the same type: a
//! follower correlates its requests against incoming replies, and the leader
//! receives those requests on the inbound queue and answers under the same
//! correlation id.
//!
//! ## Frame Layout
//!
//! ```text
//! len: u32 BE | payload
//! ```
//!
//! `len` excludes itself. A frame of `len == 0` is a keep-alive and is
//! silently discarded on read; an optional interval task emits them.
//!
//! ## Task Topology
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Transport                              │
//! │                                                               │
//! │  send / send_and_wait ──► outgoing queue ──► writer task ──►  │── stream
//! │                                                               │
//! │  ┌─ pending waiters ◄─── correlated replies ─┐                │
//! │  │                                           reader task ◄──  │── stream
//! │  └─ inbound queue   ◄─── everything else ────┘                │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The outgoing queue is unbounded and `send` is synchronous, so best-effort
//! messages (keep-alives, `DisposeCommand` from `Drop`) never block.
//!
//! ## Failure
//!
//! Read EOF, an I/O error, a decode failure, or an oversized frame closes the
//! transport: every pending waiter releases with `Disconnected` and
//! subsequent sends fail immediately. A reply that arrives after its waiter
//! timed out finds no pending entry and is dropped with a warning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{decode_payload, encode_payload, Message};

// =============================================================================
// Configuration
// =============================================================================

/// Upper bound on a single frame payload. Larger frames indicate a corrupt
/// or hostile peer and close the transport.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Keep-alive interval used by followers unless overridden.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

// =============================================================================
// Transport
// =============================================================================

/// An inbound frame that was not a correlated reply: a request on the leader
/// side, or unsolicited correlation-0 traffic on the follower side.
pub type Inbound = (u64, Message);

/// A correlated, framed message channel over one duplex stream.
#[derive(Debug)]
pub struct Transport {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Message>>>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    next_correlation: AtomicU64,
    closed: CancellationToken,
}

impl Transport {
    /// Wraps a duplex stream, spawning the reader and writer tasks.
    ///
    /// With `keepalive` set, an interval task emits empty frames so an idle
    /// connection is distinguishable from a dead one. The leader side passes
    /// `None`; followers default to [`DEFAULT_KEEPALIVE`].
    pub fn spawn<S>(stream: S, keepalive: Option<Duration>) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        let transport = Arc::new(Self {
            outgoing: outgoing_tx.clone(),
            pending: Arc::clone(&pending),
            inbound: Mutex::new(Some(inbound_rx)),
            next_correlation: AtomicU64::new(1),
            closed: closed.clone(),
        });

        tokio::spawn(write_loop(write_half, outgoing_rx, closed.clone()));
        tokio::spawn(read_loop(read_half, pending, inbound_tx, closed.clone()));

        if let Some(interval) = keepalive {
            tokio::spawn(keepalive_loop(outgoing_tx, interval, closed));
        }

        transport
    }

    /// Sends a request and waits for the correlated reply.
    ///
    /// A timeout of `None` waits indefinitely. On timeout the waiter entry is
    /// removed, so the late reply is dropped when it eventually arrives; the
    /// server-side request is not cancelled.
    pub async fn send_and_wait(
        &self,
        message: Message,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        if self.closed.is_cancelled() {
            return Err(Error::Disconnected);
        }

        let correlation = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending table poisoned")
            .insert(correlation, reply_tx);

        let payload = encode_payload(correlation, &message);
        debug!(correlation, kind = ?message.kind(), "sending request");
        if self.outgoing.send(payload).is_err() {
            self.remove_waiter(correlation);
            return Err(Error::Disconnected);
        }

        let wait = async {
            tokio::select! {
                _ = self.closed.cancelled() => Err(Error::Disconnected),
                reply = reply_rx => reply.map_err(|_| Error::Disconnected),
            }
        };

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(limit)),
            },
            None => wait.await,
        };

        if result.is_err() {
            self.remove_waiter(correlation);
        }
        result
    }

    /// Queues a fire-and-forget message under the given correlation id.
    ///
    /// Responses reuse the request's id; unsolicited messages use 0. This is
    /// synchronous so disposal can run from `Drop`.
    pub fn send(&self, correlation: u64, message: &Message) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::Disconnected);
        }
        self.outgoing
            .send(encode_payload(correlation, message))
            .map_err(|_| Error::Disconnected)
    }

    /// Takes the inbound queue. The leader's peer loop consumes requests from
    /// here; a follower may consume unsolicited notifications. Can be taken
    /// once.
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Inbound>> {
        self.inbound.lock().expect("inbound slot poisoned").take()
    }

    /// Closes the transport, releasing every pending waiter with
    /// `Disconnected`.
    pub fn close(&self) {
        self.closed.cancel();
        self.pending
            .lock()
            .expect("pending table poisoned")
            .clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves when the transport has closed, for whatever reason.
    pub async fn wait_closed(&self) {
        self.closed.cancelled().await;
    }

    fn remove_waiter(&self, correlation: u64) {
        self.pending
            .lock()
            .expect("pending table poisoned")
            .remove(&correlation);
    }
}

// =============================================================================
// Writer Task
// =============================================================================

async fn write_loop<W>(
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let payload = tokio::select! {
            _ = closed.cancelled() => break,
            frame = outgoing.recv() => match frame {
                Some(payload) => payload,
                None => break,
            },
        };

        let len = payload.len() as u32;
        let write = async {
            writer.write_all(&len.to_be_bytes()).await?;
            if !payload.is_empty() {
                writer.write_all(&payload).await?;
            }
            writer.flush().await
        };

        if let Err(error) = write.await {
            debug!(%error, "transport write failed");
            closed.cancel();
            break;
        }
    }
}

// =============================================================================
// Reader Task
// =============================================================================

async fn read_loop<R>(
    mut reader: R,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Message>>>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = read_frame(&mut reader) => frame,
        };

        let payload = match frame {
            Ok(Some(payload)) => payload,
            // Keep-alive; nothing to deliver.
            Ok(None) => continue,
            Err(error) => {
                debug!(%error, "transport read ended");
                break;
            }
        };

        let (correlation, message) = match decode_payload(&payload) {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!(%error, "protocol error, closing transport");
                break;
            }
        };

        let waiter = if correlation != 0 {
            pending
                .lock()
                .expect("pending table poisoned")
                .remove(&correlation)
        } else {
            None
        };

        match waiter {
            Some(reply_tx) => {
                // Waiter may have timed out between removal and send.
                let _ = reply_tx.send(message);
            }
            None if message.kind().is_response() => {
                warn!(correlation, kind = ?message.kind(), "dropping late reply");
            }
            None => {
                if inbound.send((correlation, message)).is_err() {
                    debug!("inbound consumer gone, closing transport");
                    break;
                }
            }
        }
    }

    // Release every outstanding waiter with Disconnected.
    closed.cancel();
    pending.lock().expect("pending table poisoned").clear();
}

/// Reads one frame. `Ok(None)` is a keep-alive; `Err` covers EOF, I/O
/// failure, and oversized frames.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes);

    if len == 0 {
        return Ok(None);
    }
    if len > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

// =============================================================================
// Keep-Alive Task
// =============================================================================

async fn keepalive_loop(
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    interval: Duration,
    closed: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            _ = ticker.tick() => {
                if outgoing.send(Vec::new()).is_err() {
                    break;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
