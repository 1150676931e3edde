//! Per-connection runtime unit.
//!
//! A [`Session`] bridges one connection (or one UDP peer context) to the
//! [`Router`](crate::router::Router). It owns the outbound queue, the packer
//! and codec used for the connection, and a single-fire close signal
//! observed by every loop and by every push onto the queue.
//!
//! # Lifecycle
//!
//! `Open -> Closing -> Closed`. A write error, an explicit
//! [`Session::close`] or server shutdown moves the session to `Closing`
//! exactly once; it becomes `Closed` when all of its loops have exited.
//! End of input (peer EOF, a read error or an unframable stream) first
//! finishes the requests already read and flushes the queued responses,
//! then closes the session the same way.
//!
//! # Dispatch ordering
//!
//! Requests from one session are dispatched one at a time in arrival order,
//! either inline in the read loop (`req_queue_size == 0`) or by a single
//! dispatch task fed from a bounded request queue. Responses are therefore
//! written in request order. Nothing is ordered across sessions.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use log::debug;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::BackoffConfig,
    codec::{BincodeCodec, Codec},
    message::Message,
    packer::Packer,
};

mod loops;
mod registry;

pub use registry::SessionRegistry;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier assigned to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl From<u64> for SessionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl SessionId {
    /// Create a [`SessionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Allocate the next unused identifier.
    #[must_use]
    pub fn next() -> Self { Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "SessionId({})", self.0) }
}

/// Transport a session is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    /// A connected byte stream with long-lived read and write loops.
    Stream,
    /// One datagram exchange with a UDP peer.
    Datagram,
}

/// Observable lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Errors returned by session operations.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    /// The session has closed; the message was not queued.
    #[error("session already closed")]
    Closed,
    /// The outbound queue is full.
    #[error("session outbound queue is full")]
    QueueFull,
    /// No live session has the requested id.
    #[error("no session with id {0}")]
    NotFound(SessionId),
    /// The session's loops were already started.
    #[error("session loops already running")]
    AlreadyRunning,
}

/// Per-session timing and queue settings.
///
/// `req_queue_size == 0` dispatches requests inline in the read loop, so the
/// next frame is not read until the previous request has been handled. The
/// outbound queue always holds at least one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Deadline for the next frame to start arriving. Expiry is logged and
    /// the read loop keeps waiting.
    pub read_timeout: Option<Duration>,
    /// Deadline for writing one frame. Expiry closes the session.
    pub write_timeout: Option<Duration>,
    /// Attempts made for a write hitting temporary transport errors.
    pub write_attempts: u32,
    /// Back-off between write attempts.
    pub write_backoff: BackoffConfig,
    /// Capacity of the request queue between the read and dispatch loops.
    pub req_queue_size: usize,
    /// Capacity of the outbound response queue.
    pub resp_queue_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: None,
            write_timeout: None,
            write_attempts: 3,
            write_backoff: BackoffConfig::default(),
            req_queue_size: 0,
            resp_queue_size: 1024,
        }
    }
}

/// One connection or UDP peer context bound to the router.
pub struct Session<C = BincodeCodec> {
    id: SessionId,
    kind: SessionKind,
    peer_addr: Option<SocketAddr>,
    packer: Arc<dyn Packer>,
    codec: Option<Arc<C>>,
    config: SessionConfig,
    outbound: mpsc::Sender<Message>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    closing: AtomicBool,
    finished: AtomicBool,
    closed: CancellationToken,
}

impl<C: Codec> Session<C> {
    /// Create an open stream session using `packer` and `config`.
    #[must_use]
    pub fn new(packer: Arc<dyn Packer>, config: SessionConfig) -> Self {
        let (outbound, rx) = mpsc::channel(config.resp_queue_size.max(1));
        Self {
            id: SessionId::next(),
            kind: SessionKind::Stream,
            peer_addr: None,
            packer,
            codec: None,
            config,
            outbound,
            outbound_rx: Mutex::new(Some(rx)),
            closing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    /// Decode and encode payloads with `codec`.
    #[must_use]
    pub fn with_codec(mut self, codec: Option<Arc<C>>) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_peer_addr(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: SessionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Close this session whenever `shutdown` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: &CancellationToken) -> Self {
        self.closed = shutdown.child_token();
        self
    }

    #[must_use]
    pub fn id(&self) -> SessionId { self.id }

    #[must_use]
    pub fn kind(&self) -> SessionKind { self.kind }

    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }

    #[must_use]
    pub fn packer(&self) -> &Arc<dyn Packer> { &self.packer }

    #[must_use]
    pub fn codec(&self) -> Option<&Arc<C>> { self.codec.as_ref() }

    #[must_use]
    pub fn config(&self) -> &SessionConfig { &self.config }

    /// Queue `msg` for the write loop, waiting for space if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the session is closed before or
    /// while waiting. Never panics on a closed queue.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn send(&self, msg: Message) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        tokio::select! {
            biased;

            () = self.closed.cancelled() => Err(SessionError::Closed),
            res = self.outbound.send(msg) => res.map_err(|_| SessionError::Closed),
        }
    }

    /// Queue `msg` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::QueueFull`] if the queue has no space and
    /// [`SessionError::Closed`] once the session has closed.
    pub fn try_send(&self, msg: Message) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.outbound.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    /// Fire the close signal.
    ///
    /// Returns `true` only for the call that moved the session out of
    /// `Open`; every other call, concurrent or later, is a no-op returning
    /// `false`.
    pub fn close(&self) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();
        debug!(
            "session closing: session_id={}, peer_addr={:?}",
            self.id, self.peer_addr
        );
        true
    }

    /// Whether the close signal has fired, either directly or through the
    /// owning server's shutdown.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.is_cancelled() }

    /// Resolve once the session's close signal fires.
    pub async fn closed(&self) { self.closed.cancelled().await; }

    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.finished.load(Ordering::Acquire) {
            SessionState::Closed
        } else if self.is_closed() {
            SessionState::Closing
        } else {
            SessionState::Open
        }
    }

    pub(crate) fn close_token(&self) -> &CancellationToken { &self.closed }

    /// Take the outbound receiver; only the first caller gets it.
    pub(crate) fn take_outbound(&self) -> Option<mpsc::Receiver<Message>> {
        self.outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn mark_finished(&self) {
        self.close();
        self.finished.store(true, Ordering::Release);
    }
}

impl<C> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}
