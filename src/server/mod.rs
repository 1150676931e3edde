//! TCP and UDP server binding connections to a [`Router`].
//!
//! A [`Server`] is configured with builder methods, shared through an
//! `Arc`, and driven by [`Server::serve`] or [`Server::serve_udp`]. Each
//! accepted connection gets a [`Session`] registered in the server's
//! [`SessionRegistry`] for as long as its loops run. [`Server::stop`] ends
//! every serve loop, closes every session and waits for all spawned tasks.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{info, warn};
use tokio::sync::oneshot;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    backoff::BackoffConfig,
    codec::{BincodeCodec, Codec},
    packer::{DefaultPacker, Packer},
    router::Router,
    session::{Session, SessionConfig, SessionRegistry},
};

mod error;
mod tcp;
mod udp;

pub use error::ServerError;

/// Callback run when a stream session is created or has closed.
pub type SessionHook<C = BincodeCodec> = Arc<dyn Fn(&Arc<Session<C>>) + Send + Sync>;

/// Default UDP receive buffer, the largest IPv4 UDP payload.
pub const DEFAULT_UDP_BUFFER_SIZE: usize = 65_507;

/// Message server for stream and datagram transports.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use wireroute::{
///     router::{Context, Router},
///     server::{Server, ServerError},
/// };
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), ServerError> {
/// let router = Arc::new(Router::new());
/// router.register(1u32, |ctx: Context| async move {
///     Ok(Some(ctx.raw_response(2u32, "pong")))
/// });
/// let server = Arc::new(Server::new(router));
/// server.serve("127.0.0.1:5896").await
/// # }
/// ```
pub struct Server<C = BincodeCodec> {
    router: Arc<Router<C>>,
    packer: Arc<dyn Packer>,
    codec: Option<Arc<C>>,
    session_config: SessionConfig,
    socket_read_buffer: Option<usize>,
    socket_write_buffer: Option<usize>,
    udp_buffer_size: usize,
    print_routes: bool,
    backoff: BackoffConfig,
    on_session_create: Option<SessionHook<C>>,
    on_session_close: Option<SessionHook<C>>,
    ready_tx: Mutex<Option<oneshot::Sender<()>>>,
    registry: Arc<SessionRegistry<C>>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    stopped: AtomicBool,
}

impl<C: Codec> Server<C> {
    /// Create a server dispatching to `router` with the [`DefaultPacker`]
    /// and no codec.
    #[must_use]
    pub fn new(router: Arc<Router<C>>) -> Self {
        Self {
            router,
            packer: Arc::new(DefaultPacker::default()),
            codec: None,
            session_config: SessionConfig::default(),
            socket_read_buffer: None,
            socket_write_buffer: None,
            udp_buffer_size: DEFAULT_UDP_BUFFER_SIZE,
            print_routes: true,
            backoff: BackoffConfig::default(),
            on_session_create: None,
            on_session_close: None,
            ready_tx: Mutex::new(None),
            registry: Arc::new(SessionRegistry::default()),
            local_addr: Mutex::new(None),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            stopped: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn packer(mut self, packer: impl Packer) -> Self {
        self.packer = Arc::new(packer);
        self
    }

    /// Decode requests and encode responses with `codec`.
    #[must_use]
    pub fn codec(mut self, codec: C) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.session_config.read_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.session_config.write_timeout = Some(timeout);
        self
    }

    /// Attempts per frame on temporary write errors. Clamped to at least 1.
    #[must_use]
    pub fn write_attempts(mut self, attempts: u32) -> Self {
        self.session_config.write_attempts = attempts.max(1);
        self
    }

    /// Request queue capacity; `0` dispatches inline in the read loop.
    #[must_use]
    pub fn req_queue_size(mut self, size: usize) -> Self {
        self.session_config.req_queue_size = size;
        self
    }

    /// Outbound queue capacity. Clamped to at least 1.
    #[must_use]
    pub fn resp_queue_size(mut self, size: usize) -> Self {
        self.session_config.resp_queue_size = size.max(1);
        self
    }

    #[must_use]
    pub fn socket_read_buffer(mut self, bytes: usize) -> Self {
        self.socket_read_buffer = Some(bytes);
        self
    }

    #[must_use]
    pub fn socket_write_buffer(mut self, bytes: usize) -> Self {
        self.socket_write_buffer = Some(bytes);
        self
    }

    /// Size of the buffer each datagram is received into. Clamped to at
    /// least 1.
    ///
    /// Longer datagrams are truncated to this size by the operating system.
    /// A datagram filling the whole buffer is logged as possibly truncated
    /// and will usually fail to unpack.
    #[must_use]
    pub fn udp_buffer_size(mut self, bytes: usize) -> Self {
        self.udp_buffer_size = bytes.max(1);
        self
    }

    /// Whether to log the route table when serving starts.
    #[must_use]
    pub fn print_routes(mut self, enabled: bool) -> Self {
        self.print_routes = enabled;
        self
    }

    /// Back-off applied to transient accept errors and write retries.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        let backoff = backoff.normalized();
        self.backoff = backoff;
        self.session_config.write_backoff = backoff;
        self
    }

    /// Run `hook` for each stream session before its loops start.
    #[must_use]
    pub fn on_session_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<Session<C>>) + Send + Sync + 'static,
    {
        self.on_session_create = Some(Arc::new(hook));
        self
    }

    /// Run `hook` for each stream session once its loops have exited.
    #[must_use]
    pub fn on_session_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<Session<C>>) + Send + Sync + 'static,
    {
        self.on_session_close = Some(Arc::new(hook));
        self
    }

    /// Signal `tx` once the server is bound and about to accept.
    #[must_use]
    pub fn ready_signal(self, tx: oneshot::Sender<()>) -> Self {
        *self.ready_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self
    }

    /// Share `registry` with other components instead of a private one.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<SessionRegistry<C>>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn router(&self) -> &Arc<Router<C>> { &self.router }

    /// Live stream sessions.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry<C>> { &self.registry }

    /// Address of the most recently bound listener or socket.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool { self.stopped.load(Ordering::Acquire) }

    /// Stop serving.
    ///
    /// Cancels every accept and receive loop, closes every registered
    /// session and waits for all connection tasks to finish. When this
    /// returns, every listener this server bound has been closed. Calling
    /// `stop` again only waits.
    pub async fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            info!("server stopping: sessions={}", self.registry.len());
            self.shutdown.cancel();
            self.registry.close_all();
        }
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn new_session(&self, peer_addr: SocketAddr) -> Session<C> {
        Session::new(Arc::clone(&self.packer), self.session_config)
            .with_codec(self.codec.clone())
            .with_peer_addr(peer_addr)
            .with_shutdown(&self.shutdown)
    }

    /// Record the bound address, log routes and fire the ready signal.
    fn announce(&self, local_addr: SocketAddr, transport: &str) {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(local_addr);
        info!("server listening: local_addr={local_addr}, transport={transport}");
        if self.print_routes {
            self.router.log_routes();
        }
        let ready = self
            .ready_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = ready
            && tx.send(()).is_err()
        {
            warn!("failed to send readiness signal: receiver dropped");
        }
    }
}

impl<C> fmt::Debug for Server<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("session_config", &self.session_config)
            .field("socket_read_buffer", &self.socket_read_buffer)
            .field("socket_write_buffer", &self.socket_write_buffer)
            .field("udp_buffer_size", &self.udp_buffer_size)
            .field("print_routes", &self.print_routes)
            .field("backoff", &self.backoff)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
