//! Stream transport: accept loop and per-connection tasks.

use std::{
    io,
    net::{SocketAddr, TcpListener as StdTcpListener},
    panic::AssertUnwindSafe,
    sync::Arc,
};

use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, error, warn};
use socket2::SockRef;
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
    time::sleep,
};

use super::{Server, ServerError};
use crate::{
    codec::Codec,
    metrics,
    panic::format_panic,
    session::{Session, SessionRegistry},
};

/// Source of incoming connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(super) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Accept errors worth retrying: the listener itself is still usable.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::OutOfMemory
    ) || is_resource_exhausted(e)
}

/// ENOMEM, ENFILE, EMFILE and ENOBUFS.
#[cfg(target_os = "linux")]
fn is_resource_exhausted(e: &io::Error) -> bool { matches!(e.raw_os_error(), Some(12 | 23 | 24 | 105)) }

#[cfg(not(target_os = "linux"))]
fn is_resource_exhausted(_e: &io::Error) -> bool { false }

impl<C: Codec> Server<C> {
    /// Bind `addr` and serve stream connections until stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if binding fails,
    /// [`ServerError::Accept`] on a non-transient accept error and
    /// [`ServerError::Stopped`] once [`Server::stop`] has been called.
    pub async fn serve(self: &Arc<Self>, addr: impl ToSocketAddrs) -> Result<(), ServerError> {
        if self.is_stopped() {
            return Err(ServerError::Stopped);
        }
        let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
        self.serve_tokio_listener(listener).await
    }

    /// Serve stream connections from an already bound listener.
    ///
    /// # Errors
    ///
    /// As for [`Server::serve`].
    pub async fn serve_listener(self: &Arc<Self>, listener: StdTcpListener) -> Result<(), ServerError> {
        if self.is_stopped() {
            return Err(ServerError::Stopped);
        }
        listener.set_nonblocking(true).map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(listener).map_err(ServerError::Bind)?;
        self.serve_tokio_listener(listener).await
    }

    async fn serve_tokio_listener(self: &Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        // Held until the listener is dropped so `stop` waits for it.
        let guard = self.tracker.token();
        let local_addr = listener.local_addr().map_err(ServerError::Bind)?;
        self.announce(local_addr, "tcp");
        let result = self.accept_loop(&listener).await;
        drop(listener);
        drop(guard);
        debug!("listener closed: local_addr={local_addr}");
        result
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn accept_loop<L>(self: &Arc<Self>, listener: &L) -> Result<(), ServerError>
    where
        L: AcceptListener,
    {
        let backoff = self.backoff.normalized();
        let mut delay = backoff.initial_delay;
        loop {
            let accepted = select! {
                biased;

                () = self.shutdown.cancelled() => return Err(ServerError::Stopped),
                res = listener.accept() => res,
            };
            match accepted {
                Ok((stream, peer_addr)) => {
                    delay = backoff.initial_delay;
                    self.spawn_connection(stream, peer_addr);
                }
                Err(e) if is_transient(&e) => {
                    let local_addr = listener.local_addr().ok();
                    warn!("accept error: error={e:?}, local_addr={local_addr:?}, retry_in={delay:?}");
                    metrics::inc_errors();
                    select! {
                        biased;

                        () = self.shutdown.cancelled() => return Err(ServerError::Stopped),
                        () = sleep(delay) => {}
                    }
                    delay = backoff.next_delay(delay);
                }
                Err(e) => {
                    let local_addr = listener.local_addr().ok();
                    error!("accept failed; stopping listener: error={e:?}, local_addr={local_addr:?}");
                    metrics::inc_errors();
                    return Err(ServerError::Accept(e));
                }
            }
        }
    }

    /// Spawn a task driving one connection, logging and discarding any panic.
    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let server = Arc::clone(self);
        self.tracker.spawn(async move {
            let fut = AssertUnwindSafe(server.process_stream(stream, peer_addr)).catch_unwind();
            if let Err(panic) = fut.await {
                metrics::inc_panics();
                let panic_msg = format_panic(panic.as_ref());
                // Emit via both `log` and `tracing` for tests that capture either.
                error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr}");
                tracing::error!(panic = %panic_msg, %peer_addr, "connection task panicked");
            }
        });
    }

    async fn process_stream(&self, stream: TcpStream, peer_addr: SocketAddr) {
        self.tune_socket(&stream, peer_addr);
        let session = Arc::new(self.new_session(peer_addr));
        let registered = Registered::new(&self.registry, &session);
        debug!(
            "session created: session_id={}, peer_addr={peer_addr}",
            session.id()
        );
        if let Some(hook) = &self.on_session_create {
            hook(&session);
        }

        let (reader, writer) = stream.into_split();
        if let Err(e) = session.run(reader, writer, Arc::clone(&self.router)).await {
            warn!("session run failed: session_id={}, error={e}", session.id());
        }

        if let Some(hook) = &self.on_session_close {
            hook(&session);
        }
        drop(registered);
    }

    fn tune_socket(&self, stream: &TcpStream, peer_addr: SocketAddr) {
        let socket = SockRef::from(stream);
        if let Some(size) = self.socket_read_buffer
            && let Err(e) = socket.set_recv_buffer_size(size)
        {
            warn!("failed to set read buffer: size={size}, peer_addr={peer_addr}, error={e}");
        }
        if let Some(size) = self.socket_write_buffer
            && let Err(e) = socket.set_send_buffer_size(size)
        {
            warn!("failed to set write buffer: size={size}, peer_addr={peer_addr}, error={e}");
        }
    }
}

/// Registry entry removed when dropped, including on unwind.
struct Registered<'a, C: Codec> {
    registry: &'a SessionRegistry<C>,
    session: Arc<Session<C>>,
}

impl<'a, C: Codec> Registered<'a, C> {
    fn new(registry: &'a SessionRegistry<C>, session: &Arc<Session<C>>) -> Self {
        registry.insert(Arc::clone(session));
        metrics::inc_sessions();
        Self {
            registry,
            session: Arc::clone(session),
        }
    }
}

impl<C: Codec> Drop for Registered<'_, C> {
    fn drop(&mut self) {
        self.session.close();
        self.registry.remove(&self.session.id());
        metrics::dec_sessions();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use rstest::{fixture, rstest};
    use tokio::time::{Duration, timeout};

    use super::{MockAcceptListener, is_transient};
    use crate::{
        router::Router,
        server::{Server, ServerError},
    };

    #[fixture]
    fn server() -> Arc<Server> { Arc::new(Server::new(Arc::new(Router::new()))) }

    fn failing_listener(kind: io::ErrorKind, calls: &Arc<AtomicUsize>) -> MockAcceptListener {
        let mut listener = MockAcceptListener::new();
        let counter = Arc::clone(calls);
        listener.expect_accept().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Err(io::Error::from(kind)) })
        });
        listener
            .expect_local_addr()
            .returning(|| Ok("127.0.0.1:0".parse().expect("addr parse")));
        listener
    }

    #[rstest]
    #[case(io::ErrorKind::ConnectionAborted, true)]
    #[case(io::ErrorKind::Interrupted, true)]
    #[case(io::ErrorKind::PermissionDenied, false)]
    #[case(io::ErrorKind::InvalidInput, false)]
    fn transient_classification(#[case] kind: io::ErrorKind, #[case] transient: bool) {
        assert_eq!(is_transient(&io::Error::from(kind)), transient);
    }

    #[rstest]
    #[tokio::test]
    async fn fatal_accept_error_ends_loop(server: Arc<Server>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let listener = failing_listener(io::ErrorKind::PermissionDenied, &calls);
        let err = server
            .accept_loop(&listener)
            .await
            .expect_err("fatal error surfaces");
        assert!(matches!(err, ServerError::Accept(e) if e.kind() == io::ErrorKind::PermissionDenied));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_until_stopped(server: Arc<Server>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let listener = failing_listener(io::ErrorKind::ConnectionAborted, &calls);
        let looping = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.accept_loop(&listener).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        server.stop().await;
        let result = timeout(Duration::from_secs(1), looping)
            .await
            .expect("loop ends after stop")
            .expect("join accept loop");
        assert!(matches!(result, Err(ServerError::Stopped)));
        assert!(calls.load(Ordering::SeqCst) > 1);
    }
}
