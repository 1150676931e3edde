//! Background servers bound to ephemeral localhost ports.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener, UdpSocket as StdUdpSocket},
    sync::Arc,
};

use tokio::{net::TcpStream, sync::oneshot, task::JoinHandle};
use wireroute::{BincodeCodec, Codec, Router, Server, ServerError};

/// Create a TCP listener bound to a free local port.
#[expect(
    clippy::expect_used,
    reason = "binding to an ephemeral localhost port must abort the test immediately"
)]
#[must_use]
pub fn unused_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("failed to bind port")
}

/// Create a UDP socket bound to a free local port.
#[expect(
    clippy::expect_used,
    reason = "binding to an ephemeral localhost port must abort the test immediately"
)]
#[must_use]
pub fn unused_udp_socket() -> StdUdpSocket {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdUdpSocket::bind(addr).expect("failed to bind port")
}

/// A server running in a background task.
pub struct TestServer<C = BincodeCodec> {
    /// The running server, for inspecting sessions or stopping it directly.
    pub server: Arc<Server<C>>,
    /// Address the server is bound to.
    pub addr: SocketAddr,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl<C: Codec> TestServer<C> {
    /// Open a TCP connection to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(&self) -> io::Result<TcpStream> { TcpStream::connect(self.addr).await }

    /// Stop the server and wait for its serve task.
    ///
    /// A serve loop ending with [`ServerError::Stopped`] counts as success.
    ///
    /// # Errors
    ///
    /// Returns any other error the serve loop ended with.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.server.stop().await;
        match self.handle.await {
            Ok(Ok(()) | Err(ServerError::Stopped)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

/// Start a TCP server for `router` on a free port.
///
/// `configure` receives the server with route printing disabled and may
/// apply any builder method. Returns once the server is accepting.
#[expect(
    clippy::expect_used,
    reason = "a server that cannot start must abort the test immediately"
)]
pub async fn spawn_server<C, F>(router: Arc<Router<C>>, configure: F) -> TestServer<C>
where
    C: Codec,
    F: FnOnce(Server<C>) -> Server<C>,
{
    let listener = unused_listener();
    let addr = listener.local_addr().expect("listener address");
    let (tx, rx) = oneshot::channel();
    let server = Arc::new(configure(Server::new(router).print_routes(false)).ready_signal(tx));
    let handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve_listener(listener).await })
    };
    rx.await.expect("server failed to signal readiness");
    TestServer {
        server,
        addr,
        handle,
    }
}

/// Start a UDP server for `router` on a free port.
#[expect(
    clippy::expect_used,
    reason = "a server that cannot start must abort the test immediately"
)]
pub async fn spawn_udp_server<C, F>(router: Arc<Router<C>>, configure: F) -> TestServer<C>
where
    C: Codec,
    F: FnOnce(Server<C>) -> Server<C>,
{
    let socket = unused_udp_socket();
    let addr = socket.local_addr().expect("socket address");
    let (tx, rx) = oneshot::channel();
    let server = Arc::new(configure(Server::new(router).print_routes(false)).ready_signal(tx));
    let handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve_udp_socket(socket).await })
    };
    rx.await.expect("server failed to signal readiness");
    TestServer {
        server,
        addr,
        handle,
    }
}
