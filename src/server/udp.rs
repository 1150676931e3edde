//! Datagram transport.
//!
//! One socket serves every peer. Each datagram is unpacked and dispatched in
//! its own short-lived task with a [`SessionKind::Datagram`] session bound
//! to the sender's address; whatever the handler queues on that session is
//! sent back to the sender. Datagram sessions are not registered and do not
//! run the session hooks.

use std::{
    io,
    net::{SocketAddr, UdpSocket as StdUdpSocket},
    panic::AssertUnwindSafe,
    sync::Arc,
};

use bytes::Bytes;
use futures::FutureExt;
use log::{debug, error, warn};
use tokio::{
    net::{ToSocketAddrs, UdpSocket},
    select,
};

use super::{Server, ServerError};
use crate::{
    codec::Codec,
    message::Message,
    metrics::{self, Direction},
    panic::format_panic,
    session::SessionKind,
};

/// Receive errors that concern one peer rather than the socket.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

impl<C: Codec> Server<C> {
    /// Bind `addr` and serve datagrams until stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if binding fails,
    /// [`ServerError::Receive`] on a non-transient receive error and
    /// [`ServerError::Stopped`] once [`Server::stop`] has been called.
    pub async fn serve_udp(self: &Arc<Self>, addr: impl ToSocketAddrs) -> Result<(), ServerError> {
        if self.is_stopped() {
            return Err(ServerError::Stopped);
        }
        let socket = UdpSocket::bind(addr).await.map_err(ServerError::Bind)?;
        self.serve_tokio_socket(socket).await
    }

    /// Serve datagrams from an already bound socket.
    ///
    /// # Errors
    ///
    /// As for [`Server::serve_udp`].
    pub async fn serve_udp_socket(self: &Arc<Self>, socket: StdUdpSocket) -> Result<(), ServerError> {
        if self.is_stopped() {
            return Err(ServerError::Stopped);
        }
        socket.set_nonblocking(true).map_err(ServerError::Bind)?;
        let socket = UdpSocket::from_std(socket).map_err(ServerError::Bind)?;
        self.serve_tokio_socket(socket).await
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn serve_tokio_socket(self: &Arc<Self>, socket: UdpSocket) -> Result<(), ServerError> {
        let guard = self.tracker.token();
        let local_addr = socket.local_addr().map_err(ServerError::Bind)?;
        self.announce(local_addr, "udp");
        let socket = Arc::new(socket);
        let mut buf = vec![0u8; self.udp_buffer_size];

        let result = loop {
            let received = select! {
                biased;

                () = self.shutdown.cancelled() => break Err(ServerError::Stopped),
                res = socket.recv_from(&mut buf) => res,
            };
            match received {
                Ok((len, peer_addr)) => {
                    if len == buf.len() {
                        warn!(
                            "datagram may be truncated: peer_addr={peer_addr}, len={len}, udp_buffer_size={}",
                            buf.len()
                        );
                    }
                    let datagram = Bytes::copy_from_slice(&buf[..len]);
                    self.spawn_datagram(Arc::clone(&socket), datagram, peer_addr);
                }
                Err(e) if is_transient(&e) => {
                    debug!("datagram receive error: error={e:?}, local_addr={local_addr}");
                }
                Err(e) => {
                    error!("datagram receive failed; stopping: error={e:?}, local_addr={local_addr}");
                    metrics::inc_errors();
                    break Err(ServerError::Receive(e));
                }
            }
        };
        drop(socket);
        drop(guard);
        result
    }

    fn spawn_datagram(self: &Arc<Self>, socket: Arc<UdpSocket>, datagram: Bytes, peer_addr: SocketAddr) {
        let server = Arc::clone(self);
        self.tracker.spawn(async move {
            let fut = AssertUnwindSafe(server.process_datagram(&socket, datagram, peer_addr))
                .catch_unwind();
            if let Err(panic) = fut.await {
                metrics::inc_panics();
                let panic_msg = format_panic(panic.as_ref());
                error!("datagram task panicked: panic={panic_msg}, peer_addr={peer_addr}");
                tracing::error!(panic = %panic_msg, %peer_addr, "datagram task panicked");
            }
        });
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn process_datagram(&self, socket: &UdpSocket, datagram: Bytes, peer_addr: SocketAddr) {
        let mut reader: &[u8] = &datagram;
        let msg = match self.packer.unpack(&mut reader).await {
            Ok(Some(msg)) => msg,
            Ok(None) => return,
            Err(e) => {
                warn!("datagram unpack failed: peer_addr={peer_addr}, error={e}");
                metrics::inc_errors();
                return;
            }
        };
        if !reader.is_empty() {
            debug!(
                "datagram has trailing bytes: peer_addr={peer_addr}, trailing={}",
                reader.len()
            );
        }
        metrics::inc_frames(Direction::Inbound);

        let session = Arc::new(self.new_session(peer_addr).with_kind(SessionKind::Datagram));
        let Some(mut outbound) = session.take_outbound() else {
            return;
        };

        let dispatch = async {
            select! {
                biased;

                () = session.closed() => {}
                () = self.router.handle(&session, msg) => {}
            }
            session.close();
        };
        let flush = async {
            loop {
                select! {
                    biased;

                    resp = outbound.recv() => match resp {
                        Some(resp) => self.send_datagram(socket, &resp, peer_addr).await,
                        None => break,
                    },
                    () = session.closed() => break,
                }
            }
            while let Ok(resp) = outbound.try_recv() {
                self.send_datagram(socket, &resp, peer_addr).await;
            }
        };
        tokio::join!(dispatch, flush);
        session.mark_finished();
    }

    async fn send_datagram(&self, socket: &UdpSocket, msg: &Message, peer_addr: SocketAddr) {
        let frame = match self.packer.pack(msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("pack failed; dropping message: peer_addr={peer_addr}, id={}, error={e}", msg.id());
                metrics::inc_errors();
                return;
            }
        };
        match socket.send_to(&frame, peer_addr).await {
            Ok(_) => metrics::inc_frames(Direction::Outbound),
            Err(e) => {
                warn!("datagram send failed: peer_addr={peer_addr}, error={e}");
                metrics::inc_errors();
            }
        }
    }
}
