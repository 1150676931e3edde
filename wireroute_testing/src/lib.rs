//! Utilities for exercising `wireroute` servers and sessions in tests.
//!
//! The helpers cover the client side of the wire: binding throwaway
//! listeners, starting a [`Server`](wireroute::Server) in the background,
//! driving a [`Session`](wireroute::Session) over an in-memory duplex
//! stream, and writing or reading frames with the same
//! [`Packer`](wireroute::packer::Packer) the server uses.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use wireroute::{Context, Message, Router, packer::DefaultPacker};
//! use wireroute_testing::{read_frame, spawn_server, write_frame};
//!
//! # async fn demo() -> std::io::Result<()> {
//! let router = Arc::new(Router::new());
//! router.register(1u32, |ctx: Context| async move {
//!     Ok(Some(ctx.raw_response(2u32, "pong")))
//! });
//! let server = spawn_server(router, |s| s).await;
//! let mut stream = server.connect().await?;
//! let packer = DefaultPacker::default();
//! write_frame(&packer, &mut stream, &Message::new(1u32, "ping")).await?;
//! let reply = read_frame(&packer, &mut stream).await?;
//! assert_eq!(reply.data().as_ref(), b"pong");
//! server.stop().await.map_err(std::io::Error::other)?;
//! # Ok(())
//! # }
//! ```

mod drive;
mod frames;
pub mod logging;
mod server;

pub use drive::{DuplexSession, drive_session};
pub use frames::{read_frame, write_frame};
pub use logging::{LoggerHandle, logger};
pub use server::{TestServer, spawn_server, spawn_udp_server, unused_listener, unused_udp_socket};
