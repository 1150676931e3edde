#![doc(html_root_url = "https://docs.rs/wireroute/latest")]
//! Public API for the `wireroute` library.
//!
//! This crate provides a message-oriented server framework: bytes from a
//! TCP stream or UDP datagram are framed into [`Message`]s by a
//! [`Packer`](packer::Packer), routed by id through a middleware chain to a
//! handler, and any response is packed and written back to the peer.

pub mod backoff;
pub mod byte_order;
pub mod codec;
pub mod message;
pub mod metrics;
pub mod middleware;
pub mod packer;
pub mod panic;
pub mod router;
pub mod server;
pub mod session;
pub mod values;

pub use codec::{BincodeCodec, Codec, CodecError, JsonCodec};
pub use message::{Id, Message};
pub use metrics::{Direction, ERRORS_TOTAL, FRAMES_PROCESSED, PANICS_TOTAL, SESSIONS_ACTIVE};
pub use middleware::{Handler, HandlerError, HandlerResult, Middleware};
pub use router::{Context, Router};
pub use server::{Server, ServerError};
pub use session::{Session, SessionError, SessionId, SessionRegistry};
