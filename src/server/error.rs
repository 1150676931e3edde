//! Errors raised by [`Server`](super::Server) operations.

use std::io;

use thiserror::Error;

/// Errors that end a `serve` call.
///
/// Per-session failures never surface here; they close the affected
/// session only.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Binding or configuring the listening socket failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
    /// Accepting a connection failed with a non-transient error.
    #[error("accept error: {0}")]
    Accept(#[source] io::Error),
    /// Receiving a datagram failed with a non-transient error.
    #[error("receive error: {0}")]
    Receive(#[source] io::Error),
    /// The server was stopped. Returned by `serve` once [`Server::stop`]
    /// has been called.
    ///
    /// [`Server::stop`]: super::Server::stop
    #[error("server stopped")]
    Stopped,
}

impl ServerError {
    /// Whether this error only reports a requested stop.
    #[must_use]
    pub fn is_stopped(&self) -> bool { matches!(self, ServerError::Stopped) }
}
