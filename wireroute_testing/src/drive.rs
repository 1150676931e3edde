//! In-memory session driving.

use std::sync::Arc;

use tokio::{
    io::{DuplexStream, duplex, split},
    task::JoinHandle,
};
use wireroute::{BincodeCodec, Codec, Router, Session, SessionError};

const DEFAULT_CAPACITY: usize = 4096;

/// A session running over one half of a duplex stream.
pub struct DuplexSession<C = BincodeCodec> {
    /// Peer end of the stream.
    pub client: DuplexStream,
    /// The running session.
    pub session: Arc<Session<C>>,
    task: JoinHandle<Result<(), SessionError>>,
}

impl<C: Codec> DuplexSession<C> {
    /// Close the session and wait for all of its loops to exit.
    ///
    /// # Errors
    ///
    /// Returns the error from [`Session::run`].
    pub async fn finish(self) -> Result<(), SessionError> {
        self.session.close();
        self.join().await
    }

    /// Wait for the session's loops to exit on their own.
    ///
    /// # Errors
    ///
    /// Returns the error from [`Session::run`].
    pub async fn join(self) -> Result<(), SessionError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

/// Run `session` against `router` over an in-memory stream.
///
/// Frames written to [`DuplexSession::client`] reach the session's read
/// loop; frames the session writes can be read back from it.
pub fn drive_session<C: Codec>(router: Arc<Router<C>>, session: Session<C>) -> DuplexSession<C> {
    let (client, server) = duplex(DEFAULT_CAPACITY);
    let (reader, writer) = split(server);
    let session = Arc::new(session);
    let task = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run(reader, writer, router).await })
    };
    DuplexSession {
        client,
        session,
        task,
    }
}
