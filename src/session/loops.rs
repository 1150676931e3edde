//! Read, dispatch and write loops driving a stream session.

use std::{io, sync::Arc, time::Duration};

use log::{debug, error, warn};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

use super::{Session, SessionError, SessionId};
use crate::{
    backoff::BackoffConfig,
    codec::Codec,
    message::Message,
    metrics::{self, Direction},
    panic::format_panic,
    router::Router,
};

/// Where the read loop hands decoded requests.
enum RequestSink<C> {
    /// Dispatch in the read loop itself.
    Inline(Arc<Router<C>>),
    /// Forward to the dispatch task.
    Queue(mpsc::Sender<Message>),
}

impl<C: Codec> Session<C> {
    /// Drive this session over `reader` and `writer` until it closes.
    ///
    /// Spawns the read loop, the write loop and, when `req_queue_size > 0`,
    /// a dispatch loop, then waits for all of them.
    ///
    /// When input ends (peer EOF, a read error or an unframable stream) the
    /// requests already read are still dispatched and the responses already
    /// queued are still written before the session closes. [`Session::close`]
    /// and server shutdown stop every loop at once, dropping queued work. A
    /// write failure closes the session. A panic inside a loop is logged and
    /// treated as a close.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyRunning`] if called more than once.
    pub async fn run<R, W>(
        self: &Arc<Self>,
        reader: R,
        writer: W,
        router: Arc<Router<C>>,
    ) -> Result<(), SessionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Some(outbound) = self.take_outbound() else {
            return Err(SessionError::AlreadyRunning);
        };

        let (sink, dispatch) = if self.config.req_queue_size == 0 {
            (RequestSink::Inline(router), None)
        } else {
            let (tx, rx) = mpsc::channel(self.config.req_queue_size);
            let task = tokio::spawn(dispatch_loop(Arc::clone(self), rx, router));
            (RequestSink::Queue(tx), Some(task))
        };

        // Fired once no further responses can come from the read side.
        let input_done = CancellationToken::new();
        let read = tokio::spawn(read_loop(Arc::clone(self), reader, sink));
        let write = tokio::spawn(write_loop(
            Arc::clone(self),
            writer,
            outbound,
            input_done.clone(),
        ));

        self.join_loop("read", read).await;
        if let Some(task) = dispatch {
            self.join_loop("dispatch", task).await;
        }
        input_done.cancel();
        self.join_loop("write", write).await;

        self.mark_finished();
        debug!("session closed: session_id={}, peer_addr={:?}", self.id, self.peer_addr);
        Ok(())
    }

    async fn join_loop(&self, name: &str, task: tokio::task::JoinHandle<()>) {
        if let Err(e) = task.await {
            self.close();
            if e.is_panic() {
                metrics::inc_panics();
                let panic = e.into_panic();
                let panic_msg = format_panic(panic.as_ref());
                error!(
                    "session {name} loop panicked: panic={panic_msg}, session_id={}",
                    self.id
                );
                tracing::error!(panic = %panic_msg, session_id = self.id.as_u64(), "session {name} loop panicked");
            }
        }
    }
}

/// Wait until the next frame starts arriving.
///
/// Returns `false` at end of stream. An elapsed read deadline is logged and
/// the wait restarts; no bytes are consumed while waiting, so a deadline
/// never splits a frame.
async fn wait_for_frame<R>(
    reader: &mut BufReader<R>,
    read_timeout: Option<Duration>,
    session_id: SessionId,
) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let Some(limit) = read_timeout else {
        return reader.fill_buf().await.map(|buf| !buf.is_empty());
    };
    loop {
        match timeout(limit, reader.fill_buf()).await {
            Ok(res) => return res.map(|buf| !buf.is_empty()),
            Err(_) => debug!("read timeout elapsed; continuing: session_id={session_id}"),
        }
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn read_loop<C, R>(session: Arc<Session<C>>, reader: R, sink: RequestSink<C>)
where
    C: Codec,
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let token = session.close_token().clone();
    let read_timeout = session.config.read_timeout;

    loop {
        let ready = tokio::select! {
            biased;

            () = token.cancelled() => break,
            res = wait_for_frame(&mut reader, read_timeout, session.id) => res,
        };
        match ready {
            Ok(true) => {}
            Ok(false) => {
                debug!("peer closed stream: session_id={}", session.id);
                break;
            }
            Err(e) => {
                warn!("read failed: session_id={}, error={e}", session.id);
                metrics::inc_errors();
                break;
            }
        }

        let unpacked = tokio::select! {
            biased;

            () = token.cancelled() => break,
            res = session.packer.unpack(&mut reader) => res,
        };
        let msg = match unpacked {
            Ok(Some(msg)) => msg,
            Ok(None) => continue,
            Err(e) if e.is_eof() => {
                debug!("peer closed stream mid-frame: session_id={}", session.id);
                break;
            }
            Err(e) if e.is_fatal() => {
                warn!("unpack failed; closing session: session_id={}, error={e}", session.id);
                metrics::inc_errors();
                break;
            }
            Err(e) => {
                warn!("unpack failed; skipping frame: session_id={}, error={e}", session.id);
                metrics::inc_errors();
                continue;
            }
        };
        metrics::inc_frames(Direction::Inbound);

        match &sink {
            RequestSink::Inline(router) => {
                tokio::select! {
                    biased;

                    () = token.cancelled() => break,
                    () = router.handle(&session, msg) => {}
                }
            }
            RequestSink::Queue(tx) => {
                let sent = tokio::select! {
                    biased;

                    () = token.cancelled() => break,
                    res = tx.send(msg) => res,
                };
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn dispatch_loop<C: Codec>(
    session: Arc<Session<C>>,
    mut requests: mpsc::Receiver<Message>,
    router: Arc<Router<C>>,
) {
    let token = session.close_token().clone();
    loop {
        let msg = tokio::select! {
            biased;

            () = token.cancelled() => break,
            msg = requests.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        tokio::select! {
            biased;

            () = token.cancelled() => break,
            () = router.handle(&session, msg) => {}
        }
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn write_loop<C, W>(
    session: Arc<Session<C>>,
    mut writer: W,
    mut outbound: mpsc::Receiver<Message>,
    input_done: CancellationToken,
) where
    C: Codec,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let token = session.close_token().clone();
    let cfg = session.config;

    loop {
        let msg = tokio::select! {
            biased;

            () = token.cancelled() => break,
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            () = input_done.cancelled() => {
                debug!("input finished; outbound queue flushed: session_id={}", session.id);
                break;
            }
        };

        let frame = match session.packer.pack(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    "pack failed; dropping message: session_id={}, id={}, error={e}",
                    session.id,
                    msg.id()
                );
                metrics::inc_errors();
                continue;
            }
        };

        let write = write_with_retry(&mut writer, &frame, cfg.write_attempts, cfg.write_backoff);
        let written = match cfg.write_timeout {
            Some(limit) => tokio::select! {
                biased;

                () = token.cancelled() => break,
                res = timeout(limit, write) => res.unwrap_or_else(|_| {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout elapsed"))
                }),
            },
            None => tokio::select! {
                biased;

                () = token.cancelled() => break,
                res = write => res,
            },
        };
        if let Err(e) = written {
            warn!("write failed; closing session: session_id={}, error={e}", session.id);
            metrics::inc_errors();
            break;
        }
        metrics::inc_frames(Direction::Outbound);
    }

    if let Err(e) = writer.shutdown().await {
        debug!("writer shutdown failed: session_id={}, error={e}", session.id);
    }
    session.close();
}

fn is_temporary(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Write all of `frame`, retrying temporary errors up to `attempts` times.
///
/// Progress from partial writes is kept across retries, so no byte is
/// written twice.
pub(crate) async fn write_with_retry<W>(
    writer: &mut W,
    frame: &[u8],
    attempts: u32,
    backoff: BackoffConfig,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    let mut failures = 0u32;
    let mut written = 0;

    while written < frame.len() {
        match writer.write(&frame[written..]).await {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if is_temporary(&e) => {
                failures += 1;
                if failures >= attempts.max(1) {
                    return Err(e);
                }
                debug!("temporary write error; retrying: error={e}, delay={delay:?}");
                sleep(delay).await;
                delay = backoff.next_delay(delay);
            }
            Err(e) => return Err(e),
        }
    }
    writer.flush().await
}
