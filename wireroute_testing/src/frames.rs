//! Client-side framing helpers.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use wireroute::{Message, packer::Packer};

fn to_io(e: wireroute::packer::PackError) -> io::Error {
    match e {
        wireroute::packer::PackError::Transport(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

/// Pack `msg` with `packer` and write the frame to `stream`.
///
/// # Errors
///
/// Returns an error if packing or writing fails.
pub async fn write_frame<W>(packer: &dyn Packer, stream: &mut W, msg: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = packer.pack(msg).map_err(to_io)?;
    stream.write_all(&frame).await?;
    stream.flush().await
}

/// Read one frame from `stream` with `packer`.
///
/// # Errors
///
/// Returns an error if the stream ends, the frame is invalid or the packer
/// asks for the frame to be skipped.
pub async fn read_frame<R>(packer: &dyn Packer, stream: &mut R) -> io::Result<Message>
where
    R: AsyncRead + Unpin + Send,
{
    packer
        .unpack(stream)
        .await
        .map_err(to_io)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "frame skipped by packer"))
}
