//! Wire framing between [`Message`]s and bytes.
//!
//! A [`Packer`] turns a message into one self-delimiting frame and reads one
//! frame back from a byte stream. Every field is read with an exact byte
//! count, so a packer never relies on a single read filling its buffer.
//!
//! Three layouts are provided:
//!
//! - [`DefaultPacker`]: `size:u32 | id:u32 | payload`.
//! - [`CompactPacker`]: `size:u16 | id:u16 | payload`.
//! - [`TextIdPacker`]: `size:u32 | id_len:u16 | id | payload` with textual ids.
//!
//! # Error classification
//!
//! [`PackError::kind`] sorts failures into transport, validation and
//! encoding errors. Transport and validation errors leave the stream in an
//! unknown position and close the session; encoding errors only lose the one
//! response being packed.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::message::{Id, Message};

mod compact;
mod default;
mod text;

pub use compact::CompactPacker;
pub use default::DefaultPacker;
pub use text::TextIdPacker;

/// Metadata key under which packers record the total size of the frame read.
pub const FRAME_SIZE_KEY: &str = "frame_size";

/// Default upper bound on payload size accepted by the packers (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Bidirectional transform between [`Message`] and wire bytes.
#[async_trait]
pub trait Packer: Send + Sync + 'static {
    /// Serialise `msg` into a single frame.
    ///
    /// # Errors
    ///
    /// Returns an encoding error when the id cannot be represented by the
    /// header or the payload exceeds the configured maximum.
    fn pack(&self, msg: &Message) -> Result<Bytes, PackError>;

    /// Read exactly one frame from `reader`.
    ///
    /// `Ok(None)` marks a frame the caller should skip without dispatching.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Transport`] on short reads or EOF and a
    /// validation error when the header declares an out-of-bounds size.
    async fn unpack(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<Option<Message>, PackError>;
}

/// Broad category of a [`PackError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackErrorKind {
    /// The stream ended or broke.
    Transport,
    /// A header declared values outside the configured bounds.
    Validation,
    /// A message could not be represented on the wire.
    Encoding,
}

/// Errors raised while packing or unpacking frames.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PackError {
    /// Reading from the stream failed or it ended mid-frame.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// The frame header declared a payload larger than allowed.
    #[error("declared payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },
    /// The frame could not be interpreted.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    /// The message id does not fit the header field.
    #[error("message id {id} does not fit in {bits} bits")]
    IdOutOfRange { id: Id, bits: u8 },
    /// The outgoing payload exceeds the configured maximum or header width.
    #[error("payload of {size} bytes exceeds maximum {max} for packing")]
    PayloadTooLargeToPack { size: usize, max: usize },
}

impl PackError {
    /// Classify this error.
    ///
    /// ```
    /// use wireroute::packer::{PackError, PackErrorKind};
    ///
    /// let err = PackError::PayloadTooLarge { size: 10, max: 4 };
    /// assert_eq!(err.kind(), PackErrorKind::Validation);
    /// assert!(err.is_fatal());
    /// ```
    #[must_use]
    pub fn kind(&self) -> PackErrorKind {
        match self {
            PackError::Transport(_) => PackErrorKind::Transport,
            PackError::PayloadTooLarge { .. } | PackError::InvalidFrame(_) => {
                PackErrorKind::Validation
            }
            PackError::IdOutOfRange { .. } | PackError::PayloadTooLargeToPack { .. } => {
                PackErrorKind::Encoding
            }
        }
    }

    /// Whether the stream can no longer be framed after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            PackErrorKind::Transport | PackErrorKind::Validation
        )
    }

    /// Whether this error reports the peer closing the stream.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, PackError::Transport(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Validate a declared or outgoing payload length against `max`.
pub(crate) fn check_unpack_size(size: usize, max: usize) -> Result<(), PackError> {
    if size > max {
        return Err(PackError::PayloadTooLarge { size, max });
    }
    Ok(())
}

pub(crate) fn check_pack_size(size: usize, max: usize) -> Result<(), PackError> {
    if size > max {
        return Err(PackError::PayloadTooLargeToPack { size, max });
    }
    Ok(())
}
