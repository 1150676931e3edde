//! Packer carrying textual message ids:
//! `size:u32 | id_len:u16 | id (UTF-8) | payload`.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{
    DEFAULT_MAX_PAYLOAD_SIZE,
    FRAME_SIZE_KEY,
    PackError,
    Packer,
    check_pack_size,
    check_unpack_size,
};
use crate::{
    byte_order::Endianness,
    message::{Id, Message},
};

const FIXED_HEADER_SIZE: usize = 6;

/// Packs messages whose routing key is a string.
///
/// `size` counts only the payload. Numeric ids are written as their decimal
/// text and therefore come back as [`Id::Text`]; register routes with textual
/// ids when using this packer.
#[derive(Clone, Copy, Debug)]
pub struct TextIdPacker {
    endianness: Endianness,
    max_payload_size: usize,
}

impl Default for TextIdPacker {
    fn default() -> Self {
        Self {
            endianness: Endianness::Big,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl TextIdPacker {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Use `endianness` for the header integers.
    #[must_use]
    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Reject payloads larger than `max` bytes, clamped to the `u32` range.
    #[must_use]
    pub fn max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max.min(u32::MAX as usize);
        self
    }
}

#[async_trait]
impl Packer for TextIdPacker {
    fn pack(&self, msg: &Message) -> Result<Bytes, PackError> {
        let id = msg.id().to_string();
        let id_len = u16::try_from(id.len()).map_err(|_| PackError::IdOutOfRange {
            id: msg.id().clone(),
            bits: 16,
        })?;
        let data = msg.data();
        check_pack_size(data.len(), self.max_payload_size)?;
        let size = u32::try_from(data.len()).map_err(|_| PackError::PayloadTooLargeToPack {
            size: data.len(),
            max: self.max_payload_size,
        })?;

        let mut buf = BytesMut::with_capacity(FIXED_HEADER_SIZE + id.len() + data.len());
        buf.put_slice(&self.endianness.write_u32(size));
        buf.put_slice(&self.endianness.write_u16(id_len));
        buf.put_slice(id.as_bytes());
        buf.put_slice(data);
        Ok(buf.freeze())
    }

    async fn unpack(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<Option<Message>, PackError> {
        let mut size = [0u8; 4];
        reader.read_exact(&mut size).await?;
        let mut id_len = [0u8; 2];
        reader.read_exact(&mut id_len).await?;
        let size = self.endianness.read_u32(size) as usize;
        let id_len = usize::from(self.endianness.read_u16(id_len));
        check_unpack_size(size, self.max_payload_size)?;

        let mut id = vec![0u8; id_len];
        reader.read_exact(&mut id).await?;
        let id = String::from_utf8(id)
            .map_err(|e| PackError::InvalidFrame(format!("message id is not UTF-8: {e}")))?;
        let mut data = vec![0u8; size];
        reader.read_exact(&mut data).await?;
        Ok(Some(
            Message::new(Id::Text(id), data)
                .with_metadata(FRAME_SIZE_KEY, FIXED_HEADER_SIZE + id_len + size),
        ))
    }
}
