//! Compact packer: `size:u16 | id:u16 | payload`.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{FRAME_SIZE_KEY, PackError, Packer, check_pack_size, check_unpack_size};
use crate::{byte_order::Endianness, message::Message};

const HEADER_SIZE: usize = 4;

/// Packs messages with 16-bit size and id fields.
///
/// Suited to protocols with small message catalogues and payloads. The
/// maximum payload defaults to, and can never exceed, `u16::MAX` bytes.
#[derive(Clone, Copy, Debug)]
pub struct CompactPacker {
    endianness: Endianness,
    max_payload_size: usize,
}

impl Default for CompactPacker {
    fn default() -> Self {
        Self {
            endianness: Endianness::Big,
            max_payload_size: usize::from(u16::MAX),
        }
    }
}

impl CompactPacker {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Use `endianness` for both header fields.
    #[must_use]
    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Reject payloads larger than `max` bytes.
    #[must_use]
    pub fn max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max.min(usize::from(u16::MAX));
        self
    }
}

#[async_trait]
impl Packer for CompactPacker {
    fn pack(&self, msg: &Message) -> Result<Bytes, PackError> {
        let id = msg.id().to_u16().ok_or_else(|| PackError::IdOutOfRange {
            id: msg.id().clone(),
            bits: 16,
        })?;
        let data = msg.data();
        check_pack_size(data.len(), self.max_payload_size)?;
        let size = u16::try_from(data.len()).map_err(|_| PackError::PayloadTooLargeToPack {
            size: data.len(),
            max: self.max_payload_size,
        })?;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + data.len());
        buf.put_slice(&self.endianness.write_u16(size));
        buf.put_slice(&self.endianness.write_u16(id));
        buf.put_slice(data);
        Ok(buf.freeze())
    }

    async fn unpack(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<Option<Message>, PackError> {
        let mut size = [0u8; 2];
        reader.read_exact(&mut size).await?;
        let mut id = [0u8; 2];
        reader.read_exact(&mut id).await?;
        let size = usize::from(self.endianness.read_u16(size));
        let id = self.endianness.read_u16(id);
        check_unpack_size(size, self.max_payload_size)?;

        let mut data = vec![0u8; size];
        reader.read_exact(&mut data).await?;
        Ok(Some(
            Message::new(id, data).with_metadata(FRAME_SIZE_KEY, HEADER_SIZE + size),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::CompactPacker;
    use crate::{
        byte_order::Endianness,
        message::{Id, Message},
        packer::{PackError, Packer},
    };

    #[tokio::test]
    async fn little_endian_frame_round_trips() {
        let packer = CompactPacker::new().endianness(Endianness::Little);
        let frame = packer.pack(&Message::new(0x0102u32, "ok")).expect("pack");
        assert_eq!(&frame[..], &[2, 0, 0x02, 0x01, b'o', b'k']);
        let msg = packer
            .unpack(&mut Cursor::new(frame.to_vec()))
            .await
            .expect("unpack")
            .expect("frame");
        assert_eq!(msg.id(), &Id::Numeric(0x0102));
        assert_eq!(msg.data().as_ref(), b"ok");
    }

    #[test]
    fn ids_wider_than_sixteen_bits_fail() {
        let err = CompactPacker::default()
            .pack(&Message::new(70_000u32, ""))
            .expect_err("id should not fit");
        assert!(matches!(err, PackError::IdOutOfRange { bits: 16, .. }));
    }

    #[tokio::test]
    async fn declared_size_above_limit_is_rejected() {
        let packer = CompactPacker::new().max_payload_size(2);
        let err = packer
            .unpack(&mut Cursor::new(vec![0, 3, 0, 1, b'a', b'b', b'c']))
            .await
            .expect_err("too large");
        assert!(matches!(err, PackError::PayloadTooLarge { size: 3, max: 2 }));
    }
}
