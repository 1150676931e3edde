//! Reference packer: `size:u32 | id:u32 | payload`.

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
use crate::{byte_order::Endianness, message::Message};

const HEADER_SIZE: usize = 8;

/// Packs messages as a 4-byte payload length, a 4-byte id and the payload.
///
/// Both header integers use the packer's [`Endianness`] (big-endian unless
/// configured otherwise). Numeric ids are narrowed to `u32`; ids that do not
/// fit, and textual ids, fail to pack.
///
/// When `unpack` rejects an oversized frame the payload bytes are left unread
/// on the stream.
///
/// # Examples
///
/// ```
/// use wireroute::{message::Message, packer::{DefaultPacker, Packer}};
///
/// let packer = DefaultPacker::default();
/// let frame = packer.pack(&Message::new(1u32, "ping")).expect("pack");
/// assert_eq!(&frame[..], &[0, 0, 0, 4, 0, 0, 0, 1, b'p', b'i', b'n', b'g']);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct DefaultPacker {
    endianness: Endianness,
    max_payload_size: usize,
}

impl Default for DefaultPacker {
    fn default() -> Self {
        Self {
            endianness: Endianness::Big,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl DefaultPacker {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Use `endianness` for both header fields.
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

    #[must_use]
    pub fn max_payload(&self) -> usize { self.max_payload_size }
}

#[async_trait]
impl Packer for DefaultPacker {
    fn pack(&self, msg: &Message) -> Result<Bytes, PackError> {
        let id = msg.id().to_u32().ok_or_else(|| PackError::IdOutOfRange {
            id: msg.id().clone(),
            bits: 32,
        })?;
        let data = msg.data();
        check_pack_size(data.len(), self.max_payload_size)?;
        let size = u32::try_from(data.len()).map_err(|_| PackError::PayloadTooLargeToPack {
            size: data.len(),
            max: self.max_payload_size,
        })?;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + data.len());
        buf.put_slice(&self.endianness.write_u32(size));
        buf.put_slice(&self.endianness.write_u32(id));
        buf.put_slice(data);
        Ok(buf.freeze())
    }

    async fn unpack(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<Option<Message>, PackError> {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header).await?;
        let (size_bytes, id_bytes) = header.split_at(4);
        let size = self.endianness.read_u32(to_array(size_bytes)) as usize;
        let id = self.endianness.read_u32(to_array(id_bytes));
        check_unpack_size(size, self.max_payload_size)?;

        let mut data = vec![0u8; size];
        reader.read_exact(&mut data).await?;
        Ok(Some(
            Message::new(id, data).with_metadata(FRAME_SIZE_KEY, HEADER_SIZE + size),
        ))
    }
}

fn to_array(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use proptest::prelude::*;
    use rstest::rstest;

    use super::DefaultPacker;
    use crate::{
        byte_order::Endianness,
        message::{Id, Message},
        packer::{FRAME_SIZE_KEY, PackError, Packer},
    };

    #[rstest]
    #[case(Endianness::Big, [0, 0, 0, 2, 0, 0, 0, 9])]
    #[case(Endianness::Little, [2, 0, 0, 0, 9, 0, 0, 0])]
    fn header_follows_endianness(#[case] order: Endianness, #[case] header: [u8; 8]) {
        let packer = DefaultPacker::new().endianness(order);
        let frame = packer.pack(&Message::new(9u32, "hi")).expect("pack");
        assert_eq!(&frame[..8], &header);
        assert_eq!(&frame[8..], b"hi");
    }

    #[tokio::test]
    async fn unpack_records_frame_size() {
        let packer = DefaultPacker::default();
        let frame = packer.pack(&Message::new(1u32, "ping")).expect("pack");
        let mut reader = Cursor::new(frame.to_vec());
        let msg = packer
            .unpack(&mut reader)
            .await
            .expect("unpack")
            .expect("frame");
        assert_eq!(msg.id(), &Id::Numeric(1));
        assert_eq!(msg.data().as_ref(), b"ping");
        assert_eq!(msg.metadata().get::<usize>(FRAME_SIZE_KEY).as_deref(), Some(&12));
    }

    #[test]
    fn wide_ids_that_fit_are_narrowed() {
        let packer = DefaultPacker::default();
        let frame = packer.pack(&Message::new(7u64, "")).expect("pack");
        assert_eq!(&frame[4..8], &[0, 0, 0, 7]);
    }

    #[test]
    fn ids_that_do_not_fit_fail_to_pack() {
        let packer = DefaultPacker::default();
        let err = packer
            .pack(&Message::new(u64::from(u32::MAX) + 1, ""))
            .expect_err("id should not fit");
        assert!(matches!(err, PackError::IdOutOfRange { bits: 32, .. }));
        assert!(!err.is_fatal());

        let err = packer.pack(&Message::new("login", "")).expect_err("text id");
        assert!(matches!(err, PackError::IdOutOfRange { .. }));
    }

    #[test]
    fn pack_rejects_oversized_payload() {
        let packer = DefaultPacker::new().max_payload_size(4);
        let err = packer
            .pack(&Message::new(1u32, "12345"))
            .expect_err("payload too large");
        assert!(matches!(err, PackError::PayloadTooLargeToPack { size: 5, max: 4 }));
    }

    #[tokio::test]
    async fn unpack_rejects_oversized_payload_and_leaves_it_unread() {
        let large = DefaultPacker::default();
        let frame = large.pack(&Message::new(1u32, "12345")).expect("pack");
        let small = DefaultPacker::new().max_payload_size(4);
        let mut reader = Cursor::new(frame.to_vec());
        let err = small.unpack(&mut reader).await.expect_err("too large");
        assert!(matches!(err, PackError::PayloadTooLarge { size: 5, max: 4 }));
        assert!(err.is_fatal());
        assert_eq!(reader.position(), 8, "only the header is consumed");
    }

    #[tokio::test]
    async fn short_read_is_a_transport_error() {
        let packer = DefaultPacker::default();
        let mut reader = Cursor::new(vec![0, 0, 0, 4, 0, 0, 0, 1, b'p']);
        let err = packer.unpack(&mut reader).await.expect_err("truncated");
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn consecutive_frames_are_read_independently() {
        let packer = DefaultPacker::default();
        let mut bytes = packer.pack(&Message::new(1u32, "a")).expect("pack").to_vec();
        bytes.extend_from_slice(&packer.pack(&Message::new(2u32, "bc")).expect("pack"));
        let mut reader = Cursor::new(bytes);
        let first = packer.unpack(&mut reader).await.expect("first").expect("frame");
        let second = packer.unpack(&mut reader).await.expect("second").expect("frame");
        assert_eq!(first.data().as_ref(), b"a");
        assert_eq!(second.id(), &Id::Numeric(2));
        assert_eq!(second.data().as_ref(), b"bc");
    }

    proptest! {
        #[test]
        fn unpack_reproduces_packed_message(
            id in any::<u32>(),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            little in any::<bool>(),
        ) {
            let order = if little { Endianness::Little } else { Endianness::Big };
            let packer = DefaultPacker::new().endianness(order);
            let frame = packer.pack(&Message::new(id, payload.clone())).expect("pack");
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime");
            let msg = runtime
                .block_on(async { packer.unpack(&mut Cursor::new(frame.to_vec())).await })
                .expect("unpack")
                .expect("frame");
            prop_assert_eq!(msg.id(), &Id::Numeric(u64::from(id)));
            prop_assert_eq!(msg.data().as_ref(), payload.as_slice());
        }
    }
}
