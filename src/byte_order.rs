//! Explicit byte-order conversions for packer header fields.
//!
//! Each packer declares one [`Endianness`] and uses it for every integer it
//! writes and reads, keeping `pack` and `unpack` of the same instance
//! symmetric. Clippy expectations stay scoped to these conversion points.

/// Byte order used for header integers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Endianness {
    /// Most significant byte first (network order).
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

impl Endianness {
    /// Serialise a `u16` in this byte order.
    ///
    /// # Examples
    ///
    /// ```
    /// use wireroute::byte_order::Endianness;
    ///
    /// assert_eq!(Endianness::Big.write_u16(0x1234), [0x12, 0x34]);
    /// assert_eq!(Endianness::Little.write_u16(0x1234), [0x34, 0x12]);
    /// ```
    #[must_use]
    #[expect(
        clippy::big_endian_bytes,
        clippy::little_endian_bytes,
        reason = "Packers declare their byte order explicitly."
    )]
    pub fn write_u16(self, value: u16) -> [u8; 2] {
        match self {
            Endianness::Big => value.to_be_bytes(),
            Endianness::Little => value.to_le_bytes(),
        }
    }

    /// Parse a `u16` stored in this byte order.
    #[must_use]
    #[expect(
        clippy::big_endian_bytes,
        clippy::little_endian_bytes,
        reason = "Packers declare their byte order explicitly."
    )]
    pub fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endianness::Big => u16::from_be_bytes(bytes),
            Endianness::Little => u16::from_le_bytes(bytes),
        }
    }

    /// Serialise a `u32` in this byte order.
    ///
    /// # Examples
    ///
    /// ```
    /// use wireroute::byte_order::Endianness;
    ///
    /// assert_eq!(Endianness::Big.write_u32(0x1234_5678), [0x12, 0x34, 0x56, 0x78]);
    /// assert_eq!(Endianness::Little.write_u32(0x1234_5678), [0x78, 0x56, 0x34, 0x12]);
    /// ```
    #[must_use]
    #[expect(
        clippy::big_endian_bytes,
        clippy::little_endian_bytes,
        reason = "Packers declare their byte order explicitly."
    )]
    pub fn write_u32(self, value: u32) -> [u8; 4] {
        match self {
            Endianness::Big => value.to_be_bytes(),
            Endianness::Little => value.to_le_bytes(),
        }
    }

    /// Parse a `u32` stored in this byte order.
    #[must_use]
    #[expect(
        clippy::big_endian_bytes,
        clippy::little_endian_bytes,
        reason = "Packers declare their byte order explicitly."
    )]
    pub fn read_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            Endianness::Big => u32::from_be_bytes(bytes),
            Endianness::Little => u32::from_le_bytes(bytes),
        }
    }
}
