//! Encapsulation and decapsulation of the command envelope.

use memchr::memchr;
use thiserror::Error;
use tracing::warn;

use checksums::Md5;

use crate::header::{
    FLAG_MD5_32_PROVIDED, FLAG_MD5_32_REQUESTED, FLAG_TRANSACTION_ID_PROVIDED, HEADER_ID,
    HEADER_LEN, HEADER_SOH, HEADER_VERSION, Header,
};

/// Largest raw reply treated as potentially still growing; an initial TCP
/// segment carries at most this many payload bytes.
const RAW_COMPLETE_LIMIT: usize = 1460;
/// Raw replies beyond this size are accepted as complete regardless of
/// termination, an escape hatch for oversized unframed replies.
const RAW_OVERSIZE_LIMIT: usize = 4096;

/// Failure modes of [`decapsulate`]. All of them are transient: the exchange
/// engine drains and retries.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecapsulateError {
    /// The peer speaks a different protocol version.
    #[error("wrong version packet received: {0}")]
    WrongVersion(u8),
    /// The integrity word does not match the envelope contents.
    #[error("invalid checksum, ours: {ours:08x}, theirs: {theirs:08x}")]
    ChecksumMismatch {
        /// Checksum recomputed over the received envelope.
        ours: u32,
        /// Checksum carried in the received header.
        theirs: u32,
    },
    /// The reply echoes a transaction id from an earlier exchange.
    #[error("duplicate packet (transaction id {received:08x}, expected {expected:08x})")]
    DuplicateTransactionId {
        /// Transaction id of the outstanding request.
        expected: u32,
        /// Transaction id carried by the received envelope.
        received: u32,
    },
    /// Header offsets point outside the received buffer.
    #[error("malformed header offsets (length {length}, buffer {available})")]
    MalformedOffsets {
        /// Envelope length claimed by the header.
        length: u16,
        /// Bytes actually received.
        available: usize,
    },
}

/// Per-envelope encapsulation settings, drawn from the session config.
#[derive(Clone, Copy, Debug, Default)]
pub struct EncapsulateParams {
    /// Emit the raw fallback format instead of a framed envelope.
    pub raw: bool,
    /// Include an integrity word over the whole envelope.
    pub provide_checksum: bool,
    /// Ask the peer to include an integrity word in its reply.
    pub request_checksum: bool,
    /// Bitmask selecting broadcast target group(s); truncated to 16 bits.
    pub broadcast_group_mask: u32,
    /// Caller-chosen id echoed by the responder, used to reject duplicates.
    pub transaction_id: Option<u32>,
}

/// Result of a successful [`decapsulate`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decapsulated {
    /// Reply text with up to two trailing CR/LF bytes stripped.
    pub data: Vec<u8>,
    /// Binary out-of-band payload, empty when the reply carried none.
    pub oob_data: Vec<u8>,
    /// True when the reply used the raw fallback format.
    pub raw: bool,
}

/// An owned request: command text plus optional binary payload.
#[derive(Clone, Debug)]
pub struct Packet {
    data: Vec<u8>,
    oob_data: Vec<u8>,
}

impl Packet {
    /// Creates a packet from command text and OOB payload.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>, oob_data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            oob_data: oob_data.into(),
        }
    }

    /// Produces the wire form of this packet.
    ///
    /// In raw mode the command text is newline-terminated and, when OOB data
    /// is present, followed by one NUL, zero padding to 4-byte alignment and
    /// the payload. In framed mode a [`Header`] is laid out so that the OOB
    /// region starts 4-byte aligned, and the integrity word is computed over
    /// the whole envelope with the checksum field zeroed.
    #[must_use]
    pub fn encapsulate(&self, params: &EncapsulateParams) -> Vec<u8> {
        if params.raw {
            return self.encapsulate_raw();
        }

        let pad_len = if self.oob_data.is_empty() {
            0
        } else {
            (4 - self.data.len() % 4) % 4
        };

        let mut header = Header::new();
        header.soh = HEADER_SOH;
        header.version = HEADER_VERSION;
        header.id = HEADER_ID;
        header.length = (HEADER_LEN + self.data.len() + pad_len + self.oob_data.len()) as u16;
        header.data_offset = HEADER_LEN as u16;
        header.data_pad_offset = (HEADER_LEN + self.data.len()) as u16;
        header.oob_data_offset = (HEADER_LEN + self.data.len() + pad_len) as u16;
        header.broadcast_groups = (params.broadcast_group_mask & 0xffff) as u16;

        if let Some(id) = params.transaction_id {
            header.flags |= FLAG_TRANSACTION_ID_PROVIDED;
            header.transaction_id = id;
        }

        if params.request_checksum {
            header.flags |= FLAG_MD5_32_REQUESTED;
        }

        if params.provide_checksum {
            header.flags |= FLAG_MD5_32_PROVIDED;
            header.checksum = md5_trunc_32(&self.assemble(&header, pad_len));
        }

        self.assemble(&header, pad_len)
    }

    fn encapsulate_raw(&self) -> Vec<u8> {
        let mut packet = self.data.clone();

        if !packet.is_empty() && packet.last() != Some(&b'\n') {
            packet.push(b'\n');
        }

        if !self.oob_data.is_empty() {
            packet.push(0);

            while packet.len() % 4 != 0 {
                packet.push(0);
            }

            packet.extend_from_slice(&self.oob_data);
        }

        packet
    }

    fn assemble(&self, header: &Header, pad_len: usize) -> Vec<u8> {
        let mut packet = Vec::with_capacity(
            HEADER_LEN + self.data.len() + pad_len + self.oob_data.len(),
        );
        packet.extend_from_slice(&header.to_bytes());
        packet.extend_from_slice(&self.data);
        packet.resize(packet.len() + pad_len, 0);
        packet.extend_from_slice(&self.oob_data);
        packet
    }
}

/// First four bytes of the MD5 digest interpreted as a big-endian word.
///
/// The value is then serialized little-endian like every other header field;
/// the asymmetry matches the firmware.
pub(crate) fn md5_trunc_32(data: &[u8]) -> u32 {
    let hash = Md5::digest(data);
    u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
}

/// Recovers `(data, oob, raw)` from a fully received buffer.
///
/// A buffer shorter than the header, or one whose sentinel bytes do not
/// match, is treated as the raw fallback format. Framed envelopes are
/// validated for version, integrity word and transaction id before the data
/// and OOB regions are sliced out. Up to two trailing CR/LF bytes are
/// stripped from the data in both modes.
pub fn decapsulate(
    buffer: &[u8],
    expected_transaction_id: Option<u32>,
) -> Result<Decapsulated, DecapsulateError> {
    let framed = Header::from_bytes(buffer).filter(Header::is_framed);

    let (mut data, oob_data, raw) = match framed {
        Some(header) => {
            let (data, oob_data) = decapsulate_framed(buffer, &header, expected_transaction_id)?;
            (data, oob_data, false)
        }
        None => {
            let (data, oob_data) = decapsulate_raw(buffer);
            (data, oob_data, true)
        }
    };

    // The server may terminate with both CR and LF.
    for _ in 0..2 {
        if matches!(data.last(), Some(b'\n' | b'\r')) {
            data.pop();
        }
    }

    Ok(Decapsulated {
        data,
        oob_data,
        raw,
    })
}

fn decapsulate_raw(buffer: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let Some(nul) = memchr(0, buffer) else {
        return (buffer.to_vec(), Vec::new());
    };

    let mut oob_offset = nul + 1;
    while oob_offset % 4 != 0 {
        oob_offset += 1;
    }

    let oob_data = if oob_offset < buffer.len() {
        buffer[oob_offset..].to_vec()
    } else {
        warn!("invalid raw oob data padding");
        Vec::new()
    };

    (buffer[..nul].to_vec(), oob_data)
}

fn decapsulate_framed(
    buffer: &[u8],
    header: &Header,
    expected_transaction_id: Option<u32>,
) -> Result<(Vec<u8>, Vec<u8>), DecapsulateError> {
    if header.version != HEADER_VERSION {
        return Err(DecapsulateError::WrongVersion(header.version));
    }

    if header.provides_checksum() {
        let mut zeroed = *header;
        zeroed.checksum = 0;
        let mut hashed = zeroed.to_bytes().to_vec();
        hashed.extend_from_slice(&buffer[HEADER_LEN..]);
        let ours = md5_trunc_32(&hashed);

        if ours != header.checksum {
            return Err(DecapsulateError::ChecksumMismatch {
                ours,
                theirs: header.checksum,
            });
        }
    }

    if let Some(expected) = expected_transaction_id
        && header.provides_transaction_id()
        && header.transaction_id != expected
    {
        return Err(DecapsulateError::DuplicateTransactionId {
            expected,
            received: header.transaction_id,
        });
    }

    let data_offset = header.data_offset as usize;
    let data_pad_offset = header.data_pad_offset as usize;
    let length = (header.length as usize).min(buffer.len());

    if data_offset > data_pad_offset || data_pad_offset > buffer.len() {
        return Err(DecapsulateError::MalformedOffsets {
            length: header.length,
            available: buffer.len(),
        });
    }

    let data = buffer[data_offset..data_pad_offset].to_vec();

    let oob_offset = header.oob_data_offset as usize;
    let oob_data = if header.oob_data_offset != header.length && oob_offset % 4 != 0 {
        // Accept the text but drop the payload when its padding is off.
        warn!(
            oob_data_offset = header.oob_data_offset,
            "packet oob data padding invalid"
        );
        Vec::new()
    } else if oob_offset > length {
        return Err(DecapsulateError::MalformedOffsets {
            length: header.length,
            available: buffer.len(),
        });
    } else {
        buffer[oob_offset..length].to_vec()
    };

    Ok((data, oob_data))
}

/// Decides whether an accumulating receive buffer holds a whole reply.
///
/// Framed: the header parses, the sentinels match and the buffer reached the
/// announced envelope length. Raw: the buffer ends in a newline and is
/// smaller than an initial TCP segment; buffers beyond 4096 bytes are also
/// accepted to unblock oversized raw replies.
#[must_use]
pub fn complete(buffer: &[u8]) -> bool {
    if buffer.is_empty() {
        return false;
    }

    if let Some(header) = Header::from_bytes(buffer)
        && header.is_framed()
    {
        return buffer.len() >= header.length as usize;
    }

    let terminated = buffer.last() == Some(&b'\n');
    (terminated && buffer.len() < RAW_COMPLETE_LIMIT) || buffer.len() > RAW_OVERSIZE_LIMIT
}
