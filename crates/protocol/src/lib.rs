//! Packet envelope codec for the espif command protocol.
//!
//! Every request to the target is a single-line text command, optionally
//! accompanied by a binary out-of-band (OOB) payload, wrapped in a fixed
//! 32-byte little-endian header carrying offsets, flags, a caller-chosen
//! transaction id and a truncated-MD5 integrity word. Peers that cannot
//! frame fall back to a raw format: newline-terminated text, then a NUL,
//! zero padding to 4-byte alignment, and the OOB bytes.
//!
//! [`Packet::encapsulate`] produces the wire form of a request,
//! [`decapsulate`] recovers `(data, oob, raw)` from a received buffer, and
//! [`complete`] decides when an accumulating receive buffer holds a whole
//! reply. Reassembly and retries live in the exchange engine; this crate is
//! purely the value-level codec.

mod header;
mod packet;

pub use header::{
    FLAG_MD5_32_PROVIDED, FLAG_MD5_32_REQUESTED, FLAG_TRANSACTION_ID_PROVIDED, HEADER_ID,
    HEADER_LEN, HEADER_SOH, HEADER_VERSION, Header,
};
pub use packet::{Decapsulated, DecapsulateError, EncapsulateParams, Packet, complete, decapsulate};
