//! Digest primitives shared by the packet codec and the flash operations.
//!
//! The envelope integrity word is a truncated MD5 and the device verifies
//! written flash ranges with SHA-1, so both hashers are exposed through the
//! same streaming interface: feed data incrementally via `update`, then
//! obtain the final digest through `finalize`.

pub mod strong;

pub use strong::{Md5, Sha1, StrongDigest};

/// Renders a digest as lowercase hex, the format the device reports
/// flash range checksums in.
#[must_use]
pub fn hex_digest(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_digest_renders_lowercase_pairs() {
        assert_eq!(hex_digest(&[]), "");
        assert_eq!(hex_digest(&[0x00, 0xab, 0x7f]), "00ab7f");
        assert_eq!(hex_digest(&[0xff; 4]), "ffffffff");
    }

    #[test]
    fn sha1_digest_renders_forty_chars() {
        let digest = Sha1::digest(b"abc");
        let text = hex_digest(digest.as_ref());
        assert_eq!(text.len(), 40);
        assert_eq!(text, "a9993e364706816aba3e25717850c26c9cd0d89d");
    }
}
