//! Strong checksum implementations backed by well-known hash algorithms.
//!
//! The device side checksums flash ranges with SHA-1 and the packet envelope
//! carries a truncated MD5, so this module exposes streaming wrappers for
//! both so higher layers can compose them without touching the hashing
//! crates directly.

mod md5;
mod sha1;

pub use md5::Md5;
pub use sha1::Sha1;

/// Trait implemented by the strong checksum algorithms used on the wire.
///
/// Callers feed data incrementally via [`Self::update`] and then obtain the
/// final digest through [`Self::finalize`]. The associated
/// [`DIGEST_LEN`](Self::DIGEST_LEN) constant exposes the byte width of the
/// resulting hash so buffers can be sized without algorithm-specific
/// knowledge.
pub trait StrongDigest: Sized + Default {
    /// Type returned when finalising the digest.
    type Digest: AsRef<[u8]> + Copy;

    /// Length of the final digest in bytes.
    const DIGEST_LEN: usize;

    /// Creates a new hasher with an empty state.
    fn new() -> Self {
        Self::default()
    }

    /// Feeds additional bytes into the digest state.
    fn update(&mut self, data: &[u8]);

    /// Finalises the digest and returns the resulting hash.
    fn finalize(self) -> Self::Digest;

    /// Convenience helper that hashes `data` in a single call.
    fn digest(data: &[u8]) -> Self::Digest {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }
}
