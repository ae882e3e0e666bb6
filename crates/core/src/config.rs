/// Immutable per-session settings shared by every exchange.
///
/// These collapse the wire-facing command line switches into one value that
/// the exchange engine and the operations consult; nothing here changes for
/// the lifetime of a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Use the raw fallback format instead of framed envelopes.
    pub raw: bool,
    /// Include an integrity word in outgoing envelopes.
    pub provide_checksum: bool,
    /// Ask the target to include an integrity word in replies.
    pub request_checksum: bool,
    /// Broadcast group bitmask carried in every envelope.
    pub broadcast_group_mask: u32,
    /// Flash sector size, also the unit for transfer buffers.
    pub sector_size: usize,
    /// Emit progress and retry visibility output.
    pub verbose: bool,
    /// Dump sent and received packet data.
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            raw: false,
            provide_checksum: true,
            request_checksum: true,
            broadcast_group_mask: 0,
            sector_size: 4096,
            verbose: false,
            debug: false,
        }
    }
}
