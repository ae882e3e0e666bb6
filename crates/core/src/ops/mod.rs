//! User-facing operations composed from the flash protocol and the exchange
//! engine. Each function owns the transport for its whole duration; results
//! that need user presentation are returned as values for the frontend to
//! format.

mod benchmark;
mod image;
mod multicast;
mod send;
mod transfer;

pub use benchmark::{BenchmarkReport, benchmark};
pub use image::image;
pub use multicast::{HostReply, MulticastReport, multicast};
pub use send::send;
pub use transfer::{read, verify, write};
