//! Core of the espif client: the request/reply exchange engine, the flash
//! sector protocol built on top of it, and the user-facing operations.
//!
//! The layering follows the wire: [`exchange::process`] performs one
//! synchronous command exchange (encapsulate, send, reassemble, decapsulate,
//! match, retry with backoff), [`flash`] speaks the `flash-*` command
//! vocabulary with echoed-field validation, and [`ops`] composes those into
//! whole-file transfers, verification, benchmarking, image upload and
//! multicast discovery. Failures carry a [`Error`] that is either transient
//! (retried inside an exchange) or hard (propagated to the caller).

mod config;
mod error;
pub mod exchange;
pub mod flash;
pub mod ops;
mod progress;
pub mod util;

pub use config::SessionConfig;
pub use error::Error;
