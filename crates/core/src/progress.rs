//! Single-line progress reporting for long-running transfers.

use std::io::Write as _;
use std::time::Instant;

/// Tracks a transfer and renders the carriage-returned status line.
pub(crate) struct Progress {
    verb: &'static str,
    total_bytes: u64,
    bytes: u64,
    retries: u32,
    start: Instant,
}

impl Progress {
    pub(crate) fn new(verb: &'static str, total_bytes: u64) -> Self {
        Self {
            verb,
            total_bytes,
            bytes: 0,
            retries: 0,
            start: Instant::now(),
        }
    }

    pub(crate) fn advance(&mut self, bytes: u64, retries: u32) {
        self.bytes += bytes;
        self.retries += retries;
    }

    pub(crate) fn retries(&self) -> u32 {
        self.retries
    }

    /// Rewrites the status line in place on stderr.
    pub(crate) fn emit(&self) {
        let line = render_line(
            self.verb,
            self.bytes,
            self.total_bytes,
            self.start.elapsed().as_secs_f64(),
            self.retries,
        );
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{line}");
        let _ = stderr.flush();
    }

    /// Terminates the status line once the transfer is done.
    pub(crate) fn finish(&self) {
        self.emit();
        let _ = writeln!(std::io::stderr().lock());
    }
}

fn render_line(verb: &str, bytes: u64, total_bytes: u64, elapsed: f64, retries: u32) -> String {
    let kb = bytes / 1024;
    let rate = if elapsed > 0.0 {
        (bytes as f64 / 1024.0) / elapsed
    } else {
        0.0
    };
    let percent = if total_bytes > 0 {
        bytes * 100 / total_bytes
    } else {
        100
    };

    format!("{verb} {kb} kb, {elapsed:.0} s, {rate:.0} kb/s, retries {retries}, {percent}%")
}
