//! Throughput measurement in both directions.

use std::time::{Duration, Instant};

use transport::Transport;

use crate::exchange::process;
use crate::progress::Progress;
use crate::{Error, SessionConfig};

/// Exchanges per benchmark phase.
const ITERATIONS: u32 = 1024;

/// Figures from one completed benchmark phase.
#[derive(Clone, Copy, Debug)]
pub struct BenchmarkReport {
    /// Payload bytes moved towards the target.
    pub sent_bytes: u64,
    /// Payload bytes moved from the target.
    pub received_bytes: u64,
    /// Wall time of the upload phase.
    pub send_elapsed: Duration,
    /// Wall time of the download phase.
    pub receive_elapsed: Duration,
}

impl BenchmarkReport {
    /// Upload rate in kb/s.
    #[must_use]
    pub fn send_rate(&self) -> f64 {
        rate(self.sent_bytes, self.send_elapsed)
    }

    /// Download rate in kb/s.
    #[must_use]
    pub fn receive_rate(&self) -> f64 {
        rate(self.received_bytes, self.receive_elapsed)
    }
}

fn rate(bytes: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds > 0.0 {
        (bytes as f64 / 1024.0) / seconds
    } else {
        0.0
    }
}

/// Runs both benchmark phases: 1024 uploads of one sector of payload, then
/// 1024 downloads of `length` bytes each.
pub fn benchmark(
    transport: &Transport,
    config: &SessionConfig,
    length: usize,
) -> Result<BenchmarkReport, Error> {
    // Phase 0: zero-length request, sector-sized payload rides along.
    let payload = vec![0u8; config.sector_size];
    let mut progress = Progress::new(
        "benchmark send",
        u64::from(ITERATIONS) * config.sector_size as u64,
    );
    let send_start = Instant::now();

    for _ in 0..ITERATIONS {
        let reply = process(transport, config, "flash-bench 0", &payload, None)
            .map_err(|error| error.context("benchmark send"))?;
        progress.advance(config.sector_size as u64, reply.retries);
        if config.verbose {
            progress.emit();
        }
    }

    let send_elapsed = send_start.elapsed();
    if config.verbose {
        progress.finish();
    }

    // Phase 1: empty request, the reply carries `length` payload bytes.
    let command = format!("flash-bench {length}");
    let mut progress = Progress::new(
        "benchmark receive",
        u64::from(ITERATIONS) * length as u64,
    );
    let receive_start = Instant::now();

    for _ in 0..ITERATIONS {
        let reply = process(transport, config, &command, &[], None)
            .map_err(|error| error.context("benchmark receive"))?;

        if reply.oob_data.len() != length {
            return Err(Error::hard(format!(
                "benchmark receive: expected {length} payload bytes, got {}",
                reply.oob_data.len()
            )));
        }

        progress.advance(length as u64, reply.retries);
        if config.verbose {
            progress.emit();
        }
    }

    let receive_elapsed = receive_start.elapsed();
    if config.verbose {
        progress.finish();
    }

    Ok(BenchmarkReport {
        sent_bytes: u64::from(ITERATIONS) * config.sector_size as u64,
        received_bytes: u64::from(ITERATIONS) * length as u64,
        send_elapsed,
        receive_elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_kilobytes_per_second() {
        let report = BenchmarkReport {
            sent_bytes: 2048,
            received_bytes: 1024,
            send_elapsed: Duration::from_secs(1),
            receive_elapsed: Duration::from_secs(2),
        };
        assert!((report.send_rate() - 2.0).abs() < f64::EPSILON);
        assert!((report.receive_rate() - 0.5).abs() < f64::EPSILON);
    }
}
