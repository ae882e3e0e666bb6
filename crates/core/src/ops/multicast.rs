//! Bursted discovery over multicast or broadcast, with per-host reply
//! aggregation.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use dns_lookup::lookup_addr;
use tracing::debug;

use protocol::{EncapsulateParams, Packet};
use transport::Transport;

use crate::{Error, SessionConfig};

/// Whole-loop deadline; bursts stop when it passes even if probes remain.
const LOOP_DEADLINE: Duration = Duration::from_secs(10);
/// Quiet window that ends one probe's reply collection.
const REPLY_WINDOW: Duration = Duration::from_millis(100);
/// Per-datagram send deadline.
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Aggregated replies from one responding host.
#[derive(Clone, Debug)]
pub struct HostReply {
    /// Responder address.
    pub address: Ipv4Addr,
    /// Replies received from this host across the whole burst.
    pub count: u32,
    /// Reverse-DNS name, or `0.0.0.0` when resolution failed.
    pub hostname: String,
    /// Text of the first reply.
    pub payload: String,
}

/// Outcome of a discovery burst, hosts keyed by numeric IPv4 address.
#[derive(Clone, Debug, Default)]
pub struct MulticastReport {
    /// Probes actually sent.
    pub probes: u32,
    /// Replies accepted across all probes.
    pub replies: u32,
    /// Aggregated per-host records in numeric address order.
    pub hosts: BTreeMap<u32, HostReply>,
}

/// Sends `text` `burst` times and aggregates the replies per host.
///
/// One transaction id is drawn for the whole burst; replies carrying any
/// other id are dropped as stale. Repeat replies from a host increment its
/// counter instead of creating a new record.
pub fn multicast(
    transport: &Transport,
    config: &SessionConfig,
    text: &str,
    burst: u32,
) -> Result<MulticastReport, Error> {
    let transaction_id: u32 = rand::random();

    let packet = Packet::new(text.as_bytes(), Vec::new());
    let envelope = packet.encapsulate(&EncapsulateParams {
        raw: config.raw,
        provide_checksum: config.provide_checksum,
        request_checksum: config.request_checksum,
        broadcast_group_mask: config.broadcast_group_mask,
        transaction_id: Some(transaction_id),
    });

    let deadline = Instant::now() + LOOP_DEADLINE;
    let mut report = MulticastReport::default();

    for _ in 0..burst {
        if Instant::now() >= deadline {
            break;
        }

        let mut send_buffer = envelope.clone();
        while !send_buffer.is_empty() {
            if !transport.send(&mut send_buffer, SEND_TIMEOUT) {
                return Err(Error::hard("multicast send failed"));
            }
        }
        report.probes += 1;

        collect_replies(transport, transaction_id, deadline, &mut report);
    }

    Ok(report)
}

fn collect_replies(
    transport: &Transport,
    transaction_id: u32,
    deadline: Instant,
    report: &mut MulticastReport,
) {
    loop {
        if Instant::now() >= deadline {
            return;
        }

        let mut buffer = Vec::new();
        let Some(source) = transport.receive_from(&mut buffer, REPLY_WINDOW) else {
            return;
        };

        match protocol::decapsulate(&buffer, Some(transaction_id)) {
            Err(error) => debug!("dropped reply from {source}: {error}"),
            Ok(reply) => {
                report.replies += 1;
                report
                    .hosts
                    .entry(u32::from(source))
                    .and_modify(|host| host.count += 1)
                    .or_insert_with(|| HostReply {
                        address: source,
                        count: 1,
                        hostname: resolve_hostname(source),
                        payload: String::from_utf8_lossy(&reply.data).into_owned(),
                    });
            }
        }
    }
}

/// Reverse DNS with a numeric fallback; resolution failure is non-fatal.
fn resolve_hostname(address: Ipv4Addr) -> String {
    lookup_addr(&IpAddr::V4(address)).unwrap_or_else(|_| "0.0.0.0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_iterate_in_numeric_address_order() {
        let mut report = MulticastReport::default();
        for octet in [40u8, 10, 30] {
            let address = Ipv4Addr::new(192, 168, 1, octet);
            report.hosts.insert(
                u32::from(address),
                HostReply {
                    address,
                    count: 1,
                    hostname: String::new(),
                    payload: String::new(),
                },
            );
        }

        let order: Vec<u8> = report
            .hosts
            .values()
            .map(|host| host.address.octets()[3])
            .collect();
        assert_eq!(order, vec![10, 30, 40]);
    }
}
