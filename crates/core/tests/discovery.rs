//! Multicast/broadcast discovery loop tests over loopback UDP.
//!
//! The transport runs in plain UDP mode here; the discovery loop itself is
//! transport-mode agnostic, and loopback has no multicast routing.

use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use core::{SessionConfig, ops};
use protocol::{EncapsulateParams, Header, Packet};
use transport::{Mode, Transport};

fn probe_transaction_id(request: &[u8]) -> Option<u32> {
    Header::from_bytes(request)
        .filter(Header::is_framed)
        .filter(Header::provides_transaction_id)
        .map(|header| header.transaction_id)
}

fn encapsulate_reply(text: &str, transaction_id: Option<u32>) -> Vec<u8> {
    Packet::new(text.as_bytes().to_vec(), Vec::new()).encapsulate(&EncapsulateParams {
        provide_checksum: true,
        transaction_id,
        ..EncapsulateParams::default()
    })
}

/// One responder that answers every probe `replies` times, echoing the
/// probe's transaction id unless `transaction_id_override` is set.
fn spawn_responder(replies: usize, transaction_id_override: Option<u32>) -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind responder");
    let port = socket.local_addr().expect("local addr").port();

    thread::spawn(move || {
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set timeout");
        let mut buffer = [0u8; 65536];
        while let Ok((length, source)) = socket.recv_from(&mut buffer) {
            let transaction_id =
                transaction_id_override.or_else(|| probe_transaction_id(&buffer[..length]));
            let envelope = encapsulate_reply("OK hello", transaction_id);
            for _ in 0..replies {
                socket.send_to(&envelope, source).expect("reply sent");
            }
        }
    });

    port
}

#[test]
fn burst_aggregates_repeat_replies_per_host() {
    let port = spawn_responder(2, None);
    let transport =
        Transport::connect("127.0.0.1", port, Mode::Udp, 4096).expect("transport connects");
    let config = SessionConfig::default();

    let report = ops::multicast(&transport, &config, "identify", 3).expect("burst completes");

    assert_eq!(report.probes, 3);
    assert_eq!(report.replies, 6);
    assert_eq!(report.hosts.len(), 1);

    let host = report.hosts.values().next().expect("one host");
    assert_eq!(host.count, 6);
    assert_eq!(host.payload, "OK hello");
}

#[test]
fn replies_with_foreign_transaction_ids_are_dropped() {
    let port = spawn_responder(1, Some(0x0bad_cafe));
    let transport =
        Transport::connect("127.0.0.1", port, Mode::Udp, 4096).expect("transport connects");
    let config = SessionConfig::default();

    let report = ops::multicast(&transport, &config, "identify", 2).expect("burst completes");

    assert_eq!(report.probes, 2);
    assert_eq!(report.replies, 0);
    assert!(report.hosts.is_empty());
}

/// Distinct responder hosts need distinct loopback addresses, which only
/// Linux hands out without interface aliasing.
#[cfg(target_os = "linux")]
#[test]
fn distinct_hosts_get_distinct_records() {
    let primary = UdpSocket::bind("127.0.0.1:0").expect("bind primary responder");
    let port = primary.local_addr().expect("local addr").port();

    thread::spawn(move || {
        let secondaries: Vec<UdpSocket> = ["127.0.0.2:0", "127.0.0.3:0"]
            .iter()
            .map(|addr| UdpSocket::bind(addr).expect("bind secondary responder"))
            .collect();

        primary
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set timeout");
        let mut buffer = [0u8; 65536];

        while let Ok((length, source)) = primary.recv_from(&mut buffer) {
            let transaction_id = probe_transaction_id(&buffer[..length]);
            let envelope = encapsulate_reply("OK hello", transaction_id);
            for _ in 0..2 {
                primary.send_to(&envelope, source).expect("reply sent");
                for secondary in &secondaries {
                    secondary.send_to(&envelope, source).expect("reply sent");
                }
            }
        }
    });

    let transport =
        Transport::connect("127.0.0.1", port, Mode::Udp, 4096).expect("transport connects");
    let config = SessionConfig::default();

    let report = ops::multicast(&transport, &config, "identify", 3).expect("burst completes");

    assert_eq!(report.probes, 3);
    assert_eq!(report.replies, 18);
    assert_eq!(report.hosts.len(), 3);
    for host in report.hosts.values() {
        assert_eq!(host.count, 6);
        assert_eq!(host.payload, "OK hello");
    }

    let addresses: Vec<String> = report
        .hosts
        .values()
        .map(|host| host.address.to_string())
        .collect();
    assert_eq!(addresses, vec!["127.0.0.1", "127.0.0.2", "127.0.0.3"]);
}
