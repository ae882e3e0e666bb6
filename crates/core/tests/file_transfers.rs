//! Whole-file operations against a stateful mock flash device.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use checksums::{Sha1, hex_digest};
use core::{Error, SessionConfig, ops};
use protocol::{EncapsulateParams, Header, Packet};
use transport::{Mode, Transport};

const SECTOR_SIZE: usize = 64;

type FlashState = Arc<Mutex<HashMap<u32, Vec<u8>>>>;

/// Answers the flash command vocabulary over loopback UDP, backed by an
/// in-memory sector map. Unwritten sectors read as erased flash.
fn spawn_flash_device(state: FlashState) -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind mock device");
    let port = socket.local_addr().expect("local addr").port();

    thread::spawn(move || {
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set timeout");
        let mut buffer = [0u8; 65536];

        while let Ok((length, source)) = socket.recv_from(&mut buffer) {
            let request = &buffer[..length];
            let transaction_id = Header::from_bytes(request)
                .filter(Header::is_framed)
                .filter(Header::provides_transaction_id)
                .map(|header| header.transaction_id);

            let decoded = protocol::decapsulate(request, None).expect("request decodes");
            let command = String::from_utf8_lossy(&decoded.data).into_owned();
            let words: Vec<&str> = command.split_whitespace().collect();

            let (text, oob) = match words.as_slice() {
                ["flash-read", sector] => {
                    let sector: u32 = sector.parse().expect("numeric sector");
                    let data = state
                        .lock()
                        .expect("state lock")
                        .get(&sector)
                        .cloned()
                        .unwrap_or_else(|| vec![0xff; SECTOR_SIZE]);
                    (format!("OK flash-read: read sector {sector}"), data)
                }
                ["flash-write", mode, sector] => {
                    let sector: u32 = sector.parse().expect("numeric sector");
                    let mut flash = state.lock().expect("state lock");
                    let same = flash.get(&sector).is_some_and(|old| old == &decoded.oob_data);
                    if *mode == "1" && !same {
                        flash.insert(sector, decoded.oob_data.clone());
                    }
                    (
                        format!(
                            "OK flash-write: written mode {mode}, sector {sector}, same {}, erased {}",
                            u8::from(same),
                            u8::from(!same)
                        ),
                        Vec::new(),
                    )
                }
                ["flash-checksum", start, count] => {
                    let start: u32 = start.parse().expect("numeric start");
                    let count: u32 = count.parse().expect("numeric count");
                    let flash = state.lock().expect("state lock");
                    let mut hasher = Sha1::new();
                    for sector in start..start + count {
                        match flash.get(&sector) {
                            Some(data) => hasher.update(data),
                            None => hasher.update(&[0xff; SECTOR_SIZE]),
                        }
                    }
                    let digest = hex_digest(&hasher.finalize());
                    (
                        format!(
                            "OK flash-checksum: checksummed {count} sectors from sector {start}, checksum: {digest}"
                        ),
                        Vec::new(),
                    )
                }
                other => panic!("unexpected command {other:?}"),
            };

            let envelope = Packet::new(text.into_bytes(), oob).encapsulate(&EncapsulateParams {
                raw: false,
                provide_checksum: true,
                request_checksum: false,
                broadcast_group_mask: 0,
                transaction_id,
            });
            socket.send_to(&envelope, source).expect("reply sent");
        }
    });

    port
}

fn session() -> SessionConfig {
    SessionConfig {
        sector_size: SECTOR_SIZE,
        ..SessionConfig::default()
    }
}

fn connect(port: u16) -> Transport {
    Transport::connect("127.0.0.1", port, Mode::Udp, SECTOR_SIZE).expect("transport connects")
}

#[test]
fn write_then_read_back_round_trips_with_padding() {
    let state: FlashState = Arc::new(Mutex::new(HashMap::new()));
    let port = spawn_flash_device(Arc::clone(&state));
    let transport = connect(port);
    let config = session();

    // 150 bytes: two full sectors and a short trailing one.
    let payload: Vec<u8> = (0u8..150).collect();
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("firmware.bin");
    std::fs::write(&source, &payload).expect("write source");

    ops::write(&transport, &config, &source, 8, false, false).expect("write succeeds");

    // The device now holds the payload FF-padded to whole sectors.
    {
        let flash = state.lock().expect("state lock");
        assert_eq!(flash.len(), 3);
        let mut expected_tail = payload[128..].to_vec();
        expected_tail.resize(SECTOR_SIZE, 0xff);
        assert_eq!(flash.get(&10), Some(&expected_tail));
    }

    let restored = dir.path().join("readback.bin");
    ops::read(&transport, &config, &restored, 8, 3).expect("read succeeds");

    let mut expected = payload.clone();
    expected.resize(3 * SECTOR_SIZE, 0xff);
    assert_eq!(std::fs::read(&restored).expect("read back"), expected);

    // The original (shorter) file still verifies: the local padding matches
    // the erased-flash bytes.
    ops::verify(&transport, &config, &source, 8).expect("verify succeeds");
}

#[test]
fn simulated_write_leaves_flash_untouched() {
    let state: FlashState = Arc::new(Mutex::new(HashMap::new()));
    let port = spawn_flash_device(Arc::clone(&state));
    let transport = connect(port);
    let config = session();

    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("firmware.bin");
    std::fs::write(&source, vec![0x42u8; 100]).expect("write source");

    ops::write(&transport, &config, &source, 0, true, false).expect("simulate succeeds");
    assert!(state.lock().expect("state lock").is_empty());
}

#[test]
fn verify_detects_corrupted_flash() {
    let state: FlashState = Arc::new(Mutex::new(HashMap::new()));
    let port = spawn_flash_device(Arc::clone(&state));
    let transport = connect(port);
    let config = session();

    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("firmware.bin");
    std::fs::write(&source, vec![0x42u8; 2 * SECTOR_SIZE]).expect("write source");

    ops::write(&transport, &config, &source, 4, false, false).expect("write succeeds");

    state
        .lock()
        .expect("state lock")
        .get_mut(&5)
        .expect("sector written")[10] ^= 0xff;

    let outcome = ops::verify(&transport, &config, &source, 4);
    match outcome {
        Err(Error::Hard(message)) => assert!(message.contains("sector 5"), "message: {message}"),
        other => panic!("corruption not detected: {other:?}"),
    }
}

#[test]
fn send_returns_reply_text() {
    // A plain echo responder is enough for the passthrough path.
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind mock device");
    let port = socket.local_addr().expect("local addr").port();

    thread::spawn(move || {
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set timeout");
        let mut buffer = [0u8; 65536];
        while let Ok((length, source)) = socket.recv_from(&mut buffer) {
            let transaction_id = Header::from_bytes(&buffer[..length])
                .filter(Header::is_framed)
                .filter(Header::provides_transaction_id)
                .map(|header| header.transaction_id);
            let decoded = protocol::decapsulate(&buffer[..length], None).expect("request decodes");
            let mut text = b"echo: ".to_vec();
            text.extend_from_slice(&decoded.data);
            let envelope = Packet::new(text, Vec::new()).encapsulate(&EncapsulateParams {
                provide_checksum: true,
                transaction_id,
                ..EncapsulateParams::default()
            });
            socket.send_to(&envelope, source).expect("reply sent");
        }
    });

    let transport = connect(port);
    let config = session();

    let out = ops::send(&transport, &config, "stats uptime", false).expect("exchange succeeds");
    assert_eq!(out, "echo: stats uptime");

    // Fire-and-forget returns nothing and awaits nothing.
    let out = ops::send(&transport, &config, "reset", true).expect("send succeeds");
    assert!(out.is_empty());
}
