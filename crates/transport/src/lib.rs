//! One connected channel to the target's command port.
//!
//! A [`Transport`] owns a single socket in one of four modes: connected TCP,
//! connected UDP, UDP multicast (group `239.255.255.<octet>`) or UDP
//! broadcast. All operations take a millisecond-scale deadline and never
//! block indefinitely. [`Transport::send`] and [`Transport::receive`] report
//! success as a boolean: a timeout or socket failure is an expected, retried
//! outcome for the exchange engine above, not an error to propagate.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, trace};

/// Readiness wait applied to the non-blocking TCP connect.
const TCP_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// Hop limit for multicast probes.
const MULTICAST_TTL: u32 = 3;
/// Upper bound on packets discarded by one [`Transport::drain`] call.
const DRAIN_PACKETS: usize = 16;
/// Drain reads use buffers of this many sectors.
const DRAIN_BUFFER_FACTOR: usize = 4;
/// Receive reads use buffers of this many sectors.
const RECEIVE_BUFFER_FACTOR: usize = 2;

/// Hard failures while establishing or re-establishing the channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The host did not resolve to an IPv4 address.
    #[error("unknown host {host}:{port}")]
    Unresolvable {
        /// Host or group as given on the command line.
        host: String,
        /// Command port.
        port: u16,
    },
    /// A socket call failed during connection setup.
    #[error("failed to {action} {peer}: {source}")]
    Socket {
        /// What was being attempted.
        action: &'static str,
        /// The peer involved.
        peer: SocketAddrV4,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Channel flavor, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Connected TCP stream.
    Tcp,
    /// Connected UDP to a fixed peer.
    Udp,
    /// UDP datagrams to a multicast group `239.255.255.<octet>`.
    Multicast,
    /// UDP datagrams with `SO_BROADCAST` set.
    Broadcast,
}

enum Channel {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// A single owned socket to the target, with bounded-blocking operations.
pub struct Transport {
    peer: SocketAddrV4,
    mode: Mode,
    sector_size: usize,
    channel: Option<Channel>,
}

impl Transport {
    /// Resolves `host` and opens the channel.
    ///
    /// In multicast mode `host` is the last octet of the group address. The
    /// receive and drain buffer sizes are derived from `sector_size`.
    pub fn connect(
        host: &str,
        port: u16,
        mode: Mode,
        sector_size: usize,
    ) -> Result<Self, TransportError> {
        let target = if mode == Mode::Multicast {
            multicast_group(host)
        } else {
            host.to_string()
        };

        let peer = resolve_ipv4(&target, port)?;

        let mut transport = Self {
            peer,
            mode,
            sector_size,
            channel: None,
        };
        transport.reconnect()?;
        Ok(transport)
    }

    /// Returns the resolved peer address.
    #[must_use]
    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    /// Closes the channel; subsequent operations fail until [`Self::reconnect`].
    pub fn disconnect(&mut self) {
        self.channel = None;
    }

    /// (Re-)establishes the channel to the stored peer.
    ///
    /// Used at construction and again after an OTA reset, when the target
    /// drops off the network for a moment.
    pub fn reconnect(&mut self) -> Result<(), TransportError> {
        self.channel = None;

        let channel = match self.mode {
            Mode::Tcp => {
                let stream =
                    TcpStream::connect_timeout(&SocketAddr::V4(self.peer), TCP_CONNECT_TIMEOUT)
                        .map_err(|source| self.socket_error("connect to", source))?;
                Channel::Tcp(stream)
            }
            Mode::Udp | Mode::Multicast | Mode::Broadcast => {
                Channel::Udp(self.open_datagram_socket()?)
            }
        };

        self.channel = Some(channel);
        Ok(())
    }

    fn open_datagram_socket(&self) -> Result<UdpSocket, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|source| self.socket_error("create socket for", source))?;

        match self.mode {
            Mode::Broadcast => {
                socket
                    .set_broadcast(true)
                    .map_err(|source| self.socket_error("set broadcast on", source))?;
            }
            Mode::Multicast => {
                socket
                    .set_multicast_ttl_v4(MULTICAST_TTL)
                    .map_err(|source| self.socket_error("set multicast ttl on", source))?;
                socket
                    .set_multicast_loop_v4(false)
                    .map_err(|source| self.socket_error("set multicast loopback on", source))?;
                socket
                    .set_reuse_address(true)
                    .map_err(|source| self.socket_error("set reuse address on", source))?;
                socket
                    .join_multicast_v4(self.peer.ip(), &Ipv4Addr::UNSPECIFIED)
                    .map_err(|source| self.socket_error("join multicast group", source))?;
            }
            Mode::Udp | Mode::Tcp => {}
        }

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        socket
            .bind(&bind_addr.into())
            .map_err(|source| self.socket_error("bind socket for", source))?;

        Ok(socket.into())
    }

    fn socket_error(&self, action: &'static str, source: io::Error) -> TransportError {
        TransportError::Socket {
            action,
            peer: self.peer,
            source,
        }
    }

    /// Sends as much of `data` as the socket accepts within `timeout`,
    /// removing the consumed prefix.
    ///
    /// TCP may take only part of the buffer; callers loop until it is empty.
    /// UDP sends one datagram. Returns false on timeout or socket failure —
    /// transient outcomes the exchange engine retries.
    pub fn send(&self, data: &mut Vec<u8>, timeout: Duration) -> bool {
        if data.is_empty() {
            debug!("send: empty buffer");
            return true;
        }

        let Some(channel) = &self.channel else {
            debug!("send: not connected");
            return false;
        };

        let sent = match channel {
            Channel::Tcp(stream) => {
                if stream.set_write_timeout(Some(clamp_timeout(timeout))).is_err() {
                    return false;
                }
                (&mut &*stream).write(data)
            }
            Channel::Udp(socket) => {
                if socket.set_write_timeout(Some(clamp_timeout(timeout))).is_err() {
                    return false;
                }
                socket.send_to(data, SocketAddr::V4(self.peer))
            }
        };

        match sent {
            Ok(length) if length > 0 => {
                data.drain(..length);
                true
            }
            Ok(_) => {
                debug!("send: nothing written");
                false
            }
            Err(error) => {
                debug!("send: {error}");
                false
            }
        }
    }

    /// Appends whatever arrives within `timeout` to `data`.
    ///
    /// Reads at most two sectors worth of bytes per call. Returns false on
    /// timeout, socket failure or an orderly TCP shutdown.
    pub fn receive(&self, data: &mut Vec<u8>, timeout: Duration) -> bool {
        self.receive_from(data, timeout).is_some()
    }

    /// Like [`Self::receive`], additionally reporting the sender's address.
    ///
    /// The multicast discovery loop uses the source to aggregate replies per
    /// host; in TCP mode the configured peer is reported.
    pub fn receive_from(&self, data: &mut Vec<u8>, timeout: Duration) -> Option<Ipv4Addr> {
        let Some(channel) = &self.channel else {
            debug!("receive: not connected");
            return None;
        };

        let mut buffer = vec![0u8; RECEIVE_BUFFER_FACTOR * self.sector_size];

        let received = match channel {
            Channel::Tcp(stream) => {
                stream.set_read_timeout(Some(clamp_timeout(timeout))).ok()?;
                match (&mut &*stream).read(&mut buffer) {
                    Ok(0) => {
                        debug!("receive: connection closed");
                        None
                    }
                    Ok(length) => Some((length, *self.peer.ip())),
                    Err(error) => {
                        debug!(accumulated = data.len(), "receive: {error}");
                        None
                    }
                }
            }
            Channel::Udp(socket) => {
                socket.set_read_timeout(Some(clamp_timeout(timeout))).ok()?;
                match socket.recv_from(&mut buffer) {
                    Ok((length, SocketAddr::V4(remote))) => Some((length, *remote.ip())),
                    Ok((length, _)) => Some((length, Ipv4Addr::UNSPECIFIED)),
                    Err(error) => {
                        debug!(accumulated = data.len(), "receive: {error}");
                        None
                    }
                }
            }
        }?;

        let (length, remote) = received;
        data.extend_from_slice(&buffer[..length]);
        Some(remote)
    }

    /// Discards everything queued on the socket, resynchronizing the channel
    /// after a failed exchange.
    ///
    /// Reads up to 16 oversized packets, stopping at the first quiet
    /// `timeout` window.
    pub fn drain(&self, timeout: Duration) {
        let Some(channel) = &self.channel else {
            return;
        };

        trace!(timeout_ms = timeout.as_millis() as u64, "draining");

        let mut buffer = vec![0u8; DRAIN_BUFFER_FACTOR * self.sector_size];
        let mut bytes = 0usize;
        let mut packets = 0usize;

        for _ in 0..DRAIN_PACKETS {
            let drained = match channel {
                Channel::Tcp(stream) => stream
                    .set_read_timeout(Some(clamp_timeout(timeout)))
                    .and_then(|()| (&mut &*stream).read(&mut buffer)),
                Channel::Udp(socket) => socket
                    .set_read_timeout(Some(clamp_timeout(timeout)))
                    .and_then(|()| socket.recv_from(&mut buffer).map(|(length, _)| length)),
            };

            match drained {
                Ok(length) if length > 0 => {
                    bytes += length;
                    packets += 1;
                }
                _ => break,
            }
        }

        if packets > 0 {
            debug!(bytes, packets, "drained stale replies");
        }
    }
}

/// Multicast groups are always in the fixed administratively-scoped prefix;
/// the user supplies only the last octet.
#[must_use]
pub fn multicast_group(octet: &str) -> String {
    format!("239.255.255.{octet}")
}

fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddrV4, TransportError> {
    let addresses = (host, port).to_socket_addrs().map_err(|_| {
        TransportError::Unresolvable {
            host: host.to_string(),
            port,
        }
    })?;

    for candidate in addresses {
        if let SocketAddr::V4(addr) = candidate {
            return Ok(addr);
        }
    }

    Err(TransportError::Unresolvable {
        host: host.to_string(),
        port,
    })
}

// A zero read timeout means "block forever" to the socket layer; the
// contract here is the opposite, so keep every wait strictly positive.
fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;

    #[test]
    fn resolves_numeric_ipv4() {
        let addr = resolve_ipv4("127.0.0.1", 24).expect("loopback resolves");
        assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 24));
    }

    #[test]
    fn multicast_group_uses_fixed_prefix() {
        assert_eq!(multicast_group("17"), "239.255.255.17");
        let addr = resolve_ipv4(&multicast_group("17"), 24).expect("group resolves");
        assert_eq!(*addr.ip(), Ipv4Addr::new(239, 255, 255, 17));
    }

    #[test]
    fn udp_round_trip_against_local_peer() {
        let peer = StdUdpSocket::bind("127.0.0.1:0").expect("bind peer");
        let peer_addr = peer.local_addr().expect("peer addr");

        let transport = Transport::connect(
            "127.0.0.1",
            peer_addr.port(),
            Mode::Udp,
            64,
        )
        .expect("transport opens");

        let mut outgoing = b"flash-info\n".to_vec();
        assert!(transport.send(&mut outgoing, Duration::from_millis(500)));
        assert!(outgoing.is_empty());

        let mut buffer = [0u8; 64];
        let (length, remote) = peer.recv_from(&mut buffer).expect("datagram arrives");
        assert_eq!(&buffer[..length], b"flash-info\n");

        peer.send_to(b"OK\n", remote).expect("reply sent");
        let mut incoming = Vec::new();
        assert!(transport.receive(&mut incoming, Duration::from_millis(500)));
        assert_eq!(incoming, b"OK\n");
    }

    #[test]
    fn receive_times_out_quietly() {
        let peer = StdUdpSocket::bind("127.0.0.1:0").expect("bind peer");
        let port = peer.local_addr().expect("peer addr").port();

        let transport =
            Transport::connect("127.0.0.1", port, Mode::Udp, 64).expect("transport opens");

        let mut incoming = Vec::new();
        assert!(!transport.receive(&mut incoming, Duration::from_millis(10)));
        assert!(incoming.is_empty());
    }

    #[test]
    fn drain_discards_queued_datagrams() {
        let peer = StdUdpSocket::bind("127.0.0.1:0").expect("bind peer");
        let port = peer.local_addr().expect("peer addr").port();

        let transport =
            Transport::connect("127.0.0.1", port, Mode::Udp, 64).expect("transport opens");

        // Learn the transport's ephemeral port by sending once.
        let mut probe = b"probe\n".to_vec();
        assert!(transport.send(&mut probe, Duration::from_millis(500)));
        let mut buffer = [0u8; 64];
        let (_, transport_addr) = peer.recv_from(&mut buffer).expect("probe arrives");

        for _ in 0..3 {
            peer.send_to(b"stale", transport_addr).expect("stale sent");
        }

        transport.drain(Duration::from_millis(50));

        let mut incoming = Vec::new();
        assert!(!transport.receive(&mut incoming, Duration::from_millis(10)));
        assert!(incoming.is_empty());
    }

    #[test]
    fn disconnected_channel_refuses_io() {
        let peer = StdUdpSocket::bind("127.0.0.1:0").expect("bind peer");
        let port = peer.local_addr().expect("peer addr").port();

        let mut transport =
            Transport::connect("127.0.0.1", port, Mode::Udp, 64).expect("transport opens");
        transport.disconnect();

        let mut outgoing = b"x".to_vec();
        assert!(!transport.send(&mut outgoing, Duration::from_millis(10)));
        assert!(!transport.receive(&mut Vec::new(), Duration::from_millis(10)));

        transport.reconnect().expect("reconnect succeeds");
        assert!(transport.send(&mut outgoing, Duration::from_millis(500)));
    }
}
