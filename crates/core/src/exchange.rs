//! The synchronous request/reply primitive every operation is built on.
//!
//! One [`process`] call performs a single command exchange: encapsulate the
//! request, send it, accumulate reply bytes until the completeness predicate
//! holds, decapsulate, optionally full-match the reply text against a regex,
//! and extract capture groups. Transient failures (timeouts, mismatches,
//! stale packets) drain the channel and retry with exponential backoff; a
//! fresh transaction id is drawn per exchange and kept stable across its
//! retries so late duplicates of earlier traffic are rejected.

use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use protocol::{EncapsulateParams, Packet};
use transport::Transport;

use crate::util::{dumper, parse_integer};
use crate::{Error, SessionConfig};

/// Attempts before an exchange gives up.
pub const MAX_ATTEMPTS: u32 = 4;
/// Backoff before the second attempt; doubles on each further retry.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
/// Per-call socket readiness deadline for send and receive.
const IO_TIMEOUT: Duration = Duration::from_millis(500);

/// Capture groups of a matched reply, exported as text and as base-auto
/// integers. Groups that do not parse as a number yield 0.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Captures {
    /// Text of each capture group after group 0.
    pub text: Vec<String>,
    /// Numeric interpretation of each capture group, 0 when non-numeric.
    pub numeric: Vec<i64>,
}

/// Outcome of a successful exchange.
#[derive(Clone, Debug)]
pub struct Reply {
    /// Reply text, trailing CR/LF stripped.
    pub data: String,
    /// Binary payload carried alongside the text.
    pub oob_data: Vec<u8>,
    /// The reply used the raw fallback format.
    pub raw: bool,
    /// Retries spent; 0 means first-try success.
    pub retries: u32,
    /// Capture groups, empty when no match regex was supplied.
    pub captures: Captures,
}

/// Performs one request/reply exchange with retry and backoff.
///
/// When `match_re` is given the reply text must match it in full, and the
/// capture groups are exported on the returned [`Reply`]. Exhausting all
/// attempts is a hard error.
pub fn process(
    transport: &Transport,
    config: &SessionConfig,
    data: &str,
    oob_data: &[u8],
    match_re: Option<&Regex>,
) -> Result<Reply, Error> {
    if config.debug {
        debug!("{}", dumper("data", data.as_bytes()));
    }

    // Fresh per exchange, stable across its retries: replies to earlier
    // exchanges fail decapsulation instead of being misattributed.
    let transaction_id = (!config.raw).then(rand::random::<u32>);

    let packet = Packet::new(data.as_bytes(), oob_data);
    let envelope = packet.encapsulate(&EncapsulateParams {
        raw: config.raw,
        provide_checksum: config.provide_checksum,
        request_checksum: config.request_checksum,
        broadcast_group_mask: config.broadcast_group_mask,
        transaction_id,
    });

    let mut backoff = INITIAL_BACKOFF;
    let mut outcome = None;

    for attempt in 0..MAX_ATTEMPTS {
        match attempt_exchange(transport, &envelope, transaction_id, match_re) {
            Ok(success) => {
                outcome = Some((success, attempt));
                break;
            }
            Err(failure) => {
                info!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "{failure}"
                );
                transport.drain(backoff);
                backoff *= 2;
            }
        }
    }

    let Some(((reply_data, reply_oob, raw, captures), retries)) = outcome else {
        return Err(Error::hard("process: receive failed"));
    };

    if retries > 0 {
        info!("success at attempt {retries}");
    }

    if config.debug {
        debug!("{}", dumper("reply", reply_data.as_bytes()));
    }

    Ok(Reply {
        data: reply_data,
        oob_data: reply_oob,
        raw,
        retries,
        captures,
    })
}

type AttemptSuccess = (String, Vec<u8>, bool, Captures);

fn attempt_exchange(
    transport: &Transport,
    envelope: &[u8],
    transaction_id: Option<u32>,
    match_re: Option<&Regex>,
) -> Result<AttemptSuccess, Error> {
    let mut send_buffer = envelope.to_vec();
    while !send_buffer.is_empty() {
        if !transport.send(&mut send_buffer, IO_TIMEOUT) {
            return Err(Error::transient("send failed"));
        }
    }

    let mut accumulator = Vec::new();
    while !protocol::complete(&accumulator) {
        if !transport.receive(&mut accumulator, IO_TIMEOUT) {
            return Err(Error::transient("receive failed"));
        }
    }

    let reply = protocol::decapsulate(&accumulator, transaction_id)
        .map_err(|error| Error::transient(format!("decapsulation failed: {error}")))?;

    let text = String::from_utf8_lossy(&reply.data).into_owned();

    let captures = match match_re {
        None => Captures::default(),
        Some(re) => extract_captures(re, &text).ok_or_else(|| {
            Error::transient(format!(
                "received string does not match: {} vs. \"{}\"",
                dumper("reply", text.as_bytes()),
                re.as_str()
            ))
        })?,
    };

    Ok((text, reply.oob_data, reply.raw, captures))
}

/// Matches `text` in full and exports the capture groups.
fn extract_captures(re: &Regex, text: &str) -> Option<Captures> {
    let caps = re.captures(text)?;
    let whole = caps.get(0)?;
    if whole.start() != 0 || whole.end() != text.len() {
        return None;
    }

    let mut captures = Captures::default();
    for group in caps.iter().skip(1) {
        let text = group.map(|m| m.as_str().to_string()).unwrap_or_default();
        captures.numeric.push(parse_integer(&text).unwrap_or(0));
        captures.text.push(text);
    }
    Some(captures)
}

/// Sends one envelope without awaiting a reply.
///
/// Used for `reset` (the target reboots instead of answering) and for
/// `--dontwait` sends.
pub fn fire_and_forget(
    transport: &Transport,
    config: &SessionConfig,
    data: &str,
) -> Result<(), Error> {
    let packet = Packet::new(data.as_bytes(), Vec::new());
    let envelope = packet.encapsulate(&EncapsulateParams {
        raw: config.raw,
        provide_checksum: config.provide_checksum,
        request_checksum: config.request_checksum,
        broadcast_group_mask: config.broadcast_group_mask,
        transaction_id: (!config.raw).then(rand::random::<u32>),
    });

    let mut send_buffer = envelope;
    while !send_buffer.is_empty() {
        if !transport.send(&mut send_buffer, IO_TIMEOUT) {
            return Err(Error::hard("send failed"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_require_a_full_match() {
        let re = Regex::new("OK flash-read: read sector ([0-9]+)").expect("valid regex");

        let caps =
            extract_captures(&re, "OK flash-read: read sector 42").expect("full match");
        assert_eq!(caps.text, vec!["42".to_string()]);
        assert_eq!(caps.numeric, vec![42]);

        // A reply with trailing garbage only matches a prefix; reject it.
        assert!(extract_captures(&re, "OK flash-read: read sector 42 extra").is_none());
        assert!(extract_captures(&re, "ERROR").is_none());
    }

    #[test]
    fn non_numeric_captures_export_zero() {
        let re = Regex::new("checksum: ([0-9a-f]+), date: ([a-zA-Z ]+)").expect("valid regex");
        let caps = extract_captures(&re, "checksum: 00ff, date: May Day").expect("full match");
        assert_eq!(caps.text, vec!["00ff".to_string(), "May Day".to_string()]);
        // "00ff" has a leading zero but is not octal-parseable; it yields 0
        // like any other non-numeric group.
        assert_eq!(caps.numeric, vec![0, 0]);
    }
}
