//! Small helpers shared across the crate.

/// Longest prefix rendered by [`dumper`].
const DUMP_LIMIT: usize = 96;

/// Renders a byte buffer for packet traces: printable ASCII as-is, anything
/// else as `[xx]`, truncated at 96 bytes.
#[must_use]
pub fn dumper(id: &str, data: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = format!("{id}[{}]: \"", data.len());

    for byte in data.iter().take(DUMP_LIMIT) {
        if (b' '..=b'~').contains(byte) {
            out.push(*byte as char);
        } else {
            let _ = write!(out, "[{byte:02x}]");
        }
    }

    out.push('"');
    out
}

/// Parses an integer literal with automatic base detection: `0x`/`0X` for
/// hexadecimal, a leading `0` for octal, decimal otherwise. An optional
/// leading sign is honored.
#[must_use]
pub fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    if digits.is_empty() {
        return None;
    }

    let (radix, digits) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}
