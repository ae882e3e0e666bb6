//! Single-shot command passthrough.

use transport::Transport;

use crate::exchange::{self, process};
use crate::util::dumper;
use crate::{Error, SessionConfig};

/// Sends the joined command words as one exchange and returns the reply
/// text, with a hex dump of the OOB payload appended when one arrived.
///
/// With `dontwait` the envelope is sent once and no reply is awaited.
pub fn send(
    transport: &Transport,
    config: &SessionConfig,
    args: &str,
    dontwait: bool,
) -> Result<String, Error> {
    if dontwait {
        exchange::fire_and_forget(transport, config, args)?;
        return Ok(String::new());
    }

    let reply = process(transport, config, args, &[], None)?;

    let mut out = reply.data;
    if !reply.oob_data.is_empty() {
        out.push('\n');
        out.push_str(&dumper("oob", &reply.oob_data));
    }

    Ok(out)
}
