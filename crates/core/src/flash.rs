//! The `flash-*` command vocabulary, with echoed-field validation.
//!
//! Every function performs one exchange through [`exchange::process`] and
//! validates that the target echoed the parameters it was given; a wrong
//! echo means the reply belongs to some other request and is treated as
//! transient. Sector payloads ride in the OOB region of the envelope.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use transport::Transport;

use crate::exchange::{self, process};
use crate::{Error, SessionConfig};

static FLASH_READ: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^OK flash-read: read sector ([0-9]+)$").expect("fixed pattern")
});
static FLASH_WRITE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^OK flash-write: written mode ([01]), sector ([0-9]+), same ([01]), erased ([01])$")
        .expect("fixed pattern")
});
static FLASH_CHECKSUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^OK flash-checksum: checksummed ([0-9]+) sectors from sector ([0-9]+), checksum: ([0-9a-f]+)$",
    )
    .expect("fixed pattern")
});
static FLASH_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^OK flash function available, slots: 2, current: ([0-9]+), sectors: \[ ([0-9]+), ([0-9]+) \], display: ([0-9]+)x([0-9]+)px@([0-9]+)$",
    )
    .expect("fixed pattern")
});
static FLASH_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^OK flash-select: slot ([0-9]+) selected, sector ([0-9]+), permanent ([0-1])$")
        .expect("fixed pattern")
});
static FIRMWARE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r">\s*firmware\s*>\s*date:\s*([a-zA-Z0-9: ]+)").expect("fixed pattern")
});

/// Slot layout and display geometry reported by `flash-info`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashInfo {
    /// Currently booted firmware slot.
    pub current_slot: u32,
    /// First sector of each of the two slots.
    pub slot_sectors: [u32; 2],
    /// Display width in pixels.
    pub display_x: u32,
    /// Display height in pixels.
    pub display_y: u32,
    /// Display color depth in bits per pixel.
    pub display_depth: u32,
}

/// Device-side accounting aggregated over a whole write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteCounters {
    /// Sectors physically written.
    pub written: u32,
    /// Sectors that required an erase cycle.
    pub erased: u32,
    /// Sectors skipped because the contents already matched.
    pub skipped: u32,
}

/// Reads one sector; the reply's OOB bytes are the sector contents.
///
/// Returns the sector data and the retries spent. A short payload or a wrong
/// echoed sector number is transient.
pub fn read_sector(
    transport: &Transport,
    config: &SessionConfig,
    sector: u32,
) -> Result<(Vec<u8>, u32), Error> {
    let reply = process(
        transport,
        config,
        &format!("flash-read {sector}\n"),
        &[],
        Some(&FLASH_READ),
    )
    .map_err(|error| error.context("read sector"))?;

    if reply.oob_data.len() < config.sector_size {
        return Err(Error::transient(format!(
            "read sector failed: incorrect length ({} vs. {})",
            config.sector_size,
            reply.oob_data.len()
        )));
    }

    let echoed = reply.captures.numeric[0];
    if echoed != i64::from(sector) {
        return Err(Error::transient(format!(
            "read sector failed: incorrect sector ({sector} vs. {echoed})"
        )));
    }

    Ok((reply.oob_data, reply.retries))
}

/// Writes one sector carried in the OOB region.
///
/// `simulate` asks the target to account without touching flash. The target
/// echoes mode and sector plus `same`/`erased` accounting; a wrong echo is
/// retried up to four times before escalating to a hard failure. Returns the
/// retries spent by the final exchange.
pub fn write_sector(
    transport: &Transport,
    config: &SessionConfig,
    sector: u32,
    data: &[u8],
    simulate: bool,
    counters: &mut WriteCounters,
) -> Result<u32, Error> {
    let mode: i64 = if simulate { 0 } else { 1 };
    let command = format!("flash-write {mode} {sector}");

    let mut last_failure = String::new();

    for _ in 0..exchange::MAX_ATTEMPTS {
        let reply = process(transport, config, &command, data, Some(&FLASH_WRITE))
            .map_err(|error| error.context("write sector failed"))?;

        let echoed_mode = reply.captures.numeric[0];
        let echoed_sector = reply.captures.numeric[1];

        if echoed_mode != mode {
            last_failure = format!("invalid mode ({mode} vs. {echoed_mode})");
            warn!("flash sector write failed: {last_failure}");
            continue;
        }

        if echoed_sector != i64::from(sector) {
            last_failure = format!("wrong sector ({sector} vs. {echoed_sector})");
            warn!("flash sector write failed: {last_failure}");
            continue;
        }

        if reply.captures.numeric[2] == 0 {
            counters.written += 1;
        } else {
            counters.skipped += 1;
        }

        if reply.captures.numeric[3] != 0 {
            counters.erased += 1;
        }

        return Ok(reply.retries);
    }

    Err(Error::hard(format!("write sector failed: {last_failure}")))
}

/// Asks the target for the SHA-1 over `sectors` sectors starting at
/// `sector`; returns the 40-character hex digest text.
pub fn get_checksum(
    transport: &Transport,
    config: &SessionConfig,
    sector: u32,
    sectors: u32,
) -> Result<String, Error> {
    let reply = process(
        transport,
        config,
        &format!("flash-checksum {sector} {sectors}\n"),
        &[],
        Some(&FLASH_CHECKSUM),
    )
    .map_err(|error| error.context("flash sector checksum failed"))?;

    let echoed_sectors = reply.captures.numeric[0];
    if echoed_sectors != i64::from(sectors) {
        return Err(Error::transient(format!(
            "flash sector checksum failed: local sectors ({sectors}) != remote sectors ({echoed_sectors})"
        )));
    }

    let echoed_sector = reply.captures.numeric[1];
    if echoed_sector != i64::from(sector) {
        return Err(Error::transient(format!(
            "flash sector checksum failed: local start sector ({sector}) != remote start sector ({echoed_sector})"
        )));
    }

    Ok(reply.captures.text[2].clone())
}

/// Queries slot layout and display geometry.
pub fn flash_info(transport: &Transport, config: &SessionConfig) -> Result<FlashInfo, Error> {
    let reply = process(transport, config, "flash-info", &[], Some(&FLASH_INFO))?;
    let numeric = &reply.captures.numeric;

    Ok(FlashInfo {
        current_slot: numeric[0] as u32,
        slot_sectors: [numeric[1] as u32, numeric[2] as u32],
        display_x: numeric[3] as u32,
        display_y: numeric[4] as u32,
        display_depth: numeric[5] as u32,
    })
}

/// Selects a firmware slot, provisionally or permanently, and validates the
/// echoed slot, sector and permanence flag.
pub fn flash_select(
    transport: &Transport,
    config: &SessionConfig,
    slot: u32,
    sector: u32,
    permanent: bool,
) -> Result<(), Error> {
    let permanent_flag: i64 = i64::from(permanent);
    let reply = process(
        transport,
        config,
        &format!("flash-select {slot} {permanent_flag}"),
        &[],
        Some(&FLASH_SELECT),
    )
    .map_err(|error| error.context("flash select failed"))?;

    let numeric = &reply.captures.numeric;

    if numeric[0] != i64::from(slot) {
        return Err(Error::transient(format!(
            "flash select failed: wrong slot ({slot} vs. {})",
            numeric[0]
        )));
    }

    if numeric[1] != i64::from(sector) {
        return Err(Error::transient(format!(
            "flash select failed: wrong sector ({sector} vs. {})",
            numeric[1]
        )));
    }

    if numeric[2] != permanent_flag {
        return Err(Error::transient(format!(
            "flash select failed: wrong permanence ({permanent_flag} vs. {})",
            numeric[2]
        )));
    }

    Ok(())
}

/// Commits a freshly written OTA slot.
///
/// Selects the slot (permanently when `notemp`), optionally resets the
/// target and verifies after the reboot that it actually booted the new
/// slot, then promotes a provisional selection to permanent. Any failed
/// validation on this path is a hard error: the device state is in
/// question and blind retries could brick the running slot.
pub fn commit_ota(
    transport: &mut Transport,
    config: &SessionConfig,
    slot: u32,
    sector: u32,
    reset: bool,
    notemp: bool,
) -> Result<(), Error> {
    flash_select(transport, config, slot, sector, notemp)
        .map_err(|error| Error::hard(error.to_string()))?;

    if reset {
        info!("resetting target");
        exchange::fire_and_forget(transport, config, "reset\n")?;
        transport.disconnect();
        transport.reconnect()?;

        // The first reply after a reboot may still be stale boot noise.
        let _ = flash_info(transport, config);
        let info = flash_info(transport, config)
            .map_err(|error| Error::hard(error.context("flash info after reset").to_string()))?;

        if info.current_slot != slot {
            return Err(Error::hard(format!(
                "flash select failed after reset: slot {} booted, expected {slot}",
                info.current_slot
            )));
        }
    }

    if !notemp {
        flash_select(transport, config, slot, sector, true)
            .map_err(|error| Error::hard(error.to_string()))?;
    }

    let stats = process(transport, config, "stats", &[], None)?;
    if let Some(date) = firmware_date(&stats.data) {
        info!("firmware date: {date}");
    }

    Ok(())
}

/// Extracts the firmware build date from a `stats` reply, when present.
#[must_use]
pub fn firmware_date(stats: &str) -> Option<String> {
    FIRMWARE_DATE
        .captures(stats)
        .map(|caps| caps[1].trim().to_string())
}
