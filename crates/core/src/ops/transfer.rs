//! Whole-file flash transfers: read, write and verify.

use std::fs::File;
use std::io::{Read as _, Write as _};
use std::path::Path;

use tracing::info;

use checksums::{Sha1, hex_digest};
use transport::Transport;

use crate::flash::{self, WriteCounters};
use crate::progress::Progress;
use crate::{Error, SessionConfig};

/// Streams `sectors` sectors starting at `sector` into `filename`, then
/// compares the local SHA-1 against the device's checksum over the same
/// range.
pub fn read(
    transport: &Transport,
    config: &SessionConfig,
    filename: &Path,
    sector: u32,
    sectors: u32,
) -> Result<(), Error> {
    let mut file = File::create(filename).map_err(|error| {
        Error::hard(format!("failed to create '{}': {error}", filename.display()))
    })?;

    let mut hasher = Sha1::new();
    let mut progress = Progress::new("read", u64::from(sectors) * config.sector_size as u64);

    for current in sector..sector + sectors {
        let (data, retries) = flash::read_sector(transport, config, current)?;
        let chunk = &data[..config.sector_size];

        hasher.update(chunk);
        file.write_all(chunk).map_err(|error| {
            Error::hard(format!("failed to write '{}': {error}", filename.display()))
        })?;

        progress.advance(config.sector_size as u64, retries);
        if config.verbose {
            progress.emit();
        }
    }

    if config.verbose {
        progress.finish();
    }

    let local = hex_digest(&hasher.finalize());
    let remote = flash::get_checksum(transport, config, sector, sectors)?;

    if local != remote {
        return Err(Error::hard(format!(
            "read: checksum mismatch, local: {local}, remote: {remote}"
        )));
    }

    info!("read {sectors} sectors, checksum {local}");
    Ok(())
}

/// Writes `filename` to flash starting at `sector`, one FF-padded sector at
/// a time, then compares the local SHA-1 against the device's checksum.
///
/// With `simulate` the target only accounts the write, so the final device
/// checksum still reflects the old contents and is not compared. `ota` only
/// affects reporting; committing the slot is a separate step.
pub fn write(
    transport: &Transport,
    config: &SessionConfig,
    filename: &Path,
    sector: u32,
    simulate: bool,
    ota: bool,
) -> Result<(), Error> {
    let verb = match (simulate, ota) {
        (true, _) => "simulate",
        (false, true) => "ota write",
        (false, false) => "write",
    };

    let mut file = File::open(filename).map_err(|error| {
        Error::hard(format!("failed to open '{}': {error}", filename.display()))
    })?;
    let size = file
        .metadata()
        .map_err(|error| {
            Error::hard(format!("failed to stat '{}': {error}", filename.display()))
        })?
        .len();

    if size == 0 {
        return Err(Error::hard(format!(
            "'{}' is empty, nothing to write",
            filename.display()
        )));
    }

    let sectors = size.div_ceil(config.sector_size as u64) as u32;

    let mut hasher = Sha1::new();
    let mut counters = WriteCounters::default();
    let mut progress = Progress::new(verb, u64::from(sectors) * config.sector_size as u64);

    for current in sector..sector + sectors {
        // A short trailing sector is padded with erased-flash bytes so the
        // device-side checksum covers whole sectors.
        let mut buffer = vec![0xffu8; config.sector_size];
        read_fully(&mut file, &mut buffer)
            .map_err(|error| {
                Error::hard(format!("failed to read '{}': {error}", filename.display()))
            })?;

        hasher.update(&buffer);
        let retries =
            flash::write_sector(transport, config, current, &buffer, simulate, &mut counters)?;

        progress.advance(config.sector_size as u64, retries);
        if config.verbose {
            progress.emit();
        }
    }

    if config.verbose {
        progress.finish();
    }

    info!(
        written = counters.written,
        erased = counters.erased,
        skipped = counters.skipped,
        retries = progress.retries(),
        "{verb} finished"
    );

    let local = hex_digest(&hasher.finalize());

    if simulate {
        info!("simulate: local checksum {local}, device contents unchanged");
        return Ok(());
    }

    let remote = flash::get_checksum(transport, config, sector, sectors)?;
    if local != remote {
        return Err(Error::hard(format!(
            "{verb}: checksum mismatch, local: {local}, remote: {remote}"
        )));
    }

    info!("{verb}: checksum {local}");
    Ok(())
}

/// Compares `filename` byte-for-byte against flash starting at `sector`.
/// Any difference is a hard failure.
pub fn verify(
    transport: &Transport,
    config: &SessionConfig,
    filename: &Path,
    sector: u32,
) -> Result<(), Error> {
    let mut file = File::open(filename).map_err(|error| {
        Error::hard(format!("failed to open '{}': {error}", filename.display()))
    })?;
    let size = file
        .metadata()
        .map_err(|error| {
            Error::hard(format!("failed to stat '{}': {error}", filename.display()))
        })?
        .len();

    let sectors = size.div_ceil(config.sector_size as u64) as u32;
    let mut progress = Progress::new("verify", u64::from(sectors) * config.sector_size as u64);

    for (index, current) in (sector..sector + sectors).enumerate() {
        let mut local = vec![0xffu8; config.sector_size];
        read_fully(&mut file, &mut local)
            .map_err(|error| {
                Error::hard(format!("failed to read '{}': {error}", filename.display()))
            })?;

        let (remote, retries) = flash::read_sector(transport, config, current)?;

        if local[..] != remote[..config.sector_size] {
            return Err(Error::hard(format!(
                "verify failed: sector {current} (file sector {index}) differs"
            )));
        }

        progress.advance(config.sector_size as u64, retries);
        if config.verbose {
            progress.emit();
        }
    }

    if config.verbose {
        progress.finish();
    }

    info!("verified {sectors} sectors");
    Ok(())
}

/// Fills `buffer` from the reader, stopping early at end of file and leaving
/// the pre-filled padding in place.
fn read_fully(file: &mut File, buffer: &mut [u8]) -> std::io::Result<()> {
    let mut filled = 0;
    while filled < buffer.len() {
        let count = file.read(&mut buffer[filled..])?;
        if count == 0 {
            break;
        }
        filled += count;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek as _, SeekFrom, Write as _};

    #[test]
    fn read_fully_preserves_padding_after_eof() {
        let mut file = tempfile::tempfile().expect("tempfile");
        file.write_all(b"abc").expect("write");
        file.seek(SeekFrom::Start(0)).expect("rewind");

        let mut buffer = vec![0xffu8; 8];
        read_fully(&mut file, &mut buffer).expect("read");
        assert_eq!(&buffer, &[b'a', b'b', b'c', 0xff, 0xff, 0xff, 0xff, 0xff]);
    }
}
