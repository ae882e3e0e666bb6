//! Thin command-line front-end for the espif client.
//!
//! [`run`] parses the option surface, opens the transport, performs the
//! selected operation through the `core` crate and maps every failure onto a
//! one-line `espif:`-prefixed diagnostic with exit status 1. Flash
//! operations start with a `flash-info` preflight; when no start sector is
//! given the target's non-booted OTA slot is selected automatically.

use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use core::flash::{self, FlashInfo};
use core::{Error, SessionConfig, ops};
use transport::{Mode, Transport};

mod frontend;

pub use frontend::{Invocation, Operation, command, invocation};

/// Flash sector size of the supported targets.
const SECTOR_SIZE: usize = 4096;

/// Parses `args`, runs the selected operation, and returns the process
/// status: 0 on success, 1 on any error.
pub fn run<I, Out, Err>(args: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
    Out: Write,
    Err: Write,
{
    let matches = match command().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(error) if error.use_stderr() => {
            let _ = writeln!(stderr, "espif: program option exception: {error}");
            return 1;
        }
        Err(error) => {
            // --help renders through stdout and is a success.
            let _ = write!(stdout, "{error}");
            return 0;
        }
    };

    let invocation = match frontend::invocation(&matches) {
        Ok(invocation) => invocation,
        Err(error) => return report(stderr, &error),
    };

    init_tracing(&invocation);

    match dispatch(&invocation, stdout) {
        Ok(()) => 0,
        Err(error) => report(stderr, &error),
    }
}

/// Maps a [`run`] status onto a process exit code.
#[must_use]
pub fn exit_code_from(status: i32) -> ExitCode {
    if status == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(status as u8)
    }
}

fn report<Err: Write>(stderr: &mut Err, error: &Error) -> i32 {
    let kind = if error.is_transient() {
        "transient exception"
    } else {
        "error"
    };
    let _ = writeln!(stderr, "espif: {kind}: {error}");
    1
}

fn init_tracing(invocation: &Invocation) {
    let filter = if invocation.debug {
        "debug"
    } else if invocation.verbose {
        "info"
    } else {
        "warn"
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

fn dispatch<Out: Write>(invocation: &Invocation, stdout: &mut Out) -> Result<(), Error> {
    let mode = match invocation.operation {
        Operation::Broadcast => Mode::Broadcast,
        Operation::Multicast => Mode::Multicast,
        _ if invocation.use_tcp => Mode::Tcp,
        _ => Mode::Udp,
    };

    let config = SessionConfig {
        raw: invocation.raw,
        provide_checksum: invocation.provide_checksum,
        request_checksum: invocation.request_checksum,
        broadcast_group_mask: invocation.broadcast_group_mask,
        sector_size: SECTOR_SIZE,
        verbose: invocation.verbose,
        debug: invocation.debug,
    };

    let mut transport = Transport::connect(&invocation.host, invocation.port, mode, SECTOR_SIZE)?;

    match invocation.operation {
        Operation::Passthrough => {
            let reply = ops::send(&transport, &config, &invocation.args, invocation.dontwait)?;
            if !reply.is_empty() {
                let _ = writeln!(stdout, "{reply}");
            }
            Ok(())
        }
        Operation::Broadcast | Operation::Multicast => {
            let report =
                ops::multicast(&transport, &config, &invocation.args, invocation.burst)?;
            print_discovery_report(stdout, &report);
            Ok(())
        }
        _ => flash_operation(invocation, &config, &mut transport, stdout),
    }
}

fn flash_operation<Out: Write>(
    invocation: &Invocation,
    config: &SessionConfig,
    transport: &mut Transport,
    stdout: &mut Out,
) -> Result<(), Error> {
    let info = flash::flash_info(transport, config)
        .map_err(|error| Error::hard(format!("flash incompatible image: {error}")))?;

    if invocation.verbose || invocation.operation == Operation::Info {
        print_flash_banner(stdout, &info);
    }

    // With no explicit start sector, flash transfers target the slot that is
    // not currently booted; writing there keeps the running firmware intact.
    let mut otawrite = false;
    let mut start = invocation.start;
    if start == -1 {
        match invocation.operation {
            Operation::Write | Operation::Simulate | Operation::Verify | Operation::Info => {
                let slot = (info.current_slot + 1) % 2;
                start = i64::from(info.slot_sectors[slot as usize]);
                otawrite = true;
            }
            Operation::Benchmark | Operation::Image | Operation::EpaperImage => {}
            _ => return Err(Error::hard("start address not set")),
        }
    }
    // Benchmark, image and e-paper never consume a start sector, so the
    // -1 sentinel must only be rejected where one is actually used.
    let start_sector =
        || u32::try_from(start).map_err(|_| Error::hard("invalid value for start argument"));
    let length = u32::try_from(invocation.length)
        .map_err(|_| Error::hard("invalid value for length argument"))?;

    match invocation.operation {
        Operation::Info => Ok(()),
        Operation::Read => {
            let filename = required_filename(invocation)?;
            ops::read(transport, config, filename, start_sector()?, length)
        }
        Operation::Verify => {
            let filename = required_filename(invocation)?;
            ops::verify(transport, config, filename, start_sector()?)
        }
        Operation::Simulate => {
            let filename = required_filename(invocation)?;
            ops::write(transport, config, filename, start_sector()?, true, false)
        }
        Operation::Write => {
            let filename = required_filename(invocation)?;
            let sector = start_sector()?;
            ops::write(transport, config, filename, sector, false, otawrite)?;

            if otawrite && !invocation.nocommit {
                let slot = (info.current_slot + 1) % 2;
                flash::commit_ota(
                    transport,
                    config,
                    slot,
                    sector,
                    !invocation.noreset,
                    invocation.notemp,
                )?;
            }
            Ok(())
        }
        Operation::Benchmark => {
            let report = ops::benchmark(transport, config, length as usize)?;
            let _ = writeln!(
                stdout,
                "send: {} kb in {:.1} s, {:.0} kb/s",
                report.sent_bytes / 1024,
                report.send_elapsed.as_secs_f64(),
                report.send_rate()
            );
            let _ = writeln!(
                stdout,
                "receive: {} kb in {:.1} s, {:.0} kb/s",
                report.received_bytes / 1024,
                report.receive_elapsed.as_secs_f64(),
                report.receive_rate()
            );
            Ok(())
        }
        Operation::Image => {
            let filename = required_filename(invocation)?;
            let pixels = load_pixels(filename, &info)?;
            ops::image(
                transport,
                config,
                invocation.image_slot,
                &pixels,
                info.display_x,
                info.display_y,
                info.display_depth,
                invocation.image_timeout,
            )
        }
        Operation::EpaperImage => Err(Error::hard("e-paper image upload is not supported")),
        Operation::Passthrough | Operation::Broadcast | Operation::Multicast => {
            unreachable!("handled before the flash preflight")
        }
    }
}

fn required_filename(invocation: &Invocation) -> Result<&Path, Error> {
    invocation
        .filename
        .as_deref()
        .map(Path::new)
        .ok_or_else(|| Error::hard("file name required"))
}

/// Loads the raw RGB888 pixel buffer for the display; decoding and resizing
/// are out of scope, so the file must already match the display geometry.
fn load_pixels(filename: &Path, info: &FlashInfo) -> Result<Vec<u8>, Error> {
    let pixels = std::fs::read(filename).map_err(|error| {
        Error::hard(format!("failed to open '{}': {error}", filename.display()))
    })?;

    let expected = info.display_x as usize * info.display_y as usize * 3;
    if pixels.len() != expected {
        return Err(Error::hard(format!(
            "image load failed: '{}' is {} bytes, display {}x{} needs {expected} bytes of RGB888",
            filename.display(),
            pixels.len(),
            info.display_x,
            info.display_y
        )));
    }

    Ok(pixels)
}

fn print_flash_banner<Out: Write>(stdout: &mut Out, info: &FlashInfo) {
    let _ = writeln!(
        stdout,
        "flash update available, current slot: {}, address[0]: {:#x} (sector {}), address[1]: {:#x} (sector {}), display graphical dimensions: {}x{} px at depth {}",
        info.current_slot,
        info.slot_sectors[0] as usize * SECTOR_SIZE,
        info.slot_sectors[0],
        info.slot_sectors[1] as usize * SECTOR_SIZE,
        info.slot_sectors[1],
        info.display_x,
        info.display_y,
        info.display_depth
    );
}

fn print_discovery_report<Out: Write>(stdout: &mut Out, report: &ops::MulticastReport) {
    for host in report.hosts.values() {
        let _ = writeln!(
            stdout,
            "{} {} {} {}",
            host.address, host.count, host.hostname, host.payload
        );
    }
    let _ = writeln!(
        stdout,
        "probes sent: {}, replies received: {}, hosts: {}",
        report.probes,
        report.replies,
        report.hosts.len()
    );
}
