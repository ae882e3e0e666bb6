//! Command-line surface: flag definitions and the parsed invocation.

use clap::{Arg, ArgAction, ArgMatches, Command};

use core::Error;
use core::util::parse_integer;

/// The single operation selected for this run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Pass the remaining words through as one command exchange.
    Passthrough,
    /// Print flash and display info.
    Info,
    /// Read flash sectors into a file.
    Read,
    /// Write a file to flash.
    Write,
    /// Write in simulate mode: device accounts but does not touch flash.
    Simulate,
    /// Compare a file against flash.
    Verify,
    /// Measure throughput in both directions.
    Benchmark,
    /// Upload an image to the display or an image slot.
    Image,
    /// E-paper upload; parsed but handled as unsupported.
    EpaperImage,
    /// Discovery burst over broadcast.
    Broadcast,
    /// Discovery burst over multicast.
    Multicast,
}

/// Everything extracted from the command line.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub operation: Operation,
    pub host: String,
    /// Remaining positional words, joined for passthrough/discovery sends.
    pub args: String,
    pub port: u16,
    pub filename: Option<String>,
    pub start: i64,
    pub length: i64,
    pub use_tcp: bool,
    pub raw: bool,
    pub dontwait: bool,
    pub provide_checksum: bool,
    pub request_checksum: bool,
    pub broadcast_group_mask: u32,
    pub burst: u32,
    pub nocommit: bool,
    pub noreset: bool,
    pub notemp: bool,
    pub image_slot: i32,
    pub image_timeout: u32,
    pub verbose: bool,
    pub debug: bool,
}

/// Builds the clap command definition.
///
/// The default help and version flags are replaced: `-V` selects verify and
/// `-h` is not bound, matching the established option letters.
pub fn command() -> Command {
    Command::new("espif")
        .about("flash programming and control client for espif-capable targets")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("help")
                .long("help")
                .action(ArgAction::Help)
                .help("print usage"),
        )
        .arg(flag("info", 'i', "print flash and display info"))
        .arg(flag("read", 'R', "read flash to file"))
        .arg(flag("write", 'W', "write file to flash"))
        .arg(flag("simulate", 'S', "write in simulate mode"))
        .arg(flag("verify", 'V', "verify flash against file"))
        .arg(flag("benchmark", 'B', "benchmark throughput"))
        .arg(flag("image", 'I', "send image"))
        .arg(flag("epaper-image", 'e', "send e-paper image"))
        .arg(flag("broadcast", 'b', "send broadcast message"))
        .arg(flag("multicast", 'M', "send multicast message"))
        .arg(
            Arg::new("host")
                .required(true)
                .num_args(1..)
                .help("host, broadcast address or multicast group octet, then command words"),
        )
        .arg(flag("verbose", 'v', "verbose output"))
        .arg(flag("debug", 'D', "packet trace etc."))
        .arg(flag("tcp", 't', "use TCP instead of UDP"))
        .arg(
            Arg::new("filename")
                .short('f')
                .long("filename")
                .help("file name"),
        )
        .arg(
            Arg::new("start")
                .short('s')
                .long("start")
                .default_value("-1")
                .help("send/receive start sector (OTA slot is default)"),
        )
        .arg(
            Arg::new("length")
                .short('l')
                .long("length")
                .default_value("0x1000")
                .help("read length"),
        )
        .arg(
            Arg::new("command-port")
                .short('p')
                .long("command-port")
                .default_value("24")
                .help("command port to connect to"),
        )
        .arg(flag("nocommit", 'n', "don't commit after writing"))
        .arg(flag("noreset", 'N', "don't reset after commit"))
        .arg(flag("notemp", 'T', "don't commit temporarily, commit to flash"))
        .arg(flag("dontwait", 'd', "don't wait for reply on message"))
        .arg(
            Arg::new("image_slot")
                .short('x')
                .long("image_slot")
                .default_value("-1")
                .help("send image to flash slot x instead of frame buffer"),
        )
        .arg(
            Arg::new("image_timeout")
                .short('y')
                .long("image_timeout")
                .default_value("5000")
                .help("freeze frame buffer for y ms after sending"),
        )
        .arg(flag("no-provide-checksum", '1', "do not provide checksum"))
        .arg(flag("no-request-checksum", '2', "do not request checksum"))
        .arg(flag("raw", 'r', "do not use packet encapsulation"))
        .arg(
            Arg::new("broadcast-groups")
                .short('g')
                .long("broadcast-groups")
                .default_value("0")
                .help("select broadcast groups (bitfield)"),
        )
        .arg(
            Arg::new("burst")
                .short('u')
                .long("burst")
                .default_value("1")
                .help("burst broadcast and multicast packets multiple times"),
        )
}

fn flag(name: &'static str, short: char, help: &'static str) -> Arg {
    Arg::new(name)
        .short(short)
        .long(name)
        .action(ArgAction::SetTrue)
        .help(help)
}

/// Interprets parsed matches, enforcing the single-operation rule and
/// numeric literal validity.
pub fn invocation(matches: &ArgMatches) -> Result<Invocation, Error> {
    let selected: Vec<Operation> = [
        ("info", Operation::Info),
        ("read", Operation::Read),
        ("write", Operation::Write),
        ("simulate", Operation::Simulate),
        ("verify", Operation::Verify),
        ("benchmark", Operation::Benchmark),
        ("image", Operation::Image),
        ("epaper-image", Operation::EpaperImage),
        ("broadcast", Operation::Broadcast),
        ("multicast", Operation::Multicast),
    ]
    .into_iter()
    .filter(|(name, _)| matches.get_flag(name))
    .map(|(_, operation)| operation)
    .collect();

    if selected.len() > 1 {
        return Err(Error::hard(
            "specify one of write/simulate/verify/image/epaper-image/read/info",
        ));
    }
    let operation = selected.first().copied().unwrap_or(Operation::Passthrough);

    let mut positional = matches
        .get_many::<String>("host")
        .expect("host is required")
        .cloned();
    let host = positional.next().expect("required arg yields one value");
    let args = positional.collect::<Vec<_>>().join(" ");

    let port = parse_numeric(matches, "command-port")?;
    let port = u16::try_from(port)
        .map_err(|_| Error::hard("invalid value for command-port argument"))?;

    Ok(Invocation {
        operation,
        host,
        args,
        port,
        filename: matches.get_one::<String>("filename").cloned(),
        start: parse_numeric(matches, "start")?,
        length: parse_numeric(matches, "length")?,
        use_tcp: matches.get_flag("tcp"),
        raw: matches.get_flag("raw"),
        dontwait: matches.get_flag("dontwait"),
        provide_checksum: !matches.get_flag("no-provide-checksum"),
        request_checksum: !matches.get_flag("no-request-checksum"),
        broadcast_group_mask: parse_numeric(matches, "broadcast-groups")? as u32,
        burst: parse_numeric(matches, "burst")? as u32,
        nocommit: matches.get_flag("nocommit"),
        noreset: matches.get_flag("noreset"),
        notemp: matches.get_flag("notemp"),
        image_slot: parse_numeric(matches, "image_slot")? as i32,
        image_timeout: parse_numeric(matches, "image_timeout")? as u32,
        verbose: matches.get_flag("verbose"),
        debug: matches.get_flag("debug"),
    })
}

fn parse_numeric(matches: &ArgMatches, name: &str) -> Result<i64, Error> {
    let text = matches
        .get_one::<String>(name)
        .expect("option has a default");
    parse_integer(text).ok_or_else(|| Error::hard(format!("invalid value for {name} argument")))
}
