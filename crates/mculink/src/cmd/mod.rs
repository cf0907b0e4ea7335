use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use mculink_rpc::{LinkConfig, LinkError, Session};
use mculink_transport::TransportRegistry;

use crate::exit::{io_error, link_error, transport_error, CliError, CliResult, USAGE};
use crate::output::{parse_hex, OutputFormat};

pub mod call;
pub mod emulate;
pub mod info;
pub mod receive_long;
pub mod send_long;
pub mod stress;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Call a device function and print its reply.
    Call(CallArgs),
    /// Send a file of any size to a device function in chunks.
    SendLong(SendLongArgs),
    /// Receive a payload of any size from a device function in chunks.
    ReceiveLong(ReceiveLongArgs),
    /// Connect and print the device's function table and properties.
    Info(InfoArgs),
    /// Run a device emulator on a Unix socket.
    Emulate(EmulateArgs),
    /// Echo stress test against a device or emulator.
    Stress(StressArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, link, format),
        Command::SendLong(args) => send_long::run(args, link, format),
        Command::ReceiveLong(args) => receive_long::run(args, link, format),
        Command::Info(args) => info::run(args, link, format),
        Command::Emulate(args) => emulate::run(args),
        Command::Stress(args) => stress::run(args, link, format),
        Command::Version(args) => version::run(args),
    }
}

/// How to reach the device. Shared by every command that connects.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Transport kind (serial, unix).
    #[arg(long, global = true, env = "MCULINK_TRANSPORT", default_value = "serial")]
    pub transport: String,
    /// Reply and connect timeout (e.g. 3s, 500ms).
    #[arg(long, global = true, env = "MCULINK_TIMEOUT")]
    pub timeout: Option<String>,
    /// Baud rate for serial devices.
    #[arg(long, global = true, env = "MCULINK_BAUD")]
    pub baud: Option<u32>,
    /// JSON object mapping function names to offsets; skips the table fetch.
    #[arg(long, global = true, value_name = "FILE")]
    pub functions: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Device address (tty path or socket path).
    pub address: String,
    /// Function name, or a numeric offset.
    pub function: String,
    /// String payload.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Hex payload, e.g. "01 02 ff".
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SendLongArgs {
    /// Device address.
    pub address: String,
    /// Target function name.
    pub function: String,
    /// File to send.
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct ReceiveLongArgs {
    /// Device address.
    pub address: String,
    /// Source function name.
    pub function: String,
    /// Write the payload to this file instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Device address.
    pub address: String,
}

#[derive(Args, Debug)]
pub struct EmulateArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Extra device property (repeatable).
    #[arg(long = "property", value_name = "KEY=VALUE", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct StressArgs {
    /// Device address.
    pub address: String,
    /// Single-frame echo rounds.
    #[arg(long, default_value = "16")]
    pub echo_rounds: usize,
    /// Chunked echo rounds.
    #[arg(long, default_value = "8")]
    pub many_rounds: usize,
    /// Largest chunked payload in bytes.
    #[arg(long, default_value = "4096")]
    pub max_len: usize,
    /// Payload generator seed.
    #[arg(long, default_value = "0")]
    pub seed: u64,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Build a session from the link flags and connect it.
pub fn connect(address: &str, link: &LinkArgs) -> CliResult<Session> {
    let address = match link.baud {
        Some(baud) if link.transport == "serial" && !address.contains('@') => {
            format!("{address}@{baud}")
        }
        _ => address.to_string(),
    };
    let transport = TransportRegistry::with_defaults()
        .create(&link.transport, &address)
        .map_err(|err| transport_error("invalid transport", err))?;

    let mut config = LinkConfig::default();
    if let Some(timeout) = &link.timeout {
        let timeout = parse_duration(timeout)?;
        config = config
            .with_packet_timeout(timeout)
            .with_connect_timeout(timeout);
    }

    let mapping = link
        .functions
        .as_deref()
        .map(load_mapping)
        .transpose()
        .map_err(|err| link_error("invalid function mapping", err))?;

    let session = Session::new(transport, config);
    session
        .connect(mapping)
        .map_err(|err| link_error("connect failed", err))?;
    Ok(session)
}

fn load_mapping(path: &Path) -> Result<HashMap<String, u8>, LinkError> {
    let raw = std::fs::read(path).map_err(mculink_transport::TransportError::from)?;
    Ok(serde_json::from_slice(&raw)?)
}

pub fn read_file(path: &Path) -> CliResult<Vec<u8>> {
    std::fs::read(path).map_err(|err| io_error(&format!("failed reading {}", path.display()), err))
}

pub fn resolve_payload(args: &CallArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(hex) = &args.hex {
        return parse_hex(hex).map_err(|err| CliError::new(USAGE, format!("--hex: {err}")));
    }
    if let Some(path) = &args.file {
        return read_file(path);
    }
    Ok(Vec::new())
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "ms")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "s" => Ok(Duration::from_secs(value)),
        _ => Ok(Duration::from_millis(value)),
    }
}

fn parse_property(input: &str) -> Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{input}'"))
}
