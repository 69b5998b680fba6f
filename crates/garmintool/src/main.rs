//! garmintool
//!
//! Talks to a Garmin handheld over USB using the vendor packet protocol.

mod config;
mod usb;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use common::setup_logging;
use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, info, warn};
use usb::{DeviceLocator, DeviceSession, UsbContextCell};

#[derive(Parser, Debug)]
#[command(name = "garmintool")]
#[command(author, version, about = "Talk to Garmin handhelds over USB")]
#[command(long_about = "
Talks to a Garmin handheld GPS unit over USB using the vendor packet protocol.

EXAMPLES:
    # Show unit id, product data and supported protocols
    garmintool info

    # Same, tracing every packet to stdout
    garmintool info --verbose

    # List attached units
    garmintool list

CONFIGURATION:
    The tool looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/garmintools/config.toml
    3. /etc/garmintools/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Trace every packet and log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Dump information from the connected device
    Info,
    /// List attached devices matching the configured VID/PID
    List,
    /// Save default configuration to the default location and exit
    SaveConfig,
}

/// Program names installed as symlinks and the arguments they stand for
const COMPAT_NAMES: &[(&str, &[&str])] = &[("garmin_get_info", &["info"])];

fn main() -> Result<()> {
    let args = Args::parse_from(compat_args(std::env::args_os().collect()));

    if args.command == Command::SaveConfig {
        let config = config::ToolConfig::default();
        let path = config::ToolConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        config::ToolConfig::load_or_default()
    };

    let log_level = match (&args.log_level, args.verbose) {
        (Some(level), _) => level.as_str(),
        (None, true) => "debug",
        (None, false) => config.logging.log_level.as_str(),
    };
    setup_logging(log_level).context("Failed to setup logging")?;

    debug!("garmintool v{}", env!("CARGO_PKG_VERSION"));

    let identity = config.identity().context("Invalid device in configuration")?;
    let locator = DeviceLocator::new(
        UsbContextCell::new(),
        identity,
        usb::kernel::platform_check(&config.usb.conflicting_driver),
    );

    match args.command {
        Command::Info => info_mode(locator, args.verbose, config.usb.read_bulk),
        Command::List => list_mode(locator),
        Command::SaveConfig => Ok(()),
    }
}

/// Run the handshake and product query, then print what the unit reports
fn info_mode(locator: DeviceLocator, verbose: bool, read_bulk: bool) -> Result<()> {
    let trace: Option<usb::session::TraceSink> = if verbose {
        Some(Box::new(std::io::stdout()))
    } else {
        None
    };
    let mut session = DeviceSession::new(locator, trace);
    session.set_read_bulk(read_bulk);

    if !session.open() {
        return Err(anyhow!("garmin unit could not be opened!"));
    }
    debug!(
        "Endpoints {:?}, bulk reads: {}",
        session.endpoints(),
        session.read_bulk()
    );

    let unit_id = session.start_session().context("Session handshake failed")?;
    debug!("Session state: {:?}", session.state());
    if unit_id == 0 {
        warn!("Unit did not report an id; continuing unidentified");
    }

    let product = session
        .product_info()
        .context("Failed to read product data")?;

    println!("Unit ID: {}", session.device_id());
    println!("Product ID: {}", product.product.product_id);
    println!(
        "Software version: {}",
        product.product.software_version_string()
    );
    println!("Description: {}", product.product.description);
    for extra in product.product.extra.iter().chain(&product.ext_strings) {
        println!("Extra: {}", extra);
    }
    if !product.protocols.is_empty() {
        let protocols: Vec<String> = product.protocols.iter().map(ToString::to_string).collect();
        println!("Protocols: {}", protocols.join(" "));
    }

    session.close();
    Ok(())
}

/// List matching devices without opening them
fn list_mode(mut locator: DeviceLocator) -> Result<()> {
    info!("Listing devices matching {}", locator.identity());

    let devices = locator
        .list_matching()
        .context("Failed to enumerate USB devices")?;
    debug!("libusb context initialized: {}", locator.context_initialized());

    if devices.is_empty() {
        println!("No Garmin devices found.");
    } else {
        println!("Found {} Garmin device(s):\n", devices.len());
        for device in devices {
            println!(
                "  {}  Bus {:03} Device {:03}",
                device.identity, device.bus_number, device.address
            );
        }
    }

    Ok(())
}

/// Rewrite arguments when invoked through a compatibility symlink
///
/// `garmin_get_info -v` becomes `garmintool info -v`.
fn compat_args(args: Vec<OsString>) -> Vec<OsString> {
    let Some(program) = args.first() else {
        return args;
    };
    let name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match COMPAT_NAMES.iter().find(|(compat, _)| name.contains(compat)) {
        Some((_, replacement)) => {
            let mut rewritten = vec![OsString::from("garmintool")];
            rewritten.extend(replacement.iter().map(OsString::from));
            rewritten.extend(args.into_iter().skip(1));
            rewritten
        }
        None => args,
    }
}
