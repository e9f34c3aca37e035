//! samflash CLI - Command-line tool for flashing ATSAMD21-family chips.
//!
//! ## Features
//!
//! - Flash raw binary images through the SAM-BA bootloader
//! - 1200-baud touch reset and bootloader port re-discovery
//! - Read flash contents back to a file
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    log::debug,
    samflash::{DeviceFamily, NativePortProvider, ProtocolMode, Session, SessionConfig},
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
    thiserror::Error,
};

mod commands;
mod config;
mod serial;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Failures that map to a dedicated exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad invocation or unusable setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// The operator stopped the run (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// samflash - Flash ATSAMD21-family chips over the SAM-BA bootloader.
///
/// Environment variables:
///   SAMFLASH_PORT              - Default serial port
///   SAMFLASH_BAUD              - Bootloader baud rate (default: 921600)
///   SAMFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "samflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (discovered if not specified).
    #[arg(short, long, global = true, env = "SAMFLASH_PORT")]
    port: Option<String>,

    /// Baud rate for bootloader communication [default: 921600].
    #[arg(short, long, global = true, env = "SAMFLASH_BAUD")]
    baud: Option<u32>,

    /// Expected chip family (samd21, samr21, saml21, samd51).
    #[arg(short, long, global = true, value_parser = parse_chip)]
    chip: Option<DeviceFamily>,

    /// Use the SAM-BA text mode instead of binary mode.
    #[arg(long, global = true)]
    text_mode: bool,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (never prompt).
    #[arg(long, global = true, env = "SAMFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flash a raw binary image to the application region.
    Flash {
        /// Firmware image (.bin).
        file: PathBuf,

        /// Offset from the application start (hex).
        #[arg(long, value_parser = parse_hex_u32)]
        offset: Option<u32>,

        /// Skip read-back verification.
        #[arg(long)]
        skip_verify: bool,

        /// Stay in the bootloader after flashing.
        #[arg(long)]
        no_reset: bool,
    },

    /// Identify the connected chip.
    Info {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Read flash contents into a file.
    Read {
        /// Output file.
        file: PathBuf,

        /// Number of bytes to read (decimal or 0x-prefixed hex).
        #[arg(short, long, value_parser = parse_u32)]
        length: u32,

        /// Absolute start address (hex).
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        offset: u32,
    },

    /// Reboot a running board into its bootloader (1200-baud touch).
    Reset,

    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        shell: Shell,
    },
}

/// Parse a hex value, with or without `0x`. Underscores are ignored.
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let digits = s
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .replace('_', "");
    u32::from_str_radix(&digits, 16).map_err(|e| format!("Invalid hex value '{s}': {e}"))
}

/// Parse a decimal value, or hex when prefixed with `0x`.
fn parse_u32(s: &str) -> Result<u32, String> {
    if s.starts_with("0x") || s.starts_with("0X") {
        return parse_hex_u32(s);
    }
    s.replace('_', "")
        .parse()
        .map_err(|e| format!("Invalid number '{s}': {e}"))
}

fn parse_chip(s: &str) -> Result<DeviceFamily, String> {
    DeviceFamily::from_name(s).ok_or_else(|| {
        let known: Vec<String> = DeviceFamily::ALL
            .iter()
            .map(|f| f.to_string().to_lowercase())
            .collect();
        format!("Unknown chip '{s}' (expected one of: {})", known.join(", "))
    })
}

fn main() -> ExitCode {
    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "samflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code_for(&err);
            if code == 0 {
                eprintln!("{} Port selection cancelled, nothing done", style("ℹ").blue());
            } else {
                eprintln!("{} {err:#}", style("Error:").red().bold());
            }
            ExitCode::from(code)
        },
    }
}

fn install_interrupt_handler() {
    let handler = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            // Second Ctrl-C: give up on a clean stop.
            std::process::exit(130);
        }
        eprintln!("\nInterrupted, stopping after the current page...");
    });
    if let Err(e) = handler {
        debug!("Could not install Ctrl-C handler: {e}");
        return;
    }

    samflash::set_interrupt_checker(was_interrupted);
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<samflash::Error>() {
        // A declined selection prompt is a neutral outcome.
        Some(samflash::Error::UserCancelled) => 0,
        Some(samflash::Error::Interrupted) => 130,
        _ => 1,
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            file,
            offset,
            skip_verify,
            no_reset,
        } => {
            let options = commands::flash::FlashOptions {
                offset: offset.unwrap_or(config.flash.offset),
                verify: !(*skip_verify || config.flash.skip_verify),
                reset_after: !(*no_reset || config.flash.no_reset),
            };
            commands::flash::cmd_flash(cli, &mut config, file, &options)
        },
        Commands::Info { json } => commands::info::cmd_info(cli, &mut config, *json),
        Commands::Read {
            file,
            length,
            offset,
        } => commands::read::cmd_read(cli, &mut config, file, *offset, *length),
        Commands::Reset => commands::reset::cmd_reset(cli, &mut config),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(&config, *json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Port named on the command line or remembered in the config.
fn target_port(cli: &Cli, config: &Config) -> Option<String> {
    cli.port
        .clone()
        .or_else(|| {
            config
                .port
                .connection
                .serial
                .clone()
        })
}

/// Session settings from CLI flags and config. Flash-specific fields are
/// left at their defaults.
fn session_config(cli: &Cli, config: &Config) -> SessionConfig {
    let defaults = SessionConfig::default();
    SessionConfig {
        bootloader_baud: cli
            .baud
            .or(config
                .port
                .connection
                .baud)
            .unwrap_or(defaults.bootloader_baud),
        allow_list: config.allow_list(),
        protocol_mode: if cli.text_mode {
            ProtocolMode::Text
        } else {
            ProtocolMode::Binary
        },
        ..defaults
    }
}

fn open_session(session_config: SessionConfig) -> Session<NativePortProvider> {
    Session::new(NativePortProvider, session_config)
}

/// Refuse to go on when the identified chip is not the one asked for.
fn check_chip(cli: &Cli, found: DeviceFamily) -> Result<()> {
    match cli.chip {
        Some(expected) if expected != found => Err(CliError::Usage(format!(
            "Expected {expected} but found {found}"
        ))
        .into()),
        _ => Ok(()),
    }
}
