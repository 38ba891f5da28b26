//! Command-line surface for the gadget process.
//!
//! A single binary with no nested subcommands: `--setup` runs the
//! first-time/reconfiguration wizard, everything else starts (or restarts)
//! a bundled demo gadget.

use std::path::PathBuf;

use clap::Parser;

/// Accessory-side Alexa Gadgets toolkit: BLE and Classic Bluetooth transport,
/// directive/event dispatch, and connection-lifecycle management.
#[derive(Parser, Debug)]
#[command(name = "agt-gadget")]
#[command(author, version, about = "Alexa Gadgets accessory-side toolkit")]
pub struct Cli {
    /// Run the first-time/reconfiguration setup wizard and exit.
    #[arg(long)]
    pub setup: bool,

    /// Run a bundled demo by name (looked up under `demos/`) or by path.
    #[arg(long, value_name = "NAME|PATH")]
    pub example: Option<String>,

    /// Force the pairing advertisement at startup, ignoring any existing
    /// bond. Only meaningful together with `--example`.
    #[arg(long, requires = "example")]
    pub pair: bool,

    /// Remove the current bond and stored peer address before starting.
    /// Only meaningful together with `--example`.
    #[arg(long, requires = "example")]
    pub clear: bool,

    /// Override the persistent state file path (defaults to a platform
    /// config directory).
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Override the per-gadget INI configuration file path.
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<PathBuf>,
}
