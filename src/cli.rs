//! Command-line argument parsing for the three binaries (§6, §10.3).
//!
//! Each binary gets its own `clap::Parser` struct rather than one shared
//! struct with optional fields, since the positional arguments differ
//! (`rm`/`switch` take a host name, `endnode` additionally takes a
//! service id) and clap's derive makes three small structs cheaper to
//! read than one struct with validation logic bolted on.

use clap::builder::styling::{AnsiColor, Styles};
use clap::Parser;
use std::path::PathBuf;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Central resource manager (orchestrator).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct RmArgs {
    /// Host name identifying this unit in the configuration file's
    /// `UNIT_SETTINGS` section. Optional: the RM binds its own control
    /// socket and does not otherwise need a unit entry, but accepting it
    /// keeps the three binaries' argument shape uniform.
    pub host_name: Option<String>,

    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "demonstrator_configuration.json")]
    pub config: PathBuf,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress the colorized stdout log layer; file logging is unaffected.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Endnode traffic-generating client.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct EndnodeArgs {
    /// Host name identifying this unit in `UNIT_SETTINGS`.
    pub host_name: String,

    /// The service this client generates traffic for.
    pub service_id: u64,

    #[arg(short, long, default_value = "demonstrator_configuration.json")]
    pub config: PathBuf,

    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(short, long)]
    pub quiet: bool,
}

/// Switch client driving an externally-applied mode change.
///
/// Takes only a host name (§6: `switch <host_name>`) — unlike the endnode,
/// a switch client owns no traffic-generator service, so its service
/// identity for registration purposes is its unit's `client_id`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct SwitchArgs {
    /// Host name identifying this unit in `UNIT_SETTINGS`.
    pub host_name: String,

    #[arg(short, long, default_value = "demonstrator_configuration.json")]
    pub config: PathBuf,

    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(short, long)]
    pub quiet: bool,
}
