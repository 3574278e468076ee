//! CLI module for kurento-fanout
//!
//! Subcommands:
//! - `kurento-fanout validate` - Check a settings file and show the nodes
//! - `kurento-fanout probe` - Connect to every node and print its server info
//! - `kurento-fanout session` - Build a session, attach one client, tear down

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "kurento-fanout")]
#[command(about = "Fan WebRTC sessions out across master and slave Kurento media servers")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a .env file loaded before anything else
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a settings file
    Validate(ConfigArgs),

    /// Query every configured media server
    Probe(ConfigArgs),

    /// Create a session, attach a client endpoint, then close the session
    Session(SessionArgs),
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Path to the settings file (JSON, JSONC or YAML)
    #[arg(env = "KURENTO_FANOUT_CONFIG")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct SessionArgs {
    /// Path to the settings file (JSON, JSONC or YAML)
    #[arg(env = "KURENTO_FANOUT_CONFIG")]
    pub config: PathBuf,

    /// Session id (random when omitted)
    #[arg(long)]
    pub session: Option<String>,

    /// Client SDP offer to negotiate against the new endpoint
    #[arg(long, value_name = "FILE")]
    pub offer: Option<PathBuf>,

    /// Attach the client on a random slave instead of the master
    #[arg(long)]
    pub slave: bool,
}
