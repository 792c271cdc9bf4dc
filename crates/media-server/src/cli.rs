use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "carmedia", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Server config file (TOML); defaults to config.toml next to the executable
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Control listener bind address, e.g. 0.0.0.0:4200
    #[arg(long, global = true)]
    pub command_bind: Option<SocketAddr>,

    /// Status notification bind address, e.g. 0.0.0.0:4201
    #[arg(long, global = true)]
    pub notification_bind: Option<SocketAddr>,

    /// Decoder executable (overrides decoder.program)
    #[arg(long, global = true)]
    pub decoder: Option<PathBuf>,

    /// Do not advertise the server over mDNS
    #[arg(long, global = true)]
    pub no_discovery: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the media server (default)
    Serve,

    /// Validate config, catalog and device table, then exit
    CheckConfig,
}
