//! carmedia: in-vehicle media server.
//!
//! Drives an `mpg123 -R` decoder process from a playlist held in memory.
//!
//! ## Listeners
//! - control (`command_bind`): one text command per line, one reply line each.
//! - notifications (`notification_bind`): a JSON status line pushed every few
//!   hundred milliseconds to every connected client.
//!
//! Both ports are advertised over mDNS as `_carmedia._tcp` unless
//! `--no-discovery` is given.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use media_server::{cli, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,media_server=info,media_engine=info")
        }))
        .init();

    let cfg = runtime::load_config(args.config.as_deref())?;
    let config = runtime::resolve(&args, &cfg)?;
    match args.cmd.unwrap_or(cli::Command::Serve) {
        cli::Command::Serve => runtime::run(config),
        cli::Command::CheckConfig => runtime::check_config(&config),
    }
}
