//! CLI surface for vcsd.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser};

use crate::config;
use crate::server::{Server, ServerConfig};
use crate::store::Store;
use crate::Result;

#[derive(Parser, Debug)]
#[command(
    name = "vcsd",
    version,
    about = "Voracious code storage server",
    infer_long_args = true
)]
pub struct Cli {
    /// Host address to bind (overrides config).
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port to bind (overrides config).
    #[arg(short = 'p', long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Config file path (default: ./vcsd.toml).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

/// Loads config, applies flag overrides, and serves until the process
/// exits.
pub fn run(cli: Cli) -> Result<()> {
    let mut config = config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.listen.host = host;
    }
    if let Some(port) = cli.port {
        config.listen.port = port;
    }

    let store = Arc::new(Store::new());
    let server = Server::new(
        store,
        ServerConfig {
            listen_addr: config.listen.addr(),
            limits: config.limits,
            max_connections: config.listen.max_connections,
        },
    );
    server.run()?;
    Ok(())
}
