use std::time::Duration;

use clap::{Args, Subcommand};
use virtsock_shutdown::ConnConfig;
use virtsock_transport::Endpoint;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;
use crate::pattern::DEFAULT_LEN;

pub mod client;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections, stream a fixed payload on each, then close.
    Serve(ServeArgs),
    /// Drain connections and check that close dropped no in-flight data.
    Client(ClientArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub format: OutputFormat,
    pub conn: ConnConfig,
}

pub fn run(command: Command, ctx: Context) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, ctx),
        Command::Client(args) => client::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endpoint to listen on: vsock[://cid:port], hvsock[://vmid:service], unix://path.
    pub endpoint: Endpoint,
    /// Bytes to send on each connection.
    #[arg(long, short = 'l', default_value_t = DEFAULT_LEN)]
    pub len: usize,
    /// Exit after serving N connections.
    #[arg(long)]
    pub count: Option<usize>,
    /// I/O timeout per connection, including the wait for the peer's close (e.g. 60s, 500ms).
    #[arg(long, default_value = "60s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Endpoint to connect to: vsock[://cid:port], hvsock[://vmid:service], unix://path.
    pub endpoint: Endpoint,
    /// Bytes expected on each connection.
    #[arg(long, short = 'l', default_value_t = DEFAULT_LEN)]
    pub len: usize,
    /// Number of sequential connections.
    #[arg(long, short = 'i', default_value_t = 100)]
    pub connections: usize,
    /// Read timeout per connection (e.g. 60s, 500ms).
    #[arg(long, default_value = "60s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
