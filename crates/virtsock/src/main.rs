mod cmd;
mod exit;
mod logging;
mod output;
mod pattern;

use clap::Parser;
use virtsock_shutdown::ConnConfig;

use crate::cmd::{Command, Context};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "virtsock",
    version,
    about = "Test socket close behaviour over hypervisor sockets",
    long_about = "Test socket close behaviour over hypervisor sockets.\n\n\
        The server streams a fixed amount of data on every connection and then \
        calls Close. The client counts the bytes it receives and checks that no \
        in-flight data was dropped.\n\n\
        Endpoints: vsock[://cid:port], hvsock[://vmid:service], unix://path"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Log every frame sent and received (implies at least debug level).
    #[arg(long, global = true)]
    trace_frames: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn context(&self) -> Context {
        Context {
            format: self.format.unwrap_or_else(OutputFormat::default_for_stdout),
            conn: ConnConfig {
                trace_frames: self.trace_frames,
                ..ConnConfig::default()
            },
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(
        cli.log_format,
        cli.log_level.with_frame_tracing(cli.trace_frames),
    );

    let ctx = cli.context();
    match cmd::run(cli.command, ctx) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
