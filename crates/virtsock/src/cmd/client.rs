use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use virtsock_shutdown::{Conn, ConnConfig};
use virtsock_transport::Transport;

use crate::cmd::{parse_duration, ClientArgs, Context};
use crate::exit::{
    io_error, shutdown_error, transport_error, CliError, CliResult, DATA_INVALID, DATA_LOST,
    SUCCESS,
};
use crate::output::{print_report, ClientReport};
use crate::pattern::PatternCheck;

pub fn run(args: ClientArgs, ctx: Context) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let transport = args.endpoint.as_transport();
    info!(endpoint = %args.endpoint, connections = args.connections, "client connecting");

    let start = Instant::now();
    let mut total_bytes = 0u64;
    for connid in 0..args.connections {
        total_bytes += drain_one(transport, connid, args.len, ctx.conn, timeout)?;
    }

    print_report(
        &ClientReport {
            endpoint: args.endpoint.to_string(),
            connections: args.connections,
            bytes_per_connection: args.len,
            total_bytes,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            result: "ok",
        },
        ctx.format,
    );
    Ok(SUCCESS)
}

/// Read one connection to end of stream and check it carried exactly the
/// expected pattern.
fn drain_one(
    transport: &dyn Transport,
    connid: usize,
    expected: usize,
    config: ConnConfig,
    timeout: Duration,
) -> CliResult<u64> {
    let stream = transport
        .dial()
        .map_err(|err| transport_error(&format!("[{connid:05}] dial {transport} failed"), err))?;
    let conn = Conn::with_config(stream, config);
    conn.set_read_timeout(Some(timeout))
        .map_err(|err| shutdown_error(&format!("[{connid:05}] set timeout failed"), err))?;

    let mut check = PatternCheck::new();
    let copied = io::copy(&mut &conn, &mut check);
    if let Err(err) = conn.close() {
        warn!(connid, error = %err, "close failed");
    }
    copied.map_err(|err| io_error(&format!("[{connid:05}] receive failed"), err))?;
    let received = check.received();
    debug!(connid, bytes = received, "received");

    let expected = expected as u64;
    if received < expected {
        error!(connid, received, expected, "read returned too few bytes");
        return Err(CliError::new(
            DATA_LOST,
            format!(
                "[{connid:05}] close dropped in-flight data: received {received} of {expected} bytes"
            ),
        ));
    }
    if received > expected {
        return Err(CliError::new(
            DATA_INVALID,
            format!("[{connid:05}] received {received} bytes, expected {expected}"),
        ));
    }
    if let Some(offset) = check.first_mismatch() {
        return Err(CliError::new(
            DATA_INVALID,
            format!("[{connid:05}] payload corrupted at byte {offset}"),
        ));
    }
    Ok(received)
}
