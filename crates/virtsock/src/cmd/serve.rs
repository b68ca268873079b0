use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};
use virtsock_shutdown::{Conn, ConnConfig};
use virtsock_transport::{RawStream, VirtStream};

use crate::cmd::{parse_duration, Context, ServeArgs};
use crate::exit::{
    shutdown_error, transport_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS,
};
use crate::output::{print_report, ServeReport};
use crate::pattern;

/// How long one accept waits before the loop re-checks for Ctrl-C.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: ServeArgs, ctx: Context) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let listener = args
        .endpoint
        .as_transport()
        .listen()
        .map_err(|err| transport_error("listen failed", err))?;
    info!(endpoint = %args.endpoint, len = args.len, "serving close test");

    let payload: Arc<[u8]> = pattern::payload(args.len).into();
    let mut workers: Vec<JoinHandle<bool>> = Vec::new();
    let mut accepted = 0usize;
    let mut failed = 0usize;

    while running.load(Ordering::SeqCst) && args.count.is_none_or(|count| accepted < count) {
        let accepted_stream = listener
            .accept_timeout(ACCEPT_POLL_INTERVAL)
            .map_err(|err| transport_error("accept failed", err))?;
        let Some(stream) = accepted_stream else {
            failed += reap(&mut workers, false);
            continue;
        };
        let connid = accepted;
        accepted += 1;
        debug!(connid, peer = ?stream.peer_addr().ok(), "accepted connection");

        let payload = Arc::clone(&payload);
        let config = ctx.conn;
        workers.push(thread::spawn(move || {
            serve_one(stream, connid, &payload, config, timeout)
        }));
        failed += reap(&mut workers, false);
    }
    if !running.load(Ordering::SeqCst) {
        info!(connections = accepted, "interrupted, stopping");
    }
    failed += reap(&mut workers, true);

    print_report(
        &ServeReport {
            endpoint: args.endpoint.to_string(),
            connections: accepted,
            failed,
            bytes_per_connection: args.len,
        },
        ctx.format,
    );

    if failed > 0 {
        return Err(CliError::new(
            FAILURE,
            format!("{failed} of {accepted} connections failed"),
        ));
    }
    Ok(SUCCESS)
}

/// Write the payload, then close. Returns whether both succeeded.
fn serve_one(
    stream: VirtStream,
    connid: usize,
    payload: &[u8],
    config: ConnConfig,
    timeout: Duration,
) -> bool {
    let conn = Conn::with_config(stream, config);
    if let Err(err) = conn.set_timeout(Some(timeout)) {
        error!(connid, error = %shutdown_error("set timeout failed", err), "connection setup failed");
    }

    let start = Instant::now();
    let written = conn.write(payload);
    if let Ok(n) = &written {
        info!(
            connid,
            bytes = n,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "payload written"
        );
    }

    debug!(connid, "closing");
    let closed = conn.close();

    let mut ok = true;
    if let Err(err) = written {
        error!(connid, error = %err, "write failed");
        ok = false;
    }
    if let Err(err) = closed {
        error!(connid, error = %err, "close failed");
        ok = false;
    }
    ok
}

/// Join finished workers (all of them when `wait` is set), returning how
/// many failed.
fn reap(workers: &mut Vec<JoinHandle<bool>>, wait: bool) -> usize {
    let mut failed = 0;
    let mut pending = Vec::with_capacity(workers.len());
    for worker in workers.drain(..) {
        if !wait && !worker.is_finished() {
            pending.push(worker);
            continue;
        }
        if !worker.join().unwrap_or(false) {
            failed += 1;
        }
    }
    *workers = pending;
    failed
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::net::UnixStream;

    use virtsock_transport::UnixDomainSocket;

    use super::*;
    use crate::pattern::PatternCheck;

    fn accepted_pair() -> (VirtStream, UnixStream) {
        let dir = std::env::temp_dir().join(format!(
            "virtsock-serve-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let listener = UnixDomainSocket::bind(dir.join("s.sock")).unwrap();
        let client = UnixStream::connect(listener.path()).unwrap();
        let server = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn serve_one_streams_payload_then_closes() {
        let (server, client) = accepted_pair();
        let payload = pattern::payload(10_000);

        let worker = thread::spawn(move || {
            serve_one(
                server,
                0,
                &payload,
                ConnConfig::default(),
                Duration::from_secs(5),
            )
        });

        let client = Conn::new(client);
        let mut check = PatternCheck::new();
        std::io::copy(&mut &client, &mut check).unwrap();
        assert_eq!(check.received(), 10_000);
        assert_eq!(check.first_mismatch(), None);
        assert!(worker.join().unwrap());
        client.close().unwrap();
    }

    #[test]
    fn reap_counts_failed_workers() {
        let mut workers = vec![thread::spawn(|| true), thread::spawn(|| false)];
        assert_eq!(reap(&mut workers, true), 1);
        assert!(workers.is_empty());
    }
}
