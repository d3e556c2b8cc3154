//! Per-session lifecycle: admit, read lines, tear down.
//!
//! A rolling buffer accumulates socket bytes and extracts `\n`-framed lines.
//! The session dies on peer close, on a read or write error, or after ten
//! minutes without a successfully processed line; the keepalive tick proves
//! liveness to quiet clients in between.  Cleanup runs exactly once no
//! matter which path gets there first.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::hub::Hub;
use crate::net::server::spawn_writer;
use crate::parser;
use crate::registry::SessionHandle;

/// Outbound lines queued per session before fan-out backpressure kicks in.
const OUTBOX_CAPACITY: usize = 1024;

/// Silence on the read side before a synthetic keepalive goes out.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// A session with no successfully processed line for this long is dead.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const KEEPALIVE_LINE: &str = "[KEEPALIVE]\n";

/// Drive one accepted connection until it dies, then clean up.
pub async fn run_session(hub: Arc<Hub>, stream: TcpStream, peer: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);

    let session_id = hub.registry.register(outbox_tx);
    hub.records.update(&session_id, |record| {
        record.client_connection = peer.to_string();
    });
    info!(session = %session_id, peer = %peer, "client connected");

    let Some(handle) = hub.registry.resolve(&session_id) else {
        hub.remove_session(&session_id).await;
        return;
    };
    let dead = Arc::new(Notify::new());
    spawn_writer(write_half, outbox_rx, session_id.clone(), Arc::clone(&dead));

    let reason = read_loop(&hub, &handle, read_half, &dead).await;
    info!(session = %session_id, reason, "client disconnected");
    hub.remove_session(&session_id).await;
}

async fn read_loop(
    hub: &Arc<Hub>,
    handle: &SessionHandle,
    mut read_half: OwnedReadHalf,
    dead: &Notify,
) -> &'static str {
    let mut pending: Vec<u8> = Vec::with_capacity(8192);
    let mut chunk = [0u8; 4096];
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    keepalive.reset();
    let mut last_activity = Instant::now();

    loop {
        let idle_deadline = last_activity + IDLE_TIMEOUT;
        tokio::select! {
            read = read_half.read(&mut chunk) => match read {
                Ok(0) => return "closed by peer",
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    if drain_lines(hub, handle, &mut pending).await {
                        last_activity = Instant::now();
                        keepalive.reset();
                    }
                }
                Err(e) if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
                ) => continue,
                Err(e) => {
                    error!(session = %handle.id, error = %e, "read failed");
                    return "read error";
                }
            },
            _ = keepalive.tick() => {
                handle.send(KEEPALIVE_LINE).await;
            }
            () = tokio::time::sleep_until(idle_deadline) => return "idle timeout",
            () = dead.notified() => return "write failure",
        }
    }
}

/// Extract and process every complete line in the rolling buffer.  Returns
/// whether at least one line was successfully processed.
async fn drain_lines(hub: &Arc<Hub>, handle: &SessionHandle, pending: &mut Vec<u8>) -> bool {
    let mut processed = false;
    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
        let raw: Vec<u8> = pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        debug!(session = %handle.id, line, "line received");
        if parser::process_line(hub, handle, line).await {
            processed = true;
        }
    }
    processed
}

#[cfg(test)]
mod tests {
    use super::*;

    // Line extraction is easiest to exercise without a socket; the full
    // session lifecycle is covered by the integration suites.
    #[test]
    fn newline_positions_split_the_rolling_buffer() {
        let mut pending: Vec<u8> = b"one\ntwo\r\npartial".to_vec();
        let mut lines = Vec::new();
        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&raw).trim_end().to_owned());
        }
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(pending, b"partial");
    }
}
