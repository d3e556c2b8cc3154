//! Listener setup, accept loop and the per-session writer task.
//!
//! The accept loop polls on a one-second tick so a stop request is noticed
//! promptly.  Outbound lines for each session flow through a bounded queue
//! into a dedicated writer task — that serializes concurrent sends to one
//! socket, and no state lock is ever held around the actual write.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::hub::Hub;
use crate::net::session;

/// Listen backlog.
const BACKLOG: i32 = 30;

/// Poll tick for the accept loop.
const ACCEPT_POLL: Duration = Duration::from_secs(1);

/// Upper bound on a single socket write.
pub const MAX_WRITE_CHUNK: usize = 8 * 1024;

/// How long one chunk may take before the session is declared dead.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Open the bridge listener with address reuse, bound on all interfaces.
pub fn bind_listener(port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

/// Per-stream socket options: no Nagle delay, kernel keepalive probing.
fn configure_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10))
        .with_retries(6);
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Accept sessions until `stop` is raised.
pub async fn run_accept_loop(listener: TcpListener, hub: Arc<Hub>, stop: Arc<AtomicBool>) {
    info!(
        port = listener.local_addr().map(|a| a.port()).unwrap_or(0),
        "bridge listening"
    );
    while !stop.load(Ordering::SeqCst) {
        match timeout(ACCEPT_POLL, listener.accept()).await {
            // Poll tick elapsed with no connection; re-check the stop flag.
            Err(_) => continue,
            Ok(Ok((stream, peer))) => {
                if let Err(e) = configure_stream(&stream) {
                    warn!(peer = %peer, error = %e, "could not set socket options");
                }
                let hub = Arc::clone(&hub);
                tokio::spawn(session::run_session(hub, stream, peer));
            }
            Ok(Err(e)) => {
                error!(error = %e, "accept failed");
            }
        }
    }
    info!("accept loop stopped");
}

/// Drain one session's outbound queue onto its socket.
///
/// Lines are written in ≤8 KiB chunks, each bounded by the write timeout.
/// On failure the writer raises `dead` so the read loop tears the session
/// down; when the queue closes (cleanup already ran) it shuts the socket.
pub fn spawn_writer(
    mut write_half: OwnedWriteHalf,
    mut outbox: mpsc::Receiver<String>,
    session_id: String,
    dead: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = outbox.recv().await {
            for chunk in line.as_bytes().chunks(MAX_WRITE_CHUNK) {
                match timeout(WRITE_TIMEOUT, write_half.write_all(chunk)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(session = %session_id, error = %e, "write failed");
                        dead.notify_one();
                        return;
                    }
                    Err(_) => {
                        error!(session = %session_id, "write timed out");
                        dead.notify_one();
                        return;
                    }
                }
            }
        }
        let _ = write_half.shutdown().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::time::{Duration, timeout};

    #[tokio::test]
    async fn bind_listener_accepts_connections() {
        let listener = bind_listener(0).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        configure_stream(&stream).unwrap();
        drop(client);
    }

    #[tokio::test]
    async fn writer_delivers_queued_lines_in_order() {
        let listener = bind_listener(0).unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (_read_half, write_half) = stream.into_split();

        let (tx, rx) = mpsc::channel(8);
        let dead = Arc::new(Notify::new());
        spawn_writer(write_half, rx, "test".to_owned(), Arc::clone(&dead));

        tx.send("first|\n".to_owned()).await.unwrap();
        tx.send("second|\n".to_owned()).await.unwrap();
        drop(tx);

        let mut received = String::new();
        timeout(Duration::from_secs(1), client.read_to_string(&mut received))
            .await
            .expect("read timeout")
            .expect("read");
        assert_eq!(received, "first|\nsecond|\n");
    }

    #[tokio::test]
    async fn writer_raises_dead_on_closed_peer() {
        let listener = bind_listener(0).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (_read_half, write_half) = stream.into_split();
        drop(client);

        let (tx, rx) = mpsc::channel(8);
        let dead = Arc::new(Notify::new());
        let notified = {
            let dead = Arc::clone(&dead);
            tokio::spawn(async move { dead.notified().await })
        };
        spawn_writer(write_half, rx, "test".to_owned(), dead);

        // Large payloads force the broken pipe to surface.
        let payload = "x".repeat(MAX_WRITE_CHUNK * 4) + "\n";
        for _ in 0..8 {
            if tx.send(payload.clone()).await.is_err() {
                break;
            }
        }

        timeout(Duration::from_secs(5), notified)
            .await
            .expect("dead notification timeout")
            .expect("join");
    }
}
