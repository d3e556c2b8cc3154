//! UDP autodiscovery responder.
//!
//! Consoles probe the pod network with a broadcast datagram; every bridge
//! answers with its identity and the port its TCP listener is on.

use std::net::Ipv4Addr;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub async fn bind_discovery(port: u16) -> std::io::Result<UdpSocket> {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await
}

/// Answer every datagram on `socket` with the bridge identity line.
pub async fn run_discovery(socket: UdpSocket, core_id: String, server_port: u16) {
    let reply = format!("AMM_TCP_BRIDGE;core_id={core_id};server_port={server_port}\n");
    info!(
        port = socket.local_addr().map(|a| a.port()).unwrap_or(0),
        "UDP discovery listening"
    );
    let mut buf = [0u8; 256];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((_, peer)) => {
                debug!(peer = %peer, "discovery probe");
                if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
                    warn!(peer = %peer, error = %e, "discovery reply failed");
                }
            }
            Err(e) => {
                warn!(error = %e, "discovery receive failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, timeout};

    #[tokio::test]
    async fn probe_is_answered_with_the_identity_line() {
        let socket = bind_discovery(0).await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(run_discovery(socket, "AMM_000".to_owned(), 9015));

        let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        probe
            .send_to(b"ping", (Ipv4Addr::LOCALHOST, addr.port()))
            .await
            .unwrap();

        let mut buf = [0u8; 256];
        let (n, _) = timeout(Duration::from_secs(1), probe.recv_from(&mut buf))
            .await
            .expect("reply timeout")
            .expect("reply");
        assert_eq!(
            &buf[..n],
            b"AMM_TCP_BRIDGE;core_id=AMM_000;server_port=9015\n"
        );
    }
}
