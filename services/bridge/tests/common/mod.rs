//! Shared harness for the bridge integration suites: a bridge on an
//! ephemeral port wired to an in-process broker, plus a minimal line-protocol
//! client.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

use bridge::Bridge;
use bridge::config::BridgeOptions;
use bridge::supervisor::{RecordingSupervisor, Supervisor};
use sim_bus::Broker;

pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

pub fn test_options() -> BridgeOptions {
    BridgeOptions {
        server_port: 0,
        ..BridgeOptions::default()
    }
}

pub async fn start_bridge(options: BridgeOptions) -> (Bridge, Arc<Broker>, Arc<RecordingSupervisor>) {
    let broker = Broker::new();
    let supervisor = Arc::new(RecordingSupervisor::default());
    let bridge = Bridge::start(
        options,
        Arc::clone(&broker),
        Arc::clone(&supervisor) as Arc<dyn Supervisor>,
    )
    .await
    .expect("bridge start");
    (bridge, broker, supervisor)
}

pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(bridge: &Bridge) -> TestClient {
        let stream = TcpStream::connect(bridge.local_addr())
            .await
            .expect("connect");
        stream.set_nodelay(true).expect("nodelay");
        let (read_half, write_half) = stream.into_split();
        TestClient {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    pub async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("send");
    }

    /// Next `\n`-framed line, right-trimmed.
    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("read timeout")
            .expect("read");
        assert!(n > 0, "connection closed");
        line.trim_end().to_owned()
    }

    /// Read lines until one satisfies `pred`, skipping unrelated traffic.
    pub async fn read_line_where(&mut self, pred: impl Fn(&str) -> bool) -> String {
        for _ in 0..64 {
            let line = self.read_line().await;
            if pred(&line) {
                return line;
            }
        }
        panic!("no matching line within 64 reads");
    }

    /// Collect lines until the connection goes quiet for 300 ms.
    pub async fn read_until_quiet(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            match timeout(Duration::from_millis(300), self.reader.read_line(&mut line)).await {
                Ok(Ok(n)) if n > 0 => lines.push(line.trim_end().to_owned()),
                _ => return lines,
            }
        }
    }

    /// Announce capabilities and wait for the ack; returns this session's id.
    pub async fn announce(&mut self, xml: &str) -> String {
        self.send_line(&format!("CAPABILITY={}", encode(xml))).await;
        let ack = self
            .read_line_where(|l| l.contains("CAPABILITIES_RECEIVED="))
            .await;
        assert!(
            ack.starts_with("CAPABILITIES_RECEIVED="),
            "capability rejected: {ack}"
        );
        ack["CAPABILITIES_RECEIVED=".len()..].to_owned()
    }
}

pub fn encode(payload: &str) -> String {
    BASE64.encode(payload)
}

/// A capability document subscribing one module to the given topics.
pub fn capability_xml(module: &str, topics: &[(&str, Option<&str>)]) -> String {
    let mut topics_xml = String::new();
    for (name, nodepath) in topics {
        match nodepath {
            Some(nodepath) => topics_xml
                .push_str(&format!(r#"<topic name="{name}" nodepath="{nodepath}"/>"#)),
            None => topics_xml.push_str(&format!(r#"<topic name="{name}"/>"#)),
        }
    }
    format!(
        r#"<AMMModuleConfiguration><module name="{module}"><capabilities><capability name="core"><subscribed_topics>{topics_xml}</subscribed_topics></capability></capabilities></module></AMMModuleConfiguration>"#
    )
}
