use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Debug, Deserialize)]
struct DaemonInfo {
    port: u16,
    token: String,
    #[allow(dead_code)]
    pid: u32,
    #[allow(dead_code)]
    version: String,
}

/// One request line of the wire protocol, mirroring
/// `agent-device-daemon::wire::Request` field-for-field (the CLI doesn't
/// depend on the daemon crate, so it serializes its own copy).
#[derive(Debug, serde::Serialize)]
struct WireRequest {
    token: String,
    session: String,
    command: String,
    positionals: Vec<String>,
    flags: HashMap<String, Value>,
    meta: HashMap<String, Value>,
}

pub struct DaemonClient {
    info: DaemonInfo,
}

fn read_daemon_info(home: &Path) -> Result<DaemonInfo> {
    let path = home.join("daemon.json");
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("could not read daemon info at {}; is the daemon running?", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("malformed daemon info at {}", path.display()))
}

impl DaemonClient {
    pub fn discover(home: &Path) -> Result<Self> {
        Ok(DaemonClient { info: read_daemon_info(home)? })
    }

    /// Sends one NDJSON request and reads back exactly one NDJSON response
    /// line, per spec §4.F's framing ("one request per line; one response
    /// per line").
    pub async fn send(
        &self,
        session: &str,
        command: &str,
        positionals: Vec<String>,
        flags: HashMap<String, Value>,
    ) -> Result<Value> {
        let addr = format!("127.0.0.1:{}", self.info.port);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("could not connect to daemon at {addr}"))?;
        let (read_half, mut write_half) = stream.into_split();

        let request = WireRequest {
            token: self.info.token.clone(),
            session: session.to_string(),
            command: command.to_string(),
            positionals,
            flags,
            meta: HashMap::new(),
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await.context("failed to write request")?;

        let mut reader = BufReader::new(read_half);
        let mut response_line = String::new();
        let n = reader.read_line(&mut response_line).await.context("failed to read response")?;
        if n == 0 {
            bail!("daemon closed the connection without responding");
        }

        serde_json::from_str(response_line.trim_end()).context("malformed response from daemon")
    }
}
