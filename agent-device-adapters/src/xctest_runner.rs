use std::time::Duration;

use agent_device_snapshot::RawNode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{instrument, warn};

use crate::error::{AdapterError, AdapterFailureReason};

/// A thin JSON-RPC-over-TCP client for the on-device XCTest runner app,
/// which a prior step (not owned by this crate) has installed and port-
/// forwarded to loopback. One connection is opened per call; the runner is
/// expected to accept newline-delimited `{id, method, params}` requests and
/// reply with newline-delimited `{id, ok, result?, error?}` envelopes.
#[derive(Debug, Clone)]
pub struct XctestRunnerClient {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    id: u32,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl XctestRunnerClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        XctestRunnerClient {
            host: host.into(),
            port,
            timeout_ms: 10_000,
        }
    }

    #[instrument(skip(self, params))]
    async fn call(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        let addr = format!("{}:{}", self.host, self.port);
        let connect = tokio::time::timeout(
            Duration::from_millis(self.timeout_ms),
            TcpStream::connect(&addr),
        )
        .await;
        let stream = match connect {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(AdapterError::new(
                    AdapterFailureReason::RunnerDesync,
                    format!("could not reach XCTest runner at {addr}: {err}"),
                    true,
                ))
            }
            Err(_) => {
                return Err(AdapterError::timeout(format!(
                    "timed out connecting to XCTest runner at {addr}"
                )))
            }
        };

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let request = RpcRequest {
            id: 1,
            method,
            params,
        };
        let mut line = serde_json::to_string(&request).map_err(|err| {
            AdapterError::new(
                AdapterFailureReason::UnparseableOutput,
                format!("could not encode runner request: {err}"),
                false,
            )
        })?;
        line.push('\n');

        tokio::time::timeout(Duration::from_millis(self.timeout_ms), write_half.write_all(line.as_bytes()))
            .await
            .map_err(|_| AdapterError::timeout(format!("runner write timed out for method '{method}'")))?
            .map_err(|err| {
                AdapterError::new(
                    AdapterFailureReason::RunnerDesync,
                    format!("could not write to runner: {err}"),
                    true,
                )
            })?;

        let mut response_line = String::new();
        let read = tokio::time::timeout(
            Duration::from_millis(self.timeout_ms),
            reader.read_line(&mut response_line),
        )
        .await
        .map_err(|_| AdapterError::timeout(format!("runner response timed out for method '{method}'")))?
        .map_err(|err| {
            AdapterError::new(
                AdapterFailureReason::RunnerDesync,
                format!("could not read from runner: {err}"),
                true,
            )
        })?;

        if read == 0 {
            return Err(AdapterError::new(
                AdapterFailureReason::RunnerDesync,
                "runner closed the connection without a response".to_string(),
                true,
            ));
        }

        let response: RpcResponse = serde_json::from_str(response_line.trim()).map_err(|err| {
            AdapterError::new(
                AdapterFailureReason::UnparseableOutput,
                format!("could not parse runner response for '{method}': {err}"),
                false,
            )
        })?;

        if !response.ok {
            return Err(AdapterError::new(
                AdapterFailureReason::NonZeroExit,
                response.error.unwrap_or_else(|| format!("runner reported failure for '{method}'")),
                false,
            ));
        }

        Ok(response.result)
    }

    #[instrument(skip(self))]
    pub async fn snapshot(&self) -> Result<Vec<RawNode>, AdapterError> {
        let result = self.call("getTree", Value::Null).await?;
        serde_json::from_value(result).map_err(|err| {
            AdapterError::new(
                AdapterFailureReason::UnparseableOutput,
                format!("could not decode runner snapshot tree: {err}"),
                false,
            )
        })
    }

    pub async fn tap(&self, x: f64, y: f64) -> Result<(), AdapterError> {
        self.call("tap", serde_json::json!({ "x": x, "y": y })).await.map(|_| ())
    }

    pub async fn long_press(&self, x: f64, y: f64, hold_ms: u64) -> Result<(), AdapterError> {
        self.call(
            "longPress",
            serde_json::json!({ "x": x, "y": y, "holdMs": hold_ms }),
        )
        .await
        .map(|_| ())
    }

    pub async fn pinch(&self, cx: f64, cy: f64, scale: f64) -> Result<(), AdapterError> {
        self.call("pinch", serde_json::json!({ "x": cx, "y": cy, "scale": scale }))
            .await
            .map(|_| ())
    }

    pub async fn type_text(&self, text: &str) -> Result<(), AdapterError> {
        self.call("typeText", serde_json::json!({ "text": text })).await.map(|_| ())
    }

    pub async fn focus(&self, x: f64, y: f64) -> Result<(), AdapterError> {
        self.call("focus", serde_json::json!({ "x": x, "y": y })).await.map(|_| ())
    }

    pub async fn swipe(&self, x1: f64, y1: f64, x2: f64, y2: f64, duration_ms: u64) -> Result<(), AdapterError> {
        self.call(
            "swipe",
            serde_json::json!({ "x1": x1, "y1": y1, "x2": x2, "y2": y2, "durationMs": duration_ms }),
        )
        .await
        .map(|_| ())
    }

    pub async fn press_home(&self) -> Result<(), AdapterError> {
        self.call("pressHome", Value::Null).await.map(|_| ())
    }

    pub async fn press_back(&self) -> Result<(), AdapterError> {
        // iOS has no universal back button; this drives a swipe-from-edge
        // gesture, which the runner maps onto the active navigation bar.
        self.call("pressBack", Value::Null).await.map(|_| ())
    }

    pub async fn app_switcher(&self) -> Result<(), AdapterError> {
        self.call("showAppSwitcher", Value::Null).await.map(|_| ())
    }

    pub async fn record_start(&self, remote_relative_path: &str) -> Result<(), AdapterError> {
        self.call("recordStart", serde_json::json!({ "path": remote_relative_path }))
            .await
            .map(|_| ())
    }

    pub async fn record_stop(&self) -> Result<(), AdapterError> {
        self.call("recordStop", Value::Null).await.map(|_| ())
    }

    /// Recovers from a desynced runner by issuing `recordStop` (ignoring its
    /// result) and retrying `recordStart` once, per §4.G's recovery note.
    #[instrument(skip(self))]
    pub async fn record_start_with_desync_recovery(&self, remote_relative_path: &str) -> Result<(), AdapterError> {
        match self.record_start(remote_relative_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.reason == AdapterFailureReason::RunnerDesync => {
                warn!("XCTest runner desynced on recordStart, recovering");
                let _ = self.record_stop().await;
                self.record_start(remote_relative_path).await
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_defaults_to_a_sane_timeout() {
        let client = XctestRunnerClient::new("127.0.0.1", 27753);
        assert_eq!(client.timeout_ms, 10_000);
    }
}
