//! IPC client for the downstream result sink.
//!
//! Each call opens a connection, sends one authenticated JSON frame naming
//! the remote endpoint, and reads one JSON reply. The delivery loop
//! reinstantiates the client between retries, so the client itself holds no
//! connection state.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use gradegym_core::{DeliveryPayload, Error, Result, ResultSink};

#[derive(Debug, Deserialize)]
struct Reply {
    code: i64,
}

pub struct IpcResultSink {
    addr: String,
    shared_key: String,
}

impl IpcResultSink {
    pub fn new(addr: impl Into<String>, shared_key: impl Into<String>) -> Self {
        Self { addr: addr.into(), shared_key: shared_key.into() }
    }

    async fn call(&self, endpoint: &str, data: serde_json::Value) -> Result<i64> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|err| Error::Transport(format!("result sink unreachable: {err}")))?;
        let (read_half, mut write_half) = stream.into_split();

        let mut frame = json!({ "endpoint": endpoint, "auth": self.shared_key, "data": data })
            .to_string();
        frame.push('\n');
        write_half
            .write_all(frame.as_bytes())
            .await
            .map_err(|err| Error::Transport(format!("result sink write failed: {err}")))?;

        let mut lines = BufReader::new(read_half).lines();
        let line = lines
            .next_line()
            .await
            .map_err(|err| Error::Transport(format!("result sink read failed: {err}")))?
            .ok_or_else(|| Error::Transport("result sink closed the connection".to_string()))?;

        let reply: Reply = serde_json::from_str(&line)
            .map_err(|err| Error::Transport(format!("undecodable sink reply: {err}")))?;
        Ok(reply.code)
    }
}

#[async_trait]
impl ResultSink for IpcResultSink {
    async fn status(&self) -> Result<i64> {
        self.call("status", serde_json::Value::Null).await
    }

    async fn terminate(&self, payload: &DeliveryPayload) -> Result<()> {
        let data = serde_json::to_value(payload)
            .map_err(|err| Error::Internal(format!("payload serialization: {err}")))?;
        let code = self.call("terminate", data).await?;
        if code == 200 {
            Ok(())
        } else {
            Err(Error::ExecutionFailed(format!("result sink rejected the job: code {code}")))
        }
    }
}
