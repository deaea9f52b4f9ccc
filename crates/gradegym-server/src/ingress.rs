//! Authenticated ingress socket receiving job descriptors.
//!
//! One long-lived upstream connection at a time. The first frame must carry
//! the shared key; every later line is one job descriptor. Transport and
//! framing errors close the connection and the listener re-accepts; nothing
//! that happens here can take the process down.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use gradegym_core::Job;
use gradegym_scheduler::StepQueue;

const ACCEPTED: &[u8] = b"{\"code\":200}\n";
const REJECTED: &[u8] = b"{\"code\":403}\n";

#[derive(Debug, Deserialize)]
struct AuthFrame {
    auth: String,
}

/// Wire form of one submission pushed by the upstream dispatcher.
#[derive(Debug, Deserialize)]
pub struct JobDescriptor {
    pub exercise_id: i64,
    pub category: String,
    pub user_id: i64,
    pub workspace_path: PathBuf,
    /// Usually 0; non-zero when a job is replayed into a later stage.
    #[serde(default)]
    pub stage: usize,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_priority() -> i64 {
    gradegym_scheduler::DEFAULT_PRIORITY
}

impl JobDescriptor {
    pub fn into_parts(self) -> (usize, i64, Job) {
        let job = Job::new(self.exercise_id, self.category, self.user_id, self.workspace_path);
        (self.stage, self.priority, job)
    }
}

pub struct IngressListener {
    listener: TcpListener,
    queue: Arc<StepQueue>,
    shared_key: String,
}

impl IngressListener {
    /// Bind the listener; a bind failure is a startup error, everything after
    /// that is absorbed.
    pub async fn bind(
        addr: &str,
        queue: Arc<StepQueue>,
        shared_key: String,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr, "ingress listening");
        Ok(Self { listener, queue, shared_key })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.accept_loop().await })
    }

    async fn accept_loop(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!(%peer, "ingress connection opened");
                    if let Err(err) = self.serve_connection(stream).await {
                        warn!(%peer, error = %err, "ingress connection dropped");
                    }
                }
                Err(err) => {
                    warn!(error = %err, "ingress accept failed");
                }
            }
        }
    }

    async fn serve_connection(&self, stream: TcpStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let Some(first) = lines.next_line().await? else {
            return Ok(());
        };
        match serde_json::from_str::<AuthFrame>(&first) {
            Ok(frame) if frame.auth == self.shared_key => {
                write_half.write_all(ACCEPTED).await?;
            }
            _ => {
                warn!("ingress authentication failed");
                write_half.write_all(REJECTED).await?;
                return Ok(());
            }
        }

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let descriptor: JobDescriptor = match serde_json::from_str(&line) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    // Malformed frame; drop the connection, upstream reconnects.
                    warn!(error = %err, "undecodable job descriptor");
                    return Ok(());
                }
            };

            let (stage, priority, job) = descriptor.into_parts();
            info!(
                stage,
                priority,
                user = job.user_id,
                exercise = job.exercise_id,
                "job received"
            );
            if let Err(err) = self.queue.enqueue(stage, job, priority) {
                warn!(stage, error = %err, "job rejected");
            }
        }
        Ok(())
    }
}
