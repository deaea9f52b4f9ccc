//! Result sink seam.

use async_trait::async_trait;

use crate::{DeliveryPayload, Result};

/// Downstream consumer of finished jobs, reached over an authenticated IPC
/// channel.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Readiness probe; 200 means the sink will accept a terminate call.
    async fn status(&self) -> Result<i64>;

    /// Ship one finished job.
    async fn terminate(&self, payload: &DeliveryPayload) -> Result<()>;
}
