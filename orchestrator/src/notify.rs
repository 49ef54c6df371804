// Notification seam
// Fire-and-forget lifecycle events, delivered on spawned tasks. A failing
// or stalling sink is logged and never blocks or fails a cycle.

use anyhow::Result;
use common::{ExitReason, Signal};
use std::sync::Arc;
use tracing::warn;

#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn signal_opened(&self, signal: &Signal) -> Result<()>;
    async fn signal_closed(&self, signal: &Signal, reason: ExitReason) -> Result<()>;
}

/// Swallow notifications when the host wires none in
pub struct NoopSink;

#[async_trait::async_trait]
impl NotificationSink for NoopSink {
    async fn signal_opened(&self, _signal: &Signal) -> Result<()> {
        Ok(())
    }

    async fn signal_closed(&self, _signal: &Signal, _reason: ExitReason) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn notify_opened(sink: Arc<dyn NotificationSink>, signal: Signal) {
    tokio::spawn(async move {
        if let Err(e) = sink.signal_opened(&signal).await {
            warn!(ticker = %signal.ticker, error = %e, "open notification failed");
        }
    });
}

pub(crate) fn notify_closed(sink: Arc<dyn NotificationSink>, signal: Signal, reason: ExitReason) {
    tokio::spawn(async move {
        if let Err(e) = sink.signal_closed(&signal, reason).await {
            warn!(ticker = %signal.ticker, error = %e, "close notification failed");
        }
    });
}
