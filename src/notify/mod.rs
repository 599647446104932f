// src/notify/mod.rs
pub mod dashboard;
pub mod report;
pub mod telegram;

use std::sync::Arc;

use anyhow::Result;

use crate::summarize::Summary;

/// A consumer of finished summary records. Delivery is best-effort: sink
/// failures never roll back the cycle's ledger commit.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, summary: &Summary) -> Result<()>;

    fn name(&self) -> &'static str;

    /// Sinks that fire only for repositories with `notify = true`.
    fn only_when_notify(&self) -> bool {
        false
    }
}

/// Fan-out over all configured sinks.
#[derive(Default)]
pub struct SinkMux {
    sinks: Vec<Arc<dyn Sink>>,
}

impl SinkMux {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn push(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.push(sink);
    }

    /// Deliver to every applicable sink; log and count failures, never
    /// propagate them. Returns the number of successful deliveries.
    pub async fn deliver_all(&self, summary: &Summary, notify_requested: bool) -> usize {
        let mut delivered = 0usize;
        for sink in &self.sinks {
            if sink.only_when_notify() && !notify_requested {
                continue;
            }
            match sink.deliver(summary).await {
                Ok(()) => {
                    delivered += 1;
                    tracing::debug!(sink = sink.name(), repo = %summary.repo, "summary delivered");
                }
                Err(e) => {
                    metrics::counter!("tracker_sink_failures_total").increment(1);
                    tracing::warn!(
                        sink = sink.name(),
                        repo = %summary.repo,
                        error = %e,
                        "sink delivery failed"
                    );
                }
            }
        }
        delivered
    }
}

// --- Test helper ---

pub struct MemorySink {
    pub delivered: std::sync::Mutex<Vec<Summary>>,
    notify_only: bool,
}

impl MemorySink {
    pub fn new(notify_only: bool) -> Self {
        Self {
            delivered: std::sync::Mutex::new(Vec::new()),
            notify_only,
        }
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    async fn deliver(&self, summary: &Summary) -> Result<()> {
        self.delivered.lock().unwrap().push(summary.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn only_when_notify(&self) -> bool {
        self.notify_only
    }
}
