use std::sync::Arc;

use async_trait::async_trait;

use crate::HandlerResult;

/// A destination for human-readable alerts (chat channel, feed, log).
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn send(&self, message: &str) -> HandlerResult;
}

/// Best-effort fan-out to every configured sink.
#[derive(Clone, Default)]
pub struct Broadcaster {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.sinks.iter().map(|sink| sink.name())).finish()
    }
}

impl Broadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Sends `message` to every sink in order and returns how many accepted it.
    ///
    /// A failing sink is logged and skipped.
    pub async fn broadcast(&self, message: &str) -> usize {
        let mut delivered = 0;
        for sink in &self.sinks {
            match sink.send(message).await {
                Ok(()) => {
                    debug!(sink = sink.name(), "Message sent");
                    delivered += 1;
                }
                Err(e) => error!(sink = sink.name(), error = %e, "Error sending message"),
            }
        }
        delivered
    }
}

/// Writes alerts to the log at `info` level.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &str) -> HandlerResult {
        info!(message = %message, "Alert");
        Ok(())
    }
}
