use std::{sync::Arc, time::Duration};

use crate::{
    WatcherError,
    classifier::EventClassifier,
    connection::{BackoffPolicy, ConnectionManager, Connector, DEFAULT_EVENT_CAPACITY},
    metadata::{BatchReader, MetadataCache},
    watcher::{WatcherManager, subscription::SubscriptionContext},
};

/// Default maximum number of logs handed to a handler in one batch.
pub const DEFAULT_LOG_BATCH_SIZE: usize = 256;
/// Default time a partial log batch waits for more logs before it is delivered.
pub const DEFAULT_LOG_BATCH_WINDOW: Duration = Duration::from_millis(250);

/// Builder for constructing a [`WatcherManager`].
///
/// Use this to configure reconnection backoff, log batching and the metadata cache shared with
/// handlers.
pub struct WatcherManagerBuilder<C: Connector> {
    connector: C,
    backoff: BackoffPolicy,
    log_batch_size: usize,
    log_batch_window: Duration,
    event_capacity: usize,
    metadata: Option<Arc<MetadataCache>>,
}

impl<C: Connector> WatcherManagerBuilder<C> {
    /// Create a builder with default settings.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            backoff: BackoffPolicy::default(),
            log_batch_size: DEFAULT_LOG_BATCH_SIZE,
            log_batch_window: DEFAULT_LOG_BATCH_WINDOW,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            metadata: None,
        }
    }

    /// Set the reconnection backoff policy.
    #[must_use]
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    /// Set the maximum number of logs per handler batch. Values below one are treated as one.
    #[must_use]
    pub fn log_batch_size(mut self, size: usize) -> Self {
        self.log_batch_size = size;
        self
    }

    /// Set how long a partial log batch waits for more logs.
    #[must_use]
    pub fn log_batch_window(mut self, window: Duration) -> Self {
        self.log_batch_window = window;
        self
    }

    /// Set the capacity of the connection event channel.
    ///
    /// A renewal listener that falls behind by more than this many events resubscribes on the
    /// current connection. Default is [`DEFAULT_EVENT_CAPACITY`].
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Use an existing metadata cache instead of one reading through the managed connection.
    #[must_use]
    pub fn metadata(mut self, cache: Arc<MetadataCache>) -> Self {
        self.metadata = Some(cache);
        self
    }

    /// Build the `WatcherManager`.
    ///
    /// Final builder method: opens the connection and starts listening for renewals.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the initial connection fails.
    pub async fn build(self) -> Result<WatcherManager<C>, WatcherError> {
        debug!(
            base_delay_ms = self.backoff.base_delay.as_millis(),
            max_attempts = self.backoff.max_attempts,
            log_batch_size = self.log_batch_size,
            log_batch_window_ms = self.log_batch_window.as_millis(),
            "Building WatcherManager"
        );

        let manager = ConnectionManager::connect_with_capacity(
            self.connector,
            self.backoff,
            self.event_capacity,
        )
        .await?;

        let metadata = self.metadata.unwrap_or_else(|| {
            let reader: Arc<dyn BatchReader> = manager.clone();
            Arc::new(MetadataCache::new(reader))
        });

        info!("WatcherManager initialized");

        Ok(WatcherManager::start(SubscriptionContext {
            manager,
            classifier: EventClassifier::new(metadata),
            log_batch_size: self.log_batch_size,
            log_batch_window: self.log_batch_window,
        }))
    }
}
