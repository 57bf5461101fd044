use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    HandlerResult,
    handler::{Capabilities, EventHandler, Notifier},
    types::{
        FungibleTransfer, MultiTokenTransferBatch, MultiTokenTransferSingle, NonFungibleTransfer,
        TransactionActivity,
    },
};

#[derive(Default)]
struct Recorded {
    transactions: Vec<TransactionActivity>,
    fungible: Vec<FungibleTransfer>,
    non_fungible: Vec<NonFungibleTransfer>,
    multi_token_single: Vec<MultiTokenTransferSingle>,
    multi_token_batch: Vec<MultiTokenTransferBatch>,
    batch_sizes: Vec<usize>,
}

/// Handler that stores everything it is given.
pub struct RecordingHandler {
    capabilities: Capabilities,
    delay: Option<Duration>,
    recorded: Mutex<Recorded>,
    calls: Notify,
}

impl RecordingHandler {
    #[must_use]
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            delay: None,
            recorded: Mutex::new(Recorded::default()),
            calls: Notify::new(),
        }
    }

    /// Sleeps for `delay` inside every call before recording it.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn record(&self, size: usize, store: impl FnOnce(&mut Recorded)) -> HandlerResult {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut recorded = self.lock();
            store(&mut recorded);
            recorded.batch_sizes.push(size);
        }
        self.calls.notify_waiters();
        Ok(())
    }

    #[must_use]
    pub fn transactions(&self) -> Vec<TransactionActivity> {
        self.lock().transactions.clone()
    }

    #[must_use]
    pub fn fungible(&self) -> Vec<FungibleTransfer> {
        self.lock().fungible.clone()
    }

    #[must_use]
    pub fn non_fungible(&self) -> Vec<NonFungibleTransfer> {
        self.lock().non_fungible.clone()
    }

    #[must_use]
    pub fn multi_token_single(&self) -> Vec<MultiTokenTransferSingle> {
        self.lock().multi_token_single.clone()
    }

    #[must_use]
    pub fn multi_token_batch(&self) -> Vec<MultiTokenTransferBatch> {
        self.lock().multi_token_batch.clone()
    }

    /// Size of every batch received, in call order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batch_sizes.clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.lock().batch_sizes.len()
    }

    /// Resolves once at least `count` calls have completed.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.calls.notified();
            if self.call_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn on_transactions(&self, transactions: &[TransactionActivity]) -> HandlerResult {
        self.record(transactions.len(), |r| r.transactions.extend_from_slice(transactions)).await
    }

    async fn on_fungible_transfer(&self, transfers: &[FungibleTransfer]) -> HandlerResult {
        self.record(transfers.len(), |r| r.fungible.extend_from_slice(transfers)).await
    }

    async fn on_non_fungible_transfer(&self, transfers: &[NonFungibleTransfer]) -> HandlerResult {
        self.record(transfers.len(), |r| r.non_fungible.extend_from_slice(transfers)).await
    }

    async fn on_multi_token_transfer_single(
        &self,
        transfers: &[MultiTokenTransferSingle],
    ) -> HandlerResult {
        self.record(transfers.len(), |r| r.multi_token_single.extend_from_slice(transfers)).await
    }

    async fn on_multi_token_transfer_batch(
        &self,
        transfers: &[MultiTokenTransferBatch],
    ) -> HandlerResult {
        self.record(transfers.len(), |r| r.multi_token_batch.extend_from_slice(transfers)).await
    }
}

/// Notifier that keeps every message it is sent.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &str) -> HandlerResult {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).push(message.to_owned());
        Ok(())
    }
}
