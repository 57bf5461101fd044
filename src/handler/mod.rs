//! Handler capability trait, guarded dispatch and the bundled handlers.
//!
//! A handler implements any subset of the [`EventHandler`] operations and advertises that subset
//! through [`EventHandler::capabilities`]. Dispatchers consult the flags first, so a handler that
//! only cares about fungible transfers never sees the other kinds.
//!
//! Handler errors and panics are contained: they are logged with the watcher name and the
//! operation, and the subscription keeps delivering subsequent batches.

use std::{any::Any, panic::AssertUnwindSafe};

use async_trait::async_trait;
use futures::FutureExt;

use crate::{
    HandlerResult,
    types::{
        FungibleTransfer, MultiTokenTransferBatch, MultiTokenTransferSingle, NonFungibleTransfer,
        TransactionActivity,
    },
};

mod logger;
mod notify;
mod router;
mod wallet;

pub use logger::TransferLogger;
pub use notify::{Broadcaster, LogNotifier, Notifier};
pub use router::{AddressRouter, Direction, MonitoredAddress, WalletActivityRouter};
pub use wallet::{DEFAULT_DECIMALS, WalletAlertHandler, format_amount};

/// Operations a handler implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub transactions: bool,
    pub fungible_transfer: bool,
    pub non_fungible_transfer: bool,
    pub multi_token_transfer_single: bool,
    pub multi_token_transfer_batch: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        transactions: false,
        fungible_transfer: false,
        non_fungible_transfer: false,
        multi_token_transfer_single: false,
        multi_token_transfer_batch: false,
    };

    pub const ALL: Self = Self {
        transactions: true,
        fungible_transfer: true,
        non_fungible_transfer: true,
        multi_token_transfer_single: true,
        multi_token_transfer_batch: true,
    };

    #[must_use]
    pub const fn with_transactions(mut self) -> Self {
        self.transactions = true;
        self
    }

    #[must_use]
    pub const fn with_fungible_transfer(mut self) -> Self {
        self.fungible_transfer = true;
        self
    }

    #[must_use]
    pub const fn with_non_fungible_transfer(mut self) -> Self {
        self.non_fungible_transfer = true;
        self
    }

    #[must_use]
    pub const fn with_multi_token_transfer_single(mut self) -> Self {
        self.multi_token_transfer_single = true;
        self
    }

    #[must_use]
    pub const fn with_multi_token_transfer_batch(mut self) -> Self {
        self.multi_token_transfer_batch = true;
        self
    }

    /// Union of both capability sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            transactions: self.transactions || other.transactions,
            fungible_transfer: self.fungible_transfer || other.fungible_transfer,
            non_fungible_transfer: self.non_fungible_transfer || other.non_fungible_transfer,
            multi_token_transfer_single: self.multi_token_transfer_single ||
                other.multi_token_transfer_single,
            multi_token_transfer_batch: self.multi_token_transfer_batch ||
                other.multi_token_transfer_batch,
        }
    }
}

/// Receives classified on-chain activity.
///
/// Every operation defaults to a no-op; only those flagged in [`EventHandler::capabilities`] are
/// ever called. Each call carries a whole batch.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    fn capabilities(&self) -> Capabilities;

    async fn on_transactions(&self, _transactions: &[TransactionActivity]) -> HandlerResult {
        Ok(())
    }

    async fn on_fungible_transfer(&self, _transfers: &[FungibleTransfer]) -> HandlerResult {
        Ok(())
    }

    async fn on_non_fungible_transfer(&self, _transfers: &[NonFungibleTransfer]) -> HandlerResult {
        Ok(())
    }

    async fn on_multi_token_transfer_single(
        &self,
        _transfers: &[MultiTokenTransferSingle],
    ) -> HandlerResult {
        Ok(())
    }

    async fn on_multi_token_transfer_batch(
        &self,
        _transfers: &[MultiTokenTransferBatch],
    ) -> HandlerResult {
        Ok(())
    }
}

/// Awaits a handler call, logging an error or panic instead of propagating it.
///
/// Returns `true` if the call completed successfully.
pub(crate) async fn guarded<F>(
    watcher: &str,
    operation: &'static str,
    items: usize,
    call: F,
) -> bool
where
    F: Future<Output = HandlerResult>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => {
            trace!(
                watcher: watcher,
                operation = operation,
                items = items,
                "Handler call completed"
            );
            true
        }
        Ok(Err(e)) => {
            error!(
                watcher: watcher,
                operation = operation,
                error = %e,
                "Handler returned an error"
            );
            false
        }
        Err(payload) => {
            error!(
                watcher: watcher,
                operation = operation,
                panic = %panic_message(payload.as_ref()),
                "Handler panicked"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Hands a transaction batch to `handler` if it accepts transactions and the batch is non-empty.
pub(crate) async fn dispatch_transactions(
    handler: &dyn EventHandler,
    watcher: &str,
    transactions: &[TransactionActivity],
) {
    if transactions.is_empty() || !handler.capabilities().transactions {
        return;
    }
    guarded(
        watcher,
        "on_transactions",
        transactions.len(),
        handler.on_transactions(transactions),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HandlerError, test_utils::RecordingHandler};
    use alloy::primitives::{Address, B256, U256};

    fn tx() -> TransactionActivity {
        TransactionActivity {
            hash: B256::ZERO,
            block_number: Some(1),
            from: Address::ZERO,
            to: None,
            value: U256::ZERO,
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        fn capabilities(&self) -> Capabilities {
            Capabilities::NONE.with_transactions()
        }

        async fn on_transactions(&self, _: &[TransactionActivity]) -> HandlerResult {
            Err(HandlerError::Notify("sink down".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventHandler for Panicking {
        fn capabilities(&self) -> Capabilities {
            Capabilities::ALL
        }

        async fn on_transactions(&self, _: &[TransactionActivity]) -> HandlerResult {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn errors_and_panics_are_contained() {
        assert!(!guarded("w", "on_transactions", 1, Failing.on_transactions(&[tx()])).await);
        assert!(!guarded("w", "on_transactions", 1, Panicking.on_transactions(&[tx()])).await);
    }

    #[tokio::test]
    async fn capabilities_gate_dispatch() {
        let none = RecordingHandler::new(Capabilities::NONE);
        dispatch_transactions(&none, "w", &[tx()]).await;
        assert!(none.transactions().is_empty());

        let all = RecordingHandler::new(Capabilities::ALL);
        dispatch_transactions(&all, "w", &[]).await;
        assert_eq!(all.call_count(), 0);

        dispatch_transactions(&all, "w", &[tx(), tx()]).await;
        assert_eq!(all.transactions().len(), 2);
        assert_eq!(all.call_count(), 1);
    }

    #[test]
    fn capability_union() {
        let caps = Capabilities::NONE
            .with_fungible_transfer()
            .union(Capabilities::NONE.with_multi_token_transfer_batch());

        assert!(caps.fungible_transfer);
        assert!(caps.multi_token_transfer_batch);
        assert!(!caps.transactions);
        assert_eq!(Capabilities::default(), Capabilities::NONE);
    }
}
