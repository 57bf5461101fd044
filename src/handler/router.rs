use std::{collections::HashSet, sync::Arc};

use alloy::primitives::Address;
use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{
    HandlerResult,
    handler::{Capabilities, EventHandler, guarded},
    types::{
        Endpoints, FungibleTransfer, MultiTokenTransferBatch, MultiTokenTransferSingle,
        NonFungibleTransfer, TransactionActivity,
    },
};

/// Which side of a transfer a monitored address has to be on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    From,
    To,
    Both,
}

impl Direction {
    #[must_use]
    pub fn matches(self, address: Address, sender: Address, recipient: Option<Address>) -> bool {
        let from = matches!(self, Direction::From | Direction::Both) && sender == address;
        let to = matches!(self, Direction::To | Direction::Both) && recipient == Some(address);
        from || to
    }
}

/// A wallet the router watches, with the handler its activity goes to.
#[derive(Clone)]
pub struct MonitoredAddress {
    pub label: String,
    pub address: Address,
    pub direction: Direction,
    pub handler: Arc<dyn EventHandler>,
}

impl std::fmt::Debug for MonitoredAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoredAddress")
            .field("label", &self.label)
            .field("address", &self.address)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

impl MonitoredAddress {
    pub fn new(
        label: impl Into<String>,
        address: Address,
        direction: Direction,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self { label: label.into(), address, direction, handler }
    }
}

/// Matches activity against monitored addresses.
///
/// Addresses in the exclusion set veto a match on either side before any entry is consulted.
#[derive(Debug, Clone, Default)]
pub struct AddressRouter {
    entries: Vec<MonitoredAddress>,
    excluded: HashSet<Address>,
}

impl AddressRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entry(mut self, entry: MonitoredAddress) -> Self {
        self.entries.push(entry);
        self
    }

    /// Never route activity that touches `address`, e.g. a fee collector.
    #[must_use]
    pub fn exclude(mut self, address: Address) -> Self {
        self.excluded.insert(address);
        self
    }

    #[must_use]
    pub fn entries(&self) -> &[MonitoredAddress] {
        &self.entries
    }

    /// Monitored addresses and their directions, for building server-side filters.
    pub fn addresses(&self) -> impl Iterator<Item = (Address, Direction)> + '_ {
        self.entries.iter().map(|entry| (entry.address, entry.direction))
    }

    #[must_use]
    pub fn is_excluded<T: Endpoints>(&self, item: &T) -> bool {
        self.excluded.contains(&item.sender()) ||
            item.recipient().is_some_and(|to| self.excluded.contains(&to))
    }

    /// Entries that match `item`, in registration order. Each entry appears at most once.
    #[must_use]
    pub fn route<T: Endpoints>(&self, item: &T) -> Vec<&MonitoredAddress> {
        if self.is_excluded(item) {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|entry| entry.direction.matches(entry.address, item.sender(), item.recipient()))
            .collect()
    }
}

/// Fans wallet activity out to per-address handlers.
///
/// Every matching entry receives the item as a one-element batch. A failing or panicking entry
/// handler does not affect its siblings.
#[derive(Debug, Clone)]
pub struct WalletActivityRouter {
    router: AddressRouter,
    capabilities: Capabilities,
}

impl WalletActivityRouter {
    #[must_use]
    pub fn new(router: AddressRouter) -> Self {
        let capabilities = router
            .entries()
            .iter()
            .fold(Capabilities::NONE, |caps, entry| caps.union(entry.handler.capabilities()));
        Self { router, capabilities }
    }

    #[must_use]
    pub fn router(&self) -> &AddressRouter {
        &self.router
    }

    async fn route_each<T, F>(
        &self,
        items: &[T],
        operation: &'static str,
        wants: fn(&Capabilities) -> bool,
        call: F,
    ) where
        T: Endpoints + Sync,
        F: for<'a> Fn(&'a dyn EventHandler, &'a [T]) -> BoxFuture<'a, HandlerResult>,
    {
        for item in items {
            if self.router.is_excluded(item) {
                debug!(
                    from = %item.sender(),
                    to = ?item.recipient(),
                    operation = operation,
                    "Skipping activity touching an excluded address"
                );
                continue;
            }

            for entry in self.router.route(item) {
                if !wants(&entry.handler.capabilities()) {
                    continue;
                }
                info!(
                    wallet = %entry.label,
                    from = %item.sender(),
                    to = ?item.recipient(),
                    operation = operation,
                    "Matched monitored address"
                );
                guarded(
                    &entry.label,
                    operation,
                    1,
                    call(entry.handler.as_ref(), std::slice::from_ref(item)),
                )
                .await;
            }
        }
    }
}

#[async_trait]
impl EventHandler for WalletActivityRouter {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn on_transactions(&self, transactions: &[TransactionActivity]) -> HandlerResult {
        self.route_each(
            transactions,
            "on_transactions",
            |caps| caps.transactions,
            |handler, batch| handler.on_transactions(batch),
        )
        .await;
        Ok(())
    }

    async fn on_fungible_transfer(&self, transfers: &[FungibleTransfer]) -> HandlerResult {
        self.route_each(
            transfers,
            "on_fungible_transfer",
            |caps| caps.fungible_transfer,
            |handler, batch| handler.on_fungible_transfer(batch),
        )
        .await;
        Ok(())
    }

    async fn on_non_fungible_transfer(&self, transfers: &[NonFungibleTransfer]) -> HandlerResult {
        self.route_each(
            transfers,
            "on_non_fungible_transfer",
            |caps| caps.non_fungible_transfer,
            |handler, batch| handler.on_non_fungible_transfer(batch),
        )
        .await;
        Ok(())
    }

    async fn on_multi_token_transfer_single(
        &self,
        transfers: &[MultiTokenTransferSingle],
    ) -> HandlerResult {
        self.route_each(
            transfers,
            "on_multi_token_transfer_single",
            |caps| caps.multi_token_transfer_single,
            |handler, batch| handler.on_multi_token_transfer_single(batch),
        )
        .await;
        Ok(())
    }

    async fn on_multi_token_transfer_batch(
        &self,
        transfers: &[MultiTokenTransferBatch],
    ) -> HandlerResult {
        self.route_each(
            transfers,
            "on_multi_token_transfer_batch",
            |caps| caps.multi_token_transfer_batch,
            |handler, batch| handler.on_multi_token_transfer_batch(batch),
        )
        .await;
        Ok(())
    }
}
