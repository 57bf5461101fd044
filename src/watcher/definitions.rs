use std::sync::Arc;

use alloy::primitives::Address;

use crate::{
    WatcherError,
    connection::Connector,
    handler::{
        AddressRouter, Broadcaster, Direction, EventHandler, MonitoredAddress, WalletActivityRouter,
        WalletAlertHandler,
    },
    metadata::MetadataCache,
    watcher::{
        WatcherManager,
        config::{ArgsFilter, SubscriptionConfig},
    },
};

/// Name of the block-sweep watcher created by [`WalletMonitor`].
pub const ALL_WALLETS_WATCHER: &str = "AllWallets_Activity_Watcher";
/// Name of the outgoing-transfer watcher created by [`WalletMonitor`].
pub const TRANSFER_FROM_WATCHER: &str = "MonitoredAddresses_Transfer_From";
/// Name of the incoming-transfer watcher created by [`WalletMonitor`].
pub const TRANSFER_TO_WATCHER: &str = "MonitoredAddresses_Transfer_To";

/// Shared services handed to handler factories.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub metadata: Arc<MetadataCache>,
    pub broadcaster: Broadcaster,
}

/// Builds the handler of one watcher.
pub type HandlerFactory = Box<dyn Fn(&HandlerContext) -> Arc<dyn EventHandler> + Send + Sync>;

/// The watchers an application runs, assembled in code.
///
/// ```rust
/// use std::sync::Arc;
/// use chain_watcher::{SubscriptionConfig, TransferLogger, WatcherSet};
///
/// let set = WatcherSet::new().watcher(SubscriptionConfig::new("Transfers"), |ctx| {
///     Arc::new(TransferLogger::new("Transfers", ctx.metadata.clone()))
/// });
/// assert_eq!(set.names(), vec!["Transfers"]);
/// ```
#[derive(Default)]
pub struct WatcherSet {
    definitions: Vec<(SubscriptionConfig, HandlerFactory)>,
}

impl std::fmt::Debug for WatcherSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.definitions.iter().map(|(config, _)| config.name())).finish()
    }
}

impl WatcherSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn watcher<F>(mut self, config: SubscriptionConfig, factory: F) -> Self
    where
        F: Fn(&HandlerContext) -> Arc<dyn EventHandler> + Send + Sync + 'static,
    {
        self.definitions.push((config, Box::new(factory)));
        self
    }

    /// Appends every definition of `other`.
    #[must_use]
    pub fn merge(mut self, other: WatcherSet) -> Self {
        self.definitions.extend(other.definitions);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|(config, _)| config.name()).collect()
    }

    /// Builds each handler from `context` and adds the watcher to `manager`, in order.
    ///
    /// A watcher that cannot be added is logged and skipped; the rest are still registered.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered, after every definition has been tried.
    pub async fn register_all<C: Connector>(
        &self,
        manager: &WatcherManager<C>,
        context: &HandlerContext,
    ) -> Result<(), WatcherError> {
        let mut first_error = None;

        for (config, factory) in &self.definitions {
            if let Err(e) = manager.add_watcher(config.clone(), factory(context)).await {
                error!(watcher: config.name(), error = %e, "Failed to register watcher");
                first_error.get_or_insert(e);
            }
        }

        info!(watchers = self.definitions.len(), "Watcher definitions registered");
        first_error.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Clone)]
struct MonitoredWallet {
    label: String,
    address: Address,
    direction: Direction,
}

/// Wallet activity alerts for a fixed list of addresses.
///
/// Produces a block-sweep watcher for plain transactions plus transfer watchers filtered on the
/// sending and receiving side. Every match is announced through the context's broadcaster by a
/// [`WalletAlertHandler`].
#[derive(Debug, Clone, Default)]
pub struct WalletMonitor {
    wallets: Vec<MonitoredWallet>,
    excluded: Vec<Address>,
    explorer_tx_url: Option<String>,
}

impl WalletMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn wallet(
        mut self,
        label: impl Into<String>,
        address: Address,
        direction: Direction,
    ) -> Self {
        self.wallets.push(MonitoredWallet { label: label.into(), address, direction });
        self
    }

    /// Ignore any activity touching `address`.
    #[must_use]
    pub fn exclude(mut self, address: Address) -> Self {
        self.excluded.push(address);
        self
    }

    #[must_use]
    pub fn explorer_tx_url(mut self, base: impl Into<String>) -> Self {
        self.explorer_tx_url = Some(base.into());
        self
    }

    fn router(&self, context: &HandlerContext) -> WalletActivityRouter {
        let mut router = AddressRouter::new();
        for wallet in &self.wallets {
            let mut handler = WalletAlertHandler::new(
                wallet.label.clone(),
                wallet.address,
                context.metadata.clone(),
                context.broadcaster.clone(),
            );
            if let Some(base) = &self.explorer_tx_url {
                handler = handler.explorer_tx_url(base.clone());
            }
            router = router.entry(MonitoredAddress::new(
                wallet.label.clone(),
                wallet.address,
                wallet.direction,
                Arc::new(handler),
            ));
        }
        for address in &self.excluded {
            router = router.exclude(*address);
        }
        WalletActivityRouter::new(router)
    }

    fn addresses_on(&self, side: Direction) -> Vec<Address> {
        self.wallets
            .iter()
            .filter(|wallet| wallet.direction == side || wallet.direction == Direction::Both)
            .map(|wallet| wallet.address)
            .collect()
    }

    /// The watcher definitions for the configured wallets.
    ///
    /// A transfer watcher is only produced for a side with at least one wallet on it, so an
    /// empty side never subscribes to every transfer on chain.
    #[must_use]
    pub fn into_watchers(self) -> WatcherSet {
        if self.wallets.is_empty() {
            return WatcherSet::new();
        }

        let monitor = Arc::new(self);
        let from = monitor.addresses_on(Direction::From);
        let to = monitor.addresses_on(Direction::To);

        let sweep = Arc::clone(&monitor);
        let mut set = WatcherSet::new()
            .watcher(SubscriptionConfig::block_sweep(ALL_WALLETS_WATCHER), move |ctx| {
                Arc::new(sweep.router(ctx))
            });

        if !from.is_empty() {
            let monitor = Arc::clone(&monitor);
            set = set.watcher(
                SubscriptionConfig::new(TRANSFER_FROM_WATCHER).args(ArgsFilter::new().from(from)),
                move |ctx| Arc::new(monitor.router(ctx)),
            );
        }
        if !to.is_empty() {
            let monitor = Arc::clone(&monitor);
            set = set.watcher(
                SubscriptionConfig::new(TRANSFER_TO_WATCHER).args(ArgsFilter::new().to(to)),
                move |ctx| Arc::new(monitor.router(ctx)),
            );
        }
        set
    }
}
