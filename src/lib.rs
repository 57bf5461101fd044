//! Chain-Watcher is a library for following EVM chain activity over a single streaming
//! connection and routing it to application handlers.
//!
//! The entry point is [`WatcherManager`], built via [`WatcherManager::builder`] from a
//! [`Connector`] such as [`WsConnector`]. Register named watchers with
//! [`WatcherManager::add_watcher`], or assemble them in code with a [`WatcherSet`] and
//! [`WatcherSet::register_all`].
//!
//! # Watchers
//!
//! Each watcher pairs a [`SubscriptionConfig`] with an [`EventHandler`]. Depending on the config
//! it follows
//!
//! - the logs of a declared ABI event, classified from the event's shape,
//! - every new block, delivering its transactions, or
//! - transfer-shaped logs of any contract, classified by probing each contract for the token
//!   standard it implements (see [`EventClassifier`] and [`MetadataCache`]).
//!
//! Handlers implement any subset of the [`EventHandler`] operations and advertise it through
//! [`Capabilities`]. Errors and panics raised by a handler are logged and never stop the
//! subscription that delivered the batch.
//!
//! # Reconnection
//!
//! The [`ConnectionManager`] owns the one connection. When a subscription stream ends it starts
//! an exponential backoff (see [`BackoffPolicy`]); after a successful reconnect every watcher is
//! recreated on the new connection with its original config and handler. Once the attempt budget
//! is spent the manager reports [`ConnectionEvent::Failed`] and stops; restarting the process is
//! left to the supervisor.
//!
//! # Ordering and duplicates
//!
//! Ordering is preserved per watcher only. Logs from different watchers can overlap (a transfer
//! between two monitored wallets matches both a sending and a receiving filter), so handlers that
//! need exactly-once effects should deduplicate, e.g. by transaction hash and log index. Logs
//! flagged as removed by a reorg are dropped before classification.

#[macro_use]
mod logging;

pub mod abi;
pub mod connection;
pub mod handler;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod watcher;

mod classifier;
mod error;
mod metadata;
mod types;

pub use classifier::{Classified, EventClassifier, EventKind};
pub use connection::{
    AlloyConnection, BackoffPolicy, BlockStream, Connection, ConnectionEvent, ConnectionManager,
    ConnectionState, Connector, LogStream, ReleasingStream, WsConnector,
};
pub use error::{HandlerError, HandlerResult, WatcherError};
pub use handler::{
    AddressRouter, Broadcaster, Capabilities, Direction, EventHandler, LogNotifier,
    MonitoredAddress, Notifier, TransferLogger, WalletActivityRouter, WalletAlertHandler,
};
pub use metadata::{BatchReader, MetadataCache, TokenMetadata, TokenStandard};
pub use types::{
    BlockActivity, BlockTransaction, Endpoints, FungibleTransfer, MultiTokenTransferBatch,
    MultiTokenTransferSingle, NonFungibleTransfer, RawTransfer, TransactionActivity,
};
pub use watcher::{
    ArgsFilter, HandlerContext, SubscriptionConfig, WalletMonitor, WatcherKind, WatcherManager,
    WatcherManagerBuilder, WatcherSet,
};
