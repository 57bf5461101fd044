//! Named watchers, their live subscriptions and the registry that keeps them alive across
//! reconnects.
//!
//! A watcher is a [`SubscriptionConfig`] paired with an [`EventHandler`](crate::EventHandler).
//! The [`WatcherManager`] opens one subscription per watcher on the current connection and
//! recreates all of them whenever the [`ConnectionManager`](crate::ConnectionManager) installs a
//! new one. Which stream is opened depends on the config:
//!
//! * a declared ABI event subscribes to that event's logs and classifies them from the event
//!   shape;
//! * the block-sweep flag subscribes to new blocks and delivers their transactions;
//! * anything else subscribes to transfer-shaped logs and classifies them by asking each contract
//!   which token standard it implements.
//!
//! Logs are delivered in batches bounded by size and time.

mod builder;
mod config;
mod definitions;
mod manager;
mod subscription;

pub use builder::{DEFAULT_LOG_BATCH_SIZE, DEFAULT_LOG_BATCH_WINDOW, WatcherManagerBuilder};
pub use config::{ArgsFilter, SubscriptionConfig, WatcherKind};
pub use definitions::{
    ALL_WALLETS_WATCHER, HandlerContext, HandlerFactory, TRANSFER_FROM_WATCHER,
    TRANSFER_TO_WATCHER, WalletMonitor, WatcherSet,
};
pub use manager::WatcherManager;
