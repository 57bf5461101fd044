//! Alerts on the activity of a few wallets, printed through the log.
//!
//! ```text
//! RUST_LOG=info WS_URL=wss://eth.example.org \
//!     cargo run --example wallet_activity -- treasury=0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045
//! ```

use std::{sync::Arc, time::Duration};

use alloy::primitives::Address;
use chain_watcher::{
    Broadcaster, Direction, HandlerContext, LogNotifier, SubscriptionConfig, TransferLogger,
    WalletMonitor, WatcherManager, WatcherSet, WsConnector,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn parse_wallet(arg: &str) -> anyhow::Result<(String, Address)> {
    let (label, address) = arg
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected <label>=<address>, got {arg}"))?;
    Ok((label.to_owned(), address.parse()?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();

    let url = std::env::var("WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8545".to_owned());

    let mut monitor = WalletMonitor::new().explorer_tx_url("https://etherscan.io/tx/");
    for arg in std::env::args().skip(1) {
        let (label, address) = parse_wallet(&arg)?;
        monitor = monitor.wallet(label, address, Direction::Both);
    }

    let connector = WsConnector::new(url).call_timeout(Duration::from_secs(30));
    let manager = WatcherManager::builder(connector).build().await?;

    let context = HandlerContext {
        metadata: manager.metadata().clone(),
        broadcaster: Broadcaster::new().sink(Arc::new(LogNotifier)),
    };

    let watchers = monitor.into_watchers().merge(WatcherSet::new().watcher(
        SubscriptionConfig::new("All_Token_Transfers"),
        |ctx| Arc::new(TransferLogger::new("All_Token_Transfers", ctx.metadata.clone())),
    ));
    if let Err(e) = watchers.register_all(&manager, &context).await {
        warn!("Some watchers failed to register: {e}");
    }
    info!("Watching {:?}", manager.watcher_names().await);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    manager.shutdown().await;

    Ok(())
}
