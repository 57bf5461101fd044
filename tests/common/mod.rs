use std::{sync::Arc, time::Duration};

use alloy::primitives::{Address, address};
use chain_watcher::{
    Capabilities, SubscriptionConfig, WatcherManager, WatcherManagerBuilder,
    test_utils::{MockConnection, MockConnector, RecordingHandler, TokenProfile},
};

pub const USDC: Address = address!("0x00000000000000000000000000000000000000c1");
pub const APES: Address = address!("0x00000000000000000000000000000000000000c2");
pub const ITEMS: Address = address!("0x00000000000000000000000000000000000000c3");
pub const ALICE: Address = address!("0x00000000000000000000000000000000000000a1");
pub const BOB: Address = address!("0x00000000000000000000000000000000000000b0");
pub const CAROL: Address = address!("0x00000000000000000000000000000000000000c0");

pub const BATCH_WINDOW: Duration = Duration::from_millis(50);

pub struct WatcherSetup {
    pub connector: MockConnector,
    pub manager: WatcherManager<MockConnector>,
    pub handler: Arc<RecordingHandler>,
}

impl WatcherSetup {
    /// Connection currently installed by the manager.
    pub fn connection(&self) -> MockConnection {
        self.connector.latest()
    }
}

/// A connector that knows one fungible, one non-fungible and one multi-token contract.
pub fn scripted_connector() -> MockConnector {
    let connector = MockConnector::new();
    connector.set_token(USDC, TokenProfile::fungible("USD Coin", "USDC", 6));
    connector.set_token(APES, TokenProfile::non_fungible("Apes", "APE"));
    connector.set_token(ITEMS, TokenProfile::multi_token());
    connector
}

pub fn builder(connector: &MockConnector) -> WatcherManagerBuilder<MockConnector> {
    WatcherManager::builder(connector.clone()).log_batch_window(BATCH_WINDOW)
}

pub async fn setup_watcher(
    config: SubscriptionConfig,
    capabilities: Capabilities,
) -> anyhow::Result<WatcherSetup> {
    let connector = scripted_connector();
    let manager = builder(&connector).build().await?;
    let handler = Arc::new(RecordingHandler::new(capabilities));

    manager.add_watcher(config, handler.clone()).await?;

    Ok(WatcherSetup { connector, manager, handler })
}

/// Lets spawned tasks run and partial log batches flush.
pub async fn settle() {
    tokio::time::sleep(BATCH_WINDOW * 2).await;
}
