use std::sync::Arc;

use alloy::primitives::U256;
use chain_watcher::{
    Broadcaster, Direction, HandlerContext, WalletMonitor, WatcherManager,
    test_utils::{MockConnector, RecordingNotifier, block, erc20_transfer_log, erc721_transfer_log},
};

use crate::common::{ALICE, APES, BOB, CAROL, USDC, builder, scripted_connector, settle};

struct Monitored {
    connector: MockConnector,
    _manager: WatcherManager<MockConnector>,
    sink: Arc<RecordingNotifier>,
}

async fn monitor(wallets: WalletMonitor) -> anyhow::Result<Monitored> {
    let connector = scripted_connector();
    let manager = builder(&connector).build().await?;
    let sink = Arc::new(RecordingNotifier::default());
    let context = HandlerContext {
        metadata: manager.metadata().clone(),
        broadcaster: Broadcaster::new().sink(sink.clone()),
    };

    wallets.into_watchers().register_all(&manager, &context).await?;

    Ok(Monitored { connector, _manager: manager, sink })
}

#[tokio::test(start_paused = true)]
async fn transfers_become_readable_alerts() -> anyhow::Result<()> {
    let monitored = monitor(WalletMonitor::new().wallet("Alice", ALICE, Direction::Both)).await?;
    let connection = monitored.connector.latest();

    connection.emit_log(erc20_transfer_log(USDC, CAROL, ALICE, U256::from(2_500_000)));
    settle().await;
    connection.emit_log(erc721_transfer_log(APES, ALICE, BOB, U256::from(5)));
    settle().await;

    assert_eq!(
        monitored.sink.messages(),
        vec![
            format!("Alice received 2.5 $USDC from {CAROL}"),
            format!("Alice sent APE #5 to {BOB}"),
        ]
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transactions_link_to_the_explorer() -> anyhow::Result<()> {
    let monitored = monitor(
        WalletMonitor::new()
            .wallet("Alice", ALICE, Direction::From)
            .explorer_tx_url("https://etherscan.io/tx/"),
    )
    .await?;
    let connection = monitored.connector.latest();

    let activity = block(12, &[(ALICE, Some(BOB)), (BOB, Some(ALICE))]);
    connection.emit_block(activity);
    settle().await;

    // only the outgoing transaction matches a `From` wallet
    let messages = monitored.sink.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Alice new transaction: https://etherscan.io/tx/0x"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn excluded_counterparty_is_silent() -> anyhow::Result<()> {
    let monitored =
        monitor(WalletMonitor::new().wallet("Alice", ALICE, Direction::Both).exclude(CAROL))
            .await?;
    let connection = monitored.connector.latest();

    connection.emit_log(erc20_transfer_log(USDC, CAROL, ALICE, U256::from(1_000_000)));
    connection.emit_block(block(3, &[(ALICE, Some(CAROL))]));
    settle().await;
    assert!(monitored.sink.messages().is_empty());

    connection.emit_log(erc20_transfer_log(USDC, BOB, ALICE, U256::from(1_000_000)));
    settle().await;
    assert_eq!(monitored.sink.messages(), vec![format!("Alice received 1 $USDC from {BOB}")]);

    Ok(())
}
