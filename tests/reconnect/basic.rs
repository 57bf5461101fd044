use std::sync::Arc;

use alloy::primitives::U256;
use chain_watcher::{
    ArgsFilter, Capabilities, ConnectionState, SubscriptionConfig, assert_dispatched,
    assert_renewed,
    test_utils::{RecordingHandler, block, erc20_transfer_log},
};

use crate::common::{ALICE, BOB, USDC, settle, setup_watcher};

#[tokio::test(start_paused = true)]
async fn stream_loss_resubscribes_every_watcher_on_the_new_connection() -> anyhow::Result<()> {
    let setup = setup_watcher(SubscriptionConfig::new("transfers"), Capabilities::ALL).await?;
    let manager = setup.manager;
    let handler = setup.handler;
    manager.add_watcher(SubscriptionConfig::block_sweep("blocks"), handler.clone()).await?;
    let mut events = manager.connection().subscribe();
    let old = setup.connector.latest();

    old.drop_streams();

    assert_eq!(assert_renewed!(events), 1);
    settle().await;

    let new = setup.connector.latest();
    assert_eq!(setup.connector.connections().len(), 2);
    // both stream ends collapse into a single reconnect
    assert_eq!(setup.connector.connect_count(), 2);
    assert_eq!(new.log_subscriptions(), 1);
    assert_eq!(new.block_subscriptions(), 1);
    assert_eq!(old.log_subscriptions(), 1);
    assert_eq!(old.block_subscriptions(), 1);
    assert_eq!(manager.live_count().await, 2);
    assert_eq!(manager.connection().state(), ConnectionState::Open);

    // same handler keeps receiving on the renewed connection
    new.emit_log(erc20_transfer_log(USDC, ALICE, BOB, U256::from(10)));
    new.emit_block(block(2, &[(ALICE, Some(BOB))]));
    assert_dispatched!(handler, 2);
    assert_eq!(handler.fungible().len(), 1);
    assert_eq!(handler.transactions().len(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn recovers_after_failed_attempts() -> anyhow::Result<()> {
    let setup = setup_watcher(SubscriptionConfig::block_sweep("blocks"), Capabilities::ALL).await?;
    let mut events = setup.manager.connection().subscribe();

    setup.connector.fail_next_connects(2);
    setup.connection().drop_streams();

    assert_eq!(assert_renewed!(events), 1);
    settle().await;

    assert_eq!(setup.connector.connect_count(), 4);
    assert_eq!(setup.manager.connection().attempts(), 0);

    setup.connection().emit_block(block(9, &[(BOB, None)]));
    assert_dispatched!(setup.handler, 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn watcher_added_during_backoff_is_not_duplicated() -> anyhow::Result<()> {
    let setup = setup_watcher(
        SubscriptionConfig::new("incoming").args(ArgsFilter::new().to([ALICE])),
        Capabilities::ALL,
    )
    .await?;
    let mut events = setup.manager.connection().subscribe();

    setup.connection().drop_streams();
    settle().await;
    assert_eq!(setup.manager.connection().state(), ConnectionState::Backoff);

    let late = Arc::new(RecordingHandler::new(Capabilities::ALL));
    let outgoing = SubscriptionConfig::new("outgoing").args(ArgsFilter::new().from([ALICE]));
    setup.manager.add_watcher(outgoing, late).await?;

    assert_eq!(assert_renewed!(events), 1);
    settle().await;

    let new = setup.connection();
    assert_eq!(new.log_subscriptions(), 2);
    assert_eq!(setup.manager.live_count().await, 2);
    assert_eq!(setup.manager.watcher_names().await, vec!["incoming", "outgoing"]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn removed_watcher_is_not_resubscribed() -> anyhow::Result<()> {
    let setup = setup_watcher(SubscriptionConfig::block_sweep("blocks"), Capabilities::ALL).await?;
    setup
        .manager
        .add_watcher(SubscriptionConfig::new("transfers"), setup.handler.clone())
        .await?;
    let mut events = setup.manager.connection().subscribe();

    assert!(setup.manager.remove_watcher("transfers").await);
    setup.connection().drop_streams();

    assert_eq!(assert_renewed!(events), 1);
    settle().await;

    assert_eq!(setup.connection().log_subscriptions(), 0);
    assert_eq!(setup.connection().block_subscriptions(), 1);

    Ok(())
}
