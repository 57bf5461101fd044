use std::sync::Arc;

use alloy::{primitives::U256, rpc::types::Log};
use chain_watcher::{
    Capabilities, SubscriptionConfig, assert_dispatched, assert_quiet, assert_renewed,
    test_utils::{RecordingHandler, erc20_transfer_log},
};

use crate::common::{ALICE, BOB, USDC, builder, scripted_connector, settle, setup_watcher};

fn mined(block: u64, amount: u64) -> Log {
    let mut log = erc20_transfer_log(USDC, ALICE, BOB, U256::from(amount));
    log.block_number = Some(block);
    log
}

fn amounts(handler: &RecordingHandler) -> Vec<U256> {
    handler.fungible().iter().map(|transfer| transfer.value).collect()
}

#[tokio::test(start_paused = true)]
async fn history_is_replayed_before_live_logs() -> anyhow::Result<()> {
    let connector = scripted_connector();
    for block in 5..=7 {
        connector.record_log(mined(block, block));
    }
    let manager = builder(&connector).build().await?;
    let handler = Arc::new(RecordingHandler::new(Capabilities::ALL));
    let config = SubscriptionConfig::new("since-six").from_block(6);
    manager.add_watcher(config, handler.clone()).await?;
    let connection = connector.latest();

    assert_dispatched!(handler, 1);
    assert_eq!(handler.batch_sizes(), vec![2]);
    assert_eq!(amounts(&handler), vec![U256::from(6), U256::from(7)]);

    let queries = connection.log_queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].get_from_block(), Some(6));

    // the live stream overlaps the replayed range
    connection.emit_log(mined(7, 70));
    connection.emit_log(mined(8, 8));

    assert_dispatched!(handler, 2);
    assert_quiet!(handler);
    assert_eq!(amounts(&handler), vec![U256::from(6), U256::from(7), U256::from(8)]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn renewal_replays_logs_mined_during_the_outage() -> anyhow::Result<()> {
    let config = SubscriptionConfig::new("since-one").from_block(1);
    let setup = setup_watcher(config, Capabilities::ALL).await?;
    let mut events = setup.manager.connection().subscribe();

    setup.connection().emit_log(mined(3, 3));
    assert_dispatched!(setup.handler, 1);

    setup.connection().drop_streams();
    setup.connector.record_log(mined(4, 4));

    assert_eq!(assert_renewed!(events), 1);
    assert_dispatched!(setup.handler, 2);
    settle().await;

    let connection = setup.connection();
    assert_eq!(connection.log_queries()[0].get_from_block(), Some(4));
    assert_eq!(amounts(&setup.handler), vec![U256::from(3), U256::from(4)]);

    connection.emit_log(mined(5, 5));
    assert_dispatched!(setup.handler, 3);
    assert_quiet!(setup.handler);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn watcher_without_starting_block_reads_no_history() -> anyhow::Result<()> {
    let setup = setup_watcher(SubscriptionConfig::new("live"), Capabilities::ALL).await?;
    setup.connector.record_log(mined(1, 1));
    settle().await;

    setup.connection().emit_log(mined(2, 2));
    assert_dispatched!(setup.handler, 1);
    assert_quiet!(setup.handler);

    assert!(setup.connection().log_queries().is_empty());
    assert_eq!(amounts(&setup.handler), vec![U256::from(2)]);

    Ok(())
}
