use std::sync::Arc;

use alloy::{
    json_abi::Event,
    primitives::{Address, U256, address},
};
use chain_watcher::{
    ArgsFilter, BlockActivity, BlockTransaction, Capabilities, SubscriptionConfig,
    assert_dispatched, assert_quiet,
    test_utils::{
        RecordingHandler, block, erc20_transfer_log, erc721_transfer_log, transfer_batch_log,
        transfer_single_log,
    },
};

use crate::common::{
    ALICE, APES, BOB, CAROL, ITEMS, USDC, builder, scripted_connector, settle, setup_watcher,
};

#[tokio::test(start_paused = true)]
async fn fallback_watcher_partitions_a_batch_by_standard() -> anyhow::Result<()> {
    let setup = setup_watcher(SubscriptionConfig::new("transfers"), Capabilities::ALL).await?;
    let connection = setup.connection();

    connection.emit_log(erc20_transfer_log(USDC, ALICE, BOB, U256::from(1_000_000)));
    connection.emit_log(erc721_transfer_log(APES, ALICE, BOB, U256::from(42)));
    connection.emit_log(erc721_transfer_log(ITEMS, ALICE, BOB, U256::from(7)));
    // not a `Transfer`, so the node never sends it to a fallback watcher
    connection.emit_log(transfer_single_log(
        ITEMS,
        ALICE,
        ALICE,
        BOB,
        U256::from(8),
        U256::from(3),
    ));

    assert_dispatched!(setup.handler, 3);
    assert_quiet!(setup.handler);

    let handler = &setup.handler;
    assert_eq!(handler.fungible().len(), 1);
    assert_eq!(handler.non_fungible()[0].token_id, U256::from(42));
    // a multi-token contract emitting the shared `Transfer` shape moves one unit
    let multi = handler.multi_token_single();
    assert_eq!(multi.len(), 1);
    assert_eq!((multi[0].id, multi[0].value), (U256::from(7), U256::from(1)));
    // three contracts resolved in one round trip
    assert_eq!(connection.aggregate_count(), 1);
    assert_eq!(connection.aggregated_calls(), 15);

    Ok(())
}

/// Contract the connector has no profile for, so every detection call reverts.
const SILENT: Address = address!("0x00000000000000000000000000000000000000c9");

#[tokio::test(start_paused = true)]
async fn undetectable_contract_joins_the_fungible_call() -> anyhow::Result<()> {
    let setup = setup_watcher(SubscriptionConfig::new("transfers"), Capabilities::ALL).await?;
    let connection = setup.connection();

    connection.emit_log(erc721_transfer_log(APES, ALICE, BOB, U256::from(42)));
    connection.emit_log(erc20_transfer_log(USDC, ALICE, BOB, U256::from(1_000_000)));
    connection.emit_log(erc20_transfer_log(SILENT, BOB, CAROL, U256::from(5)));

    assert_dispatched!(setup.handler, 2);
    assert_quiet!(setup.handler);

    let handler = &setup.handler;
    let mut sizes = handler.batch_sizes();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 2]);

    let nfts = handler.non_fungible();
    assert_eq!(nfts.len(), 1);
    assert_eq!((nfts[0].token, nfts[0].token_id), (APES, U256::from(42)));

    let tokens: Vec<_> = handler.fungible().iter().map(|transfer| transfer.token).collect();
    assert_eq!(tokens, vec![USDC, SILENT]);

    let silent = setup.manager.metadata().cached(SILENT).expect("placeholder is cached");
    assert_eq!(silent.symbol, "???");
    assert_eq!(silent.decimals, None);
    assert!(!silent.is_non_fungible && !silent.is_multi_token);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn logs_are_grouped_by_size_and_window() -> anyhow::Result<()> {
    let connector = scripted_connector();
    let manager = builder(&connector).log_batch_size(2).build().await?;
    let handler = Arc::new(RecordingHandler::new(Capabilities::ALL));
    manager.add_watcher(SubscriptionConfig::new("transfers"), handler.clone()).await?;

    for amount in 1..=5u64 {
        connector.latest().emit_log(erc20_transfer_log(USDC, ALICE, BOB, U256::from(amount)));
    }

    assert_dispatched!(handler, 3);
    assert_eq!(handler.batch_sizes(), vec![2, 2, 1]);
    // metadata is cached after the first batch
    assert_eq!(connector.latest().aggregate_count(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn typed_watcher_classifies_from_the_declared_event() -> anyhow::Result<()> {
    let event = Event::parse(
        "event Transfer(address indexed from, address indexed to, uint256 indexed tokenId)",
    )?;
    let config = SubscriptionConfig::new("apes").address(APES).event(event);
    let setup = setup_watcher(config, Capabilities::ALL).await?;
    let connection = setup.connection();

    connection.emit_log(erc721_transfer_log(ITEMS, ALICE, BOB, U256::from(1)));
    connection.emit_log(erc721_transfer_log(APES, ALICE, BOB, U256::from(2)));

    assert_dispatched!(setup.handler, 1);
    assert_quiet!(setup.handler);

    let nfts = setup.handler.non_fungible();
    assert_eq!(nfts.len(), 1);
    assert_eq!(nfts[0].token, APES);
    assert_eq!(nfts[0].token_id, U256::from(2));
    assert_eq!(connection.aggregate_count(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn typed_multi_token_batches_reach_the_batch_operation() -> anyhow::Result<()> {
    let event = Event::parse(
        "event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values)",
    )?;
    let setup =
        setup_watcher(SubscriptionConfig::new("items").event(event), Capabilities::ALL).await?;

    setup.connection().emit_log(transfer_batch_log(
        ITEMS,
        ALICE,
        ALICE,
        BOB,
        vec![U256::from(1), U256::from(2)],
        vec![U256::from(10), U256::from(20)],
    ));

    assert_dispatched!(setup.handler, 1);
    let batches = setup.handler.multi_token_batch();
    assert_eq!(batches[0].ids, vec![U256::from(1), U256::from(2)]);
    assert_eq!(batches[0].values, vec![U256::from(10), U256::from(20)]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn argument_filter_is_applied_by_the_node() -> anyhow::Result<()> {
    let config = SubscriptionConfig::new("incoming").args(ArgsFilter::new().to([ALICE]));
    let setup = setup_watcher(config, Capabilities::ALL).await?;
    let connection = setup.connection();

    connection.emit_log(erc20_transfer_log(USDC, ALICE, BOB, U256::from(1)));
    connection.emit_log(erc20_transfer_log(USDC, CAROL, ALICE, U256::from(2)));

    assert_dispatched!(setup.handler, 1);
    assert_quiet!(setup.handler);
    assert_eq!(setup.handler.fungible()[0].from, CAROL);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn removed_logs_are_dropped() -> anyhow::Result<()> {
    let setup = setup_watcher(SubscriptionConfig::new("transfers"), Capabilities::ALL).await?;
    let mut reorged = erc20_transfer_log(USDC, ALICE, BOB, U256::from(1));
    reorged.removed = true;

    setup.connection().emit_log(reorged);
    settle().await;
    assert_eq!(setup.handler.call_count(), 0);

    setup.connection().emit_log(erc20_transfer_log(USDC, ALICE, BOB, U256::from(2)));
    assert_dispatched!(setup.handler, 1);
    assert_eq!(setup.handler.fungible()[0].value, U256::from(2));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn block_sweep_skips_hash_only_transactions() -> anyhow::Result<()> {
    let setup =
        setup_watcher(SubscriptionConfig::block_sweep("blocks"), Capabilities::ALL).await?;
    let connection = setup.connection();

    let mut mixed = block(3, &[(ALICE, Some(BOB))]);
    mixed.transactions.push(BlockTransaction::Hash(Default::default()));
    let hashes_only = BlockActivity {
        number: 4,
        transactions: vec![BlockTransaction::Hash(Default::default())],
    };

    connection.emit_block(mixed);
    connection.emit_block(hashes_only);
    connection.emit_block(block(5, &[]));

    assert_dispatched!(setup.handler, 1);
    assert_quiet!(setup.handler);
    assert_eq!(setup.handler.transactions().len(), 1);
    assert_eq!(setup.handler.transactions()[0].block_number, Some(3));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn capabilities_limit_what_is_delivered() -> anyhow::Result<()> {
    let setup = setup_watcher(
        SubscriptionConfig::new("nfts"),
        Capabilities::NONE.with_non_fungible_transfer(),
    )
    .await?;
    let connection = setup.connection();

    connection.emit_log(erc20_transfer_log(USDC, ALICE, BOB, U256::from(1)));
    connection.emit_log(erc721_transfer_log(APES, ALICE, BOB, U256::from(5)));

    assert_dispatched!(setup.handler, 1);
    assert_quiet!(setup.handler);
    assert!(setup.handler.fungible().is_empty());
    assert_eq!(setup.handler.non_fungible().len(), 1);

    Ok(())
}
