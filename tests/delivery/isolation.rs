use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy::primitives::U256;
use async_trait::async_trait;
use chain_watcher::{
    Capabilities, EventHandler, FungibleTransfer, HandlerError, HandlerResult, SubscriptionConfig,
    TransactionActivity, assert_dispatched,
    test_utils::{RecordingHandler, block, erc20_transfer_log},
};

use crate::common::{ALICE, BOB, CAROL, USDC, settle, setup_watcher};

/// Panics on its first fungible batch, then forwards to `inner`.
struct PanicsOnce {
    calls: AtomicUsize,
    inner: Arc<RecordingHandler>,
}

#[async_trait]
impl EventHandler for PanicsOnce {
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE.with_fungible_transfer()
    }

    async fn on_fungible_transfer(&self, transfers: &[FungibleTransfer]) -> HandlerResult {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("first batch is poisoned");
        }
        self.inner.on_fungible_transfer(transfers).await
    }
}

/// Rejects every transaction batch.
struct AlwaysFails;

#[async_trait]
impl EventHandler for AlwaysFails {
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE.with_transactions()
    }

    async fn on_transactions(&self, _transactions: &[TransactionActivity]) -> HandlerResult {
        Err(HandlerError::Notify("downstream unavailable".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_does_not_end_the_subscription() -> anyhow::Result<()> {
    let setup = setup_watcher(SubscriptionConfig::new("noop"), Capabilities::NONE).await?;
    let inner = Arc::new(RecordingHandler::new(Capabilities::ALL));
    let handler = Arc::new(PanicsOnce { calls: AtomicUsize::new(0), inner: inner.clone() });
    setup.manager.add_watcher(SubscriptionConfig::new("fragile"), handler.clone()).await?;
    let connection = setup.connection();

    connection.emit_log(erc20_transfer_log(USDC, ALICE, BOB, U256::from(1)));
    settle().await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(inner.call_count(), 0);

    connection.emit_log(erc20_transfer_log(USDC, CAROL, BOB, U256::from(2)));
    assert_dispatched!(inner, 1);
    assert_eq!(inner.fungible()[0].from, CAROL);
    assert_eq!(setup.manager.live_count().await, 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failing_watcher_does_not_affect_its_siblings() -> anyhow::Result<()> {
    let setup =
        setup_watcher(SubscriptionConfig::block_sweep("healthy"), Capabilities::ALL).await?;
    setup
        .manager
        .add_watcher(SubscriptionConfig::block_sweep("broken"), Arc::new(AlwaysFails))
        .await?;
    let connection = setup.connection();

    connection.emit_block(block(1, &[(ALICE, Some(BOB))]));
    connection.emit_block(block(2, &[(BOB, Some(CAROL))]));

    assert_dispatched!(setup.handler, 2);
    assert_eq!(setup.manager.live_count().await, 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_handler_sees_blocks_in_order() -> anyhow::Result<()> {
    let setup = setup_watcher(SubscriptionConfig::new("noop"), Capabilities::NONE).await?;
    let slow = Arc::new(
        RecordingHandler::new(Capabilities::ALL).with_delay(Duration::from_millis(300)),
    );
    setup.manager.add_watcher(SubscriptionConfig::block_sweep("slow"), slow.clone()).await?;
    let connection = setup.connection();

    for number in 1..=3 {
        connection.emit_block(block(number, &[(ALICE, Some(BOB))]));
    }

    assert_dispatched!(slow, 3);
    let numbers: Vec<_> = slow.transactions().iter().map(|tx| tx.block_number).collect();
    assert_eq!(numbers, vec![Some(1), Some(2), Some(3)]);

    Ok(())
}
