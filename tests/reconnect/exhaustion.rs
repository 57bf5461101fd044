use std::{sync::Arc, time::Duration};

use chain_watcher::{
    BackoffPolicy, Capabilities, ConnectionState, SubscriptionConfig, WatcherError, assert_gave_up,
    test_utils::RecordingHandler,
};

use crate::common::{builder, scripted_connector, setup_watcher};

#[tokio::test(start_paused = true)]
async fn gives_up_after_ten_attempts_and_stays_down() -> anyhow::Result<()> {
    let setup = setup_watcher(SubscriptionConfig::block_sweep("blocks"), Capabilities::ALL).await?;
    let mut events = setup.manager.connection().subscribe();

    setup.connector.fail_connects(true);
    setup.connection().drop_streams();

    assert_eq!(assert_gave_up!(events), 10);
    assert_eq!(setup.manager.connection().state(), ConnectionState::Failed);
    assert_eq!(setup.connector.connect_count(), 11);

    // nothing restarts the cycle once it is over
    setup.connector.fail_connects(false);
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(setup.connector.connect_count(), 11);

    let result = setup
        .manager
        .add_watcher(
            SubscriptionConfig::new("late"),
            Arc::new(RecordingHandler::new(Capabilities::ALL)),
        )
        .await;
    assert!(matches!(result, Err(WatcherError::NotConnected)));
    assert_eq!(setup.manager.live_count().await, 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn custom_policy_bounds_the_schedule() -> anyhow::Result<()> {
    let connector = scripted_connector();
    let manager = builder(&connector)
        .backoff(
            BackoffPolicy::default()
                .base_delay(Duration::from_millis(100))
                .max_delay(Duration::from_millis(300))
                .max_attempts(3),
        )
        .build()
        .await?;
    manager
        .add_watcher(
            SubscriptionConfig::block_sweep("blocks"),
            Arc::new(RecordingHandler::new(Capabilities::ALL)),
        )
        .await?;
    let mut events = manager.connection().subscribe();
    let started = tokio::time::Instant::now();

    connector.fail_connects(true);
    connector.latest().drop_streams();

    assert_eq!(assert_gave_up!(events), 3);
    // 200 + 300 + 300 ms of backoff before the fourth attempt is refused
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(800), "gave up after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(900), "gave up after {elapsed:?}");
    assert_eq!(connector.connect_count(), 4);

    Ok(())
}
